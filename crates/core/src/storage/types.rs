use std::fmt;

use serde::{Deserialize, Serialize};

/// Which kind of durable medium a backend writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// JSON files under a root directory.
    #[default]
    File,
    /// A SQL database reached through a connection pool.
    Relational,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::File => "file",
            BackendKind::Relational => "relational",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" | "json" => Ok(BackendKind::File),
            "relational" | "sqlite" | "sql" => Ok(BackendKind::Relational),
            other => Err(format!("unknown backend kind: {other}")),
        }
    }
}

/// Point-in-time connection pool counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PoolStats {
    pub active: u32,
    pub idle: u32,
    pub total: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parses_aliases() {
        assert_eq!("json".parse::<BackendKind>().unwrap(), BackendKind::File);
        assert_eq!(
            " SQLite ".parse::<BackendKind>().unwrap(),
            BackendKind::Relational
        );
        assert!("mongo".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_backend_kind_serde_is_lowercase() {
        let json = serde_json::to_string(&BackendKind::Relational).unwrap();
        assert_eq!(json, "\"relational\"");
    }
}
