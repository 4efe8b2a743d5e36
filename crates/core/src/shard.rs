//! Shard path derivation for the file backend.
//!
//! Pure functions mapping a record id to the relative path segments of its
//! JSON file. Layout: `[<segment>/...]<sanitized-id>.json`.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// File extension of stored records.
pub const RECORD_EXTENSION: &str = "json";

/// Name used for ids that sanitize to nothing.
const UNKNOWN_NAME: &str = "unknown";

/// Inclusive bounds for `depth` and `chars_per_level`.
pub const SHARD_LEVEL_RANGE: std::ops::RangeInclusive<usize> = 1..=4;

/// How the shard key is derived from a record id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardStrategy {
    /// SHA-256 of the id, hex encoded.
    #[default]
    Hash,
    /// The sanitized id itself.
    Prefix,
}

impl std::str::FromStr for ShardStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hash" => Ok(ShardStrategy::Hash),
            "prefix" => Ok(ShardStrategy::Prefix),
            other => Err(format!("unknown shard strategy: {other}")),
        }
    }
}

/// Sharding settings for one file backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardConfig {
    pub enabled: bool,
    pub strategy: ShardStrategy,
    pub depth: usize,
    pub chars_per_level: usize,
    pub migrate_legacy_on_read: bool,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            strategy: ShardStrategy::Hash,
            depth: 2,
            chars_per_level: 2,
            migrate_legacy_on_read: false,
        }
    }
}

/// Makes an id safe to use as a file name.
///
/// Characters other than ASCII alphanumerics, `-`, `_` and `.` become `_`.
/// A blank id maps to `unknown`.
pub fn sanitize(id: &str) -> String {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return UNKNOWN_NAME.to_string();
    }
    trimmed
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// File name of a record in either layout.
pub fn file_name(id: &str) -> String {
    format!("{}.{}", sanitize(id), RECORD_EXTENSION)
}

/// Lowercased shard key, right-padded with `'0'` to `depth * chars_per_level`.
pub fn shard_key(id: &str, config: &ShardConfig) -> String {
    let raw = match config.strategy {
        ShardStrategy::Hash => hex::encode(Sha256::digest(id.trim().as_bytes())),
        ShardStrategy::Prefix => sanitize(id),
    };
    let wanted = config.depth * config.chars_per_level;
    let mut key: String = raw.to_lowercase().chars().take(wanted).collect();
    while key.chars().count() < wanted {
        key.push('0');
    }
    key
}

/// Directory segments for an id, empty when sharding is disabled.
pub fn shard_segments(id: &str, config: &ShardConfig) -> Vec<String> {
    if !config.enabled || config.depth == 0 || config.chars_per_level == 0 {
        return Vec::new();
    }
    let chars: Vec<char> = shard_key(id, config).chars().collect();
    chars
        .chunks(config.chars_per_level)
        .take(config.depth)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// Recovers the record id encoded in a stored file name, if it is one.
pub fn id_from_file_name(name: &str) -> Option<&str> {
    let stem = name.strip_suffix(RECORD_EXTENSION)?.strip_suffix('.')?;
    if stem.is_empty() {
        None
    } else {
        Some(stem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sharded(strategy: ShardStrategy, depth: usize, chars: usize) -> ShardConfig {
        ShardConfig {
            enabled: true,
            strategy,
            depth,
            chars_per_level: chars,
            migrate_legacy_on_read: false,
        }
    }

    #[test]
    fn test_sanitize_replaces_unsafe_chars() {
        assert_eq!(sanitize("a/b\\c:d e"), "a_b_c_d_e");
        assert_eq!(sanitize("Player-1_x.y"), "Player-1_x.y");
    }

    #[test]
    fn test_sanitize_blank_is_unknown() {
        assert_eq!(sanitize("  "), "unknown");
    }

    #[test]
    fn test_disabled_sharding_has_no_segments() {
        assert!(shard_segments("abc", &ShardConfig::default()).is_empty());
    }

    #[test]
    fn test_hash_segments_come_from_sha256() {
        // sha256("abc") = ba7816bf...
        let segments = shard_segments("abc", &sharded(ShardStrategy::Hash, 2, 2));
        assert_eq!(segments, vec!["ba", "78"]);
    }

    #[test]
    fn test_prefix_segments_are_padded() {
        let segments = shard_segments("Ab", &sharded(ShardStrategy::Prefix, 3, 2));
        assert_eq!(segments, vec!["ab", "00", "00"]);
    }

    #[test]
    fn test_prefix_uses_sanitized_id() {
        let segments = shard_segments("a/b/c", &sharded(ShardStrategy::Prefix, 1, 3));
        assert_eq!(segments, vec!["a_b"]);
    }

    #[test]
    fn test_id_from_file_name() {
        assert_eq!(id_from_file_name("motd.json"), Some("motd"));
        assert_eq!(id_from_file_name("motd.json.tmp"), None);
        assert_eq!(id_from_file_name(".json"), None);
    }

    #[test]
    fn test_strategy_parses_case_insensitively() {
        assert_eq!("HASH".parse::<ShardStrategy>(), Ok(ShardStrategy::Hash));
        assert_eq!(" prefix".parse::<ShardStrategy>(), Ok(ShardStrategy::Prefix));
        assert!("md5".parse::<ShardStrategy>().is_err());
    }
}
