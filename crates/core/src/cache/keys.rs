//! Key and label builders for cached repositories.

/// Returns the coalescing key for writes to one record.
///
/// Pattern: `<repository>:<id>`
pub fn record_key(repository: &str, id: &str) -> String {
    format!("{}:{}", repository, id.trim())
}

/// Returns the description of a queued save.
///
/// Pattern: `save <repository>/<id>`
pub fn save_description(repository: &str, id: &str) -> String {
    format!("save {}/{}", repository, id.trim())
}

/// Returns the description of a queued delete.
///
/// Pattern: `delete <repository>/<id>`
pub fn delete_description(repository: &str, id: &str) -> String {
    format!("delete {}/{}", repository, id.trim())
}

/// Normalizes a repository name for policy lookups.
pub fn policy_name(repository: &str) -> String {
    repository.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_key_trims_id() {
        assert_eq!(record_key("meta", " motd "), "meta:motd");
    }

    #[test]
    fn test_descriptions() {
        assert_eq!(save_description("meta", "motd"), "save meta/motd");
        assert_eq!(delete_description("meta", "motd"), "delete meta/motd");
    }

    #[test]
    fn test_policy_name_is_lowercase() {
        assert_eq!(policy_name(" Players "), "players");
    }
}
