mod keys;
mod policy;

pub use keys::{delete_description, policy_name, record_key, save_description};
pub use policy::{CacheConfig, CachePolicy, WarmupConfig};
