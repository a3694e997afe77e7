//! Configuration loading, validation and integrity hashing

pub mod parser;
pub mod types;
pub mod validation;

pub use parser::{compute_config_hash, load_config, load_config_with_hash};
pub use types::{
    AuthConfig, Config, CrawlerConfig, ForumConfig, ScheduleConfig, StorageConfig,
};
