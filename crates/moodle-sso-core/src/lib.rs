#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;
pub mod logger;
pub mod urls;

// Re-exports for convenience
pub use config::{FieldMapping, ProviderConfig, SiteConfig, SiteRegistry, SiteUrls};
pub use error::{Result, SsoError};
pub use logger::{LogHandler, LogLevel, LoggerConfig, SsoLogger};
