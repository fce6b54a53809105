//! Configuration
//!
//! Environment-variable loaded settings for the SDK and its demo
//! binary.

mod settings;

pub use settings::{AuthToken, ConfigError, SdkConfig, StreamSettings, WaitSettings};
