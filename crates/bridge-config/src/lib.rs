//! # bridge-config
//!
//! Runtime configuration for the bridge daemon: an optional YAML file
//! layered under environment variable overrides, validated once at
//! startup and then frozen for the lifetime of the process.
//!
//! ## Quick Start
//!
//! ```rust
//! use bridge_config::{parse_config_from_str, validate_config};
//!
//! let yaml = r#"
//! endpoint_path: /tmp/cpan_bridge.sock
//! max_concurrent_requests: 100
//! "#;
//!
//! let config = parse_config_from_str(yaml).expect("valid config");
//! validate_config(&config).expect("validation passes");
//! assert_eq!(config.max_concurrent_requests, 100);
//! ```

pub mod error;
pub mod parser;
pub mod types;
pub mod validator;

pub use error::{ConfigError, Result};
pub use parser::{load_config, parse_config, parse_config_from_str};
pub use types::*;
pub use validator::validate_config;
