//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, all errors at once)
//!     → FailoverConfig (validated, immutable)
//!     → FailoverTarget / TrustContext / HostMetricsRegistry
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → new Arc<FailoverConfig> sent to the owner, which rebuilds its
//!       target and keeps the shared registry
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Configuration errors are fatal and surface before any call

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BackoffConfig, EventsConfig, FailoverConfig, HealthConfig, LogFormat, ObservabilityConfig,
    SecurityConfig, ServiceConfig, TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};
