//! Configuration types and loading
//!
//! Configuration is loaded from a JSON file at startup, optionally
//! overridden from `FLOWGATE_*` environment variables, validated once,
//! and then shared read-only by every worker thread.

mod loader;
mod types;

pub use loader::{create_default_config, load_config, load_config_str, load_config_with_env};
pub use types::{
    Config, ControlConfig, IfPairConfig, LimitsConfig, LogConfig, RadiusConfig, RadiusMode,
    TimersConfig, TransportBackend, TransportConfig,
};
