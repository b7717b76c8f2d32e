pub mod loader;
pub mod schema;

pub use loader::{
    apply_env_overrides, config_from_env, default_config_path, load_config, load_config_from_str,
    validate_config,
};
pub use schema::{
    BackendsConfig, Config, HostedBackendConfig, OllamaConfig, PollConfig, RetryConfig,
};
