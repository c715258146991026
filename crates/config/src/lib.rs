//! Configuration loading for the coordination hub.
//!
//! Config files are discovered as `medlink.{toml,yaml,yml,json}`, `${VAR}`
//! placeholders are substituted before parsing, and `PORT` overrides the
//! listener port.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        apply_env_overrides, config_dir, discover_and_load, find_or_default_config_path,
        load_config, render_toml, write_config,
    },
    schema::{LedgerConfig, MedlinkConfig, PresenceConfig, ServerConfig},
};
