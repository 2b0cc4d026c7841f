//! Configuration for the coldwire gateway: schema types plus discovery
//! and loading of `coldwire.{toml,yaml,yml,json}` files with `${ENV_VAR}`
//! substitution.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{discover_and_load, load_config},
    schema::{Config, ExecConfig, GatewayConfig},
};
