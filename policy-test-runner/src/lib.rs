pub mod config;
pub mod fixtures;
pub mod jwks_server;
pub mod opa;
pub mod runner;
pub mod templates;

pub use config::{load_runner_config, Cli, RunnerConfig};
pub use fixtures::{standard_fixtures, FixtureError, TokenFixture, TokenSet};
pub use jwks_server::JwksServer;
pub use opa::{EngineError, PolicyEngine};
pub use runner::{run, run_serving, run_with_issuer, RunReport};
pub use templates::{
    extract_policy, policy_values, translate_go_actions, TemplateError, TemplateRenderer,
};
