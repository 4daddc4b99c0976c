use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use common_auth::{IssuerConfig, JwksDocument, JwtConfig, JwtVerifier, TokenIssuer};
use rand_core::OsRng;
use tokio::fs;
use tracing::{debug, info};

use crate::config::RunnerConfig;
use crate::fixtures::{standard_fixtures, TokenSet};
use crate::jwks_server::JwksServer;
use crate::opa::PolicyEngine;
use crate::templates::{extract_policy, policy_values, TemplateRenderer};

#[derive(Debug, Clone)]
pub struct RunReport {
    pub tokens_issued: usize,
    pub jwks_fetches: usize,
    pub policy_path: PathBuf,
    pub test_path: PathBuf,
    pub engine_ran: bool,
}

/// Runs the whole fixture pipeline with a freshly generated signing key.
pub async fn run(config: &RunnerConfig) -> Result<RunReport> {
    let issuer = TokenIssuer::generate(IssuerConfig::default(), &mut OsRng);
    run_with_issuer(config, &issuer).await
}

pub async fn run_with_issuer(config: &RunnerConfig, issuer: &TokenIssuer) -> Result<RunReport> {
    run_serving(config, issuer, issuer.jwks()).await
}

/// Runs the pipeline with `served` as the mock endpoint's key set. Tokens that
/// do not verify against it abort the run before anything is rendered.
pub async fn run_serving(
    config: &RunnerConfig,
    issuer: &TokenIssuer,
    served: JwksDocument,
) -> Result<RunReport> {
    let server = JwksServer::start(served)
        .await
        .context("Failed to start mock JWKS endpoint")?;
    info!(url = %server.url(), "Mock JWKS endpoint listening");

    let fixtures = standard_fixtures(config.xname);
    let tokens = TokenSet::issue_all(issuer, &fixtures)?;
    for (name, issued) in tokens.iter() {
        debug!(name, token = %issued.token, expires_at = %issued.expires_at, "Minted token");
    }
    info!(count = tokens.len(), xname = config.xname, "Issued test tokens");

    verify_against_endpoint(&server, &tokens).await?;

    let chart = fs::read_to_string(&config.policy_template)
        .await
        .with_context(|| {
            format!(
                "Failed to read policy template {}",
                config.policy_template.display()
            )
        })?;
    let test_source = fs::read_to_string(&config.test_template)
        .await
        .with_context(|| {
            format!(
                "Failed to read test template {}",
                config.test_template.display()
            )
        })?;

    let renderer = TemplateRenderer::new();

    let policy_source = extract_policy(&chart)?;
    let policy = renderer.render(
        "policy",
        &policy_source,
        policy_values(config.xname, &server.url()),
    )?;
    let tests = renderer.render("tests", &test_source, tokens.template_values())?;

    fs::create_dir_all(&config.output_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create output directory {}",
                config.output_dir.display()
            )
        })?;

    let policy_path = config.policy_output();
    write_rendered(&policy_path, &policy).await?;
    let test_path = config.test_output();
    write_rendered(&test_path, &tests).await?;

    if config.run_engine {
        let engine = PolicyEngine::new(&config.opa_bin);
        engine.check(&policy_path).await?;
        engine.test(&policy_path, &test_path).await?;
    } else {
        info!("Skipping policy engine invocation");
    }

    let jwks_fetches = server.fetch_count();
    server.shutdown().await;

    Ok(RunReport {
        tokens_issued: tokens.len(),
        jwks_fetches,
        policy_path,
        test_path,
        engine_ran: config.run_engine,
    })
}

/// Fetches the served key set and checks every minted token against it.
async fn verify_against_endpoint(server: &JwksServer, tokens: &TokenSet) -> Result<()> {
    let verifier = JwtVerifier::builder(JwtConfig::any_issuer())
        .with_jwks_url(server.url())
        .build()
        .await
        .context("Failed to load keys from mock JWKS endpoint")?;

    for (name, issued) in tokens.iter() {
        verifier
            .verify(&issued.token)
            .with_context(|| format!("Token '{name}' does not verify against the served JWKS"))?;
    }
    info!(keys = verifier.store().len(), "Served JWKS verifies every token");
    Ok(())
}

async fn write_rendered(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), bytes = contents.len(), "Rendered template");
    debug!(path = %path.display(), "\n{contents}");
    Ok(())
}
