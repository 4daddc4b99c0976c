use policy_test_runner::{load_runner_config, runner, Cli};
use structopt::StructOpt;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_runner_config(Cli::from_args())?;
    info!(
        policy_template = %config.policy_template.display(),
        test_template = %config.test_template.display(),
        xname = config.xname,
        "Starting policy test run"
    );

    match runner::run(&config).await {
        Ok(report) => {
            info!(
                tokens = report.tokens_issued,
                jwks_fetches = report.jwks_fetches,
                policy = %report.policy_path.display(),
                tests = %report.test_path.display(),
                engine_ran = report.engine_ran,
                "Policy test run complete"
            );
            Ok(())
        }
        Err(err) => {
            error!(error = ?err, "Policy test run failed");
            Err(err)
        }
    }
}
