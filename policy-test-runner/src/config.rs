use anyhow::Result;
use std::env;
use std::path::PathBuf;
use structopt::StructOpt;

use crate::opa::DEFAULT_ENGINE_BINARY;

#[derive(StructOpt, Debug, Clone)]
#[structopt(name = "policy-test-runner")]
pub struct Cli {
    /// Helm ConfigMap template that embeds the policy under test
    #[structopt(parse(from_os_str))]
    pub policy_template: PathBuf,
    /// Test template rendered with the minted tokens
    #[structopt(parse(from_os_str))]
    pub test_template: PathBuf,
    /// Enable xname validation
    #[structopt(short = "x", long = "xname")]
    pub xname: bool,
    /// Policy engine executable (defaults to $OPA_BIN or ./opa_envoy_linux_amd64)
    #[structopt(long, parse(from_os_str))]
    pub opa_bin: Option<PathBuf>,
    /// Directory receiving policy.rego and test.rego
    #[structopt(long, parse(from_os_str))]
    pub output_dir: Option<PathBuf>,
    /// Render files only; do not invoke the policy engine
    #[structopt(long)]
    pub skip_engine: bool,
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub policy_template: PathBuf,
    pub test_template: PathBuf,
    pub xname: bool,
    pub opa_bin: PathBuf,
    pub output_dir: PathBuf,
    pub run_engine: bool,
}

impl RunnerConfig {
    pub fn policy_output(&self) -> PathBuf {
        self.output_dir.join("policy.rego")
    }

    pub fn test_output(&self) -> PathBuf {
        self.output_dir.join("test.rego")
    }
}

pub fn load_runner_config(cli: Cli) -> Result<RunnerConfig> {
    resolve_config(cli, |key| env::var(key).ok())
}

/// Merges CLI flags over environment overrides over defaults.
pub fn resolve_config<F>(cli: Cli, lookup: F) -> Result<RunnerConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let xname = cli.xname || bool_from(lookup("POLICY_TEST_XNAME")).unwrap_or(false);

    let opa_bin = cli
        .opa_bin
        .or_else(|| {
            lookup("OPA_BIN")
                .and_then(|value| normalize_optional(&value))
                .map(PathBuf::from)
        })
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENGINE_BINARY));

    let output_dir = cli
        .output_dir
        .or_else(|| {
            lookup("POLICY_TEST_OUTPUT_DIR")
                .and_then(|value| normalize_optional(&value))
                .map(PathBuf::from)
        })
        .unwrap_or_else(|| PathBuf::from("."));

    Ok(RunnerConfig {
        policy_template: cli.policy_template,
        test_template: cli.test_template,
        xname,
        opa_bin,
        output_dir,
        run_engine: !cli.skip_engine,
    })
}

fn bool_from(value: Option<String>) -> Option<bool> {
    value.map(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn normalize_optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["policy-test-runner"];
        argv.extend_from_slice(args);
        Cli::from_iter_safe(argv).expect("valid arguments")
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_flags_or_env() {
        let config = resolve_config(cli(&["chart.yaml", "tests.rego.tpl"]), env_of(&[])).unwrap();

        assert!(!config.xname);
        assert!(config.run_engine);
        assert_eq!(config.opa_bin, PathBuf::from(DEFAULT_ENGINE_BINARY));
        assert_eq!(config.policy_output(), PathBuf::from("./policy.rego"));
        assert_eq!(config.test_output(), PathBuf::from("./test.rego"));
    }

    #[test]
    fn env_overrides_defaults_and_cli_overrides_env() {
        let env = env_of(&[
            ("POLICY_TEST_XNAME", "yes"),
            ("OPA_BIN", "/usr/local/bin/opa"),
            ("POLICY_TEST_OUTPUT_DIR", " "),
        ]);
        let config = resolve_config(cli(&["a", "b"]), &env).unwrap();
        assert!(config.xname);
        assert_eq!(config.opa_bin, PathBuf::from("/usr/local/bin/opa"));
        assert_eq!(config.output_dir, PathBuf::from("."));

        let config = resolve_config(
            cli(&["a", "b", "--opa-bin", "./opa", "--output-dir", "out", "--skip-engine"]),
            &env,
        )
        .unwrap();
        assert_eq!(config.opa_bin, PathBuf::from("./opa"));
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert!(!config.run_engine);
    }

    #[test]
    fn short_xname_flag_is_accepted() {
        let config = resolve_config(cli(&["-x", "a", "b"]), env_of(&[])).unwrap();
        assert!(config.xname);
    }

    #[test]
    fn template_paths_are_taken_as_given() {
        let config = resolve_config(cli(&["same", "same"]), env_of(&[])).unwrap();
        assert_eq!(config.policy_template, PathBuf::from("same"));
        assert_eq!(config.test_template, PathBuf::from("same"));
    }

    #[test]
    fn bool_from_parses() {
        assert_eq!(bool_from(Some("true".into())), Some(true));
        assert_eq!(bool_from(Some("1".into())), Some(true));
        assert_eq!(bool_from(Some("no".into())), Some(false));
        assert_eq!(bool_from(None), None);
    }
}
