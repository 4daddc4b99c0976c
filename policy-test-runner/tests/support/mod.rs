use std::fs;
use std::path::{Path, PathBuf};

use policy_test_runner::RunnerConfig;
use tempfile::TempDir;

pub const CHART: &str = r#"apiVersion: v1
kind: ConfigMap
metadata:
  name: opa-policy-ingressgateway
  namespace: opa
data:
  policy.rego: |-
    package istio.authz

    jwks_keycloak := "{{ Values.jwtValidation.keycloak.jwksUri }}"
    jwks_spire := "{{ Values.jwtValidation.spire.jwksUri }}"
    keycloak_issuers := {{ Values.issuers | tojson }}
    xname_enabled := {% if Values.opa is defined %}{{ Values.opa.xnamePolicy.enabled | tojson }}{% else %}false{% endif %}
"#;

pub const TESTS: &str = r#"package istio.authz

admin_token := "{{ adminToken }}"
user_token := "{{ userToken }}"
wlm_compute := "{{ spire.compute.wlm }}"
heartbeat_ncn := "{{ spire.ncn.heartbeat }}"
"#;

pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new(chart: &str, tests: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("chart.yaml"), chart).expect("write chart");
        fs::write(dir.path().join("tests.rego.tpl"), tests).expect("write tests");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn engine_log(&self) -> PathBuf {
        self.path().join("engine.log")
    }

    /// Shell script standing in for the OPA binary; records its arguments.
    #[cfg(unix)]
    pub fn fake_engine(&self, exit_code: i32) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = self.path().join("fake-opa");
        let script = format!(
            "#!/bin/sh\necho \"$@\" >> {}\nexit {}\n",
            self.engine_log().display(),
            exit_code
        );
        fs::write(&path, script).expect("write engine");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod engine");
        path
    }

    pub fn config(&self, opa_bin: PathBuf, xname: bool, run_engine: bool) -> RunnerConfig {
        RunnerConfig {
            policy_template: self.path().join("chart.yaml"),
            test_template: self.path().join("tests.rego.tpl"),
            xname,
            opa_bin,
            output_dir: self.path().join("out"),
            run_engine,
        }
    }
}
