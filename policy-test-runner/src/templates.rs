use minijinja::{Environment, UndefinedBehavior};
use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::fixtures::{KEYCLOAK_ISSUER, SPIRE_ISSUER, TRUST_DOMAIN};

/// Key of the block scalar holding the policy inside the chart's ConfigMap.
pub const POLICY_BLOCK_KEY: &str = "policy.rego: |-";

/// Deny-by-default rule that the deployed base policy supplies.
pub const DEFAULT_DENY_RULE: &str = r#"default allow = { "allowed": false, "headers": {"x-ext-auth-allow": "no"}, "body": "Unauthorized Request", "http_status": 403 }"#;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("chart template has no 'policy.rego: |-' block")]
    MissingPolicyBlock,
    #[error("'policy.rego' block is empty")]
    EmptyPolicyBlock,
    #[error("invalid template pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("failed to render template '{name}': {source}")]
    Render {
        name: String,
        #[source]
        source: minijinja::Error,
    },
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

fn is_directive(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("{{") || trimmed.starts_with("{%")
}

/// +1 for a directive opening a template block, -1 for one closing it.
fn directive_depth(line: &str) -> i32 {
    if !is_directive(line) {
        return 0;
    }
    let inner = line
        .trim_start()
        .trim_start_matches("{{")
        .trim_start_matches("{%")
        .trim_start_matches('-')
        .trim_start();
    let keyword: String = inner
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    match keyword.as_str() {
        "if" | "for" | "range" | "with" | "define" | "block" | "macro" => 1,
        "end" | "endif" | "endfor" | "endwith" | "endblock" | "endmacro" => -1,
        _ => 0,
    }
}

/// Pulls the policy source out of a Helm ConfigMap template.
///
/// The block runs until the next YAML line at or left of the key's indent.
/// Template directives (`{{ ... }}`, `{% ... %}`) stay in the block wherever
/// they sit; trailing ones that close a block opened outside the policy are
/// the chart's own and are dropped. The body is dedented, the base
/// deny-by-default rule is inserted ahead of the first blank line unless the
/// policy already declares one, and chart-level `options.issuers` references
/// are pointed at `Values.issuers`.
pub fn extract_policy(chart: &str) -> Result<String, TemplateError> {
    let lines: Vec<&str> = chart.lines().collect();
    let start = lines
        .iter()
        .position(|line| line.trim() == POLICY_BLOCK_KEY)
        .ok_or(TemplateError::MissingPolicyBlock)?;
    let key_indent = indent_of(lines[start]);

    let body = &lines[start + 1..];
    let block_indent = body
        .iter()
        .find(|line| !line.trim().is_empty() && !is_directive(line))
        .map(|line| indent_of(line))
        .filter(|indent| *indent > key_indent)
        .ok_or(TemplateError::EmptyPolicyBlock)?;

    let block: Vec<&str> = body
        .iter()
        .copied()
        .take_while(|line| {
            line.trim().is_empty() || is_directive(line) || indent_of(line) > key_indent
        })
        .collect();

    let mut depth: i32 = block.iter().map(|line| directive_depth(line)).sum();
    let mut end = block.len();
    while depth < 0 {
        match block[..end].iter().rposition(|line| !line.trim().is_empty()) {
            Some(last)
                if indent_of(block[last]) < block_indent && directive_depth(block[last]) < 0 =>
            {
                end = last;
                depth += 1;
            }
            _ => break,
        }
    }

    let mut policy: Vec<String> = block[..end]
        .iter()
        .map(|line| {
            if line.trim().is_empty() {
                String::new()
            } else {
                line[indent_of(line).min(block_indent)..]
                    .trim_end()
                    .to_string()
            }
        })
        .collect();

    while policy.last().is_some_and(|line| line.is_empty()) {
        policy.pop();
    }
    while policy.first().is_some_and(|line| line.is_empty()) {
        policy.remove(0);
    }

    let has_default = policy
        .iter()
        .any(|line| line.trim_start().starts_with("default allow"));
    if !has_default {
        match policy.iter().position(|line| line.is_empty()) {
            Some(blank) => policy.insert(blank, DEFAULT_DENY_RULE.to_string()),
            None => {
                policy.push(String::new());
                policy.push(DEFAULT_DENY_RULE.to_string());
            }
        }
    }

    let mut source = policy.join("\n").replace("options.issuers", "Values.issuers");
    source.push('\n');
    Ok(source)
}

const GO_ACTION: &str = r"\{\{(-?)\s*(.*?)\s*(-?)\}\}";
const GO_FIELD: &str = r"(^|[\s(|,!])\.([A-Za-z_])";
const GO_SCOPES: [&str; 4] = ["range ", "with ", "define ", "block "];

/// Rewrites Go-template actions into the renderer's syntax.
///
/// Leading-dot field references lose the dot (`.Values.x` becomes
/// `Values.x`) and `if` / `else if` / `else` / `end` become statement blocks.
/// Other scoped actions (`range`, `with`, `define`) and their `end` pass
/// through untouched and fail at render time.
pub fn translate_go_actions(source: &str) -> Result<String, TemplateError> {
    let action = Regex::new(GO_ACTION)?;
    let field = Regex::new(GO_FIELD)?;
    let mut scopes: Vec<bool> = Vec::new();

    let translated = action.replace_all(source, |caps: &Captures| {
        let (left, right) = (&caps[1], &caps[3]);
        let body = field.replace_all(&caps[2], "$1$2");
        let statement = |inner: &str| format!("{{%{left} {inner} {right}%}}");

        if let Some(cond) = body.strip_prefix("if ") {
            scopes.push(true);
            statement(&format!("if {cond}"))
        } else if let Some(cond) = body.strip_prefix("else if ") {
            statement(&format!("elif {cond}"))
        } else if body == "else" {
            statement("else")
        } else if body == "end" && scopes.pop() == Some(true) {
            statement("endif")
        } else {
            if GO_SCOPES.iter().any(|scope| body.starts_with(scope)) {
                scopes.push(false);
            }
            format!("{{{{{left} {body} {right}}}}}")
        }
    });
    Ok(translated.into_owned())
}

/// Chart values the policy template is rendered against.
pub fn policy_values(xname: bool, jwks_url: &str) -> Value {
    let jwt_validation = json!({
        "keycloak": { "jwksUri": jwks_url },
        "spire": {
            "jwksUri": jwks_url,
            "issuers": [SPIRE_ISSUER],
            "trustDomain": TRUST_DOMAIN
        }
    });

    let values = if xname {
        json!({
            "opa": {
                "xnamePolicy": {
                    "enabled": true,
                    "bos": true,
                    "cfs": true,
                    "dvs": true,
                    "heartbeat": true
                }
            },
            "requireHeartbeatToken": true,
            "issuers": [KEYCLOAK_ISSUER],
            "jwtValidation": jwt_validation
        })
    } else {
        json!({
            "issuers": [KEYCLOAK_ISSUER],
            "jwtValidation": jwt_validation
        })
    };

    json!({ "Values": values })
}

/// Strict renderer: referencing an undefined variable is an error. Go-template
/// sources are accepted through [`translate_go_actions`].
pub struct TemplateRenderer {
    env: Environment<'static>,
}

impl TemplateRenderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        env.add_filter("quote", |value: String| format!("\"{value}\""));
        Self { env }
    }

    pub fn render<S: Serialize>(
        &self,
        name: &str,
        source: &str,
        context: S,
    ) -> Result<String, TemplateError> {
        let source = translate_go_actions(source)?;
        self.env
            .render_named_str(name, &source, context)
            .map_err(|source| TemplateError::Render {
                name: name.to_string(),
                source,
            })
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHART: &str = r#"apiVersion: v1
kind: ConfigMap
metadata:
  name: opa-policy
data:
  policy.rego: |-
    package istio.authz

    import input.attributes.request.http as http_request

    allow { http_request.headers["x-issuer"] == "{{ options.issuers[0] }}" }
{{- end }}
"#;

    #[test]
    fn extracts_and_dedents_policy_block() {
        let policy = extract_policy(CHART).unwrap();
        let lines: Vec<&str> = policy.lines().collect();

        assert_eq!(lines[0], "package istio.authz");
        assert_eq!(lines[1], DEFAULT_DENY_RULE);
        assert_eq!(lines[2], "");
        assert_eq!(lines[3], "import input.attributes.request.http as http_request");
        assert!(policy.contains("{{ Values.issuers[0] }}"));
        assert!(!policy.contains("{{- end }}"));
        assert!(policy.ends_with("}\n"));
    }

    #[test]
    fn unindented_directives_stay_inside_the_block() {
        let chart = "data:\n  policy.rego: |-\n    package p\n\n    a := 1\n{{- if Values.opa }}\n    b := 2\n{{- endif }}\n    c := 3\n";
        let policy = extract_policy(chart).unwrap();
        assert_eq!(
            policy,
            format!(
                "package p\n{DEFAULT_DENY_RULE}\n\na := 1\n{{{{- if Values.opa }}}}\nb := 2\n{{{{- endif }}}}\nc := 3\n"
            )
        );
    }

    #[test]
    fn block_ends_at_next_yaml_key() {
        let chart = "data:\n  policy.rego: |-\n    package p\n  other.rego: |-\n    package q\n";
        let policy = extract_policy(chart).unwrap();
        assert_eq!(policy, format!("package p\n\n{DEFAULT_DENY_RULE}\n"));
    }

    #[test]
    fn existing_default_rule_is_kept_once() {
        let chart = "data:\n  policy.rego: |-\n    package p\n\n    default allow = false\n";
        let policy = extract_policy(chart).unwrap();
        assert_eq!(policy.matches("default allow").count(), 1);
        assert!(!policy.contains(DEFAULT_DENY_RULE));
    }

    #[test]
    fn policy_without_blank_line_gets_rule_appended() {
        let chart = "data:\n  policy.rego: |-\n    package p\n";
        let policy = extract_policy(chart).unwrap();
        assert_eq!(policy, format!("package p\n\n{DEFAULT_DENY_RULE}\n"));
    }

    #[test]
    fn missing_or_empty_block_is_an_error() {
        assert!(matches!(
            extract_policy("data:\n  other.rego: |-\n    package p\n"),
            Err(TemplateError::MissingPolicyBlock)
        ));
        assert!(matches!(
            extract_policy("data:\n  policy.rego: |-\nkind: ConfigMap\n"),
            Err(TemplateError::EmptyPolicyBlock)
        ));
    }

    #[test]
    fn xname_values_enable_xname_policy() {
        let values = policy_values(true, "http://127.0.0.1:9");
        assert_eq!(values["Values"]["opa"]["xnamePolicy"]["heartbeat"], true);
        assert_eq!(values["Values"]["requireHeartbeatToken"], true);
        assert_eq!(
            values["Values"]["jwtValidation"]["spire"]["jwksUri"],
            "http://127.0.0.1:9"
        );

        let values = policy_values(false, "http://127.0.0.1:9");
        assert!(values["Values"].get("opa").is_none());
        assert_eq!(values["Values"]["issuers"][0], KEYCLOAK_ISSUER);
    }

    #[test]
    fn renders_policy_with_chart_values() {
        let renderer = TemplateRenderer::new();
        let policy = extract_policy(CHART).unwrap();
        let rendered = renderer
            .render("policy", &policy, policy_values(false, "http://jwks"))
            .unwrap();
        assert!(rendered.contains(r#"== "http://keycloak1" }"#));
    }

    #[test]
    fn undefined_variables_fail_rendering() {
        let renderer = TemplateRenderer::new();
        let err = renderer
            .render("tests", "token := \"{{ missingToken }}\"", json!({}))
            .unwrap_err();
        match err {
            TemplateError::Render { name, .. } => assert_eq!(name, "tests"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn go_actions_are_translated() {
        let source = "a := \"{{ .Values.issuers | first }}\"\n{{- if .Values.opa }}\nx\n{{- else if .Values.b }}\ny\n{{- else }}\nz\n{{- end }}\n{{ Values.c }}";
        assert_eq!(
            translate_go_actions(source).unwrap(),
            "a := \"{{ Values.issuers | first }}\"\n{%- if Values.opa %}\nx\n{%- elif Values.b %}\ny\n{%- else %}\nz\n{%- endif %}\n{{ Values.c }}"
        );
    }

    #[test]
    fn go_style_chart_renders() {
        let chart = "data:\n  policy.rego: |-\n    package p\n\n    jwks := \"{{ .Values.jwtValidation.keycloak.jwksUri }}\"\n    iss := \"{{ .options.issuers | first }}\"\n{{- if .Values.opa }}\n    xname := true\n{{- end }}\n";
        let renderer = TemplateRenderer::new();
        let policy = extract_policy(chart).unwrap();

        let rendered = renderer
            .render("policy", &policy, policy_values(true, "http://jwks"))
            .unwrap();
        assert!(rendered.contains(r#"jwks := "http://jwks""#));
        assert!(rendered.contains(r#"iss := "http://keycloak1""#));
        assert!(rendered.contains("xname := true"));
    }

    #[test]
    fn unsupported_go_scopes_fail_rendering() {
        let renderer = TemplateRenderer::new();
        let err = renderer
            .render(
                "tests",
                "{{ range .Values.issuers }}x{{ end }}",
                policy_values(false, "http://jwks"),
            )
            .unwrap_err();
        assert!(matches!(err, TemplateError::Render { .. }));
    }

    #[test]
    fn quote_filter_wraps_strings() {
        let renderer = TemplateRenderer::new();
        let rendered = renderer
            .render("t", "x := {{ spire.ncn.orca | quote }}", json!({ "spire": { "ncn": { "orca": "abc" } } }))
            .unwrap();
        assert_eq!(rendered, "x := \"abc\"");
    }
}
