use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{AuthError, AuthResult};

/// Declarative description of a test identity.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClaimsSpec {
    issuer: String,
    audience: String,
    #[serde(default, deserialize_with = "non_blank")]
    subject: Option<String>,
    #[serde(default, deserialize_with = "non_blank")]
    role: Option<String>,
    #[serde(default, alias = "typ", deserialize_with = "non_blank")]
    token_type: Option<String>,
}

/// Empty optional claims are omitted from the token, same as absent ones.
fn present(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn non_blank<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.and_then(present))
}

impl ClaimsSpec {
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            subject: None,
            role: None,
            token_type: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = present(subject.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = present(role.into());
        self
    }

    pub fn with_token_type(mut self, token_type: impl Into<String>) -> Self {
        self.token_type = present(token_type.into());
        self
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    pub fn token_type(&self) -> Option<&str> {
        self.token_type.as_deref()
    }

    /// Rejects specs whose required fields are blank.
    pub fn validate(&self) -> AuthResult<()> {
        if self.issuer.trim().is_empty() {
            return Err(AuthError::MissingClaim("iss"));
        }
        if self.audience.trim().is_empty() {
            return Err(AuthError::MissingClaim("aud"));
        }
        Ok(())
    }
}

/// Role grants for a single client under `resource_access`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub roles: Vec<String>,
}

/// Wire form of a minted token's payload. Optional claims are omitted, never null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSet {
    pub iss: String,
    pub aud: Vec<String>,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_access: Option<BTreeMap<String, RoleGrant>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
}

impl ClaimSet {
    /// Builds the payload for `spec`, expiring at `expires_at` (unix seconds).
    pub fn from_spec(spec: &ClaimsSpec, role_namespace: &str, expires_at: i64) -> Self {
        let resource_access = spec.role().map(|role| {
            BTreeMap::from([(
                role_namespace.to_string(),
                RoleGrant {
                    roles: vec![role.to_string()],
                },
            )])
        });

        Self {
            iss: spec.issuer().to_string(),
            aud: vec![spec.audience().to_string()],
            exp: expires_at,
            resource_access,
            sub: spec.subject().map(str::to_string),
            typ: spec.token_type().map(str::to_string),
        }
    }
}

/// Verified view over a decoded token.
#[derive(Debug, Clone, Serialize)]
pub struct Claims {
    pub issuer: String,
    pub audience: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub subject: Option<String>,
    pub token_type: Option<String>,
    pub roles: BTreeMap<String, Vec<String>>,
    pub raw: serde_json::Value,
}

impl Claims {
    /// Convenience helper for role checks within one client namespace.
    pub fn has_role(&self, namespace: &str, role: &str) -> bool {
        self.roles
            .get(namespace)
            .map(|roles| roles.iter().any(|value| value == role))
            .unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
struct ClaimsRepr {
    iss: String,
    #[serde(default)]
    aud: Option<AudienceRepr>,
    exp: i64,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    typ: Option<String>,
    #[serde(default)]
    resource_access: BTreeMap<String, RoleGrant>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AudienceRepr {
    Single(String),
    Many(Vec<String>),
}

impl TryFrom<ClaimsRepr> for Claims {
    type Error = AuthError;

    fn try_from(value: ClaimsRepr) -> AuthResult<Self> {
        let expires_at = Utc
            .timestamp_opt(value.exp, 0)
            .single()
            .ok_or_else(|| AuthError::InvalidClaim("exp", value.exp.to_string()))?;

        let audience = match value.aud {
            Some(AudienceRepr::Single(item)) => vec![item],
            Some(AudienceRepr::Many(items)) => items,
            None => Vec::new(),
        };

        let roles = value
            .resource_access
            .into_iter()
            .map(|(namespace, grant)| (namespace, grant.roles))
            .collect();

        Ok(Self {
            issuer: value.iss,
            audience,
            expires_at,
            subject: value.sub,
            token_type: value.typ,
            roles,
            raw: serde_json::Value::Null,
        })
    }
}

impl TryFrom<serde_json::Value> for Claims {
    type Error = AuthError;

    fn try_from(value: serde_json::Value) -> AuthResult<Self> {
        let repr: ClaimsRepr = serde_json::from_value(value.clone())
            .map_err(|err| AuthError::InvalidJson(err.to_string()))?;
        let mut claims = Claims::try_from(repr)?;
        claims.raw = value;
        Ok(claims)
    }
}
