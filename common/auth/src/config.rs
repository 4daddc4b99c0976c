/// Key id published for the run's signing key unless overridden.
pub const DEFAULT_KEY_ID: &str = "MoeoCPOcAKjkbMy7k-IhGMtjvqehZqRTqevioCtoaNM";

/// Client id under `resource_access` that carries role grants.
pub const DEFAULT_ROLE_NAMESPACE: &str = "shasta";

/// Settings for minting test tokens.
#[derive(Debug, Clone)]
pub struct IssuerConfig {
    /// Namespace used for `resource_access.<namespace>.roles`.
    pub role_namespace: String,
    /// `kid` placed in token headers and in the published JWK.
    pub key_id: String,
}

impl IssuerConfig {
    pub fn with_role_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.role_namespace = namespace.into();
        self
    }

    pub fn with_key_id(mut self, kid: impl Into<String>) -> Self {
        self.key_id = kid.into();
        self
    }
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            role_namespace: DEFAULT_ROLE_NAMESPACE.to_string(),
            key_id: DEFAULT_KEY_ID.to_string(),
        }
    }
}

/// Runtime configuration for JWT verification.
#[derive(Debug, Clone, Default)]
pub struct JwtConfig {
    /// Accepted issuer claims (iss). Empty accepts any issuer.
    pub issuers: Vec<String>,
    /// Expected audience claim (aud). `None` skips the audience check.
    pub audience: Option<String>,
    /// Allowable clock skew in seconds when validating exp/nbf.
    pub leeway_seconds: u32,
}

impl JwtConfig {
    /// Construct config pinned to one issuer and audience (30 second leeway).
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            issuers: vec![issuer.into()],
            audience: Some(audience.into()),
            leeway_seconds: 30,
        }
    }

    /// Config that only checks signature and expiry.
    pub fn any_issuer() -> Self {
        Self {
            leeway_seconds: 30,
            ..Self::default()
        }
    }
}
