use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{encode, Algorithm, DecodingKey, EncodingKey, Header};
use rand_core::{CryptoRng, RngCore};
use tracing::debug;

use crate::claims::{ClaimSet, ClaimsSpec};
use crate::config::IssuerConfig;
use crate::error::{AuthError, AuthResult};
use crate::jwks::{JwkKey, JwksDocument};

/// Lifetime of every minted token, in seconds.
pub const TOKEN_VALIDITY: i64 = 15 * 60;

pub const SIGNING_KEY_LEN: usize = 32;

/// Run-scoped HS256 secret. Never persisted.
#[derive(Clone)]
pub struct SigningKey {
    bytes: [u8; SIGNING_KEY_LEN],
}

impl SigningKey {
    pub fn generate<R>(rng: &mut R) -> Self
    where
        R: RngCore + CryptoRng,
    {
        let mut bytes = [0u8; SIGNING_KEY_LEN];
        rng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(bytes: [u8; SIGNING_KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Unpadded base64url form, as published in the JWK `k` member.
    pub fn to_base64url(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.bytes)
    }

    pub fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_secret(&self.bytes)
    }

    pub fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_secret(&self.bytes)
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(..)")
    }
}

/// A compact signed token plus its validity window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Mints HS256 test tokens that all verify against one [`SigningKey`].
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    config: IssuerConfig,
    key: SigningKey,
}

impl TokenIssuer {
    pub fn new(config: IssuerConfig, key: SigningKey) -> Self {
        Self { config, key }
    }

    pub fn generate<R>(config: IssuerConfig, rng: &mut R) -> Self
    where
        R: RngCore + CryptoRng,
    {
        Self::new(config, SigningKey::generate(rng))
    }

    pub fn config(&self) -> &IssuerConfig {
        &self.config
    }

    pub fn key(&self) -> &SigningKey {
        &self.key
    }

    pub fn issue(&self, spec: &ClaimsSpec) -> AuthResult<IssuedToken> {
        self.issue_at(spec, Utc::now())
    }

    /// Mints a token as if issued at `now`; `exp` is `now + TOKEN_VALIDITY`.
    pub fn issue_at(&self, spec: &ClaimsSpec, now: DateTime<Utc>) -> AuthResult<IssuedToken> {
        spec.validate()?;

        let issued_secs = now.timestamp();
        let expires_secs = issued_secs + TOKEN_VALIDITY;
        let issued_at = Utc
            .timestamp_opt(issued_secs, 0)
            .single()
            .ok_or_else(|| AuthError::InvalidClaim("iat", issued_secs.to_string()))?;
        let expires_at = issued_at + Duration::seconds(TOKEN_VALIDITY);

        let claims = ClaimSet::from_spec(spec, &self.config.role_namespace, expires_secs);

        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(self.config.key_id.clone());

        let token = encode(&header, &claims, &self.key.encoding_key())
            .map_err(|err| AuthError::Signing(err.to_string()))?;

        debug!(
            iss = %claims.iss,
            role = spec.role().unwrap_or("-"),
            sub = spec.subject().unwrap_or("-"),
            exp = expires_secs,
            "issued test token"
        );

        Ok(IssuedToken {
            token,
            issued_at,
            expires_at,
        })
    }

    /// JWK describing the signing key.
    pub fn jwk(&self) -> JwkKey {
        JwkKey::symmetric(self.config.key_id.clone(), &self.key)
    }

    /// Key-discovery document containing only [`Self::jwk`].
    pub fn jwks(&self) -> JwksDocument {
        JwksDocument {
            keys: vec![self.jwk()],
        }
    }
}
