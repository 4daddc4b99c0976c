use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::DecodingKey;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};
use crate::issuer::SigningKey;

pub const KTY_OCT: &str = "oct";
pub const ALG_HS256: &str = "HS256";

/// Key-discovery document served to the policy under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwksDocument {
    pub keys: Vec<JwkKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkKey {
    pub kid: String,
    pub kty: String,
    pub k: String,
    pub alg: String,
}

impl JwkKey {
    pub fn symmetric(kid: impl Into<String>, key: &SigningKey) -> Self {
        Self {
            kid: kid.into(),
            kty: KTY_OCT.to_string(),
            k: key.to_base64url(),
            alg: ALG_HS256.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct JwksFetcher {
    client: Client,
    url: String,
}

impl JwksFetcher {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }

    pub async fn fetch(&self) -> AuthResult<Vec<(String, DecodingKey)>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|err| AuthError::JwksFetch(err.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::JwksFetch(format!(
                "HTTP {} from {}",
                response.status(),
                self.url
            )));
        }

        let body: JwksResponse = response
            .json()
            .await
            .map_err(|err| AuthError::JwksDecode(err.to_string()))?;

        let mut keys = Vec::new();
        for key in body.keys.into_iter() {
            let kid = key.kid.ok_or(AuthError::JwksMissingKid)?;
            let kty = key.kty.unwrap_or_else(|| KTY_OCT.to_string());
            if kty != KTY_OCT {
                return Err(AuthError::JwksUnsupportedKey { kid, kty });
            }

            if let Some(alg) = key.alg {
                if alg != ALG_HS256 {
                    return Err(AuthError::JwksUnsupportedAlg { kid, alg });
                }
            }

            let encoded = key
                .k
                .ok_or_else(|| AuthError::JwksMissingComponents(kid.clone()))?;
            let secret = URL_SAFE_NO_PAD
                .decode(encoded.trim_end_matches('='))
                .map_err(|err| AuthError::KeyParse(kid.clone(), err.to_string()))?;

            keys.push((kid, DecodingKey::from_secret(&secret)));
        }

        Ok(keys)
    }
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<JwkEntry>,
}

#[derive(Debug, Deserialize)]
struct JwkEntry {
    kid: Option<String>,
    kty: Option<String>,
    alg: Option<String>,
    k: Option<String>,
}
