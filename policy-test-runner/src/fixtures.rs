//! Declarative table of the test identities the policy suite refers to.
//!
//! Each row names a token by a dotted template path (`spire.ncn.heartbeat`)
//! and describes its claims. The whole table is minted by one
//! [`TokenIssuer`] so every token verifies against the same served key.

use std::collections::{BTreeMap, HashSet};

use common_auth::{
    AuthError, ClaimsSpec, IssuedToken, TokenIssuer, ROLE_ADMIN, ROLE_SYSTEM_COMPUTE,
    ROLE_SYSTEM_PXE, ROLE_USER, ROLE_WLM,
};
use serde_json::{Map, Value};
use thiserror::Error;

pub const KEYCLOAK_ISSUER: &str = "http://keycloak1";
pub const SPIRE_ISSUER: &str = "http://spire.local/shasta/vshastaio";
pub const SHASTA_AUDIENCE: &str = "shasta";
pub const SYSTEM_COMPUTE_AUDIENCE: &str = "system-compute";
pub const TRUST_DOMAIN: &str = "shasta";
pub const SPIRE_INVALID_SUBJECT: &str = "spiffe://shasta/invalid";

pub const NCN_WORKLOADS: &[&str] = &[
    "cfs-state-reporter",
    "ckdump",
    "ckdump_helper",
    "cpsmount",
    "cpsmount_helper",
    "dvs-hmi",
    "dvs-map",
    "heartbeat",
    "orca",
    "tpm-provisioner",
];

pub const COMPUTE_WORKLOADS: &[&str] = &[
    "cfs-state-reporter",
    "ckdump",
    "ckdump_helper",
    "cpsmount",
    "cpsmount_helper",
    "dvs-hmi",
    "dvs-map",
    "heartbeat",
    "orca",
    "wlm",
    "tpm-provisioner",
];

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("token name '{0}' appears more than once")]
    DuplicateName(String),
    #[error("token name '{0}' has an empty path segment")]
    EmptySegment(String),
    #[error("token name '{0}' collides with another entry's path")]
    PathConflict(String),
    #[error("failed to issue token '{name}': {source}")]
    Issue {
        name: String,
        #[source]
        source: AuthError,
    },
}

/// SPIFFE id prefixes for workloads, which gain an xname segment when
/// xname validation is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpirePrefixes {
    pub ncn: &'static str,
    pub compute: &'static str,
}

impl SpirePrefixes {
    pub fn for_xname(enabled: bool) -> Self {
        if enabled {
            Self {
                ncn: "spiffe://shasta/ncn/ncnw001/workload/",
                compute: "spiffe://shasta/compute/x1/workload/",
            }
        } else {
            Self {
                ncn: "spiffe://shasta/ncn/workload/",
                compute: "spiffe://shasta/compute/workload/",
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct TokenFixture {
    pub name: String,
    pub spec: ClaimsSpec,
}

impl TokenFixture {
    pub fn new(name: impl Into<String>, spec: ClaimsSpec) -> Self {
        Self {
            name: name.into(),
            spec,
        }
    }
}

fn keycloak(role: &str) -> ClaimsSpec {
    ClaimsSpec::new(KEYCLOAK_ISSUER, SHASTA_AUDIENCE)
        .with_role(role)
        .with_token_type("Bearer")
}

fn spire(subject: impl Into<String>) -> ClaimsSpec {
    ClaimsSpec::new(SPIRE_ISSUER, SYSTEM_COMPUTE_AUDIENCE).with_subject(subject)
}

fn template_key(workload: &str) -> String {
    workload.replace('-', "_")
}

/// The identities referenced by the policy test template.
pub fn standard_fixtures(xname: bool) -> Vec<TokenFixture> {
    let prefixes = SpirePrefixes::for_xname(xname);

    let mut fixtures = vec![
        TokenFixture::new("adminToken", keycloak(ROLE_ADMIN)),
        TokenFixture::new("userToken", keycloak(ROLE_USER)),
        TokenFixture::new(
            "invalidTypAdminToken",
            ClaimsSpec::new(KEYCLOAK_ISSUER, SHASTA_AUDIENCE)
                .with_role(ROLE_ADMIN)
                .with_token_type("Invalid"),
        ),
        TokenFixture::new("pxeToken", keycloak(ROLE_SYSTEM_PXE)),
        TokenFixture::new("computeToken", keycloak(ROLE_SYSTEM_COMPUTE)),
        TokenFixture::new("wlmToken", keycloak(ROLE_WLM)),
        TokenFixture::new("spire.invalidSub", spire(SPIRE_INVALID_SUBJECT)),
    ];

    fixtures.extend(NCN_WORKLOADS.iter().map(|workload| {
        TokenFixture::new(
            format!("spire.ncn.{}", template_key(workload)),
            spire(format!("{}{}", prefixes.ncn, workload)),
        )
    }));
    fixtures.extend(COMPUTE_WORKLOADS.iter().map(|workload| {
        TokenFixture::new(
            format!("spire.compute.{}", template_key(workload)),
            spire(format!("{}{}", prefixes.compute, workload)),
        )
    }));

    fixtures
}

/// Tokens minted from a fixture table, keyed by fixture name.
#[derive(Debug, Clone)]
pub struct TokenSet {
    tokens: BTreeMap<String, IssuedToken>,
    values: Value,
}

impl TokenSet {
    /// Mints every fixture, stopping at the first failure.
    pub fn issue_all(issuer: &TokenIssuer, fixtures: &[TokenFixture]) -> Result<Self, FixtureError> {
        let mut seen = HashSet::new();
        let mut tokens = BTreeMap::new();
        let mut values = Map::new();

        for fixture in fixtures {
            let name = fixture.name.as_str();
            if !seen.insert(name) {
                return Err(FixtureError::DuplicateName(name.to_string()));
            }

            let issued = issuer
                .issue(&fixture.spec)
                .map_err(|source| FixtureError::Issue {
                    name: name.to_string(),
                    source,
                })?;

            insert_path(&mut values, name, Value::String(issued.token.clone()))?;
            tokens.insert(name.to_string(), issued);
        }

        Ok(Self {
            tokens,
            values: Value::Object(values),
        })
    }

    pub fn get(&self, name: &str) -> Option<&IssuedToken> {
        self.tokens.get(name)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &IssuedToken)> {
        self.tokens.iter().map(|(name, token)| (name.as_str(), token))
    }

    /// Tokens nested by their dotted names, as consumed by the test template.
    pub fn template_values(&self) -> &Value {
        &self.values
    }
}

fn insert_path(root: &mut Map<String, Value>, name: &str, leaf: Value) -> Result<(), FixtureError> {
    let segments: Vec<&str> = name.split('.').collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(FixtureError::EmptySegment(name.to_string()));
    }

    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| FixtureError::EmptySegment(name.to_string()))?;

    let mut node = root;
    for segment in parents {
        let entry = node
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        node = match entry {
            Value::Object(map) => map,
            _ => return Err(FixtureError::PathConflict(name.to_string())),
        };
    }

    if node.contains_key(*last) {
        return Err(FixtureError::PathConflict(name.to_string()));
    }
    node.insert(last.to_string(), leaf);
    Ok(())
}
