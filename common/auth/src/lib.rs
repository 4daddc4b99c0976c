pub mod claims;
pub mod config;
pub mod error;
pub mod issuer;
pub mod jwks;
pub mod roles;
pub mod verifier;

pub use claims::{Claims, ClaimsSpec};
pub use config::{IssuerConfig, JwtConfig};
pub use error::{AuthError, AuthResult};
pub use issuer::{IssuedToken, SigningKey, TokenIssuer, SIGNING_KEY_LEN, TOKEN_VALIDITY};
pub use jwks::{JwkKey, JwksDocument, JwksFetcher};
pub use roles::{ROLE_ADMIN, ROLE_SYSTEM_COMPUTE, ROLE_SYSTEM_PXE, ROLE_USER, ROLE_WLM};
pub use verifier::{InMemoryKeyStore, JwtVerifier, JwtVerifierBuilder};
