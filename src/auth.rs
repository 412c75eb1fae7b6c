//! Bearer auth (SPEC_FULL.md §4.7): API-key set lookup or a signed token
//! with an expiry claim. Grounded on the teacher's `client_auth.rs` Bearer
//! extraction/extension-injection pattern, with the signed-token variant
//! grounded on the `jsonwebtoken` usage in the noa_ark_os example.

use std::collections::HashSet;

use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::router::{service_from_api_key, Caller};

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub exp: usize,
    #[serde(default)]
    pub service: Option<String>,
}

pub struct Authenticator {
    enabled: bool,
    api_keys: HashSet<String>,
    jwt_secret: String,
    jwt_algorithm: jsonwebtoken::Algorithm,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing or invalid credentials")]
    Unauthenticated,
}

impl Authenticator {
    pub fn new(enabled: bool, api_keys: HashSet<String>, jwt_secret: String, jwt_algorithm: &str) -> Self {
        let algorithm = match jwt_algorithm {
            "HS384" => jsonwebtoken::Algorithm::HS384,
            "HS512" => jsonwebtoken::Algorithm::HS512,
            _ => jsonwebtoken::Algorithm::HS256,
        };
        Self { enabled, api_keys, jwt_secret, jwt_algorithm: algorithm }
    }

    /// Authenticate a raw `Authorization` header value (with or without the
    /// `Bearer ` prefix). When auth is disabled, every request is accepted
    /// with a synthetic identity.
    pub fn authenticate(&self, authorization: Option<&str>) -> Result<Caller, AuthError> {
        if !self.enabled {
            return Ok(Caller { id: "anonymous".into(), service: None });
        }

        let credential = authorization
            .map(strip_bearer)
            .filter(|s| !s.is_empty())
            .ok_or(AuthError::Unauthenticated)?;

        if self.api_keys.contains(credential) {
            let service = service_from_api_key(credential).map(str::to_string);
            return Ok(Caller { id: credential.to_string(), service });
        }

        self.verify_token(credential)
    }

    fn verify_token(&self, token: &str) -> Result<Caller, AuthError> {
        let validation = Validation::new(self.jwt_algorithm);
        let data = decode::<TokenClaims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|_| AuthError::Unauthenticated)?;
        Ok(Caller { id: data.claims.sub, service: data.claims.service })
    }
}

fn strip_bearer(header: &str) -> &str {
    header.strip_prefix("Bearer ").unwrap_or(header).trim()
}
