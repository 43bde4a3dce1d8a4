use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::fs;

use crate::config::AuthConfig;
use crate::models::User;
use crate::services::Identity;
use crate::AppState;

/// Claims issued by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Subject (provider user id)
    pub sub: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    #[serde(default)]
    pub iss: Option<String>,
}

/// Verifies bearer tokens from the identity provider.
#[derive(Clone)]
pub struct IdentityVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl IdentityVerifier {
    /// RS256 when a public key path is configured, HS256 with the shared secret otherwise.
    pub fn new(config: &AuthConfig) -> Result<Self, AppError> {
        let (decoding_key, algorithm) = match (&config.jwt_public_key_path, &config.jwt_secret) {
            (Some(path), _) => {
                let pem = fs::read_to_string(path).map_err(|e| {
                    AppError::ConfigError(anyhow::anyhow!(
                        "Failed to read public key from {}: {}",
                        path,
                        e
                    ))
                })?;
                let key = DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| {
                    AppError::ConfigError(anyhow::anyhow!("Failed to parse public key: {}", e))
                })?;
                (key, Algorithm::RS256)
            }
            (None, Some(secret)) => (
                DecodingKey::from_secret(secret.expose_secret().as_bytes()),
                Algorithm::HS256,
            ),
            (None, None) => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "AUTH_JWT_PUBLIC_KEY_PATH or AUTH_JWT_SECRET must be set"
                )))
            }
        };

        let mut validation = Validation::new(algorithm);
        if let Some(issuer) = &config.jwt_issuer {
            validation.set_issuer(&[issuer]);
        }

        tracing::info!(algorithm = ?algorithm, "Identity verifier initialized");
        Ok(Self {
            decoding_key,
            validation,
        })
    }

    pub fn verify(&self, token: &str) -> Result<IdentityClaims, AppError> {
        let data = decode::<IdentityClaims>(token, &self.decoding_key, &self.validation)?;
        Ok(data.claims)
    }
}

impl From<IdentityClaims> for Identity {
    fn from(claims: IdentityClaims) -> Self {
        Identity {
            subject: claims.sub,
            email: claims.email,
            name: claims.name,
        }
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Signed-in user, registered on first sight.
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Missing or invalid Authorization header"))
        })?;

        let claims = state.verifier.verify(token).map_err(|e| {
            tracing::debug!(error = %e, "Rejected bearer token");
            e
        })?;

        let user = state.accounts.resolve(&claims.into()).await?;
        Ok(CurrentUser(user))
    }
}

/// Signed-in user holding the admin role.
pub struct AdminUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if !user.role.is_admin() {
            tracing::warn!(user_id = %user.id, "Admin route refused");
            return Err(AppError::Forbidden(anyhow::anyhow!("Admin role required")));
        }
        Ok(AdminUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use secrecy::Secret;

    fn config(issuer: Option<&str>) -> AuthConfig {
        AuthConfig {
            jwt_secret: Some(Secret::new("unit-secret".to_string())),
            jwt_public_key_path: None,
            jwt_issuer: issuer.map(str::to_string),
            admin_emails: String::new(),
        }
    }

    fn token(secret: &str, iss: Option<&str>) -> String {
        let claims = IdentityClaims {
            sub: "user_1".into(),
            email: "client@acme.test".into(),
            name: Some("Client".into()),
            exp: Utc::now().timestamp() + 600,
            iss: iss.map(str::to_string),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn accepts_token_signed_with_shared_secret() {
        let verifier = IdentityVerifier::new(&config(None)).unwrap();
        let claims = verifier.verify(&token("unit-secret", None)).unwrap();
        assert_eq!(claims.sub, "user_1");
        assert_eq!(claims.email, "client@acme.test");
    }

    #[test]
    fn rejects_wrong_secret_and_wrong_issuer() {
        let verifier = IdentityVerifier::new(&config(Some("https://id.payflux.com"))).unwrap();
        assert!(verifier.verify(&token("other-secret", Some("https://id.payflux.com"))).is_err());
        assert!(verifier.verify(&token("unit-secret", Some("https://evil.test"))).is_err());
        assert!(verifier.verify(&token("unit-secret", Some("https://id.payflux.com"))).is_ok());
    }

    #[test]
    fn requires_a_key() {
        let mut cfg = config(None);
        cfg.jwt_secret = None;
        assert!(IdentityVerifier::new(&cfg).is_err());
    }
}
