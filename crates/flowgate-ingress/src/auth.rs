//! Bearer-token auth gate
//!
//! Token validation sits behind [`TokenValidator`]; the gate only extracts the
//! token, consults the skip list and records the caller identity on the
//! request context. [`JwtValidator`] checks HS256 access tokens.

use crate::app::GatewayState;
use crate::types::IngressError;
use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use flowgate_core::{CallerIdentity, Error, RequestContext};
use flowgate_routing::RouteMatch;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid token: {0}")]
    Invalid(String),

    #[error("token expired")]
    Expired,
}

#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<CallerIdentity, AuthError>;
}

/// Claims carried by access tokens
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(rename = "type")]
    pub token_type: String,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// HS256 access-token validator
pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(secret: &str, issuer: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(issuer) = issuer {
            validation.set_issuer(&[issuer]);
        }
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl TokenValidator for JwtValidator {
    async fn validate(&self, token: &str) -> Result<CallerIdentity, AuthError> {
        let data = decode::<AccessClaims>(token, &self.decoding_key, &self.validation).map_err(
            |e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e.to_string()),
            },
        )?;
        let claims = data.claims;

        if claims.token_type != "access" {
            return Err(AuthError::Invalid("not an access token".to_string()));
        }
        if claims.user_id.is_empty() {
            return Err(AuthError::Invalid("missing user_id".to_string()));
        }

        let mut identity = CallerIdentity::new(claims.user_id);
        identity.email = claims.email.filter(|e| !e.is_empty());
        Ok(identity)
    }
}

fn default_true() -> bool {
    true
}

fn default_issuer() -> Option<String> {
    Some("flowtime-auth".to_string())
}

fn default_skip_paths() -> Vec<String> {
    [
        "/health",
        "/metrics",
        "/api/v1/auth/signin",
        "/api/v1/auth/signup",
        "/api/v1/auth/refresh",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HS256 signing secret shared with the token issuer
    #[serde(default)]
    pub jwt_secret: String,

    /// Expected `iss` claim; not checked when unset
    #[serde(default = "default_issuer")]
    pub issuer: Option<String>,

    /// Exact paths, or prefixes when ending in `/*`
    #[serde(default = "default_skip_paths")]
    pub skip_paths: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jwt_secret: String::new(),
            issuer: default_issuer(),
            skip_paths: default_skip_paths(),
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("enabled", &self.enabled)
            .field("jwt_secret", &"[REDACTED]")
            .field("issuer", &self.issuer)
            .field("skip_paths", &self.skip_paths)
            .finish()
    }
}

impl AuthConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.enabled && self.jwt_secret.trim().is_empty() {
            return Err(
                "auth.jwt_secret must be set when auth is enabled (or set FLOWGATE_JWT_SECRET)"
                    .to_string(),
            );
        }
        Ok(())
    }
}

/// Skip list plus an optional validator; no validator means auth is off
#[derive(Clone)]
pub struct AuthGate {
    validator: Option<Arc<dyn TokenValidator>>,
    skip_paths: Vec<String>,
}

impl AuthGate {
    pub fn new(validator: Arc<dyn TokenValidator>, skip_paths: Vec<String>) -> Self {
        Self {
            validator: Some(validator),
            skip_paths,
        }
    }

    pub fn disabled() -> Self {
        Self {
            validator: None,
            skip_paths: Vec::new(),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        let validator = JwtValidator::new(&config.jwt_secret, config.issuer.as_deref());
        Self::new(Arc::new(validator), config.skip_paths.clone())
    }

    pub fn is_enabled(&self) -> bool {
        self.validator.is_some()
    }

    pub fn should_skip(&self, path: &str) -> bool {
        self.skip_paths.iter().any(|skip| match skip.strip_suffix("/*") {
            Some(prefix) => path.starts_with(prefix),
            None => skip == path,
        })
    }

    /// Extract and validate the bearer token
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<CallerIdentity, Error> {
        let Some(validator) = &self.validator else {
            return Err(Error::Internal("auth gate is disabled".to_string()));
        };

        let header = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::Unauthorized("Authorization header required".to_string()))?;

        let token = header
            .strip_prefix("Bearer ")
            .filter(|t| !t.is_empty() && !t.contains(' '))
            .ok_or_else(|| Error::Unauthorized("Invalid authorization header format".to_string()))?;

        validator.validate(token).await.map_err(|e| {
            tracing::debug!(error = %e, "Token validation failed");
            Error::Unauthorized("Invalid or expired token".to_string())
        })
    }
}

/// Reject API requests without a valid bearer token
///
/// Skip-listed paths and services configured with `auth_required: false`
/// pass through without touching the validator.
pub async fn auth_middleware(
    State(state): State<GatewayState>,
    mut req: Request,
    next: Next,
) -> Response {
    let gate = &state.auth;
    let path = req.uri().path();

    if !gate.is_enabled() || gate.should_skip(path) {
        return next.run(req).await;
    }
    if let Some(matched) = req.extensions().get::<RouteMatch>()
        && !matched.service.auth_required
    {
        return next.run(req).await;
    }

    let identity = match gate.authenticate(req.headers()).await {
        Ok(identity) => identity,
        Err(e) => {
            tracing::debug!(path = %path, error = %e, "Rejected unauthenticated request");
            return IngressError::from(e).into_response();
        }
    };

    match req.extensions_mut().get_mut::<RequestContext>() {
        Some(ctx) => ctx.set_identity(&identity),
        None => {
            let ctx = RequestContext::generate().with_identity(&identity);
            req.extensions_mut().insert(ctx);
        }
    }

    let mut response = next.run(req).await;
    response.extensions_mut().insert(identity);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::{EncodingKey, Header, encode};

    const SECRET: &str = "test-secret";

    fn token(claims: &AccessClaims, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims(token_type: &str, exp_offset_secs: i64) -> AccessClaims {
        AccessClaims {
            user_id: "u-42".to_string(),
            email: Some("u42@example.com".to_string()),
            token_type: token_type.to_string(),
            exp: chrono::Utc::now().timestamp() + exp_offset_secs,
            iss: Some("flowtime-auth".to_string()),
        }
    }

    fn gate() -> AuthGate {
        AuthGate::new(
            Arc::new(JwtValidator::new(SECRET, Some("flowtime-auth"))),
            default_skip_paths(),
        )
    }

    fn bearer(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[tokio::test]
    async fn test_valid_access_token() {
        let validator = JwtValidator::new(SECRET, Some("flowtime-auth"));
        let identity = validator
            .validate(&token(&claims("access", 3600), SECRET))
            .await
            .unwrap();
        assert_eq!(identity.subject_id, "u-42");
        assert_eq!(identity.email.as_deref(), Some("u42@example.com"));
    }

    #[tokio::test]
    async fn test_expired_token() {
        let validator = JwtValidator::new(SECRET, None);
        let err = validator
            .validate(&token(&claims("access", -3600), SECRET))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::Expired);
    }

    #[tokio::test]
    async fn test_refresh_token_rejected() {
        let validator = JwtValidator::new(SECRET, None);
        let err = validator
            .validate(&token(&claims("refresh", 3600), SECRET))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_wrong_secret_and_issuer() {
        let validator = JwtValidator::new(SECRET, Some("flowtime-auth"));
        assert!(
            validator
                .validate(&token(&claims("access", 3600), "other-secret"))
                .await
                .is_err()
        );

        let mut foreign = claims("access", 3600);
        foreign.iss = Some("someone-else".to_string());
        assert!(validator.validate(&token(&foreign, SECRET)).await.is_err());
    }

    #[test]
    fn test_skip_list() {
        let gate = AuthGate::new(
            Arc::new(JwtValidator::new(SECRET, None)),
            vec!["/health".to_string(), "/api/v1/public/*".to_string()],
        );
        assert!(gate.should_skip("/health"));
        assert!(!gate.should_skip("/health/deep"));
        assert!(gate.should_skip("/api/v1/public"));
        assert!(gate.should_skip("/api/v1/public/docs"));
        assert!(!gate.should_skip("/api/v1/tasks"));
    }

    #[tokio::test]
    async fn test_authenticate_messages() {
        let gate = gate();

        let missing = gate.authenticate(&HeaderMap::new()).await.unwrap_err();
        assert_eq!(missing.to_string(), "Unauthorized: Authorization header required");

        let basic = gate.authenticate(&bearer("Basic dXNlcjpwYXNz")).await.unwrap_err();
        assert_eq!(
            basic.to_string(),
            "Unauthorized: Invalid authorization header format"
        );

        let garbage = gate.authenticate(&bearer("Bearer not-a-jwt")).await.unwrap_err();
        assert_eq!(garbage.to_string(), "Unauthorized: Invalid or expired token");

        let good = token(&claims("access", 3600), SECRET);
        let identity = gate
            .authenticate(&bearer(&format!("Bearer {}", good)))
            .await
            .unwrap();
        assert_eq!(identity.subject_id, "u-42");
    }

    #[test]
    fn test_config_requires_secret_when_enabled() {
        assert!(AuthConfig::default().validate().is_err());

        let config = AuthConfig {
            jwt_secret: "s3cret".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert!(!format!("{:?}", config).contains("s3cret"));

        let disabled = AuthConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(disabled.validate().is_ok());
        assert!(!AuthGate::from_config(&disabled).is_enabled());
    }
}
