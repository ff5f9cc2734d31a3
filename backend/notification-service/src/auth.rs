/// JWT authentication for HTTP and WebSocket requests
///
/// Tokens are HS256 with claims `sub` (user id), `tenant_id` and `exp`.
/// Browsers cannot set headers on a WebSocket upgrade, so a `token` query
/// parameter is accepted as well as `Authorization: Bearer`.
use crate::error::AppError;
use actix_web::{web, FromRequest, HttpRequest};
use chrono::Utc;
use futures::future::{ready, Ready};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub sub: String,
    pub tenant_id: Uuid,
    pub exp: i64,
}

#[derive(Clone)]
pub struct JwtValidator {
    decoding_key: DecodingKey,
    encoding_key: EncodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn validate(&self, token: &str) -> Result<AuthenticatedUser, AppError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            debug!(error = %e, "Rejected token");
            AppError::Unauthorized
        })?;

        let user_id = Uuid::parse_str(&data.claims.sub).map_err(|_| AppError::Unauthorized)?;
        Ok(AuthenticatedUser {
            user_id,
            tenant_id: data.claims.tenant_id,
        })
    }

    /// Sign a token for `user_id`. Used by tooling and tests.
    pub fn issue(&self, user_id: Uuid, tenant_id: Uuid, ttl: chrono::Duration) -> Result<String, AppError> {
        let claims = Claims {
            sub: user_id.to_string(),
            tenant_id,
            exp: (Utc::now() + ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("failed to sign token: {}", e)))
    }
}

/// The caller, resolved from a valid token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn extract_token(req: &HttpRequest) -> Option<String> {
    let bearer = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string());

    bearer.or_else(|| {
        web::Query::<TokenQuery>::from_query(req.query_string())
            .ok()
            .and_then(|q| q.into_inner().token)
    })
}

impl FromRequest for AuthenticatedUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut actix_web::dev::Payload) -> Self::Future {
        let result = match req.app_data::<web::Data<JwtValidator>>() {
            None => Err(AppError::Internal("JWT validator not configured".to_string())),
            Some(validator) => match extract_token(req) {
                Some(token) => validator.validate(&token),
                None => Err(AppError::Unauthorized),
            },
        };
        ready(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_issue_then_validate() {
        let validator = JwtValidator::new("secret");
        let (user_id, tenant_id) = (Uuid::new_v4(), Uuid::new_v4());
        let token = validator
            .issue(user_id, tenant_id, chrono::Duration::minutes(5))
            .unwrap();

        let user = validator.validate(&token).unwrap();
        assert_eq!(user, AuthenticatedUser { user_id, tenant_id });
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let token = JwtValidator::new("a")
            .issue(Uuid::new_v4(), Uuid::new_v4(), chrono::Duration::minutes(5))
            .unwrap();
        assert!(matches!(
            JwtValidator::new("b").validate(&token),
            Err(AppError::Unauthorized)
        ));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let validator = JwtValidator::new("secret");
        let token = validator
            .issue(Uuid::new_v4(), Uuid::new_v4(), chrono::Duration::minutes(-10))
            .unwrap();
        assert!(validator.validate(&token).is_err());
    }

    #[test]
    fn test_token_from_header_or_query() {
        let req = TestRequest::default()
            .insert_header(("Authorization", "Bearer abc"))
            .to_http_request();
        assert_eq!(extract_token(&req).as_deref(), Some("abc"));

        let req = TestRequest::with_uri("/ws?token=xyz").to_http_request();
        assert_eq!(extract_token(&req).as_deref(), Some("xyz"));

        let req = TestRequest::default().to_http_request();
        assert_eq!(extract_token(&req), None);
    }
}
