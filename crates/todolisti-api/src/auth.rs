use std::sync::Arc;

use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use todolisti_core::models::UserId;

use crate::config::AppConfig;
use crate::error::AppError;

/// Identity carried by a verified access token
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub email: String,
    pub name: Option<String>,
}

/// Verifies HS256 access tokens signed with the shared secret.
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    config: Arc<AppConfig>,
}

impl JwtVerifier {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self {
            key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            config,
        }
    }

    pub fn verify_access_token(&self, token: &str) -> Result<AuthenticatedUser, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // temporal claims and audience are checked below with the configured skew
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        if let Some(issuer) = &self.config.jwt_issuer {
            validation.set_issuer(&[issuer.as_str()]);
            validation.required_spec_claims.insert("iss".to_string());
        }

        let decoded = decode::<AccessClaims>(token, &self.key, &validation).map_err(|error| {
            AppError::unauthorized(format!("Token validation failed: {}", sanitize(&error)))
        })?;
        let claims = decoded.claims;

        if let Some(expected) = &self.config.jwt_audience {
            if !audience_matches(claims.aud.as_ref(), expected) {
                return Err(AppError::unauthorized("Token audience is not allowed"));
            }
        }
        validate_temporal_claims(&claims, self.config.auth_clock_skew)?;

        let user_id = claims
            .sub
            .parse::<UserId>()
            .map_err(|_| AppError::unauthorized("Token subject is not a valid user id"))?;
        let email = claims
            .email
            .map(|email| email.trim().to_string())
            .filter(|email| !email.is_empty())
            .ok_or_else(|| AppError::unauthorized("Token missing `email` claim"))?;

        Ok(AuthenticatedUser {
            user_id,
            email,
            name: claims.name,
        })
    }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get("authorization")
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Authorization header is not valid UTF-8"))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AppError::unauthorized("Authorization header must be `Bearer <token>`"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized(
            "Authorization scheme must be `Bearer`",
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::unauthorized("Bearer token is empty"));
    }

    Ok(token)
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct AccessClaims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
}

fn validate_temporal_claims(
    claims: &AccessClaims,
    clock_skew: std::time::Duration,
) -> Result<(), AppError> {
    let now = chrono::Utc::now().timestamp();
    let skew = i64::try_from(clock_skew.as_secs()).unwrap_or(0);

    let exp = claims
        .exp
        .ok_or_else(|| AppError::unauthorized("Token missing `exp` claim"))?;
    if exp <= now.saturating_sub(skew) {
        return Err(AppError::unauthorized("Token is expired"));
    }

    let iat = claims
        .iat
        .ok_or_else(|| AppError::unauthorized("Token missing `iat` claim"))?;
    if iat > now.saturating_add(skew) {
        return Err(AppError::unauthorized("Token `iat` is in the future"));
    }

    if let Some(nbf) = claims.nbf {
        if nbf > now.saturating_add(skew) {
            return Err(AppError::unauthorized("Token is not yet valid"));
        }
    }

    Ok(())
}

fn audience_matches(aud: Option<&Value>, expected: &str) -> bool {
    let Some(aud) = aud else {
        return false;
    };

    match aud {
        Value::String(value) => value == expected,
        Value::Array(values) => values
            .iter()
            .filter_map(Value::as_str)
            .any(|value| value == expected),
        _ => false,
    }
}

fn sanitize(error: &impl std::fmt::Display) -> String {
    error.to_string().replace('\n', " ").trim().to_string()
}

/// Sign a token the way the identity provider would
#[cfg(test)]
pub(crate) fn issue_test_token(secret: &str, claims: &AccessClaims) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

#[cfg(test)]
pub(crate) fn test_claims(user_id: UserId, email: &str) -> AccessClaims {
    let now = chrono::Utc::now().timestamp();
    AccessClaims {
        sub: user_id.to_string(),
        email: Some(email.to_string()),
        name: None,
        aud: None,
        iss: None,
        exp: Some(now + 300),
        iat: Some(now),
        nbf: None,
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;
    use crate::config::tests::{config_with, TEST_SECRET};

    fn verifier(pairs: &[(&str, &str)]) -> JwtVerifier {
        JwtVerifier::new(Arc::new(config_with(pairs).unwrap()))
    }

    #[test]
    fn bearer_token_extractor_accepts_standard_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_static("Bearer abc.def.ghi"),
        );

        assert_eq!(extract_bearer_token(&headers).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn bearer_token_extractor_rejects_wrong_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert!(extract_bearer_token(&headers).is_err());
    }

    #[test]
    fn valid_token_yields_user() {
        let user_id = UserId::new();
        let token = issue_test_token(TEST_SECRET, &test_claims(user_id, "me@example.com"));

        let user = verifier(&[]).verify_access_token(&token).unwrap();
        assert_eq!(user.user_id, user_id);
        assert_eq!(user.email, "me@example.com");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue_test_token(
            "some-other-secret-that-is-also-long-enough",
            &test_claims(UserId::new(), "me@example.com"),
        );
        assert!(verifier(&[]).verify_access_token(&token).is_err());
    }

    #[test]
    fn issuer_and_audience_are_enforced_when_configured() {
        let verifier = verifier(&[
            ("JWT_ISSUER", "https://id.example.com"),
            ("JWT_AUDIENCE", "todolisti"),
        ]);
        let mut claims = test_claims(UserId::new(), "me@example.com");
        claims.iss = Some("https://id.example.com".into());
        claims.aud = Some(Value::String("other".into()));
        let err = verifier
            .verify_access_token(&issue_test_token(TEST_SECRET, &claims))
            .unwrap_err();
        assert!(err.to_string().contains("audience"));

        claims.aud = Some(Value::Array(vec![Value::String("todolisti".into())]));
        verifier
            .verify_access_token(&issue_test_token(TEST_SECRET, &claims))
            .unwrap();

        claims.iss = Some("https://evil.example.com".into());
        assert!(verifier
            .verify_access_token(&issue_test_token(TEST_SECRET, &claims))
            .is_err());
    }

    #[test]
    fn temporal_claims_require_exp_and_iat() {
        let mut claims = test_claims(UserId::new(), "me@example.com");
        claims.exp = None;
        let err =
            validate_temporal_claims(&claims, std::time::Duration::from_secs(60)).unwrap_err();
        assert!(err.to_string().contains("missing `exp`"));
    }

    #[test]
    fn temporal_claims_reject_future_iat() {
        let now = chrono::Utc::now().timestamp();
        let mut claims = test_claims(UserId::new(), "me@example.com");
        claims.iat = Some(now + 120);
        let err =
            validate_temporal_claims(&claims, std::time::Duration::from_secs(30)).unwrap_err();
        assert!(err.to_string().contains("future"));
    }

    #[test]
    fn expired_token_is_rejected() {
        let now = chrono::Utc::now().timestamp();
        let mut claims = test_claims(UserId::new(), "me@example.com");
        claims.exp = Some(now - 600);
        let err = verifier(&[])
            .verify_access_token(&issue_test_token(TEST_SECRET, &claims))
            .unwrap_err();
        assert!(err.to_string().contains("expired"));
    }
}
