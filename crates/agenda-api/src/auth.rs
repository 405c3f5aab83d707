use std::time::Duration;

use agenda_core::UserId;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
}

/// HS256 access-token verification against the shared secret.
#[derive(Clone)]
pub struct JwtVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    clock_skew: Duration,
}

#[derive(Debug, Serialize, Deserialize)]
struct AccessClaims {
    sub: String,
    iss: String,
    exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nbf: Option<i64>,
}

impl JwtVerifier {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            issuer: config.jwt_issuer.clone(),
            clock_skew: config.auth_clock_skew,
        }
    }

    pub fn verify_access_token(&self, token: &str) -> Result<AuthenticatedUser, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        validation.leeway = self.clock_skew.as_secs();
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let decoded = decode::<AccessClaims>(token, &self.decoding, &validation).map_err(|error| {
            AppError::unauthorized(format!("Token validation failed: {}", sanitize(&error)))
        })?;
        validate_issued_at(&decoded.claims, self.clock_skew)?;

        let user_id = decoded
            .claims
            .sub
            .trim()
            .parse::<UserId>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| AppError::unauthorized("Token subject is not a user id"))?;

        Ok(AuthenticatedUser { user_id })
    }

    /// Sign an access token for `user_id` valid for `ttl`.
    pub fn issue(&self, user_id: UserId, ttl: Duration) -> Result<String, AppError> {
        let now = chrono::Utc::now().timestamp();
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = AccessClaims {
            sub: user_id.to_string(),
            iss: self.issuer.clone(),
            exp: now.saturating_add(ttl),
            iat: Some(now),
            nbf: None,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|error| {
                AppError::internal(format!("Token signing failed: {}", sanitize(&error)))
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

/// Bearer header first, then an `access_token` query value (browsers cannot
/// set headers on WebSocket upgrades).
pub fn extract_access_token<'a>(
    headers: &'a HeaderMap,
    query_token: Option<&'a str>,
) -> Result<&'a str, AppError> {
    if headers.contains_key("authorization") {
        return extract_bearer_token(headers);
    }
    query_token
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::unauthorized("Missing access token"))
}

fn validate_issued_at(claims: &AccessClaims, clock_skew: Duration) -> Result<(), AppError> {
    let now = chrono::Utc::now().timestamp();
    let skew = i64::try_from(clock_skew.as_secs()).unwrap_or(0);

    if let Some(iat) = claims.iat {
        if iat > now.saturating_add(skew) {
            return Err(AppError::unauthorized("Token `iat` is in the future"));
        }
    }
    Ok(())
}

fn sanitize(error: &impl std::fmt::Display) -> String {
    error.to_string().replace('\n', " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;
    use crate::config::test_config;

    fn verifier() -> JwtVerifier {
        JwtVerifier::new(&test_config())
    }

    fn sign(claims: &AccessClaims, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
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
    fn access_token_falls_back_to_query() {
        let headers = HeaderMap::new();
        assert_eq!(
            extract_access_token(&headers, Some(" abc ")).unwrap(),
            "abc"
        );
        assert!(extract_access_token(&headers, Some("")).is_err());
        assert!(extract_access_token(&headers, None).is_err());
    }

    #[test]
    fn issued_token_round_trips() {
        let verifier = verifier();
        let token = verifier.issue(42, Duration::from_secs(300)).unwrap();
        assert_eq!(
            verifier.verify_access_token(&token).unwrap(),
            AuthenticatedUser { user_id: 42 }
        );
    }

    #[test]
    fn rejects_wrong_secret_issuer_and_subject() {
        let verifier = verifier();
        let now = chrono::Utc::now().timestamp();
        let claims = |sub: &str, iss: &str| AccessClaims {
            sub: sub.to_string(),
            iss: iss.to_string(),
            exp: now + 300,
            iat: Some(now),
            nbf: None,
        };

        let forged = sign(&claims("1", "agenda"), "another-secret-that-is-32-bytes-long!!");
        assert!(verifier.verify_access_token(&forged).is_err());

        let foreign = sign(&claims("1", "elsewhere"), crate::config::TEST_SECRET);
        assert!(verifier.verify_access_token(&foreign).is_err());

        let bad_sub = sign(&claims("alice", "agenda"), crate::config::TEST_SECRET);
        let err = verifier.verify_access_token(&bad_sub).unwrap_err();
        assert!(err.to_string().contains("not a user id"));
    }

    #[test]
    fn rejects_expired_and_future_tokens() {
        let verifier = verifier();
        let now = chrono::Utc::now().timestamp();

        let expired = sign(
            &AccessClaims {
                sub: "1".to_string(),
                iss: "agenda".to_string(),
                exp: now - 600,
                iat: Some(now - 900),
                nbf: None,
            },
            crate::config::TEST_SECRET,
        );
        assert!(verifier.verify_access_token(&expired).is_err());

        let future = sign(
            &AccessClaims {
                sub: "1".to_string(),
                iss: "agenda".to_string(),
                exp: now + 900,
                iat: Some(now + 600),
                nbf: None,
            },
            crate::config::TEST_SECRET,
        );
        let err = verifier.verify_access_token(&future).unwrap_err();
        assert!(err.to_string().contains("future"));
    }
}
