//! Signed session tokens.
//!
//! A token is `base64url(claims_json) "." base64url(hmac_sha256(claims_json))`.
//! The claims carry the verification and messaging-preference flags so the
//! dashboard can render without a store round trip.
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use http::HeaderMap;
use http::header::{AUTHORIZATION, COOKIE};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::types::User;

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE: &str = "umessage.session-token";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    #[serde(rename = "_id")]
    pub user_id: String,
    pub username: String,
    pub is_verified: bool,
    #[serde(rename = "isAcceptingMessage")]
    pub is_accepting_messages: bool,
    /// Issued-at, seconds since the epoch.
    pub iat: i64,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("malformed session token")]
    Malformed,
    #[error("session token signature mismatch")]
    BadSignature,
    #[error("session token expired")]
    Expired,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("session secret cannot key HMAC-SHA256")]
pub struct InvalidSecret;

/// Keyed once at startup; every token is signed from a clone of this MAC.
#[derive(Clone)]
pub struct SessionKeys {
    mac: HmacSha256,
    max_age: Duration,
}

impl SessionKeys {
    pub fn new(secret: &[u8], max_age: Duration) -> Result<Self, InvalidSecret> {
        let mac = HmacSha256::new_from_slice(secret).map_err(|_| InvalidSecret)?;
        Ok(SessionKeys { mac, max_age })
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    fn mac(&self) -> HmacSha256 {
        self.mac.clone()
    }

    pub fn claims_for(&self, user: &User, now: DateTime<Utc>) -> SessionClaims {
        SessionClaims {
            user_id: user.id.clone(),
            username: user.username.clone(),
            is_verified: user.is_verified,
            is_accepting_messages: user.is_accepting_messages,
            iat: now.timestamp(),
            exp: (now + self.max_age).timestamp(),
        }
    }

    pub fn sign(&self, claims: &SessionClaims) -> String {
        // Serializing a struct of strings, bools and integers cannot fail.
        let payload = serde_json::to_vec(claims).unwrap_or_default();

        let mut mac = self.mac();
        mac.update(&payload);
        let signature = mac.finalize().into_bytes();

        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(signature)
        )
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, SessionError> {
        let (payload_b64, signature_b64) =
            token.split_once('.').ok_or(SessionError::Malformed)?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| SessionError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| SessionError::Malformed)?;

        let mut mac = self.mac();
        mac.update(&payload);
        mac.verify_slice(&signature)
            .map_err(|_| SessionError::BadSignature)?;

        let claims: SessionClaims =
            serde_json::from_slice(&payload).map_err(|_| SessionError::Malformed)?;

        if claims.exp <= now.timestamp() {
            return Err(SessionError::Expired);
        }

        Ok(claims)
    }
}

/// Pulls a token from `Authorization: Bearer` first, then from the session cookie.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty());

    if bearer.is_some() {
        return bearer;
    }

    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, token)| token.to_string())
        .filter(|token| !token.is_empty())
}

pub fn session_cookie(token: &str, max_age: Duration, secure: bool) -> String {
    let mut cookie = format!(
        "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        max_age.num_seconds()
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub fn cleared_session_cookie(secure: bool) -> String {
    session_cookie("", Duration::zero(), secure)
}
