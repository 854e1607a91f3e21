//! # Caller Identity
//!
//! Bearer-token verification, client IP extraction and the sanitized request
//! snapshot attached to error log entries.

use axum::http::{header, HeaderMap, Method};
use checkout_core::{CheckoutError, CheckoutResult};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::net::SocketAddr;
use uuid::Uuid;

/// Headers copied into the request snapshot
const SNAPSHOT_HEADERS: &[&str] = &[
    "authorization",
    "content-type",
    "origin",
    "referer",
    "user-agent",
    "x-forwarded-for",
    "x-real-ip",
];

/// Token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Expiry, seconds since the epoch
    pub exp: i64,
}

/// An authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: Option<String>,
}

/// HS256 bearer tokens
pub struct JwtAuth {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtAuth {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Sign a token for `user_id` valid for `ttl`
    pub fn issue(&self, user_id: Uuid, email: Option<String>, ttl: Duration) -> CheckoutResult<String> {
        let claims = Claims {
            sub: user_id.to_string(),
            email,
            exp: (Utc::now() + ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| CheckoutError::Internal(format!("Failed to sign token: {}", e)))
    }

    /// Verify a raw token
    pub fn verify(&self, token: &str) -> CheckoutResult<AuthUser> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| CheckoutError::unauthorized(format!("Invalid or expired token: {}", e)))?;

        let user_id = data
            .claims
            .sub
            .parse::<Uuid>()
            .map_err(|_| CheckoutError::unauthorized("Invalid token subject"))?;

        Ok(AuthUser {
            user_id,
            email: data.claims.email.filter(|e| !e.is_empty()),
        })
    }

    /// Authenticate the `Authorization: Bearer` header
    pub fn authenticate(&self, headers: &HeaderMap) -> CheckoutResult<AuthUser> {
        let token = bearer_token(headers)
            .ok_or_else(|| CheckoutError::unauthorized("Missing authorization header"))?;
        self.verify(token)
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Client IP for admission and the error log.
///
/// Proxy headers are client-controlled unless a proxy in front of us
/// rewrites them, so they are only read when `trust_proxy` is set. Even
/// then only the last `x-forwarded-for` hop is used: that is the address
/// our proxy appended, while earlier entries are whatever the client sent.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> Option<String> {
    let peer_ip = || peer.map(|addr| addr.ip().to_string());
    if !trust_proxy {
        return peer_ip();
    }

    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    header_value("x-forwarded-for")
        .and_then(|list| list.rsplit(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .or_else(|| header_value("x-real-ip"))
        .or_else(|| header_value("cf-connecting-ip"))
        .map(str::to_string)
        .or_else(peer_ip)
}

/// Sanitized copy of the inbound request for the error log
pub fn request_snapshot(method: &Method, path: &str, headers: &HeaderMap, body: &[u8]) -> Value {
    let mut kept = Map::new();
    for name in SNAPSHOT_HEADERS {
        if let Some(value) = headers.get(*name).and_then(|v| v.to_str().ok()) {
            let value = if *name == "authorization" {
                "[REDACTED]".to_string()
            } else {
                value.to_string()
            };
            kept.insert(name.to_string(), Value::String(value));
        }
    }

    let body = match serde_json::from_slice::<Value>(body) {
        Ok(parsed) => parsed,
        Err(_) if body.is_empty() => Value::Null,
        Err(_) => Value::String(String::from_utf8_lossy(body).chars().take(1024).collect()),
    };

    json!({
        "method": method.as_str(),
        "path": path,
        "headers": kept,
        "body": body,
    })
}
