//! Keypair request signing
//!
//! The manager verifies `Authorization: BackendAI signMethod=HMAC-SHA256,
//! credential=<access key>:<signature>`. The signing key is derived from the
//! secret key, the request date and the host; the signed string covers the
//! method, path, date, host, content type, API version and body hash.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub const SIGN_METHOD: &str = "HMAC-SHA256";

/// Keypair used to sign requests
#[derive(Clone)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Everything the signature covers
#[derive(Debug, Clone)]
pub struct SigningInput<'a> {
    pub method: &'a str,
    /// Path including the query string
    pub path: &'a str,
    pub date: DateTime<Utc>,
    /// Host header value (host[:port])
    pub host: &'a str,
    pub content_type: &'a str,
    pub api_version: &'a str,
}

impl SigningInput<'_> {
    /// Value of the Date header; the signature embeds it verbatim
    pub fn raw_date(&self) -> String {
        self.date.to_rfc3339()
    }
}

fn hmac_bytes(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Compute the hex signature for a request.
/// Bodies are not hashed since API v4.20181215, so the body hash is always of "".
pub fn sign(input: &SigningInput<'_>, secret_key: &str) -> String {
    let body_hash = hex::encode(Sha256::digest(b""));
    let sign_str = format!(
        "{}\n{}\n{}\nhost:{}\ncontent-type:{}\nx-backendai-version:{}\n{}",
        input.method,
        input.path,
        input.raw_date(),
        input.host,
        input.content_type,
        input.api_version,
        body_hash,
    );

    let date_key = hmac_bytes(
        secret_key.as_bytes(),
        input.date.format("%Y%m%d").to_string().as_bytes(),
    );
    let sign_key = hmac_bytes(&date_key, input.host.as_bytes());
    hex::encode(hmac_bytes(&sign_key, sign_str.as_bytes()))
}

/// Headers to attach to a signed request
pub fn signed_headers(input: &SigningInput<'_>, credentials: &Credentials) -> Vec<(&'static str, String)> {
    let signature = sign(input, &credentials.secret_key);
    vec![
        ("Date", input.raw_date()),
        ("X-BackendAI-Version", input.api_version.to_string()),
        ("Content-Type", input.content_type.to_string()),
        (
            "Authorization",
            format!(
                "BackendAI signMethod={}, credential={}:{}",
                SIGN_METHOD, credentials.access_key, signature
            ),
        ),
    ]
}
