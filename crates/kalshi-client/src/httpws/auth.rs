//! Request authentication for the Kalshi trade API
//!
//! Every REST call (and the WebSocket handshake) carries three headers:
//! - `KALSHI-ACCESS-KEY`: the API key id
//! - `KALSHI-ACCESS-TIMESTAMP`: milliseconds since the Unix epoch
//! - `KALSHI-ACCESS-SIGNATURE`: base64 RSA-PSS(SHA-256) signature of
//!   `timestamp + METHOD + path`, with the query string removed from `path`
//!
//! Headers are derived fresh for each request. The server rejects stale
//! timestamps, so nothing here is cached.

use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::pss::BlindedSigningKey;
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::error::{KalshiError, Result};

pub const HEADER_ACCESS_KEY: &str = "KALSHI-ACCESS-KEY";
pub const HEADER_ACCESS_SIGNATURE: &str = "KALSHI-ACCESS-SIGNATURE";
pub const HEADER_ACCESS_TIMESTAMP: &str = "KALSHI-ACCESS-TIMESTAMP";

/// Where the RSA private key comes from
#[derive(Clone)]
pub enum PrivateKeySource {
    /// PEM text (PKCS#8 or PKCS#1)
    Pem(String),
    /// Path to a PEM file
    File(PathBuf),
}

/// API key id plus private key material
#[derive(Clone)]
pub struct Credentials {
    pub key_id: String,
    pub private_key: PrivateKeySource,
}

impl Credentials {
    pub fn new(key_id: impl Into<String>, private_key: PrivateKeySource) -> Self {
        Self { key_id: key_id.into(), private_key }
    }

    /// Check if the key id is present (key material is checked on load)
    pub fn is_valid(&self) -> bool {
        !self.key_id.is_empty()
    }

    /// Read and parse the private key
    pub fn load_private_key(&self) -> Result<RsaPrivateKey> {
        let pem = match &self.private_key {
            PrivateKeySource::Pem(pem) => pem.clone(),
            PrivateKeySource::File(path) => std::fs::read_to_string(path).map_err(|e| {
                KalshiError::Config(format!(
                    "Failed to read private key file {}: {}",
                    path.display(),
                    e
                ))
            })?,
        };
        parse_private_key(&pem)
    }
}

impl std::fmt::Debug for PrivateKeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrivateKeySource::Pem(_) => f.write_str("Pem([REDACTED])"),
            PrivateKeySource::File(path) => f.debug_tuple("File").field(path).finish(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("key_id", &format!("{}...", &self.key_id.chars().take(8).collect::<String>()))
            .field("private_key", &self.private_key)
            .finish()
    }
}

/// Accepts both `BEGIN PRIVATE KEY` (PKCS#8) and `BEGIN RSA PRIVATE KEY` (PKCS#1)
fn parse_private_key(pem: &str) -> Result<RsaPrivateKey> {
    let pem = pem.trim();
    if pem.is_empty() {
        return Err(KalshiError::Signing("private key is empty".to_string()));
    }

    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| KalshiError::Signing(format!("Failed to parse RSA private key: {}", e)))
}

/// The three authentication headers for one request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedHeaders {
    pub key_id: String,
    pub signature: String,
    /// Milliseconds since epoch
    pub timestamp: i64,
}

impl SignedHeaders {
    /// Header name/value pairs, in wire form
    pub fn to_pairs(&self) -> [(&'static str, String); 3] {
        [
            (HEADER_ACCESS_KEY, self.key_id.clone()),
            (HEADER_ACCESS_SIGNATURE, self.signature.clone()),
            (HEADER_ACCESS_TIMESTAMP, self.timestamp.to_string()),
        ]
    }
}

/// Signs requests with the account's RSA key
pub struct RequestSigner {
    key_id: String,
    signing_key: BlindedSigningKey<Sha256>,
    public_key: RsaPublicKey,
}

impl RequestSigner {
    /// Load the key eagerly so bad credentials fail at construction
    pub fn from_credentials(credentials: &Credentials) -> Result<Self> {
        if !credentials.is_valid() {
            return Err(KalshiError::Config("API key id is empty".to_string()));
        }
        let private_key = credentials.load_private_key()?;
        Ok(Self::new(credentials.key_id.clone(), private_key))
    }

    pub fn new(key_id: String, private_key: RsaPrivateKey) -> Self {
        let public_key = private_key.to_public_key();
        Self { key_id, signing_key: BlindedSigningKey::<Sha256>::new(private_key), public_key }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Public half of the signing key
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// Sign `method` + `path` with the current time
    pub fn sign(&self, method: &str, path: &str) -> Result<SignedHeaders> {
        self.sign_at(method, path, Utc::now().timestamp_millis())
    }

    /// Sign with an explicit timestamp (milliseconds since epoch)
    pub fn sign_at(&self, method: &str, path: &str, timestamp_ms: i64) -> Result<SignedHeaders> {
        let message = canonical_message(timestamp_ms, method, path);
        let signature = self.sign_pss(message.as_bytes())?;

        Ok(SignedHeaders { key_id: self.key_id.clone(), signature, timestamp: timestamp_ms })
    }

    fn sign_pss(&self, message: &[u8]) -> Result<String> {
        let mut rng = rand::thread_rng();
        let signature = self
            .signing_key
            .try_sign_with_rng(&mut rng, message)
            .map_err(|e| KalshiError::Signing(format!("RSA-PSS sign failed: {}", e)))?;
        Ok(STANDARD.encode(signature.to_bytes()))
    }
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("key_id", &self.key_id)
            .field("signing_key", &"[REDACTED]")
            .finish()
    }
}

/// `timestamp + METHOD + path`, query string dropped
pub fn canonical_message(timestamp_ms: i64, method: &str, path: &str) -> String {
    let path = path.split_once('?').map_or(path, |(path, _)| path);
    format!("{}{}{}", timestamp_ms, method, path)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared key material for tests across the crate

    use std::sync::OnceLock;

    use rsa::pkcs8::{EncodePrivateKey, LineEnding};
    use rsa::pss::{Signature, VerifyingKey};
    use rsa::signature::Verifier;

    use super::*;

    pub(crate) fn private_key() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| {
            RsaPrivateKey::new(&mut rand::thread_rng(), 1024).expect("test key generation")
        })
    }

    pub(crate) fn pkcs8_pem() -> String {
        private_key().to_pkcs8_pem(LineEnding::LF).expect("encode test key").to_string()
    }

    pub(crate) fn credentials() -> Credentials {
        Credentials::new("test-key-id", PrivateKeySource::Pem(pkcs8_pem()))
    }

    /// Verify a base64 signature against `message` with the test public key
    pub(crate) fn verifies(signature_b64: &str, message: &str) -> bool {
        let Ok(bytes) = STANDARD.decode(signature_b64) else {
            return false;
        };
        let Ok(signature) = Signature::try_from(bytes.as_slice()) else {
            return false;
        };
        let verifying_key = VerifyingKey::<Sha256>::new(private_key().to_public_key());
        verifying_key.verify(message.as_bytes(), &signature).is_ok()
    }
}
