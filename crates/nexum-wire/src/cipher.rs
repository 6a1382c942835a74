//! Per-peer cipher sessions.
//!
//! A session is minted by the controller on a successful handshake: the key
//! is a SHA-256 digest of the peer address and the shared secret, the IV is
//! fresh random bytes, and the enabled flag mirrors the server's encryption
//! setting. The client rebuilds the same session from the hex credentials in
//! the handshake acknowledgement.

use crate::frame::WireError;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// AES-256-GCM key length in bytes.
pub const KEY_LEN: usize = 32;
/// AES-256-GCM nonce length in bytes.
pub const IV_LEN: usize = 12;

/// Derive the symmetric session key for one peer.
///
/// Deterministic per (peer address, secret), so a re-handshake from the same
/// peer yields the same key; only the IV changes.
pub fn derive_key(peer: &IpAddr, secret: &str) -> Zeroizing<[u8; KEY_LEN]> {
    let mut hasher = Sha256::new();
    hasher.update(format!("{peer}|{secret}").as_bytes());
    Zeroizing::new(hasher.finalize().into())
}

/// Symmetric key + IV + enabled flag for one peer.
#[derive(Clone)]
pub struct CipherSession {
    key: Zeroizing<[u8; KEY_LEN]>,
    iv: [u8; IV_LEN],
    enabled: bool,
}

impl std::fmt::Debug for CipherSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of logs.
        f.debug_struct("CipherSession")
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl CipherSession {
    /// Mint a fresh session for a peer: derived key, random IV.
    pub fn mint(peer: &IpAddr, secret: &str, enabled: bool) -> Self {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);
        Self {
            key: derive_key(peer, secret),
            iv,
            enabled,
        }
    }

    /// Rebuild a session from hex credentials (client side of the handshake).
    pub fn from_hex(key_hex: &str, iv_hex: &str, enabled: bool) -> Result<Self, WireError> {
        let key_bytes = hex::decode(key_hex)
            .map_err(|e| WireError::Crypto(format!("bad session key encoding: {e}")))?;
        let iv_bytes = hex::decode(iv_hex)
            .map_err(|e| WireError::Crypto(format!("bad session IV encoding: {e}")))?;
        let key: [u8; KEY_LEN] = key_bytes
            .try_into()
            .map_err(|_| WireError::Crypto(format!("session key must be {KEY_LEN} bytes")))?;
        let iv: [u8; IV_LEN] = iv_bytes
            .try_into()
            .map_err(|_| WireError::Crypto(format!("session IV must be {IV_LEN} bytes")))?;
        Ok(Self {
            key: Zeroizing::new(key),
            iv,
            enabled,
        })
    }

    /// Hex-encoded key, as carried in frames and handshake acks.
    pub fn key_hex(&self) -> String {
        hex::encode(*self.key)
    }

    /// Hex-encoded IV, as carried in the handshake ack.
    pub fn iv_hex(&self) -> String {
        hex::encode(self.iv)
    }

    /// Whether envelope traffic for this session is encrypted.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Constant-time comparison against a presented hex session key.
    pub fn matches_key(&self, presented_hex: &str) -> bool {
        let expected = self.key_hex();
        expected.as_bytes().ct_eq(presented_hex.as_bytes()).into()
    }

    /// Encrypt plaintext bytes to a base64 payload.
    pub fn seal(&self, plaintext: &[u8]) -> Result<String, WireError> {
        let cipher = Aes256Gcm::new_from_slice(self.key.as_slice())
            .map_err(|e| WireError::Crypto(format!("cipher init failed: {e}")))?;
        let nonce = Nonce::from_slice(&self.iv);
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| WireError::Crypto(format!("encryption failed: {e}")))?;
        Ok(BASE64.encode(ciphertext))
    }

    /// Decrypt a base64 payload back to plaintext bytes.
    pub fn open(&self, payload: &str) -> Result<Vec<u8>, WireError> {
        let ciphertext = BASE64
            .decode(payload)
            .map_err(|e| WireError::Crypto(format!("bad payload encoding: {e}")))?;
        let cipher = Aes256Gcm::new_from_slice(self.key.as_slice())
            .map_err(|e| WireError::Crypto(format!("cipher init failed: {e}")))?;
        let nonce = Nonce::from_slice(&self.iv);
        cipher
            .decrypt(nonce, ciphertext.as_slice())
            .map_err(|e| WireError::Crypto(format!("decryption failed: {e}")))
    }

    /// Serialize a value to JSON and seal it.
    pub fn seal_json<T: Serialize>(&self, value: &T) -> Result<String, WireError> {
        let json = serde_json::to_vec(value)?;
        self.seal(&json)
    }

    /// Open a payload and deserialize it from JSON.
    pub fn open_json<T: DeserializeOwned>(&self, payload: &str) -> Result<T, WireError> {
        let plaintext = self.open(payload)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ResponseEnvelope, Status};
    use serde_json::json;

    fn peer() -> IpAddr {
        "10.1.2.3".parse().unwrap()
    }

    #[test]
    fn test_key_derivation_is_deterministic() {
        let a = derive_key(&peer(), "s3cr3t");
        let b = derive_key(&peer(), "s3cr3t");
        assert_eq!(*a, *b);

        let other_peer = derive_key(&"10.1.2.4".parse().unwrap(), "s3cr3t");
        assert_ne!(*a, *other_peer);

        let other_secret = derive_key(&peer(), "different");
        assert_ne!(*a, *other_secret);
    }

    #[test]
    fn test_mint_uses_fresh_iv() {
        let a = CipherSession::mint(&peer(), "s3cr3t", true);
        let b = CipherSession::mint(&peer(), "s3cr3t", true);
        assert_eq!(a.key_hex(), b.key_hex());
        assert_ne!(a.iv_hex(), b.iv_hex());
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let session = CipherSession::mint(&peer(), "s3cr3t", true);
        let payload = session.seal(b"hello over the wire").unwrap();
        let plaintext = session.open(&payload).unwrap();
        assert_eq!(plaintext, b"hello over the wire");
    }

    #[test]
    fn test_client_rebuilds_session_from_hex() {
        let server = CipherSession::mint(&peer(), "s3cr3t", true);
        let client =
            CipherSession::from_hex(&server.key_hex(), &server.iv_hex(), server.enabled()).unwrap();

        let payload = client.seal(b"request bytes").unwrap();
        assert_eq!(server.open(&payload).unwrap(), b"request bytes");
    }

    #[test]
    fn test_open_rejects_wrong_key() {
        let session = CipherSession::mint(&peer(), "s3cr3t", true);
        let other = CipherSession::mint(&peer(), "another", true);
        let payload = session.seal(b"data").unwrap();
        assert!(matches!(other.open(&payload), Err(WireError::Crypto(_))));
    }

    #[test]
    fn test_open_rejects_tampered_payload() {
        let session = CipherSession::mint(&peer(), "s3cr3t", true);
        let payload = session.seal(b"data").unwrap();
        let mut bytes = BASE64.decode(&payload).unwrap();
        bytes[0] ^= 0xff;
        let tampered = BASE64.encode(bytes);
        assert!(matches!(session.open(&tampered), Err(WireError::Crypto(_))));
    }

    #[test]
    fn test_matches_key() {
        let session = CipherSession::mint(&peer(), "s3cr3t", true);
        assert!(session.matches_key(&session.key_hex()));
        assert!(!session.matches_key("deadbeef"));
    }

    #[test]
    fn test_seal_json_roundtrip() {
        let session = CipherSession::mint(&peer(), "s3cr3t", true);
        let response = ResponseEnvelope::ok(json!({"total": 5}));
        let payload = session.seal_json(&response).unwrap();
        let back: ResponseEnvelope = session.open_json(&payload).unwrap();
        assert_eq!(back.status, Status::Ok);
        assert_eq!(back.value, Some(json!({"total": 5})));
    }

    #[test]
    fn test_from_hex_rejects_bad_lengths() {
        assert!(CipherSession::from_hex("abcd", "001122334455667788990011", true).is_err());
        let key = hex::encode([0u8; KEY_LEN]);
        assert!(CipherSession::from_hex(&key, "abcd", true).is_err());
    }
}
