//! Reversible secret obfuscation
//!
//! Credential secrets are kept at rest in obfuscated form so that listings,
//! debug output and snapshots of the store never carry plaintext. This is
//! separation, not confidentiality: `XorObfuscator` is a keyed XOR over a
//! SHA-256 derived key, encoded as base64, and anyone holding the passphrase
//! or enough ciphertext can reverse it. Swap in an authenticated-encryption
//! implementation of `Obfuscator` if real protection is ever required.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Two-way transform applied to credential secrets at rest.
pub trait Obfuscator: Send + Sync {
    fn encode(&self, plaintext: &str) -> String;
    fn decode(&self, sealed: &str) -> Result<String>;
}

/// Keyed XOR + base64. NOT encryption.
pub struct XorObfuscator {
    key: [u8; 32],
}

impl XorObfuscator {
    /// Derive the 32-byte key once from a passphrase.
    pub fn from_passphrase(passphrase: &str) -> Self {
        let key: [u8; 32] = Sha256::digest(passphrase.as_bytes()).into();
        Self { key }
    }

    fn xor(&self, data: &[u8]) -> Vec<u8> {
        data.iter()
            .zip(self.key.iter().cycle())
            .map(|(b, k)| b ^ k)
            .collect()
    }
}

impl Obfuscator for XorObfuscator {
    fn encode(&self, plaintext: &str) -> String {
        STANDARD.encode(self.xor(plaintext.as_bytes()))
    }

    fn decode(&self, sealed: &str) -> Result<String> {
        let bytes = STANDARD
            .decode(sealed)
            .map_err(|e| Error::SecretDecode(format!("invalid base64: {e}")))?;
        String::from_utf8(self.xor(&bytes))
            .map_err(|_| Error::SecretDecode("decoded bytes are not UTF-8".into()))
    }
}
