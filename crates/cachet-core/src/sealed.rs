//! AES-256-GCM envelope for secrets the server must store but should not
//! keep readable at rest (currently the TOTP secret). The sealing key comes
//! from server configuration, not from any user key — the server can never
//! hold the user's master key.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use anyhow::{Result, anyhow};

pub struct SecretSealer {
    key: [u8; 32],
}

impl SecretSealer {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Returns (ciphertext, nonce).
    pub fn seal(&self, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));

        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| anyhow!("seal failed: {}", e))?;

        Ok((ciphertext, nonce_bytes.to_vec()))
    }

    pub fn open(&self, ciphertext: &[u8], nonce: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let nonce = Nonce::from_slice(nonce);

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| anyhow!("open failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let sealer = SecretSealer::new([7u8; 32]);
        let (ct, nonce) = sealer.seal(b"totp secret").unwrap();
        assert_ne!(ct.as_slice(), b"totp secret");
        assert_eq!(sealer.open(&ct, &nonce).unwrap(), b"totp secret");
    }

    #[test]
    fn wrong_key_fails() {
        let a = SecretSealer::new([1u8; 32]);
        let b = SecretSealer::new([2u8; 32]);
        let (ct, nonce) = a.seal(b"secret").unwrap();
        assert!(b.open(&ct, &nonce).is_err());
    }
}
