//! Passphrase credentials
//!
//! Two-tier at-rest protection: the passphrase never touches key material
//! directly. scrypt turns passphrase + salt into a key-encryption key,
//! which wraps a random 32-byte ephemeral key; everything else (extended
//! private keys, arbitrary items) is wrapped under the ephemeral key.
//! Changing the passphrase therefore re-wraps one 32-byte value and leaves
//! every other ciphertext untouched.
//!
//! The serializable state is `(salt, check, encrypted_ephemeral_key)`;
//! `check` is a known plaintext whose successful decryption proves a
//! candidate passphrase before the ephemeral key is unwrapped.

use thiserror::Error;
use zeroize::Zeroizing;

use crate::crypto::{self, CryptoError, KEY_LEN};
use hex_literal::hex;

/// Fixed plaintext encrypted under the KEK; decrypting it intact proves
/// the passphrase.
pub const PASSPHRASE_CHECK: [u8; 32] =
    hex!("df3bc110ce022d64a20503502a9edfd8acda8a39868e5dff6601c0bb9b6f9cf9");

/// Salt length for the KDF.
pub const SALT_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum CredentialsError {
    #[error("wallet is locked")]
    Locked,
    #[error("wallet is already unlocked")]
    AlreadyUnlocked,
    #[error("wrong passphrase")]
    BadPassphrase,
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Artifacts of a passphrase change, returned to the caller for
/// persistence.
#[derive(Clone, Debug)]
pub struct PassphraseArtifacts {
    pub salt: Vec<u8>,
    pub check: Vec<u8>,
    pub encrypted_ephemeral_key: Vec<u8>,
}

/// Lock state and key custody for one wallet.
///
/// The ephemeral key exists only while unlocked and is zeroized when the
/// wallet locks or the object drops.
#[derive(Default)]
pub struct Credentials {
    salt: Vec<u8>,
    check: Vec<u8>,
    encrypted_ephemeral_key: Vec<u8>,
    ephemeral_key: Option<Zeroizing<[u8; KEY_LEN]>>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore previously persisted state. The wallet starts locked.
    pub fn load(salt: Vec<u8>, check: Vec<u8>, encrypted_ephemeral_key: Vec<u8>) -> Self {
        Self {
            salt,
            check,
            encrypted_ephemeral_key,
            ephemeral_key: None,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.ephemeral_key.is_none()
    }

    pub fn is_passphrase_set(&self) -> bool {
        !self.check.is_empty()
    }

    /// Set the initial passphrase, or change it while unlocked.
    ///
    /// A first call generates a fresh ephemeral key; later calls re-wrap
    /// the existing one, so item ciphertexts stay valid across passphrase
    /// changes.
    pub fn set_passphrase(
        &mut self,
        passphrase: &str,
    ) -> Result<PassphraseArtifacts, CredentialsError> {
        if self.is_passphrase_set() && self.is_locked() {
            return Err(CredentialsError::Locked);
        }

        // nothing is committed until every fallible step has succeeded
        let ephemeral_key = match &self.ephemeral_key {
            Some(key) => key.clone(),
            None => {
                let mut key = Zeroizing::new([0u8; KEY_LEN]);
                crypto::fill_random(&mut key[..])?;
                key
            }
        };

        let salt = crypto::random_bytes(SALT_LEN)?;
        let kek = crypto::derive_key(passphrase, &salt)?;
        let check = crypto::encrypt(&kek, &PASSPHRASE_CHECK)?;
        let encrypted_ephemeral_key = crypto::encrypt(&kek, &ephemeral_key[..])?;

        self.salt = salt.clone();
        self.check = check.clone();
        self.encrypted_ephemeral_key = encrypted_ephemeral_key.clone();
        self.ephemeral_key = Some(ephemeral_key);

        Ok(PassphraseArtifacts {
            salt,
            check,
            encrypted_ephemeral_key,
        })
    }

    /// Verify the passphrase against the check value and unwrap the
    /// ephemeral key.
    pub fn unlock(&mut self, passphrase: &str) -> Result<(), CredentialsError> {
        // refuse when already unlocked, so the result can never be read as
        // passphrase verification
        if !self.is_locked() {
            return Err(CredentialsError::AlreadyUnlocked);
        }

        let kek = crypto::derive_key(passphrase, &self.salt)?;
        let check = crypto::decrypt(&kek, &self.check)
            .map_err(|_| CredentialsError::BadPassphrase)?;
        if check != PASSPHRASE_CHECK {
            log::warn!("unlock rejected: passphrase check mismatch");
            return Err(CredentialsError::BadPassphrase);
        }

        let plain = Zeroizing::new(
            crypto::decrypt(&kek, &self.encrypted_ephemeral_key)
                .map_err(|_| CredentialsError::BadPassphrase)?,
        );
        let key: [u8; KEY_LEN] = plain
            .as_slice()
            .try_into()
            .map_err(|_| CredentialsError::BadPassphrase)?;
        self.ephemeral_key = Some(Zeroizing::new(key));
        Ok(())
    }

    /// Drop the ephemeral key (zeroizing it) and return to the locked
    /// state.
    pub fn lock(&mut self) {
        self.ephemeral_key = None;
    }

    pub fn ephemeral_key(&self) -> Result<&[u8; KEY_LEN], CredentialsError> {
        self.ephemeral_key.as_deref().ok_or(CredentialsError::Locked)
    }

    /// Encrypt under the ephemeral key; requires the unlocked state.
    pub fn encrypt_item(&self, plaintext: &[u8]) -> Result<Vec<u8>, CredentialsError> {
        Ok(crypto::encrypt(self.ephemeral_key()?, plaintext)?)
    }

    /// Decrypt under the ephemeral key; requires the unlocked state.
    pub fn decrypt_item(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CredentialsError> {
        Ok(crypto::decrypt(self.ephemeral_key()?, ciphertext)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PP1: &str = "secret";
    const PP2: &str = "not-secret";

    #[test]
    fn test_lifecycle() {
        let mut credentials = Credentials::new();
        assert!(credentials.is_locked());
        assert!(!credentials.is_passphrase_set());

        let artifacts = credentials.set_passphrase(PP1).unwrap();
        assert_eq!(artifacts.salt.len(), SALT_LEN);
        assert!(!credentials.is_locked());
        assert!(credentials.is_passphrase_set());

        credentials.lock();
        assert!(credentials.is_locked());
        assert!(credentials.ephemeral_key().is_err());

        assert!(matches!(credentials.unlock(PP2), Err(CredentialsError::BadPassphrase)));
        assert!(credentials.is_locked());

        credentials.unlock(PP1).unwrap();
        assert!(!credentials.is_locked());
        assert!(credentials.ephemeral_key().is_ok());
    }

    #[test]
    fn test_change_passphrase_preserves_ephemeral_key() {
        let mut credentials = Credentials::new();
        let first = credentials.set_passphrase(PP1).unwrap();
        let original_key = *credentials.ephemeral_key().unwrap();

        let second = credentials.set_passphrase(PP2).unwrap();
        assert_ne!(first.salt, second.salt);
        assert_ne!(first.check, second.check);
        assert_ne!(first.encrypted_ephemeral_key, second.encrypted_ephemeral_key);
        assert_eq!(*credentials.ephemeral_key().unwrap(), original_key);

        // the old passphrase no longer unlocks, the new one recovers the
        // same key
        credentials.lock();
        assert!(credentials.unlock(PP1).is_err());
        credentials.unlock(PP2).unwrap();
        assert_eq!(*credentials.ephemeral_key().unwrap(), original_key);
    }

    #[test]
    fn test_change_requires_unlocked() {
        let mut credentials = Credentials::new();
        credentials.set_passphrase(PP1).unwrap();
        credentials.lock();
        assert!(matches!(credentials.set_passphrase(PP2), Err(CredentialsError::Locked)));
    }

    #[test]
    fn test_unlock_when_unlocked_fails() {
        let mut credentials = Credentials::new();
        credentials.set_passphrase(PP1).unwrap();
        assert!(matches!(credentials.unlock(PP1), Err(CredentialsError::AlreadyUnlocked)));
    }

    #[test]
    fn test_persisted_state_roundtrip() {
        let mut credentials = Credentials::new();
        let artifacts = credentials.set_passphrase(PP1).unwrap();
        let original_key = *credentials.ephemeral_key().unwrap();

        let mut restored = Credentials::load(
            artifacts.salt,
            artifacts.check,
            artifacts.encrypted_ephemeral_key,
        );
        assert!(restored.is_locked());
        assert!(restored.is_passphrase_set());
        restored.unlock(PP1).unwrap();
        assert_eq!(*restored.ephemeral_key().unwrap(), original_key);
    }

    #[test]
    fn test_item_encryption_requires_unlock() {
        let mut credentials = Credentials::new();
        assert!(matches!(
            credentials.encrypt_item(b"item"),
            Err(CredentialsError::Locked)
        ));

        credentials.set_passphrase(PP1).unwrap();
        let ciphertext = credentials.encrypt_item(b"item").unwrap();
        assert_eq!(credentials.decrypt_item(&ciphertext).unwrap(), b"item");

        credentials.lock();
        assert!(matches!(
            credentials.decrypt_item(&ciphertext),
            Err(CredentialsError::Locked)
        ));
    }
}
