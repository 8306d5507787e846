//! Cryptographic primitives
//!
//! Thin, fallible wrappers around the hash, KDF, cipher, and signature
//! routines the rest of the wallet builds on.
//!
//! # Security Notes
//!
//! - scrypt parameters are N=16384, r=8, p=8 (memory-hard, interactive use)
//! - AES-256-CBC ciphertexts carry their random 16-byte IV as a prefix
//! - ECDSA signatures use deterministic nonces (RFC 6979) and DER encoding
//! - randomness comes from the OS pool only; exhaustion is an error, never
//!   a silent fallback

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use ripemd::Ripemd160;
use secp256k1::{Message, Secp256k1, SecretKey};
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::Hash160;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha512 = Hmac<Sha512>;

/// AES block size; every ciphertext starts with one block of IV.
pub const AES_IV_LEN: usize = 16;

/// Size of every symmetric key and of the scrypt output.
pub const KEY_LEN: usize = 32;

/// Minimum salt length accepted by the KDF.
pub const MIN_SALT_LEN: usize = 32;

// scrypt cost parameters: N = 2^14
const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 8;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("the system random number generator failed")]
    Rng,
    #[error("key derivation failed")]
    Kdf,
    #[error("decryption failed")]
    Decrypt,
}

/// Fill `buf` from the OS random pool.
pub fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    OsRng.try_fill_bytes(buf).map_err(|_| CryptoError::Rng)
}

/// Return `len` bytes from the OS random pool.
pub fn random_bytes(len: usize) -> Result<Vec<u8>, CryptoError> {
    let mut bytes = vec![0u8; len];
    fill_random(&mut bytes)?;
    Ok(bytes)
}

pub fn sha256(input: &[u8]) -> [u8; 32] {
    Sha256::digest(input).into()
}

pub fn double_sha256(input: &[u8]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(input)).into()
}

/// RIPEMD-160 of SHA-256, the 20-byte address fingerprint.
pub fn hash160(input: &[u8]) -> Hash160 {
    Ripemd160::digest(Sha256::digest(input)).into()
}

pub fn hmac_sha512(key: &[u8], data: &[u8]) -> [u8; 64] {
    let mut mac = HmacSha512::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize()
        .into_bytes()
        .as_slice()
        .try_into()
        .expect("HMAC-SHA-512 output is 64 bytes")
}

/// Derive a 32-byte key-encryption key from a passphrase and salt.
///
/// The passphrase must be non-empty and the salt at least
/// [`MIN_SALT_LEN`] bytes.
pub fn derive_key(
    passphrase: &str,
    salt: &[u8],
) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
    if passphrase.is_empty() || salt.len() < MIN_SALT_LEN {
        return Err(CryptoError::Kdf);
    }
    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_LEN)
        .map_err(|_| CryptoError::Kdf)?;
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    scrypt::scrypt(passphrase.as_bytes(), salt, &params, &mut key[..])
        .map_err(|_| CryptoError::Kdf)?;
    Ok(key)
}

/// AES-256-CBC encrypt with PKCS#7 padding. Returns `IV || ciphertext`.
pub fn encrypt(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut iv = [0u8; AES_IV_LEN];
    fill_random(&mut iv)?;
    let cipher = Aes256CbcEnc::new(key.into(), (&iv).into());
    let mut out = Vec::with_capacity(AES_IV_LEN + plaintext.len() + AES_IV_LEN);
    out.extend_from_slice(&iv);
    out.extend_from_slice(&cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext));
    Ok(out)
}

/// Inverse of [`encrypt`]; expects the IV as the leading block.
pub fn decrypt(key: &[u8; KEY_LEN], iv_and_ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if iv_and_ciphertext.len() < AES_IV_LEN {
        return Err(CryptoError::Decrypt);
    }
    let (iv, ciphertext) = iv_and_ciphertext.split_at(AES_IV_LEN);
    let cipher = Aes256CbcDec::new_from_slices(key, iv).map_err(|_| CryptoError::Decrypt)?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::Decrypt)
}

/// ECDSA-sign a 32-byte digest, returning the DER-encoded signature.
pub fn sign(secret_key: &[u8; 32], digest: &[u8; 32]) -> Result<Vec<u8>, secp256k1::Error> {
    let secp = Secp256k1::new();
    let key = SecretKey::from_slice(secret_key)?;
    let message = Message::from_digest(*digest);
    Ok(secp.sign_ecdsa(&message, &key).serialize_der().to_vec())
}
