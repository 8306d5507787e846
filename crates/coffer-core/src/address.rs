//! Base58Check addresses and key encodings
//!
//! Mainnet pay-to-pubkey-hash addresses (`1...`), wallet-import-format
//! private keys, and the base58check wrapping shared with extended keys.

use thiserror::Error;
use zeroize::Zeroizing;

use crate::crypto;
use crate::Hash160;

/// Version byte of a mainnet P2PKH address.
const ADDRESS_VERSION: u8 = 0x00;

/// Version byte of a wallet-import-format private key.
const WIF_VERSION: u8 = 0x80;

/// Trailing marker on WIF keys whose public key is compressed.
const WIF_COMPRESSED: u8 = 0x01;

#[derive(Error, Debug)]
pub enum AddressError {
    #[error("base58check checksum mismatch")]
    Checksum,
    #[error("malformed base58 string")]
    Encoding,
    #[error("unexpected version byte or payload length")]
    Payload,
}

/// base58check-encode: payload plus four checksum bytes of its
/// double-SHA-256.
pub fn encode_check(payload: &[u8]) -> String {
    bs58::encode(payload).with_check().into_string()
}

/// Decode base58check, verifying and stripping the checksum.
pub fn decode_check(encoded: &str) -> Result<Vec<u8>, AddressError> {
    bs58::decode(encoded)
        .with_check(None)
        .into_vec()
        .map_err(|err| match err {
            bs58::decode::Error::InvalidChecksum { .. } => AddressError::Checksum,
            _ => AddressError::Encoding,
        })
}

/// Render a 20-byte hash160 as a mainnet address.
pub fn hash160_to_address(hash: &Hash160) -> String {
    let mut payload = Vec::with_capacity(1 + hash.len());
    payload.push(ADDRESS_VERSION);
    payload.extend_from_slice(hash);
    encode_check(&payload)
}

/// Hash a public key and render the resulting address.
pub fn public_key_to_address(public_key: &[u8]) -> String {
    hash160_to_address(&crypto::hash160(public_key))
}

/// Recover the hash160 embedded in a mainnet address.
pub fn address_to_hash160(address: &str) -> Result<Hash160, AddressError> {
    let payload = decode_check(address)?;
    match payload.as_slice() {
        [ADDRESS_VERSION, hash @ ..] => hash.try_into().map_err(|_| AddressError::Payload),
        _ => Err(AddressError::Payload),
    }
}

/// Render a secret key in wallet-import format (compressed marker set).
pub fn secret_to_wif(secret: &[u8; 32]) -> String {
    let mut payload = Zeroizing::new(Vec::with_capacity(34));
    payload.push(WIF_VERSION);
    payload.extend_from_slice(secret);
    payload.push(WIF_COMPRESSED);
    encode_check(&payload)
}
