//! Coffer Core
//!
//! Hierarchical deterministic key derivation and credential handling for
//! the Coffer wallet.
//!
//! # Layers
//!
//! - [`crypto`]: hashes, HMAC, scrypt, AES-256-CBC, ECDSA
//! - [`node`] / [`derive`]: BIP-32 extended keys and child derivation
//! - [`address`]: base58check addresses and WIF encoding
//! - [`credentials`]: passphrase-derived key-encryption keys
//! - [`keystore`]: extended private keys wrapped under the ephemeral key

pub mod address;
pub mod credentials;
pub mod crypto;
pub mod derive;
pub mod keystore;
pub mod node;

pub use credentials::{Credentials, CredentialsError, PassphraseArtifacts};
pub use derive::DeriveError;
pub use node::Node;

/// 20-byte RIPEMD-160(SHA-256(x)) digest, the address-level identity used
/// throughout the wallet.
pub type Hash160 = [u8; 20];
