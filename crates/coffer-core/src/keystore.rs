//! Encrypting node factory
//!
//! Produces extended private keys only in wrapped form: every function
//! that touches a private node returns (or consumes) its 78-byte
//! serialization encrypted under the credentials' ephemeral key. Plain
//! private bytes never leave this module.

use thiserror::Error;
use zeroize::Zeroizing;

use crate::credentials::{Credentials, CredentialsError};
use crate::crypto::{self, CryptoError};
use crate::derive::{self, DeriveError};
use crate::node::Node;

/// Seed length used when generating a fresh master node.
const GENERATED_SEED_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum KeystoreError {
    #[error(transparent)]
    Credentials(#[from] CredentialsError),
    #[error(transparent)]
    Derive(#[from] DeriveError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Derive a master node from `seed` and wrap its private form.
pub fn derive_master(credentials: &Credentials, seed: &[u8]) -> Result<Vec<u8>, KeystoreError> {
    let node = derive::master_from_seed(seed)?;
    wrap_node(credentials, &node)
}

/// Generate a master node from fresh OS randomness and wrap it.
pub fn generate_master(credentials: &Credentials) -> Result<Vec<u8>, KeystoreError> {
    let seed = Zeroizing::new(crypto::random_bytes(GENERATED_SEED_LEN)?);
    derive_master(credentials, &seed)
}

/// Parse a base58check extended private key and wrap it.
pub fn import_master(
    credentials: &Credentials,
    ext_prv_b58: &str,
) -> Result<Vec<u8>, KeystoreError> {
    let node = derive::node_from_base58(ext_prv_b58)?;
    wrap_node(credentials, &node)
}

/// Derive `path` below `master` and wrap the child's private form.
pub fn derive_child(
    credentials: &Credentials,
    master: &Node,
    path: &str,
) -> Result<Vec<u8>, KeystoreError> {
    let node = derive::derive_path(master, path)?;
    wrap_node(credentials, &node)
}

/// Unwrap a node previously wrapped by this module.
pub fn restore_private(
    credentials: &Credentials,
    wrapped: &[u8],
) -> Result<Node, KeystoreError> {
    let bytes = Zeroizing::new(credentials.decrypt_item(wrapped)?);
    Ok(derive::node_from_bytes(&bytes)?)
}

/// Rebuild the watch-only view of a node from its public serialization.
pub fn restore_public(ext_pub_b58: &str) -> Result<Node, KeystoreError> {
    Ok(derive::node_from_base58(ext_pub_b58)?)
}

fn wrap_node(credentials: &Credentials, node: &Node) -> Result<Vec<u8>, KeystoreError> {
    let bytes = Zeroizing::new(node.to_bytes());
    Ok(credentials.encrypt_item(&bytes[..])?)
}
