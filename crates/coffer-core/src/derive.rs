//! BIP-32 derivation engine
//!
//! Builds [`Node`]s from seeds or serialized extended keys and derives
//! children by index or by path string (`m/0'/1/2`).
//!
//! Derivation failures that BIP-32 resolves by "proceed with the next
//! index" (IL out of range, zero child key, point at infinity) are
//! surfaced as [`DeriveError::InvalidDerivation`]; silently substituting a
//! neighbouring index would change the derived path behind the caller's
//! back.

use secp256k1::{Scalar, Secp256k1, SecretKey};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::address::{self, AddressError};
use crate::crypto;
use crate::node::{Node, EXTENDED_KEY_LEN};

/// High bit of a child number, marking hardened derivation.
pub const HARDENED_FLAG: u32 = 0x8000_0000;

/// Shortest seed accepted for master-key generation.
pub const MIN_SEED_LEN: usize = 16;

/// Order of the secp256k1 group, big-endian. Scalars at or above this
/// value cannot be keys.
pub const CURVE_ORDER: [u8; 32] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xfe, 0xba, 0xae, 0xdc, 0xe6, 0xaf, 0x48, 0xa0, 0x3b, 0xbf, 0xd2, 0x5e, 0x8c, 0xd0, 0x36,
    0x41, 0x41,
];

const MASTER_HMAC_KEY: &[u8] = b"Bitcoin seed";

#[derive(Error, Debug)]
pub enum DeriveError {
    #[error("seed must be at least {MIN_SEED_LEN} bytes")]
    InvalidSeed,
    #[error("extended key must be {EXTENDED_KEY_LEN} bytes, got {0}")]
    BadLength(usize),
    #[error("cannot derive a hardened child from a public-only parent")]
    HardenedFromPublic,
    #[error("derivation at index {0:#010x} produced an out-of-range key; retry with the next index")]
    InvalidDerivation(u32),
    #[error("bad derivation path segment {0:?}")]
    InvalidPath(String),
    #[error("derived child does not chain to its parent")]
    LineageMismatch,
    #[error("invalid base58 extended key: {0}")]
    Base58(#[from] AddressError),
    #[error("invalid key material: {0}")]
    Key(#[from] secp256k1::Error),
}

/// Create a master node from a seed (HMAC-SHA-512 keyed `"Bitcoin seed"`).
pub fn master_from_seed(seed: &[u8]) -> Result<Node, DeriveError> {
    if seed.len() < MIN_SEED_LEN {
        return Err(DeriveError::InvalidSeed);
    }
    let digest = Zeroizing::new(crypto::hmac_sha512(MASTER_HMAC_KEY, seed));
    let secret: [u8; 32] = digest[..32].try_into().expect("left half of 64-byte digest");
    let chain_code: [u8; 32] = digest[32..].try_into().expect("right half of 64-byte digest");
    Node::from_private(secret, chain_code, 0, 0, 0).map_err(|_| DeriveError::InvalidSeed)
}

/// Parse the 78-byte serialized extended-key form.
pub fn node_from_bytes(bytes: &[u8]) -> Result<Node, DeriveError> {
    if bytes.len() != EXTENDED_KEY_LEN {
        return Err(DeriveError::BadLength(bytes.len()));
    }
    let depth = bytes[4];
    let parent_fingerprint = u32::from_be_bytes(bytes[5..9].try_into().expect("4 bytes"));
    let child_number = u32::from_be_bytes(bytes[9..13].try_into().expect("4 bytes"));
    let chain_code: [u8; 32] = bytes[13..45].try_into().expect("32 bytes");

    // a leading 0x00 marks private key material; compressed points start
    // with 0x02 or 0x03
    let node = if bytes[45] == 0x00 {
        let secret: [u8; 32] = bytes[46..78].try_into().expect("32 bytes");
        Node::from_private(secret, chain_code, depth, parent_fingerprint, child_number)?
    } else {
        Node::from_public(&bytes[45..78], chain_code, depth, parent_fingerprint, child_number)?
    };
    Ok(node)
}

/// Parse a base58check-encoded extended key (`xprv...` / `xpub...`).
pub fn node_from_base58(encoded: &str) -> Result<Node, DeriveError> {
    let bytes = Zeroizing::new(address::decode_check(encoded)?);
    node_from_bytes(&bytes)
}

/// Derive the child of `parent` at `index` (CKDpriv / CKDpub).
pub fn derive_child(parent: &Node, index: u32) -> Result<Node, DeriveError> {
    let hardened = index & HARDENED_FLAG != 0;

    let mut data = Zeroizing::new(Vec::with_capacity(37));
    if hardened {
        let secret = parent.secret_key().ok_or(DeriveError::HardenedFromPublic)?;
        data.push(0x00);
        data.extend_from_slice(secret);
    } else {
        data.extend_from_slice(&parent.public_key());
    }
    data.extend_from_slice(&index.to_be_bytes());

    let digest = Zeroizing::new(crypto::hmac_sha512(parent.chain_code(), &data));
    let left: [u8; 32] = digest[..32].try_into().expect("left half of 64-byte digest");
    let chain_code: [u8; 32] = digest[32..].try_into().expect("right half of 64-byte digest");
    let tweak =
        Scalar::from_be_bytes(left).map_err(|_| DeriveError::InvalidDerivation(index))?;

    let depth = parent.depth() + 1;
    let parent_fingerprint = parent.fingerprint();
    let node = if let Some(secret) = parent.secret_key() {
        // child = (IL + parent) mod n; a zero result is rejected
        let child_key = SecretKey::from_slice(secret)?
            .add_tweak(&tweak)
            .map_err(|_| DeriveError::InvalidDerivation(index))?;
        Node::from_private(
            child_key.secret_bytes(),
            chain_code,
            depth,
            parent_fingerprint,
            index,
        )?
    } else {
        // child = IL·G + parent; the point at infinity is rejected
        let secp = Secp256k1::new();
        let point = parent
            .public_point()
            .add_exp_tweak(&secp, &tweak)
            .map_err(|_| DeriveError::InvalidDerivation(index))?;
        Node::from_public_point(point, chain_code, depth, parent_fingerprint, index)
    };
    Ok(node)
}

/// Derive along a path such as `m/0'/1/2h`. A leading `m` (or empty first
/// segment) anchors at `parent`; `'` or `h` marks a hardened step.
pub fn derive_path(parent: &Node, path: &str) -> Result<Node, DeriveError> {
    let mut node = parent.clone();
    for (position, segment) in path.split('/').enumerate() {
        if position == 0 {
            if segment == "m" || segment.is_empty() {
                continue;
            }
            return Err(DeriveError::InvalidPath(segment.to_string()));
        }
        if segment.is_empty() {
            continue;
        }
        let index = parse_segment(segment)?;
        let child = derive_child(&node, index)?;
        if child.parent_fingerprint() != node.fingerprint()
            || child.child_number() != index
            || child.depth() != node.depth().wrapping_add(1)
        {
            return Err(DeriveError::LineageMismatch);
        }
        node = child;
    }
    Ok(node)
}

fn parse_segment(segment: &str) -> Result<u32, DeriveError> {
    let bad = || DeriveError::InvalidPath(segment.to_string());
    let (digits, hardened) = match segment.strip_suffix(['\'', 'h']) {
        Some(rest) => (rest, true),
        None => (segment, false),
    };
    let index: u32 = digits.parse().map_err(|_| bad())?;
    if index >= HARDENED_FLAG {
        return Err(bad());
    }
    Ok(if hardened { index | HARDENED_FLAG } else { index })
}
