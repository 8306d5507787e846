//! Extended-key node
//!
//! A [`Node`] is one position in a BIP-32 key tree: key material plus the
//! chain code and lineage metadata needed to derive children and to
//! serialize the familiar 78-byte `xprv`/`xpub` form.
//!
//! # Serialization layout
//!
//! ```text
//! [4]  version        0x0488ADE4 private, 0x0488B21E public (mainnet)
//! [1]  depth          0x00 for master nodes
//! [4]  parent fingerprint  0x00000000 for master nodes
//! [4]  child number   big-endian, high bit set for hardened children
//! [32] chain code
//! [33] key material   0x00 + secret key, or the compressed public key
//! ```

use std::fmt;

use secp256k1::{PublicKey, Secp256k1, SecretKey};
use zeroize::Zeroizing;

use crate::crypto;
use crate::Hash160;

/// Version bytes of a mainnet extended private key.
pub const VERSION_MAINNET_PRIVATE: u32 = 0x0488_ADE4;

/// Version bytes of a mainnet extended public key.
pub const VERSION_MAINNET_PUBLIC: u32 = 0x0488_B21E;

/// Length of the serialized extended-key form.
pub const EXTENDED_KEY_LEN: usize = 78;

/// One node of a BIP-32 key tree. Immutable once constructed; the
/// fingerprint and identifier are computed up front.
#[derive(Clone, PartialEq, Eq)]
pub struct Node {
    secret_key: Option<Zeroizing<[u8; 32]>>,
    public_key: PublicKey,
    chain_code: [u8; 32],
    depth: u8,
    parent_fingerprint: u32,
    child_number: u32,
    identifier: Hash160,
}

impl Node {
    pub(crate) fn from_private(
        secret_key: [u8; 32],
        chain_code: [u8; 32],
        depth: u8,
        parent_fingerprint: u32,
        child_number: u32,
    ) -> Result<Self, secp256k1::Error> {
        let secp = Secp256k1::new();
        let key = SecretKey::from_slice(&secret_key)?;
        let public_key = PublicKey::from_secret_key(&secp, &key);
        let identifier = crypto::hash160(&public_key.serialize());
        Ok(Self {
            secret_key: Some(Zeroizing::new(secret_key)),
            public_key,
            chain_code,
            depth,
            parent_fingerprint,
            child_number,
            identifier,
        })
    }

    pub(crate) fn from_public(
        public_key: &[u8],
        chain_code: [u8; 32],
        depth: u8,
        parent_fingerprint: u32,
        child_number: u32,
    ) -> Result<Self, secp256k1::Error> {
        Ok(Self::from_public_point(
            PublicKey::from_slice(public_key)?,
            chain_code,
            depth,
            parent_fingerprint,
            child_number,
        ))
    }

    pub(crate) fn from_public_point(
        public_key: PublicKey,
        chain_code: [u8; 32],
        depth: u8,
        parent_fingerprint: u32,
        child_number: u32,
    ) -> Self {
        let identifier = crypto::hash160(&public_key.serialize());
        Self {
            secret_key: None,
            public_key,
            chain_code,
            depth,
            parent_fingerprint,
            child_number,
            identifier,
        }
    }

    pub fn is_private(&self) -> bool {
        self.secret_key.is_some()
    }

    /// Version bytes implied by the key material.
    pub fn version(&self) -> u32 {
        if self.is_private() {
            VERSION_MAINNET_PRIVATE
        } else {
            VERSION_MAINNET_PUBLIC
        }
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn parent_fingerprint(&self) -> u32 {
        self.parent_fingerprint
    }

    pub fn child_number(&self) -> u32 {
        self.child_number
    }

    pub fn chain_code(&self) -> &[u8; 32] {
        &self.chain_code
    }

    /// Compressed SEC1 public key.
    pub fn public_key(&self) -> [u8; 33] {
        self.public_key.serialize()
    }

    pub(crate) fn public_point(&self) -> PublicKey {
        self.public_key
    }

    pub fn secret_key(&self) -> Option<&[u8; 32]> {
        self.secret_key.as_deref()
    }

    /// 20-byte hash160 of the public key, the node's identity.
    pub fn identifier(&self) -> &Hash160 {
        &self.identifier
    }

    /// First four identifier bytes, big-endian.
    pub fn fingerprint(&self) -> u32 {
        u32::from_be_bytes([
            self.identifier[0],
            self.identifier[1],
            self.identifier[2],
            self.identifier[3],
        ])
    }

    /// Serialize the private form when the key is present, else the
    /// public form.
    pub fn to_bytes(&self) -> [u8; EXTENDED_KEY_LEN] {
        self.serialize_form(self.is_private())
    }

    pub fn to_bytes_public(&self) -> [u8; EXTENDED_KEY_LEN] {
        self.serialize_form(false)
    }

    /// Serialize the private form; `None` for a public-only node.
    pub fn to_bytes_private(&self) -> Option<[u8; EXTENDED_KEY_LEN]> {
        self.is_private().then(|| self.serialize_form(true))
    }

    fn serialize_form(&self, private: bool) -> [u8; EXTENDED_KEY_LEN] {
        let version = if private {
            VERSION_MAINNET_PRIVATE
        } else {
            VERSION_MAINNET_PUBLIC
        };
        let mut out = [0u8; EXTENDED_KEY_LEN];
        out[0..4].copy_from_slice(&version.to_be_bytes());
        out[4] = self.depth;
        out[5..9].copy_from_slice(&self.parent_fingerprint.to_be_bytes());
        out[9..13].copy_from_slice(&self.child_number.to_be_bytes());
        out[13..45].copy_from_slice(&self.chain_code);
        match (private, &self.secret_key) {
            (true, Some(secret)) => {
                out[45] = 0x00;
                out[46..78].copy_from_slice(&secret[..]);
            }
            _ => out[45..78].copy_from_slice(&self.public_key.serialize()),
        }
        out
    }
}

// Secret material stays out of debug output.
impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("fingerprint", &format_args!("{:#010x}", self.fingerprint()))
            .field("depth", &self.depth)
            .field("parent_fingerprint", &format_args!("{:#010x}", self.parent_fingerprint))
            .field("child_number", &self.child_number)
            .field("is_private", &self.is_private())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    // BIP-32 test vector 1 master key material
    const SECRET: [u8; 32] =
        hex!("e8f32e723decf4051aefac8e2c93c9c5b214313817cdb01a1494b917c8436b35");
    const CHAIN_CODE: [u8; 32] =
        hex!("873dff81c02f525623fd1fe5167eac3a55a049de3d314bb42ee227ffed37d508");

    #[test]
    fn test_private_node_derives_public_key() {
        let node = Node::from_private(SECRET, CHAIN_CODE, 0, 0, 0).unwrap();
        assert!(node.is_private());
        assert_eq!(
            node.public_key(),
            hex!("0339a36013301597daef41fbe593a02cc513d0b55527ec2df1050e2e8ff49c85c2")
        );
        assert_eq!(node.fingerprint(), 0x3442193e);
        assert_eq!(node.version(), VERSION_MAINNET_PRIVATE);
    }

    #[test]
    fn test_serialized_layout() {
        let node = Node::from_private(SECRET, CHAIN_CODE, 0, 0, 0).unwrap();
        let bytes = node.to_bytes();
        assert_eq!(bytes[0..4], VERSION_MAINNET_PRIVATE.to_be_bytes());
        assert_eq!(bytes[4], 0);
        assert_eq!(bytes[13..45], CHAIN_CODE);
        assert_eq!(bytes[45], 0x00);
        assert_eq!(bytes[46..78], SECRET);

        let public = node.to_bytes_public();
        assert_eq!(public[0..4], VERSION_MAINNET_PUBLIC.to_be_bytes());
        assert_eq!(public[45..78], node.public_key());
    }

    #[test]
    fn test_public_only_node_has_no_private_form() {
        let private = Node::from_private(SECRET, CHAIN_CODE, 0, 0, 0).unwrap();
        let public = Node::from_public(&private.public_key(), CHAIN_CODE, 0, 0, 0).unwrap();
        assert!(!public.is_private());
        assert_eq!(public.secret_key(), None);
        assert_eq!(public.to_bytes_private(), None);
        assert_eq!(public.to_bytes(), private.to_bytes_public());
        assert_eq!(public.fingerprint(), private.fingerprint());
    }

    #[test]
    fn test_debug_redacts_key_material() {
        let node = Node::from_private(SECRET, CHAIN_CODE, 0, 0, 0).unwrap();
        let rendered = format!("{node:?}");
        assert!(!rendered.contains("e8f32e72"));
        assert!(rendered.contains("0x3442193e"));
    }
}
