//! Output-script construction and recognition
//!
//! Exactly two script shapes carry a spendable address here: standard
//! pay-to-pubkey-hash and pay-to-script-hash. Everything else yields no
//! signing address and cannot be spent by this wallet.

use coffer_core::Hash160;

const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xa9;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xac;
const OP_EQUAL: u8 = 0x87;
const PUSH_20: u8 = 0x14;

/// Standard 25-byte P2PKH output script:
/// `OP_DUP OP_HASH160 <20 bytes> OP_EQUALVERIFY OP_CHECKSIG`.
pub fn p2pkh_script(hash160: &Hash160) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.extend_from_slice(&[OP_DUP, OP_HASH160, PUSH_20]);
    script.extend_from_slice(hash160);
    script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
    script
}

/// Extract the hash160 from a recognized output script, if any.
pub fn signing_address(script: &[u8]) -> Option<Hash160> {
    match script {
        // P2PKH, 25 bytes
        [OP_DUP, OP_HASH160, PUSH_20, hash @ .., OP_EQUALVERIFY, OP_CHECKSIG]
            if hash.len() == 20 =>
        {
            hash.try_into().ok()
        }
        // P2SH, 23 bytes
        [OP_HASH160, PUSH_20, hash @ .., OP_EQUAL] if hash.len() == 20 => hash.try_into().ok(),
        _ => None,
    }
}
