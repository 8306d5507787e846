//! P2PKH transaction signing
//!
//! Builds and signs a spend in one pass: select unspent outputs to cover
//! value plus fee, compose recipient and change outputs, then sign every
//! input under SIGHASH_ALL. Keys are supplied through the [`KeyProvider`]
//! capability, so the signer never walks a key tree itself.

use std::collections::BTreeMap;

use coffer_core::{crypto, Hash160};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::{wire, Transaction, TxIn, TxOut};

/// Appended to the sighash preimage, and to every signature, to commit to
/// all inputs and outputs.
const SIGHASH_ALL: u32 = 1;

/// Key pair for one signing address.
#[derive(Clone)]
pub struct KeyMaterial {
    /// Compressed public key.
    pub public_key: [u8; 33],
    pub secret_key: Zeroizing<[u8; 32]>,
}

/// Answers `hash160 -> key pair` lookups during signing.
pub trait KeyProvider {
    fn keys_for_address(&self, hash160: &Hash160) -> Option<KeyMaterial>;
}

/// A plain map works as a per-session provider.
impl KeyProvider for BTreeMap<Hash160, KeyMaterial> {
    fn keys_for_address(&self, hash160: &Hash160) -> Option<KeyMaterial> {
        self.get(hash160).cloned()
    }
}

#[derive(Error, Debug)]
pub enum SignError {
    #[error("unspent outputs cannot cover the requested value plus fee")]
    InsufficientFunds,
    #[error("no signing key available for a selected output")]
    KeyNotFound,
    #[error("selected unspent output carries no provenance")]
    MissingProvenance,
    #[error("signing failed: {0}")]
    Signature(#[from] secp256k1::Error),
}

/// Build and sign a transaction spending `unspent` to `recipients`.
///
/// Outputs are consumed from the back of `unspent`; any excess over value
/// plus fee goes to a single P2PKH change output (omitted when zero).
/// Returns the fully signed wire serialization.
pub fn sign_transaction(
    provider: &dyn KeyProvider,
    unspent: &[TxOut],
    recipients: &[TxOut],
    change_address: &Hash160,
    fee: u64,
) -> Result<Vec<u8>, SignError> {
    let value = recipients.iter().map(|txo| txo.value).sum::<u64>();
    let (selected, change_value) = select_outputs(unspent, value, fee)?;

    let mut tx = Transaction::new();
    for recipient in recipients {
        tx.add_output(recipient.clone());
    }
    if change_value > 0 {
        tx.add_output(TxOut::to_address(change_value, change_address));
    }

    for txo in &selected {
        let (prev_hash, prev_index) = txo.provenance().ok_or(SignError::MissingProvenance)?;
        tx.add_input(TxIn::spending(
            prev_hash,
            prev_index,
            txo.script.clone(),
            txo.signing_address(),
        ));
    }

    // one lookup per distinct signing address
    let mut keys: BTreeMap<Hash160, KeyMaterial> = BTreeMap::new();
    for input in tx.inputs() {
        let address = *input.signing_address().ok_or(SignError::KeyNotFound)?;
        if !keys.contains_key(&address) {
            let material = provider
                .keys_for_address(&address)
                .ok_or(SignError::KeyNotFound)?;
            keys.insert(address, material);
        }
    }

    // sign each input against the preimage in which only its own script
    // is present
    let mut script_sigs = Vec::with_capacity(tx.inputs().len());
    for (index, input) in tx.inputs().iter().enumerate() {
        let address = input.signing_address().ok_or(SignError::KeyNotFound)?;
        let material = keys.get(address).ok_or(SignError::KeyNotFound)?;

        let mut preimage = tx.serialize_for_input(index);
        wire::put_u32(&mut preimage, SIGHASH_ALL);
        let digest = crypto::double_sha256(&preimage);
        let signature = crypto::sign(&material.secret_key, &digest)?;

        let mut script_sig = Vec::with_capacity(signature.len() + 36);
        wire::put_var_int(&mut script_sig, (signature.len() + 1) as u64);
        script_sig.extend_from_slice(&signature);
        script_sig.push(SIGHASH_ALL as u8);
        wire::put_bytes_with_size(&mut script_sig, &material.public_key);
        script_sigs.push(script_sig);
    }

    for (input, script_sig) in tx.inputs_mut().iter_mut().zip(script_sigs) {
        input.set_script(script_sig);
    }
    Ok(tx.serialize())
}

/// Walk `unspent` from the back, accumulating until `value + fee` is
/// covered. Returns the selection and the change amount.
fn select_outputs(
    unspent: &[TxOut],
    value: u64,
    fee: u64,
) -> Result<(Vec<TxOut>, u64), SignError> {
    let mut required = value
        .checked_add(fee)
        .ok_or(SignError::InsufficientFunds)?;
    let mut selected = Vec::new();
    let mut change = 0;
    for txo in unspent.iter().rev() {
        if required == 0 {
            break;
        }
        selected.push(txo.clone());
        if required >= txo.value {
            required -= txo.value;
        } else {
            change = txo.value - required;
            required = 0;
        }
    }
    if required != 0 {
        return Err(SignError::InsufficientFunds);
    }
    Ok((selected, change))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn unspent(value: u64, index: u32) -> TxOut {
        let address: Hash160 = hex!("77d896b0f85f72ae0f3d0487c432b23c28b71493");
        TxOut::unspent(
            value,
            crate::script::p2pkh_script(&address),
            index,
            [index as u8; 32],
        )
    }

    #[test]
    fn test_selection_walks_in_reverse() {
        let pool = vec![unspent(10, 0), unspent(20, 1), unspent(30, 2)];
        let (selected, change) = select_outputs(&pool, 25, 0).unwrap();
        // takes the last output first, then the one before it
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].value, 30);
        assert_eq!(selected[1].value, 20);
        assert_eq!(change, 25);
    }

    #[test]
    fn test_exact_cover_has_no_change() {
        let pool = vec![unspent(25, 0)];
        let (selected, change) = select_outputs(&pool, 20, 5).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(change, 0);
    }

    #[test]
    fn test_insufficient_funds() {
        let pool = vec![unspent(10, 0), unspent(20, 1)];
        assert!(matches!(
            select_outputs(&pool, 31, 0),
            Err(SignError::InsufficientFunds)
        ));
        assert!(matches!(
            select_outputs(&pool, 30, 1),
            Err(SignError::InsufficientFunds)
        ));
        assert!(matches!(
            select_outputs(&pool, u64::MAX, 1),
            Err(SignError::InsufficientFunds)
        ));
    }

    #[test]
    fn test_missing_key_surfaces() {
        let provider: BTreeMap<Hash160, KeyMaterial> = BTreeMap::new();
        let recipient = TxOut::to_address(1000, &[1u8; 20]);
        let result = sign_transaction(&provider, &[unspent(5000, 0)], &[recipient], &[2u8; 20], 0);
        assert!(matches!(result, Err(SignError::KeyNotFound)));
    }
}
