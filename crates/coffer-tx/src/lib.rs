//! Coffer transaction layer
//!
//! The version-1 Bitcoin transaction wire format: parsing, serialization,
//! and the P2PKH signing protocol.
//!
//! Transaction hashes are kept in internal order (byte-reversed from the
//! wire), matching how explorers display them.

pub mod script;
pub mod signer;
pub mod wire;

pub use signer::{sign_transaction, KeyMaterial, KeyProvider, SignError};

use coffer_core::{crypto, Hash160};
use thiserror::Error;

use wire::Reader;

/// Transaction hash in internal (display) byte order.
pub type TxHash = [u8; 32];

/// Sequence number marking an input final.
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;

/// The only transaction version this layer understands.
const SUPPORTED_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum TxError {
    #[error("transaction data ended unexpectedly")]
    Truncated,
    #[error("unsupported transaction version {0}")]
    UnsupportedVersion(u32),
    #[error("{0} trailing bytes after transaction")]
    TrailingBytes(usize),
}

/// One transaction input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxIn {
    /// Hash of the funding transaction, internal order.
    pub prev_hash: TxHash,
    /// Output index within the funding transaction.
    pub prev_index: u32,
    /// Script: the signing script while unsigned, the script_sig once
    /// signed, arbitrary bytes for a coinbase.
    pub script: Vec<u8>,
    pub sequence: u32,
    signing_address: Option<Hash160>,
}

impl TxIn {
    /// A coinbase input: all-zero previous hash, maximal index, free-form
    /// script.
    pub fn coinbase(message: &[u8]) -> Self {
        Self {
            prev_hash: [0u8; 32],
            prev_index: u32::MAX,
            script: message.to_vec(),
            sequence: SEQUENCE_FINAL,
            signing_address: None,
        }
    }

    /// An input spending `prev_hash:prev_index`, carrying the previous
    /// output's script as its signing script.
    pub fn spending(
        prev_hash: TxHash,
        prev_index: u32,
        script: Vec<u8>,
        signing_address: Option<Hash160>,
    ) -> Self {
        Self {
            prev_hash,
            prev_index,
            script,
            sequence: SEQUENCE_FINAL,
            signing_address,
        }
    }

    /// An input spending output `index` of `tx`.
    pub fn from_output(tx: &Transaction, index: u32) -> Self {
        let script = tx
            .outputs()
            .get(index as usize)
            .map(|output| output.script.clone())
            .unwrap_or_default();
        Self::spending(tx.hash(), index, script, None)
    }

    /// hash160 expected to sign this input, when known.
    pub fn signing_address(&self) -> Option<&Hash160> {
        self.signing_address.as_ref()
    }

    pub(crate) fn set_script(&mut self, script: Vec<u8>) {
        self.script = script;
    }

    fn parse(reader: &mut Reader) -> Result<Self, TxError> {
        let mut prev_hash: TxHash = reader.take(32)?.try_into().expect("32 bytes");
        prev_hash.reverse();
        let prev_index = reader.read_u32()?;
        let script_len = reader.read_var_int()? as usize;
        let script = reader.take(script_len)?.to_vec();
        let sequence = reader.read_u32()?;
        Ok(Self {
            prev_hash,
            prev_index,
            script,
            sequence,
            signing_address: None,
        })
    }

    fn serialize_into(&self, out: &mut Vec<u8>, script: &[u8]) {
        let mut wire_hash = self.prev_hash;
        wire_hash.reverse();
        out.extend_from_slice(&wire_hash);
        wire::put_u32(out, self.prev_index);
        wire::put_bytes_with_size(out, script);
        wire::put_u32(out, self.sequence);
    }
}

/// One transaction output, optionally carrying its provenance when it
/// stands alone as an unspent output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOut {
    /// Value in satoshis.
    pub value: u64,
    pub script: Vec<u8>,
    provenance: Option<(TxHash, u32)>,
    spent: bool,
}

impl TxOut {
    /// A P2PKH output paying `value` to `hash160`.
    pub fn to_address(value: u64, hash160: &Hash160) -> Self {
        Self {
            value,
            script: script::p2pkh_script(hash160),
            provenance: None,
            spent: false,
        }
    }

    /// An unspent output recorded with the transaction and index it came
    /// from.
    pub fn unspent(value: u64, script: Vec<u8>, index: u32, tx_hash: TxHash) -> Self {
        Self {
            value,
            script,
            provenance: Some((tx_hash, index)),
            spent: false,
        }
    }

    /// hash160 embedded in a recognized P2PKH/P2SH script.
    pub fn signing_address(&self) -> Option<Hash160> {
        script::signing_address(&self.script)
    }

    pub fn provenance(&self) -> Option<(TxHash, u32)> {
        self.provenance
    }

    pub fn is_spent(&self) -> bool {
        self.spent
    }

    pub(crate) fn mark_spent(&mut self) {
        self.spent = true;
    }

    fn parse(reader: &mut Reader) -> Result<Self, TxError> {
        let value = reader.read_u64()?;
        let script_len = reader.read_var_int()? as usize;
        let script = reader.take(script_len)?.to_vec();
        Ok(Self {
            value,
            script,
            provenance: None,
            spent: false,
        })
    }

    fn serialize_into(&self, out: &mut Vec<u8>) {
        wire::put_u64(out, self.value);
        wire::put_bytes_with_size(out, &self.script);
    }
}

/// A version-1 transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transaction {
    inputs: Vec<TxIn>,
    outputs: Vec<TxOut>,
    lock_time: u32,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the wire form. The whole buffer must be consumed.
    pub fn parse(bytes: &[u8]) -> Result<Self, TxError> {
        let mut reader = Reader::new(bytes);
        let version = reader.read_u32()?;
        if version != SUPPORTED_VERSION {
            return Err(TxError::UnsupportedVersion(version));
        }

        let input_count = reader.read_var_int()?;
        let mut inputs = Vec::new();
        for _ in 0..input_count {
            inputs.push(TxIn::parse(&mut reader)?);
        }

        let output_count = reader.read_var_int()?;
        let mut outputs = Vec::new();
        for _ in 0..output_count {
            outputs.push(TxOut::parse(&mut reader)?);
        }

        let lock_time = reader.read_u32()?;
        if reader.remaining() != 0 {
            return Err(TxError::TrailingBytes(reader.remaining()));
        }
        Ok(Self {
            inputs,
            outputs,
            lock_time,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        self.serialize_with_scripts(|_, input| &input.script)
    }

    /// SIGHASH preimage body for input `active`: every other input's
    /// script is emitted empty. The caller appends the 4-byte hash type.
    pub fn serialize_for_input(&self, active: usize) -> Vec<u8> {
        self.serialize_with_scripts(|index, input| {
            if index == active {
                &input.script
            } else {
                &[]
            }
        })
    }

    fn serialize_with_scripts<'a, F>(&'a self, script_for: F) -> Vec<u8>
    where
        F: Fn(usize, &'a TxIn) -> &'a [u8],
    {
        let mut out = Vec::new();
        wire::put_u32(&mut out, SUPPORTED_VERSION);
        wire::put_var_int(&mut out, self.inputs.len() as u64);
        for (index, input) in self.inputs.iter().enumerate() {
            input.serialize_into(&mut out, script_for(index, input));
        }
        wire::put_var_int(&mut out, self.outputs.len() as u64);
        for output in &self.outputs {
            output.serialize_into(&mut out);
        }
        wire::put_u32(&mut out, self.lock_time);
        out
    }

    /// Double-SHA-256 of the wire form, byte-reversed to internal order.
    pub fn hash(&self) -> TxHash {
        let mut hash = crypto::double_sha256(&self.serialize());
        hash.reverse();
        hash
    }

    pub fn version(&self) -> u32 {
        SUPPORTED_VERSION
    }

    pub fn lock_time(&self) -> u32 {
        self.lock_time
    }

    pub fn inputs(&self) -> &[TxIn] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TxOut] {
        &self.outputs
    }

    pub fn add_input(&mut self, input: TxIn) {
        self.inputs.push(input);
    }

    pub fn add_output(&mut self, output: TxOut) {
        self.outputs.push(output);
    }

    pub(crate) fn inputs_mut(&mut self) -> &mut [TxIn] {
        &mut self.inputs
    }

    /// Flag output `index` as consumed by some known input.
    pub fn mark_output_spent(&mut self, index: u32) {
        if let Some(output) = self.outputs.get_mut(index as usize) {
            output.mark_spent();
        }
    }
}
