//! Coffer Ledger
//!
//! An in-memory, small-scale view of the chain: raw transactions go in,
//! unspent outputs and per-address balances come out.
//!
//! Every `add_transaction` re-derives the whole dependent state (spent
//! flags, the unspent set, balances, and transaction counts) from the
//! complete store, so out-of-order arrival, a parent landing after its
//! spender, converges to the same answer as in-order arrival.

pub mod account;

pub use account::{Account, AccountConfig, AccountError, AddressWatcher};

use std::collections::{BTreeMap, BTreeSet};

use coffer_core::Hash160;
use coffer_tx::{Transaction, TxError, TxHash, TxOut};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("rejected transaction: {0}")]
    Transaction(#[from] TxError),
}

/// Transaction store plus the views derived from it.
#[derive(Default)]
pub struct Ledger {
    max_block_height: u64,
    block_timestamps: BTreeMap<u64, u64>,
    tx_heights: BTreeMap<TxHash, u64>,
    transactions: BTreeMap<TxHash, Transaction>,
    balances: BTreeMap<Hash160, u64>,
    tx_counts: BTreeMap<Hash160, u64>,
    unspent: Vec<TxOut>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_block_height(&self) -> u64 {
        self.max_block_height
    }

    /// Record a block's timestamp and advance the tip height.
    pub fn confirm_block(&mut self, height: u64, timestamp: u64) {
        self.block_timestamps.insert(height, timestamp);
        if height > self.max_block_height {
            self.max_block_height = height;
        }
    }

    /// Timestamp of `height`, or 0 when unknown.
    pub fn block_timestamp(&self, height: u64) -> u64 {
        self.block_timestamps.get(&height).copied().unwrap_or(0)
    }

    /// Parse and store a raw transaction, then rebuild every derived view.
    pub fn add_transaction(&mut self, raw: &[u8]) -> Result<TxHash, LedgerError> {
        let tx = Transaction::parse(raw)?;
        let hash = tx.hash();
        log::debug!(
            "ledger: adding transaction {} ({} in, {} out)",
            hex_hash(&hash),
            tx.inputs().len(),
            tx.outputs().len()
        );
        self.transactions.insert(hash, tx);

        self.mark_spent_outputs();
        self.rebuild_unspent();
        self.rebuild_balances();
        self.rebuild_tx_counts();
        Ok(hash)
    }

    /// Record the block height a transaction confirmed at.
    pub fn confirm_transaction(&mut self, hash: &TxHash, height: u64) {
        self.tx_heights.insert(*hash, height);
    }

    /// Confirmation height of `hash`, or 0 when unconfirmed/unknown.
    pub fn transaction_height(&self, hash: &TxHash) -> u64 {
        self.tx_heights.get(hash).copied().unwrap_or(0)
    }

    pub fn contains_transaction(&self, hash: &TxHash) -> bool {
        self.transactions.contains_key(hash)
    }

    /// Unspent outputs whose signing address is in `filter`; all of them
    /// when the filter is empty.
    pub fn unspent_outputs(&self, filter: &BTreeSet<Hash160>) -> Vec<TxOut> {
        self.unspent
            .iter()
            .filter(|txo| {
                filter.is_empty()
                    || txo
                        .signing_address()
                        .is_some_and(|address| filter.contains(&address))
            })
            .cloned()
            .collect()
    }

    /// Sum of unspent output values paying `address`.
    pub fn address_balance(&self, address: &Hash160) -> u64 {
        self.balances.get(address).copied().unwrap_or(0)
    }

    /// Number of stored transactions touching `address` (as recipient or
    /// as the owner of a consumed output).
    pub fn address_tx_count(&self, address: &Hash160) -> u64 {
        self.tx_counts.get(address).copied().unwrap_or(0)
    }

    fn mark_spent_outputs(&mut self) {
        let spends: Vec<(TxHash, u32)> = self
            .transactions
            .values()
            .flat_map(|tx| {
                tx.inputs()
                    .iter()
                    .map(|input| (input.prev_hash, input.prev_index))
            })
            .collect();
        for (hash, index) in spends {
            if let Some(parent) = self.transactions.get_mut(&hash) {
                parent.mark_output_spent(index);
            }
        }
    }

    fn rebuild_unspent(&mut self) {
        self.unspent.clear();
        for (hash, tx) in &self.transactions {
            for (index, output) in tx.outputs().iter().enumerate() {
                if !output.is_spent() {
                    self.unspent.push(TxOut::unspent(
                        output.value,
                        output.script.clone(),
                        index as u32,
                        *hash,
                    ));
                }
            }
        }
    }

    fn rebuild_balances(&mut self) {
        self.balances.clear();
        for txo in &self.unspent {
            if let Some(address) = txo.signing_address() {
                *self.balances.entry(address).or_insert(0) += txo.value;
            }
        }
    }

    fn rebuild_tx_counts(&mut self) {
        self.tx_counts.clear();
        for tx in self.transactions.values() {
            for output in tx.outputs() {
                if let Some(address) = output.signing_address() {
                    *self.tx_counts.entry(address).or_insert(0) += 1;
                }
            }
            for input in tx.inputs() {
                let Some(parent) = self.transactions.get(&input.prev_hash) else {
                    continue;
                };
                if let Some(address) = parent
                    .outputs()
                    .get(input.prev_index as usize)
                    .and_then(TxOut::signing_address)
                {
                    *self.tx_counts.entry(address).or_insert(0) += 1;
                }
            }
        }
    }
}

fn hex_hash(hash: &TxHash) -> String {
    hash.iter().map(|byte| format!("{byte:02x}")).collect()
}
