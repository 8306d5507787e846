//! Gap-limit account
//!
//! An [`Account`] owns one derived node and manages its two address
//! chains: external (`m/0/i`, receiving) and change (`m/1/i`). Addresses
//! are allocated in gap-sized bunches and published to an
//! [`AddressWatcher`]; observing use near the end of a window triggers the
//! next bunch, so there are always unused addresses beyond the highest
//! used index.

use std::collections::{BTreeMap, BTreeSet};

use coffer_core::derive::{self, DeriveError};
use coffer_core::{crypto, Hash160, Node};
use coffer_tx::signer::{KeyMaterial, KeyProvider};
use coffer_tx::{SignError, Transaction, TxError, TxOut};
use thiserror::Error;
use zeroize::Zeroizing;

/// Receives every (hash160, index) the account allocates, typically to
/// subscribe it with a block explorer.
pub trait AddressWatcher {
    fn watch_external(&mut self, hash160: Hash160, index: u32);
    fn watch_change(&mut self, hash160: Hash160, index: u32);
}

/// Gap sizes for the two chains.
#[derive(Debug, Clone, Copy)]
pub struct AccountConfig {
    pub external_gap: u32,
    pub change_gap: u32,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            external_gap: 8,
            change_gap: 8,
        }
    }
}

#[derive(Error, Debug)]
pub enum AccountError {
    #[error("account is watch-only; signing requires the private key")]
    WatchOnly,
    #[error(transparent)]
    Derive(#[from] DeriveError),
    #[error(transparent)]
    Sign(#[from] SignError),
    #[error(transparent)]
    Transaction(#[from] TxError),
}

#[derive(Clone, Copy)]
enum Chain {
    External = 0,
    Change = 1,
}

impl Chain {
    fn path(self, index: u32) -> String {
        format!("m/{}/{index}", self as u32)
    }
}

struct ChainWindow {
    gap: u32,
    start: u32,
    allocated: u32,
}

impl ChainWindow {
    fn new(gap: u32) -> Self {
        Self {
            gap,
            start: 0,
            allocated: 0,
        }
    }
}

/// A derived node plus its allocated address windows.
pub struct Account<W: AddressWatcher> {
    node: Node,
    watcher: W,
    external: ChainWindow,
    change: ChainWindow,
    next_change_index: u32,
    watched: BTreeSet<Hash160>,
}

impl<W: AddressWatcher> Account<W> {
    /// Build the account and allocate the initial bunch on each chain.
    pub fn new(node: Node, watcher: W, config: AccountConfig) -> Result<Self, AccountError> {
        let mut account = Self {
            node,
            watcher,
            external: ChainWindow::new(config.external_gap),
            change: ChainWindow::new(config.change_gap),
            next_change_index: 0,
            watched: BTreeSet::new(),
        };
        account.check_gap(Chain::External, 0)?;
        account.check_gap(Chain::Change, 0)?;
        Ok(account)
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn watcher(&self) -> &W {
        &self.watcher
    }

    pub fn external_address_count(&self) -> u32 {
        self.external.allocated
    }

    pub fn change_address_count(&self) -> u32 {
        self.change.allocated
    }

    pub fn is_address_watched(&self, hash160: &Hash160) -> bool {
        self.watched.contains(hash160)
    }

    /// A transaction touched external address `index`.
    pub fn notify_external_used(&mut self, index: u32) -> Result<(), AccountError> {
        self.check_gap(Chain::External, index)
    }

    /// A transaction touched change address `index`.
    pub fn notify_change_used(&mut self, index: u32) -> Result<(), AccountError> {
        if index >= self.next_change_index {
            self.next_change_index = index + 1;
        }
        self.check_gap(Chain::Change, index)
    }

    /// hash160 of the change address the next spend will use. Peeking has
    /// no side effects; the index advances when a signed transaction
    /// actually consumes a change output.
    pub fn next_unused_change_address(&self) -> Result<Hash160, AccountError> {
        let node = derive::derive_path(&self.node, &Chain::Change.path(self.next_change_index))?;
        Ok(crypto::hash160(&node.public_key()))
    }

    /// Build and sign a spend of `unspent` to `recipients`, change to this
    /// account's change chain.
    pub fn create_transaction(
        &mut self,
        recipients: &[TxOut],
        unspent: &[TxOut],
        fee: u64,
    ) -> Result<Vec<u8>, AccountError> {
        if !self.node.is_private() {
            return Err(AccountError::WatchOnly);
        }
        let change_address = self.next_unused_change_address()?;
        let keys = self.session_keys()?;
        let raw = coffer_tx::sign_transaction(&keys, unspent, recipients, &change_address, fee)?;

        // an extra output means the change address was consumed; move past
        // it immediately rather than waiting for confirmation
        let outputs = Transaction::parse(&raw)?.outputs().len();
        if outputs > recipients.len() {
            self.notify_change_used(self.next_change_index)?;
        }
        Ok(raw)
    }

    /// Materialize signing keys for every allocated address on both
    /// chains. The map zeroizes its secrets on drop.
    fn session_keys(&self) -> Result<BTreeMap<Hash160, KeyMaterial>, AccountError> {
        let mut keys = BTreeMap::new();
        for (chain, window) in [
            (Chain::External, &self.external),
            (Chain::Change, &self.change),
        ] {
            for index in window.start..window.start + window.allocated {
                let node = derive::derive_path(&self.node, &chain.path(index))?;
                let secret = node.secret_key().ok_or(AccountError::WatchOnly)?;
                keys.insert(
                    crypto::hash160(&node.public_key()),
                    KeyMaterial {
                        public_key: node.public_key(),
                        secret_key: Zeroizing::new(*secret),
                    },
                );
            }
        }
        Ok(keys)
    }

    fn check_gap(&mut self, chain: Chain, index: u32) -> Result<(), AccountError> {
        let window = match chain {
            Chain::External => &mut self.external,
            Chain::Change => &mut self.change,
        };
        // highest used index must leave a full gap of unused addresses
        let desired = u64::from(index) + u64::from(window.gap) - u64::from(window.start) + 1;
        if desired > u64::from(window.allocated) {
            let start = window.start + window.allocated;
            let count = window.gap;
            window.allocated += count;
            self.allocate_bunch(chain, start, count)?;
        }
        Ok(())
    }

    fn allocate_bunch(&mut self, chain: Chain, start: u32, count: u32) -> Result<(), AccountError> {
        log::info!(
            "account {:#010x}: allocating {count} chain-{} addresses from index {start}",
            self.node.fingerprint(),
            chain as u32
        );
        for index in start..start + count {
            let node = derive::derive_path(&self.node, &chain.path(index))?;
            let hash160 = crypto::hash160(&node.public_key());
            self.watched.insert(hash160);
            match chain {
                Chain::External => self.watcher.watch_external(hash160, index),
                Chain::Change => self.watcher.watch_change(hash160, index),
            }
        }
        Ok(())
    }
}

impl<W: AddressWatcher> KeyProvider for Account<W> {
    /// Derive on demand across both allocated windows; prefer
    /// [`Account::create_transaction`], which materializes a session map
    /// once instead.
    fn keys_for_address(&self, hash160: &Hash160) -> Option<KeyMaterial> {
        self.session_keys()
            .ok()
            .and_then(|keys| keys.keys_for_address(hash160))
    }
}
