use super::block::{Block, GENESIS_HASH};
use super::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Fixed hex prefix a block hash must carry to satisfy proof-of-work.
pub const DIFFICULTY: &str = "000";

/// The authoritative chain state at a node: committed blocks plus the
/// mempool of accepted-but-unmined transactions.
///
/// All mutating operations return a plain bool; rejection of duplicates,
/// insolvent spends and invalid blocks is an expected outcome, not an error.
/// Callers serialize access (the node keeps the whole structure behind one
/// lock), so the struct itself carries no synchronization.
pub struct Blockchain {
    chain: Vec<Block>,
    pending_transactions: Vec<Transaction>,
    pending_ids: HashSet<String>,
}

/// Wire form of a node's full state, exchanged in chain responses:
/// `{chain, pending_transactions}`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChainSnapshot {
    pub chain: Vec<Block>,
    pub pending_transactions: Vec<Transaction>,
}

impl Blockchain {
    pub fn new() -> Blockchain {
        Blockchain {
            chain: vec![Block::genesis()],
            pending_transactions: Vec::new(),
            pending_ids: HashSet::new(),
        }
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn last_block(&self) -> &Block {
        self.chain.last().expect("chain always starts at genesis")
    }

    pub fn height(&self) -> usize {
        self.chain.len()
    }

    pub fn pending_transactions(&self) -> &[Transaction] {
        &self.pending_transactions
    }

    /// Net confirmed balance: everything received minus everything sent,
    /// over committed blocks only.
    pub fn get_balance(&self, address: &str) -> f64 {
        let mut balance = 0.0;
        for block in &self.chain {
            for tx in block.transactions() {
                if tx.recipient() == address {
                    balance += tx.amount();
                }
                if tx.sender() == address {
                    balance -= tx.amount();
                }
            }
        }
        balance
    }

    /// Confirmed balance minus the mempool's outgoing total for `address`,
    /// i.e. what the address can still promise to spend.
    pub fn get_available_balance(&self, address: &str) -> f64 {
        let pending_sent: f64 = self
            .pending_transactions
            .iter()
            .filter(|tx| tx.sender() == address)
            .map(Transaction::amount)
            .sum();
        self.get_balance(address) - pending_sent
    }

    fn is_confirmed(&self, id: &str) -> bool {
        self.chain
            .iter()
            .any(|block| block.transactions().iter().any(|tx| tx.id() == id))
    }

    /// Accept a transaction into the mempool.
    ///
    /// Rejected when the id is already pending, already confirmed in any
    /// block, or when a non-system sender cannot cover the amount with its
    /// available balance.
    pub fn add_transaction(&mut self, transaction: Transaction) -> bool {
        if self.pending_ids.contains(transaction.id()) {
            debug!(id = transaction.id(), "transaction already pending");
            return false;
        }
        if self.is_confirmed(transaction.id()) {
            debug!(id = transaction.id(), "transaction already confirmed");
            return false;
        }
        if !transaction.is_system()
            && self.get_available_balance(transaction.sender()) < transaction.amount()
        {
            debug!(
                sender = transaction.sender(),
                amount = transaction.amount(),
                "insufficient available balance"
            );
            return false;
        }
        self.pending_ids.insert(transaction.id().to_string());
        self.pending_transactions.push(transaction);
        true
    }

    /// Structural and proof-of-work checks for a block extending the
    /// current tip: next index, linked to the tip hash, difficulty prefix,
    /// and a hash that recomputes to itself.
    pub fn is_valid_block(&self, block: &Block) -> bool {
        if block.index() != self.chain.len() as u64 {
            return false;
        }
        if block.previous_hash() != self.last_block().hash() {
            return false;
        }
        if !block.is_valid_hash(DIFFICULTY) {
            return false;
        }
        if block.hash() != block.calculate_hash() {
            return false;
        }
        true
    }

    /// Commit a block. On success every transaction the block confirms is
    /// swept out of the mempool in one pass.
    pub fn add_block(&mut self, block: Block) -> bool {
        if !self.is_valid_block(&block) {
            return false;
        }
        {
            let confirmed: HashSet<&str> =
                block.transactions().iter().map(Transaction::id).collect();
            self.pending_transactions
                .retain(|tx| !confirmed.contains(tx.id()));
            for id in confirmed {
                self.pending_ids.remove(id);
            }
        }
        self.chain.push(block);
        true
    }

    /// Whether `chain` is a well-formed chain on its own: non-empty, rooted
    /// at the canonical genesis, and every link satisfying the hash,
    /// proof-of-work and recomputation conditions.
    pub fn is_valid_chain(chain: &[Block]) -> bool {
        let Some(first) = chain.first() else {
            return false;
        };
        if first.hash() != GENESIS_HASH.as_str() {
            return false;
        }
        for window in chain.windows(2) {
            let previous = &window[0];
            let current = &window[1];
            if current.previous_hash() != previous.hash() {
                return false;
            }
            if current.hash() != current.calculate_hash() {
                return false;
            }
            if !current.is_valid_hash(DIFFICULTY) {
                return false;
            }
        }
        true
    }

    /// Adopt `candidate` when it is strictly longer than the current chain
    /// and valid. Equal length keeps the incumbent.
    ///
    /// After adoption the mempool is re-checked against the new chain:
    /// transactions it already confirms are dropped, as are transactions
    /// whose sender is no longer solvent under the new confirmed balances.
    pub fn replace_chain(&mut self, candidate: Vec<Block>) -> bool {
        if candidate.len() <= self.chain.len() {
            return false;
        }
        if !Self::is_valid_chain(&candidate) {
            return false;
        }
        self.chain = candidate;
        self.prune_pending();
        true
    }

    fn prune_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending_transactions);
        self.pending_ids.clear();
        let mut outgoing: HashMap<String, f64> = HashMap::new();
        for tx in pending {
            if self.is_confirmed(tx.id()) {
                debug!(id = tx.id(), "dropping pending transaction confirmed by adopted chain");
                continue;
            }
            if !tx.is_system() {
                let spent = outgoing.get(tx.sender()).copied().unwrap_or(0.0);
                if self.get_balance(tx.sender()) - spent < tx.amount() {
                    debug!(id = tx.id(), "dropping pending transaction insolvent on adopted chain");
                    continue;
                }
                *outgoing.entry(tx.sender().to_string()).or_insert(0.0) += tx.amount();
            }
            self.pending_ids.insert(tx.id().to_string());
            self.pending_transactions.push(tx);
        }
    }

    /// Mempool ordered by amount descending, ties keeping arrival order.
    /// This is the block-assembly priority used when mining.
    pub fn mining_candidates(&self) -> Vec<Transaction> {
        let mut candidates = self.pending_transactions.clone();
        candidates.sort_by(|a, b| {
            b.amount()
                .partial_cmp(&a.amount())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates
    }

    /// Whether the address has ever been seen, confirmed or pending.
    pub fn address_exists(&self, address: &str) -> bool {
        let in_chain = self.chain.iter().any(|block| {
            block
                .transactions()
                .iter()
                .any(|tx| tx.sender() == address || tx.recipient() == address)
        });
        in_chain
            || self
                .pending_transactions
                .iter()
                .any(|tx| tx.sender() == address || tx.recipient() == address)
    }

    pub fn snapshot(&self) -> ChainSnapshot {
        ChainSnapshot {
            chain: self.chain.clone(),
            pending_transactions: self.pending_transactions.clone(),
        }
    }
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}
