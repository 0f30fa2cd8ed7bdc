//! Parallel proof-of-work search.
//!
//! The nonce space is partitioned in an interleaved fashion: worker `i`
//! tries `i, i + W, i + 2W, ...` so no two workers ever hash the same
//! candidate. Each worker owns its candidate block and the inner loop takes
//! no locks; the only shared state is the stop flag and the found-block
//! slot, which accepts the first finder and signals everyone else to quit.

use crate::domain::{Block, DIFFICULTY, Transaction};
use crate::error::Result;
use crate::util::current_timestamp;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{debug, info};

/// Number of concurrent search threads.
pub const WORKERS: usize = 4;
/// Attempts between progress callbacks, per worker.
pub const PROGRESS_INTERVAL: u64 = 5000;

#[derive(Clone)]
pub struct Miner {
    miner_address: String,
    mining: Arc<AtomicBool>,
}

impl Miner {
    pub fn new(miner_address: impl Into<String>) -> Miner {
        Miner {
            miner_address: miner_address.into(),
            mining: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn miner_address(&self) -> &str {
        &self.miner_address
    }

    pub fn is_mining(&self) -> bool {
        self.mining.load(Ordering::SeqCst)
    }

    /// Ask the workers to stop. Cooperative: each worker observes the flag
    /// between hash attempts, so the latency is bounded by one hash.
    pub fn stop_mining(&self) {
        self.mining.store(false, Ordering::SeqCst);
    }

    /// Search for a nonce that gives the assembled block the difficulty
    /// prefix.
    ///
    /// The coinbase reward for this miner is prepended to `transactions`.
    /// `block_index` and `previous_hash` are the caller's snapshot of the
    /// chain tip; if the tip advances while the search runs the resulting
    /// block will simply be rejected on commit. Returns `None` when the
    /// search was stopped before any worker published a block.
    pub fn mine_block(
        &self,
        block_index: u64,
        previous_hash: String,
        transactions: Vec<Transaction>,
        on_progress: Option<&(dyn Fn(u64) + Sync)>,
    ) -> Result<Option<Block>> {
        let mut batch = Vec::with_capacity(transactions.len() + 1);
        batch.push(Transaction::coinbase(&self.miner_address)?);
        batch.extend(transactions);

        let template = Block::new(
            block_index,
            previous_hash,
            batch,
            0,
            current_timestamp(),
        )?;

        info!(
            index = block_index,
            transactions = template.transaction_count(),
            "mining started"
        );
        self.mining.store(true, Ordering::SeqCst);
        let found: Mutex<Option<Block>> = Mutex::new(None);

        thread::scope(|scope| {
            for worker_id in 0..WORKERS {
                let mut candidate = template.clone();
                candidate.set_nonce(worker_id as u64);
                let found = &found;
                let mining = &self.mining;
                scope.spawn(move || {
                    let mut attempts: u64 = 0;
                    while mining.load(Ordering::SeqCst) {
                        if candidate.is_valid_hash(DIFFICULTY) {
                            debug!(worker_id, nonce = candidate.nonce(), "worker found a block");
                            let mut slot = found.lock().unwrap();
                            if slot.is_none() {
                                *slot = Some(candidate);
                            }
                            mining.store(false, Ordering::SeqCst);
                            return;
                        }
                        let next = candidate.nonce() + WORKERS as u64;
                        candidate.set_nonce(next);
                        attempts += 1;
                        if attempts % PROGRESS_INTERVAL == 0 {
                            if let Some(progress) = on_progress {
                                progress(candidate.nonce());
                            }
                        }
                    }
                });
            }
        });

        self.mining.store(false, Ordering::SeqCst);
        let mined = found.into_inner().unwrap();
        match &mined {
            Some(block) => info!(hash = block.hash(), nonce = block.nonce(), "block mined"),
            None => info!("mining stopped before a block was found"),
        }
        Ok(mined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Blockchain, MINING_REWARD};

    #[test]
    fn mined_blocks_satisfy_the_difficulty_prefix() {
        let chain = Blockchain::new();
        let miner = Miner::new("minerador");
        let block = miner
            .mine_block(
                chain.height() as u64,
                chain.last_block().hash().to_string(),
                vec![],
                None,
            )
            .unwrap()
            .expect("search runs to completion");
        assert!(block.hash().starts_with(DIFFICULTY));
        assert_eq!(block.hash(), block.calculate_hash());
        assert_eq!(block.index(), 1);
        assert_eq!(block.previous_hash(), chain.last_block().hash());
        assert!(!miner.is_mining());
    }

    #[test]
    fn coinbase_reward_is_prepended_for_the_miner() {
        let chain = Blockchain::new();
        let miner = Miner::new("andrey");
        let user_tx = Transaction::coinbase("alice").unwrap();
        let block = miner
            .mine_block(
                1,
                chain.last_block().hash().to_string(),
                vec![user_tx.clone()],
                None,
            )
            .unwrap()
            .unwrap();
        let txs = block.transactions();
        assert_eq!(txs.len(), 2);
        assert!(txs[0].is_coinbase());
        assert_eq!(txs[0].recipient(), "andrey");
        assert_eq!(txs[0].amount(), MINING_REWARD);
        assert_eq!(txs[1], user_tx);
    }

    #[test]
    fn mined_blocks_commit_and_pay_out() {
        let mut chain = Blockchain::new();
        let miner = Miner::new("andrey");
        let block = miner
            .mine_block(
                chain.height() as u64,
                chain.last_block().hash().to_string(),
                chain.mining_candidates(),
                None,
            )
            .unwrap()
            .unwrap();
        assert!(chain.add_block(block));
        assert_eq!(chain.get_balance("andrey"), MINING_REWARD);
    }

    #[test]
    fn stop_requests_are_honored_without_poisoning_later_rounds() {
        let chain = Blockchain::new();
        let miner = Miner::new("m");
        let handle = {
            let miner = miner.clone();
            let previous_hash = chain.last_block().hash().to_string();
            std::thread::spawn(move || miner.mine_block(1, previous_hash, vec![], None))
        };
        // Stopping may race the workers finding a block; either outcome is
        // legitimate, the flag just has to end up cleared.
        miner.stop_mining();
        let result = handle.join().unwrap().unwrap();
        if let Some(block) = result {
            assert!(block.hash().starts_with(DIFFICULTY));
        }
        assert!(!miner.is_mining());

        // A later round still works.
        let block = miner
            .mine_block(1, chain.last_block().hash().to_string(), vec![], None)
            .unwrap();
        assert!(block.is_some());
    }

    #[test]
    fn stale_tip_blocks_are_rejected_on_commit() {
        let mut chain = Blockchain::new();
        let miner = Miner::new("m");
        let stale = miner
            .mine_block(
                chain.height() as u64,
                chain.last_block().hash().to_string(),
                vec![],
                None,
            )
            .unwrap()
            .unwrap();
        // The tip advances while the stale block is in flight.
        let winner = miner
            .mine_block(
                chain.height() as u64,
                chain.last_block().hash().to_string(),
                vec![],
                None,
            )
            .unwrap()
            .unwrap();
        assert!(chain.add_block(winner));
        assert!(!chain.add_block(stale));
    }
}
