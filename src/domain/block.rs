use super::transaction::Transaction;
use crate::error::{CoinError, Result};
use crate::util::{current_timestamp, sha256_hex, to_canonical_json};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Hash of the canonical genesis block every valid chain starts from.
pub static GENESIS_HASH: Lazy<String> = Lazy::new(|| GENESIS.hash().to_string());

static GENESIS: Lazy<Block> =
    Lazy::new(|| Block::new(0, "0".repeat(64), vec![], 0, 0.0).expect("genesis block"));

/// An ordered batch of transactions chained to its predecessor by hash and
/// carrying the proof-of-work nonce.
///
/// The hash covers every field except itself, over the canonical JSON
/// rendering, so any two nodes agree byte-for-byte on what a block hashes to.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "BlockRecord")]
pub struct Block {
    index: u64,
    previous_hash: String,
    transactions: Vec<Transaction>,
    nonce: u64,
    timestamp: f64,
    hash: String,
}

impl Block {
    /// Build a block and compute its hash from the remaining fields.
    pub fn new(
        index: u64,
        previous_hash: String,
        transactions: Vec<Transaction>,
        nonce: u64,
        timestamp: f64,
    ) -> Result<Block> {
        Self::from_parts(index, previous_hash, transactions, nonce, timestamp, String::new())
    }

    /// Build a block carrying an already-known hash. An empty hash is
    /// recomputed from the other fields.
    pub fn from_parts(
        index: u64,
        previous_hash: String,
        transactions: Vec<Transaction>,
        nonce: u64,
        timestamp: f64,
        hash: String,
    ) -> Result<Block> {
        if previous_hash.len() != 64 {
            return Err(CoinError::InvalidBlockStructure(format!(
                "previous_hash must be 64 characters, got {}",
                previous_hash.len()
            )));
        }
        let mut block = Block {
            index,
            previous_hash,
            transactions,
            nonce,
            timestamp,
            hash,
        };
        if block.hash.is_empty() {
            block.hash = block.calculate_hash();
        }
        Ok(block)
    }

    /// The canonical genesis block: index 0, all-zero parent, no
    /// transactions, nonce 0, timestamp 0.
    pub fn genesis() -> Block {
        GENESIS.clone()
    }

    /// SHA-256 over the canonical JSON of every field except `hash`.
    ///
    /// This is the one hash contract peers rely on; any deviation forks the
    /// network.
    pub fn calculate_hash(&self) -> String {
        let record = json!({
            "index": self.index,
            "previous_hash": self.previous_hash,
            "transactions": self
                .transactions
                .iter()
                .map(Transaction::to_value)
                .collect::<Vec<Value>>(),
            "nonce": self.nonce,
            "timestamp": self.timestamp,
        });
        sha256_hex(to_canonical_json(&record).as_bytes())
    }

    /// Whether the stored hash satisfies the difficulty prefix.
    pub fn is_valid_hash(&self, difficulty: &str) -> bool {
        self.hash.starts_with(difficulty)
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0 && self.previous_hash.bytes().all(|b| b == b'0')
    }

    /// Seconds elapsed since the block was created.
    pub fn age(&self) -> f64 {
        current_timestamp() - self.timestamp
    }

    /// Replace the nonce and refresh the stored hash. Mining advances a
    /// candidate block through the nonce space with this.
    pub(crate) fn set_nonce(&mut self, nonce: u64) {
        self.nonce = nonce;
        self.hash = self.calculate_hash();
    }
}

/// Raw wire shape; promoted to [`Block`] through the validating constructor.
#[derive(Deserialize)]
struct BlockRecord {
    index: u64,
    previous_hash: String,
    transactions: Vec<Transaction>,
    nonce: u64,
    timestamp: f64,
    hash: String,
}

impl TryFrom<BlockRecord> for Block {
    type Error = CoinError;

    fn try_from(record: BlockRecord) -> Result<Block> {
        Block::from_parts(
            record.index,
            record.previous_hash,
            record.transactions,
            record.nonce,
            record.timestamp,
            record.hash,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_hash_matches_the_published_digest() {
        let genesis = Block::genesis();
        assert_eq!(
            genesis.hash(),
            "0567c32b97c36a70d3f4cb865710d329a0be5d713c8cb1b8c769fbaf89f1afb7"
        );
        assert_eq!(GENESIS_HASH.as_str(), genesis.hash());
    }

    #[test]
    fn genesis_fields() {
        let genesis = Block::genesis();
        assert_eq!(genesis.index(), 0);
        assert_eq!(genesis.previous_hash(), "0".repeat(64));
        assert!(genesis.transactions().is_empty());
        assert_eq!(genesis.nonce(), 0);
        assert_eq!(genesis.timestamp(), 0.0);
        assert!(genesis.is_genesis());
    }

    #[test]
    fn hash_golden_vector() {
        let tx = Transaction::from_parts(
            "tx-1".to_string(),
            "coinbase".to_string(),
            "alice".to_string(),
            50.0,
            1700000000.5,
        )
        .unwrap();
        let block = Block::new(
            1,
            GENESIS_HASH.clone(),
            vec![tx],
            7,
            1700000000.25,
        )
        .unwrap();
        assert_eq!(
            block.hash(),
            "2f1d150a9707dc804a04941065d1a86d012cfee3c87d2b1a9ad009392baa44c1"
        );
    }

    #[test]
    fn rejects_short_previous_hash() {
        let result = Block::new(1, "abc".to_string(), vec![], 0, 0.0);
        assert!(matches!(result, Err(CoinError::InvalidBlockStructure(_))));
    }

    #[test]
    fn nonce_changes_the_hash() {
        let mut block = Block::new(1, "0".repeat(64), vec![], 0, 1.0).unwrap();
        let before = block.hash().to_string();
        block.set_nonce(1);
        assert_ne!(block.hash(), before);
        assert_eq!(block.hash(), block.calculate_hash());
    }

    #[test]
    fn difficulty_prefix_predicate() {
        let block = Block::from_parts(
            1,
            "0".repeat(64),
            vec![],
            0,
            1.0,
            "000abc".to_string() + &"0".repeat(58),
        )
        .unwrap();
        assert!(block.is_valid_hash("000"));
        assert!(!block.is_valid_hash("0000"));
    }

    #[test]
    fn serde_round_trip_preserves_the_hash() {
        let tx = Transaction::new("coinbase", "alice", 50.0).unwrap();
        let block = Block::new(1, GENESIS_HASH.clone(), vec![tx], 42, current_timestamp()).unwrap();
        let value = serde_json::to_value(&block).unwrap();
        let restored: Block = serde_json::from_value(value).unwrap();
        assert_eq!(restored, block);
        assert_eq!(restored.hash(), block.hash());
        assert_eq!(restored.calculate_hash(), block.calculate_hash());
    }

    #[test]
    fn wire_blocks_keep_their_claimed_hash() {
        let raw = serde_json::json!({
            "index": 1,
            "previous_hash": "0".repeat(64),
            "transactions": [],
            "nonce": 0,
            "timestamp": 1.0,
            "hash": "not-the-real-hash",
        });
        let block: Block = serde_json::from_value(raw).unwrap();
        assert_eq!(block.hash(), "not-the-real-hash");
        assert_ne!(block.hash(), block.calculate_hash());
    }
}
