use crate::error::{CoinError, Result};
use crate::util::current_timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Reserved sender that funds the chain's first coins.
pub const GENESIS_ADDRESS: &str = "genesis";
/// Reserved sender used by miners to pay themselves the block reward.
pub const COINBASE_ADDRESS: &str = "coinbase";
/// Fixed block reward paid by every coinbase transaction.
pub const MINING_REWARD: f64 = 50.0;

/// System addresses bypass solvency checks when spending.
pub fn is_system_address(address: &str) -> bool {
    address == GENESIS_ADDRESS || address == COINBASE_ADDRESS
}

/// A single value transfer between two addresses.
///
/// Identity is carried by `id` alone: equality and hashing ignore every
/// other field, and a transaction may appear in the mempool and in at most
/// one confirmed block.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "TransactionRecord")]
pub struct Transaction {
    id: String,
    #[serde(rename = "origem")]
    sender: String,
    #[serde(rename = "destino")]
    recipient: String,
    #[serde(rename = "valor")]
    amount: f64,
    timestamp: f64,
}

impl Transaction {
    /// Create a transaction with a fresh UUID v4 id and the current time.
    pub fn new(sender: &str, recipient: &str, amount: f64) -> Result<Transaction> {
        Self::from_parts(
            Uuid::new_v4().to_string(),
            sender.to_string(),
            recipient.to_string(),
            amount,
            current_timestamp(),
        )
    }

    /// The reward transaction a miner prepends to every block it assembles.
    pub fn coinbase(recipient: &str) -> Result<Transaction> {
        Self::new(COINBASE_ADDRESS, recipient, MINING_REWARD)
    }

    /// Build a transaction from explicit fields, enforcing the construction
    /// invariants. Used both by [`Transaction::new`] and by wire
    /// deserialization, so invalid records never enter the process.
    pub fn from_parts(
        id: String,
        sender: String,
        recipient: String,
        amount: f64,
        timestamp: f64,
    ) -> Result<Transaction> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(CoinError::InvalidTransactionValue(format!(
                "amount must be positive and finite, got {amount}"
            )));
        }
        if sender.is_empty() {
            return Err(CoinError::InvalidTransactionAddress(
                "sender address is empty".to_string(),
            ));
        }
        if recipient.is_empty() {
            return Err(CoinError::InvalidTransactionAddress(
                "recipient address is empty".to_string(),
            ));
        }
        if sender == recipient && !is_system_address(&sender) {
            return Err(CoinError::InvalidTransactionAddress(format!(
                "sender and recipient are the same address: {sender}"
            )));
        }
        if is_system_address(&recipient) && !is_system_address(&sender) {
            return Err(CoinError::InvalidTransactionAddress(format!(
                "{recipient} is a reserved address"
            )));
        }
        Ok(Transaction {
            id,
            sender,
            recipient,
            amount,
            timestamp,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn is_coinbase(&self) -> bool {
        self.sender == COINBASE_ADDRESS
    }

    pub fn is_genesis(&self) -> bool {
        self.sender == GENESIS_ADDRESS
    }

    pub fn is_system(&self) -> bool {
        is_system_address(&self.sender)
    }

    /// Seconds elapsed since the transaction was created.
    pub fn age(&self) -> f64 {
        current_timestamp() - self.timestamp
    }

    /// The wire record `{id, origem, destino, valor, timestamp}` as a JSON
    /// value, as embedded in block hashing input.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("Transaction serialization error")
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Transaction {}

impl Hash for Transaction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Raw wire shape; promoted to [`Transaction`] through the validating
/// constructor.
#[derive(Deserialize)]
struct TransactionRecord {
    id: String,
    origem: String,
    destino: String,
    valor: f64,
    timestamp: f64,
}

impl TryFrom<TransactionRecord> for Transaction {
    type Error = CoinError;

    fn try_from(record: TransactionRecord) -> Result<Transaction> {
        Transaction::from_parts(
            record.id,
            record.origem,
            record.destino,
            record.valor,
            record.timestamp,
        )
    }
}
