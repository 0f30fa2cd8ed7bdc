// Declare and define the modules for the domain layer
pub mod block;
pub mod blockchain;
pub mod transaction;

// Re-export the modules
pub use block::{Block, GENESIS_HASH};
pub use blockchain::{Blockchain, ChainSnapshot, DIFFICULTY};
pub use transaction::{
    COINBASE_ADDRESS, GENESIS_ADDRESS, MINING_REWARD, Transaction, is_system_address,
};
