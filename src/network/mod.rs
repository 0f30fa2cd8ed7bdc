// Declare and define the modules for the network layer
pub mod message;
pub mod operations;
pub mod peers;

// Re-export the modules
pub use message::{MAX_MESSAGE_SIZE, Message, MessageType};
pub use operations::{REQUEST_TIMEOUT, read_message, send_request, write_message};
pub use peers::{MAX_FAILURES, MAX_PEERS, PeerSet};
