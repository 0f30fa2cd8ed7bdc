//! Protocol messages and their framed wire encoding.
//!
//! Every message travels as a 4-byte big-endian length prefix followed by
//! exactly that many bytes of UTF-8 JSON: an object with the three keys
//! `type`, `payload` and `sender`. One message per connection in each
//! direction.

use crate::domain::{Block, ChainSnapshot, Transaction};
use crate::error::{CoinError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Upper bound on an inbound frame. A hostile length prefix must not be
/// able to balloon memory.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    NewTransaction,
    NewBlock,
    RequestChain,
    ResponseChain,
    Ping,
    Pong,
    DiscoverPeers,
    PeersList,
}

impl MessageType {
    /// Broadcast messages fan out through the overlay; the rest are
    /// point-to-point request/response exchanges.
    pub fn is_broadcast(&self) -> bool {
        matches!(self, MessageType::NewTransaction | MessageType::NewBlock)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub payload: Map<String, Value>,
    pub sender: String,
}

impl Message {
    fn with_payload(message_type: MessageType, payload: Map<String, Value>) -> Message {
        Message {
            message_type,
            payload,
            sender: String::new(),
        }
    }

    fn empty(message_type: MessageType) -> Message {
        Self::with_payload(message_type, Map::new())
    }

    pub fn ping() -> Message {
        Self::empty(MessageType::Ping)
    }

    pub fn pong() -> Message {
        Self::empty(MessageType::Pong)
    }

    pub fn discover_peers() -> Message {
        Self::empty(MessageType::DiscoverPeers)
    }

    pub fn request_chain() -> Message {
        Self::empty(MessageType::RequestChain)
    }

    pub fn peers_list(peers: Vec<String>) -> Message {
        let mut payload = Map::new();
        payload.insert(
            "peers".to_string(),
            Value::Array(peers.into_iter().map(Value::String).collect()),
        );
        Self::with_payload(MessageType::PeersList, payload)
    }

    pub fn new_transaction(transaction: &Transaction) -> Message {
        let mut payload = Map::new();
        payload.insert("transaction".to_string(), transaction.to_value());
        Self::with_payload(MessageType::NewTransaction, payload)
    }

    pub fn new_block(block: &Block) -> Message {
        let mut payload = Map::new();
        payload.insert(
            "block".to_string(),
            serde_json::to_value(block).expect("Block serialization error"),
        );
        Self::with_payload(MessageType::NewBlock, payload)
    }

    pub fn response_chain(snapshot: &ChainSnapshot) -> Message {
        let mut payload = Map::new();
        payload.insert(
            "blockchain".to_string(),
            serde_json::to_value(snapshot).expect("Chain snapshot serialization error"),
        );
        Self::with_payload(MessageType::ResponseChain, payload)
    }

    fn payload_field(&self, key: &str) -> Result<&Value> {
        self.payload.get(key).ok_or_else(|| {
            CoinError::MalformedMessage(format!(
                "{:?} payload is missing the {key} field",
                self.message_type
            ))
        })
    }

    /// The transaction carried by a `NEW_TRANSACTION` payload.
    pub fn transaction(&self) -> Result<Transaction> {
        Ok(serde_json::from_value(
            self.payload_field("transaction")?.clone(),
        )?)
    }

    /// The block carried by a `NEW_BLOCK` payload.
    pub fn block(&self) -> Result<Block> {
        Ok(serde_json::from_value(self.payload_field("block")?.clone())?)
    }

    /// The `{chain, pending_transactions}` record carried by a
    /// `RESPONSE_CHAIN` payload.
    pub fn chain_snapshot(&self) -> Result<ChainSnapshot> {
        Ok(serde_json::from_value(
            self.payload_field("blockchain")?.clone(),
        )?)
    }

    /// The peer addresses carried by a `PEERS_LIST` payload.
    pub fn peers(&self) -> Result<Vec<String>> {
        Ok(serde_json::from_value(self.payload_field("peers")?.clone())?)
    }

    /// Encode as a length-prefixed frame.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let body = serde_json::to_vec(self)?;
        if body.len() > u32::MAX as usize {
            return Err(CoinError::MalformedMessage(
                "message exceeds the frame length limit".to_string(),
            ));
        }
        let mut frame = Vec::with_capacity(4 + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Decode a full length-prefixed frame. The prefix must account for
    /// exactly the remaining bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Message> {
        if data.len() < 4 {
            return Err(CoinError::MalformedMessage(
                "frame shorter than its length prefix".to_string(),
            ));
        }
        let declared = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        let body = &data[4..];
        if declared != body.len() {
            return Err(CoinError::MalformedMessage(format!(
                "frame declares {declared} bytes but carries {}",
                body.len()
            )));
        }
        if declared > MAX_MESSAGE_SIZE {
            return Err(CoinError::MalformedMessage(format!(
                "frame of {declared} bytes exceeds the limit"
            )));
        }
        Ok(serde_json::from_slice(body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Blockchain;

    #[test]
    fn wire_symbols_are_exact() {
        let cases = [
            (MessageType::NewTransaction, "NEW_TRANSACTION"),
            (MessageType::NewBlock, "NEW_BLOCK"),
            (MessageType::RequestChain, "REQUEST_CHAIN"),
            (MessageType::ResponseChain, "RESPONSE_CHAIN"),
            (MessageType::Ping, "PING"),
            (MessageType::Pong, "PONG"),
            (MessageType::DiscoverPeers, "DISCOVER_PEERS"),
            (MessageType::PeersList, "PEERS_LIST"),
        ];
        for (message_type, symbol) in cases {
            let encoded = serde_json::to_value(message_type).unwrap();
            assert_eq!(encoded, serde_json::json!(symbol));
        }
    }

    #[test]
    fn only_transaction_and_block_messages_are_broadcast() {
        assert!(MessageType::NewTransaction.is_broadcast());
        assert!(MessageType::NewBlock.is_broadcast());
        assert!(!MessageType::Ping.is_broadcast());
        assert!(!MessageType::ResponseChain.is_broadcast());
    }

    #[test]
    fn frame_round_trip() {
        let mut message = Message::peers_list(vec!["127.0.0.1:5001".to_string()]);
        message.sender = "127.0.0.1:5000".to_string();
        let restored = Message::from_bytes(&message.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, message);
    }

    #[test]
    fn frame_length_prefix_is_big_endian() {
        let frame = Message::ping().to_bytes().unwrap();
        let declared = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(declared, frame.len() - 4);
    }

    #[test]
    fn truncated_frames_are_malformed() {
        let frame = Message::ping().to_bytes().unwrap();
        assert!(Message::from_bytes(&frame[..frame.len() - 1]).is_err());
        assert!(Message::from_bytes(&frame[..2]).is_err());
    }

    #[test]
    fn missing_top_level_keys_are_malformed() {
        for raw in [
            r#"{"payload": {}, "sender": ""}"#,
            r#"{"type": "PING", "sender": ""}"#,
            r#"{"type": "PING", "payload": {}}"#,
        ] {
            assert!(serde_json::from_str::<Message>(raw).is_err());
        }
        let complete = r#"{"type": "PING", "payload": {}, "sender": ""}"#;
        assert!(serde_json::from_str::<Message>(complete).is_ok());
    }

    #[test]
    fn unknown_message_types_are_malformed() {
        let raw = r#"{"type": "SHOUT", "payload": {}, "sender": ""}"#;
        assert!(serde_json::from_str::<Message>(raw).is_err());
    }

    #[test]
    fn transaction_payload_round_trip() {
        let tx = Transaction::new("coinbase", "alice", 50.0).unwrap();
        let message = Message::new_transaction(&tx);
        assert_eq!(message.transaction().unwrap(), tx);
    }

    #[test]
    fn missing_payload_fields_are_malformed() {
        let message = Message::ping();
        assert!(message.transaction().is_err());
        assert!(message.block().is_err());
        assert!(message.peers().is_err());
    }

    #[test]
    fn chain_snapshot_payload_round_trip() {
        let chain = Blockchain::new();
        let message = Message::response_chain(&chain.snapshot());
        let snapshot = message.chain_snapshot().unwrap();
        assert_eq!(snapshot.chain.len(), 1);
        assert!(snapshot.pending_transactions.is_empty());
    }
}
