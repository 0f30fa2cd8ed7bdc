//! Inbound connection handling: read one framed request, dispatch it, and
//! write at most one framed response.

use super::Node;
use crate::error::{CoinError, Result};
use crate::network::{Message, MessageType, REQUEST_TIMEOUT, read_message, write_message};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{info, instrument};

/// Drive one accepted connection to completion. Errors are confined here:
/// a malformed or hostile peer costs us a log line and a dropped
/// connection, never chain or mempool state.
#[instrument(skip(node, stream))]
pub(crate) async fn process_stream(node: Node, mut stream: TcpStream) -> Result<()> {
    let message = match timeout(REQUEST_TIMEOUT, read_message(&mut stream)).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(CoinError::Network("inbound read timed out".to_string()));
        }
    };
    let Some(message) = message else {
        return Ok(());
    };
    info!(
        message_type = ?message.message_type,
        sender = %message.sender,
        "message received"
    );

    if let Some(mut reply) = dispatch(&node, message).await? {
        reply.sender = node.address().to_string();
        write_message(&mut stream, &reply).await?;
    }
    Ok(())
}

/// Apply one inbound message to local state and produce the optional
/// reply.
///
/// Broadcast kinds re-gossip to everyone except the peer the message came
/// from, which is what keeps flood propagation from looping forever.
async fn dispatch(node: &Node, message: Message) -> Result<Option<Message>> {
    match message.message_type {
        MessageType::NewTransaction => {
            let transaction = message.transaction()?;
            let accepted = node
                .blockchain()
                .write()
                .await
                .add_transaction(transaction.clone());
            if accepted {
                info!(id = transaction.id(), "new transaction added");
                node.broadcast(
                    Message::new_transaction(&transaction),
                    Some(&message.sender),
                )
                .await;
                node.notify_new_transaction(&transaction);
            }
            Ok(None)
        }
        MessageType::NewBlock => {
            let block = message.block()?;
            let accepted = node.blockchain().write().await.add_block(block.clone());
            if accepted {
                info!(index = block.index(), "new block added");
                node.miner().stop_mining();
                node.broadcast(Message::new_block(&block), Some(&message.sender))
                    .await;
                node.notify_new_block(&block);
            }
            Ok(None)
        }
        MessageType::RequestChain => {
            let snapshot = node.blockchain().read().await.snapshot();
            Ok(Some(Message::response_chain(&snapshot)))
        }
        MessageType::ResponseChain => {
            let snapshot = message.chain_snapshot()?;
            let blocks = snapshot.chain.len();
            let replaced = node
                .blockchain()
                .write()
                .await
                .replace_chain(snapshot.chain);
            if replaced {
                info!(blocks, "blockchain replaced by peer chain");
            }
            Ok(None)
        }
        MessageType::Ping => {
            if !message.sender.is_empty() && message.sender != node.address() {
                let is_new = node.peer_set().register(&message.sender);
                if is_new {
                    info!(peer = %message.sender, "peer registered via ping");
                    // Announce the newcomer so the mesh stays connected
                    // without a central registry.
                    node.broadcast(
                        Message::peers_list(vec![message.sender.clone()]),
                        Some(&message.sender),
                    )
                    .await;
                }
            }
            Ok(Some(Message::pong()))
        }
        MessageType::DiscoverPeers => Ok(Some(Message::peers_list(node.peer_set().all()))),
        MessageType::PeersList => {
            for peer in message.peers()? {
                if peer != node.address() {
                    node.peer_set().register(&peer);
                }
            }
            Ok(None)
        }
        MessageType::Pong => Ok(None),
    }
}
