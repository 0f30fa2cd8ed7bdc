//! Node orchestration: the listening socket, the peer set, gossip
//! broadcast, mining and chain synchronization.

mod handler;
pub mod miner;

pub use miner::{Miner, PROGRESS_INTERVAL, WORKERS};

use crate::domain::{Block, Blockchain, Transaction};
use crate::error::Result;
use crate::network::{MAX_PEERS, Message, MessageType, PeerSet, send_request};
use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Callback invoked after a gossiped transaction enters the mempool.
pub type TransactionHook = Box<dyn Fn(&Transaction) + Send + Sync>;
/// Callback invoked after a gossiped block is committed.
pub type BlockHook = Box<dyn Fn(&Block) + Send + Sync>;

/// One participant in the flat peer-to-peer overlay.
///
/// `Node` is a cheap-clone handle over shared state, so connection handlers
/// and broadcast tasks all operate on the same blockchain, miner and peer
/// set. Blockchain mutations are serialized behind a single write lock;
/// nothing observes the chain mid-update.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

struct NodeInner {
    port: u16,
    address: String,
    wallet: String,
    blockchain: RwLock<Blockchain>,
    miner: Miner,
    peers: PeerSet,
    running: AtomicBool,
    accept_task: StdMutex<Option<JoinHandle<()>>>,
    on_new_transaction: StdMutex<Option<TransactionHook>>,
    on_new_block: StdMutex<Option<BlockHook>>,
}

impl Node {
    /// Create a node advertising `host:port`. Mining rewards go to
    /// `wallet`, defaulting to the node's own address.
    pub fn new(host: &str, port: u16, wallet: Option<String>) -> Node {
        let address = format!("{host}:{port}");
        let wallet = wallet
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| address.clone());
        Node {
            inner: Arc::new(NodeInner {
                port,
                address: address.clone(),
                wallet: wallet.clone(),
                blockchain: RwLock::new(Blockchain::new()),
                miner: Miner::new(wallet),
                peers: PeerSet::new(address),
                running: AtomicBool::new(false),
                accept_task: StdMutex::new(None),
                on_new_transaction: StdMutex::new(None),
                on_new_block: StdMutex::new(None),
            }),
        }
    }

    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn wallet(&self) -> &str {
        &self.inner.wallet
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Bind on `0.0.0.0:port` and start accepting connections. The accept
    /// loop runs in its own task; each accepted connection gets a
    /// short-lived handler task of its own.
    pub async fn start(&self) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.inner.port)).await?;
        self.inner.running.store(true, Ordering::SeqCst);
        info!(address = %self.address(), "node started");

        let node = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        if !node.is_running() {
                            break;
                        }
                        let node = node.clone();
                        tokio::spawn(async move {
                            if let Err(err) = handler::process_stream(node, stream).await {
                                debug!(peer = %peer_addr, error = %err, "connection dropped");
                            }
                        });
                    }
                    Err(err) => {
                        if !node.is_running() {
                            break;
                        }
                        error!(error = %err, "failed to accept connection");
                    }
                }
            }
        });
        *self.inner.accept_task.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Stop accepting, ask the miner to terminate, close the socket.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.miner.stop_mining();
        if let Some(handle) = self.inner.accept_task.lock().unwrap().take() {
            handle.abort();
        }
        info!(address = %self.address(), "node stopped");
    }

    /// Ping a peer, register it on a successful reply, then ask it for the
    /// peers it already knows.
    pub async fn connect_to_peer(&self, peer_address: &str) -> bool {
        if peer_address == self.address() {
            return false;
        }
        if self.inner.peers.len() >= MAX_PEERS {
            warn!(limit = MAX_PEERS, "peer limit reached");
            return false;
        }
        match self.send_to_peer(peer_address, Message::ping()).await {
            Ok(Some(_reply)) => {
                self.inner.peers.register(peer_address);
                self.inner.peers.record_success(peer_address);
                info!(peer = peer_address, "connected to peer");
                self.discover_peers_from(peer_address).await;
                true
            }
            _ => false,
        }
    }

    async fn discover_peers_from(&self, peer_address: &str) {
        match self.send_to_peer(peer_address, Message::discover_peers()).await {
            Ok(Some(reply)) if reply.message_type == MessageType::PeersList => {
                match reply.peers() {
                    Ok(peers) => {
                        debug!(count = peers.len(), "peers discovered");
                        for peer in peers {
                            self.inner.peers.register(&peer);
                        }
                    }
                    Err(err) => {
                        warn!(peer = peer_address, error = %err, "unusable peers list")
                    }
                }
            }
            Ok(_) => {}
            Err(err) => warn!(peer = peer_address, error = %err, "peer discovery failed"),
        }
    }

    /// Validate-and-add locally; when accepted, gossip to every peer.
    pub async fn broadcast_transaction(&self, transaction: Transaction) -> bool {
        let accepted = self
            .inner
            .blockchain
            .write()
            .await
            .add_transaction(transaction.clone());
        if accepted {
            info!(id = transaction.id(), "transaction accepted and propagated");
            self.broadcast(Message::new_transaction(&transaction), None).await;
        }
        accepted
    }

    /// Commit locally; when accepted, gossip to every peer.
    pub async fn broadcast_block(&self, block: Block) -> bool {
        let accepted = self.inner.blockchain.write().await.add_block(block.clone());
        if accepted {
            info!(index = block.index(), "block committed and propagated");
            self.broadcast(Message::new_block(&block), None).await;
        } else {
            warn!(index = block.index(), "block does not extend the current tip");
        }
        accepted
    }

    /// Build, validate and gossip a transaction in one step.
    pub async fn create_transaction(
        &self,
        sender: &str,
        recipient: &str,
        amount: f64,
    ) -> Result<Option<Transaction>> {
        let transaction = Transaction::new(sender, recipient, amount)?;
        if self.broadcast_transaction(transaction.clone()).await {
            Ok(Some(transaction))
        } else {
            Ok(None)
        }
    }

    /// Mine the current mempool against a snapshot of the chain tip.
    ///
    /// The proof-of-work search runs on dedicated OS threads; the tip may
    /// advance in the meantime, in which case the mined block is rejected
    /// on commit. Returns the mined block even when that happens, mirroring
    /// what the search actually produced.
    pub async fn mine(&self) -> Result<Option<Block>> {
        let (block_index, previous_hash, candidates) = {
            let chain = self.inner.blockchain.read().await;
            if chain.pending_transactions().is_empty() {
                info!("no pending transactions to mine");
                return Ok(None);
            }
            (
                chain.height() as u64,
                chain.last_block().hash().to_string(),
                chain.mining_candidates(),
            )
        };

        let miner = self.inner.miner.clone();
        let search = tokio::task::spawn_blocking(move || {
            let progress = |nonce: u64| debug!(nonce, "mining in progress");
            miner.mine_block(block_index, previous_hash, candidates, Some(&progress))
        });
        let mined = match search.await {
            Ok(result) => result?,
            Err(err) => {
                error!(error = %err, "mining task failed");
                None
            }
        };

        if let Some(block) = &mined {
            self.broadcast_block(block.clone()).await;
        }
        Ok(mined)
    }

    /// Poll every known peer for its chain and adopt the longest candidate
    /// that is valid and strictly longer than ours.
    pub async fn sync_blockchain(&self) -> bool {
        let mut best_chain: Option<Vec<Block>> = None;
        let mut best_length = self.inner.blockchain.read().await.height();
        let mut best_peer = String::new();

        for peer in self.inner.peers.all() {
            match self.send_to_peer(&peer, Message::request_chain()).await {
                Ok(Some(reply)) if reply.message_type == MessageType::ResponseChain => {
                    match reply.chain_snapshot() {
                        Ok(snapshot) => {
                            let candidate = snapshot.chain;
                            if candidate.len() > best_length
                                && Blockchain::is_valid_chain(&candidate)
                            {
                                info!(peer = %peer, blocks = candidate.len(), "better chain candidate found");
                                best_length = candidate.len();
                                best_peer = peer.clone();
                                best_chain = Some(candidate);
                            }
                        }
                        Err(err) => warn!(peer = %peer, error = %err, "unusable chain response"),
                    }
                }
                Ok(_) => {}
                Err(err) => error!(peer = %peer, error = %err, "chain sync failed"),
            }
        }

        match best_chain {
            Some(candidate) => {
                let replaced = self.inner.blockchain.write().await.replace_chain(candidate);
                if replaced {
                    info!(peer = %best_peer, blocks = best_length, "blockchain synchronized");
                }
                replaced
            }
            None => false,
        }
    }

    pub async fn get_balance(&self, address: &str) -> f64 {
        self.inner.blockchain.read().await.get_balance(address)
    }

    pub async fn get_available_balance(&self, address: &str) -> f64 {
        self.inner
            .blockchain
            .read()
            .await
            .get_available_balance(address)
    }

    pub async fn address_exists(&self, address: &str) -> bool {
        self.inner.blockchain.read().await.address_exists(address)
    }

    pub async fn chain(&self) -> Vec<Block> {
        self.inner.blockchain.read().await.chain().to_vec()
    }

    pub async fn chain_height(&self) -> usize {
        self.inner.blockchain.read().await.height()
    }

    pub async fn pending_transactions(&self) -> Vec<Transaction> {
        self.inner
            .blockchain
            .read()
            .await
            .pending_transactions()
            .to_vec()
    }

    pub fn peers(&self) -> Vec<String> {
        self.inner.peers.all()
    }

    pub fn peer_count(&self) -> usize {
        self.inner.peers.len()
    }

    pub fn set_on_new_transaction<F>(&self, hook: F)
    where
        F: Fn(&Transaction) + Send + Sync + 'static,
    {
        *self.inner.on_new_transaction.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn set_on_new_block<F>(&self, hook: F)
    where
        F: Fn(&Block) + Send + Sync + 'static,
    {
        *self.inner.on_new_block.lock().unwrap() = Some(Box::new(hook));
    }

    /// Deliver `message` to a single peer with failure accounting: any
    /// completed exchange resets the peer's counter, any error bumps it.
    pub(crate) async fn send_to_peer(
        &self,
        peer: &str,
        mut message: Message,
    ) -> Result<Option<Message>> {
        message.sender = self.address().to_string();
        match send_request(peer, &message).await {
            Ok(reply) => {
                self.inner.peers.record_success(peer);
                Ok(reply)
            }
            Err(err) => {
                let failures = self.inner.peers.record_failure(peer);
                warn!(peer, failures, error = %err, "peer exchange failed");
                Err(err)
            }
        }
    }

    /// Best-effort gossip: fan out to every eligible peer in its own task.
    /// Send failures only touch the per-peer failure counters.
    pub(crate) async fn broadcast(&self, message: Message, exclude: Option<&str>) {
        let mut targets = self.inner.peers.broadcast_targets(exclude);
        targets.shuffle(&mut rand::rng());
        for peer in targets {
            let node = self.clone();
            let message = message.clone();
            tokio::spawn(async move {
                let _ = node.send_to_peer(&peer, message).await;
            });
        }
    }

    pub(crate) fn blockchain(&self) -> &RwLock<Blockchain> {
        &self.inner.blockchain
    }

    pub(crate) fn peer_set(&self) -> &PeerSet {
        &self.inner.peers
    }

    pub(crate) fn miner(&self) -> &Miner {
        &self.inner.miner
    }

    pub(crate) fn notify_new_transaction(&self, transaction: &Transaction) {
        if let Some(hook) = self.inner.on_new_transaction.lock().unwrap().as_ref() {
            hook(transaction);
        }
    }

    pub(crate) fn notify_new_block(&self, block: &Block) {
        if let Some(hook) = self.inner.on_new_block.lock().unwrap().as_ref() {
            hook(block);
        }
    }
}
