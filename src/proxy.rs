//! Proxies and cross-rank exchange (§4.6, §9 MPI portability note).
//!
//! Message-passing is isolated behind a [`Transport`] trait with two
//! implementations: [`LocalTransport`] (single-process no-op) and
//! [`NetworkTransport`] (point-to-point over `tokio`, payloads framed as
//! JSON). No `mpi`/`rsmpi` binding is introduced (see `DESIGN.md`).

use crate::error::{Result, SwiftError};
use crate::particle::ParticleSet;
use crate::types::Rank;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Per-peer exchange payload: a cell's worth of particles plus the cell's
/// top-level coordinates, so the receiver can re-bucket them.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CellPayload {
    /// Top-level cell coordinates this payload belongs to.
    pub cell_loc: [f64; 3],
    /// The particles themselves.
    pub particles: ParticleSet,
}

/// Two-step handshake message: a peer first exchanges counts, then payloads
/// (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProxyMessage {
    /// Announce how many particles of each kind are about to be sent.
    Counts { parts: usize, gparts: usize, sparts: usize },
    /// The actual payload for one cell.
    Payload(CellPayload),
    /// End-of-step scalar reductions (ti_end_min, h_max) for a foreign cell.
    Tend { ti_end_min: u64, h_max: f64 },
}

impl ProxyMessage {
    /// Encode to bytes for transport.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from bytes received over a transport.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Point-to-point transport a proxy uses to talk to one peer rank.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a message to `to`.
    async fn send(&self, to: Rank, msg: &ProxyMessage) -> Result<()>;

    /// Receive the next message from `from`, if one is available.
    async fn recv(&self, from: Rank) -> Result<Option<ProxyMessage>>;

    /// This process's own rank.
    fn self_rank(&self) -> Rank;
}

/// No-op transport for single-process runs: nothing is ever actually local
/// to a peer since every cell is local, so every proxy op is unreachable
/// in practice, but the trait still needs an inhabitant.
#[derive(Debug, Default)]
pub struct LocalTransport;

#[async_trait]
impl Transport for LocalTransport {
    async fn send(&self, _to: Rank, _msg: &ProxyMessage) -> Result<()> {
        Ok(())
    }

    async fn recv(&self, _from: Rank) -> Result<Option<ProxyMessage>> {
        Ok(None)
    }

    fn self_rank(&self) -> Rank {
        Rank::LOCAL
    }
}

/// In-process network transport: each peer has an async mpsc channel;
/// `send` pushes, `recv` pops. A real deployment would swap the channel for
/// an actual socket without changing the `Transport` contract.
pub struct NetworkTransport {
    self_rank: Rank,
    outboxes: HashMap<Rank, tokio::sync::mpsc::UnboundedSender<Vec<u8>>>,
    inboxes: Mutex<HashMap<Rank, tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl NetworkTransport {
    /// Build a transport for `self_rank` with the given outbound channels
    /// to peers and inbound channels from them.
    pub fn new(
        self_rank: Rank,
        outboxes: HashMap<Rank, tokio::sync::mpsc::UnboundedSender<Vec<u8>>>,
        inboxes: HashMap<Rank, tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>>,
    ) -> Self {
        Self { self_rank, outboxes, inboxes: Mutex::new(inboxes) }
    }
}

#[async_trait]
impl Transport for NetworkTransport {
    async fn send(&self, to: Rank, msg: &ProxyMessage) -> Result<()> {
        let bytes = msg.to_bytes()?;
        self.outboxes
            .get(&to)
            .ok_or_else(|| SwiftError::mpi(format!("no outbox registered for {to}")))?
            .send(bytes)
            .map_err(|_| SwiftError::mpi(format!("peer {to} disconnected")))
    }

    async fn recv(&self, from: Rank) -> Result<Option<ProxyMessage>> {
        let mut inboxes = self.inboxes.lock().await;
        let rx = inboxes
            .get_mut(&from)
            .ok_or_else(|| SwiftError::mpi(format!("no inbox registered for {from}")))?;
        match rx.try_recv() {
            Ok(bytes) => Ok(Some(ProxyMessage::from_bytes(&bytes)?)),
            Err(tokio::sync::mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected) => {
                Err(SwiftError::mpi(format!("peer {from} disconnected")))
            }
        }
    }

    fn self_rank(&self) -> Rank {
        self.self_rank
    }
}

/// Observer for proxy lifecycle events.
#[async_trait]
pub trait ProxyCallback: Send + Sync {
    /// Called once a cell's payload has been fully received from `peer`.
    async fn on_received(&self, peer: Rank, payload: &CellPayload);
    /// Called when a send to `peer` fails after retries are exhausted.
    async fn on_send_failed(&self, peer: Rank, err: &SwiftError);
}

/// The per-peer buffer set and MPI-style exchange driver (§4.6).
pub struct Proxy {
    peer: Rank,
    transport: Arc<dyn Transport>,
    callbacks: Vec<Arc<dyn ProxyCallback>>,
}

impl Proxy {
    /// Build a proxy to `peer` over `transport`.
    pub fn new(peer: Rank, transport: Arc<dyn Transport>) -> Self {
        Self { peer, transport, callbacks: Vec::new() }
    }

    /// Register a lifecycle observer.
    pub fn add_callback(&mut self, cb: Arc<dyn ProxyCallback>) {
        self.callbacks.push(cb);
    }

    /// Two-step handshake: announce counts, then ship the payload (§4.6).
    pub async fn send_cell(&self, payload: CellPayload) -> Result<()> {
        let counts = ProxyMessage::Counts {
            parts: payload.particles.parts.len(),
            gparts: payload.particles.gparts.len(),
            sparts: payload.particles.sparts.len(),
        };
        if let Err(e) = self.transport.send(self.peer, &counts).await {
            self.notify_send_failed(&e).await;
            return Err(e);
        }
        let msg = ProxyMessage::Payload(payload);
        if let Err(e) = self.transport.send(self.peer, &msg).await {
            self.notify_send_failed(&e).await;
            return Err(e);
        }
        debug!(peer = %self.peer, "cell payload sent");
        Ok(())
    }

    /// Poll for and apply one inbound message, if available.
    pub async fn poll_recv(&self) -> Result<Option<ProxyMessage>> {
        let msg = self.transport.recv(self.peer).await?;
        if let Some(ProxyMessage::Payload(ref payload)) = msg {
            for cb in &self.callbacks {
                cb.on_received(self.peer, payload).await;
            }
        }
        Ok(msg)
    }

    async fn notify_send_failed(&self, err: &SwiftError) {
        warn!(peer = %self.peer, error = %err, "proxy send failed");
        for cb in &self.callbacks {
            cb.on_send_failed(self.peer, err).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_transport_never_yields_messages() {
        let t = LocalTransport;
        assert!(t.recv(Rank(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn network_transport_round_trips_a_message() {
        let (tx_a, rx_b) = tokio::sync::mpsc::unbounded_channel();
        let (tx_b, rx_a) = tokio::sync::mpsc::unbounded_channel();

        let a = NetworkTransport::new(
            Rank(0),
            HashMap::from([(Rank(1), tx_a)]),
            HashMap::from([(Rank(1), rx_a)]),
        );
        let b = NetworkTransport::new(
            Rank(1),
            HashMap::from([(Rank(0), tx_b)]),
            HashMap::from([(Rank(0), rx_b)]),
        );

        a.send(Rank(1), &ProxyMessage::Counts { parts: 1, gparts: 0, sparts: 0 })
            .await
            .unwrap();
        let got = b.recv(Rank(0)).await.unwrap().unwrap();
        assert!(matches!(got, ProxyMessage::Counts { parts: 1, .. }));
    }

    #[tokio::test]
    async fn proxy_send_cell_does_a_two_step_handshake() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let (_tx2, rx2) = tokio::sync::mpsc::unbounded_channel();
        let transport = NetworkTransport::new(Rank(0), HashMap::from([(Rank(1), tx)]), HashMap::from([(Rank(1), rx2)]));
        let proxy = Proxy::new(Rank(1), Arc::new(transport));
        proxy.send_cell(CellPayload::default()).await.unwrap();

        let first = ProxyMessage::from_bytes(&rx.try_recv().unwrap()).unwrap();
        assert!(matches!(first, ProxyMessage::Counts { .. }));
        let second = ProxyMessage::from_bytes(&rx.try_recv().unwrap()).unwrap();
        assert!(matches!(second, ProxyMessage::Payload(_)));
    }
}
