//! # Peer Transport
//!
//! TCP connections to other nodes, framed with a 4-byte length prefix
//! (`tokio_util::codec::LengthDelimitedCodec`). Each connection becomes a
//! peer with two tasks:
//!
//! ```text
//!            ┌───────────── read task ──────────────┐
//!  socket ──►│ FramedRead → Rpc { from, payload }   │──► rpc channel ──► Node
//!            └──────────────────────────────────────┘
//!            ┌───────────── write task ─────────────┐
//!  socket ◄──│ FramedWrite ◄ mpsc<Bytes> (bounded)  │◄── PeerHandle::send
//!            └──────────────────────────────────────┘
//! ```
//!
//! [`PeerSet`] is the node's registry of live peers. A new connection is
//! inserted before its read task starts, so any frame the node sees comes
//! from a peer it can already reply to. The lock is never held across an
//! `.await`; sends go through each peer's bounded queue.
//!
//! The two tasks live and die together. When the write task exits (write
//! error, write timeout, or every sender dropped) it wakes the read task,
//! which drops the socket, removes the peer from the set and emits
//! `Disconnected`. The read task also ends on EOF, on shutdown, and on the
//! first framing error: `FramedRead` yields nothing after a decode error
//! (for example an oversized length prefix), so the stream is unusable from
//! that point on.
//!
//! The node learns about peers through [`PeerEvent`]s: `Connected` when a
//! connection is accepted or dialed, `Disconnected` once it is torn down.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::{debug, info, warn};

use super::message::Rpc;
use crate::config::{MAX_FRAME_LENGTH, PEER_SEND_QUEUE, WRITE_TIMEOUT};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown peer {0}")]
    PeerUnknown(SocketAddr),

    #[error("send queue to peer {0} is full or closed")]
    SendFailed(SocketAddr),
}

// ---------------------------------------------------------------------------
// PeerHandle / PeerEvent
// ---------------------------------------------------------------------------

/// Cheap, cloneable handle to a connected peer's outbound queue.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    addr: SocketAddr,
    outbound: bool,
    sender: mpsc::Sender<Bytes>,
}

impl PeerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `true` if we dialed this peer, `false` if it connected to us.
    pub fn is_outbound(&self) -> bool {
        self.outbound
    }

    #[cfg(test)]
    pub(crate) fn for_test(addr: SocketAddr, sender: mpsc::Sender<Bytes>) -> Self {
        Self {
            addr,
            outbound: false,
            sender,
        }
    }

    /// Queue a frame for this peer without waiting. Fails if the queue is
    /// full or the write task has exited.
    pub fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        self.sender
            .try_send(frame)
            .map_err(|_| TransportError::SendFailed(self.addr))
    }
}

#[derive(Debug)]
pub enum PeerEvent {
    Connected(PeerHandle),
    Disconnected(SocketAddr),
}

// ---------------------------------------------------------------------------
// PeerSet
// ---------------------------------------------------------------------------

/// Registry of live peers keyed by remote address.
#[derive(Debug, Clone, Default)]
pub struct PeerSet {
    peers: Arc<RwLock<HashMap<SocketAddr, PeerHandle>>>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, peer: PeerHandle) {
        self.peers.write().insert(peer.addr, peer);
    }

    pub fn remove(&self, addr: &SocketAddr) -> Option<PeerHandle> {
        self.peers.write().remove(addr)
    }

    /// Remove `peer` only if the set still holds this very connection, not
    /// a newer one from the same address.
    fn remove_connection(&self, peer: &PeerHandle) -> bool {
        let mut peers = self.peers.write();
        match peers.get(&peer.addr) {
            Some(current) if current.sender.same_channel(&peer.sender) => {
                peers.remove(&peer.addr);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.peers.read().contains_key(addr)
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    pub fn addrs(&self) -> Vec<SocketAddr> {
        self.peers.read().keys().copied().collect()
    }

    /// Send one frame to one peer.
    pub fn send(&self, addr: &SocketAddr, frame: Bytes) -> Result<(), TransportError> {
        let peer = self
            .peers
            .read()
            .get(addr)
            .cloned()
            .ok_or(TransportError::PeerUnknown(*addr))?;
        peer.send(frame)
    }

    /// Send `frame` to every peer except `except` (the peer the data came
    /// from). Per-peer failures are logged and skipped. Returns how many
    /// peers the frame was queued for.
    pub fn broadcast(&self, frame: Bytes, except: Option<SocketAddr>) -> usize {
        let targets: Vec<PeerHandle> = self
            .peers
            .read()
            .values()
            .filter(|p| Some(p.addr) != except)
            .cloned()
            .collect();

        let mut sent = 0;
        for peer in targets {
            match peer.send(frame.clone()) {
                Ok(()) => sent += 1,
                Err(e) => warn!(peer = %peer.addr, error = %e, "broadcast to peer failed"),
            }
        }
        sent
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Everything a new peer's tasks need: the registry to join, where to
/// deliver frames, where to announce lifecycle events, and the shutdown
/// signal.
#[derive(Debug, Clone)]
pub struct Connector {
    peers: PeerSet,
    rpc_tx: mpsc::Sender<Rpc>,
    events_tx: mpsc::Sender<PeerEvent>,
    shutdown: watch::Receiver<bool>,
}

impl Connector {
    pub fn new(
        peers: PeerSet,
        rpc_tx: mpsc::Sender<Rpc>,
        events_tx: mpsc::Sender<PeerEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            peers,
            rpc_tx,
            events_tx,
            shutdown,
        }
    }

    /// Dial `addr` and register it as an outbound peer.
    pub async fn connect(&self, addr: SocketAddr) -> Result<PeerHandle, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::Connect { addr, source })?;
        info!(peer = %addr, "connected to peer");
        Ok(self.spawn_peer(stream, addr, true).await)
    }

    async fn spawn_peer(&self, stream: TcpStream, addr: SocketAddr, outbound: bool) -> PeerHandle {
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        self.attach(addr, read_half, write_half, outbound).await
    }

    /// Register a peer over an already split connection and start its tasks.
    async fn attach<R, W>(&self, addr: SocketAddr, reader: R, writer: W, outbound: bool) -> PeerHandle
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel(PEER_SEND_QUEUE);
        let (writer_done_tx, writer_done_rx) = oneshot::channel();
        let handle = PeerHandle {
            addr,
            outbound,
            sender,
        };

        tokio::spawn(write_loop(
            addr,
            writer,
            receiver,
            writer_done_tx,
            self.shutdown.clone(),
        ));
        self.peers.insert(handle.clone());
        tokio::spawn(read_loop(
            handle.clone(),
            reader,
            writer_done_rx,
            self.peers.clone(),
            self.rpc_tx.clone(),
            self.events_tx.clone(),
            self.shutdown.clone(),
        ));

        if self
            .events_tx
            .send(PeerEvent::Connected(handle.clone()))
            .await
            .is_err()
        {
            debug!(peer = %addr, "node event loop gone, connected event dropped");
        }
        handle
    }
}

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

async fn read_loop<R>(
    peer: PeerHandle,
    reader: R,
    mut writer_done: oneshot::Receiver<()>,
    peers: PeerSet,
    rpc_tx: mpsc::Sender<Rpc>,
    events_tx: mpsc::Sender<PeerEvent>,
    mut shutdown: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    let addr = peer.addr;
    let mut frames = FramedRead::new(reader, codec());

    loop {
        tokio::select! {
            frame = frames.next() => match frame {
                Some(Ok(payload)) => {
                    let rpc = Rpc { from: addr, payload: payload.freeze() };
                    if rpc_tx.send(rpc).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!(peer = %addr, error = %e, "peer framing error, dropping peer");
                    break;
                }
                None => {
                    debug!(peer = %addr, "peer closed connection");
                    break;
                }
            },
            _ = &mut writer_done => {
                debug!(peer = %addr, "peer writer stopped, dropping peer");
                break;
            }
            _ = shutdown.changed() => break,
        }
    }

    drop(frames);
    peers.remove_connection(&peer);
    drop(peer);
    let _ = events_tx.send(PeerEvent::Disconnected(addr)).await;
}

/// Drains the peer's queue onto the socket. Dropping `done` on return tells
/// the read task to tear the connection down.
async fn write_loop<W>(
    addr: SocketAddr,
    writer: W,
    mut outbound: mpsc::Receiver<Bytes>,
    done: oneshot::Sender<()>,
    mut shutdown: watch::Receiver<bool>,
) where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(writer, codec());

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                match tokio::time::timeout(WRITE_TIMEOUT, sink.send(frame)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(peer = %addr, error = %e, "peer write failed");
                        break;
                    }
                    Err(_) => {
                        warn!(peer = %addr, timeout = ?WRITE_TIMEOUT, "peer write timed out");
                        break;
                    }
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    drop(done);
}

// ---------------------------------------------------------------------------
// TcpTransport
// ---------------------------------------------------------------------------

/// The listening side. Binding is the only fatal network error.
pub struct TcpTransport {
    listener: TcpListener,
    connector: Connector,
}

impl TcpTransport {
    pub async fn bind(addr: SocketAddr, connector: Connector) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        Ok(Self {
            listener,
            connector,
        })
    }

    /// Actual bound address (resolves port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }

    /// Accept connections until shutdown.
    pub async fn run(self) {
        let mut shutdown = self.connector.shutdown.clone();
        if let Some(addr) = self.local_addr() {
            info!(%addr, "transport listening");
        }

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        info!(peer = %addr, "accepted peer connection");
                        self.connector.spawn_peer(stream, addr, false).await;
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                _ = shutdown.changed() => {
                    info!("transport shutting down");
                    break;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Harness {
        peers: PeerSet,
        connector: Connector,
        rpc_rx: mpsc::Receiver<Rpc>,
        events_rx: mpsc::Receiver<PeerEvent>,
        _shutdown_tx: watch::Sender<bool>,
    }

    fn harness() -> Harness {
        let (rpc_tx, rpc_rx) = mpsc::channel(16);
        let (events_tx, events_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let peers = PeerSet::new();
        Harness {
            connector: Connector::new(peers.clone(), rpc_tx, events_tx, shutdown_rx),
            peers,
            rpc_rx,
            events_rx,
            _shutdown_tx: shutdown_tx,
        }
    }

    fn dummy_peer(port: u16) -> (PeerHandle, mpsc::Receiver<Bytes>) {
        let (sender, rx) = mpsc::channel(4);
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        (PeerHandle::for_test(addr, sender), rx)
    }

    #[tokio::test]
    async fn frames_cross_a_loopback_connection() {
        let mut server = harness();
        let client = harness();

        let transport = TcpTransport::bind("127.0.0.1:0".parse().unwrap(), server.connector.clone())
            .await
            .unwrap();
        let addr = transport.local_addr().unwrap();
        tokio::spawn(transport.run());

        let peer = client.connector.connect(addr).await.unwrap();
        assert!(client.peers.contains(&addr));
        peer.send(Bytes::from_static(b"\x05")).unwrap();

        let rpc = tokio::time::timeout(Duration::from_secs(5), server.rpc_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rpc.payload.as_ref(), b"\x05");

        match server.events_rx.recv().await.unwrap() {
            PeerEvent::Connected(handle) => {
                assert!(!handle.is_outbound());
                assert!(server.peers.contains(&handle.addr()));
            }
            other => panic!("expected Connected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn closed_connection_emits_disconnected() {
        let mut server = harness();
        let transport = TcpTransport::bind("127.0.0.1:0".parse().unwrap(), server.connector.clone())
            .await
            .unwrap();
        let addr = transport.local_addr().unwrap();
        tokio::spawn(transport.run());

        let stream = TcpStream::connect(addr).await.unwrap();
        let local = stream.local_addr().unwrap();
        assert!(matches!(
            server.events_rx.recv().await,
            Some(PeerEvent::Connected(_))
        ));
        drop(stream);

        match tokio::time::timeout(Duration::from_secs(5), server.events_rx.recv())
            .await
            .unwrap()
        {
            Some(PeerEvent::Disconnected(gone)) => assert_eq!(gone, local),
            other => panic!("expected Disconnected, got {other:?}"),
        }
    }

    async fn expect_disconnected(events: &mut mpsc::Receiver<PeerEvent>, addr: SocketAddr) {
        loop {
            match tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
            {
                Some(PeerEvent::Connected(_)) => continue,
                Some(PeerEvent::Disconnected(gone)) => {
                    assert_eq!(gone, addr);
                    return;
                }
                None => panic!("event channel closed"),
            }
        }
    }

    #[tokio::test]
    async fn failed_write_tears_down_the_peer() {
        let mut h = harness();
        let addr = SocketAddr::from(([127, 0, 0, 1], 7001));
        let (reader, _remote_reader) = tokio::io::duplex(1024);
        let (writer, remote_writer) = tokio::io::duplex(1024);
        drop(remote_writer);

        let peer = h.connector.attach(addr, reader, writer, true).await;
        assert!(h.peers.contains(&addr));
        peer.send(Bytes::from_static(b"\x05")).unwrap();

        expect_disconnected(&mut h.events_rx, addr).await;
        assert!(!h.peers.contains(&addr));
    }

    #[tokio::test]
    async fn oversized_frame_ends_the_peer() {
        use tokio::io::AsyncWriteExt;

        let mut h = harness();
        let addr = SocketAddr::from(([127, 0, 0, 1], 7002));
        let (reader, mut remote) = tokio::io::duplex(1024);
        let (writer, _remote_writer) = tokio::io::duplex(1024);
        h.connector.attach(addr, reader, writer, false).await;

        let too_long = (MAX_FRAME_LENGTH as u32 + 1).to_be_bytes();
        remote.write_all(&too_long).await.unwrap();

        expect_disconnected(&mut h.events_rx, addr).await;
        assert!(!h.peers.contains(&addr));
        assert!(h.rpc_rx.try_recv().is_err());
    }

    #[test]
    fn stale_connection_does_not_evict_its_replacement() {
        let peers = PeerSet::new();
        let (old, _old_rx) = dummy_peer(1);
        let (new, _new_rx) = dummy_peer(1);
        peers.insert(old.clone());
        peers.insert(new);

        assert!(!peers.remove_connection(&old));
        assert!(peers.contains(&old.addr()));
    }

    #[tokio::test]
    async fn bind_conflict_is_an_error() {
        let first = harness();
        let transport = TcpTransport::bind("127.0.0.1:0".parse().unwrap(), first.connector.clone())
            .await
            .unwrap();
        let addr = transport.local_addr().unwrap();
        let second = harness();
        assert!(matches!(
            TcpTransport::bind(addr, second.connector.clone()).await,
            Err(TransportError::Bind { .. })
        ));
    }

    #[test]
    fn peer_set_send_to_unknown_fails() {
        let peers = PeerSet::new();
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        assert!(matches!(
            peers.send(&addr, Bytes::new()),
            Err(TransportError::PeerUnknown(a)) if a == addr
        ));
    }

    #[test]
    fn broadcast_skips_origin() {
        let peers = PeerSet::new();
        let (a, mut a_rx) = dummy_peer(1);
        let (b, mut b_rx) = dummy_peer(2);
        let origin = a.addr();
        peers.insert(a);
        peers.insert(b);

        let sent = peers.broadcast(Bytes::from_static(b"hi"), Some(origin));
        assert_eq!(sent, 1);
        assert!(a_rx.try_recv().is_err());
        assert_eq!(b_rx.try_recv().unwrap().as_ref(), b"hi");
    }

    #[test]
    fn remove_drops_peer() {
        let peers = PeerSet::new();
        let (a, _rx) = dummy_peer(1);
        let addr = a.addr();
        peers.insert(a);
        assert!(peers.contains(&addr));
        assert!(peers.remove(&addr).is_some());
        assert!(peers.is_empty());
    }
}
