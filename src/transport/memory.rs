//! In-process transport over crossbeam channels
//!
//! Mirrors the TCP hub's contract: peers are addressed by identity, a
//! dropped peer surfaces as [`Inbound::Closed`], and sending to an identity
//! with no live peer is an error.

use super::{ChannelStats, Inbound, InboundQueue, InboundSender, Transport, DEFAULT_INBOUND_CAPACITY};
use crate::client::WorkerLink;
use crate::error::{TransportError, TransportResult};
use crate::protocol::WorkerId;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Outbound channel of one peer, tagged with its connection serial
type PeerMap = Arc<Mutex<HashMap<WorkerId, (u64, Sender<Vec<u8>>)>>>;

/// Coordinator end of the in-memory transport
pub struct MemoryHub {
    inbound: InboundQueue,
    peers: PeerMap,
    next_serial: Arc<AtomicU64>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_INBOUND_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inbound: InboundQueue::new(capacity),
            peers: Arc::new(Mutex::new(HashMap::new())),
            next_serial: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Handle that workers use to attach to this hub
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            inbound: self.inbound.sender(),
            peers: Arc::clone(&self.peers),
            next_serial: Arc::clone(&self.next_serial),
        }
    }

    pub fn stats(&self) -> Arc<ChannelStats> {
        self.inbound.stats()
    }

    /// Number of attached peers
    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryHub {
    fn try_recv(&self) -> TransportResult<Option<Inbound>> {
        self.inbound.try_recv()
    }

    fn recv_timeout(&self, timeout: Duration) -> TransportResult<Option<Inbound>> {
        self.inbound.recv_timeout(timeout)
    }

    fn send(&self, to: &WorkerId, payload: &[u8]) -> TransportResult<()> {
        let mut peers = self.peers.lock();
        let Some((_, outbox)) = peers.get(to) else {
            return Err(TransportError::UnknownPeer(to.clone()));
        };

        if outbox.send(payload.to_vec()).is_err() {
            peers.remove(to);
            return Err(TransportError::SendFailed {
                peer: to.clone(),
                source: io::Error::new(io::ErrorKind::BrokenPipe, "peer channel closed"),
            });
        }
        self.inbound.record_sent();
        Ok(())
    }

    fn endpoint(&self) -> String {
        "memory".to_string()
    }
}

/// Cloneable handle for attaching peers to a [`MemoryHub`]
#[derive(Clone)]
pub struct MemoryConnector {
    inbound: InboundSender,
    peers: PeerMap,
    next_serial: Arc<AtomicU64>,
}

impl MemoryConnector {
    /// Attach a new peer under `identity`
    ///
    /// An existing peer with the same identity is replaced, like a worker
    /// reconnecting over TCP.
    pub fn connect(&self, identity: WorkerId) -> MemoryPeer {
        let (tx, rx) = unbounded();
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        self.peers.lock().insert(identity.clone(), (serial, tx));

        MemoryPeer {
            identity,
            serial,
            inbound: self.inbound.clone(),
            outbox: rx,
            peers: Arc::clone(&self.peers),
        }
    }
}

/// Worker end of the in-memory transport
pub struct MemoryPeer {
    identity: WorkerId,
    serial: u64,
    inbound: InboundSender,
    outbox: Receiver<Vec<u8>>,
    peers: PeerMap,
}

impl MemoryPeer {
    pub fn identity(&self) -> &WorkerId {
        &self.identity
    }

    /// Next frame from the coordinator, if one is already queued
    pub fn try_recv(&self) -> Option<Vec<u8>> {
        self.outbox.try_recv().ok()
    }
}

impl WorkerLink for MemoryPeer {
    fn send_frame(&mut self, payload: &[u8]) -> TransportResult<()> {
        if self.inbound.frame(&self.identity, payload.to_vec()) {
            Ok(())
        } else {
            Err(TransportError::ChannelClosed)
        }
    }

    fn recv_frame(&mut self, timeout: Duration) -> TransportResult<Option<Vec<u8>>> {
        match self.outbox.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::ChannelClosed),
        }
    }
}

impl Drop for MemoryPeer {
    fn drop(&mut self) {
        let mut peers = self.peers.lock();
        let current = matches!(peers.get(&self.identity), Some((serial, _)) if *serial == self.serial);
        if current {
            peers.remove(&self.identity);
        }
        drop(peers);
        if current {
            self.inbound.closed(&self.identity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_carry_identity() {
        let hub = MemoryHub::new();
        let mut peer = hub.connector().connect(WorkerId::from("client01:0x1"));

        peer.send_frame(br#"{"message": "connect"}"#).unwrap();
        let event = hub.try_recv().unwrap().unwrap();
        assert_eq!(event.sender(), peer.identity());

        hub.send(peer.identity(), b"[\"j\", {}]").unwrap();
        let frame = peer.recv_frame(Duration::from_millis(100)).unwrap();
        assert_eq!(frame.as_deref(), Some(&b"[\"j\", {}]"[..]));
        assert_eq!(hub.stats().frames_out(), 1);
    }

    #[test]
    fn test_dropped_peer_reports_closed() {
        let hub = MemoryHub::new();
        let id = WorkerId::from("client01:0x2");
        let peer = hub.connector().connect(id.clone());
        assert_eq!(hub.peer_count(), 1);

        drop(peer);

        assert_eq!(hub.peer_count(), 0);
        assert_eq!(hub.try_recv().unwrap(), Some(Inbound::Closed { from: id.clone() }));
        assert!(matches!(
            hub.send(&id, b"x"),
            Err(TransportError::UnknownPeer(_))
        ));
    }

    #[test]
    fn test_reconnect_replaces_peer() {
        let hub = MemoryHub::new();
        let connector = hub.connector();
        let id = WorkerId::from("client01:0x3");

        let old = connector.connect(id.clone());
        let mut new = connector.connect(id.clone());
        drop(old);

        // The stale peer going away must not detach the new one
        assert!(hub.try_recv().unwrap().is_none());
        assert_eq!(hub.peer_count(), 1);
        hub.send(&id, b"ping").unwrap();
        assert_eq!(
            new.recv_frame(Duration::from_millis(100)).unwrap(),
            Some(b"ping".to_vec())
        );
    }
}
