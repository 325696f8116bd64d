//! Identity-addressed message transport
//!
//! The coordinator binds one endpoint that many workers connect to. Every
//! inbound frame carries the identity of its sender and every outbound frame
//! is addressed to one identity. Frames from a single worker arrive in order;
//! there is no ordering across workers.
//!
//! Two implementations share the same inbound plumbing:
//!
//! - [`tcp::TcpHub`]: newline-delimited JSON over TCP, one reader thread per
//!   connection.
//! - [`memory::MemoryHub`]: in-process channels, for tests and simulation.
//!
//! Both funnel frames into a bounded `crossbeam-channel`, so a slow
//! coordinator applies backpressure to the reader threads instead of
//! buffering without limit.

pub mod memory;
pub mod tcp;

use crate::error::{TransportError, TransportResult};
use crate::protocol::WorkerId;
use crossbeam_channel::{after, bounded, select, Receiver, Sender, TryRecvError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default capacity of the inbound frame channel
pub const DEFAULT_INBOUND_CAPACITY: usize = 4096;

/// Event delivered to the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// One message frame from a worker
    Frame { from: WorkerId, payload: Vec<u8> },

    /// The worker's connection went away
    Closed { from: WorkerId },
}

impl Inbound {
    pub fn sender(&self) -> &WorkerId {
        match self {
            Inbound::Frame { from, .. } | Inbound::Closed { from } => from,
        }
    }
}

/// Coordinator side of the message channel
pub trait Transport {
    /// Next pending inbound event, without blocking
    fn try_recv(&self) -> TransportResult<Option<Inbound>>;

    /// Wait up to `timeout` for the next inbound event
    fn recv_timeout(&self, timeout: Duration) -> TransportResult<Option<Inbound>>;

    /// Send one frame to the worker with the given identity
    fn send(&self, to: &WorkerId, payload: &[u8]) -> TransportResult<()>;

    /// Human-readable endpoint description
    fn endpoint(&self) -> String;
}

/// Counters for the inbound channel
#[derive(Debug, Default)]
pub struct ChannelStats {
    /// Frames pushed by connection handlers
    pub frames_in: AtomicU64,

    /// Frames sent to workers
    pub frames_out: AtomicU64,

    /// Connections that closed
    pub closed: AtomicU64,
}

impl ChannelStats {
    pub fn frames_in(&self) -> u64 {
        self.frames_in.load(Ordering::Relaxed)
    }

    pub fn frames_out(&self) -> u64 {
        self.frames_out.load(Ordering::Relaxed)
    }

    pub fn closed(&self) -> u64 {
        self.closed.load(Ordering::Relaxed)
    }
}

/// Bounded inbound channel shared by the transports
pub(crate) struct InboundQueue {
    sender: Sender<Inbound>,
    receiver: Receiver<Inbound>,
    stats: Arc<ChannelStats>,
}

impl InboundQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            stats: Arc::new(ChannelStats::default()),
        }
    }

    /// Handle for a connection handler to push events with
    pub(crate) fn sender(&self) -> InboundSender {
        InboundSender {
            sender: self.sender.clone(),
            stats: Arc::clone(&self.stats),
        }
    }

    pub(crate) fn stats(&self) -> Arc<ChannelStats> {
        Arc::clone(&self.stats)
    }

    pub(crate) fn record_sent(&self) {
        self.stats.frames_out.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn try_recv(&self) -> TransportResult<Option<Inbound>> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(TransportError::ChannelClosed),
        }
    }

    /// Wait for an event or for the timer, whichever comes first
    pub(crate) fn recv_timeout(&self, timeout: Duration) -> TransportResult<Option<Inbound>> {
        let timer = after(timeout);
        select! {
            recv(self.receiver) -> event => match event {
                Ok(event) => Ok(Some(event)),
                Err(_) => Err(TransportError::ChannelClosed),
            },
            recv(timer) -> _ => Ok(None),
        }
    }
}

/// Producer handle for the inbound channel
#[derive(Clone)]
pub(crate) struct InboundSender {
    sender: Sender<Inbound>,
    stats: Arc<ChannelStats>,
}

impl InboundSender {
    /// Push a frame, blocking while the channel is full
    ///
    /// Returns `false` once the coordinator side is gone.
    pub(crate) fn frame(&self, from: &WorkerId, payload: Vec<u8>) -> bool {
        let ok = self
            .sender
            .send(Inbound::Frame {
                from: from.clone(),
                payload,
            })
            .is_ok();
        if ok {
            self.stats.frames_in.fetch_add(1, Ordering::Relaxed);
        }
        ok
    }

    /// Report that a connection closed
    pub(crate) fn closed(&self, from: &WorkerId) -> bool {
        self.stats.closed.fetch_add(1, Ordering::Relaxed);
        self.sender
            .send(Inbound::Closed { from: from.clone() })
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_inbound_queue_order() {
        let queue = InboundQueue::new(16);
        let tx = queue.sender();
        let worker = WorkerId::from("client01:0x1");

        assert!(tx.frame(&worker, b"one".to_vec()));
        assert!(tx.frame(&worker, b"two".to_vec()));
        assert!(tx.closed(&worker));

        let first = queue.try_recv().unwrap().unwrap();
        assert_eq!(
            first,
            Inbound::Frame {
                from: worker.clone(),
                payload: b"one".to_vec()
            }
        );
        let second = queue.try_recv().unwrap().unwrap();
        assert!(matches!(second, Inbound::Frame { ref payload, .. } if payload == b"two"));
        let third = queue.try_recv().unwrap().unwrap();
        assert_eq!(third, Inbound::Closed { from: worker });
        assert!(queue.try_recv().unwrap().is_none());

        let stats = queue.stats();
        assert_eq!(stats.frames_in(), 2);
        assert_eq!(stats.closed(), 1);
    }

    #[test]
    fn test_recv_timeout_expires() {
        let queue = InboundQueue::new(4);
        let start = Instant::now();
        let event = queue.recv_timeout(Duration::from_millis(50)).unwrap();
        assert!(event.is_none());
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_recv_timeout_wakes_early() {
        let queue = InboundQueue::new(4);
        let tx = queue.sender();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            tx.frame(&WorkerId::from("client02:0x2"), b"{}".to_vec());
        });

        let start = Instant::now();
        let event = queue.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(event.is_some());
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }
}
