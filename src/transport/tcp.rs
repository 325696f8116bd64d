//! TCP transport: newline-delimited JSON frames
//!
//! Wire format:
//! - The first line a worker sends is a hello frame, `{"identity": "..."}`,
//!   which binds the connection to that identity.
//! - Every following line is one worker message.
//! - Coordinator frames are written as single lines, `[job_id, work]`.
//!
//! One acceptor thread accepts connections and spawns a reader thread per
//! connection. Readers only decode the hello and forward raw lines; they
//! never touch scheduler state.

use super::{ChannelStats, Inbound, InboundQueue, InboundSender, Transport, DEFAULT_INBOUND_CAPACITY};
use crate::config::Endpoint;
use crate::error::{TransportError, TransportResult};
use crate::protocol::{Hello, WorkerId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How often the acceptor checks for shutdown while idle
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Write side of a connection, tagged with its connection serial
struct PeerConn {
    serial: u64,
    stream: TcpStream,
}

type PeerMap = Arc<Mutex<HashMap<WorkerId, PeerConn>>>;

/// Coordinator end of the TCP transport
pub struct TcpHub {
    inbound: InboundQueue,
    peers: PeerMap,
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
}

impl TcpHub {
    /// Bind the endpoint and start accepting workers
    pub fn bind(endpoint: &Endpoint) -> TransportResult<Self> {
        Self::bind_with_capacity(endpoint, DEFAULT_INBOUND_CAPACITY)
    }

    pub fn bind_with_capacity(endpoint: &Endpoint, capacity: usize) -> TransportResult<Self> {
        let addr = endpoint.bind_addr();
        let listener = TcpListener::bind(&addr).map_err(|e| TransportError::BindFailed {
            endpoint: endpoint.to_string(),
            source: e,
        })?;
        let local_addr = listener.local_addr().map_err(|e| TransportError::BindFailed {
            endpoint: endpoint.to_string(),
            source: e,
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|e| TransportError::BindFailed {
                endpoint: endpoint.to_string(),
                source: e,
            })?;

        let inbound = InboundQueue::new(capacity);
        let peers: PeerMap = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let acceptor = {
            let inbound = inbound.sender();
            let peers = Arc::clone(&peers);
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new()
                .name("tcp-acceptor".into())
                .spawn(move || accept_loop(listener, inbound, peers, shutdown))
                .map_err(|e| TransportError::BindFailed {
                    endpoint: endpoint.to_string(),
                    source: e,
                })?
        };

        info!(addr = %local_addr, "Listening for workers");

        Ok(Self {
            inbound,
            peers,
            local_addr,
            shutdown,
            acceptor: Some(acceptor),
        })
    }

    /// Address the hub is actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> Arc<ChannelStats> {
        self.inbound.stats()
    }

    /// Number of connections that completed the hello
    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }
}

impl Transport for TcpHub {
    fn try_recv(&self) -> TransportResult<Option<Inbound>> {
        self.inbound.try_recv()
    }

    fn recv_timeout(&self, timeout: Duration) -> TransportResult<Option<Inbound>> {
        self.inbound.recv_timeout(timeout)
    }

    fn send(&self, to: &WorkerId, payload: &[u8]) -> TransportResult<()> {
        let mut peers = self.peers.lock();
        let Some(conn) = peers.get_mut(to) else {
            return Err(TransportError::UnknownPeer(to.clone()));
        };

        let result = conn
            .stream
            .write_all(payload)
            .and_then(|_| conn.stream.write_all(b"\n"))
            .and_then(|_| conn.stream.flush());

        if let Err(e) = result {
            let _ = conn.stream.shutdown(Shutdown::Both);
            peers.remove(to);
            return Err(TransportError::SendFailed {
                peer: to.clone(),
                source: e,
            });
        }
        self.inbound.record_sent();
        Ok(())
    }

    fn endpoint(&self) -> String {
        format!("tcp://{}", self.local_addr)
    }
}

impl Drop for TcpHub {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for (_, conn) in self.peers.lock().drain() {
            let _ = conn.stream.shutdown(Shutdown::Both);
        }
        if let Some(handle) = self.acceptor.take() {
            let _ = handle.join();
        }
    }
}

fn accept_loop(
    listener: TcpListener,
    inbound: InboundSender,
    peers: PeerMap,
    shutdown: Arc<AtomicBool>,
) {
    let serials = AtomicU64::new(0);

    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, addr)) => {
                if let Err(e) = stream.set_nonblocking(false) {
                    warn!(addr = %addr, error = %e, "Failed to configure connection");
                    continue;
                }
                let _ = stream.set_nodelay(true);
                let serial = serials.fetch_add(1, Ordering::Relaxed);
                let inbound = inbound.clone();
                let peers = Arc::clone(&peers);

                let spawned = thread::Builder::new()
                    .name(format!("tcp-conn-{}", serial))
                    .spawn(move || serve_connection(stream, addr, serial, inbound, peers));
                if let Err(e) = spawned {
                    warn!(addr = %addr, error = %e, "Failed to spawn connection reader");
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL_INTERVAL),
            Err(e) => {
                warn!(error = %e, "Accept failed");
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
    debug!("Acceptor stopped");
}

fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    serial: u64,
    inbound: InboundSender,
    peers: PeerMap,
) {
    let writer = match stream.try_clone() {
        Ok(w) => w,
        Err(e) => {
            warn!(addr = %addr, error = %e, "Failed to clone connection");
            return;
        }
    };
    let mut reader = BufReader::new(stream);

    let identity = match read_hello(&mut reader) {
        Ok(Some(identity)) => identity,
        Ok(None) => {
            debug!(addr = %addr, "Connection closed before hello");
            return;
        }
        Err(reason) => {
            warn!(addr = %addr, reason = %reason, "Rejecting connection");
            let _ = writer.shutdown(Shutdown::Both);
            return;
        }
    };

    let previous = peers.lock().insert(
        identity.clone(),
        PeerConn {
            serial,
            stream: writer,
        },
    );
    if let Some(previous) = previous {
        warn!(worker = %identity, "Worker reconnected, replacing previous connection");
        let _ = previous.stream.shutdown(Shutdown::Both);
    }
    debug!(worker = %identity, addr = %addr, "Worker attached");

    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {
                let frame = trim_line(&line);
                if frame.is_empty() {
                    continue;
                }
                if !inbound.frame(&identity, frame.to_vec()) {
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(worker = %identity, error = %e, "Connection read failed");
                break;
            }
        }
    }

    let mut peers = peers.lock();
    let current = matches!(peers.get(&identity), Some(conn) if conn.serial == serial);
    if current {
        peers.remove(&identity);
    }
    drop(peers);

    debug!(worker = %identity, "Worker connection closed");
    // A replaced connection must not take its successor down with it
    if current {
        inbound.closed(&identity);
    }
}

/// Read and decode the hello line
///
/// Returns `Ok(None)` on EOF and `Err` with a reason for anything that is not
/// a valid hello.
fn read_hello(reader: &mut BufReader<TcpStream>) -> Result<Option<WorkerId>, String> {
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => return Ok(None),
            Ok(_) => {
                let frame = trim_line(&line);
                if frame.is_empty() {
                    continue;
                }
                let hello: Hello = serde_json::from_slice(frame).map_err(|e| e.to_string())?;
                if hello.identity.as_str().is_empty() {
                    return Err("empty identity".into());
                }
                return Ok(Some(hello.identity));
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.to_string()),
        }
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    &line[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, Write};
    use std::time::Instant;

    fn loopback() -> TcpHub {
        let endpoint = Endpoint::parse("127.0.0.1:0").unwrap();
        TcpHub::bind(&endpoint).unwrap()
    }

    fn wait_for(hub: &TcpHub) -> Inbound {
        hub.recv_timeout(Duration::from_secs(5))
            .unwrap()
            .expect("timed out waiting for inbound event")
    }

    #[test]
    fn test_trim_line() {
        assert_eq!(trim_line(b"abc\r\n"), b"abc");
        assert_eq!(trim_line(b"\n"), b"");
        assert_eq!(trim_line(b"abc"), b"abc");
    }

    #[test]
    fn test_frames_are_tagged_with_hello_identity() {
        let hub = loopback();
        let mut conn = TcpStream::connect(hub.local_addr()).unwrap();
        conn.write_all(b"{\"identity\": \"client01:0x1\"}\n{\"message\": \"connect\"}\n")
            .unwrap();

        let event = wait_for(&hub);
        assert_eq!(
            event,
            Inbound::Frame {
                from: WorkerId::from("client01:0x1"),
                payload: b"{\"message\": \"connect\"}".to_vec(),
            }
        );

        hub.send(&WorkerId::from("client01:0x1"), b"[\"j1\",{}]").unwrap();
        let mut reader = BufReader::new(conn.try_clone().unwrap());
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "[\"j1\",{}]\n");

        drop(reader);
        conn.shutdown(Shutdown::Both).unwrap();
        assert_eq!(
            wait_for(&hub),
            Inbound::Closed {
                from: WorkerId::from("client01:0x1")
            }
        );
    }

    #[test]
    fn test_send_to_unknown_identity() {
        let hub = loopback();
        let err = hub.send(&WorkerId::from("nobody:0x0"), b"[]").unwrap_err();
        assert!(err.is_peer_scoped());
    }

    #[test]
    fn test_bad_hello_is_rejected() {
        let hub = loopback();
        let mut conn = TcpStream::connect(hub.local_addr()).unwrap();
        conn.write_all(b"not a hello\n").unwrap();

        let mut buf = Vec::new();
        let mut reader = BufReader::new(conn);
        // Connection is shut down by the hub without producing any event
        let n = reader.read_until(b'\n', &mut buf).unwrap_or(0);
        assert_eq!(n, 0);

        let start = Instant::now();
        assert!(hub.recv_timeout(Duration::from_millis(100)).unwrap().is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(hub.peer_count(), 0);
    }
}
