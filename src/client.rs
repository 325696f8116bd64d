//! Worker side of the coordinator protocol
//!
//! A [`WorkerSession`] speaks the control protocol (connect, receive
//! assignments, report `job_done`, disconnect) over any [`WorkerLink`]. It
//! does not execute file operations itself; callers do that with the
//! [`Work`](crate::protocol::Work) they receive and report an outcome back.

use crate::error::{TransportError, TransportResult};
use crate::protocol::{Assignment, Hello, JobId, JobResult, WorkerId, WorkerMessage};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;
use tracing::debug;

/// Frame-level connection from a worker to the coordinator
pub trait WorkerLink {
    /// Send one frame
    fn send_frame(&mut self, payload: &[u8]) -> TransportResult<()>;

    /// Wait up to `timeout` for one frame
    fn recv_frame(&mut self, timeout: Duration) -> TransportResult<Option<Vec<u8>>>;
}

/// Line-framed TCP connection to a coordinator
pub struct TcpLink {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
    pending: Vec<u8>,
}

impl TcpLink {
    /// Connect and bind the connection to `identity`
    pub fn connect(addr: &str, identity: &WorkerId) -> TransportResult<Self> {
        let connect_failed = |e| TransportError::ConnectFailed {
            endpoint: addr.to_string(),
            source: e,
        };
        let stream = TcpStream::connect(addr).map_err(connect_failed)?;
        let _ = stream.set_nodelay(true);
        let reader = stream.try_clone().map_err(connect_failed)?;

        let mut link = Self {
            writer: stream,
            reader: BufReader::new(reader),
            pending: Vec::new(),
        };
        let hello = serde_json::to_vec(&Hello {
            identity: identity.clone(),
        })?;
        link.send_frame(&hello)?;
        Ok(link)
    }

    fn send_failed(&self, source: std::io::Error) -> TransportError {
        let peer = self
            .writer
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "coordinator".to_string());
        TransportError::SendFailed {
            peer: WorkerId::from(peer),
            source,
        }
    }
}

impl WorkerLink for TcpLink {
    fn send_frame(&mut self, payload: &[u8]) -> TransportResult<()> {
        let result = self
            .writer
            .write_all(payload)
            .and_then(|_| self.writer.write_all(b"\n"))
            .and_then(|_| self.writer.flush());
        result.map_err(|e| self.send_failed(e))
    }

    fn recv_frame(&mut self, timeout: Duration) -> TransportResult<Option<Vec<u8>>> {
        // A zero read timeout means "block forever" to the OS
        let timeout = timeout.max(Duration::from_millis(1));
        self.reader
            .get_ref()
            .set_read_timeout(Some(timeout))
            .map_err(|e| TransportError::Decode {
                reason: e.to_string(),
            })?;

        // Partial lines stay in `pending` across timeouts
        match self.reader.read_until(b'\n', &mut self.pending) {
            Ok(0) => Err(TransportError::ChannelClosed),
            Ok(_) if self.pending.ends_with(b"\n") => {
                let mut frame = std::mem::take(&mut self.pending);
                while matches!(frame.last(), Some(b'\n' | b'\r')) {
                    frame.pop();
                }
                Ok(Some(frame))
            }
            Ok(_) => Err(TransportError::ChannelClosed),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(None),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(TransportError::Decode {
                reason: e.to_string(),
            }),
        }
    }
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        let _ = self.writer.shutdown(Shutdown::Both);
    }
}

/// Protocol session of one worker
pub struct WorkerSession<L: WorkerLink> {
    identity: WorkerId,
    link: L,
}

impl WorkerSession<TcpLink> {
    /// Connect to a coordinator over TCP and announce the worker
    pub fn connect_tcp(addr: &str, identity: WorkerId) -> TransportResult<Self> {
        let link = TcpLink::connect(addr, &identity)?;
        Self::start(identity, link)
    }
}

impl<L: WorkerLink> WorkerSession<L> {
    /// Send `connect` over an established link
    pub fn start(identity: WorkerId, mut link: L) -> TransportResult<Self> {
        link.send_frame(&serde_json::to_vec(&WorkerMessage::Connect)?)?;
        debug!(worker = %identity, "Worker connected");
        Ok(Self { identity, link })
    }

    pub fn identity(&self) -> &WorkerId {
        &self.identity
    }

    /// Wait up to `timeout` for the next assignment
    pub fn next_assignment(&mut self, timeout: Duration) -> TransportResult<Option<Assignment>> {
        let Some(frame) = self.link.recv_frame(timeout)? else {
            return Ok(None);
        };
        serde_json::from_slice(&frame)
            .map(Some)
            .map_err(|e| TransportError::Decode {
                reason: e.to_string(),
            })
    }

    /// Report the result of a job
    pub fn job_done(&mut self, job_id: JobId, result: JobResult) -> TransportResult<()> {
        let msg = WorkerMessage::JobDone { job_id, result };
        self.link.send_frame(&serde_json::to_vec(&msg)?)
    }

    /// Send a raw frame, bypassing message encoding
    pub fn send_raw(&mut self, payload: &[u8]) -> TransportResult<()> {
        self.link.send_frame(payload)
    }

    /// Send `disconnect` and hand back the link
    pub fn disconnect(mut self) -> TransportResult<L> {
        self.link
            .send_frame(&serde_json::to_vec(&WorkerMessage::Disconnect)?)?;
        debug!(worker = %self.identity, "Worker disconnected");
        Ok(self.link)
    }

    /// Drop the session without saying goodbye
    pub fn abandon(self) -> L {
        self.link
    }
}
