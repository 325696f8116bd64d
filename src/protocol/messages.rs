//! Control messages exchanged over the coordinator channel

use crate::error::ProtocolError;
use crate::protocol::outcome::Outcome;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a worker process
///
/// Workers derive it from their host name and process id, e.g.
/// `client01:0x1f`. The transport attaches it to every inbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    /// Build the identity a worker process uses for itself
    pub fn for_process(host: &str, proc_id: u32) -> Self {
        Self(format!("{}:0x{:x}", host, proc_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for WorkerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque unique job identifier (UUID v4, simple hex form)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Mint a fresh job id
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// File operation a worker can be asked to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Mkdir,
    Touch,
    List,
    Stat,
    Read,
    Write,
    Delete,
    Rename,
    RenameExist,
    Truncate,
}

impl Action {
    /// Every action, in wire order
    pub const ALL: [Action; 10] = [
        Action::Mkdir,
        Action::Touch,
        Action::List,
        Action::Stat,
        Action::Read,
        Action::Write,
        Action::Delete,
        Action::Rename,
        Action::RenameExist,
        Action::Truncate,
    ];

    /// Wire name of the action
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Mkdir => "mkdir",
            Action::Touch => "touch",
            Action::List => "list",
            Action::Stat => "stat",
            Action::Read => "read",
            Action::Write => "write",
            Action::Delete => "delete",
            Action::Rename => "rename",
            Action::RenameExist => "rename_exist",
            Action::Truncate => "truncate",
        }
    }

    /// Whether this action creates a namespace entry
    pub fn is_create(&self) -> bool {
        matches!(self, Action::Mkdir | Action::Touch)
    }

    /// Dense index, used for per-action counters
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action-specific parameters sent alongside a job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkParams {
    /// Session token of the target file at dispatch time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    /// Byte offset for read/write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,

    /// Chunk length for read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u64>,

    /// Data pattern id for write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_pattern: Option<u32>,

    /// Pattern repeat count for write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeats: Option<u64>,

    /// New basename (rename) or destination path (rename_exist)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename_dest: Option<String>,

    /// New length for truncate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Work payload: what a worker should do and where
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Work {
    pub action: Action,
    pub target: String,
    #[serde(flatten)]
    pub params: WorkParams,
}

impl Work {
    pub fn new(action: Action, target: impl Into<String>) -> Self {
        Self {
            action,
            target: target.into(),
            params: WorkParams::default(),
        }
    }

    pub fn with_params(mut self, params: WorkParams) -> Self {
        self.params = params;
        self
    }
}

/// Coordinator -> worker frame, encoded as `[job_id, work]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment(pub JobId, pub Work);

/// First frame on a stream connection, binding it to an identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub identity: WorkerId,
}

/// Result carried by `job_done`
///
/// Structured outcomes are verified; anything else is counted and logged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobResult {
    Outcome(Box<Outcome>),
    Text(String),
    Raw(serde_json::Value),
}

impl JobResult {
    /// Why a result shaped like an outcome failed to decode as one
    ///
    /// Objects carrying both `result` and `action` are meant to be verified,
    /// so a decode failure there is a worker bug rather than free-form data.
    pub fn outcome_error(&self) -> Option<String> {
        let JobResult::Raw(value) = self else {
            return None;
        };
        let object = value.as_object()?;
        if !object.contains_key("result") || !object.contains_key("action") {
            return None;
        }
        serde_json::from_value::<Outcome>(value.clone())
            .err()
            .map(|e| e.to_string())
    }
}

/// Worker -> coordinator control message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message", rename_all = "snake_case")]
pub enum WorkerMessage {
    Connect,
    Disconnect,
    JobDone { job_id: JobId, result: JobResult },
}

impl WorkerMessage {
    /// Decode an inbound frame from `worker`
    ///
    /// An unrecognised `message` kind is reported separately from a frame that
    /// is not JSON at all; both are fatal to the caller.
    pub fn decode(worker: &WorkerId, payload: &[u8]) -> Result<Self, ProtocolError> {
        let value: serde_json::Value =
            serde_json::from_slice(payload).map_err(|e| ProtocolError::MalformedFrame {
                worker: worker.clone(),
                reason: e.to_string(),
            })?;

        let kind = value
            .get("message")
            .and_then(|k| k.as_str())
            .ok_or_else(|| ProtocolError::MalformedFrame {
                worker: worker.clone(),
                reason: "missing 'message' field".into(),
            })?;

        match kind {
            "connect" | "disconnect" | "job_done" => {
                serde_json::from_value(value).map_err(|e| ProtocolError::MalformedFrame {
                    worker: worker.clone(),
                    reason: e.to_string(),
                })
            }
            other => Err(ProtocolError::UnknownMessage {
                worker: worker.clone(),
                kind: other.to_string(),
            }),
        }
    }

    /// Message kind as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerMessage::Connect => "connect",
            WorkerMessage::Disconnect => "disconnect",
            WorkerMessage::JobDone { .. } => "job_done",
        }
    }
}
