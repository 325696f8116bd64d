//! Structured operation outcomes reported by workers
//!
//! An outcome describes one executed action: whether it succeeded, when the
//! worker observed the result, and the action-specific data the verifier needs
//! (directory size, content hash, session token, rename endpoints, ...).

use crate::protocol::messages::Action;
use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Timestamp format used on the wire (`2017/03/01 12:00:00.123456`)
pub const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S%.f";

const TIMESTAMP_WRITE_FORMAT: &str = "%Y/%m/%d %H:%M:%S%.6f";

/// Parse a wire timestamp
pub fn parse_timestamp(s: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
}

/// Format a timestamp for the wire
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_WRITE_FORMAT).to_string()
}

mod wire_timestamp {
    use super::{format_timestamp, parse_timestamp};
    use chrono::NaiveDateTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        parse_timestamp(&raw).map_err(de::Error::custom)
    }
}

/// Errno values the verifier distinguishes
pub mod errno {
    pub const ENOENT: i32 = 2;
    pub const EEXIST: i32 = 17;
    pub const ESTALE: i32 = 116;
}

/// Whether the action succeeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Failed,
}

/// Failure code attached to a failed outcome
///
/// Workers send either a symbolic code or an OS errno (as a number or by
/// name). Codes nobody recognises are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoTarget,
    MaxDirSize,
    ZeroSize,
    SameFile,
    HashError,
    Errno(i32),
    Other(String),
}

impl ErrorCode {
    /// Codes tolerated for every action
    pub fn is_base_tolerated(&self) -> bool {
        matches!(
            self,
            ErrorCode::NoTarget | ErrorCode::Errno(errno::EEXIST) | ErrorCode::Errno(errno::ESTALE)
        )
    }

    pub fn is_enoent(&self) -> bool {
        matches!(self, ErrorCode::Errno(errno::ENOENT))
    }

    fn from_name(name: &str) -> Self {
        match name {
            "NoTarget" => ErrorCode::NoTarget,
            "MaxDirSize" => ErrorCode::MaxDirSize,
            "ZeroSize" => ErrorCode::ZeroSize,
            "SameFile" => ErrorCode::SameFile,
            "HashError" => ErrorCode::HashError,
            "ENOENT" => ErrorCode::Errno(errno::ENOENT),
            "EEXIST" => ErrorCode::Errno(errno::EEXIST),
            "ESTALE" => ErrorCode::Errno(errno::ESTALE),
            other => match other.parse::<i32>() {
                Ok(n) => ErrorCode::Errno(n),
                Err(_) => ErrorCode::Other(other.to_string()),
            },
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::NoTarget => f.write_str("NoTarget"),
            ErrorCode::MaxDirSize => f.write_str("MaxDirSize"),
            ErrorCode::ZeroSize => f.write_str("ZeroSize"),
            ErrorCode::SameFile => f.write_str("SameFile"),
            ErrorCode::HashError => f.write_str("HashError"),
            ErrorCode::Errno(errno::ENOENT) => f.write_str("ENOENT"),
            ErrorCode::Errno(errno::EEXIST) => f.write_str("EEXIST"),
            ErrorCode::Errno(errno::ESTALE) => f.write_str("ESTALE"),
            ErrorCode::Errno(n) => write!(f, "errno {}", n),
            ErrorCode::Other(s) => f.write_str(s),
        }
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            ErrorCode::Errno(n) => s.serialize_i32(*n),
            ErrorCode::Other(raw) => s.serialize_str(raw),
            named => s.collect_str(named),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CodeRepr {
    Number(i64),
    Name(String),
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(match CodeRepr::deserialize(d)? {
            CodeRepr::Number(n) => match i32::try_from(n) {
                Ok(n) => ErrorCode::Errno(n),
                Err(_) => ErrorCode::Other(n.to_string()),
            },
            CodeRepr::Name(name) => ErrorCode::from_name(&name),
        })
    }
}

/// Opaque value that workers may send as either a number or a string
///
/// Content hashes and pattern ids arrive in both forms depending on the
/// worker's I/O path; they are compared as strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WireToken(String);

impl WireToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WireToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<u64> for WireToken {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl fmt::Display for WireToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for WireToken {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TokenRepr {
    Unsigned(u64),
    Signed(i64),
    Text(String),
}

impl<'de> Deserialize<'de> for WireToken {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(match TokenRepr::deserialize(d)? {
            TokenRepr::Unsigned(n) => WireToken(n.to_string()),
            TokenRepr::Signed(n) => WireToken(n.to_string()),
            TokenRepr::Text(s) => WireToken(s),
        })
    }
}

/// Action-specific result data
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutcomeData {
    /// Parent directory size after mkdir/touch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dirsize: Option<u64>,

    /// Content hash of the chunk read or written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<WireToken>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u64>,

    /// Session token the worker was given with the job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_pattern: Option<WireToken>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeats: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rename_dest: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rename_source: Option<String>,

    /// New file length after truncate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

/// Result of one executed action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub result: OutcomeStatus,
    pub action: Action,
    pub target: String,
    #[serde(with = "wire_timestamp")]
    pub timestamp: NaiveDateTime,
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: OutcomeData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Wall time the worker spent on the operation, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl Outcome {
    /// Successful outcome with the given data
    pub fn success(
        action: Action,
        target: impl Into<String>,
        timestamp: NaiveDateTime,
        data: OutcomeData,
    ) -> Self {
        Self {
            result: OutcomeStatus::Success,
            action,
            target: target.into(),
            timestamp,
            data,
            error_code: None,
            error_message: None,
            duration: None,
        }
    }

    /// Failed outcome carrying an error code
    pub fn failure(
        action: Action,
        target: impl Into<String>,
        timestamp: NaiveDateTime,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            result: OutcomeStatus::Failed,
            action,
            target: target.into(),
            timestamp,
            data: OutcomeData::default(),
            error_code: Some(code),
            error_message: Some(message.into()),
            duration: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result == OutcomeStatus::Success
    }

    /// Decompose the target into its directory and file components
    pub fn target_path(&self) -> Option<TargetPath> {
        TargetPath::parse(&self.target)
    }
}

/// Mount-relative target decomposed into directory and optional file name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetPath {
    pub dir: String,
    pub file: Option<String>,
}

impl TargetPath {
    /// Parse `/<dir>` or `/<dir>/<file>`
    ///
    /// The namespace is exactly two levels deep, so anything longer cannot
    /// name a tracked entry and is rejected.
    pub fn parse(target: &str) -> Option<Self> {
        let parts: Vec<&str> = target.split('/').filter(|p| !p.is_empty()).collect();
        match parts.as_slice() {
            [dir] => Some(Self {
                dir: dir.to_string(),
                file: None,
            }),
            [dir, file] => Some(Self {
                dir: dir.to_string(),
                file: Some(file.to_string()),
            }),
            _ => None,
        }
    }

    pub fn dir_only(dir: &str) -> Self {
        Self {
            dir: dir.to_string(),
            file: None,
        }
    }

    pub fn file(dir: &str, file: &str) -> Self {
        Self {
            dir: dir.to_string(),
            file: Some(file.to_string()),
        }
    }

    pub fn is_file(&self) -> bool {
        self.file.is_some()
    }
}

impl fmt::Display for TargetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "/{}/{}", self.dir, file),
            None => write!(f, "/{}", self.dir),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::JobResult;

    #[test]
    fn test_parse_timestamp() {
        let ts = parse_timestamp("2017/03/01 12:30:45.250000").unwrap();
        assert_eq!(format_timestamp(&ts), "2017/03/01 12:30:45.250000");
        assert!(parse_timestamp("2017-03-01T12:30:45").is_err());
    }

    #[test]
    fn test_target_path() {
        assert_eq!(TargetPath::parse("/abc"), Some(TargetPath::dir_only("abc")));
        assert_eq!(TargetPath::parse("/abc/def"), Some(TargetPath::file("abc", "def")));
        assert_eq!(TargetPath::parse("/mnt/VFS0/abc/def"), None);
        assert_eq!(TargetPath::parse("/mnt/x/abc"), None);
        assert_eq!(TargetPath::parse("/"), None);
        assert_eq!(TargetPath::parse(""), None);
        assert_eq!(TargetPath::file("abc", "def").to_string(), "/abc/def");
    }

    #[test]
    fn test_error_code_forms() {
        let codes: Vec<ErrorCode> =
            serde_json::from_str(r#"[17, "ENOENT", "MaxDirSize", "NoTarget", "Weird", 116]"#).unwrap();
        assert_eq!(
            codes,
            vec![
                ErrorCode::Errno(errno::EEXIST),
                ErrorCode::Errno(errno::ENOENT),
                ErrorCode::MaxDirSize,
                ErrorCode::NoTarget,
                ErrorCode::Other("Weird".into()),
                ErrorCode::Errno(errno::ESTALE),
            ]
        );
        assert!(codes[0].is_base_tolerated());
        assert!(!codes[1].is_base_tolerated());
        assert!(codes[1].is_enoent());
        assert!(codes[5].is_base_tolerated());
    }

    #[test]
    fn test_decode_read_outcome() {
        let raw = r#"{
            "result": "success",
            "action": "read",
            "target": "/d1/f1",
            "timestamp": "2017/03/01 12:00:00.000001",
            "data": {"hash": 1234567890123, "offset": 4096, "chunk_size": 256,
                     "uuid": "a1b2c", "tid": 7},
            "duration": 0.002
        }"#;
        let result: JobResult = serde_json::from_str(raw).unwrap();
        let JobResult::Outcome(outcome) = result else {
            panic!("expected structured outcome");
        };
        assert!(outcome.is_success());
        assert_eq!(outcome.data.hash, Some(WireToken::from(1234567890123u64)));
        assert_eq!(outcome.data.uuid.as_deref(), Some("a1b2c"));
        assert_eq!(outcome.target_path(), Some(TargetPath::file("d1", "f1")));
    }

    #[test]
    fn test_decode_failed_outcome() {
        let raw = r#"{
            "result": "failed",
            "action": "stat",
            "target": "/d1/f1",
            "timestamp": "2017/03/01 12:00:00.5",
            "error_code": 2,
            "error_message": "No such file or directory"
        }"#;
        let outcome: Outcome = serde_json::from_str(raw).unwrap();
        assert_eq!(outcome.result, OutcomeStatus::Failed);
        assert!(outcome.error_code.as_ref().is_some_and(ErrorCode::is_enoent));
        assert_eq!(outcome.data, OutcomeData::default());
    }

    #[test]
    fn test_null_data_on_failure() {
        let raw = r#"{
            "result": "failed",
            "action": "stat",
            "target": "/d1/f1",
            "timestamp": "2017/03/01 12:00:00.5",
            "data": null,
            "error_code": 2
        }"#;
        let result: JobResult = serde_json::from_str(raw).unwrap();
        let JobResult::Outcome(outcome) = result else {
            panic!("expected structured outcome");
        };
        assert!(outcome.error_code.as_ref().is_some_and(ErrorCode::is_enoent));
        assert_eq!(outcome.data, OutcomeData::default());
    }

    #[test]
    fn test_plain_string_result() {
        let result: JobResult = serde_json::from_str(r#""success:touch:/d/f:4096""#).unwrap();
        assert_eq!(result, JobResult::Text("success:touch:/d/f:4096".into()));
    }
}
