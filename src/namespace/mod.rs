//! Shadow model of the namespace under test
//!
//! The model mirrors what the coordinator *expects* to exist on the shared
//! mount: which directories and files are on disk, when they were created or
//! last modified, and the content last written to each file.
//!
//! Directories are created up front with random 64-character names and only
//! become `ondisk` once a worker confirms the `mkdir`. Files are fixed slots
//! inside their directory and are never removed from the model; a delete just
//! clears `ondisk`. A directory that fills up is retired and replaced by a
//! fresh sibling.
//!
//! The model has a single writer, the verifier, driven from the scheduler
//! loop. The workload planner only reads it.

pub mod names;
pub mod tree;

pub use tree::{
    DirId, Directory, FileContent, FileEntry, Namespace, TreeShape, DEFAULT_FILES_PER_DIR,
};
