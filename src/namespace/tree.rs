//! Arena-backed directory tree
//!
//! Directories live in a `Vec` and are addressed by [`DirId`]. Files live in
//! a fixed number of slots inside their directory and are addressed by slot
//! index. Parent/child links are index lists; a name index maps directory
//! names to ids for resolving worker-reported paths.

use crate::namespace::names::{random_name, session_token, NAME_LEN};
use crate::protocol::{OutcomeData, WireToken};
use chrono::NaiveDateTime;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::fmt;

/// Default number of file slots per directory
pub const DEFAULT_FILES_PER_DIR: usize = 1000;

/// Arena key of a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirId(usize);

impl DirId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for DirId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dir#{}", self.0)
    }
}

/// Shape of the initial tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeShape {
    /// Levels below the first one (0 = a single flat level)
    pub depth: usize,

    /// Children per directory
    pub width: usize,

    /// File slots per directory
    pub files_per_dir: usize,
}

impl Default for TreeShape {
    fn default() -> Self {
        Self {
            depth: 1,
            width: 10,
            files_per_dir: DEFAULT_FILES_PER_DIR,
        }
    }
}

impl TreeShape {
    /// Number of directories the shape produces
    pub fn dir_count(&self) -> usize {
        let mut total = 0usize;
        let mut level = 1usize;
        for _ in 0..=self.depth {
            level = level.saturating_mul(self.width);
            total = total.saturating_add(level);
        }
        total
    }
}

/// Last confirmed content written to a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    /// Pattern id or literal pattern reported by the writer
    pub pattern: Option<WireToken>,

    /// Pattern repeat count
    pub pattern_len: Option<u64>,

    /// Hash of the written chunk
    pub hash: WireToken,

    /// Offset of the written chunk
    pub offset: u64,

    /// Length of the written chunk in bytes
    pub chunk_size: Option<u64>,
}

impl FileContent {
    /// Content described by a successful write outcome
    ///
    /// Returns `None` when the worker did not report a hash.
    pub fn from_write(data: &OutcomeData) -> Option<Self> {
        Some(Self {
            pattern: data.data_pattern.clone(),
            pattern_len: data.repeats,
            hash: data.hash.clone()?,
            offset: data.offset.unwrap_or(0),
            chunk_size: data.chunk_size,
        })
    }

    /// End offset of the recorded chunk
    pub fn end(&self) -> u64 {
        let len = self.chunk_size.or(self.pattern_len).unwrap_or(0);
        self.offset.saturating_add(len)
    }
}

/// A file slot in the shadow tree
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub name: String,
    pub ondisk: bool,
    pub creation_time: Option<NaiveDateTime>,
    pub modify_time: Option<NaiveDateTime>,
    pub content: Option<FileContent>,

    /// Rotated on every confirmed content change
    pub session_token: Option<String>,
}

impl FileEntry {
    fn new(name: String) -> Self {
        Self {
            name,
            ondisk: false,
            creation_time: None,
            modify_time: None,
            content: None,
            session_token: None,
        }
    }

    /// Replace the session token with a fresh one
    pub fn rotate_token(&mut self) {
        self.session_token = Some(session_token());
    }

    /// Latest confirmed timestamp (creation or modification)
    pub fn last_good(&self) -> Option<NaiveDateTime> {
        self.creation_time.max(self.modify_time)
    }
}

/// A directory node in the shadow tree
#[derive(Debug, Clone)]
pub struct Directory {
    pub name: String,
    pub parent: Option<DirId>,
    pub children: Vec<DirId>,
    pub size: u64,
    pub ondisk: bool,
    pub creation_time: Option<NaiveDateTime>,
    pub retired: bool,
    files: Vec<FileEntry>,
    file_index: HashMap<String, usize>,
}

impl Directory {
    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn file(&self, slot: usize) -> Option<&FileEntry> {
        self.files.get(slot)
    }

    pub fn file_mut(&mut self, slot: usize) -> Option<&mut FileEntry> {
        self.files.get_mut(slot)
    }

    /// Slot of the file currently named `name`
    pub fn file_slot(&self, name: &str) -> Option<usize> {
        self.file_index.get(name).copied()
    }

    /// Rename the file in `slot`, keeping the name index in step
    ///
    /// Returns `false` if the slot does not exist or `new_name` already
    /// belongs to another slot.
    pub fn rename_file(&mut self, slot: usize, new_name: &str) -> bool {
        if matches!(self.file_index.get(new_name), Some(&other) if other != slot) {
            return false;
        }
        let Some(file) = self.files.get_mut(slot) else {
            return false;
        };
        self.file_index.remove(&file.name);
        file.name = new_name.to_string();
        self.file_index.insert(new_name.to_string(), slot);
        true
    }

    pub fn files_on_disk(&self) -> usize {
        self.files.iter().filter(|f| f.ondisk).count()
    }
}

/// Shadow model of the namespace under test
pub struct Namespace {
    dirs: Vec<Directory>,
    by_name: HashMap<String, DirId>,
    roots: Vec<DirId>,

    /// Directories still in play (not retired), in creation order
    active: Vec<DirId>,

    /// Directories confirmed on disk
    synced: Vec<DirId>,

    files_per_dir: usize,
    rng: StdRng,
}

impl Namespace {
    /// Build the initial tree
    ///
    /// `width` directories are created at the top level, each of which gets
    /// `width` children, `depth` levels deep.
    pub fn build(shape: TreeShape, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut ns = Self {
            dirs: Vec::with_capacity(shape.dir_count()),
            by_name: HashMap::with_capacity(shape.dir_count()),
            roots: Vec::with_capacity(shape.width),
            active: Vec::with_capacity(shape.dir_count()),
            synced: Vec::new(),
            files_per_dir: shape.files_per_dir,
            rng,
        };

        let mut level: Vec<Option<DirId>> = vec![None];
        for _ in 0..=shape.depth {
            let mut next = Vec::with_capacity(level.len() * shape.width);
            for parent in level {
                for _ in 0..shape.width {
                    next.push(Some(ns.add_dir(parent)));
                }
            }
            level = next;
        }

        ns
    }

    fn unique_name(&mut self) -> String {
        loop {
            let name = random_name(&mut self.rng, NAME_LEN);
            if !self.by_name.contains_key(&name) {
                return name;
            }
        }
    }

    fn add_dir(&mut self, parent: Option<DirId>) -> DirId {
        let id = DirId(self.dirs.len());
        let name = self.unique_name();

        let mut files = Vec::with_capacity(self.files_per_dir);
        let mut file_index = HashMap::with_capacity(self.files_per_dir);
        while files.len() < self.files_per_dir {
            let file_name = random_name(&mut self.rng, NAME_LEN);
            if file_index.contains_key(&file_name) {
                continue;
            }
            file_index.insert(file_name.clone(), files.len());
            files.push(FileEntry::new(file_name));
        }

        self.dirs.push(Directory {
            name: name.clone(),
            parent,
            children: Vec::new(),
            size: 0,
            ondisk: false,
            creation_time: None,
            retired: false,
            files,
            file_index,
        });
        self.by_name.insert(name, id);
        self.active.push(id);

        match parent {
            Some(p) => self.dirs[p.0].children.push(id),
            None => self.roots.push(id),
        }
        id
    }

    pub fn dir(&self, id: DirId) -> &Directory {
        &self.dirs[id.0]
    }

    pub fn dir_mut(&mut self, id: DirId) -> &mut Directory {
        &mut self.dirs[id.0]
    }

    /// Resolve an active directory by name
    pub fn dir_by_name(&self, name: &str) -> Option<DirId> {
        self.by_name.get(name).copied()
    }

    /// Resolve a file by directory and file name
    pub fn file_by_name(&self, dir: &str, file: &str) -> Option<(DirId, usize)> {
        let id = self.dir_by_name(dir)?;
        let slot = self.dir(id).file_slot(file)?;
        Some((id, slot))
    }

    pub fn roots(&self) -> &[DirId] {
        &self.roots
    }

    pub fn active(&self) -> &[DirId] {
        &self.active
    }

    pub fn synced(&self) -> &[DirId] {
        &self.synced
    }

    pub fn is_synced(&self, id: DirId) -> bool {
        self.synced.contains(&id)
    }

    /// Active directories not yet confirmed on disk
    pub fn unsynced(&self) -> impl Iterator<Item = DirId> + '_ {
        self.active.iter().copied().filter(|id| !self.dirs[id.0].ondisk)
    }

    /// Record a confirmed directory creation
    pub fn mark_synced(&mut self, id: DirId, size: Option<u64>, created: NaiveDateTime) {
        let dir = &mut self.dirs[id.0];
        if let Some(size) = size {
            dir.size = size;
        }
        dir.ondisk = true;
        dir.creation_time = Some(created);
        if !self.synced.contains(&id) {
            self.synced.push(id);
        }
    }

    /// Record that a directory is no longer on disk
    pub fn mark_missing(&mut self, id: DirId) {
        self.dirs[id.0].ondisk = false;
        self.synced.retain(|d| *d != id);
    }

    /// Take a directory out of play
    ///
    /// The node stays in the arena but can no longer be resolved by name.
    /// Returns `false` if it was already retired.
    pub fn retire(&mut self, id: DirId) -> bool {
        let dir = &mut self.dirs[id.0];
        if dir.retired {
            return false;
        }
        dir.retired = true;
        self.by_name.remove(&dir.name);
        self.active.retain(|d| *d != id);
        self.synced.retain(|d| *d != id);
        true
    }

    /// Add a fresh directory under the same parent as `sibling`
    pub fn append_sibling(&mut self, sibling: DirId) -> DirId {
        let parent = self.dirs[sibling.0].parent;
        self.add_dir(parent)
    }

    /// Retire `id` and append a fresh sibling in its place
    ///
    /// Returns the replacement, or `None` if `id` was already retired.
    pub fn replace_dir(&mut self, id: DirId) -> Option<DirId> {
        if !self.retire(id) {
            return None;
        }
        Some(self.append_sibling(id))
    }

    /// Mount-relative target of a directory
    pub fn dir_target(&self, id: DirId) -> String {
        format!("/{}", self.dirs[id.0].name)
    }

    /// Mount-relative target of a file
    pub fn file_target(&self, id: DirId, slot: usize) -> Option<String> {
        let dir = &self.dirs[id.0];
        dir.file(slot).map(|f| format!("/{}/{}", dir.name, f.name))
    }

    pub fn files_per_dir(&self) -> usize {
        self.files_per_dir
    }

    /// Total directories ever created, retired ones included
    pub fn total_dirs(&self) -> usize {
        self.dirs.len()
    }

    /// Files on disk across active directories
    pub fn files_on_disk(&self) -> usize {
        self.active
            .iter()
            .map(|id| self.dirs[id.0].files_on_disk())
            .sum()
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("dirs", &self.dirs.len())
            .field("active", &self.active.len())
            .field("synced", &self.synced.len())
            .field("files_per_dir", &self.files_per_dir)
            .finish()
    }
}
