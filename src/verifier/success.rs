//! Handlers for successful outcomes

use super::{Verdict, Violation};
use crate::namespace::{DirId, FileContent, Namespace};
use crate::protocol::{Action, Outcome, TargetPath};
use tracing::debug;

pub(super) fn apply(ns: &mut Namespace, outcome: &Outcome, dir_limit: Option<u64>) -> Verdict {
    let Some(path) = outcome.target_path() else {
        debug!(target = %outcome.target, "Success outcome without a usable target");
        return Verdict::Stale;
    };

    match outcome.action {
        Action::Mkdir => mkdir(ns, &path, outcome, dir_limit),
        Action::Touch => touch(ns, &path, outcome, dir_limit),
        Action::List | Action::Stat => match ns.dir_by_name(&path.dir) {
            Some(_) => Verdict::Committed,
            None => Verdict::Stale,
        },
        Action::Read => read(ns, &path, outcome),
        Action::Write => write(ns, &path, outcome),
        Action::Delete => delete(ns, &path),
        Action::Rename => rename(ns, &path, outcome),
        Action::RenameExist => rename_exist(ns, &path, outcome),
        Action::Truncate => truncate(ns, &path, outcome),
    }
}

/// Resolve a file target, or `None` if either component is untracked
fn resolve_file(ns: &Namespace, path: &TargetPath) -> Option<(DirId, usize)> {
    ns.file_by_name(&path.dir, path.file.as_deref()?)
}

fn mkdir(ns: &mut Namespace, path: &TargetPath, outcome: &Outcome, dir_limit: Option<u64>) -> Verdict {
    let Some(id) = ns.dir_by_name(&path.dir) else {
        return Verdict::Stale;
    };
    ns.mark_synced(id, outcome.data.dirsize, outcome.timestamp);
    debug!(dir = %path.dir, size = ns.dir(id).size, "Directory synced");
    retire_if_full(ns, id, dir_limit)
}

fn touch(ns: &mut Namespace, path: &TargetPath, outcome: &Outcome, dir_limit: Option<u64>) -> Verdict {
    // mkdir may still be in flight, so the directory is not required to be synced
    let Some((id, slot)) = resolve_file(ns, path) else {
        return Verdict::Stale;
    };
    let dir = ns.dir_mut(id);
    if let Some(size) = outcome.data.dirsize {
        dir.size = size;
    }
    if let Some(file) = dir.file_mut(slot) {
        file.ondisk = true;
        file.creation_time = Some(outcome.timestamp);
        file.rotate_token();
    }
    debug!(target = %path, "File synced");
    retire_if_full(ns, id, dir_limit)
}

/// Replace a directory whose tracked size reached `dir_limit`
fn retire_if_full(ns: &mut Namespace, id: DirId, dir_limit: Option<u64>) -> Verdict {
    let size = ns.dir(id).size;
    let Some(limit) = dir_limit.filter(|limit| size >= *limit) else {
        return Verdict::Committed;
    };
    let dir = ns.dir(id).name.clone();
    match ns.replace_dir(id) {
        Some(replacement) => {
            debug!(dir = %dir, size, limit, "Directory size limit reached");
            Verdict::Retired {
                dir,
                replacement: ns.dir(replacement).name.clone(),
            }
        }
        None => Verdict::Committed,
    }
}

fn read(ns: &mut Namespace, path: &TargetPath, outcome: &Outcome) -> Verdict {
    let Some((id, slot)) = resolve_file(ns, path) else {
        return Verdict::Stale;
    };
    let Some(file) = ns.dir(id).file(slot) else {
        return Verdict::Stale;
    };
    let (Some(content), Some(modified), Some(reported)) =
        (&file.content, file.modify_time, &outcome.data.hash)
    else {
        return Verdict::Committed;
    };

    let same_version = outcome.data.uuid.is_some() && outcome.data.uuid == file.session_token;
    if content.hash != *reported && same_version && outcome.timestamp > modified {
        return Verdict::Violation(Violation::HashMismatch {
            path: path.clone(),
            stored: content.hash.clone(),
            reported: reported.clone(),
            offset: outcome.data.offset,
            chunk_size: outcome.data.chunk_size,
        });
    }
    Verdict::Committed
}

fn write(ns: &mut Namespace, path: &TargetPath, outcome: &Outcome) -> Verdict {
    let Some((id, slot)) = resolve_file(ns, path) else {
        return Verdict::Stale;
    };
    let Some(file) = ns.dir_mut(id).file_mut(slot) else {
        return Verdict::Stale;
    };

    if !file.ondisk {
        debug!(target = %path, "Write arrived before touch, syncing");
        file.ondisk = true;
        file.creation_time = Some(outcome.timestamp);
    }
    file.modify_time = Some(outcome.timestamp);
    file.content = FileContent::from_write(&outcome.data);
    file.rotate_token();
    Verdict::Committed
}

fn delete(ns: &mut Namespace, path: &TargetPath) -> Verdict {
    let Some((id, slot)) = resolve_file(ns, path) else {
        return Verdict::Stale;
    };
    if let Some(file) = ns.dir_mut(id).file_mut(slot) {
        file.ondisk = false;
    }
    Verdict::Committed
}

fn rename(ns: &mut Namespace, path: &TargetPath, outcome: &Outcome) -> Verdict {
    let Some((id, slot)) = resolve_file(ns, path) else {
        return Verdict::Stale;
    };
    let Some(new_name) = outcome
        .data
        .rename_dest
        .as_deref()
        .and_then(|dest| dest.rsplit('/').find(|p| !p.is_empty()))
    else {
        debug!(target = %path, "Rename outcome without destination");
        return Verdict::Stale;
    };

    let dir = ns.dir_mut(id);
    if !dir.rename_file(slot, new_name) {
        debug!(target = %path, new_name, "Rename onto a name already tracked in this directory");
        return Verdict::Stale;
    }
    if let Some(file) = dir.file_mut(slot) {
        if !file.ondisk {
            debug!(target = %path, "Rename arrived before touch, syncing");
            file.ondisk = true;
            file.creation_time = Some(outcome.timestamp);
        }
        file.rotate_token();
    }
    Verdict::Committed
}

fn rename_exist(ns: &mut Namespace, path: &TargetPath, outcome: &Outcome) -> Verdict {
    let source = outcome
        .data
        .rename_source
        .as_deref()
        .and_then(TargetPath::parse)
        .unwrap_or_else(|| path.clone());
    let Some(dest) = outcome.data.rename_dest.as_deref().and_then(TargetPath::parse) else {
        debug!(target = %path, "Rename outcome without destination");
        return Verdict::Stale;
    };

    let src = resolve_file(ns, &source);
    let dst = resolve_file(ns, &dest);
    if src.is_none() && dst.is_none() {
        return Verdict::Stale;
    }

    let mut content = None;
    if let Some((id, slot)) = src {
        if let Some(file) = ns.dir_mut(id).file_mut(slot) {
            file.ondisk = false;
            content = file.content.clone();
        }
    }

    if let Some((id, slot)) = dst {
        if let Some(file) = ns.dir_mut(id).file_mut(slot) {
            if file.creation_time.is_none() {
                file.creation_time = Some(outcome.timestamp);
            }
            file.ondisk = true;
            file.modify_time = Some(outcome.timestamp);
            file.content = content;
            file.rotate_token();
        }
    }
    Verdict::Committed
}

fn truncate(ns: &mut Namespace, path: &TargetPath, outcome: &Outcome) -> Verdict {
    let Some((id, slot)) = resolve_file(ns, path) else {
        return Verdict::Stale;
    };
    let Some(file) = ns.dir_mut(id).file_mut(slot) else {
        return Verdict::Stale;
    };

    if !file.ondisk {
        file.ondisk = true;
        file.creation_time = Some(outcome.timestamp);
    }
    file.modify_time = Some(outcome.timestamp);
    let keep = match (&file.content, outcome.data.size) {
        (Some(content), Some(size)) => content.end() <= size,
        _ => false,
    };
    if !keep {
        file.content = None;
    }
    file.rotate_token();
    Verdict::Committed
}
