//! Handlers for failed outcomes

use super::{Verdict, Violation};
use crate::namespace::Namespace;
use crate::protocol::{Action, ErrorCode, Outcome, TargetPath};
use tracing::{debug, info};

pub(super) fn apply(ns: &mut Namespace, outcome: &Outcome) -> Verdict {
    let Some(code) = outcome.error_code.clone() else {
        return unexpected(outcome);
    };

    if code.is_base_tolerated() || tolerated_for(outcome.action, &code) {
        return Verdict::Tolerated { code };
    }

    match (outcome.action, &code) {
        (Action::Touch, ErrorCode::MaxDirSize) => retire_full_dir(ns, outcome),
        (Action::Mkdir, _) => unexpected(outcome),
        (_, code) if code.is_enoent() => missing_entry(ns, outcome),
        _ => unexpected(outcome),
    }
}

/// Failures that are part of the normal behaviour of a specific action
fn tolerated_for(action: Action, code: &ErrorCode) -> bool {
    match action {
        Action::Read => *code == ErrorCode::ZeroSize,
        Action::RenameExist => *code == ErrorCode::SameFile,
        Action::Mkdir
        | Action::Touch
        | Action::List
        | Action::Stat
        | Action::Write
        | Action::Delete
        | Action::Rename
        | Action::Truncate => false,
    }
}

fn retire_full_dir(ns: &mut Namespace, outcome: &Outcome) -> Verdict {
    let Some(path) = outcome.target_path() else {
        return unexpected(outcome);
    };
    let Some(id) = ns.dir_by_name(&path.dir) else {
        debug!(dir = %path.dir, "Directory already retired");
        return Verdict::Stale;
    };

    info!(dir = %path.dir, "Directory going to be removed from dir tree");
    match ns.replace_dir(id) {
        Some(replacement) => Verdict::Retired {
            dir: path.dir,
            replacement: ns.dir(replacement).name.clone(),
        },
        None => Verdict::Stale,
    }
}

/// ENOENT on anything but mkdir
///
/// The missing entry is the file for file targets and the directory
/// otherwise. `touch` creates the file, so its missing entry is the parent.
fn missing_entry(ns: &mut Namespace, outcome: &Outcome) -> Verdict {
    let Some(path) = outcome.target_path() else {
        return unexpected(outcome);
    };
    let Some(dir_id) = ns.dir_by_name(&path.dir) else {
        return Verdict::Corrected;
    };

    let file_name = match outcome.action {
        Action::Touch => None,
        _ => path.file.as_deref(),
    };

    let last_good = match file_name {
        Some(name) => {
            let dir = ns.dir_mut(dir_id);
            let slot = dir.file_slot(name);
            let Some(file) = slot.and_then(|slot| dir.file_mut(slot)) else {
                return Verdict::Corrected;
            };
            if !file.ondisk {
                return Verdict::Corrected;
            }
            file.ondisk = false;
            file.last_good()
        }
        None => {
            let dir = ns.dir(dir_id);
            if !dir.ondisk {
                return Verdict::Corrected;
            }
            let created = dir.creation_time;
            ns.mark_missing(dir_id);
            created
        }
    };

    match last_good {
        Some(last_good) if outcome.timestamp > last_good => {
            Verdict::Violation(Violation::MissingEntry {
                action: outcome.action,
                path,
                failed_at: outcome.timestamp,
                last_good,
            })
        }
        _ => Verdict::Corrected,
    }
}

fn unexpected(outcome: &Outcome) -> Verdict {
    let code = outcome
        .error_code
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "unknown".to_string());
    let message = outcome.error_message.clone().unwrap_or_default();

    let violation = match outcome.target_path() {
        Some(path) => Violation::UnexpectedFailure {
            action: outcome.action,
            path,
            code,
            message,
        },
        None => Violation::LostContext {
            action: outcome.action,
            target: outcome.target.clone(),
            code,
            message,
        },
    };
    Verdict::Violation(violation)
}
