//! Workload planning
//!
//! Picks the action, target and parameters of each newly minted job from the
//! current namespace model. Directories that are not on disk yet are created
//! first; after that every job hits a random file slot in a random synced
//! directory.

use crate::namespace::names::{random_name, NAME_LEN};
use crate::namespace::{DirId, FileEntry, Namespace};
use crate::protocol::{Action, Work, WorkParams};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;
const GB: u64 = 1024 * MB;
const TB: u64 = 1024 * GB;

/// Length of the 16-byte data pattern workers write
pub const PATTERN_LEN: u64 = 16;

/// Bytes written per data pattern id, 4 KiB up to 1 MiB
pub const PATTERN_SIZES: [u64; 9] = [
    4 * KB,
    8 * KB,
    16 * KB,
    32 * KB,
    64 * KB,
    128 * KB,
    256 * KB,
    512 * KB,
    MB,
];

/// Offsets used for writes and truncates
///
/// Chosen to cross inline data, block and indirection boundaries.
pub const OFFSETS: [u64; 10] = [0, 3499, KB, 4 * KB, MB, 512 * MB, GB, 256 * GB, 512 * GB, TB];

/// Extra padding added to some offsets
const PADDING: [u64; 2] = [0, 128 * MB];

/// Actions on a file that already exists
const FILE_ACTIONS: [Action; 8] = [
    Action::List,
    Action::Stat,
    Action::Read,
    Action::Write,
    Action::Delete,
    Action::Rename,
    Action::RenameExist,
    Action::Truncate,
];

/// Chooses the work of new jobs
#[derive(Debug)]
pub struct WorkloadPlanner {
    rng: StdRng,

    /// Directories with a `mkdir` handed out and not yet confirmed
    mkdir_planned: HashSet<DirId>,

    /// Round-robin position for repeated `mkdir` when nothing is synced yet
    mkdir_cursor: usize,
}

impl WorkloadPlanner {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            mkdir_planned: HashSet::new(),
            mkdir_cursor: 0,
        }
    }

    /// Work for the next new job
    pub fn plan(&mut self, ns: &Namespace) -> Work {
        // A confirmed directory that later goes missing needs a fresh mkdir
        self.mkdir_planned.retain(|id| {
            let dir = ns.dir(*id);
            !dir.ondisk && !dir.retired
        });

        let pending = ns.unsynced().find(|id| !self.mkdir_planned.contains(id));
        if let Some(id) = pending {
            self.mkdir_planned.insert(id);
            return Work::new(Action::Mkdir, ns.dir_target(id));
        }

        let Some(&dir) = ns.synced().choose(&mut self.rng) else {
            return self.repeat_mkdir(ns);
        };

        let files = ns.dir(dir).files();
        if files.is_empty() {
            return Work::new(Action::List, ns.dir_target(dir));
        }
        let slot = self.rng.gen_range(0..files.len());
        let file = &files[slot];
        let target = match ns.file_target(dir, slot) {
            Some(target) => target,
            None => return Work::new(Action::List, ns.dir_target(dir)),
        };

        if !file.ondisk {
            return Work::new(Action::Touch, target);
        }

        let action = FILE_ACTIONS[self.rng.gen_range(0..FILE_ACTIONS.len())];
        let params = self.params(ns, dir, slot, file, action);
        let target = if action == Action::List {
            ns.dir_target(dir)
        } else {
            target
        };
        Work::new(action, target).with_params(params)
    }

    /// Re-issue `mkdir` for an unsynced directory, round robin
    ///
    /// Used while every `mkdir` is still in flight; a duplicate comes back
    /// as a tolerated `EEXIST`.
    fn repeat_mkdir(&mut self, ns: &Namespace) -> Work {
        let active = ns.active();
        if active.is_empty() {
            return Work::new(Action::List, "/");
        }
        let id = active[self.mkdir_cursor % active.len()];
        self.mkdir_cursor = self.mkdir_cursor.wrapping_add(1);
        Work::new(Action::Mkdir, ns.dir_target(id))
    }

    fn params(
        &mut self,
        ns: &Namespace,
        dir: DirId,
        slot: usize,
        file: &FileEntry,
        action: Action,
    ) -> WorkParams {
        let uuid = file.session_token.clone();
        match action {
            Action::Read => {
                let (offset, chunk_size) = match &file.content {
                    Some(content) => (
                        content.offset,
                        content.chunk_size.or(content.pattern_len).unwrap_or(PATTERN_SIZES[0]),
                    ),
                    None => (0, PATTERN_SIZES[0]),
                };
                WorkParams {
                    uuid,
                    offset: Some(offset),
                    chunk_size: Some(chunk_size),
                    ..Default::default()
                }
            }
            Action::Write => {
                let pattern = self.rng.gen_range(0..PATTERN_SIZES.len());
                WorkParams {
                    uuid,
                    offset: Some(self.offset()),
                    data_pattern: Some(pattern as u32),
                    repeats: Some(PATTERN_SIZES[pattern] / PATTERN_LEN),
                    ..Default::default()
                }
            }
            Action::Rename => WorkParams {
                uuid,
                rename_dest: Some(random_name(&mut self.rng, NAME_LEN)),
                ..Default::default()
            },
            Action::RenameExist => {
                let others: Vec<usize> = ns
                    .dir(dir)
                    .files()
                    .iter()
                    .enumerate()
                    .filter(|(i, f)| *i != slot && f.ondisk)
                    .map(|(i, _)| i)
                    .collect();
                // Nothing else on disk: rename onto itself
                let dest_slot = others.choose(&mut self.rng).copied().unwrap_or(slot);
                WorkParams {
                    uuid,
                    rename_dest: ns.file_target(dir, dest_slot),
                    ..Default::default()
                }
            }
            Action::Truncate => WorkParams {
                uuid,
                size: Some(self.offset()),
                ..Default::default()
            },
            Action::Stat | Action::Delete => WorkParams {
                uuid,
                ..Default::default()
            },
            Action::Mkdir | Action::Touch | Action::List => WorkParams::default(),
        }
    }

    fn offset(&mut self) -> u64 {
        let base = OFFSETS[self.rng.gen_range(0..OFFSETS.len())];
        let padding = PADDING[self.rng.gen_range(0..PADDING.len())];
        base + padding
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::TreeShape;
    use crate::protocol::{parse_timestamp, Outcome, OutcomeData, TargetPath};
    use crate::verifier::{Verdict, Verifier};

    fn small() -> Namespace {
        Namespace::build(
            TreeShape {
                depth: 0,
                width: 3,
                files_per_dir: 4,
            },
            Some(7),
        )
    }

    fn ts() -> chrono::NaiveDateTime {
        parse_timestamp("2024/01/01 00:00:00.000000").unwrap()
    }

    #[test]
    fn test_mkdir_first_then_round_robin() {
        let ns = small();
        let mut planner = WorkloadPlanner::new(Some(1));

        let targets: Vec<Work> = (0..3).map(|_| planner.plan(&ns)).collect();
        assert!(targets.iter().all(|w| w.action == Action::Mkdir));
        let distinct: HashSet<&str> = targets.iter().map(|w| w.target.as_str()).collect();
        assert_eq!(distinct.len(), 3);

        // Nothing synced yet: mkdir is repeated, cycling through the dirs
        let again = planner.plan(&ns);
        assert_eq!(again.action, Action::Mkdir);
        assert_eq!(again.target, ns.dir_target(ns.active()[0]));
    }

    #[test]
    fn test_touch_before_other_file_actions() {
        let mut ns = small();
        for &id in ns.active().to_vec().iter() {
            ns.mark_synced(id, Some(0), ts());
        }
        let mut planner = WorkloadPlanner::new(Some(2));

        for _ in 0..50 {
            let work = planner.plan(&ns);
            assert_eq!(work.action, Action::Touch);
            let path = TargetPath::parse(&work.target).unwrap();
            assert!(ns.file_by_name(&path.dir, path.file.as_deref().unwrap()).is_some());
        }
    }

    #[test]
    fn test_full_directory_is_replaced() {
        let ns = Namespace::build(
            TreeShape {
                depth: 0,
                width: 1,
                files_per_dir: 4,
            },
            Some(7),
        );
        let full = ns.active()[0];
        let mut verifier = Verifier::new(ns).with_dir_limit(128 * 1024);
        let mut planner = WorkloadPlanner::new(Some(3));

        let mkdir = planner.plan(verifier.namespace());
        assert_eq!(mkdir.action, Action::Mkdir);
        let dirsize = |size| OutcomeData {
            dirsize: Some(size),
            ..Default::default()
        };
        verifier.apply(&Outcome::success(Action::Mkdir, mkdir.target, ts(), dirsize(4096)));

        let touch = planner.plan(verifier.namespace());
        assert_eq!(touch.action, Action::Touch);
        let verdict = verifier.apply(&Outcome::success(
            Action::Touch,
            touch.target,
            ts(),
            dirsize(128 * 1024),
        ));
        assert!(matches!(verdict, Verdict::Retired { .. }));

        let ns = verifier.namespace();
        assert!(ns.dir(full).retired);
        assert_eq!(ns.active().len(), 1);
        let fresh = ns.active()[0];
        assert_ne!(fresh, full);

        // The replacement is created next, the full directory is never hit again
        let next = planner.plan(ns);
        assert_eq!(next.action, Action::Mkdir);
        assert_eq!(next.target, ns.dir_target(fresh));
        for _ in 0..200 {
            let work = planner.plan(ns);
            assert!(!work.target.contains(&ns.dir(full).name));
        }
    }

    #[test]
    fn test_missing_directory_is_created_again() {
        let mut ns = small();
        let mut planner = WorkloadPlanner::new(Some(5));
        for _ in 0..3 {
            assert_eq!(planner.plan(&ns).action, Action::Mkdir);
        }
        for &id in ns.active().to_vec().iter() {
            ns.mark_synced(id, Some(0), ts());
        }
        assert_ne!(planner.plan(&ns).action, Action::Mkdir);

        let lost = ns.active()[1];
        ns.mark_missing(lost);
        let work = planner.plan(&ns);
        assert_eq!(work.action, Action::Mkdir);
        assert_eq!(work.target, ns.dir_target(lost));
    }

    #[test]
    fn test_params_for_existing_files() {
        let mut ns = small();
        for &id in ns.active().to_vec().iter() {
            ns.mark_synced(id, Some(0), ts());
            let dir = ns.dir_mut(id);
            for slot in 0..4 {
                let file = dir.file_mut(slot).unwrap();
                file.ondisk = true;
                file.creation_time = Some(ts());
                file.rotate_token();
            }
        }
        let mut planner = WorkloadPlanner::new(Some(4));

        let mut seen = HashSet::new();
        for _ in 0..500 {
            let work = planner.plan(&ns);
            seen.insert(work.action);
            let p = &work.params;
            match work.action {
                Action::Read => {
                    assert!(p.uuid.is_some());
                    assert_eq!(p.offset, Some(0));
                    assert_eq!(p.chunk_size, Some(4096));
                }
                Action::Write => {
                    let pattern = p.data_pattern.unwrap() as usize;
                    assert_eq!(p.repeats, Some(PATTERN_SIZES[pattern] / PATTERN_LEN));
                    assert!(p.offset.is_some());
                }
                Action::Rename => {
                    assert_eq!(p.rename_dest.as_ref().map(String::len), Some(NAME_LEN));
                }
                Action::RenameExist => {
                    let dest = TargetPath::parse(p.rename_dest.as_deref().unwrap()).unwrap();
                    let src = TargetPath::parse(&work.target).unwrap();
                    assert_eq!(dest.dir, src.dir);
                }
                Action::Truncate => assert!(p.size.is_some()),
                Action::List => assert!(!TargetPath::parse(&work.target).unwrap().is_file()),
                Action::Stat | Action::Delete => assert!(p.uuid.is_some()),
                Action::Mkdir | Action::Touch => panic!("unexpected {}", work.action),
            }
        }
        assert_eq!(seen.len(), FILE_ACTIONS.len());
    }

    #[test]
    fn test_seeded_planner_is_deterministic() {
        let ns = small();
        let mut a = WorkloadPlanner::new(Some(9));
        let mut b = WorkloadPlanner::new(Some(9));
        for _ in 0..5 {
            assert_eq!(a.plan(&ns), b.plan(&ns));
        }
    }
}
