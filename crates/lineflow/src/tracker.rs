//! File state tracking with polling-based change detection
//!
//! # Design
//!
//! - One [`CandidateFile`] per path ever seen, owned by [`FileTracker`]
//! - Each scan is planned against the current state ([`FileTracker::plan`]), read by
//!   workers ([`crate::reader::run_reads`]) and applied in one step
//!   ([`FileTracker::apply`]); nothing else mutates the arena
//! - Removed files are flagged, not dropped, so their rows can still be retracted

use crate::error::ConnectorError;
use crate::glob::Listing;
use crate::mode::ModePolicy;
use crate::reader::{fingerprint, DeltaKind, FileDelta, ReadOutcome, ReadRequest, Resume};
use crate::types::{ChangeEvent, FileStamp, LineRecord, RecordId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Everything the tracker knows about one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateFile {
    pub path: PathBuf,
    /// Stamp at the last successful read.
    pub stamp: FileStamp,
    /// Bytes `[0, cursor)` have been emitted as lines.
    pub cursor: u64,
    /// Lines emitted so far; also the next line sequence number.
    pub lines_emitted: u64,
    /// Fingerprint of bytes `[0, cursor)`.
    pub prefix_hash: String,
    /// Bytes past the cursor form an unterminated line not yet emitted.
    #[serde(default)]
    pub held_tail: bool,
    /// The last emitted line had no terminator.
    #[serde(default)]
    pub tail_flushed: bool,
    #[serde(default)]
    pub removed: bool,
}

impl CandidateFile {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            stamp: FileStamp::default(),
            cursor: 0,
            lines_emitted: 0,
            prefix_hash: fingerprint(&[]),
            held_tail: false,
            tail_flushed: false,
            removed: false,
        }
    }

    fn has_progress(&self) -> bool {
        self.cursor > 0 || self.lines_emitted > 0
    }

    fn resume(&self) -> Option<Resume> {
        self.has_progress().then(|| Resume {
            cursor: self.cursor,
            prefix_hash: self.prefix_hash.clone(),
            tail_flushed: self.tail_flushed,
        })
    }

    fn reset(&mut self) {
        let path = std::mem::take(&mut self.path);
        *self = Self::new(&path);
    }
}

/// Classification of a file for one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileClass {
    New,
    Unchanged,
    Modified,
}

/// Per-scan counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub files_discovered: u64,
    pub files_new: u64,
    pub files_modified: u64,
    pub files_unchanged: u64,
    pub files_removed: u64,
    pub read_errors: u64,
    pub insertions: u64,
    pub deletions: u64,
    pub duration_ms: u64,
}

/// Work derived from one listing.
#[derive(Debug, Default)]
pub struct ScanPlan {
    /// In discovery order.
    pub reads: Vec<ReadRequest>,
    pub listed: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
    pub stats: ScanStats,
}

/// Events produced by applying a scan.
#[derive(Debug, Default)]
pub struct ScanOutput {
    pub events: Vec<ChangeEvent>,
    pub stats: ScanStats,
}

/// Owner of all [`CandidateFile`] entries for one source.
#[derive(Debug)]
pub struct FileTracker {
    files: BTreeMap<PathBuf, CandidateFile>,
    policy: ModePolicy,
}

impl FileTracker {
    pub fn new(policy: ModePolicy) -> Self {
        Self {
            files: BTreeMap::new(),
            policy,
        }
    }

    /// Rebuild from persisted entries.
    ///
    /// A tail held at checkpoint time is only flushed after this process has seen
    /// the file unchanged between two of its own scans.
    pub fn restore(policy: ModePolicy, files: Vec<CandidateFile>) -> Self {
        let files = files
            .into_iter()
            .map(|mut file| {
                if file.held_tail {
                    file.stamp = FileStamp::default();
                }
                (file.path.clone(), file)
            })
            .collect();
        Self { files, policy }
    }

    pub fn get(&self, path: &Path) -> Option<&CandidateFile> {
        self.files.get(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Entries in path order, ready for checkpointing.
    pub fn snapshot(&self) -> Vec<CandidateFile> {
        self.files.values().cloned().collect()
    }

    pub fn classify(&self, path: &Path, stamp: &FileStamp) -> FileClass {
        match self.files.get(path) {
            None => FileClass::New,
            Some(file) if file.removed && !file.has_progress() => FileClass::New,
            Some(file) if file.stamp != *stamp => FileClass::Modified,
            Some(_) => FileClass::Unchanged,
        }
    }

    /// Decide what to read for `listing`. Does not mutate the tracker.
    pub fn plan(&self, listing: &Listing) -> ScanPlan {
        let mut plan = ScanPlan::default();
        plan.stats.files_discovered = listing.files.len() as u64;
        let mut seen = HashSet::with_capacity(listing.files.len());

        for discovered in &listing.files {
            seen.insert(discovered.path.as_path());
            plan.listed.push(discovered.path.clone());
            let tracked = self.files.get(&discovered.path);

            match self.classify(&discovered.path, &discovered.stamp) {
                FileClass::New => {
                    plan.stats.files_new += 1;
                    plan.reads.push(self.request(&discovered.path, None, self.policy.flush_tails));
                }
                FileClass::Modified => {
                    plan.stats.files_modified += 1;
                    let resume = tracked.and_then(CandidateFile::resume);
                    plan.reads.push(self.request(&discovered.path, resume, self.policy.flush_tails));
                }
                FileClass::Unchanged => {
                    plan.stats.files_unchanged += 1;
                    // The tail survived a scan without change: the writer is done with it.
                    if let Some(file) = tracked.filter(|f| f.held_tail) {
                        plan.reads.push(self.request(&discovered.path, file.resume(), true));
                    }
                }
            }
        }

        if listing.is_complete() {
            plan.removed = self
                .files
                .values()
                .filter(|file| !file.removed && !seen.contains(file.path.as_path()))
                .map(|file| file.path.clone())
                .collect();
            plan.stats.files_removed = plan.removed.len() as u64;
        } else {
            warn!(
                errors = listing.errors.len(),
                "Listing incomplete - skipping removal detection for this scan"
            );
        }

        plan
    }

    fn request(&self, path: &Path, resume: Option<Resume>, flush_tail: bool) -> ReadRequest {
        ReadRequest {
            path: path.to_path_buf(),
            resume,
            flush_tail,
            retract_rewrites: self.policy.retract_rewrites,
        }
    }

    /// Apply worker results for `plan`, producing events in discovery order.
    ///
    /// Files whose read failed keep their previous state and are retried next scan.
    pub fn apply(&mut self, plan: ScanPlan, outcomes: Vec<ReadOutcome>) -> ScanOutput {
        let mut output = ScanOutput {
            events: Vec::new(),
            stats: plan.stats,
        };

        for outcome in outcomes {
            match outcome.result {
                Ok(delta) => self.apply_delta(delta, &mut output),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    // Deleted after listing; the next listing reports the removal.
                    debug!(path = %outcome.path.display(), "File vanished before read");
                }
                Err(source) => {
                    output.stats.read_errors += 1;
                    let err = ConnectorError::FileRead {
                        path: outcome.path,
                        source,
                    };
                    warn!(error = %err, "Skipping file until next scan");
                }
            }
        }

        for path in &plan.listed {
            if let Some(file) = self.files.get_mut(path) {
                file.removed = false;
            }
        }

        for path in &plan.removed {
            self.apply_removal(path, &mut output);
        }

        output
    }

    fn apply_delta(&mut self, delta: FileDelta, output: &mut ScanOutput) {
        let file = self
            .files
            .entry(delta.path.clone())
            .or_insert_with(|| CandidateFile::new(&delta.path));

        match delta.kind {
            DeltaKind::Fresh | DeltaKind::Append => {}
            DeltaKind::Rewrite => {
                debug!(
                    path = %delta.path.display(),
                    retracted = file.lines_emitted,
                    "File rewritten in place - retracting previous lines"
                );
                retract_all(file, &mut output.events, &mut output.stats);
            }
            DeltaKind::Reread => {
                warn!(
                    path = %delta.path.display(),
                    kept = file.lines_emitted,
                    "File rewritten in place - re-inserting its lines without retraction"
                );
            }
        }

        for line in delta.lines {
            output
                .events
                .push(ChangeEvent::Insertion(LineRecord::new(&delta.path, file.lines_emitted, line)));
            file.lines_emitted += 1;
            output.stats.insertions += 1;
        }

        file.stamp = delta.stamp;
        file.cursor = delta.cursor;
        file.prefix_hash = delta.prefix_hash;
        file.held_tail = delta.held_tail;
        file.tail_flushed = delta.tail_flushed;
        file.removed = false;
    }

    fn apply_removal(&mut self, path: &Path, output: &mut ScanOutput) {
        let Some(file) = self.files.get_mut(path) else {
            return;
        };

        if self.policy.propagate_removals {
            debug!(
                path = %path.display(),
                retracted = file.lines_emitted,
                "File removed - retracting its lines"
            );
            retract_all(file, &mut output.events, &mut output.stats);
            file.reset();
        }
        file.removed = true;
    }
}

fn retract_all(file: &mut CandidateFile, events: &mut Vec<ChangeEvent>, stats: &mut ScanStats) {
    for seq in 0..file.lines_emitted {
        events.push(ChangeEvent::Deletion(RecordId::new(&file.path, seq)));
    }
    stats.deletions += file.lines_emitted;
    file.lines_emitted = 0;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glob::{FileGlob, GlobOptions};
    use crate::mode::ReadMode;
    use crate::reader::run_reads;
    use crate::scan_path::resolve_source_root;
    use filetime::{set_file_mtime, FileTime};
    use std::fs;
    use tempfile::TempDir;

    struct Env {
        temp: TempDir,
        glob: FileGlob,
    }

    impl Env {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let root = resolve_source_root(temp.path()).unwrap();
            let glob = FileGlob::new(root, "*", GlobOptions::default()).unwrap();
            Self { temp, glob }
        }

        fn write(&self, name: &str, content: &str, mtime_secs: i64) -> PathBuf {
            let path = self.glob.root().path().join(name);
            fs::write(&path, content).unwrap();
            set_file_mtime(&path, FileTime::from_unix_time(mtime_secs, 0)).unwrap();
            path
        }

        fn remove(&self, name: &str) {
            fs::remove_file(self.temp.path().join(name)).unwrap();
        }

        fn scan(&self, tracker: &mut FileTracker) -> ScanOutput {
            let listing = self.glob.discover().unwrap();
            let plan = tracker.plan(&listing);
            let outcomes = run_reads(&plan.reads);
            tracker.apply(plan, outcomes)
        }
    }

    fn inserted(output: &ScanOutput) -> Vec<String> {
        output
            .events
            .iter()
            .filter_map(|e| match e {
                ChangeEvent::Insertion(r) => Some(r.text().into_owned()),
                ChangeEvent::Deletion(_) => None,
            })
            .collect()
    }

    fn deleted(output: &ScanOutput) -> Vec<u64> {
        output
            .events
            .iter()
            .filter_map(|e| match e {
                ChangeEvent::Deletion(id) => Some(id.seq),
                ChangeEvent::Insertion(_) => None,
            })
            .collect()
    }

    #[test]
    fn new_files_are_read_in_discovery_order() {
        let env = Env::new();
        env.write("late.txt", "3\n4\n", 2_000);
        env.write("early.txt", "1\n2\n", 1_000);
        let mut tracker = FileTracker::new(ReadMode::Streaming.policy());

        let output = env.scan(&mut tracker);
        assert_eq!(inserted(&output), vec!["1", "2", "3", "4"]);
        assert_eq!(output.stats.files_new, 2);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn unchanged_files_emit_nothing() {
        let env = Env::new();
        env.write("a.txt", "1\n", 1_000);
        let mut tracker = FileTracker::new(ReadMode::Streaming.policy());
        env.scan(&mut tracker);

        let output = env.scan(&mut tracker);
        assert!(output.events.is_empty());
        assert_eq!(output.stats.files_unchanged, 1);
    }

    #[test]
    fn appends_continue_sequence() {
        let env = Env::new();
        let path = env.write("a.txt", "1\n2\n", 1_000);
        let mut tracker = FileTracker::new(ReadMode::StreamingWithDeletions.policy());
        env.scan(&mut tracker);

        env.write("a.txt", "1\n2\n3\n", 2_000);
        let output = env.scan(&mut tracker);
        assert_eq!(inserted(&output), vec!["3"]);
        assert!(deleted(&output).is_empty());
        match &output.events[0] {
            ChangeEvent::Insertion(record) => assert_eq!(record.id.seq, 2),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(tracker.get(&path).unwrap().lines_emitted, 3);
    }

    #[test]
    fn rewrite_retracts_then_reinserts() {
        let env = Env::new();
        env.write("a.txt", "1\n2\n", 1_000);
        let mut tracker = FileTracker::new(ReadMode::StreamingWithDeletions.policy());
        env.scan(&mut tracker);

        env.write("a.txt", "one\n", 2_000);
        let output = env.scan(&mut tracker);
        assert_eq!(deleted(&output), vec![0, 1]);
        assert_eq!(inserted(&output), vec!["one"]);
        assert!(!output.events[0].is_insertion());
        assert!(output.events[2].is_insertion());
    }

    fn inserted_seqs(output: &ScanOutput) -> Vec<u64> {
        output
            .events
            .iter()
            .filter_map(|e| match e {
                ChangeEvent::Insertion(r) => Some(r.id.seq),
                ChangeEvent::Deletion(_) => None,
            })
            .collect()
    }

    #[test]
    fn rewrite_without_deletions_reinserts_with_fresh_sequence() {
        let env = Env::new();
        let path = env.write("a.txt", "1\n2\n", 1_000);
        let mut tracker = FileTracker::new(ReadMode::Streaming.policy());
        env.scan(&mut tracker);

        env.write("a.txt", "x\ny\nz\n", 2_000);
        let output = env.scan(&mut tracker);
        assert_eq!(inserted(&output), vec!["x", "y", "z"]);
        assert_eq!(inserted_seqs(&output), vec![2, 3, 4]);
        assert!(deleted(&output).is_empty());
        let file = tracker.get(&path).unwrap();
        assert_eq!(file.cursor, 6);
        assert_eq!(file.lines_emitted, 5);

        env.write("a.txt", "x\ny\nz\nw\n", 3_000);
        let output = env.scan(&mut tracker);
        assert_eq!(inserted(&output), vec!["w"]);
        assert_eq!(inserted_seqs(&output), vec![5]);
    }

    #[test]
    fn recreated_file_without_deletions_is_read_again() {
        let env = Env::new();
        env.write("app.log", "old 1\nold 2\n", 1_000);
        let mut tracker = FileTracker::new(ReadMode::Streaming.policy());
        env.scan(&mut tracker);

        env.remove("app.log");
        assert!(env.scan(&mut tracker).events.is_empty());

        env.write("app.log", "new 1\n", 2_000);
        let output = env.scan(&mut tracker);
        assert_eq!(inserted(&output), vec!["new 1"]);
        assert_eq!(inserted_seqs(&output), vec![2]);
        assert!(deleted(&output).is_empty());
    }

    #[test]
    fn removal_retracts_only_with_deletions() {
        for (mode, expected) in [
            (ReadMode::Streaming, Vec::<u64>::new()),
            (ReadMode::StreamingWithDeletions, vec![0, 1, 2]),
        ] {
            let env = Env::new();
            env.write("gone.txt", "a\nb\nc\n", 1_000);
            env.write("kept.txt", "k\n", 1_500);
            let mut tracker = FileTracker::new(mode.policy());
            env.scan(&mut tracker);

            env.remove("gone.txt");
            let output = env.scan(&mut tracker);
            assert_eq!(deleted(&output), expected, "mode {mode}");
            assert_eq!(output.stats.files_removed, 1);

            // Reported once, not on every later scan.
            let output = env.scan(&mut tracker);
            assert!(output.events.is_empty());
            assert_eq!(output.stats.files_removed, 0);
        }
    }

    #[test]
    fn reappearing_file_after_retraction_starts_over() {
        let env = Env::new();
        env.write("a.txt", "1\n", 1_000);
        let mut tracker = FileTracker::new(ReadMode::StreamingWithDeletions.policy());
        env.scan(&mut tracker);
        env.remove("a.txt");
        env.scan(&mut tracker);

        env.write("a.txt", "1\n2\n", 2_000);
        let output = env.scan(&mut tracker);
        assert_eq!(inserted(&output), vec!["1", "2"]);
        assert!(deleted(&output).is_empty());
    }

    #[test]
    fn partial_tail_is_held_until_stable() {
        let env = Env::new();
        env.write("a.txt", "1\npart", 1_000);
        let mut tracker = FileTracker::new(ReadMode::Streaming.policy());

        let first = env.scan(&mut tracker);
        assert_eq!(inserted(&first), vec!["1"]);

        let second = env.scan(&mut tracker);
        assert_eq!(inserted(&second), vec!["part"]);

        let third = env.scan(&mut tracker);
        assert!(third.events.is_empty());
    }

    #[test]
    fn growing_tail_is_not_split() {
        let env = Env::new();
        env.write("a.txt", "1\npa", 1_000);
        let mut tracker = FileTracker::new(ReadMode::Streaming.policy());
        assert_eq!(inserted(&env.scan(&mut tracker)), vec!["1"]);

        env.write("a.txt", "1\npartial\n", 2_000);
        assert_eq!(inserted(&env.scan(&mut tracker)), vec!["partial"]);
    }

    #[test]
    fn static_policy_flushes_tail_immediately() {
        let env = Env::new();
        env.write("a.txt", "a\nb\nc", 1_000);
        let mut tracker = FileTracker::new(ReadMode::Static.policy());
        assert_eq!(inserted(&env.scan(&mut tracker)), vec!["a", "b", "c"]);
    }

    #[test]
    fn restore_resumes_without_duplicates() {
        let env = Env::new();
        env.write("a.txt", "1\n2\n", 1_000);
        let mut tracker = FileTracker::new(ReadMode::Streaming.policy());
        env.scan(&mut tracker);
        let snapshot = tracker.snapshot();

        env.write("a.txt", "1\n2\n3\n", 2_000);
        let mut restored = FileTracker::restore(ReadMode::Streaming.policy(), snapshot);
        assert_eq!(inserted(&env.scan(&mut restored)), vec!["3"]);
    }

    #[test]
    fn restored_tail_waits_for_an_unchanged_scan() {
        let env = Env::new();
        env.write("a.txt", "1\npart", 1_000);
        let mut tracker = FileTracker::new(ReadMode::Streaming.policy());
        assert_eq!(inserted(&env.scan(&mut tracker)), vec!["1"]);
        let snapshot = tracker.snapshot();
        assert!(snapshot[0].held_tail);

        let mut restored = FileTracker::restore(ReadMode::Streaming.policy(), snapshot);
        let first = env.scan(&mut restored);
        assert!(first.events.is_empty());
        assert_eq!(first.stats.files_modified, 1);

        assert_eq!(inserted(&env.scan(&mut restored)), vec!["part"]);
    }

    #[test]
    fn unreadable_file_is_retried() {
        let env = Env::new();
        env.write("a.txt", "1\n", 1_000);
        let mut tracker = FileTracker::new(ReadMode::Streaming.policy());

        let listing = env.glob.discover().unwrap();
        let plan = tracker.plan(&listing);
        let failed = plan
            .reads
            .iter()
            .map(|r| ReadOutcome {
                path: r.path.clone(),
                result: Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied")),
            })
            .collect();
        let output = tracker.apply(plan, failed);
        assert_eq!(output.stats.read_errors, 1);
        assert!(output.events.is_empty());
        assert!(tracker.is_empty());

        assert_eq!(inserted(&env.scan(&mut tracker)), vec!["1"]);
    }

    #[test]
    fn incomplete_listing_skips_removals() {
        let env = Env::new();
        env.write("a.txt", "1\n", 1_000);
        let mut tracker = FileTracker::new(ReadMode::StreamingWithDeletions.policy());
        env.scan(&mut tracker);

        let listing = Listing {
            files: Vec::new(),
            errors: vec![crate::glob::WalkError {
                path: "sub".to_string(),
                message: "permission denied".to_string(),
            }],
        };
        let plan = tracker.plan(&listing);
        assert!(plan.removed.is_empty());
    }
}
