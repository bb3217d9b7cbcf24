//! Per-file read step, run on blocking workers.
//!
//! A [`ReadRequest`] carries everything the worker needs from the tracker, so the
//! worker never touches tracker state. The returned [`FileDelta`] is applied by the
//! tracker in a single step.

use crate::splitter::split_from;
use crate::types::FileStamp;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;

/// Bytes hashed at each end of the emitted prefix.
pub const FINGERPRINT_WINDOW: u64 = 4096;

/// Where a previously seen file left off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resume {
    pub cursor: u64,
    /// Fingerprint of bytes `[0, cursor)` as last emitted.
    pub prefix_hash: String,
    /// The last emitted line had no terminator.
    pub tail_flushed: bool,
}

#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub path: PathBuf,
    pub resume: Option<Resume>,
    pub flush_tail: bool,
    pub retract_rewrites: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaKind {
    /// First read of the file; lines start at sequence 0.
    Fresh,
    /// Prefix verified; lines continue after the previous ones.
    Append,
    /// Content changed in place; previous lines must be retracted, lines restart at 0.
    Rewrite,
    /// Content changed in place but retraction is disabled: the whole file is
    /// emitted again after the previous lines.
    Reread,
}

#[derive(Debug, Clone)]
pub struct FileDelta {
    pub path: PathBuf,
    pub stamp: FileStamp,
    pub kind: DeltaKind,
    pub lines: Vec<Vec<u8>>,
    pub cursor: u64,
    pub prefix_hash: String,
    pub held_tail: bool,
    pub tail_flushed: bool,
}

/// Worker result for one request; errors stay per file.
#[derive(Debug)]
pub struct ReadOutcome {
    pub path: PathBuf,
    pub result: io::Result<FileDelta>,
}

/// Execute requests in order. Called from a blocking worker.
pub fn run_reads(requests: &[ReadRequest]) -> Vec<ReadOutcome> {
    requests
        .iter()
        .map(|request| ReadOutcome {
            path: request.path.clone(),
            result: read_delta(request),
        })
        .collect()
}

/// Fingerprint of an emitted prefix held in memory.
///
/// Covers the prefix length plus the first and last [`FINGERPRINT_WINDOW`] bytes, so
/// verifying an append never needs more than two windows of the file.
pub fn fingerprint(prefix: &[u8]) -> String {
    let len = prefix.len() as u64;
    let (head, tail) = window_bounds(len);
    digest(len, &prefix[..head as usize], &prefix[tail as usize..])
}

/// Same digest as [`fingerprint`] for `file[0, len)`, read from disk.
fn fingerprint_file(file: &mut File, len: u64) -> io::Result<String> {
    let (head_end, tail_start) = window_bounds(len);
    let head = read_range(file, 0, head_end)?;
    let tail = read_range(file, tail_start, len)?;
    Ok(digest(len, &head, &tail))
}

// Head is [0, head_end); tail is [tail_start, len) and never overlaps the head.
fn window_bounds(len: u64) -> (u64, u64) {
    let head_end = len.min(FINGERPRINT_WINDOW);
    let tail_start = len.saturating_sub(FINGERPRINT_WINDOW).max(head_end);
    (head_end, tail_start)
}

fn digest(len: u64, head: &[u8], tail: &[u8]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&len.to_le_bytes());
    hasher.update(head);
    hasher.update(tail);
    hasher.finalize().to_hex().to_string()
}

fn read_range(file: &mut File, start: u64, end: u64) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(usize::try_from(end - start).unwrap_or(0));
    file.seek(SeekFrom::Start(start))?;
    file.by_ref().take(end - start).read_to_end(&mut buf)?;
    if (buf.len() as u64) < end - start {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "file shrank during read"));
    }
    Ok(buf)
}

/// Read `request.path` and compute what changed since `request.resume`.
///
/// An append only reads the bytes past the cursor; anything else reads the file
/// from the start.
pub fn read_delta(request: &ReadRequest) -> io::Result<FileDelta> {
    let mut file = File::open(&request.path)?;
    let metadata = file.metadata()?;

    let (kind, start) = match &request.resume {
        None => (DeltaKind::Fresh, 0),
        Some(resume) => classify(&mut file, metadata.len(), resume, request.retract_rewrites)?,
    };

    let mut bytes = Vec::with_capacity(usize::try_from(metadata.len() - start).unwrap_or(0));
    file.seek(SeekFrom::Start(start))?;
    file.read_to_end(&mut bytes)?;

    let stamp = FileStamp {
        size: start + bytes.len() as u64,
        ..FileStamp::from_metadata(&metadata)
    };

    let split = split_from(&bytes, 0, request.flush_tail);
    let cursor = start + split.end as u64;
    let prefix_hash = if start == 0 {
        fingerprint(&bytes[..split.end])
    } else {
        fingerprint_file(&mut file, cursor)?
    };

    Ok(FileDelta {
        path: request.path.clone(),
        stamp,
        kind,
        lines: split.lines,
        cursor,
        prefix_hash,
        held_tail: split.held_tail,
        tail_flushed: split.tail_flushed,
    })
}

fn classify(
    file: &mut File,
    len: u64,
    resume: &Resume,
    retract_rewrites: bool,
) -> io::Result<(DeltaKind, u64)> {
    let rewrite = if retract_rewrites {
        DeltaKind::Rewrite
    } else {
        DeltaKind::Reread
    };

    if resume.cursor > len {
        return Ok((rewrite, 0));
    }
    match fingerprint_file(file, resume.cursor) {
        Ok(hash) if hash == resume.prefix_hash => {}
        Ok(_) => return Ok((rewrite, 0)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok((rewrite, 0)),
        Err(e) => return Err(e),
    }
    // Growth after an unterminated last line extends that line.
    if resume.tail_flushed && len > resume.cursor && retract_rewrites {
        return Ok((DeltaKind::Rewrite, 0));
    }
    Ok((DeltaKind::Append, resume.cursor))
}
