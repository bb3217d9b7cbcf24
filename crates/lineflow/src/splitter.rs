//! Line splitting over byte ranges.
//!
//! Lines end at `\n`; a `\r` directly before it is dropped. Bytes after the last
//! terminator form the tail, which is only emitted when the caller asks for it.

/// Lazy iterator over the complete lines of `bytes[offset..]`.
///
/// Restartable: a new splitter built at [`LineSplitter::position`] continues exactly
/// where this one stopped.
#[derive(Debug, Clone)]
pub struct LineSplitter<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> LineSplitter<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self::starting_at(bytes, 0)
    }

    pub fn starting_at(bytes: &'a [u8], offset: usize) -> Self {
        Self {
            bytes,
            pos: offset.min(bytes.len()),
        }
    }

    /// Offset just past the last terminator consumed.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes not yet part of a complete line.
    pub fn remainder(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }
}

impl<'a> Iterator for LineSplitter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let rest = &self.bytes[self.pos..];
        let newline = rest.iter().position(|&b| b == b'\n')?;
        self.pos += newline + 1;
        Some(strip_cr(&rest[..newline]))
    }
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Lines extracted from one byte range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Split {
    pub lines: Vec<Vec<u8>>,
    /// Offset after the last emitted byte; becomes the file's cursor.
    pub end: usize,
    /// A non-empty tail was left unemitted.
    pub held_tail: bool,
    /// The last emitted line had no terminator.
    pub tail_flushed: bool,
}

/// Split `bytes[offset..]`, emitting the unterminated tail only if `flush_tail`.
pub fn split_from(bytes: &[u8], offset: usize, flush_tail: bool) -> Split {
    let mut splitter = LineSplitter::starting_at(bytes, offset);
    let lines: Vec<Vec<u8>> = splitter.by_ref().map(<[u8]>::to_vec).collect();
    let mut split = Split {
        lines,
        end: splitter.position(),
        held_tail: false,
        tail_flushed: false,
    };

    let tail = splitter.remainder();
    if !tail.is_empty() {
        if flush_tail {
            split.lines.push(strip_cr(tail).to_vec());
            split.end = bytes.len();
            split.tail_flushed = true;
        } else {
            split.held_tail = true;
        }
    }
    split
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(split: &Split) -> Vec<String> {
        split
            .lines
            .iter()
            .map(|l| String::from_utf8_lossy(l).into_owned())
            .collect()
    }

    #[test]
    fn splits_terminated_lines() {
        let split = split_from(b"a\nb\nc\n", 0, false);
        assert_eq!(texts(&split), vec!["a", "b", "c"]);
        assert_eq!(split.end, 6);
        assert!(!split.held_tail);
    }

    #[test]
    fn holds_back_partial_tail() {
        let split = split_from(b"a\nb\npart", 0, false);
        assert_eq!(texts(&split), vec!["a", "b"]);
        assert_eq!(split.end, 4);
        assert!(split.held_tail);
        assert!(!split.tail_flushed);
    }

    #[test]
    fn flushes_tail_when_drained() {
        let split = split_from(b"a\nb\nc", 0, true);
        assert_eq!(texts(&split), vec!["a", "b", "c"]);
        assert_eq!(split.end, 5);
        assert!(split.tail_flushed);
    }

    #[test]
    fn strips_carriage_returns_and_keeps_empty_lines() {
        let split = split_from(b"a\r\n\r\n\nb\r\n", 0, false);
        assert_eq!(texts(&split), vec!["a", "", "", "b"]);
    }

    #[test]
    fn resumes_from_offset() {
        let bytes = b"old\nnew1\nnew2\n";
        let split = split_from(bytes, 4, false);
        assert_eq!(texts(&split), vec!["new1", "new2"]);
        assert_eq!(split.end, bytes.len());
    }

    #[test]
    fn restarting_at_position_continues() {
        let bytes = b"1\n2\n3\n4";
        let mut first = LineSplitter::new(bytes);
        assert_eq!(first.next(), Some(&b"1"[..]));
        assert_eq!(first.next(), Some(&b"2"[..]));

        let rest: Vec<&[u8]> = LineSplitter::starting_at(bytes, first.position()).collect();
        assert_eq!(rest, vec![&b"3"[..]]);
        assert_eq!(LineSplitter::starting_at(bytes, first.position()).count(), 1);
    }

    #[test]
    fn empty_input_yields_nothing() {
        let split = split_from(b"", 0, true);
        assert!(split.lines.is_empty());
        assert_eq!(split.end, 0);
        assert!(!split.tail_flushed);
    }
}
