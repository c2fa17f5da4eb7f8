//! In-memory chunk of lines.

use std::io::prelude::*;

use crate::error::Result;

/// Ordered batch of lines accumulated by the splitter.
///
/// The serialized size is maintained incrementally as Σ(len(line) + 1): each
/// line costs its bytes plus the terminating `\n`. The buffer is
/// single-threaded; a chunk is filled, sorted once, written once and
/// discarded.
pub struct Chunk {
    lines: Vec<Vec<u8>>,
    serialized_size: usize,
}

impl Chunk {
    /// Creates an empty chunk preallocated for `capacity` lines.
    pub fn with_capacity(capacity: usize) -> Self {
        Chunk {
            lines: Vec::with_capacity(capacity),
            serialized_size: 0,
        }
    }

    /// Appends a line and accounts for its serialized size.
    pub fn add(&mut self, line: Vec<u8>) {
        self.serialized_size += line.len() + 1;
        self.lines.push(line);
    }

    /// Σ(len(line) + 1) over the accumulated lines.
    pub fn serialized_size(&self) -> usize {
        self.serialized_size
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Sorts the lines in place by byte comparison.
    pub fn sort(&mut self) {
        self.lines.sort_unstable();
    }

    pub fn is_sorted(&self) -> bool {
        self.lines.windows(2).all(|pair| pair[0] <= pair[1])
    }

    /// Writes the lines in order, each followed by `\n`, and returns the
    /// written byte count. The caller compares the count against
    /// [`Chunk::serialized_size`] to detect counter divergence.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<u64> {
        let mut written = 0u64;
        for line in &self.lines {
            writer.write_all(line)?;
            writer.write_all(b"\n")?;
            written += line.len() as u64 + 1;
        }

        Ok(written)
    }
}
