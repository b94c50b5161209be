use serde::{Deserialize, Serialize};

/// A self-contained unit of mapper input: a byte range of a source file.
///
/// Splits are value types. Two splits pointing at the same range of the same
/// source are the same split on every node, which is what lets the pending
/// set in the replicated job record and the scheduled set on each node agree
/// without further coordination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InputSplit {
    source: String,
    offset: u64,
    length: u64,
}

impl InputSplit {
    pub fn new(source: impl Into<String>, offset: u64, length: u64) -> Self {
        InputSplit {
            source: source.into(),
            offset,
            length,
        }
    }

    /// Whole-file split.
    pub fn whole(source: impl Into<String>, length: u64) -> Self {
        InputSplit::new(source, 0, length)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u64 {
        self.length
    }
}
