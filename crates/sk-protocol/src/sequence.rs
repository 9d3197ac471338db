//! Request sequence numbers

use std::fmt;

/// Per-channel request sequence number.
///
/// Generated by the client and echoed verbatim by the server. Only used for
/// correlation in logs; the one-outstanding-request rule is what actually
/// pairs replies with requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SequenceNumber(pub u32);

impl SequenceNumber {
    /// Create a new sequence number
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    /// Get the raw value
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Return the current value and advance to the next one
    pub fn advance(&mut self) -> SequenceNumber {
        let current = *self;
        self.0 = self.0.wrapping_add(1);
        current
    }
}

impl Default for SequenceNumber {
    fn default() -> Self {
        Self(1)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq-{}", self.0)
    }
}

impl From<u32> for SequenceNumber {
    fn from(value: u32) -> Self {
        Self(value)
    }
}
