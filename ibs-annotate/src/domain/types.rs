//! Core domain newtypes

use std::fmt;

/// Process ID of the profiled application, taken from the loader trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two hardware sample kinds, with different column layouts.
///
/// Op samples carry the instruction pointer in column 5; fetch samples
/// carry a physical-address-valid flag in column 5 and the instruction
/// pointer in column 6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    Op,
    Fetch,
}

impl SampleKind {
    /// Zero-based index of the instruction-pointer column for this kind.
    #[must_use]
    pub fn ip_column(self) -> usize {
        match self {
            SampleKind::Op => 4,
            SampleKind::Fetch => 5,
        }
    }

    /// Short label used in log messages and output naming.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            SampleKind::Op => "op",
            SampleKind::Fetch => "fetch",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_display() {
        assert_eq!(Pid(1234).to_string(), "1234");
    }

    #[test]
    fn test_ip_column_per_kind() {
        assert_eq!(SampleKind::Op.ip_column(), 4);
        assert_eq!(SampleKind::Fetch.ip_column(), 5);
    }
}
