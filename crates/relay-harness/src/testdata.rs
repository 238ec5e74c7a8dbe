//! Binary test payloads and their comparison.

use std::fmt;

use rand::Rng;

/// Number of leading bytes shown when two buffers differ.
const HEAD_LEN: usize = 20;

/// How test bytes are filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// `i % 256` at index `i`.
    Sequential,
    /// Uniformly random bytes.
    Random,
}

/// Build a test buffer of `size` bytes.
#[allow(clippy::cast_possible_truncation)]
pub fn generate_test_binary_data(size: usize, pattern: Pattern) -> Vec<u8> {
    match pattern {
        Pattern::Sequential => (0..size).map(|i| (i % 256) as u8).collect(),
        Pattern::Random => {
            let mut data = vec![0u8; size];
            rand::rng().fill(&mut data[..]);
            data
        }
    }
}

/// Outcome of [`compare_binary_data`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinaryComparison {
    /// Identical buffers.
    Match,
    /// Different lengths; contents were not compared.
    LengthMismatch {
        /// Expected length.
        expected: usize,
        /// Received length.
        actual: usize,
    },
    /// Same length, different contents.
    Mismatch {
        /// First differing index.
        index: usize,
        /// Expected byte at `index`.
        expected: u8,
        /// Received byte at `index`.
        actual: u8,
        /// Leading bytes of the expected buffer.
        expected_head: Vec<u8>,
        /// Leading bytes of the received buffer.
        actual_head: Vec<u8>,
    },
}

impl BinaryComparison {
    /// Whether the buffers were identical.
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Match)
    }
}

fn join_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(u8::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for BinaryComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Match => write!(f, "binary data matches"),
            Self::LengthMismatch { expected, actual } => {
                write!(f, "length mismatch: expected {expected}, got {actual}")
            }
            Self::Mismatch {
                index,
                expected,
                actual,
                expected_head,
                actual_head,
            } => write!(
                f,
                "first mismatch at {index}: expected {expected}, got {actual} \
                 (expected head [{}], actual head [{}])",
                join_bytes(expected_head),
                join_bytes(actual_head)
            ),
        }
    }
}

/// Compare a received buffer with the expected one.
pub fn compare_binary_data(received: &[u8], expected: &[u8]) -> BinaryComparison {
    if received.len() != expected.len() {
        return BinaryComparison::LengthMismatch {
            expected: expected.len(),
            actual: received.len(),
        };
    }
    match received.iter().zip(expected).position(|(a, b)| a != b) {
        None => BinaryComparison::Match,
        Some(index) => BinaryComparison::Mismatch {
            index,
            expected: expected[index],
            actual: received[index],
            expected_head: expected.iter().take(HEAD_LEN).copied().collect(),
            actual_head: received.iter().take(HEAD_LEN).copied().collect(),
        },
    }
}
