//! Runtime state owned by the session driver.

use std::fmt;
use std::ops::Range;

/// How the device ended up in DFU mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeOutcome {
    /// Device already reported dfuIDLE; nothing was sent.
    AlreadyInDfuMode,
    /// Device was detached (and possibly reset) and the handle reopened.
    Detached,
}

impl fmt::Display for ModeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModeOutcome::AlreadyInDfuMode => write!(f, "ALREADY_IN_DFU_MODE"),
            ModeOutcome::Detached => write!(f, "DETACHED"),
        }
    }
}

/// DNLOAD block number carried in wValue.
///
/// Starts at 1 and wraps modulo 65536.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionCounter(u16);

impl Default for TransactionCounter {
    fn default() -> Self {
        Self(1)
    }
}

impl TransactionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> u16 {
        self.0
    }

    pub fn advance(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }
}

/// Byte accounting for one firmware transfer.
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    /// Payload length (suffix excluded).
    pub total: usize,
    /// Bytes handed to successful DNLOADs.
    pub sent: usize,
    /// Data blocks sent.
    pub chunks: usize,
    /// wTransferSize of the DFU-mode descriptor.
    pub transfer_size: usize,
}

impl DownloadProgress {
    pub fn new(total: usize, transfer_size: usize) -> Self {
        Self {
            total,
            sent: 0,
            chunks: 0,
            transfer_size,
        }
    }

    pub fn remaining(&self) -> usize {
        self.total - self.sent
    }

    pub fn is_done(&self) -> bool {
        self.remaining() == 0
    }

    /// Payload range of the next block, if any.
    pub fn next_range(&self) -> Option<Range<usize>> {
        if self.is_done() || self.transfer_size == 0 {
            return None;
        }
        let len = self.transfer_size.min(self.remaining());
        Some(self.sent..self.sent + len)
    }

    /// Record a block the device accepted.
    pub fn advance(&mut self, len: usize) {
        self.sent += len;
        self.chunks += 1;
    }

    /// Number of data blocks the whole payload needs.
    pub fn total_chunks(&self) -> usize {
        if self.transfer_size == 0 {
            0
        } else {
            self.total.div_ceil(self.transfer_size)
        }
    }

}
