//! Session-level errors.

use thiserror::Error;

use crate::protocol::{DfuState, StatusCode};
use crate::transport::TransportError;

/// Every way a DFU session can fail. All variants are fatal.
#[derive(Error, Debug)]
pub enum DfuError {
    #[error("{operation} failed: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: TransportError,
    },

    #[error("Device does not support download (bmAttributes 0x{attributes:02X})")]
    Capability { attributes: u8 },

    #[error("Unexpected device state {state} (status {status})")]
    UnexpectedState { state: DfuState, status: StatusCode },

    #[error("Could not recover from {state}: {operation} failed: {source}")]
    StateRecovery {
        state: DfuState,
        operation: &'static str,
        #[source]
        source: TransportError,
    },

    #[error("Device did not enter DFU mode: state {state}, status {status}")]
    ModeTransitionFailed { state: DfuState, status: StatusCode },

    /// `source` is the transfer that ended the loop, if one failed.
    #[error(
        "Transfer stopped with {remaining} of {total} bytes remaining ({sent} sent): \
         state {state}, status {status}"
    )]
    PartialTransfer {
        remaining: usize,
        total: usize,
        sent: usize,
        status: StatusCode,
        state: DfuState,
        #[source]
        source: Option<TransportError>,
    },

    #[error(
        "Device rejected firmware: state {state}, status {status} (string index {string_index})"
    )]
    DeviceRejected {
        status: StatusCode,
        state: DfuState,
        string_index: u8,
    },
}

impl DfuError {
    pub(crate) fn transport(operation: &'static str) -> impl FnOnce(TransportError) -> Self {
        move |source| DfuError::Transport { operation, source }
    }

    pub(crate) fn recovery(
        state: DfuState,
        operation: &'static str,
    ) -> impl FnOnce(TransportError) -> Self {
        move |source| DfuError::StateRecovery {
            state,
            operation,
            source,
        }
    }
}
