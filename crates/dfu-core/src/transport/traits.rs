//! USB Transport layer abstraction.
//!
//! Defines the `UsbTransport` trait for DFU control transfers,
//! allowing different implementations (nusb, mock, etc.).

use std::time::Duration;

use thiserror::Error;

use crate::protocol::constants::{DEFAULT_REOPEN_TIMEOUT_MS, DEFAULT_TIMEOUT_MS};
use crate::protocol::{ControlRequest, DfuInterface};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X} PID={pid:04X}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to select configuration: {0}")]
    ConfigurationFailed(String),

    #[error("No DFU interface found on device VID={vid:04X} PID={pid:04X}")]
    InterfaceNotFound { vid: u16, pid: u16 },

    #[error("DFU functional descriptor missing on interface {interface}")]
    DescriptorNotFound { interface: u8 },

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("{request} stalled")]
    Stall { request: String },

    #[error("{request} failed: {message}")]
    TransferFailed { request: String, message: String },

    #[error("{request} returned {actual} bytes, expected {expected}")]
    ShortResponse {
        request: String,
        expected: usize,
        actual: usize,
    },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("USB reset failed: {0}")]
    ResetFailed(String),

    #[error("Device handle closed")]
    Closed,

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Transport settings shared by all backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    /// Control transfer timeout.
    pub timeout: Duration,
    /// How long to wait for the device to re-enumerate after detach/reset.
    pub reopen_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            reopen_timeout: Duration::from_millis(DEFAULT_REOPEN_TIMEOUT_MS),
        }
    }
}

/// Control-transfer access to one DFU-capable device.
///
/// Implementations own the device and interface handles and must release
/// them on `close()` and on drop.
pub trait UsbTransport {
    /// Class request with an OUT (or empty) data stage.
    fn control_out(&self, request: ControlRequest, data: &[u8]) -> Result<usize, TransportError>;

    /// Class request with an IN data stage of at most `length` bytes.
    fn control_in(&self, request: ControlRequest, length: u16)
    -> Result<Vec<u8>, TransportError>;

    /// The DFU interface located when the handle was opened.
    fn dfu_interface(&self) -> &DfuInterface;

    /// Issue a USB bus reset and re-acquire the handle if the backend needs to.
    fn reset_device(&mut self) -> Result<(), TransportError>;

    /// Issue a USB bus reset and release the handle without waiting for the
    /// device to come back.
    fn reset_and_close(&mut self) -> Result<(), TransportError> {
        let result = self.reset_device();
        self.close();
        result
    }

    /// Close and reopen the device, locating the DFU interface again.
    fn reopen(&mut self) -> Result<(), TransportError>;

    /// Release interface and device handles.
    fn close(&mut self);

    /// Check if device is still connected.
    fn is_connected(&self) -> bool;

    /// Get the current VID.
    fn vendor_id(&self) -> u16;

    /// Get the current PID.
    fn product_id(&self) -> u16;
}
