//! DFU-Core: host-side USB DFU 1.1 firmware download in Rust.
//!
//! This crate drives a USB device from application mode into DFU mode and
//! streams a firmware image into it over class control transfers.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Request codes, states, status codes, functional descriptor
//! - **Transport**: USB communication abstraction (nusb, mock)
//! - **Primitives**: The seven DFU requests on top of any transport
//! - **State**: Mode transition and download loop
//! - **Payload**: Firmware file loading and DFU suffix verification
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: High-level orchestrator
//!
//! # Example
//!
//! ```no_run
//! use dfu_core::session::{SessionConfig, flash};
//!
//! let config = SessionConfig {
//!     vendor_id: 0x0483,
//!     product_id: 0xDF11,
//!     firmware_path: "firmware.dfu".to_string(),
//!     ..Default::default()
//! };
//!
//! let report = flash(&config).expect("DFU failed");
//! println!("sent {} bytes", report.bytes_sent);
//! ```

pub mod error;
pub mod events;
pub mod payload;
pub mod primitives;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use error::DfuError;
pub use events::{DfuEvent, DfuObserver, DfuPhase, LogLevel, NullObserver, TracingObserver};
pub use payload::{DfuSuffix, FirmwareError, FirmwareImage, SuffixPolicy};
pub use primitives::DfuTransport;
pub use protocol::{DeviceStatus, DfuDescriptor, DfuInterface, DfuRequest, DfuState, StatusCode};
pub use session::{DfuSession, SessionConfig, flash};
pub use state::{DownloadReport, ModeOutcome};
pub use transport::{MockTransport, NusbTransport, TransportConfig, TransportError, UsbTransport};
