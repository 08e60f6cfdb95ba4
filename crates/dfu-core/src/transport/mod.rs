//! Transport layer module.

pub mod mock;
pub mod nusb;
pub mod traits;

pub use mock::{ControlRecord, LifecycleEvent, MockTransport};
pub use nusb::NusbTransport;
pub use traits::{TransportConfig, TransportError, UsbTransport};
