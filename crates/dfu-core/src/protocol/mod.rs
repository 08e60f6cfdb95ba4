//! Protocol module - USB DFU class definitions.

pub mod constants;
pub mod descriptor;
pub mod request;
pub mod status;

pub use constants::*;
pub use descriptor::{DescriptorError, DfuDescriptor, DfuInterface};
pub use request::{ControlRequest, DfuRequest, Direction};
pub use status::{DeviceStatus, DfuState, StatusCode, StatusError};
