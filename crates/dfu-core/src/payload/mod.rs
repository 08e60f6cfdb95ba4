//! Payload handling module.
//!
//! Firmware file loading, DFU suffix verification.

pub mod firmware;
pub mod suffix;

pub use firmware::{FirmwareError, FirmwareImage, SuffixPolicy};
pub use suffix::{DfuSuffix, dfu_crc32};
