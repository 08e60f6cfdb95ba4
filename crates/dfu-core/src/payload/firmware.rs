//! Firmware image loading and chunking.
//!
//! A firmware file is the payload followed by an optional DFU suffix. The
//! suffix is checked on load and never sent to the device.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::suffix::DfuSuffix;

#[derive(Error, Debug)]
pub enum FirmwareError {
    #[error("No DFU suffix: file is {actual} bytes, suffix needs {minimum}")]
    MissingSuffix { actual: usize, minimum: usize },
    #[error("No DFU suffix: expected signature \"UFD\", found {found:02X?}")]
    BadSignature { found: [u8; 3] },
    #[error("Suffix CRC mismatch: expected 0x{expected:08X}, got 0x{actual:08X}")]
    CrcMismatch { expected: u32, actual: u32 },
    #[error("Bad suffix length {length} for a {file_len} byte file")]
    BadSuffixLength { length: u8, file_len: usize },
    #[error("File has a valid DFU suffix but suffix handling is disabled")]
    UnexpectedSuffix,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What to do with a DFU suffix at load time.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuffixPolicy {
    /// The file must end in a valid suffix.
    #[default]
    Required,
    /// Use a suffix if one is present.
    Optional,
    /// Send the whole file; a valid suffix is an error.
    None,
}

impl fmt::Display for SuffixPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuffixPolicy::Required => write!(f, "required"),
            SuffixPolicy::Optional => write!(f, "optional"),
            SuffixPolicy::None => write!(f, "none"),
        }
    }
}

impl FromStr for SuffixPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "required" => Ok(SuffixPolicy::Required),
            "optional" => Ok(SuffixPolicy::Optional),
            "none" => Ok(SuffixPolicy::None),
            other => Err(format!(
                "unknown suffix policy '{other}' (expected required, optional or none)"
            )),
        }
    }
}

/// Firmware file held in memory.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    data: Vec<u8>,
    suffix: Option<DfuSuffix>,
}

impl FirmwareImage {
    /// Build an image from raw file bytes.
    pub fn from_bytes(data: Vec<u8>, policy: SuffixPolicy) -> Result<Self, FirmwareError> {
        let suffix = DfuSuffix::parse(&data)?;

        match (policy, suffix) {
            (SuffixPolicy::Required, None) => {
                return Err(match DfuSuffix::signature(&data) {
                    Some(found) => FirmwareError::BadSignature { found },
                    None => FirmwareError::MissingSuffix {
                        actual: data.len(),
                        minimum: DfuSuffix::SIZE,
                    },
                });
            }
            (SuffixPolicy::None, Some(_)) => return Err(FirmwareError::UnexpectedSuffix),
            _ => {}
        }

        Ok(Self { data, suffix })
    }

    /// Read a firmware file from disk.
    pub fn load<P: AsRef<Path>>(path: P, policy: SuffixPolicy) -> Result<Self, FirmwareError> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        debug!(path = %path.display(), bytes = data.len(), policy = %policy, "Read firmware file");

        let image = Self::from_bytes(data, policy)?;
        match image.suffix() {
            Some(suffix) => info!(path = %path.display(), "{}", suffix),
            None => info!(path = %path.display(), "File has no DFU suffix"),
        }
        Ok(image)
    }

    /// The bytes that go to the device.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.payload_len()]
    }

    pub fn payload_len(&self) -> usize {
        self.total_len() - self.suffix_len()
    }

    /// File size including the suffix.
    pub fn total_len(&self) -> usize {
        self.data.len()
    }

    pub fn suffix_len(&self) -> usize {
        self.suffix.map_or(0, |s| usize::from(s.length))
    }

    pub fn suffix(&self) -> Option<&DfuSuffix> {
        self.suffix.as_ref()
    }
}
