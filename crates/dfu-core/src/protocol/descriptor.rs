//! DFU functional descriptor (DFU 1.1 section 4.1.3).

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use thiserror::Error;

use super::constants::*;

#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("Buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("Not a DFU functional descriptor: type 0x{0:02X}")]
    WrongType(u8),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// DFU functional descriptor.
///
/// ```text
/// bLength | bDescriptorType | bmAttributes | wDetachTimeOut | wTransferSize | bcdDFUVersion
///   1     |       1         |      1       |       2        |       2       |   2 (1.1 only)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DfuDescriptor {
    pub attributes: u8,
    /// Milliseconds the device waits for a USB reset after DFU_DETACH.
    pub detach_timeout: u16,
    /// Maximum bytes per DFU_DNLOAD/DFU_UPLOAD.
    pub transfer_size: u16,
    pub dfu_version: u16,
}

impl DfuDescriptor {
    pub fn new(attributes: u8, detach_timeout: u16, transfer_size: u16) -> Self {
        Self {
            attributes,
            detach_timeout,
            transfer_size,
            dfu_version: 0x0110,
        }
    }

    /// Parse a raw descriptor including its bLength/bDescriptorType header.
    pub fn from_bytes(data: &[u8]) -> Result<Self, DescriptorError> {
        if data.len() < DFU_DESCRIPTOR_LEN_1_0 {
            return Err(DescriptorError::BufferTooSmall {
                expected: DFU_DESCRIPTOR_LEN_1_0,
                actual: data.len(),
            });
        }

        let mut cursor = Cursor::new(data);
        let length = cursor.read_u8()? as usize;
        let descriptor_type = cursor.read_u8()?;
        if descriptor_type != DFU_FUNCTIONAL_DESCRIPTOR_TYPE {
            return Err(DescriptorError::WrongType(descriptor_type));
        }
        if length < DFU_DESCRIPTOR_LEN_1_0 {
            return Err(DescriptorError::BufferTooSmall {
                expected: DFU_DESCRIPTOR_LEN_1_0,
                actual: length,
            });
        }

        let attributes = cursor.read_u8()?;
        let detach_timeout = cursor.read_u16::<LittleEndian>()?;
        let transfer_size = cursor.read_u16::<LittleEndian>()?;

        let has_version = length >= DFU_DESCRIPTOR_LEN_1_1 && data.len() >= DFU_DESCRIPTOR_LEN_1_1;
        let dfu_version = if has_version {
            cursor.read_u16::<LittleEndian>()?
        } else {
            DFU_VERSION_1_0
        };

        Ok(Self {
            attributes,
            detach_timeout,
            transfer_size,
            dfu_version,
        })
    }

    pub fn can_download(&self) -> bool {
        self.attributes & ATTR_CAN_DOWNLOAD != 0
    }

    pub fn can_upload(&self) -> bool {
        self.attributes & ATTR_CAN_UPLOAD != 0
    }

    /// Device stays on the bus after manifestation.
    pub fn manifestation_tolerant(&self) -> bool {
        self.attributes & ATTR_MANIFESTATION_TOLERANT != 0
    }

    /// Device detaches itself after DFU_DETACH; the host must not reset it.
    pub fn will_detach(&self) -> bool {
        self.attributes & ATTR_WILL_DETACH != 0
    }

    /// Bits outside the four defined attributes.
    pub fn reserved_attributes(&self) -> u8 {
        self.attributes & 0xF0
    }
}

/// Located DFU interface together with its functional descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DfuInterface {
    pub number: u8,
    pub alt_setting: u8,
    /// bInterfaceProtocol: 1 in runtime mode, 2 in DFU mode.
    pub protocol: u8,
    pub descriptor: DfuDescriptor,
}

impl DfuInterface {
    pub fn is_dfu_mode(&self) -> bool {
        self.protocol == DFU_PROTOCOL_DFU_MODE
    }
}
