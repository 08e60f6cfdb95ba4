//! DFU file suffix (DFU 1.1 appendix B).
//!
//! ```text
//! bcdDevice | idProduct | idVendor | bcdDFU | "UFD" | bLength | dwCRC
//!     2     |     2     |    2     |   2    |   3   |    1    |   4
//! ```
//!
//! All fields little-endian, stored at the very end of the file.

use std::fmt;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};

use super::firmware::FirmwareError;
use crate::protocol::constants::{
    DFU_SUFFIX_LEN, DFU_SUFFIX_SIGNATURE, DFU_VERSION_1_0, ID_WILDCARD,
};

const CRC32_POLYNOMIAL: u32 = 0xEDB8_8320;
const CRC32_INIT: u32 = 0xFFFF_FFFF;

/// Reflected CRC-32 as stored in dwCRC: no final inversion.
pub fn dfu_crc32(buf: &[u8]) -> u32 {
    let mut crc = CRC32_INIT;
    for byte in buf {
        crc ^= u32::from(*byte);
        for _ in 0..8 {
            let mask = if crc & 1 != 0 { 0xFFFF_FFFF } else { 0 };
            crc = (crc >> 1) ^ (CRC32_POLYNOMIAL & mask);
        }
    }
    crc
}

/// Parsed DFU suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DfuSuffix {
    pub bcd_device: u16,
    pub id_product: u16,
    pub id_vendor: u16,
    pub bcd_dfu: u16,
    /// bLength: bytes at the end of the file that are not payload.
    pub length: u8,
    pub crc: u32,
}

impl DfuSuffix {
    pub const SIZE: usize = DFU_SUFFIX_LEN;

    /// Signature bytes where the suffix would sit, if the file is long enough.
    pub fn signature(data: &[u8]) -> Option<[u8; 3]> {
        if data.len() < Self::SIZE {
            return None;
        }
        let at = data.len() - 8;
        Some([data[at], data[at + 1], data[at + 2]])
    }

    /// Look for a suffix at the end of `data`.
    ///
    /// `Ok(None)` when there is no "UFD" signature. A signature with a bad
    /// length or CRC is an error.
    pub fn parse(data: &[u8]) -> Result<Option<Self>, FirmwareError> {
        match Self::signature(data) {
            Some(sig) if &sig == DFU_SUFFIX_SIGNATURE => {}
            _ => return Ok(None),
        }

        let mut cursor = Cursor::new(&data[data.len() - Self::SIZE..]);
        let bcd_device = cursor.read_u16::<LittleEndian>()?;
        let id_product = cursor.read_u16::<LittleEndian>()?;
        let id_vendor = cursor.read_u16::<LittleEndian>()?;
        let bcd_dfu = cursor.read_u16::<LittleEndian>()?;
        cursor.set_position(cursor.position() + 3);
        let length = cursor.read_u8()?;
        let crc = cursor.read_u32::<LittleEndian>()?;

        if usize::from(length) < Self::SIZE || usize::from(length) > data.len() {
            return Err(FirmwareError::BadSuffixLength {
                length,
                file_len: data.len(),
            });
        }

        let actual = dfu_crc32(&data[..data.len() - 4]);
        if actual != crc {
            return Err(FirmwareError::CrcMismatch {
                expected: crc,
                actual,
            });
        }

        Ok(Some(Self {
            bcd_device,
            id_product,
            id_vendor,
            bcd_dfu,
            length,
            crc,
        }))
    }

    /// Whether the suffix targets `vid`/`pid`; 0xFFFF matches anything.
    pub fn matches_device(&self, vid: u16, pid: u16) -> bool {
        (self.id_vendor == ID_WILDCARD || self.id_vendor == vid)
            && (self.id_product == ID_WILDCARD || self.id_product == pid)
    }

    /// Append a suffix to `payload`, computing the CRC.
    pub fn append_to(payload: &mut Vec<u8>, bcd_device: u16, id_product: u16, id_vendor: u16) {
        payload.extend_from_slice(&bcd_device.to_le_bytes());
        payload.extend_from_slice(&id_product.to_le_bytes());
        payload.extend_from_slice(&id_vendor.to_le_bytes());
        payload.extend_from_slice(&DFU_VERSION_1_0.to_le_bytes());
        payload.extend_from_slice(DFU_SUFFIX_SIGNATURE);
        payload.push(DFU_SUFFIX_LEN as u8);
        let crc = dfu_crc32(payload);
        payload.extend_from_slice(&crc.to_le_bytes());
    }
}

impl fmt::Display for DfuSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DFU suffix: vendor 0x{:04X}, product 0x{:04X}, device 0x{:04X}, \
             DFU 0x{:04X}, CRC 0x{:08X}",
            self.id_vendor, self.id_product, self.bcd_device, self.bcd_dfu, self.crc
        )
    }
}
