//! GETSTATUS response decoding.
//!
//! Every decision the session driver makes is based on a freshly decoded
//! [`DeviceStatus`]; nothing here is cached.

use std::fmt;

use thiserror::Error;

use super::constants::STATUS_RESPONSE_LEN;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatusError {
    #[error("Status response too short: expected {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },
    #[error("Unknown DFU state code 0x{0:02X}")]
    UnknownState(u8),
    #[error("Unknown DFU status code 0x{0:02X}")]
    UnknownStatus(u8),
}

/// Device state (bState).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DfuState {
    AppIdle = 0x00,
    AppDetach = 0x01,
    DfuIdle = 0x02,
    DfuDnloadSync = 0x03,
    DfuDnBusy = 0x04,
    DfuDnloadIdle = 0x05,
    DfuManifestSync = 0x06,
    DfuManifest = 0x07,
    DfuManifestWaitReset = 0x08,
    DfuUploadIdle = 0x09,
    DfuError = 0x0A,
}

impl DfuState {
    pub const ALL: [DfuState; 11] = [
        DfuState::AppIdle,
        DfuState::AppDetach,
        DfuState::DfuIdle,
        DfuState::DfuDnloadSync,
        DfuState::DfuDnBusy,
        DfuState::DfuDnloadIdle,
        DfuState::DfuManifestSync,
        DfuState::DfuManifest,
        DfuState::DfuManifestWaitReset,
        DfuState::DfuUploadIdle,
        DfuState::DfuError,
    ];

    pub fn from_u8(value: u8) -> Result<Self, StatusError> {
        Self::ALL
            .get(value as usize)
            .copied()
            .ok_or(StatusError::UnknownState(value))
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// State name as written in the DFU specification.
    pub fn name(self) -> &'static str {
        match self {
            DfuState::AppIdle => "appIDLE",
            DfuState::AppDetach => "appDETACH",
            DfuState::DfuIdle => "dfuIDLE",
            DfuState::DfuDnloadSync => "dfuDNLOAD-SYNC",
            DfuState::DfuDnBusy => "dfuDNBUSY",
            DfuState::DfuDnloadIdle => "dfuDNLOAD-IDLE",
            DfuState::DfuManifestSync => "dfuMANIFEST-SYNC",
            DfuState::DfuManifest => "dfuMANIFEST",
            DfuState::DfuManifestWaitReset => "dfuMANIFEST-WAIT-RESET",
            DfuState::DfuUploadIdle => "dfuUPLOAD-IDLE",
            DfuState::DfuError => "dfuERROR",
        }
    }

    /// A previous transfer was left open (dfuDNLOAD-IDLE or dfuUPLOAD-IDLE).
    pub fn is_stale_transfer(self) -> bool {
        matches!(self, DfuState::DfuDnloadIdle | DfuState::DfuUploadIdle)
    }
}

impl fmt::Display for DfuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Device status (bStatus).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StatusCode {
    Ok = 0x00,
    ErrTarget = 0x01,
    ErrFile = 0x02,
    ErrWrite = 0x03,
    ErrErase = 0x04,
    ErrCheckErased = 0x05,
    ErrProg = 0x06,
    ErrVerify = 0x07,
    ErrAddress = 0x08,
    ErrNotDone = 0x09,
    ErrFirmware = 0x0A,
    ErrVendor = 0x0B,
    ErrUsbReset = 0x0C,
    ErrPowerOnReset = 0x0D,
    ErrUnknown = 0x0E,
    ErrStalledPkt = 0x0F,
}

impl StatusCode {
    pub const ALL: [StatusCode; 16] = [
        StatusCode::Ok,
        StatusCode::ErrTarget,
        StatusCode::ErrFile,
        StatusCode::ErrWrite,
        StatusCode::ErrErase,
        StatusCode::ErrCheckErased,
        StatusCode::ErrProg,
        StatusCode::ErrVerify,
        StatusCode::ErrAddress,
        StatusCode::ErrNotDone,
        StatusCode::ErrFirmware,
        StatusCode::ErrVendor,
        StatusCode::ErrUsbReset,
        StatusCode::ErrPowerOnReset,
        StatusCode::ErrUnknown,
        StatusCode::ErrStalledPkt,
    ];

    pub fn from_u8(value: u8) -> Result<Self, StatusError> {
        Self::ALL
            .get(value as usize)
            .copied()
            .ok_or(StatusError::UnknownStatus(value))
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_ok(self) -> bool {
        self == StatusCode::Ok
    }

    /// Short mnemonic (OK, errWRITE, ...).
    pub fn name(self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::ErrTarget => "errTARGET",
            StatusCode::ErrFile => "errFILE",
            StatusCode::ErrWrite => "errWRITE",
            StatusCode::ErrErase => "errERASE",
            StatusCode::ErrCheckErased => "errCHECK_ERASED",
            StatusCode::ErrProg => "errPROG",
            StatusCode::ErrVerify => "errVERIFY",
            StatusCode::ErrAddress => "errADDRESS",
            StatusCode::ErrNotDone => "errNOTDONE",
            StatusCode::ErrFirmware => "errFIRMWARE",
            StatusCode::ErrVendor => "errVENDOR",
            StatusCode::ErrUsbReset => "errUSBR",
            StatusCode::ErrPowerOnReset => "errPOR",
            StatusCode::ErrUnknown => "errUNKNOWN",
            StatusCode::ErrStalledPkt => "errSTALLEDPKT",
        }
    }

    /// Description from the DFU 1.1 status table.
    pub fn description(self) -> &'static str {
        match self {
            StatusCode::Ok => "No error condition is present",
            StatusCode::ErrTarget => "File is not targeted for use by this device",
            StatusCode::ErrFile => "File is for this device but fails some vendor-specific test",
            StatusCode::ErrWrite => "Device is unable to write memory",
            StatusCode::ErrErase => "Memory erase function failed",
            StatusCode::ErrCheckErased => "Memory erase check failed",
            StatusCode::ErrProg => "Program memory function failed",
            StatusCode::ErrVerify => "Programmed memory failed verification",
            StatusCode::ErrAddress => {
                "Cannot program memory due to received address that is out of range"
            }
            StatusCode::ErrNotDone => {
                "Received DFU_DNLOAD with wLength = 0, \
                 but device does not think that it has all data yet"
            }
            StatusCode::ErrFirmware => {
                "Device's firmware is corrupt. It cannot return to run-time (non-DFU) operations"
            }
            StatusCode::ErrVendor => "iString indicates a vendor specific error",
            StatusCode::ErrUsbReset => "Device detected unexpected USB reset signalling",
            StatusCode::ErrPowerOnReset => "Device detected unexpected power on reset",
            StatusCode::ErrUnknown => {
                "Something went wrong, but the device does not know what it was"
            }
            StatusCode::ErrStalledPkt => "Device stalled an unexpected request",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.description())
    }
}

/// Decoded DFU_GETSTATUS response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStatus {
    pub status: StatusCode,
    /// Milliseconds to wait before the next request (24-bit).
    pub poll_timeout: u32,
    pub state: DfuState,
    /// Index of a status description string, 0 if none.
    pub string_index: u8,
}

impl DeviceStatus {
    pub const SIZE: usize = STATUS_RESPONSE_LEN as usize;

    /// Decode the 6-byte response.
    ///
    /// Layout: bStatus, bwPollTimeout (3 bytes LE), bState, iString.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StatusError> {
        if bytes.len() < Self::SIZE {
            return Err(StatusError::TooShort {
                expected: Self::SIZE,
                actual: bytes.len(),
            });
        }

        let poll_timeout = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], 0]);

        Ok(Self {
            status: StatusCode::from_u8(bytes[0])?,
            poll_timeout,
            state: DfuState::from_u8(bytes[4])?,
            string_index: bytes[5],
        })
    }

    /// Encode back into wire format. Poll timeouts above 24 bits are truncated.
    pub fn to_bytes(&self) -> [u8; 6] {
        let poll = self.poll_timeout.to_le_bytes();
        [
            self.status.as_u8(),
            poll[0],
            poll[1],
            poll[2],
            self.state.as_u8(),
            self.string_index,
        ]
    }

    pub fn new(status: StatusCode, state: DfuState) -> Self {
        Self {
            status,
            poll_timeout: 0,
            state,
            string_index: 0,
        }
    }

    pub fn with_poll_timeout(mut self, poll_timeout: u32) -> Self {
        self.poll_timeout = poll_timeout & 0x00FF_FFFF;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}

impl Default for DeviceStatus {
    /// Placeholder reported when no status could be read.
    fn default() -> Self {
        Self::new(StatusCode::ErrUnknown, DfuState::DfuError)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Device State {}, Status {}, String {}",
            self.state,
            self.status.name(),
            self.string_index
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_idle_with_poll_timeout() {
        let status = DeviceStatus::from_bytes(&[0x00, 0x64, 0x00, 0x00, 0x02, 0x00]).unwrap();
        assert_eq!(status.status, StatusCode::Ok);
        assert_eq!(status.poll_timeout, 100);
        assert_eq!(status.state, DfuState::DfuIdle);
        assert_eq!(status.string_index, 0);
    }

    #[test]
    fn test_decode_24bit_poll_timeout() {
        let status = DeviceStatus::from_bytes(&[0x03, 0x01, 0x02, 0x03, 0x0A, 0x04]).unwrap();
        assert_eq!(status.status, StatusCode::ErrWrite);
        assert_eq!(status.poll_timeout, 0x030201);
        assert_eq!(status.state, DfuState::DfuError);
        assert_eq!(status.string_index, 4);
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            DeviceStatus::from_bytes(&[0x00, 0x00, 0x00]),
            Err(StatusError::TooShort {
                expected: 6,
                actual: 3
            })
        );
        assert_eq!(
            DeviceStatus::from_bytes(&[0x00, 0, 0, 0, 0x0B, 0]),
            Err(StatusError::UnknownState(0x0B))
        );
        assert_eq!(
            DeviceStatus::from_bytes(&[0x10, 0, 0, 0, 0x02, 0]),
            Err(StatusError::UnknownStatus(0x10))
        );
    }

    #[test]
    fn test_default_is_unknown_error() {
        let status = DeviceStatus::default();
        assert_eq!(status.status, StatusCode::ErrUnknown);
        assert_eq!(status.state, DfuState::DfuError);
        assert_eq!(status.poll_timeout, 0);
    }

    #[test]
    fn test_code_tables_are_dense() {
        for (i, state) in DfuState::ALL.iter().enumerate() {
            assert_eq!(state.as_u8() as usize, i);
        }
        for (i, code) in StatusCode::ALL.iter().enumerate() {
            assert_eq!(code.as_u8() as usize, i);
        }
        assert_eq!(DfuState::DfuDnloadIdle.to_string(), "dfuDNLOAD-IDLE");
        assert!(DfuState::DfuUploadIdle.is_stale_transfer());
        assert!(!DfuState::DfuIdle.is_stale_transfer());
    }
}
