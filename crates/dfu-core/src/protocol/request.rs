//! DFU class requests and their control-transfer framing.

use std::fmt;

use super::constants::*;

/// Data stage direction of a control transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host -> Device
    Out,
    /// Device -> Host
    In,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Out => write!(f, "OUT"),
            Direction::In => write!(f, "IN"),
        }
    }
}

/// The seven DFU class requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DfuRequest {
    Detach,
    Download,
    Upload,
    GetStatus,
    ClearStatus,
    GetState,
    Abort,
}

impl DfuRequest {
    /// bRequest value.
    pub const fn code(self) -> u8 {
        match self {
            DfuRequest::Detach => DFU_DETACH,
            DfuRequest::Download => DFU_DNLOAD,
            DfuRequest::Upload => DFU_UPLOAD,
            DfuRequest::GetStatus => DFU_GETSTATUS,
            DfuRequest::ClearStatus => DFU_CLRSTATUS,
            DfuRequest::GetState => DFU_GETSTATE,
            DfuRequest::Abort => DFU_ABORT,
        }
    }

    pub const fn direction(self) -> Direction {
        match self {
            DfuRequest::Upload | DfuRequest::GetStatus | DfuRequest::GetState => Direction::In,
            _ => Direction::Out,
        }
    }

    /// Request name as written in the DFU specification.
    pub const fn name(self) -> &'static str {
        match self {
            DfuRequest::Detach => "DFU_DETACH",
            DfuRequest::Download => "DFU_DNLOAD",
            DfuRequest::Upload => "DFU_UPLOAD",
            DfuRequest::GetStatus => "DFU_GETSTATUS",
            DfuRequest::ClearStatus => "DFU_CLRSTATUS",
            DfuRequest::GetState => "DFU_GETSTATE",
            DfuRequest::Abort => "DFU_ABORT",
        }
    }

    /// Look a request up by its bRequest value.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            DFU_DETACH => Some(DfuRequest::Detach),
            DFU_DNLOAD => Some(DfuRequest::Download),
            DFU_UPLOAD => Some(DfuRequest::Upload),
            DFU_GETSTATUS => Some(DfuRequest::GetStatus),
            DFU_CLRSTATUS => Some(DfuRequest::ClearStatus),
            DFU_GETSTATE => Some(DfuRequest::GetState),
            DFU_ABORT => Some(DfuRequest::Abort),
            _ => None,
        }
    }
}

impl fmt::Display for DfuRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Setup stage of one DFU control transfer.
///
/// The data stage is passed separately: a slice for OUT requests, a
/// length for IN requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest {
    pub request: DfuRequest,
    pub value: u16,
    /// Interface number (wIndex).
    pub index: u16,
}

impl ControlRequest {
    pub fn new(request: DfuRequest, value: u16, interface: u8) -> Self {
        Self {
            request,
            value,
            index: interface as u16,
        }
    }

    pub fn direction(&self) -> Direction {
        self.request.direction()
    }

    /// bmRequestType byte.
    pub fn request_type(&self) -> u8 {
        match self.direction() {
            Direction::Out => REQUEST_TYPE_OUT,
            Direction::In => REQUEST_TYPE_IN,
        }
    }
}

impl fmt::Display for ControlRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (bmRequestType=0x{:02X} wValue={} wIndex={})",
            self.request,
            self.request_type(),
            self.value,
            self.index
        )
    }
}
