//! DFU protocol primitives.
//!
//! One method per DFU class request. Each issues exactly one control
//! transfer, never retries, and turns transport failure into an `Err`.
//! Every [`UsbTransport`] gets these for free through the blanket impl.

use tracing::{trace, warn};

use crate::protocol::constants::{STATE_RESPONSE_LEN, STATUS_RESPONSE_LEN};
use crate::protocol::{ControlRequest, DeviceStatus, DfuRequest, DfuState, StatusError};
use crate::transport::{TransportError, UsbTransport};

/// The seven DFU requests.
///
/// `interface` is the DFU interface number, sent as wIndex.
pub trait DfuTransport {
    /// DFU_DETACH: ask the device to wait `timeout_ms` for a USB reset.
    fn detach(&self, interface: u8, timeout_ms: u16) -> Result<(), TransportError>;

    /// DFU_DNLOAD: send one block. An empty `data` signals end of transfer.
    fn download(&self, interface: u8, transaction: u16, data: &[u8])
    -> Result<(), TransportError>;

    /// DFU_UPLOAD: read up to `length` bytes.
    fn upload(
        &self,
        interface: u8,
        transaction: u16,
        length: u16,
    ) -> Result<Vec<u8>, TransportError>;

    /// DFU_GETSTATUS.
    fn get_status(&self, interface: u8) -> Result<DeviceStatus, TransportError>;

    /// DFU_CLRSTATUS.
    fn clear_status(&self, interface: u8) -> Result<(), TransportError>;

    /// DFU_GETSTATE.
    fn get_state(&self, interface: u8) -> Result<DfuState, TransportError>;

    /// DFU_ABORT.
    fn abort(&self, interface: u8) -> Result<(), TransportError>;
}

fn log_failure<T>(
    request: DfuRequest,
    result: Result<T, TransportError>,
) -> Result<T, TransportError> {
    if let Err(e) = &result {
        warn!(request = %request, error = %e, "Failed {}", request);
    }
    result
}

fn out_request<T: UsbTransport + ?Sized>(
    transport: &T,
    request: DfuRequest,
    value: u16,
    interface: u8,
    data: &[u8],
) -> Result<(), TransportError> {
    let setup = ControlRequest::new(request, value, interface);
    trace!(%setup, len = data.len(), "Control OUT");
    log_failure(request, transport.control_out(setup, data).map(|_| ()))
}

fn in_request<T: UsbTransport + ?Sized>(
    transport: &T,
    request: DfuRequest,
    value: u16,
    interface: u8,
    length: u16,
) -> Result<Vec<u8>, TransportError> {
    let setup = ControlRequest::new(request, value, interface);
    trace!(%setup, length, "Control IN");
    log_failure(request, transport.control_in(setup, length))
}

fn decode_error(err: StatusError) -> TransportError {
    match err {
        StatusError::TooShort { expected, actual } => TransportError::ShortResponse {
            request: DfuRequest::GetStatus.name().to_string(),
            expected,
            actual,
        },
        other => TransportError::MalformedResponse(other.to_string()),
    }
}

impl<T: UsbTransport + ?Sized> DfuTransport for T {
    fn detach(&self, interface: u8, timeout_ms: u16) -> Result<(), TransportError> {
        out_request(self, DfuRequest::Detach, timeout_ms, interface, &[])
    }

    fn download(
        &self,
        interface: u8,
        transaction: u16,
        data: &[u8],
    ) -> Result<(), TransportError> {
        out_request(self, DfuRequest::Download, transaction, interface, data)
    }

    fn upload(
        &self,
        interface: u8,
        transaction: u16,
        length: u16,
    ) -> Result<Vec<u8>, TransportError> {
        in_request(self, DfuRequest::Upload, transaction, interface, length)
    }

    fn get_status(&self, interface: u8) -> Result<DeviceStatus, TransportError> {
        let bytes = in_request(
            self,
            DfuRequest::GetStatus,
            0,
            interface,
            STATUS_RESPONSE_LEN,
        )?;
        let status = log_failure(
            DfuRequest::GetStatus,
            DeviceStatus::from_bytes(&bytes).map_err(decode_error),
        )?;
        trace!(
            status = status.status.name(),
            state = %status.state,
            poll_timeout = status.poll_timeout,
            string_index = status.string_index,
            "Decoded status"
        );
        Ok(status)
    }

    fn clear_status(&self, interface: u8) -> Result<(), TransportError> {
        out_request(self, DfuRequest::ClearStatus, 0, interface, &[])
    }

    fn get_state(&self, interface: u8) -> Result<DfuState, TransportError> {
        let bytes = in_request(self, DfuRequest::GetState, 0, interface, STATE_RESPONSE_LEN)?;
        let byte = *bytes.first().ok_or_else(|| TransportError::ShortResponse {
            request: DfuRequest::GetState.name().to_string(),
            expected: 1,
            actual: 0,
        })?;
        let state = DfuState::from_u8(byte)
            .map_err(|e| TransportError::MalformedResponse(e.to_string()))?;
        trace!(state = %state, "Decoded state");
        Ok(state)
    }

    fn abort(&self, interface: u8) -> Result<(), TransportError> {
        out_request(self, DfuRequest::Abort, 0, interface, &[])
    }
}
