//! Mock USB transport for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use super::traits::{TransportError, UsbTransport};
use crate::protocol::{
    ControlRequest, DeviceStatus, DfuDescriptor, DfuInterface, DfuRequest, DfuState, Direction,
    StatusCode,
};

/// One control transfer seen by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRecord {
    pub request: DfuRequest,
    pub value: u16,
    pub index: u16,
    /// OUT payload; empty for IN requests.
    pub data: Vec<u8>,
    /// Requested IN length; payload length for OUT requests.
    pub length: u16,
}

/// Lifecycle calls that are not control transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Reset,
    Reopen,
    Close,
}

#[derive(Default)]
struct MockState {
    /// Queued GETSTATUS replies; `None` simulates a failed transfer.
    status_queue: VecDeque<Option<Vec<u8>>>,
    /// Queued GETSTATE replies.
    state_queue: VecDeque<Option<u8>>,
    /// Queued UPLOAD replies.
    upload_queue: VecDeque<Vec<u8>>,
    /// Captured control transfers, in order.
    log: Vec<ControlRecord>,
    /// Lifecycle calls, in order.
    lifecycle: Vec<LifecycleEvent>,
    /// Fail the n-th (1-based) occurrence of a request.
    failures: HashMap<DfuRequest, Vec<usize>>,
    counts: HashMap<DfuRequest, usize>,
    fail_reset: bool,
    fail_reopen: bool,
    connected: bool,
    /// Interface reported after the next reopen/reset.
    next_interface: Option<DfuInterface>,
}

/// Mock transport for unit testing session driver logic.
///
/// Clones share state, so a test can keep one handle for inspection
/// while the session owns another.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    interface: DfuInterface,
    /// Simulated VID/PID.
    vid: u16,
    pid: u16,
}

impl MockTransport {
    pub fn new(descriptor: DfuDescriptor) -> Self {
        let interface = DfuInterface {
            number: 0,
            alt_setting: 0,
            protocol: crate::protocol::DFU_PROTOCOL_RUNTIME,
            descriptor,
        };
        let state = MockState {
            connected: true,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            interface,
            vid: 0x0483,
            pid: 0xDF11,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Queue a GETSTATUS response.
    pub fn queue_status(&self, status: StatusCode, state: DfuState) {
        self.queue_device_status(DeviceStatus::new(status, state));
    }

    pub fn queue_device_status(&self, status: DeviceStatus) {
        self.queue_status_bytes(&status.to_bytes());
    }

    /// Queue a raw GETSTATUS response (may be short or malformed).
    pub fn queue_status_bytes(&self, bytes: &[u8]) {
        self.lock().status_queue.push_back(Some(bytes.to_vec()));
    }

    /// Queue `count` identical GETSTATUS responses.
    pub fn queue_status_n(&self, count: usize, status: StatusCode, state: DfuState) {
        for _ in 0..count {
            self.queue_status(status, state);
        }
    }

    /// Make the next queued GETSTATUS fail at the transport level.
    pub fn queue_status_failure(&self) {
        self.lock().status_queue.push_back(None);
    }

    pub fn queue_state(&self, state: DfuState) {
        self.lock().state_queue.push_back(Some(state.as_u8()));
    }

    pub fn queue_state_failure(&self) {
        self.lock().state_queue.push_back(None);
    }

    pub fn queue_upload(&self, data: &[u8]) {
        self.lock().upload_queue.push_back(data.to_vec());
    }

    /// Fail the `occurrence`-th (1-based) issue of `request`.
    pub fn fail_request(&self, request: DfuRequest, occurrence: usize) {
        self.lock()
            .failures
            .entry(request)
            .or_default()
            .push(occurrence);
    }

    pub fn fail_reset(&self) {
        self.lock().fail_reset = true;
    }

    pub fn fail_reopen(&self) {
        self.lock().fail_reopen = true;
    }

    /// Interface (and descriptor) to report once the device has been reopened.
    pub fn set_interface_after_reopen(&self, interface: DfuInterface) {
        self.lock().next_interface = Some(interface);
    }

    /// Get all captured control transfers.
    pub fn get_log(&self) -> Vec<ControlRecord> {
        self.lock().log.clone()
    }

    /// Captured transfers of one request type.
    pub fn requests(&self, request: DfuRequest) -> Vec<ControlRecord> {
        self.lock()
            .log
            .iter()
            .filter(|r| r.request == request)
            .cloned()
            .collect()
    }

    /// Request types in the order they were issued.
    pub fn request_sequence(&self) -> Vec<DfuRequest> {
        self.lock().log.iter().map(|r| r.request).collect()
    }

    pub fn lifecycle(&self) -> Vec<LifecycleEvent> {
        self.lock().lifecycle.clone()
    }

    /// Number of GETSTATUS responses not yet consumed.
    pub fn pending_statuses(&self) -> usize {
        self.lock().status_queue.len()
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        self.lock().connected = false;
    }

    /// Record a transfer and decide whether it should fail.
    fn record(
        &self,
        request: ControlRequest,
        data: &[u8],
        length: u16,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        if !state.connected {
            return Err(TransportError::Disconnected);
        }

        state.log.push(ControlRecord {
            request: request.request,
            value: request.value,
            index: request.index,
            data: data.to_vec(),
            length,
        });

        let count = state.counts.entry(request.request).or_insert(0);
        *count += 1;
        let occurrence = *count;

        let fail = state
            .failures
            .get(&request.request)
            .is_some_and(|f| f.contains(&occurrence));
        if fail {
            return Err(TransportError::Stall {
                request: request.request.name().to_string(),
            });
        }
        Ok(())
    }
}

impl UsbTransport for MockTransport {
    fn control_out(&self, request: ControlRequest, data: &[u8]) -> Result<usize, TransportError> {
        assert_eq!(request.direction(), Direction::Out, "{request} sent as OUT");
        self.record(request, data, data.len() as u16)?;
        Ok(data.len())
    }

    fn control_in(
        &self,
        request: ControlRequest,
        length: u16,
    ) -> Result<Vec<u8>, TransportError> {
        assert_eq!(request.direction(), Direction::In, "{request} sent as IN");
        self.record(request, &[], length)?;

        let timeout = TransportError::Timeout { timeout_ms: 5000 };
        let mut state = self.lock();
        match request.request {
            DfuRequest::GetStatus => match state.status_queue.pop_front() {
                Some(Some(bytes)) => Ok(bytes),
                Some(None) => Err(TransportError::Stall {
                    request: request.request.name().to_string(),
                }),
                None => Err(timeout),
            },
            DfuRequest::GetState => match state.state_queue.pop_front() {
                Some(Some(byte)) => Ok(vec![byte]),
                Some(None) => Err(TransportError::Stall {
                    request: request.request.name().to_string(),
                }),
                None => Err(timeout),
            },
            DfuRequest::Upload => {
                let mut data = state.upload_queue.pop_front().ok_or(timeout)?;
                data.truncate(length as usize);
                Ok(data)
            }
            _ => Err(timeout),
        }
    }

    fn dfu_interface(&self) -> &DfuInterface {
        &self.interface
    }

    fn reset_device(&mut self) -> Result<(), TransportError> {
        {
            let mut state = self.lock();
            state.lifecycle.push(LifecycleEvent::Reset);
            if state.fail_reset {
                return Err(TransportError::ResetFailed("mock reset failure".into()));
            }
        }
        self.swap_interface();
        Ok(())
    }

    fn reopen(&mut self) -> Result<(), TransportError> {
        {
            let mut state = self.lock();
            state.lifecycle.push(LifecycleEvent::Reopen);
            if state.fail_reopen {
                return Err(TransportError::DeviceNotFound {
                    vid: self.vid,
                    pid: self.pid,
                });
            }
            state.connected = true;
        }
        self.swap_interface();
        Ok(())
    }

    fn close(&mut self) {
        self.lock().lifecycle.push(LifecycleEvent::Close);
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}

impl MockTransport {
    fn swap_interface(&mut self) {
        let next = self.lock().next_interface.take();
        if let Some(next) = next {
            self.interface = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ATTR_CAN_DOWNLOAD;

    fn mock() -> MockTransport {
        MockTransport::new(DfuDescriptor::new(ATTR_CAN_DOWNLOAD, 1000, 64))
    }

    #[test]
    fn test_mock_status_queue() {
        let mock = mock();
        mock.queue_status(StatusCode::Ok, DfuState::DfuIdle);
        mock.queue_status_failure();

        let req = ControlRequest::new(DfuRequest::GetStatus, 0, 0);
        let bytes = mock.control_in(req, 6).unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 0, 2, 0]);
        assert!(mock.control_in(req, 6).is_err());

        // Queue is empty now
        assert!(matches!(
            mock.control_in(req, 6),
            Err(TransportError::Timeout { .. })
        ));
    }

    #[test]
    fn test_mock_write_capture() {
        let mock = mock();
        mock.control_out(ControlRequest::new(DfuRequest::Download, 1, 0), b"Hello")
            .unwrap();
        mock.control_out(ControlRequest::new(DfuRequest::Download, 2, 0), b"World")
            .unwrap();

        let writes = mock.requests(DfuRequest::Download);
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].data, b"Hello");
        assert_eq!(writes[1].value, 2);
    }

    #[test]
    fn test_mock_failure_injection() {
        let mock = mock();
        mock.fail_request(DfuRequest::Abort, 2);
        let req = ControlRequest::new(DfuRequest::Abort, 0, 0);
        assert!(mock.control_out(req, &[]).is_ok());
        assert!(mock.control_out(req, &[]).is_err());
        assert!(mock.control_out(req, &[]).is_ok());
    }

    #[test]
    fn test_mock_disconnect() {
        let mock = mock();
        assert!(mock.is_connected());

        mock.disconnect();
        assert!(!mock.is_connected());
        assert!(
            mock.control_out(ControlRequest::new(DfuRequest::Abort, 0, 0), &[])
                .is_err()
        );
    }

    #[test]
    fn test_mock_interface_swap_on_reopen() {
        let mut mock = mock();
        let dfu_mode = DfuInterface {
            number: 1,
            alt_setting: 0,
            protocol: crate::protocol::DFU_PROTOCOL_DFU_MODE,
            descriptor: DfuDescriptor::new(ATTR_CAN_DOWNLOAD, 0, 1024),
        };
        mock.set_interface_after_reopen(dfu_mode);
        mock.reopen().unwrap();
        assert_eq!(mock.dfu_interface().descriptor.transfer_size, 1024);
        assert_eq!(mock.lifecycle(), vec![LifecycleEvent::Reopen]);
    }
}
