//! End-to-end session scenarios against the mock transport.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dfu_core::protocol::{
    ATTR_CAN_DOWNLOAD, ATTR_MANIFESTATION_TOLERANT, ATTR_WILL_DETACH, DFU_PROTOCOL_DFU_MODE,
};
use dfu_core::transport::LifecycleEvent;
use dfu_core::{
    DeviceStatus, DfuDescriptor, DfuError, DfuEvent, DfuInterface, DfuObserver, DfuRequest,
    DfuSession, DfuState, DfuSuffix, FirmwareImage, MockTransport, ModeOutcome, NullObserver,
    StatusCode, SuffixPolicy, UsbTransport,
};

#[derive(Default)]
struct Events(Mutex<Vec<DfuEvent>>);

impl DfuObserver for Events {
    fn on_event(&self, event: &DfuEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}

fn firmware(len: usize) -> FirmwareImage {
    let mut data: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
    DfuSuffix::append_to(&mut data, 0x0100, 0xDF11, 0x0483);
    FirmwareImage::from_bytes(data, SuffixPolicy::Required).unwrap()
}

fn session(mock: &MockTransport) -> DfuSession<MockTransport, NullObserver> {
    DfuSession::with_observer(mock.clone(), Arc::new(NullObserver))
}

#[test]
fn flashes_300_bytes_in_64_byte_blocks() {
    let mock = MockTransport::new(DfuDescriptor::new(
        ATTR_CAN_DOWNLOAD | ATTR_WILL_DETACH,
        1000,
        64,
    ));
    mock.queue_status(StatusCode::Ok, DfuState::AppIdle);
    mock.queue_status(StatusCode::Ok, DfuState::DfuIdle);
    mock.queue_status_n(5, StatusCode::Ok, DfuState::DfuDnloadIdle);
    mock.queue_status(StatusCode::Ok, DfuState::DfuManifest);

    let image = firmware(300);
    let report = session(&mock).run(&image).unwrap();

    let writes = mock.requests(DfuRequest::Download);
    let sizes: Vec<usize> = writes.iter().map(|w| w.data.len()).collect();
    assert_eq!(sizes, vec![64, 64, 64, 64, 44, 0]);
    let sent: Vec<u8> = writes.iter().flat_map(|w| w.data.clone()).collect();
    assert_eq!(sent, image.payload());

    assert_eq!(report.bytes_sent, 300);
    assert_eq!(report.final_transaction, 6);
    assert_eq!(report.final_status.state, DfuState::DfuManifest);
    assert_eq!(mock.requests(DfuRequest::Detach).len(), 1);
    assert_eq!(mock.pending_statuses(), 0);
    // No wait for re-enumeration once the image is in.
    assert_eq!(
        mock.lifecycle(),
        vec![
            LifecycleEvent::Reopen,
            LifecycleEvent::Reset,
            LifecycleEvent::Close
        ]
    );
}

#[test]
fn recovers_from_dfu_error_before_download() {
    let mock = MockTransport::new(DfuDescriptor::new(ATTR_CAN_DOWNLOAD, 0, 64));
    mock.queue_status(StatusCode::ErrUnknown, DfuState::DfuError);
    mock.queue_status(StatusCode::Ok, DfuState::DfuIdle);
    mock.queue_status_n(2, StatusCode::Ok, DfuState::DfuDnloadIdle);

    session(&mock).run(&firmware(32)).unwrap();

    let sequence = mock.request_sequence();
    assert_eq!(
        &sequence[..4],
        &[
            DfuRequest::GetStatus,
            DfuRequest::ClearStatus,
            DfuRequest::Abort,
            DfuRequest::GetStatus
        ]
    );
    assert_eq!(mock.requests(DfuRequest::Detach).len(), 0);
}

#[test]
fn write_error_mid_transfer_is_partial() {
    let mock = MockTransport::new(DfuDescriptor::new(ATTR_CAN_DOWNLOAD, 0, 64));
    mock.queue_status(StatusCode::Ok, DfuState::DfuIdle);
    mock.queue_status_n(2, StatusCode::Ok, DfuState::DfuDnloadIdle);
    mock.queue_status(StatusCode::ErrWrite, DfuState::DfuError);
    mock.queue_status(StatusCode::ErrWrite, DfuState::DfuError);

    let err = session(&mock).run(&firmware(300)).unwrap_err();
    match err {
        DfuError::PartialTransfer {
            remaining,
            total,
            sent,
            status,
            ..
        } => {
            assert_eq!((remaining, total, sent), (108, 300, 192));
            assert_eq!(status, StatusCode::ErrWrite);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!mock.lifecycle().contains(&LifecycleEvent::Reset));
}

#[test]
fn first_status_failure_sends_no_data() {
    let mock = MockTransport::new(DfuDescriptor::new(ATTR_CAN_DOWNLOAD, 0, 64));
    mock.queue_status_failure();

    let err = session(&mock).run(&firmware(300)).unwrap_err();
    assert!(matches!(err, DfuError::Transport { .. }));
    assert!(mock.requests(DfuRequest::Download).is_empty());
}

#[test]
fn second_run_in_dfu_idle_is_a_no_op() {
    let mock = MockTransport::new(DfuDescriptor::new(ATTR_CAN_DOWNLOAD, 0, 64));
    mock.queue_status(StatusCode::Ok, DfuState::DfuIdle);
    mock.queue_status(StatusCode::Ok, DfuState::DfuIdle);

    let mut session = session(&mock);
    assert_eq!(session.enter_dfu_mode().unwrap(), ModeOutcome::AlreadyInDfuMode);
    assert_eq!(session.enter_dfu_mode().unwrap(), ModeOutcome::AlreadyInDfuMode);

    assert_eq!(
        mock.request_sequence(),
        vec![DfuRequest::GetStatus, DfuRequest::GetStatus]
    );
    assert!(mock.lifecycle().is_empty());
}

#[test]
fn missing_download_capability_touches_nothing() {
    let mock = MockTransport::new(DfuDescriptor::new(
        ATTR_WILL_DETACH | ATTR_MANIFESTATION_TOLERANT,
        0,
        64,
    ));

    let err = session(&mock).run(&firmware(10)).unwrap_err();
    assert!(matches!(err, DfuError::Capability { attributes: 0x0C }));
    assert!(mock.get_log().is_empty());
}

#[test]
fn host_resets_device_without_will_detach() {
    let mock = MockTransport::new(DfuDescriptor::new(ATTR_CAN_DOWNLOAD, 250, 64));
    mock.set_interface_after_reopen(DfuInterface {
        number: 0,
        alt_setting: 0,
        protocol: DFU_PROTOCOL_DFU_MODE,
        descriptor: DfuDescriptor::new(ATTR_CAN_DOWNLOAD, 0, 64),
    });
    mock.queue_status(StatusCode::Ok, DfuState::AppIdle);
    mock.queue_status(StatusCode::Ok, DfuState::DfuIdle);

    let events = Arc::new(Events::default());
    let mut session = DfuSession::with_observer(mock.clone(), events.clone());
    assert_eq!(session.enter_dfu_mode().unwrap(), ModeOutcome::Detached);

    assert_eq!(
        mock.lifecycle(),
        vec![LifecycleEvent::Reset, LifecycleEvent::Reopen]
    );
    assert_eq!(mock.requests(DfuRequest::Detach)[0].value, 250);
    assert!(session.transport().dfu_interface().is_dfu_mode());

    let observed: Vec<DfuState> = events
        .0
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            DfuEvent::StateObserved { status } => Some(status.state),
            _ => None,
        })
        .collect();
    assert_eq!(observed, vec![DfuState::AppIdle, DfuState::DfuIdle]);
}

#[test]
fn every_poll_timeout_is_waited_out() {
    let mock = MockTransport::new(DfuDescriptor::new(ATTR_CAN_DOWNLOAD, 0, 64));
    mock.queue_device_status(
        DeviceStatus::new(StatusCode::ErrUnknown, DfuState::DfuError).with_poll_timeout(50),
    );
    mock.queue_status(StatusCode::Ok, DfuState::DfuIdle);
    mock.queue_device_status(
        DeviceStatus::new(StatusCode::Ok, DfuState::DfuDnBusy).with_poll_timeout(50),
    );
    mock.queue_status(StatusCode::Ok, DfuState::DfuManifest);

    let started = Instant::now();
    let report = session(&mock).run(&firmware(64)).unwrap();
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(report.bytes_sent, 64);
    assert_eq!(mock.pending_statuses(), 0);
}

#[test]
fn transfer_counter_wraps_past_65535() {
    // 65537 one-byte blocks: the last data block carries 1 again, the ZLP 2.
    let mock = MockTransport::new(DfuDescriptor::new(ATTR_CAN_DOWNLOAD, 0, 1));
    let len = 65_537;
    mock.queue_status(StatusCode::Ok, DfuState::DfuIdle);
    mock.queue_status_n(len + 1, StatusCode::Ok, DfuState::DfuDnloadIdle);

    let report = session(&mock).run(&firmware(len)).unwrap();

    let writes = mock.requests(DfuRequest::Download);
    assert_eq!(writes.len(), len + 1);
    assert_eq!(writes[65_534].value, 65_535);
    assert_eq!(writes[65_535].value, 0);
    assert_eq!(writes[65_536].value, 1);
    assert_eq!(report.final_transaction, 2);
}
