//! Firmware download loop.

use tracing::{debug, error, info, instrument, warn};

use super::context::SessionContext;
use super::machine::{DownloadProgress, TransactionCounter};
use crate::error::DfuError;
use crate::events::{DfuEvent, DfuObserver, DfuPhase, LogLevel};
use crate::primitives::DfuTransport;
use crate::protocol::DeviceStatus;
use crate::transport::UsbTransport;

/// Summary of a completed download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadReport {
    pub bytes_sent: usize,
    /// Data blocks sent, not counting the zero-length one.
    pub chunks: usize,
    /// wValue of the zero-length DNLOAD.
    pub final_transaction: u16,
    pub final_status: DeviceStatus,
}

/// Send `payload` to a device that is already in DFU mode.
///
/// The loop stops at the first failed DNLOAD, failed GETSTATUS or non-OK
/// status. The zero-length DNLOAD and a final GETSTATUS are sent in every
/// case, then the outcome is classified.
#[instrument(level = "info", skip(ctx, payload), fields(bytes = payload.len()))]
pub fn download_firmware<T: UsbTransport, O: DfuObserver>(
    ctx: &mut SessionContext<'_, T, O>,
    payload: &[u8],
) -> Result<DownloadReport, DfuError> {
    // Re-read: the handle may have been reopened in DFU mode.
    let iface = ctx.dfu_interface();
    let descriptor = iface.descriptor;
    if !descriptor.can_download() || descriptor.transfer_size == 0 {
        ctx.log(LogLevel::Error, "Device is not capable to download firmware");
        return Err(DfuError::Capability {
            attributes: descriptor.attributes,
        });
    }

    ctx.goto_phase(DfuPhase::Download);
    let index = iface.number;
    let mut progress = DownloadProgress::new(payload.len(), usize::from(descriptor.transfer_size));
    let mut transaction = TransactionCounter::new();
    let mut last_status = DeviceStatus::default();
    let mut failure = None;

    info!(
        bytes = progress.total,
        transfer_size = descriptor.transfer_size,
        chunks = progress.total_chunks(),
        "Initiating firmware download"
    );

    while let Some(range) = progress.next_range() {
        let len = range.len();
        debug!(
            transaction = transaction.value(),
            size = len,
            sent = progress.sent,
            total = progress.total,
            "Downloading chunk"
        );

        if let Err(e) = ctx
            .transport
            .download(index, transaction.value(), &payload[range])
        {
            failure = Some(e);
            break;
        }
        progress.advance(len);
        transaction.advance();
        ctx.emit(DfuEvent::Progress {
            sent: progress.sent,
            total: progress.total,
            chunk: progress.chunks,
        });

        let status = match ctx.query_status() {
            Ok(status) => status,
            Err(e) => {
                failure = Some(e);
                break;
            }
        };
        last_status = status;

        if !status.is_ok() {
            error!(
                state = %status.state,
                status = status.status.name(),
                "Firmware download aborting"
            );
            break;
        }
    }

    ctx.goto_phase(DfuPhase::Manifest);
    let completion = ctx.transport.download(index, transaction.value(), &[]);
    let final_status = ctx.query_status();
    if let Ok(status) = &final_status {
        info!(poll_timeout = status.poll_timeout, "{}", status);
    }

    let remaining = progress.remaining();
    if remaining > 0 {
        let status = final_status.as_ref().copied().unwrap_or(last_status);
        return Err(DfuError::PartialTransfer {
            remaining,
            total: progress.total,
            sent: progress.sent,
            status: status.status,
            state: status.state,
            source: failure,
        });
    }

    completion.map_err(DfuError::transport("DFU_DNLOAD (complete)"))?;
    let final_status = final_status.map_err(DfuError::transport("DFU_GETSTATUS"))?;

    if !final_status.is_ok() {
        return Err(DfuError::DeviceRejected {
            status: final_status.status,
            state: final_status.state,
            string_index: final_status.string_index,
        });
    }

    info!(bytes = progress.sent, "Firmware download complete, resetting device");
    if let Err(e) = ctx.transport.reset_and_close() {
        warn!(error = %e, "Reset after download failed");
    }

    ctx.goto_phase(DfuPhase::Complete);
    ctx.emit(DfuEvent::Complete);

    Ok(DownloadReport {
        bytes_sent: progress.sent,
        chunks: progress.chunks,
        final_transaction: transaction.value(),
        final_status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::tests::RecordingObserver;
    use crate::protocol::{
        ATTR_CAN_DOWNLOAD, DfuDescriptor, DfuRequest, DfuState, StatusCode,
    };
    use crate::transport::{LifecycleEvent, MockTransport, TransportError};
    use std::time::{Duration, Instant};

    fn mock(transfer_size: u16) -> MockTransport {
        MockTransport::new(DfuDescriptor::new(ATTR_CAN_DOWNLOAD, 0, transfer_size))
    }

    fn run(mock: &MockTransport, payload: &[u8]) -> Result<DownloadReport, DfuError> {
        let mut transport = mock.clone();
        let observer = RecordingObserver::default();
        let mut ctx = SessionContext::new(&mut transport, &observer);
        download_firmware(&mut ctx, payload)
    }

    #[test]
    fn test_chunking_and_zlp() {
        let mock = mock(64);
        mock.queue_status_n(6, StatusCode::Ok, DfuState::DfuDnloadIdle);

        let payload: Vec<u8> = (0..300).map(|i| i as u8).collect();
        let report = run(&mock, &payload).unwrap();

        let writes = mock.requests(DfuRequest::Download);
        let sizes: Vec<usize> = writes.iter().map(|w| w.data.len()).collect();
        assert_eq!(sizes, vec![64, 64, 64, 64, 44, 0]);
        let values: Vec<u16> = writes.iter().map(|w| w.value).collect();
        assert_eq!(values, vec![1, 2, 3, 4, 5, 6]);

        let sent: Vec<u8> = writes.iter().flat_map(|w| w.data.clone()).collect();
        assert_eq!(sent, payload);

        assert_eq!(report.bytes_sent, 300);
        assert_eq!(report.chunks, 5);
        assert_eq!(report.final_transaction, 6);
        assert_eq!(
            mock.lifecycle(),
            vec![LifecycleEvent::Reset, LifecycleEvent::Close]
        );
    }

    #[test]
    fn test_single_exact_chunk() {
        let mock = mock(64);
        mock.queue_status_n(2, StatusCode::Ok, DfuState::DfuDnloadIdle);

        let report = run(&mock, &[0xAA; 64]).unwrap();
        assert_eq!(report.chunks, 1);
        let sizes: Vec<usize> = mock
            .requests(DfuRequest::Download)
            .iter()
            .map(|w| w.data.len())
            .collect();
        assert_eq!(sizes, vec![64, 0]);
    }

    #[test]
    fn test_status_error_mid_transfer() {
        let mock = mock(64);
        mock.queue_status(StatusCode::Ok, DfuState::DfuDnloadIdle);
        mock.queue_status(StatusCode::ErrWrite, DfuState::DfuError);
        mock.queue_status(StatusCode::ErrWrite, DfuState::DfuError);

        let err = run(&mock, &[0u8; 300]).unwrap_err();
        match err {
            DfuError::PartialTransfer {
                remaining,
                total,
                sent,
                status,
                state,
                source,
            } => {
                assert!(source.is_none());
                assert_eq!(remaining, 172);
                assert_eq!(total, 300);
                assert_eq!(sent, 128);
                assert_eq!(status, StatusCode::ErrWrite);
                assert_eq!(state, DfuState::DfuError);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // Two data blocks plus the zero-length one, never a reset.
        let writes = mock.requests(DfuRequest::Download);
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[2].value, 3);
        assert!(writes[2].data.is_empty());
        assert!(mock.lifecycle().is_empty());
    }

    #[test]
    fn test_dnload_failure_keeps_remaining() {
        let mock = mock(64);
        mock.queue_status(StatusCode::Ok, DfuState::DfuDnloadIdle);
        mock.queue_status(StatusCode::Ok, DfuState::DfuDnloadIdle);
        mock.fail_request(DfuRequest::Download, 2);

        let err = run(&mock, &[0u8; 200]).unwrap_err();
        assert!(matches!(
            err,
            DfuError::PartialTransfer {
                remaining: 136,
                sent: 64,
                source: Some(TransportError::Stall { .. }),
                ..
            }
        ));
        // The failed block did not advance the counter.
        let writes = mock.requests(DfuRequest::Download);
        assert_eq!(writes.last().map(|w| w.value), Some(2));
    }

    #[test]
    fn test_status_failure_mid_transfer_is_kept_as_source() {
        let mock = mock(64);
        mock.queue_status(StatusCode::Ok, DfuState::DfuDnloadIdle);
        mock.queue_status_failure();
        mock.queue_status(StatusCode::ErrUnknown, DfuState::DfuError);

        let err = run(&mock, &[0u8; 200]).unwrap_err();
        assert!(matches!(
            err,
            DfuError::PartialTransfer {
                remaining: 72,
                sent: 128,
                status: StatusCode::ErrUnknown,
                source: Some(TransportError::Stall { .. }),
                ..
            }
        ));
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert!(source.is_some_and(|s| s.contains("stalled")));
    }

    #[test]
    fn test_poll_timeout_honored_between_blocks() {
        let mock = mock(64);
        mock.queue_device_status(
            DeviceStatus::new(StatusCode::Ok, DfuState::DfuDnBusy).with_poll_timeout(60),
        );
        mock.queue_status(StatusCode::Ok, DfuState::DfuDnloadIdle);
        mock.queue_device_status(
            DeviceStatus::new(StatusCode::Ok, DfuState::DfuManifest).with_poll_timeout(40),
        );

        let started = Instant::now();
        let report = run(&mock, &[0u8; 128]).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(report.final_status.poll_timeout, 40);
    }

    #[test]
    fn test_final_status_failure() {
        let mock = mock(64);
        mock.queue_status(StatusCode::Ok, DfuState::DfuDnloadIdle);
        mock.queue_status_failure();

        let err = run(&mock, &[0u8; 10]).unwrap_err();
        assert!(matches!(
            err,
            DfuError::Transport {
                operation: "DFU_GETSTATUS",
                ..
            }
        ));
    }

    #[test]
    fn test_completion_failure() {
        let mock = mock(64);
        mock.queue_status_n(2, StatusCode::Ok, DfuState::DfuIdle);
        mock.fail_request(DfuRequest::Download, 2);

        let err = run(&mock, &[0u8; 10]).unwrap_err();
        assert!(matches!(
            err,
            DfuError::Transport {
                operation: "DFU_DNLOAD (complete)",
                source: TransportError::Stall { .. }
            }
        ));
    }

    #[test]
    fn test_device_rejects_image() {
        let mock = mock(64);
        mock.queue_status(StatusCode::Ok, DfuState::DfuDnloadIdle);
        mock.queue_device_status(
            DeviceStatus::new(StatusCode::ErrVerify, DfuState::DfuError),
        );

        let err = run(&mock, &[0u8; 10]).unwrap_err();
        assert!(matches!(
            err,
            DfuError::DeviceRejected {
                status: StatusCode::ErrVerify,
                state: DfuState::DfuError,
                string_index: 0
            }
        ));
        assert!(mock.lifecycle().is_empty());
    }

    #[test]
    fn test_reset_failure_after_success_is_not_fatal() {
        let mock = mock(64);
        mock.queue_status_n(2, StatusCode::Ok, DfuState::DfuManifest);
        mock.fail_reset();

        assert!(run(&mock, &[1, 2, 3]).is_ok());
        assert_eq!(
            mock.lifecycle(),
            vec![LifecycleEvent::Reset, LifecycleEvent::Close]
        );
    }

    #[test]
    fn test_missing_capability_or_transfer_size() {
        let no_download = MockTransport::new(DfuDescriptor::new(0, 0, 64));
        assert!(matches!(
            run(&no_download, &[0u8; 4]),
            Err(DfuError::Capability { attributes: 0 })
        ));
        assert!(no_download.get_log().is_empty());

        let zero_size = mock(0);
        assert!(matches!(
            run(&zero_size, &[0u8; 4]),
            Err(DfuError::Capability { .. })
        ));
        assert!(zero_size.get_log().is_empty());
    }

    #[test]
    fn test_empty_payload_sends_only_zlp() {
        let mock = mock(64);
        mock.queue_status(StatusCode::Ok, DfuState::DfuIdle);

        let report = run(&mock, &[]).unwrap();
        assert_eq!(report.chunks, 0);
        assert_eq!(report.final_transaction, 1);
        assert_eq!(
            mock.request_sequence(),
            vec![DfuRequest::Download, DfuRequest::GetStatus]
        );
    }

    #[test]
    fn test_progress_events() {
        let mock = mock(100);
        mock.queue_status_n(4, StatusCode::Ok, DfuState::DfuDnloadIdle);

        let mut transport = mock.clone();
        let observer = RecordingObserver::default();
        let mut ctx = SessionContext::new(&mut transport, &observer);
        download_firmware(&mut ctx, &[0u8; 250]).unwrap();

        let progress: Vec<(usize, usize)> = observer
            .events()
            .iter()
            .filter_map(|e| match e {
                DfuEvent::Progress { sent, total, .. } => Some((*sent, *total)),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![(100, 250), (200, 250), (250, 250)]);
        assert!(matches!(observer.events().last(), Some(DfuEvent::Complete)));
    }
}
