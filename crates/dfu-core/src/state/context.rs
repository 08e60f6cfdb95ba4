//! Shared driver context: transport, observer and the current phase.

use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::events::{DfuEvent, DfuObserver, DfuPhase, LogLevel};
use crate::primitives::DfuTransport;
use crate::protocol::{DeviceStatus, DfuInterface};
use crate::transport::{TransportError, UsbTransport};

/// Everything a driver step needs.
pub struct SessionContext<'a, T: UsbTransport, O: DfuObserver> {
    pub transport: &'a mut T,
    pub observer: &'a O,
    pub phase: DfuPhase,
}

impl<'a, T: UsbTransport, O: DfuObserver> SessionContext<'a, T, O> {
    pub fn new(transport: &'a mut T, observer: &'a O) -> Self {
        Self {
            transport,
            observer,
            phase: DfuPhase::Connecting,
        }
    }

    pub fn emit(&self, event: DfuEvent) {
        self.observer.on_event(&event);
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(DfuEvent::Log {
            level,
            message: message.into(),
        });
    }

    /// Move to a new phase, telling the observer.
    pub fn goto_phase(&mut self, phase: DfuPhase) {
        if self.phase == phase {
            return;
        }
        info!(from = %self.phase, to = %phase, "Phase transition");
        self.emit(DfuEvent::PhaseChanged {
            from: self.phase,
            to: phase,
        });
        self.phase = phase;
    }

    /// The DFU interface as the transport currently sees it.
    pub fn dfu_interface(&self) -> DfuInterface {
        *self.transport.dfu_interface()
    }

    /// GETSTATUS on the current interface, reported to the observer.
    ///
    /// Returns only after the bwPollTimeout the device asked for has elapsed.
    pub fn query_status(&self) -> Result<DeviceStatus, TransportError> {
        let interface = self.transport.dfu_interface().number;
        let status = self.transport.get_status(interface)?;
        self.emit(DfuEvent::StateObserved { status });
        self.wait_poll_timeout(&status);
        Ok(status)
    }

    fn wait_poll_timeout(&self, status: &DeviceStatus) {
        if status.poll_timeout > 0 {
            debug!(poll_timeout = status.poll_timeout, "Waiting for device");
            thread::sleep(Duration::from_millis(u64::from(status.poll_timeout)));
        }
    }
}
