//! DFU Session - High-level orchestrator for the flashing process.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::error::DfuError;
use crate::events::{DfuEvent, DfuObserver, DfuPhase, PacketDirection, TracingObserver};
use crate::payload::{FirmwareImage, SuffixPolicy};
use crate::primitives::DfuTransport;
use crate::protocol::constants::{DEFAULT_REOPEN_TIMEOUT_MS, DEFAULT_TIMEOUT_MS};
use crate::protocol::{ControlRequest, DfuInterface, DfuState};
use crate::state::{
    DownloadReport, ModeOutcome, SessionContext, download_firmware, enter_dfu_mode,
};
use crate::transport::{NusbTransport, TransportConfig, TransportError, UsbTransport};

/// Bytes of each control transfer copied into packet events.
const PACKET_PREVIEW_LEN: usize = 32;

/// Configuration for a flashing session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Path to the firmware file.
    pub firmware_path: String,
    /// Control transfer timeout in milliseconds.
    pub timeout_ms: u64,
    /// How long to wait for re-enumeration, in milliseconds.
    pub reopen_timeout_ms: u64,
    pub suffix: SuffixPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            vendor_id: 0,
            product_id: 0,
            firmware_path: String::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            reopen_timeout_ms: DEFAULT_REOPEN_TIMEOUT_MS,
            suffix: SuffixPolicy::default(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            reopen_timeout: Duration::from_millis(self.reopen_timeout_ms),
        }
    }
}

/// DFU Session - owns the transport and drives one device.
pub struct DfuSession<T: UsbTransport, O: DfuObserver> {
    transport: T,
    observer: Arc<O>,
    phase: DfuPhase,
}

impl<T: UsbTransport> DfuSession<T, TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(transport: T) -> Self {
        Self::with_observer(transport, Arc::new(TracingObserver))
    }
}

impl<T: UsbTransport, O: DfuObserver> DfuSession<T, O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(transport: T, observer: Arc<O>) -> Self {
        observer.on_event(&DfuEvent::DeviceConnected {
            vid: transport.vendor_id(),
            pid: transport.product_id(),
        });
        Self {
            transport,
            observer,
            phase: DfuPhase::Connecting,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn phase(&self) -> DfuPhase {
        self.phase
    }

    /// Bring the device into dfuIDLE.
    pub fn enter_dfu_mode(&mut self) -> Result<ModeOutcome, DfuError> {
        self.drive(|ctx| enter_dfu_mode(ctx))
    }

    /// Send `image` to a device already in DFU mode.
    pub fn download(&mut self, image: &FirmwareImage) -> Result<DownloadReport, DfuError> {
        self.drive(|ctx| download_firmware(ctx, image.payload()))
    }

    /// Mode transition followed by the download.
    ///
    /// Consumes the session so the device handle is released on every path.
    #[instrument(level = "info", skip(self, image), fields(bytes = image.payload_len()))]
    pub fn run(mut self, image: &FirmwareImage) -> Result<DownloadReport, DfuError> {
        let outcome = self.enter_dfu_mode()?;
        info!(outcome = %outcome, "Device in DFU mode");
        self.download(image)
    }

    /// DFU_GETSTATE, for diagnostics.
    pub fn query_state(&self) -> Result<DfuState, DfuError> {
        let index = self.transport.dfu_interface().number;
        self.transport
            .get_state(index)
            .map_err(DfuError::transport("DFU_GETSTATE"))
    }

    fn drive<R>(
        &mut self,
        step: impl FnOnce(
            &mut SessionContext<'_, ObservableTransport<'_, T, O>, O>,
        ) -> Result<R, DfuError>,
    ) -> Result<R, DfuError> {
        let observer = self.observer.as_ref();
        let mut transport = ObservableTransport {
            inner: &mut self.transport,
            observer,
        };
        let mut ctx = SessionContext::new(&mut transport, observer);
        ctx.phase = self.phase;

        let result = step(&mut ctx);
        if let Err(e) = &result {
            ctx.emit(DfuEvent::Error {
                message: e.to_string(),
            });
            ctx.goto_phase(DfuPhase::Error);
        }
        self.phase = ctx.phase;
        result
    }
}

/// Transport wrapper that emits packet events.
pub struct ObservableTransport<'a, T: UsbTransport, O: DfuObserver> {
    inner: &'a mut T,
    observer: &'a O,
}

impl<'a, T: UsbTransport, O: DfuObserver> ObservableTransport<'a, T, O> {
    fn packet(&self, direction: PacketDirection, request: &ControlRequest, data: &[u8]) {
        self.observer.on_event(&DfuEvent::Packet {
            direction,
            request: request.request,
            length: data.len(),
            data: Some(data.iter().take(PACKET_PREVIEW_LEN).cloned().collect()),
        });
    }
}

impl<'a, T: UsbTransport, O: DfuObserver> UsbTransport for ObservableTransport<'a, T, O> {
    fn control_out(&self, request: ControlRequest, data: &[u8]) -> Result<usize, TransportError> {
        let res = self.inner.control_out(request, data);
        if res.is_ok() {
            self.packet(PacketDirection::Tx, &request, data);
        }
        res
    }

    fn control_in(&self, request: ControlRequest, length: u16) -> Result<Vec<u8>, TransportError> {
        let res = self.inner.control_in(request, length);
        if let Ok(data) = &res {
            self.packet(PacketDirection::Rx, &request, data);
        }
        res
    }

    fn dfu_interface(&self) -> &DfuInterface {
        self.inner.dfu_interface()
    }

    fn reset_device(&mut self) -> Result<(), TransportError> {
        self.inner.reset_device()
    }

    fn reset_and_close(&mut self) -> Result<(), TransportError> {
        self.inner.reset_and_close()
    }

    fn reopen(&mut self) -> Result<(), TransportError> {
        self.inner.reopen()
    }

    fn close(&mut self) {
        self.inner.close()
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn vendor_id(&self) -> u16 {
        self.inner.vendor_id()
    }

    fn product_id(&self) -> u16 {
        self.inner.product_id()
    }
}

/// Load the firmware, open the device and flash it.
#[instrument(skip(config), fields(
    vid = %format!("{:04X}", config.vendor_id),
    pid = %format!("{:04X}", config.product_id),
))]
pub fn flash(config: &SessionConfig) -> Result<DownloadReport> {
    flash_with_observer(config, Arc::new(TracingObserver))
}

/// [`flash`] with a custom observer.
pub fn flash_with_observer<O: DfuObserver>(
    config: &SessionConfig,
    observer: Arc<O>,
) -> Result<DownloadReport> {
    let (vid, pid) = (config.vendor_id, config.product_id);
    let image = FirmwareImage::load(&config.firmware_path, config.suffix)
        .with_context(|| format!("Failed to load firmware '{}'", config.firmware_path))?;

    if let Some(suffix) = image.suffix()
        && !suffix.matches_device(vid, pid)
    {
        warn!(
            suffix_vid = %format!("{:04X}", suffix.id_vendor),
            suffix_pid = %format!("{:04X}", suffix.id_product),
            "Firmware suffix targets a different device"
        );
    }

    info!(
        bytes = image.payload_len(),
        suffix = image.suffix_len(),
        "Initiating DFU for USB device [{:04x}:{:04x}]",
        vid,
        pid
    );

    let transport = NusbTransport::open(vid, pid, config.transport_config())
        .with_context(|| format!("Failed to open USB device {:04x}:{:04x}", vid, pid))?;

    let report = DfuSession::with_observer(transport, observer)
        .run(&image)
        .context("Firmware update failed")?;

    info!(
        bytes = report.bytes_sent,
        chunks = report.chunks,
        "Firmware upload complete"
    );
    Ok(report)
}
