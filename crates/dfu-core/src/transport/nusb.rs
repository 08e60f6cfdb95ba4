//! nusb-based USB transport implementation.
//!
//! Key nusb 0.2 API patterns:
//! - `list_devices().wait()` for device enumeration
//! - `device_info.open().wait()` to open device
//! - `device.detach_and_claim_interface(n).wait()` to claim interface
//! - `interface.control_out(..).wait()` / `control_in(..).wait()` for class requests

use std::thread;
use std::time::{Duration, Instant};

use nusb::transfer::{ControlIn, ControlOut, ControlType, Recipient, TransferError};
use nusb::{Device, DeviceInfo, Interface, MaybeFuture, list_devices};
use tracing::{debug, info, instrument, warn};

use super::traits::{TransportConfig, TransportError, UsbTransport};
use crate::protocol::constants::*;
use crate::protocol::{ControlRequest, DfuDescriptor, DfuInterface};

struct Handle {
    // Field order matters: the interface is released before the device closes.
    interface: Interface,
    device: Device,
}

/// nusb-based USB transport.
pub struct NusbTransport {
    handle: Option<Handle>,
    dfu: DfuInterface,
    vid: u16,
    pid: u16,
    config: TransportConfig,
}

impl NusbTransport {
    /// Open a device with specific VID/PID and claim its DFU interface.
    #[instrument(
        level = "info",
        skip(config),
        fields(vid = format!("{:04X}", vid), pid = format!("{:04X}", pid))
    )]
    pub fn open(vid: u16, pid: u16, config: TransportConfig) -> Result<Self, TransportError> {
        let device_info =
            find_device(vid, pid)?.ok_or(TransportError::DeviceNotFound { vid, pid })?;
        let (handle, dfu) = open_device_info(&device_info)?;

        Ok(Self {
            handle: Some(handle),
            dfu,
            vid: device_info.vendor_id(),
            pid: device_info.product_id(),
            config,
        })
    }

    fn interface(&self) -> Result<&Interface, TransportError> {
        self.handle
            .as_ref()
            .map(|h| &h.interface)
            .ok_or(TransportError::Closed)
    }

    fn map_transfer_error(&self, request: &ControlRequest, err: TransferError) -> TransportError {
        let name = request.request.name().to_string();
        match err {
            TransferError::Stall => TransportError::Stall { request: name },
            TransferError::Disconnected => TransportError::Disconnected,
            TransferError::Cancelled => TransportError::Timeout {
                timeout_ms: self.config.timeout.as_millis() as u64,
            },
            other => TransportError::TransferFailed {
                request: name,
                message: other.to_string(),
            },
        }
    }

    /// Poll enumeration until the device shows up again.
    fn wait_for_device(&self) -> Result<DeviceInfo, TransportError> {
        let start = Instant::now();
        let mut poll_count = 0u64;

        loop {
            poll_count += 1;
            if let Some(info) = find_device(self.vid, self.pid)? {
                debug!(polls = poll_count, "Device re-enumerated");
                return Ok(info);
            }
            if start.elapsed() > self.config.reopen_timeout {
                return Err(TransportError::Timeout {
                    timeout_ms: self.config.reopen_timeout.as_millis() as u64,
                });
            }
            thread::sleep(Duration::from_millis(REOPEN_POLL_INTERVAL_MS));
        }
    }
}

impl UsbTransport for NusbTransport {
    #[instrument(
        level = "trace",
        skip(self, data),
        fields(request = %request.request, len = data.len())
    )]
    fn control_out(&self, request: ControlRequest, data: &[u8]) -> Result<usize, TransportError> {
        let interface = self.interface()?;
        interface
            .control_out(
                ControlOut {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request: request.request.code(),
                    value: request.value,
                    index: request.index,
                    data,
                },
                self.config.timeout,
            )
            .wait()
            .map_err(|e| self.map_transfer_error(&request, e))?;

        Ok(data.len())
    }

    #[instrument(level = "trace", skip(self), fields(request = %request.request))]
    fn control_in(
        &self,
        request: ControlRequest,
        length: u16,
    ) -> Result<Vec<u8>, TransportError> {
        let interface = self.interface()?;
        let data = interface
            .control_in(
                ControlIn {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request: request.request.code(),
                    value: request.value,
                    index: request.index,
                    length,
                },
                self.config.timeout,
            )
            .wait()
            .map_err(|e| self.map_transfer_error(&request, e))?;

        debug!(bytes_read = data.len(), "Control IN complete");
        Ok(data)
    }

    fn dfu_interface(&self) -> &DfuInterface {
        &self.dfu
    }

    #[instrument(level = "info", skip(self))]
    fn reset_device(&mut self) -> Result<(), TransportError> {
        let handle = self.handle.take().ok_or(TransportError::Closed)?;
        let result = handle
            .device
            .reset()
            .wait()
            .map_err(|e| TransportError::ResetFailed(e.to_string()));
        drop(handle);

        match result {
            Ok(()) => info!("USB reset issued"),
            // Some platforms report an error because the device already left the bus.
            Err(ref e) => warn!(error = %e, "USB reset reported an error"),
        }

        // The old handle is gone either way; pick the device up again.
        self.reopen()
    }

    #[instrument(level = "info", skip(self))]
    fn reset_and_close(&mut self) -> Result<(), TransportError> {
        let handle = self.handle.take().ok_or(TransportError::Closed)?;
        let result = handle
            .device
            .reset()
            .wait()
            .map_err(|e| TransportError::ResetFailed(e.to_string()));
        drop(handle);
        debug!("Released DFU interface and device handle");
        if result.is_ok() {
            info!("USB reset issued");
        }
        result
    }

    #[instrument(level = "info", skip(self))]
    fn reopen(&mut self) -> Result<(), TransportError> {
        self.close();

        let device_info = self.wait_for_device()?;
        let (handle, dfu) = open_device_info(&device_info)?;

        self.vid = device_info.vendor_id();
        self.pid = device_info.product_id();
        self.dfu = dfu;
        self.handle = Some(handle);

        info!(
            vendor_id = %format!("{:04X}", self.vid),
            product_id = %format!("{:04X}", self.pid),
            interface = self.dfu.number,
            dfu_mode = self.dfu.is_dfu_mode(),
            "Device reopened"
        );
        Ok(())
    }

    fn close(&mut self) {
        if self.handle.take().is_some() {
            debug!("Released DFU interface and device handle");
        }
    }

    fn is_connected(&self) -> bool {
        // nusb has no cheap liveness check; an open handle is the best signal.
        self.handle.is_some()
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}

/// Find a device by VID/PID, falling back to a DFU-mode device from the same vendor.
///
/// Devices commonly re-enumerate with a different PID once they enter DFU mode.
fn find_device(vid: u16, pid: u16) -> Result<Option<DeviceInfo>, TransportError> {
    let devices: Vec<DeviceInfo> = list_devices()
        .wait()
        .map_err(|e| TransportError::OpenFailed(e.to_string()))?
        .collect();

    if let Some(exact) = devices
        .iter()
        .find(|d| d.vendor_id() == vid && d.product_id() == pid)
    {
        return Ok(Some(exact.clone()));
    }

    Ok(devices.into_iter().find(|d| {
        d.vendor_id() == vid
            && d.interfaces().any(|i| {
                i.class() == USB_CLASS_APPLICATION_SPECIFIC
                    && i.subclass() == USB_SUBCLASS_DFU
                    && i.protocol() == DFU_PROTOCOL_DFU_MODE
            })
    }))
}

fn open_device_info(device_info: &DeviceInfo) -> Result<(Handle, DfuInterface), TransportError> {
    let vid = device_info.vendor_id();
    let pid = device_info.product_id();

    info!(
        vendor_id = %format!("{:04X}", vid),
        product_id = %format!("{:04X}", pid),
        product = device_info.product_string().unwrap_or("Unknown Device"),
        serial = device_info.serial_number().unwrap_or(""),
        "Found device"
    );

    let device = device_info
        .open()
        .wait()
        .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

    select_configuration(&device)?;
    let dfu = locate_dfu_interface(&device, vid, pid)?;

    let interface = device
        .detach_and_claim_interface(dfu.number)
        .wait()
        .map_err(|e| TransportError::ClaimInterfaceFailed {
            interface: dfu.number,
            message: e.to_string(),
        })?;

    if dfu.alt_setting != 0 {
        interface
            .set_alt_setting(dfu.alt_setting)
            .wait()
            .map_err(|e| TransportError::ClaimInterfaceFailed {
                interface: dfu.number,
                message: e.to_string(),
            })?;
    }

    let desc = &dfu.descriptor;
    info!(
        attributes = %format!("0x{:02X}", desc.attributes),
        can_download = desc.can_download(),
        can_upload = desc.can_upload(),
        manifestation_tolerant = desc.manifestation_tolerant(),
        will_detach = desc.will_detach(),
        reserved = %format!("0x{:02X}", desc.reserved_attributes()),
        detach_timeout = desc.detach_timeout,
        transfer_size = desc.transfer_size,
        "DFU descriptor"
    );

    Ok((Handle { interface, device }, dfu))
}

/// Keep the active configuration, or select the first one if the device is unconfigured.
fn select_configuration(device: &Device) -> Result<(), TransportError> {
    if device.active_configuration().is_ok() {
        return Ok(());
    }

    let value = device
        .configurations()
        .next()
        .map(|c| c.configuration_value())
        .ok_or_else(|| TransportError::ConfigurationFailed("no configurations".into()))?;

    debug!(configuration = value, "Selecting configuration");
    device
        .set_configuration(value)
        .wait()
        .map_err(|e| TransportError::ConfigurationFailed(e.to_string()))
}

fn locate_dfu_interface(
    device: &Device,
    vid: u16,
    pid: u16,
) -> Result<DfuInterface, TransportError> {
    let config = device
        .active_configuration()
        .map_err(|e| TransportError::ConfigurationFailed(e.to_string()))?;

    for iface in config.interfaces() {
        for alt in iface.alt_settings() {
            if alt.class() != USB_CLASS_APPLICATION_SPECIFIC || alt.subclass() != USB_SUBCLASS_DFU {
                continue;
            }

            let number = alt.interface_number();
            let descriptor = alt
                .descriptors()
                .find(|d| d.descriptor_type() == DFU_FUNCTIONAL_DESCRIPTOR_TYPE)
                .ok_or(TransportError::DescriptorNotFound { interface: number })?;

            let raw: &[u8] = &descriptor;
            let descriptor = DfuDescriptor::from_bytes(raw)
                .map_err(|e| TransportError::MalformedResponse(e.to_string()))?;

            return Ok(DfuInterface {
                number,
                alt_setting: alt.alternate_setting(),
                protocol: alt.protocol(),
                descriptor,
            });
        }
    }

    Err(TransportError::InterfaceNotFound { vid, pid })
}
