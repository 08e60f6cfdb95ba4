//! Application mode to DFU mode transition.
//!
//! A device left in dfuERROR or mid-transfer is brought back to dfuIDLE
//! first, so running the transition twice is harmless.

use tracing::{info, instrument, warn};

use super::context::SessionContext;
use super::machine::ModeOutcome;
use crate::error::DfuError;
use crate::events::{DfuEvent, DfuObserver, DfuPhase, LogLevel};
use crate::primitives::DfuTransport;
use crate::protocol::DfuState;
use crate::transport::UsbTransport;

/// Drive the device into dfuIDLE.
#[instrument(level = "info", skip(ctx))]
pub fn enter_dfu_mode<T: UsbTransport, O: DfuObserver>(
    ctx: &mut SessionContext<'_, T, O>,
) -> Result<ModeOutcome, DfuError> {
    let iface = ctx.dfu_interface();
    let descriptor = iface.descriptor;
    if !descriptor.can_download() {
        ctx.log(LogLevel::Error, "Device is not able to receive firmware through DFU");
        return Err(DfuError::Capability {
            attributes: descriptor.attributes,
        });
    }

    ctx.goto_phase(DfuPhase::ModeTransition);
    let index = iface.number;

    let mut status = ctx
        .query_status()
        .map_err(DfuError::transport("DFU_GETSTATUS"))?;

    if status.state == DfuState::DfuError {
        let state = status.state;
        info!(status = status.status.name(), "Device is in error mode, clearing");
        ctx.transport
            .clear_status(index)
            .map_err(DfuError::recovery(state, "DFU_CLRSTATUS"))?;
        ctx.transport
            .abort(index)
            .map_err(DfuError::recovery(state, "DFU_ABORT"))?;
        status = ctx
            .query_status()
            .map_err(DfuError::recovery(state, "DFU_GETSTATUS"))?;
    }

    if status.state.is_stale_transfer() {
        let state = status.state;
        info!(state = %state, "Aborting incomplete transfer");
        ctx.transport
            .abort(index)
            .map_err(DfuError::recovery(state, "DFU_ABORT"))?;
        status = ctx
            .query_status()
            .map_err(DfuError::recovery(state, "DFU_GETSTATUS"))?;
    }

    if status.state == DfuState::DfuIdle {
        info!("Device is already in DFU mode");
        return Ok(ModeOutcome::AlreadyInDfuMode);
    }

    if status.state != DfuState::AppIdle {
        warn!(state = %status.state, "Device is not idle, unable to detach");
        return Err(DfuError::UnexpectedState {
            state: status.state,
            status: status.status,
        });
    }

    info!(
        detach_timeout = descriptor.detach_timeout,
        "Transitioning from appIDLE into dfuIDLE"
    );
    ctx.transport
        .detach(index, descriptor.detach_timeout)
        .map_err(DfuError::transport("DFU_DETACH"))?;

    if !descriptor.will_detach() {
        info!("Device does not detach itself, issuing USB reset");
        ctx.transport
            .reset_device()
            .map_err(DfuError::transport("USB reset"))?;
    }

    let status = ctx
        .query_status()
        .map_err(DfuError::transport("DFU_GETSTATUS"))?;
    if status.state != DfuState::DfuIdle {
        warn!(state = %status.state, "Device is not in DFU mode");
        return Err(DfuError::ModeTransitionFailed {
            state: status.state,
            status: status.status,
        });
    }

    ctx.transport
        .reopen()
        .map_err(DfuError::transport("reopen"))?;
    ctx.emit(DfuEvent::DeviceReopened {
        vid: ctx.transport.vendor_id(),
        pid: ctx.transport.product_id(),
    });

    Ok(ModeOutcome::Detached)
}
