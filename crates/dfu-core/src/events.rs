//! Event system for UI decoupling.
//!
//! Lets a CLI (or any other front end) follow a DFU session without
//! reaching into the driver.

use std::fmt;

use crate::protocol::{DeviceStatus, DfuRequest};

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Session phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DfuPhase {
    /// Opening the device and locating the DFU interface.
    Connecting,
    /// Moving the device from application mode into DFU mode.
    ModeTransition,
    /// Sending firmware blocks.
    Download,
    /// Zero-length DNLOAD sent, waiting on the final status.
    Manifest,
    Complete,
    Error,
}

impl fmt::Display for DfuPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DfuPhase::Connecting => write!(f, "Connecting"),
            DfuPhase::ModeTransition => write!(f, "Mode Transition"),
            DfuPhase::Download => write!(f, "Download"),
            DfuPhase::Manifest => write!(f, "Manifest"),
            DfuPhase::Complete => write!(f, "Complete"),
            DfuPhase::Error => write!(f, "Error"),
        }
    }
}

/// Events emitted by the DFU session.
#[derive(Debug, Clone)]
pub enum DfuEvent {
    DeviceConnected { vid: u16, pid: u16 },
    /// Handle re-acquired after detach or reset (PID may have changed).
    DeviceReopened { vid: u16, pid: u16 },
    PhaseChanged { from: DfuPhase, to: DfuPhase },
    /// A GETSTATUS response the driver acted on.
    StateObserved { status: DeviceStatus },
    /// Bytes acknowledged so far.
    Progress {
        sent: usize,
        total: usize,
        chunk: usize,
    },
    Log { level: LogLevel, message: String },
    Error { message: String },
    /// Control transfer sent/received.
    Packet {
        direction: PacketDirection,
        request: DfuRequest,
        length: usize,
        data: Option<Vec<u8>>,
    },
    Complete,
}

/// USB packet direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Host -> Device
    Rx, // Device -> Host
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Observer trait for receiving DFU events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait DfuObserver: Send + Sync {
    fn on_event(&self, event: &DfuEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl DfuObserver for NullObserver {
    fn on_event(&self, _event: &DfuEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl DfuObserver for TracingObserver {
    fn on_event(&self, event: &DfuEvent) {
        match event {
            DfuEvent::DeviceConnected { vid, pid } => {
                tracing::info!(
                    vid = %format!("{:04X}", vid),
                    pid = %format!("{:04X}", pid),
                    "Device connected"
                );
            }
            DfuEvent::DeviceReopened { vid, pid } => {
                tracing::info!(
                    vid = %format!("{:04X}", vid),
                    pid = %format!("{:04X}", pid),
                    "Device reopened"
                );
            }
            DfuEvent::PhaseChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Phase changed");
            }
            DfuEvent::StateObserved { status } => {
                tracing::info!(
                    poll_timeout = status.poll_timeout,
                    "{}",
                    status
                );
            }
            DfuEvent::Progress { sent, total, chunk } => {
                let pct = if *total > 0 { (*sent * 100) / *total } else { 100 };
                tracing::debug!(
                    sent = sent,
                    total = total,
                    chunk = chunk,
                    progress = %format!("{}%", pct),
                    "Progress"
                );
            }
            DfuEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
            DfuEvent::Error { message } => {
                tracing::error!("Error: {}", message);
            }
            DfuEvent::Packet {
                direction,
                request,
                length,
                ..
            } => {
                tracing::trace!(
                    dir = %direction,
                    request = %request,
                    len = length,
                    "USB Packet"
                );
            }
            DfuEvent::Complete => {
                tracing::info!("Operation complete");
            }
        }
    }
}
