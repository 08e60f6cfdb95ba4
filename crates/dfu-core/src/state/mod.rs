//! Session driver: mode transition and download loop.

pub mod context;
pub mod download;
pub mod machine;
pub mod mode;

pub use context::SessionContext;
pub use download::{DownloadReport, download_firmware};
pub use machine::{DownloadProgress, ModeOutcome, TransactionCounter};
pub use mode::enter_dfu_mode;
