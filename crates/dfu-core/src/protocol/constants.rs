//! Protocol constants from the USB DFU 1.1 class specification.

// ============================================================================
// Interface Identification
// ============================================================================

/// Application Specific interface class
pub const USB_CLASS_APPLICATION_SPECIFIC: u8 = 0xFE;

/// DFU interface subclass
pub const USB_SUBCLASS_DFU: u8 = 0x01;

/// Interface protocol while the device runs its application (runtime mode)
pub const DFU_PROTOCOL_RUNTIME: u8 = 0x01;

/// Interface protocol once the device has re-enumerated in DFU mode
pub const DFU_PROTOCOL_DFU_MODE: u8 = 0x02;

/// DFU functional descriptor type
pub const DFU_FUNCTIONAL_DESCRIPTOR_TYPE: u8 = 0x21;

/// Vendor/product id wildcard used in DFU suffixes
pub const ID_WILDCARD: u16 = 0xFFFF;

// ============================================================================
// Request Codes (bRequest)
// ============================================================================

pub const DFU_DETACH: u8 = 0;
pub const DFU_DNLOAD: u8 = 1;
pub const DFU_UPLOAD: u8 = 2;
pub const DFU_GETSTATUS: u8 = 3;
pub const DFU_CLRSTATUS: u8 = 4;
pub const DFU_GETSTATE: u8 = 5;
pub const DFU_ABORT: u8 = 6;

// ============================================================================
// bmRequestType values (class request, interface recipient)
// ============================================================================

/// Host -> Device | Class | Interface
pub const REQUEST_TYPE_OUT: u8 = 0x21;

/// Device -> Host | Class | Interface
pub const REQUEST_TYPE_IN: u8 = 0xA1;

// ============================================================================
// Functional Descriptor Attributes (bmAttributes)
// ============================================================================

pub const ATTR_CAN_DOWNLOAD: u8 = 1 << 0;
pub const ATTR_CAN_UPLOAD: u8 = 1 << 1;
pub const ATTR_MANIFESTATION_TOLERANT: u8 = 1 << 2;
pub const ATTR_WILL_DETACH: u8 = 1 << 3;

// ============================================================================
// Sizes and Timeouts
// ============================================================================

/// GETSTATUS response length
pub const STATUS_RESPONSE_LEN: u16 = 6;

/// GETSTATE response length
pub const STATE_RESPONSE_LEN: u16 = 1;

/// DFU 1.0 functional descriptor length (no bcdDFUVersion)
pub const DFU_DESCRIPTOR_LEN_1_0: usize = 7;

/// DFU 1.1 functional descriptor length
pub const DFU_DESCRIPTOR_LEN_1_1: usize = 9;

/// Assumed version for descriptors that predate bcdDFUVersion
pub const DFU_VERSION_1_0: u16 = 0x0100;

/// Default control transfer timeout
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Default time allowed for the device to come back after detach/reset
pub const DEFAULT_REOPEN_TIMEOUT_MS: u64 = 5000;

/// Device enumeration poll interval while waiting for re-enumeration
pub const REOPEN_POLL_INTERVAL_MS: u64 = 100;

/// DFU file suffix length (DFU 1.0 and 1.1)
pub const DFU_SUFFIX_LEN: usize = 16;

/// Suffix signature as stored in the file ('DFU' reversed)
pub const DFU_SUFFIX_SIGNATURE: &[u8; 3] = b"UFD";
