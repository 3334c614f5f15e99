// Configuration constants

/// First SCSI id handed out on a controller. Ids below this are reserved for
/// the controller's own internal addressing.
pub const DEFAULT_SCSI_ID_BASE: u32 = 8;

/// Token substituted with the instance index in serial and file patterns.
pub const PATTERN_PLACEHOLDER: &str = "{}";

/// Width of the zero-padded hex index rendered into drive serials.
pub const SERIAL_INDEX_WIDTH: usize = 4;

/// Number of addresses reserved by each drive instance: base, port 0, port 1
/// and target.
pub const DRIVE_ADDRESS_STRIDE: u64 = 4;

/// Offset of the target address within a drive's address block.
pub const DRIVE_TARGET_ADDRESS_OFFSET: u64 = 3;

/// Number of ports on a dual-ported drive.
pub const DRIVE_PORT_COUNT: usize = 2;

/// Separator between the enclosure and expander halves of a fully-qualified
/// expander name.
pub const EXPANDER_ID_SEPARATOR: char = '/';

/// Suffix appended to an expander's fully-qualified name to name its
/// enclosure services sub-device.
pub const SES_DEVICE_SUFFIX: &str = "ses";
