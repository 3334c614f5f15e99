use std::fmt::{Debug, Write};
use std::{borrow::Cow, panic::Location};

use serde::{ser::SerializeStruct, Deserialize, Serialize};
use strum_macros::IntoStaticStr;

/// The declarative array or controller description is malformed or refers to
/// something that does not exist.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigError {
    #[error("Failed to load configuration from '{path}'")]
    LoadConfiguration { path: String },

    #[error("Failed to parse disk array configuration")]
    ParseDiskArrayConfiguration,

    #[error("Failed to parse controller configuration")]
    ParseControllerConfiguration,

    #[error("{entity} name '{name}' is invalid: {reason}")]
    InvalidName {
        entity: String,
        name: String,
        reason: String,
    },

    #[error("Enclosure '{enclosure}' is defined more than once")]
    DuplicateEnclosure { enclosure: String },

    #[error("Expander '{expander}' is defined more than once in enclosure '{enclosure}'")]
    DuplicateExpander { enclosure: String, expander: String },

    #[error("Expander '{expander}' must have at least one phy")]
    ZeroPhyCount { expander: String },

    #[error("Expander '{expander}' defines port '{port}' more than once")]
    DuplicatePort { expander: String, port: String },

    #[error("Range [{phy}, {phy}+{number}) of '{owner}' on expander '{expander}' does not fit in {phy_count} phy(s)")]
    PhyRangeOutOfBounds {
        owner: String,
        expander: String,
        phy: u32,
        number: u32,
        phy_count: u32,
    },

    #[error("Range starting at phy {phy} of '{owner}' on expander '{expander}' is empty")]
    EmptyPhyRange {
        owner: String,
        expander: String,
        phy: u32,
    },

    #[error("Expander '{expander}' in enclosure '{enclosure}' has invalid side {side}, must be 0 or 1")]
    InvalidSide {
        enclosure: String,
        expander: String,
        side: u8,
    },

    #[error("Expanders '{expander}' and '{other}' in enclosure '{enclosure}' both claim side {side}")]
    DuplicateSide {
        enclosure: String,
        expander: String,
        other: String,
        side: u8,
    },

    #[error("Drive template for slot {slot} in enclosure '{enclosure}' needs an expander on side {side}, but only {found} sibling expander(s) are defined")]
    MissingSiblingExpander {
        enclosure: String,
        slot: u32,
        side: u8,
        found: usize,
    },

    #[error("Drive template for slot {slot} in enclosure '{enclosure}' must repeat at least once")]
    EmptyDriveTemplate { enclosure: String, slot: u32 },

    #[error("Drive template for slot {slot_number} in enclosure '{enclosure}' runs past the last slot number at instance {index}")]
    SlotOverflow {
        enclosure: String,
        slot_number: u32,
        index: u32,
    },

    #[error("Address block of drive slot {slot} in enclosure '{enclosure}' overflows from base {address_base:#x}")]
    AddressOverflow {
        enclosure: String,
        slot: u32,
        address_base: u64,
    },

    #[error("Expander '{expander}' declares SES but its address 0 leaves no room for the SES address")]
    SesAddressUnderflow { expander: String },

    #[error("Expander '{expander}' declares SES but {phy_count} phys leave no index for the SES phy")]
    SesPhyOverflow { expander: String, phy_count: u32 },

    #[error("SCSI ids of expander '{expander}' on controller '{controller}' overflow: {phy_count} phys starting at {start_scsi_id}")]
    ScsiIdOverflow {
        controller: String,
        expander: String,
        start_scsi_id: u32,
        phy_count: u32,
    },

    #[error("Drive phy {phy} has no entry in the phy map of expander '{expander}' ({map_len} entries)")]
    PhyMapMiss {
        expander: String,
        phy: u32,
        map_len: usize,
    },

    #[error("Pattern '{pattern}' for field '{field}' has no placeholder, exactly one '{{}}' is required")]
    PatternMissingPlaceholder { field: String, pattern: String },

    #[error("Pattern '{pattern}' for field '{field}' has {count} placeholders, exactly one '{{}}' is required")]
    PatternMultiplePlaceholders {
        field: String,
        pattern: String,
        count: usize,
    },

    #[error("{referrer} references non-existent enclosure '{enclosure}'")]
    UndefinedEnclosure { referrer: String, enclosure: String },

    #[error("{referrer} references non-existent expander '{expander}' in enclosure '{enclosure}'")]
    UndefinedExpander {
        referrer: String,
        enclosure: String,
        expander: String,
    },

    #[error("{referrer} references non-existent port '{port}' on expander '{expander}'")]
    UndefinedPort {
        referrer: String,
        expander: String,
        port: String,
    },

    #[error("Connection {connection} joins '{left}' ({left_number} phys) and '{right}' ({right_number} phys), but both ends must have the same width")]
    ConnectionWidthMismatch {
        connection: usize,
        left: String,
        left_number: u32,
        right: String,
        right_number: u32,
    },

    #[error("Connection {connection} loops expander '{expander}' back onto its own phy {phy}")]
    LoopbackConnection {
        connection: usize,
        expander: String,
        phy: u32,
    },
}

/// Two entities claim the same phy, address or SCSI id.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictError {
    #[error("Phy {phy} on '{device}' is already occupied: [{phy_start}, {phy_start}+{num}) to '{existing}' overlaps [{new_start}, {new_start}+{new_num}) to '{new}'")]
    PhyOccupied {
        device: String,
        phy: u32,
        phy_start: u32,
        num: u32,
        existing: String,
        new_start: u32,
        new_num: u32,
        new: String,
    },

    #[error("Address {address:#x} is assigned to both '{owner}' and '{other}'")]
    DuplicateAddress {
        address: u64,
        owner: String,
        other: String,
    },

    #[error("SCSI id {scsi_id} on controller '{controller}' is assigned to both '{owner}' and '{other}'")]
    DuplicateScsiId {
        controller: String,
        scsi_id: u32,
        owner: String,
        other: String,
    },

    #[error("Connections {connection} and {other} both wire phy {phy} of '{expander}' to '{peer}'")]
    DuplicateConnection {
        expander: String,
        phy: u32,
        peer: String,
        connection: usize,
        other: usize,
    },
}

/// A lookup performed while applying per-controller input came up empty.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum NotFoundError {
    #[error("Expander '{expander}' referenced by {referrer} of controller '{controller}' is not reachable from any controller port")]
    Expander {
        controller: String,
        referrer: String,
        expander: String,
    },

    #[error("No drive is installed in slot {slot} of enclosure '{enclosure}'")]
    Drive { enclosure: String, slot: u32 },
}

#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum OutputError {
    #[error("Failed to serialize resolved topology of controller '{controller}'")]
    SerializeTopology { controller: String },

    #[error("Failed to write resolved topology to '{path}'")]
    WriteTopology { path: String },
}

#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InternalError {
    #[error("Internal error: {0}")]
    Internal(&'static str),
}

/// Each variant of `ErrorKind` corresponds to a different category of error.
/// Every category is fatal to the resolution pass that raised it.
#[derive(Debug, Eq, thiserror::Error, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    /// The static input is malformed or references something undefined.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Two entities claim the same phy, address or SCSI id.
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// A per-controller override points at something that was not resolved.
    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    /// The resolved record could not be written.
    #[error(transparent)]
    Output(#[from] OutputError),

    /// A bug was encountered.
    #[error(transparent)]
    Internal(#[from] InternalError),
}

#[derive(Debug)]
struct TopologyErrorInner {
    kind: ErrorKind,
    location: &'static Location<'static>,
    source: Option<anyhow::Error>,
    context: Vec<(Cow<'static, str>, &'static Location<'static>)>,
}

pub struct TopologyError(Box<TopologyErrorInner>);
impl TopologyError {
    #[track_caller]
    pub fn new(kind: impl Into<ErrorKind>) -> Self {
        TopologyError(Box::new(TopologyErrorInner {
            kind: kind.into(),
            location: Location::caller(),
            source: None,
            context: Vec::new(),
        }))
    }

    /// Returns a reference to the inner ErrorKind.
    pub fn kind(&self) -> &ErrorKind {
        &self.0.kind
    }
}

pub trait ReportError<T, K> {
    /// Convert this error into a structured TopologyError.
    fn structured(self, kind: K) -> Result<T, TopologyError>;
}

impl<T, K> ReportError<T, K> for Option<T>
where
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, TopologyError> {
        match self {
            Some(t) => Ok(t),
            None => Err(TopologyError(Box::new(TopologyErrorInner {
                kind: kind.into(),
                location: Location::caller(),
                source: None,
                context: Vec::new(),
            }))),
        }
    }
}

impl<T, E, K> ReportError<T, K> for Result<T, E>
where
    E: Into<anyhow::Error>,
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, TopologyError> {
        match self {
            Ok(o) => Ok(o),
            Err(e) => Err(TopologyError(Box::new(TopologyErrorInner {
                kind: kind.into(),
                location: Location::caller(),
                source: Some(e.into()),
                context: Vec::new(),
            }))),
        }
    }
}

pub trait TopologyResultExt<T> {
    /// Attach a context message to the error.
    fn message(self, context: impl Into<Cow<'static, str>>) -> Result<T, TopologyError>;
}
impl<T> TopologyResultExt<T> for Result<T, TopologyError> {
    #[track_caller]
    fn message(mut self, context: impl Into<Cow<'static, str>>) -> Result<T, TopologyError> {
        if let Err(ref mut e) = self {
            e.0.context.push((context.into(), Location::caller()));
        }
        self
    }
}

impl Serialize for TopologyError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("topology-error", 5)?;
        state.serialize_field("message", &self.0.kind.to_string())?;
        match self.0.kind {
            ErrorKind::Config(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Conflict(ref e) => state.serialize_field("error", e)?,
            ErrorKind::NotFound(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Output(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Internal(ref e) => state.serialize_field("error", e)?,
        }
        state.serialize_field("category", <&str>::from(&self.0.kind))?;
        state.serialize_field(
            "location",
            &format!("{}:{}", self.0.location.file(), self.0.location.line()),
        )?;
        match self.0.source {
            Some(ref e) => state.serialize_field("cause", &Some(format!("{:?}", e)))?,
            None => state.serialize_field("cause", &None::<String>)?,
        }
        state.end()
    }
}

impl Debug for TopologyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at {}:{}",
            self.0.kind,
            self.0.location.file(),
            self.0.location.line()
        )?;

        if !self.0.context.is_empty() {
            writeln!(f, "\n\nContext:")?;
            for (i, (context, location)) in self.0.context.iter().enumerate() {
                for (j, line) in context.split('\n').enumerate() {
                    if j == 0 {
                        write!(f, "{: >5}: ", i)?;
                    } else {
                        f.write_str("\n       ")?;
                    }
                    f.write_str(line)?;
                }
                writeln!(f, " at {}:{}", location.file(), location.line())?;
            }
        }

        if let Some(ref source) = self.0.source {
            writeln!(f, "\n\nCaused by:")?;
            let mut index = 0;
            let mut source: Option<&dyn std::error::Error> = Some(source.as_ref());
            while let Some(e) = source {
                for (i, line) in e.to_string().split('\n').enumerate() {
                    if i == 0 {
                        write!(f, "{: >5}: ", index)?;
                    } else {
                        f.write_str("\n       ")?;
                    }
                    f.write_str(line)?;
                }
                f.write_char('\n')?;
                source = e.source();
                index += 1;
            }
        }
        Ok(())
    }
}
