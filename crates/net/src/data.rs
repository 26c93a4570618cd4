//! Composite data types shared by several messages.

use crate::codec::{wire_enum, Decode, Encode, Reader, Writer};
use crate::error::{DecodeError, DecodeErrorKind, EncodeError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Game version exchanged during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Major component.
    pub major: u8,
    /// Minor component.
    pub minor: u8,
    /// Patch component.
    pub patch: u8,
    /// Build number.
    pub build: u16,
}

impl Version {
    /// Construct a version.
    pub const fn new(major: u8, minor: u8, patch: u8, build: u16) -> Self {
        Self {
            major,
            minor,
            patch,
            build,
        }
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::new(1, 1, 110, 0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{} (build {})",
            self.major, self.minor, self.patch, self.build
        )
    }
}

impl Decode for Version {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            major: r.read_u8()?,
            minor: r.read_u8()?,
            patch: r.read_u8()?,
            build: r.read_u16()?,
        })
    }
}

impl Encode for Version {
    fn encode(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.write_u8(self.major);
        w.write_u8(self.minor);
        w.write_u8(self.patch);
        w.write_u16(self.build);
        Ok(())
    }
}

/// Three-part mod version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModVersion {
    /// Major component.
    pub major: u16,
    /// Minor component.
    pub minor: u16,
    /// Sub component.
    pub sub: u16,
}

impl Decode for ModVersion {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            major: r.read_so_u16()?,
            minor: r.read_so_u16()?,
            sub: r.read_so_u16()?,
        })
    }
}

impl Encode for ModVersion {
    fn encode(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.write_so_u16(self.major);
        w.write_so_u16(self.minor);
        w.write_so_u16(self.sub);
        Ok(())
    }
}

/// Identity of one active mod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModId {
    /// Internal mod name.
    pub name: String,
    /// Installed version.
    pub version: ModVersion,
    /// Checksum of the mod contents.
    pub crc: u32,
}

impl Decode for ModId {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            name: r.read_string()?,
            version: ModVersion::decode(r)?,
            crc: r.read_u32()?,
        })
    }
}

impl Encode for ModId {
    fn encode(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.write_str(&self.name)?;
        self.version.encode(w)?;
        w.write_u32(self.crc);
        Ok(())
    }
}

/// Read a string preceded by an "is empty" flag.
pub fn read_immutable_string(r: &mut Reader<'_>) -> Result<String, DecodeError> {
    if r.read_bool()? {
        Ok(String::new())
    } else {
        r.read_string()
    }
}

/// Write a string preceded by an "is empty" flag.
pub fn write_immutable_string(w: &mut Writer, s: &str) -> Result<(), EncodeError> {
    w.write_bool(s.is_empty());
    if s.is_empty() {
        Ok(())
    } else {
        w.write_str(s)
    }
}

/// Dynamically typed settings tree, used for startup mod settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyTree {
    /// Opaque flag carried alongside every node.
    pub any_type: bool,
    /// Node contents.
    pub value: PropertyValue,
}

/// Value of one [`PropertyTree`] node.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum PropertyValue {
    /// No value.
    #[default]
    None,
    /// Boolean.
    Bool(bool),
    /// Double precision number.
    Number(f64),
    /// String.
    String(String),
    /// Ordered list of keyed children; keys are usually empty.
    List(Vec<(String, PropertyTree)>),
    /// Ordered keyed children.
    Dictionary(Vec<(String, PropertyTree)>),
}

impl PropertyTree {
    /// Tree node with `any_type` cleared.
    pub fn new(value: PropertyValue) -> Self {
        Self {
            any_type: false,
            value,
        }
    }

    /// Empty dictionary, the usual "no settings" value.
    pub fn empty_dictionary() -> Self {
        Self::new(PropertyValue::Dictionary(Vec::new()))
    }

    fn kind(&self) -> u8 {
        match self.value {
            PropertyValue::None => 0,
            PropertyValue::Bool(_) => 1,
            PropertyValue::Number(_) => 2,
            PropertyValue::String(_) => 3,
            PropertyValue::List(_) => 4,
            PropertyValue::Dictionary(_) => 5,
        }
    }
}

fn read_property_children(
    r: &mut Reader<'_>,
) -> Result<Vec<(String, PropertyTree)>, DecodeError> {
    let count = r.read_u32()? as usize;
    r.read_n(count, |r| Ok((read_immutable_string(r)?, PropertyTree::decode(r)?)))
}

fn write_property_children(
    w: &mut Writer,
    children: &[(String, PropertyTree)],
) -> Result<(), EncodeError> {
    let count = u32::try_from(children.len())
        .map_err(|_| EncodeError::ValueOutOfRange("property tree child count"))?;
    w.write_u32(count);
    for (key, child) in children {
        write_immutable_string(w, key)?;
        child.encode(w)?;
    }
    Ok(())
}

impl Decode for PropertyTree {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let offset = r.position();
        let kind = r.read_u8()?;
        let any_type = r.read_bool()?;
        let value = match kind {
            0 => PropertyValue::None,
            1 => PropertyValue::Bool(r.read_bool()?),
            2 => PropertyValue::Number(r.read_f64()?),
            3 => PropertyValue::String(read_immutable_string(r)?),
            4 => PropertyValue::List(read_property_children(r)?),
            5 => PropertyValue::Dictionary(read_property_children(r)?),
            other => {
                return Err(DecodeError::new(
                    offset,
                    DecodeErrorKind::InvalidEnumValue {
                        name: "PropertyTreeType",
                        value: u32::from(other),
                    },
                ))
            }
        };
        Ok(Self { any_type, value })
    }
}

impl Encode for PropertyTree {
    fn encode(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.write_u8(self.kind());
        w.write_bool(self.any_type);
        match &self.value {
            PropertyValue::None => Ok(()),
            PropertyValue::Bool(v) => {
                w.write_bool(*v);
                Ok(())
            }
            PropertyValue::Number(v) => {
                w.write_f64(*v);
                Ok(())
            }
            PropertyValue::String(s) => write_immutable_string(w, s),
            PropertyValue::List(children) | PropertyValue::Dictionary(children) => {
                write_property_children(w, children)
            }
        }
    }
}

wire_enum! {
    /// One of the eight compass directions, or none.
    pub enum Direction {
        /// North.
        North = 0,
        /// North-east.
        NorthEast = 1,
        /// East.
        East = 2,
        /// South-east.
        SouthEast = 3,
        /// South.
        South = 4,
        /// South-west.
        SouthWest = 5,
        /// West.
        West = 6,
        /// North-west.
        NorthWest = 7,
        /// No direction.
        None = 8,
    }
}

/// Walking direction with an optional target direction packed in the high nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedDirection {
    /// Current direction.
    pub direction: Direction,
    /// Target direction, [`Direction::None`] when absent.
    pub target: Direction,
}

impl PackedDirection {
    /// Direction without a target.
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            target: Direction::None,
        }
    }
}

impl Decode for PackedDirection {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let offset = r.position();
        let raw = r.read_u8()?;
        let invalid = || {
            DecodeError::new(
                offset,
                DecodeErrorKind::InvalidEnumValue {
                    name: "Direction",
                    value: u32::from(raw),
                },
            )
        };
        let direction = Direction::try_from(raw & 0x0f).map_err(|_| invalid())?;
        let target = match raw >> 4 {
            0 => Direction::None,
            // The None target is never packed, it is signalled by a zero nibble.
            high => match Direction::try_from(high - 1) {
                Ok(Direction::None) | Err(_) => return Err(invalid()),
                Ok(target) => target,
            },
        };
        Ok(Self { direction, target })
    }
}

impl Encode for PackedDirection {
    fn encode(&self, w: &mut Writer) -> Result<(), EncodeError> {
        let mut raw = self.direction as u8;
        if self.target != Direction::None {
            raw |= (self.target as u8 + 1) << 4;
        }
        w.write_u8(raw);
        Ok(())
    }
}

/// Map position in fixed-point units of 1/256 tile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MapPosition {
    /// Raw x coordinate.
    pub x: i32,
    /// Raw y coordinate.
    pub y: i32,
}

impl MapPosition {
    /// Fixed-point units per tile.
    pub const UNITS_PER_TILE: f64 = 256.0;

    /// Position from tile coordinates, truncated to the fixed-point grid.
    pub fn from_tiles(x: f64, y: f64) -> Self {
        Self {
            x: (x * Self::UNITS_PER_TILE) as i32,
            y: (y * Self::UNITS_PER_TILE) as i32,
        }
    }

    /// Coordinates in tiles.
    pub fn tiles(&self) -> (f64, f64) {
        (
            f64::from(self.x) / Self::UNITS_PER_TILE,
            f64::from(self.y) / Self::UNITS_PER_TILE,
        )
    }
}

impl Decode for MapPosition {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            x: r.read_i32()?,
            y: r.read_i32()?,
        })
    }
}

impl Encode for MapPosition {
    fn encode(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.write_i32(self.x);
        w.write_i32(self.y);
        Ok(())
    }
}

/// Progress value packed into one byte; `0xFF` means unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SmallProgress(pub u8);

impl SmallProgress {
    /// Wire value for "no progress known".
    pub const UNKNOWN: Self = Self(0xFF);
    /// Number of steps between 0 and 1.
    pub const STEPS: f64 = 254.0;

    /// Pack an optional fraction; values are clamped to `0.0..=1.0`.
    pub fn from_fraction(fraction: Option<f64>) -> Self {
        match fraction {
            None => Self::UNKNOWN,
            Some(p) if p.is_nan() => Self(0),
            Some(p) => Self((p.clamp(0.0, 1.0) * Self::STEPS).floor() as u8),
        }
    }

    /// Unpack to a fraction, `None` when unknown.
    pub fn fraction(self) -> Option<f64> {
        if self == Self::UNKNOWN {
            None
        } else {
            Some(f64::from(self.0) / Self::STEPS)
        }
    }
}

impl Default for SmallProgress {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

impl Decode for SmallProgress {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self(r.read_u8()?))
    }
}

impl Encode for SmallProgress {
    fn encode(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.write_u8(self.0);
        Ok(())
    }
}

wire_enum! {
    /// Why a peer left the game.
    pub enum DisconnectReason {
        /// Left voluntarily.
        Quit = 0,
        /// Connection dropped.
        Dropped = 1,
        /// Reconnecting.
        Reconnect = 2,
        /// Sent invalid input.
        WrongInput = 3,
        /// Desynchronized too often.
        DesyncLimitReached = 4,
        /// Could not keep up with the simulation.
        CantKeepUp = 5,
        /// Away from keyboard too long.
        AFK = 6,
        /// Kicked by an admin.
        Kicked = 7,
        /// Kicked and the character deleted.
        KickedAndDeleted = 8,
        /// Banned.
        Banned = 9,
        /// Moving to another server.
        SwitchingServers = 10,
    }
}

wire_enum! {
    /// Server's answer to a connection attempt.
    pub enum ConnectionRequestStatus {
        /// Accepted.
        Valid = 0,
        /// Active mods differ from the server's.
        ModsMismatch = 1,
        /// Core mod checksum differs.
        CoreModMismatch = 2,
        /// Startup mod settings differ.
        ModStartupSettingsMismatch = 3,
        /// Prototype list checksum differs.
        PrototypeChecksumMismatch = 4,
        /// Server is full.
        PlayerLimitReached = 5,
        /// A password is required.
        PasswordMissing = 6,
        /// The password is wrong.
        PasswordMismatch = 7,
        /// Account verification data missing.
        UserVerificationMissing = 8,
        /// Account verification timed out.
        UserVerificationTimeout = 9,
        /// Account verification failed.
        UserVerificationMismatch = 10,
        /// Banned on this server.
        UserBanned = 11,
        /// Banned by the authentication server.
        UserBannedByAuthServer = 12,
        /// This address already plays under another name.
        AddressUsedForDifferentPlayer = 13,
        /// The name is taken.
        UserWithThatNameAlreadyInGame = 14,
        /// Not on the whitelist.
        UserNotWhitelisted = 15,
    }
}

wire_enum! {
    /// Client-visible multiplayer state.
    pub enum ClientMultiplayerState {
        /// Idle, no session.
        Ready = 0,
        /// Handshake in progress.
        Connecting = 1,
        /// Accepted, waiting for the server to save the map.
        ConnectedWaitingForMap = 2,
        /// Downloading the map.
        ConnectedDownloadingMap = 3,
        /// Loading the downloaded map.
        ConnectedLoadingMap = 4,
        /// Replaying ticks to catch up.
        TryingToCatchUp = 5,
        /// Waiting for permission to send tick closures.
        WaitingForCommandToStartSendingTickClosures = 6,
        /// Playing.
        InGame = 7,
        /// Disconnect requested.
        DisconnectScheduled = 8,
        /// Waiting for the server to confirm the disconnect.
        WaitingForDisconnectConfirmation = 9,
        /// Server left.
        WaitingForUserToSaveOrQuitAfterServerLeft = 10,
        /// Session ended.
        Disconnected = 11,
        /// Session failed.
        Failed = 12,
        /// Could not initialize.
        InitializationFailed = 13,
        /// Desynced, waiting for a fresh map.
        DesyncedWaitingForMap = 14,
        /// Desynced, catching up with a map ready to download.
        DesyncedCatchingUpWithMapReadyForDownload = 15,
        /// Desynced, saving the local map for a report.
        DesyncedSavingLocalVariantOfMap = 16,
        /// Desynced, downloading the server's map.
        DesyncedDownloadingMap = 17,
        /// Desynced, writing a report.
        DesyncedCreatingReport = 18,
        /// Playing while the map is saved.
        InGameSavingMap = 19,
    }
}

impl Default for ClientMultiplayerState {
    fn default() -> Self {
        Self::Ready
    }
}
