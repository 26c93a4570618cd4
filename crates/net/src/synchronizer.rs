//! Synchronizer actions: lifecycle and pacing control messages.
//!
//! Actions travel inside heartbeats. Actions sent by the server carry a
//! trailing peer id naming the peer they concern; the wire gives no hint of
//! this, so the caller passes the direction explicitly.

use crate::codec::{wire_enum, Decode, Encode, Reader, Writer};
use crate::data::{ClientMultiplayerState, DisconnectReason, SmallProgress};
use crate::error::{DecodeError, DecodeErrorKind, EncodeError};

wire_enum! {
    /// Synchronizer action tags.
    pub enum SynchronizerActionType {
        /// Game over.
        GameEnd = 0,
        /// A peer left.
        PeerDisconnect = 1,
        /// A peer joined.
        NewPeerInfo = 2,
        /// A peer changed state.
        ClientChangedState = 3,
        /// A peer may start sending tick closures.
        ClientShouldStartSendingTickClosures = 4,
        /// A map save is ready to download.
        MapReadyForDownload = 5,
        /// Map loading progress.
        MapLoadingProgressUpdate = 6,
        /// Map saving progress.
        MapSavingProgressUpdate = 7,
        /// Server is saving for a joining peer.
        SavingForUpdate = 8,
        /// Map download progress.
        MapDownloadingProgressUpdate = 9,
        /// Catch-up progress.
        CatchingUpProgressUpdate = 10,
        /// Drop progress of a stalled peer.
        PeerDroppingProgressUpdate = 11,
        /// A peer desynchronized.
        PlayerDesynced = 12,
        /// Game paused.
        BeginPause = 13,
        /// Game resumed.
        EndPause = 14,
        /// Not used by this protocol revision.
        SkippedTickClosure = 15,
        /// Not used by this protocol revision.
        SkippedTickClosureConfirm = 16,
        /// Server changed the latency window.
        ChangeLatency = 17,
        /// Client acknowledges a latency increase.
        IncreasedLatencyConfirm = 18,
        /// Countdown until a save finishes.
        SavingCountDown = 19,
    }
}

/// Which side wrote the action; server-written actions carry a peer id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Written by a client.
    Client,
    /// Written by the server.
    Server,
}

/// Script event registrations of one mod.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptRegistration {
    /// Registered standard event ids.
    pub standard_events: Vec<u32>,
    /// Registered nth-tick periods.
    pub nth_tick_events: Vec<u32>,
    /// Event filters as (event, filter) pairs.
    pub standard_event_filters: Vec<(u32, u32)>,
    /// Has an `on_init` handler.
    pub on_init: bool,
    /// Has an `on_load` handler.
    pub on_load: bool,
    /// Has an `on_configuration_changed` handler.
    pub on_configuration_changed: bool,
}

impl Decode for ScriptRegistration {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            standard_events: r.read_vec(u32::decode)?,
            nth_tick_events: r.read_vec(u32::decode)?,
            standard_event_filters: r.read_vec(|r| Ok((r.read_u32()?, r.read_u32()?)))?,
            on_init: r.read_bool()?,
            on_load: r.read_bool()?,
            on_configuration_changed: r.read_bool()?,
        })
    }
}

impl Encode for ScriptRegistration {
    fn encode(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.write_vec(&self.standard_events, |w, v| v.encode(w))?;
        w.write_vec(&self.nth_tick_events, |w, v| v.encode(w))?;
        w.write_vec(&self.standard_event_filters, |w, (event, filter)| {
            w.write_u32(*event);
            w.write_u32(*filter);
            Ok(())
        })?;
        w.write_bool(self.on_init);
        w.write_bool(self.on_load);
        w.write_bool(self.on_configuration_changed);
        Ok(())
    }
}

/// Body of `MapReadyForDownload`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapReadyForDownloadData {
    /// Map size in bytes.
    pub size: u32,
    /// Auxiliary data size in bytes.
    pub auxiliary_size: u32,
    /// Map checksum.
    pub crc: u32,
    /// Tick the save was taken at.
    pub update_tick: u32,
    /// Autosave interval in ticks.
    pub autosave_interval: u32,
    /// Number of autosave slots.
    pub autosave_slots: u32,
    /// Autosaves only happen on the server.
    pub autosave_only_on_server: bool,
    /// Saves do not block the game.
    pub non_blocking_saving: bool,
    /// Script checksum per mod.
    pub script_checksums: Vec<(String, u32)>,
    /// Script event registrations per mod.
    pub script_events: Vec<(String, ScriptRegistration)>,
    /// Console commands registered per mod.
    pub script_commands: Vec<(String, Vec<String>)>,
}

impl Decode for MapReadyForDownloadData {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            size: r.read_u32()?,
            auxiliary_size: r.read_u32()?,
            crc: r.read_u32()?,
            update_tick: r.read_u32()?,
            autosave_interval: r.read_u32()?,
            autosave_slots: r.read_u32()?,
            autosave_only_on_server: r.read_bool()?,
            non_blocking_saving: r.read_bool()?,
            script_checksums: r.read_map(String::decode, u32::decode)?,
            script_events: r.read_map(String::decode, ScriptRegistration::decode)?,
            script_commands: r.read_map(String::decode, |r| r.read_vec(String::decode))?,
        })
    }
}

impl Encode for MapReadyForDownloadData {
    fn encode(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.write_u32(self.size);
        w.write_u32(self.auxiliary_size);
        w.write_u32(self.crc);
        w.write_u32(self.update_tick);
        w.write_u32(self.autosave_interval);
        w.write_u32(self.autosave_slots);
        w.write_bool(self.autosave_only_on_server);
        w.write_bool(self.non_blocking_saving);
        w.write_map(&self.script_checksums, |w, k| w.write_str(k), |w, v| v.encode(w))?;
        w.write_map(&self.script_events, |w, k| w.write_str(k), |w, v| v.encode(w))?;
        w.write_map(
            &self.script_commands,
            |w, k| w.write_str(k),
            |w, v| w.write_vec(v, |w, s| w.write_str(s)),
        )
    }
}

/// Variant body of a synchronizer action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynchronizerActionData {
    /// Game over.
    GameEnd,
    /// A peer left.
    PeerDisconnect {
        /// Why it left.
        reason: DisconnectReason,
    },
    /// A peer joined.
    NewPeerInfo {
        /// Its player name.
        username: String,
    },
    /// A peer changed state.
    ClientChangedState {
        /// The new state.
        state: ClientMultiplayerState,
    },
    /// A peer may start sending tick closures.
    ClientShouldStartSendingTickClosures {
        /// First tick the peer should send a closure for.
        first_tick: u32,
    },
    /// A map save is ready to download.
    MapReadyForDownload(MapReadyForDownloadData),
    /// Map loading progress.
    MapLoadingProgressUpdate(SmallProgress),
    /// Map saving progress.
    MapSavingProgressUpdate(SmallProgress),
    /// Server is saving for a joining peer.
    SavingForUpdate,
    /// Map download progress.
    MapDownloadingProgressUpdate(SmallProgress),
    /// Catch-up progress.
    CatchingUpProgressUpdate(SmallProgress),
    /// Drop progress of a stalled peer.
    PeerDroppingProgressUpdate(SmallProgress),
    /// A peer desynchronized.
    PlayerDesynced,
    /// Game paused.
    BeginPause,
    /// Game resumed.
    EndPause,
    /// Server changed the latency window.
    ChangeLatency {
        /// New latency in ticks.
        latency: u8,
    },
    /// Client acknowledges a latency increase.
    IncreasedLatencyConfirm {
        /// First tick of the widened window.
        first_tick_to_skip: u32,
        /// Ticks the client skips.
        ticks_to_skip: u8,
    },
    /// Countdown until a save finishes.
    SavingCountDown {
        /// Ticks until the save completes.
        ticks_to_finish: u32,
        /// Players waiting behind it.
        players_in_queue: u32,
    },
}

impl SynchronizerActionData {
    /// Wire tag for this variant.
    pub fn action_type(&self) -> SynchronizerActionType {
        use SynchronizerActionType as T;
        match self {
            Self::GameEnd => T::GameEnd,
            Self::PeerDisconnect { .. } => T::PeerDisconnect,
            Self::NewPeerInfo { .. } => T::NewPeerInfo,
            Self::ClientChangedState { .. } => T::ClientChangedState,
            Self::ClientShouldStartSendingTickClosures { .. } => {
                T::ClientShouldStartSendingTickClosures
            }
            Self::MapReadyForDownload(_) => T::MapReadyForDownload,
            Self::MapLoadingProgressUpdate(_) => T::MapLoadingProgressUpdate,
            Self::MapSavingProgressUpdate(_) => T::MapSavingProgressUpdate,
            Self::SavingForUpdate => T::SavingForUpdate,
            Self::MapDownloadingProgressUpdate(_) => T::MapDownloadingProgressUpdate,
            Self::CatchingUpProgressUpdate(_) => T::CatchingUpProgressUpdate,
            Self::PeerDroppingProgressUpdate(_) => T::PeerDroppingProgressUpdate,
            Self::PlayerDesynced => T::PlayerDesynced,
            Self::BeginPause => T::BeginPause,
            Self::EndPause => T::EndPause,
            Self::ChangeLatency { .. } => T::ChangeLatency,
            Self::IncreasedLatencyConfirm { .. } => T::IncreasedLatencyConfirm,
            Self::SavingCountDown { .. } => T::SavingCountDown,
        }
    }

    fn decode_body(r: &mut Reader<'_>, ty: SynchronizerActionType) -> Result<Self, DecodeError> {
        use SynchronizerActionType as T;
        Ok(match ty {
            T::GameEnd => Self::GameEnd,
            T::PeerDisconnect => Self::PeerDisconnect {
                reason: DisconnectReason::decode(r)?,
            },
            T::NewPeerInfo => Self::NewPeerInfo {
                username: r.read_string()?,
            },
            T::ClientChangedState => Self::ClientChangedState {
                state: ClientMultiplayerState::decode(r)?,
            },
            T::ClientShouldStartSendingTickClosures => {
                Self::ClientShouldStartSendingTickClosures {
                    first_tick: r.read_u32()?,
                }
            }
            T::MapReadyForDownload => {
                Self::MapReadyForDownload(MapReadyForDownloadData::decode(r)?)
            }
            T::MapLoadingProgressUpdate => Self::MapLoadingProgressUpdate(SmallProgress::decode(r)?),
            T::MapSavingProgressUpdate => Self::MapSavingProgressUpdate(SmallProgress::decode(r)?),
            T::SavingForUpdate => Self::SavingForUpdate,
            T::MapDownloadingProgressUpdate => {
                Self::MapDownloadingProgressUpdate(SmallProgress::decode(r)?)
            }
            T::CatchingUpProgressUpdate => Self::CatchingUpProgressUpdate(SmallProgress::decode(r)?),
            T::PeerDroppingProgressUpdate => {
                Self::PeerDroppingProgressUpdate(SmallProgress::decode(r)?)
            }
            T::PlayerDesynced => Self::PlayerDesynced,
            T::BeginPause => Self::BeginPause,
            T::EndPause => Self::EndPause,
            T::SkippedTickClosure | T::SkippedTickClosureConfirm => {
                return Err(r.error(DecodeErrorKind::UnsupportedSynchronizerAction(ty)))
            }
            T::ChangeLatency => Self::ChangeLatency {
                latency: r.read_u8()?,
            },
            T::IncreasedLatencyConfirm => Self::IncreasedLatencyConfirm {
                first_tick_to_skip: r.read_u32()?,
                ticks_to_skip: r.read_u8()?,
            },
            T::SavingCountDown => Self::SavingCountDown {
                ticks_to_finish: r.read_u32()?,
                players_in_queue: r.read_u32()?,
            },
        })
    }

    fn encode_body(&self, w: &mut Writer) -> Result<(), EncodeError> {
        match self {
            Self::GameEnd
            | Self::SavingForUpdate
            | Self::PlayerDesynced
            | Self::BeginPause
            | Self::EndPause => Ok(()),
            Self::PeerDisconnect { reason } => reason.encode(w),
            Self::NewPeerInfo { username } => w.write_str(username),
            Self::ClientChangedState { state } => state.encode(w),
            Self::ClientShouldStartSendingTickClosures { first_tick } => {
                w.write_u32(*first_tick);
                Ok(())
            }
            Self::MapReadyForDownload(data) => data.encode(w),
            Self::MapLoadingProgressUpdate(p)
            | Self::MapSavingProgressUpdate(p)
            | Self::MapDownloadingProgressUpdate(p)
            | Self::CatchingUpProgressUpdate(p)
            | Self::PeerDroppingProgressUpdate(p) => p.encode(w),
            Self::ChangeLatency { latency } => {
                w.write_u8(*latency);
                Ok(())
            }
            Self::IncreasedLatencyConfirm {
                first_tick_to_skip,
                ticks_to_skip,
            } => {
                w.write_u32(*first_tick_to_skip);
                w.write_u8(*ticks_to_skip);
                Ok(())
            }
            Self::SavingCountDown {
                ticks_to_finish,
                players_in_queue,
            } => {
                w.write_u32(*ticks_to_finish);
                w.write_u32(*players_in_queue);
                Ok(())
            }
        }
    }
}

/// A synchronizer action and, for server-written actions, the peer it concerns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynchronizerAction {
    /// Variant body.
    pub data: SynchronizerActionData,
    /// Target peer; present exactly when written by the server.
    pub peer_id: Option<u16>,
}

impl SynchronizerAction {
    /// Client-written action.
    pub fn client(data: SynchronizerActionData) -> Self {
        Self {
            data,
            peer_id: None,
        }
    }

    /// Server-written action about `peer_id`.
    pub fn server(data: SynchronizerActionData, peer_id: u16) -> Self {
        Self {
            data,
            peer_id: Some(peer_id),
        }
    }

    /// Wire tag.
    pub fn action_type(&self) -> SynchronizerActionType {
        self.data.action_type()
    }

    /// Read one action written by `origin`.
    pub fn decode(r: &mut Reader<'_>, origin: Origin) -> Result<Self, DecodeError> {
        let offset = r.position();
        let raw = r.read_u8()?;
        let ty = SynchronizerActionType::try_from(raw).map_err(|tag| {
            DecodeError::new(offset, DecodeErrorKind::UnknownSynchronizerAction(tag))
        })?;
        let data = SynchronizerActionData::decode_body(r, ty)?;
        let peer_id = match origin {
            Origin::Server => Some(r.read_u16()?),
            Origin::Client => None,
        };
        Ok(Self { data, peer_id })
    }

    /// Write as `origin`. A peer id is written only in the server direction.
    pub fn encode(&self, w: &mut Writer, origin: Origin) -> Result<(), EncodeError> {
        let ty = self.action_type();
        let peer_id = match (origin, self.peer_id) {
            (Origin::Server, None) => return Err(EncodeError::MissingPeerId(ty)),
            (Origin::Server, Some(peer_id)) => Some(peer_id),
            (Origin::Client, _) => None,
        };
        ty.encode(w)?;
        self.data.encode_body(w)?;
        if let Some(peer_id) = peer_id {
            w.write_u16(peer_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(action: &SynchronizerAction, origin: Origin) -> Vec<u8> {
        let mut w = Writer::new();
        action.encode(&mut w, origin).unwrap();
        let bytes = w.into_inner();
        let mut r = Reader::new(&bytes);
        assert_eq!(&SynchronizerAction::decode(&mut r, origin).unwrap(), action);
        r.finish().unwrap();
        bytes
    }

    #[test]
    fn test_peer_id_suffix_only_from_server() {
        let client = SynchronizerAction::client(SynchronizerActionData::ChangeLatency { latency: 5 });
        assert_eq!(roundtrip(&client, Origin::Client), vec![17, 5]);

        let server = SynchronizerAction::server(
            SynchronizerActionData::ChangeLatency { latency: 5 },
            0x0102,
        );
        assert_eq!(roundtrip(&server, Origin::Server), vec![17, 5, 0x02, 0x01]);

        assert_eq!(
            client.encode(&mut Writer::new(), Origin::Server),
            Err(EncodeError::MissingPeerId(SynchronizerActionType::ChangeLatency))
        );
    }

    #[test]
    fn test_increased_latency_confirm_layout() {
        let action = SynchronizerAction::client(SynchronizerActionData::IncreasedLatencyConfirm {
            first_tick_to_skip: 1002,
            ticks_to_skip: 3,
        });
        assert_eq!(roundtrip(&action, Origin::Client), vec![18, 0xea, 0x03, 0, 0, 3]);
    }

    #[test]
    fn test_map_ready_for_download_roundtrip() {
        let data = MapReadyForDownloadData {
            size: 1_000_000,
            auxiliary_size: 12,
            crc: 0xabcd,
            update_tick: 600,
            autosave_interval: 18_000,
            autosave_slots: 5,
            autosave_only_on_server: true,
            non_blocking_saving: false,
            script_checksums: vec![("level".into(), 7), ("base".into(), 9)],
            script_events: vec![(
                "level".into(),
                ScriptRegistration {
                    standard_events: vec![1, 2],
                    nth_tick_events: vec![60],
                    standard_event_filters: vec![(3, 4)],
                    on_init: true,
                    on_load: false,
                    on_configuration_changed: true,
                },
            )],
            script_commands: vec![("level".into(), vec!["cmd".into()])],
        };
        let action = SynchronizerAction::server(SynchronizerActionData::MapReadyForDownload(data), 1);
        roundtrip(&action, Origin::Server);
    }

    #[test]
    fn test_every_simple_variant_roundtrips() {
        let variants = [
            SynchronizerActionData::GameEnd,
            SynchronizerActionData::PeerDisconnect {
                reason: DisconnectReason::Quit,
            },
            SynchronizerActionData::NewPeerInfo {
                username: "bob".into(),
            },
            SynchronizerActionData::ClientChangedState {
                state: ClientMultiplayerState::InGame,
            },
            SynchronizerActionData::ClientShouldStartSendingTickClosures { first_tick: 77 },
            SynchronizerActionData::MapLoadingProgressUpdate(SmallProgress(10)),
            SynchronizerActionData::MapSavingProgressUpdate(SmallProgress::UNKNOWN),
            SynchronizerActionData::SavingForUpdate,
            SynchronizerActionData::MapDownloadingProgressUpdate(SmallProgress(254)),
            SynchronizerActionData::CatchingUpProgressUpdate(SmallProgress(0)),
            SynchronizerActionData::PeerDroppingProgressUpdate(SmallProgress(3)),
            SynchronizerActionData::PlayerDesynced,
            SynchronizerActionData::BeginPause,
            SynchronizerActionData::EndPause,
            SynchronizerActionData::SavingCountDown {
                ticks_to_finish: 30,
                players_in_queue: 2,
            },
        ];
        for data in variants {
            roundtrip(&SynchronizerAction::server(data.clone(), 9), Origin::Server);
            roundtrip(&SynchronizerAction::client(data), Origin::Client);
        }
    }

    #[test]
    fn test_unregistered_tags_rejected() {
        let err = SynchronizerAction::decode(&mut Reader::new(&[15]), Origin::Server).unwrap_err();
        assert_eq!(
            err.kind,
            DecodeErrorKind::UnsupportedSynchronizerAction(SynchronizerActionType::SkippedTickClosure)
        );

        let err = SynchronizerAction::decode(&mut Reader::new(&[20]), Origin::Server).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::UnknownSynchronizerAction(20));
    }
}
