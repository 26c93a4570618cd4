//! Player input actions and the segment format used for oversized actions.
//!
//! Every action starts with a one-byte type tag and a delta-compressed player
//! index. The payload layout is fixed per type and not self-describing, so an
//! action whose layout is unknown makes the rest of its closure unreadable.

use crate::codec::{wire_enum, Decode, Encode, Reader, Writer};
use crate::data::{DisconnectReason, MapPosition, PackedDirection};
use crate::error::{DecodeError, DecodeErrorKind, EncodeError};

macro_rules! input_action_types {
    ($($name:ident),* $(,)?) => {
        /// Player command kinds, in wire tag order starting at 0.
        #[allow(missing_docs)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum InputActionType {
            $($name),*
        }

        impl InputActionType {
            /// Every type, indexed by wire tag.
            pub const ALL: &'static [InputActionType] = &[$(InputActionType::$name),*];
        }
    };
}

input_action_types! {
    Nothing, StopWalking, BeginMining, StopMining, ToggleDriving, OpenGui, CloseGui,
    OpenCharacterGui, OpenCurrentVehicleGui, ConnectRollingStock, DisconnectRollingStock,
    SelectedEntityCleared, ClearCursor, ResetAssemblingMachine, OpenTechnologyGui, LaunchRocket,
    OpenProductionGui, StopRepair, CancelNewBlueprint, CloseBlueprintRecord, CopyEntitySettings,
    PasteEntitySettings, DestroyOpenedItem, CopyOpenedItem, ToggleShowEntityInfo,
    SingleplayerInit, MultiplayerInit, DisconnectAllPlayers, SwitchToRenameStopGui,
    OpenBonusGui, OpenTrainsGui, OpenAchievementsGui, CycleBlueprintBookForwards,
    CycleBlueprintBookBackwards, CycleClipboardForwards, CycleClipboardBackwards,
    StopMovementInTheNextTick, ToggleEnableVehicleLogisticsWhileMoving,
    ToggleDeconstructionItemEntityFilterMode, ToggleDeconstructionItemTileFilterMode,
    OpenLogisticGui, SelectNextValidGun, ToggleMapEditor, DeleteBlueprintLibrary,
    GameCreatedFromScenario, ActivateCopy, ActivateCut, ActivatePaste, Undo,
    TogglePersonalRoboport, ToggleEquipmentMovementBonus, TogglePersonalLogisticRequests,
    ToggleEntityLogisticRequests, StopBuildingByMoving, FlushOpenedEntityFluid, ForceFullCRC,
    OpenTipsAndTricksGui, OpenBlueprintLibraryGui, ChangeBlueprintLibraryTab, DropItem, Build,
    StartWalking, BeginMiningTerrain, ChangeRidingState, OpenItem, OpenParentOfOpenedItem,
    ResetItem, DestroyItem, OpenModItem, OpenEquipment, CursorTransfer, CursorSplit,
    StackTransfer, InventoryTransfer, CheckCRCHeuristic, Craft, WireDragging,
    ChangeShootingState, SetupAssemblingMachine, SelectedEntityChanged, SmartPipette,
    StackSplit, InventorySplit, CancelCraft, SetFilter, CheckCRC, SetCircuitCondition,
    SetSignal, StartResearch, SetLogisticFilterItem, SetLogisticFilterSignal,
    SetCircuitModeOfOperation, GuiClick, GuiConfirmed, WriteToConsole, MarketOffer,
    AddTrainStation, ChangeTrainStopStation, ChangeActiveItemGroupForCrafting,
    ChangeActiveItemGroupForFilters, ChangeActiveCharacterTab, GuiTextChanged,
    GuiCheckedStateChanged, GuiSelectionStateChanged, GuiSelectedTabChanged, GuiValueChanged,
    GuiSwitchStateChanged, GuiLocationChanged, PlaceEquipment, TakeEquipment, UseItem,
    SendSpidertron, UseArtilleryRemote, SetInventoryBar, MoveOnZoom, StartRepair, Deconstruct,
    Upgrade, Copy, AlternativeCopy, SelectBlueprintEntities, AltSelectBlueprintEntities,
    SetupBlueprint, SetupSingleBlueprintRecord, CopyOpenedBlueprint, ReassignBlueprint,
    OpenBlueprintRecord, GrabBlueprintRecord, DropBlueprintRecord, DeleteBlueprintRecord,
    UpgradeOpenedBlueprintByRecord, UpgradeOpenedBlueprintByItem, SpawnItem,
    SpawnItemStackTransfer, UpdateBlueprintShelf, TransferBlueprint,
    TransferBlueprintImmediately, EditBlueprintToolPreview, RemoveCables, ExportBlueprint,
    ImportBlueprint, ImportBlueprintsFiltered, PlayerJoinGame, PlayerAdminChange,
    CancelDeconstruct, CancelUpgrade, ChangeArithmeticCombinatorParameters,
    ChangeDeciderCombinatorParameters, ChangeProgrammableSpeakerParameters,
    ChangeProgrammableSpeakerAlertParameters, ChangeProgrammableSpeakerCircuitParameters,
    SetVehicleAutomaticTargetingParameters, BuildTerrain, ChangeTrainWaitCondition,
    ChangeTrainWaitConditionData, CustomInput, ChangeItemLabel, ChangeItemDescription,
    ChangeEntityLabel, BuildRail, CancelResearch, SelectArea, AltSelectArea, ReverseSelectArea,
    ServerCommand, SetControllerLogisticTrashFilterItem, SetEntityLogisticTrashFilterItem,
    SetInfinityContainerFilterItem, SetInfinityPipeFilter, ModSettingsChanged,
    SetEntityEnergyProperty, EditCustomTag, EditPermissionGroup, ImportBlueprintString,
    ImportPermissionsString, ReloadScript, ReloadScriptDataTooLarge, GuiElemChanged,
    BlueprintTransferQueueUpdate, DragTrainSchedule, DragTrainWaitCondition, SelectItem,
    SelectEntitySlot, SelectTileSlot, SelectMapperSlot, DisplayResolutionChanged,
    QuickBarSetSlot, QuickBarPickSlot, QuickBarSetSelectedPage, PlayerLeaveGame,
    MapEditorAction, PutSpecialItemInMap, PutSpecialRecordInMap, ChangeMultiplayerConfig,
    AdminAction, LuaShortcut, TranslateString, FlushOpenedEntitySpecificFluid,
    ChangePickingState, SelectedEntityChangedVeryClose, SelectedEntityChangedVeryClosePrecise,
    SelectedEntityChangedRelative, SelectedEntityChangedBasedOnUnitNumber, SetAutosortInventory,
    SetFlatControllerGui, SetRecipeNotifications, SetAutoLaunchRocket,
    SwitchConstantCombinatorState, SwitchPowerSwitchState, SwitchInserterFilterModeState,
    SwitchConnectToLogisticNetwork, SetBehaviorMode, FastEntityTransfer, RotateEntity,
    FastEntitySplit, SetTrainStopped, ChangeControllerSpeed, SetAllowCommands,
    SetResearchFinishedStopsGame, SetInserterMaxStackSize, OpenTrainGui, SetEntityColor,
    SetDeconstructionItemTreesAndRocksOnly, SetDeconstructionItemTileSelectionMode,
    DeleteCustomTag, DeletePermissionGroup, AddPermissionGroup,
    SetInfinityContainerRemoveUnfilteredItems, SetCarWeaponsControl, SetRequestFromBuffers,
    ChangeActiveQuickBar, OpenPermissionsGui, DisplayScaleChanged, SetSplitterPriority,
    GrabInternalBlueprintFromText, SetHeatInterfaceTemperature, SetHeatInterfaceMode,
    OpenTrainStationGui, RemoveTrainStation, GoToTrainStation, RenderModeChanged,
    SetPlayerColor, PlayerClickedGpsTag, SetTrainsLimit, ClearRecipeNotification,
    SetLinkedContainerLinkID,
}

impl TryFrom<u8> for InputActionType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Self::ALL.get(usize::from(value)).copied().ok_or(value)
    }
}

impl Decode for InputActionType {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let offset = r.position();
        let raw = r.read_u8()?;
        Self::try_from(raw)
            .map_err(|tag| DecodeError::new(offset, DecodeErrorKind::UnknownInputAction(tag)))
    }
}

impl Encode for InputActionType {
    fn encode(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.write_u8(*self as u8);
        Ok(())
    }
}

/// Payload layout selected by an [`InputActionType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    /// No payload bytes.
    Empty,
    /// [`PackedDirection`].
    Direction,
    /// [`CrcData`].
    Crc,
    /// [`ShootingState`].
    ShootingState,
    /// [`PlayerJoinGameData`].
    PlayerJoinGame,
    /// [`ServerCommandData`].
    ServerCommand,
    /// [`DisconnectReason`].
    DisconnectReason,
    /// One byte.
    U8,
    /// Little-endian `u16`.
    U16,
    /// Little-endian `u32`.
    U32,
    /// Layout not known; decoding fails.
    Unimplemented,
}

impl InputActionType {
    /// Payload layout for this type.
    pub fn payload_shape(self) -> PayloadShape {
        if self as u8 <= Self::ForceFullCRC as u8 {
            return PayloadShape::Empty;
        }
        match self {
            Self::StartWalking => PayloadShape::Direction,
            Self::CheckCRCHeuristic | Self::CheckCRC => PayloadShape::Crc,
            Self::ChangeShootingState => PayloadShape::ShootingState,
            Self::PlayerJoinGame => PayloadShape::PlayerJoinGame,
            Self::ServerCommand => PayloadShape::ServerCommand,
            Self::PlayerLeaveGame => PayloadShape::DisconnectReason,
            Self::SelectedEntityChangedVeryClose => PayloadShape::U8,
            Self::SelectedEntityChangedVeryClosePrecise => PayloadShape::U16,
            Self::SelectedEntityChangedRelative | Self::SelectedEntityChangedBasedOnUnitNumber => {
                PayloadShape::U32
            }
            _ => PayloadShape::Unimplemented,
        }
    }
}

/// CRC report used by the desync checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrcData {
    /// Checksum of the game state.
    pub crc: u32,
    /// Tick the checksum was taken at.
    pub tick_of_crc: u32,
}

wire_enum! {
    /// Shooting mode of a character.
    pub enum ShootingMode {
        /// Not shooting.
        NotShooting = 0,
        /// Shooting at enemies near the target.
        ShootingEnemies = 1,
        /// Shooting the selected entity.
        ShootingSelected = 2,
    }
}

/// Payload of `ChangeShootingState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShootingState {
    /// Shooting mode.
    pub state: ShootingMode,
    /// Aim position.
    pub target: MapPosition,
}

/// Payload of `PlayerJoinGame`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerJoinGameData {
    /// Peer the player joined through.
    pub peer_id: u16,
    /// Player index assigned by the server.
    pub player_index: u16,
    /// Force the player belongs to.
    pub force_id: u8,
    /// Display name.
    pub username: String,
    /// Joined in map editor mode.
    pub as_editor: bool,
    /// Has admin rights.
    pub admin: bool,
}

/// Payload of `ServerCommand`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCommandData {
    /// Raw command text.
    pub command: Vec<u8>,
    /// Command id.
    pub id: u32,
    /// Opaque connection identifier.
    pub connection_id: [u8; 8],
}

/// Decoded payload of an input action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputActionData {
    /// No payload.
    None,
    /// Walking direction.
    Direction(PackedDirection),
    /// CRC report.
    Crc(CrcData),
    /// Shooting state change.
    ShootingState(ShootingState),
    /// Player join record.
    PlayerJoinGame(PlayerJoinGameData),
    /// Server console command.
    ServerCommand(ServerCommandData),
    /// Reason a player left.
    PlayerLeaveGame(DisconnectReason),
    /// One-byte payload.
    U8(u8),
    /// Two-byte payload.
    U16(u16),
    /// Four-byte payload.
    U32(u32),
}

impl InputActionData {
    /// Layout this data serializes with.
    pub fn shape(&self) -> PayloadShape {
        match self {
            Self::None => PayloadShape::Empty,
            Self::Direction(_) => PayloadShape::Direction,
            Self::Crc(_) => PayloadShape::Crc,
            Self::ShootingState(_) => PayloadShape::ShootingState,
            Self::PlayerJoinGame(_) => PayloadShape::PlayerJoinGame,
            Self::ServerCommand(_) => PayloadShape::ServerCommand,
            Self::PlayerLeaveGame(_) => PayloadShape::DisconnectReason,
            Self::U8(_) => PayloadShape::U8,
            Self::U16(_) => PayloadShape::U16,
            Self::U32(_) => PayloadShape::U32,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::None => "empty",
            Self::Direction(_) => "direction",
            Self::Crc(_) => "crc",
            Self::ShootingState(_) => "shooting state",
            Self::PlayerJoinGame(_) => "player join",
            Self::ServerCommand(_) => "server command",
            Self::PlayerLeaveGame(_) => "disconnect reason",
            Self::U8(_) => "u8",
            Self::U16(_) => "u16",
            Self::U32(_) => "u32",
        }
    }

    fn decode(r: &mut Reader<'_>, shape: PayloadShape) -> Result<Self, DecodeError> {
        Ok(match shape {
            PayloadShape::Empty | PayloadShape::Unimplemented => Self::None,
            PayloadShape::Direction => Self::Direction(PackedDirection::decode(r)?),
            PayloadShape::Crc => Self::Crc(CrcData {
                crc: r.read_u32()?,
                tick_of_crc: r.read_u32()?,
            }),
            PayloadShape::ShootingState => Self::ShootingState(ShootingState {
                state: ShootingMode::decode(r)?,
                target: MapPosition::decode(r)?,
            }),
            PayloadShape::PlayerJoinGame => Self::PlayerJoinGame(PlayerJoinGameData {
                peer_id: r.read_so_u16()?,
                player_index: r.read_u16()?,
                force_id: r.read_u8()?,
                username: r.read_string()?,
                as_editor: r.read_bool()?,
                admin: r.read_bool()?,
            }),
            PayloadShape::ServerCommand => Self::ServerCommand(ServerCommandData {
                command: r.read_byte_string()?,
                id: r.read_u32()?,
                connection_id: r.read_array()?,
            }),
            PayloadShape::DisconnectReason => Self::PlayerLeaveGame(DisconnectReason::decode(r)?),
            PayloadShape::U8 => Self::U8(r.read_u8()?),
            PayloadShape::U16 => Self::U16(r.read_u16()?),
            PayloadShape::U32 => Self::U32(r.read_u32()?),
        })
    }

    fn encode(&self, w: &mut Writer) -> Result<(), EncodeError> {
        match self {
            Self::None => {}
            Self::Direction(direction) => direction.encode(w)?,
            Self::Crc(data) => {
                w.write_u32(data.crc);
                w.write_u32(data.tick_of_crc);
            }
            Self::ShootingState(data) => {
                data.state.encode(w)?;
                data.target.encode(w)?;
            }
            Self::PlayerJoinGame(data) => {
                w.write_so_u16(data.peer_id);
                w.write_u16(data.player_index);
                w.write_u8(data.force_id);
                w.write_str(&data.username)?;
                w.write_bool(data.as_editor);
                w.write_bool(data.admin);
            }
            Self::ServerCommand(data) => {
                w.write_byte_string(&data.command)?;
                w.write_u32(data.id);
                w.write_bytes(&data.connection_id);
            }
            Self::PlayerLeaveGame(reason) => reason.encode(w)?,
            Self::U8(v) => w.write_u8(*v),
            Self::U16(v) => w.write_u16(*v),
            Self::U32(v) => w.write_u32(*v),
        }
        Ok(())
    }
}

/// One player command inside a tick closure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputAction {
    /// Command kind.
    pub ty: InputActionType,
    /// Player issuing the command.
    pub player_index: u16,
    /// Type-specific payload.
    pub data: InputActionData,
}

impl InputAction {
    /// Build an action.
    pub fn new(ty: InputActionType, player_index: u16, data: InputActionData) -> Self {
        Self {
            ty,
            player_index,
            data,
        }
    }

    /// Build an action that carries no payload.
    pub fn empty(ty: InputActionType, player_index: u16) -> Self {
        Self::new(ty, player_index, InputActionData::None)
    }

    /// Read a full action; the player index is a delta against `last_player_index`.
    pub fn decode(r: &mut Reader<'_>, last_player_index: u16) -> Result<Self, DecodeError> {
        let ty = InputActionType::decode(r)?;
        Self::decode_payload(r, ty, last_player_index)
    }

    /// Read everything after the type tag.
    pub fn decode_payload(
        r: &mut Reader<'_>,
        ty: InputActionType,
        last_player_index: u16,
    ) -> Result<Self, DecodeError> {
        let player_index = r.read_so_u16()?.wrapping_add(last_player_index);
        let shape = ty.payload_shape();
        if shape == PayloadShape::Unimplemented {
            return Err(r.error(DecodeErrorKind::UnimplementedInputAction(ty)));
        }
        Ok(Self {
            ty,
            player_index,
            data: InputActionData::decode(r, shape)?,
        })
    }

    /// Write a full action with its player index delta-compressed.
    pub fn encode(&self, w: &mut Writer, last_player_index: u16) -> Result<(), EncodeError> {
        self.check_shape()?;
        self.ty.encode(w)?;
        self.encode_payload(w, last_player_index)
    }

    /// Write everything after the type tag.
    pub fn encode_payload(&self, w: &mut Writer, last_player_index: u16) -> Result<(), EncodeError> {
        self.check_shape()?;
        w.write_so_u16(self.player_index.wrapping_sub(last_player_index));
        self.data.encode(w)
    }

    fn check_shape(&self) -> Result<(), EncodeError> {
        match self.ty.payload_shape() {
            PayloadShape::Unimplemented => Err(EncodeError::UnimplementedInputAction(self.ty)),
            shape if shape != self.data.shape() => Err(EncodeError::InputActionMismatch {
                ty: self.ty,
                data: self.data.name(),
            }),
            _ => Ok(()),
        }
    }
}

/// Chunk of an input action too large to send whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputActionSegment {
    /// Type of the action being carried.
    pub ty: InputActionType,
    /// Identifier shared by all chunks of one action.
    pub id: u32,
    /// Player issuing the action.
    pub player_index: u16,
    /// Number of chunks in the group.
    pub total_segments: u32,
    /// Position of this chunk.
    pub segment_number: u32,
    /// Chunk bytes.
    pub payload: Vec<u8>,
}

impl InputActionSegment {
    /// Split an action into segments of at most `chunk_size` payload bytes.
    ///
    /// The carried bytes are the action's payload as written by
    /// [`InputAction::encode_payload`] against a previous player index of 0.
    pub fn split(
        action: &InputAction,
        id: u32,
        chunk_size: usize,
    ) -> Result<Vec<Self>, EncodeError> {
        let mut w = Writer::new();
        action.encode_payload(&mut w, 0)?;
        let bytes = w.into_inner();
        let chunks: Vec<&[u8]> = bytes.chunks(chunk_size.max(1)).collect();
        let total_segments = u32::try_from(chunks.len())
            .map_err(|_| EncodeError::ValueOutOfRange("segment count"))?;
        Ok(chunks
            .into_iter()
            .zip(0u32..)
            .map(|(chunk, segment_number)| Self {
                ty: action.ty,
                id,
                player_index: action.player_index,
                total_segments,
                segment_number,
                payload: chunk.to_vec(),
            })
            .collect())
    }

    /// True for the chunk that closes its group.
    pub fn is_last(&self) -> bool {
        self.segment_number.checked_add(1) == Some(self.total_segments)
    }
}

impl Decode for InputActionSegment {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            ty: InputActionType::decode(r)?,
            id: r.read_u32()?,
            player_index: r.read_so_u16()?,
            total_segments: r.read_so_u32()?,
            segment_number: r.read_so_u32()?,
            payload: r.read_byte_string()?,
        })
    }
}

impl Encode for InputActionSegment {
    fn encode(&self, w: &mut Writer) -> Result<(), EncodeError> {
        self.ty.encode(w)?;
        w.write_u32(self.id);
        w.write_so_u16(self.player_index);
        w.write_so_u32(self.total_segments);
        w.write_so_u32(self.segment_number);
        w.write_byte_string(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_exact, encode_to_vec};
    use crate::data::Direction;

    fn roundtrip(action: &InputAction, last: u16) -> Vec<u8> {
        let mut w = Writer::new();
        action.encode(&mut w, last).unwrap();
        let bytes = w.into_inner();
        let mut r = Reader::new(&bytes);
        assert_eq!(&InputAction::decode(&mut r, last).unwrap(), action);
        r.finish().unwrap();
        bytes
    }

    #[test]
    fn test_tag_table() {
        assert_eq!(InputActionType::ALL.len(), 246);
        assert_eq!(InputActionType::Nothing as u8, 0);
        assert_eq!(InputActionType::ForceFullCRC as u8, 55);
        assert_eq!(InputActionType::StartWalking as u8, 61);
        assert_eq!(InputActionType::PlayerJoinGame as u8, 142);
        assert_eq!(InputActionType::SetLinkedContainerLinkID as u8, 245);
        for (tag, ty) in InputActionType::ALL.iter().enumerate() {
            assert_eq!(*ty as usize, tag);
        }
        assert_eq!(InputActionType::try_from(246), Err(246));
    }

    #[test]
    fn test_player_index_delta_wraps() {
        let action = InputAction::empty(InputActionType::StopWalking, 3);
        // 3 - 0xFFFF wraps to 4.
        assert_eq!(roundtrip(&action, 0xFFFF), vec![1, 4]);
        let action = InputAction::empty(InputActionType::ClearCursor, 0);
        assert_eq!(roundtrip(&action, 1), vec![12, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_payload_shapes_roundtrip() {
        let actions = [
            InputAction::new(
                InputActionType::StartWalking,
                1,
                InputActionData::Direction(PackedDirection::new(Direction::SouthWest)),
            ),
            InputAction::new(
                InputActionType::CheckCRC,
                0,
                InputActionData::Crc(CrcData {
                    crc: 0xdead_beef,
                    tick_of_crc: 1234,
                }),
            ),
            InputAction::new(
                InputActionType::ChangeShootingState,
                2,
                InputActionData::ShootingState(ShootingState {
                    state: ShootingMode::ShootingEnemies,
                    target: MapPosition { x: -256, y: 512 },
                }),
            ),
            InputAction::new(
                InputActionType::PlayerJoinGame,
                0xFFFF,
                InputActionData::PlayerJoinGame(PlayerJoinGameData {
                    peer_id: 300,
                    player_index: 4,
                    force_id: 1,
                    username: "player".into(),
                    as_editor: false,
                    admin: true,
                }),
            ),
            InputAction::new(
                InputActionType::ServerCommand,
                0,
                InputActionData::ServerCommand(ServerCommandData {
                    command: b"/help".to_vec(),
                    id: 9,
                    connection_id: [1, 2, 3, 4, 5, 6, 7, 8],
                }),
            ),
            InputAction::new(
                InputActionType::PlayerLeaveGame,
                5,
                InputActionData::PlayerLeaveGame(DisconnectReason::Kicked),
            ),
            InputAction::new(
                InputActionType::SelectedEntityChangedVeryClosePrecise,
                5,
                InputActionData::U16(0x0102),
            ),
        ];
        for action in &actions {
            roundtrip(action, 0xFFFF);
        }
    }

    #[test]
    fn test_unimplemented_type_names_tag() {
        let bytes = [InputActionType::WriteToConsole as u8, 0];
        let err = InputAction::decode(&mut Reader::new(&bytes), 0).unwrap_err();
        assert_eq!(
            err.kind,
            DecodeErrorKind::UnimplementedInputAction(InputActionType::WriteToConsole)
        );

        let err = InputAction::decode(&mut Reader::new(&[250, 0]), 0).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::UnknownInputAction(250));
        assert_eq!(err.offset, 0);
    }

    #[test]
    fn test_encode_rejects_shape_mismatch() {
        let action = InputAction::new(InputActionType::StartWalking, 0, InputActionData::U8(1));
        let mut w = Writer::new();
        assert!(matches!(
            action.encode(&mut w, 0),
            Err(EncodeError::InputActionMismatch { .. })
        ));
        assert!(w.is_empty());

        let action = InputAction::empty(InputActionType::Build, 0);
        assert_eq!(
            action.encode(&mut Writer::new(), 0),
            Err(EncodeError::UnimplementedInputAction(InputActionType::Build))
        );
    }

    #[test]
    fn test_segment_split_and_layout() {
        let action = InputAction::new(
            InputActionType::ServerCommand,
            7,
            InputActionData::ServerCommand(ServerCommandData {
                command: vec![b'x'; 20],
                id: 1,
                connection_id: [0; 8],
            }),
        );
        let segments = InputActionSegment::split(&action, 42, 10).unwrap();
        assert_eq!(segments.len(), 4);
        assert!(segments[3].is_last());
        assert!(!segments[0].is_last());
        assert!(segments.iter().all(|s| s.total_segments == 4 && s.id == 42));

        let bytes = encode_to_vec(&segments[1]).unwrap();
        assert_eq!(&bytes[..9], &[164, 42, 0, 0, 0, 7, 4, 1, 10]);
        assert_eq!(decode_exact::<InputActionSegment>(&bytes).unwrap(), segments[1]);

        let joined: Vec<u8> = segments.iter().flat_map(|s| s.payload.clone()).collect();
        let mut r = Reader::new(&joined);
        let rebuilt = InputAction::decode_payload(&mut r, InputActionType::ServerCommand, 0).unwrap();
        r.finish().unwrap();
        assert_eq!(rebuilt, action);
    }
}
