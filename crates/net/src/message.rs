//! Network message catalog.
//!
//! Each datagram carries one message type tag in its frame header and the
//! message body as payload. Only the message types a joining client exchanges
//! have a body layout here; any other tag is a decode error.

use crate::codec::{encode_to_vec, wire_enum, Decode, Encode, Reader, Writer};
use crate::data::{ConnectionRequestStatus, ModId, PropertyTree, SmallProgress, Version};
use crate::error::{DecodeError, DecodeErrorKind, EncodeError};
use crate::heartbeat::Heartbeat;
use crate::synchronizer::Origin;

/// Size of a map transfer block.
pub const TRANSFER_BLOCK_SIZE: usize = 503;

wire_enum! {
    /// Top-level message type tag carried in the frame header.
    pub enum NetworkMessageType {
        /// Ping.
        Ping = 0,
        /// Ping reply.
        PingReply = 1,
        /// Client opens a connection.
        ConnectionRequest = 2,
        /// Server answers the request.
        ConnectionRequestReply = 3,
        /// Client sends its credentials.
        ConnectionRequestReplyConfirm = 4,
        /// Server admits or refuses the client.
        ConnectionAcceptOrDeny = 5,
        /// Client heartbeat.
        ClientToServerHeartbeat = 6,
        /// Server heartbeat.
        ServerToClientHeartbeat = 7,
        /// Address discovery.
        GetOwnAddress = 8,
        /// Address discovery reply.
        GetOwnAddressReply = 9,
        /// NAT punch request.
        NatPunchRequest = 10,
        /// NAT punch.
        NatPunch = 11,
        /// Request one map transfer block.
        TransferBlockRequest = 12,
        /// One map transfer block.
        TransferBlock = 13,
        /// Heartbeat request while disconnecting.
        RequestForHeartbeatWhenDisconnecting = 14,
        /// LAN discovery broadcast.
        LANBroadcast = 15,
        /// Game information query.
        GameInformationRequest = 16,
        /// Game information answer.
        GameInformationRequestReply = 17,
        /// Keep-alive with no body.
        Empty = 18,
    }
}

impl NetworkMessageType {
    /// True for the types whose frames always carry a message id.
    pub fn always_has_message_id(self) -> bool {
        matches!(
            self,
            Self::ConnectionRequest | Self::ConnectionRequestReplyConfirm
        )
    }
}

/// First handshake message, sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
    /// Client game version.
    pub version: Version,
    /// Random id chosen by the client for this attempt.
    pub client_request_id: u32,
}

/// Server answer to [`ConnectionRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequestReply {
    /// Server game version.
    pub version: Version,
    /// Echo of the client's id.
    pub client_request_id: u32,
    /// Id chosen by the server.
    pub server_request_id: u32,
}

/// Client credentials, sent after [`ConnectionRequestReply`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionRequestReplyConfirm {
    /// Client's request id.
    pub client_request_id: u32,
    /// Server's request id.
    pub server_request_id: u32,
    /// Client instance id.
    pub instance_id: u32,
    /// Player name.
    pub username: String,
    /// Password, or its hash.
    pub password_hash: String,
    /// Authentication server key.
    pub server_key: String,
    /// Timestamp of the server key.
    pub server_key_timestamp: String,
    /// Checksum of the core mod.
    pub core_checksum: u32,
    /// Checksum of the prototype list.
    pub prototype_list_checksum: u32,
    /// Mods enabled on the client.
    pub active_mods: Vec<ModId>,
    /// Startup mod settings.
    pub startup_mod_settings: PropertyTree,
}

/// Progress details for one connected peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientPeerInfo {
    /// Player name.
    pub username: String,
    /// Progress of being dropped.
    pub dropping_progress: Option<SmallProgress>,
    /// Map saving progress.
    pub map_saving_progress: Option<SmallProgress>,
    /// Map download progress.
    pub map_downloading_progress: Option<SmallProgress>,
    /// Map loading progress.
    pub map_loading_progress: Option<SmallProgress>,
    /// Catch-up progress.
    pub trying_to_catch_up_progress: Option<SmallProgress>,
}

impl ClientPeerInfo {
    fn progress_fields(&self) -> [Option<SmallProgress>; 5] {
        [
            self.dropping_progress,
            self.map_saving_progress,
            self.map_downloading_progress,
            self.map_loading_progress,
            self.trying_to_catch_up_progress,
        ]
    }
}

impl Decode for ClientPeerInfo {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let username = r.read_string()?;
        let flags = r.read_u8()?;
        let mut field = |bit: u8| -> Result<Option<SmallProgress>, DecodeError> {
            if flags & bit != 0 {
                Ok(Some(SmallProgress::decode(r)?))
            } else {
                Ok(None)
            }
        };
        Ok(Self {
            username,
            dropping_progress: field(0x01)?,
            map_saving_progress: field(0x02)?,
            map_downloading_progress: field(0x04)?,
            map_loading_progress: field(0x08)?,
            trying_to_catch_up_progress: field(0x10)?,
        })
    }
}

impl Encode for ClientPeerInfo {
    fn encode(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.write_str(&self.username)?;
        let fields = self.progress_fields();
        let flags = fields
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_some())
            .fold(0u8, |flags, (bit, _)| flags | 1 << bit);
        w.write_u8(flags);
        for progress in fields.iter().flatten() {
            progress.encode(w)?;
        }
        Ok(())
    }
}

/// Snapshot of every peer, sent on acceptance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientsPeerInfo {
    /// Name the server plays under.
    pub server_username: String,
    /// Server's map saving progress.
    pub map_saving_progress: SmallProgress,
    /// Peers the server is currently saving the map for.
    pub saving_for: Vec<u16>,
    /// Per-peer details keyed by peer id, in wire order.
    pub client_peer_info: Vec<(u16, ClientPeerInfo)>,
}

impl Decode for ClientsPeerInfo {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let server_username = r.read_string()?;
        let map_saving_progress = SmallProgress::decode(r)?;
        let count = usize::from(r.read_so_u16()?);
        let saving_for = r.read_n(count, |r| r.read_so_u16())?;
        let count = usize::from(r.read_so_u16()?);
        let client_peer_info = r.read_n(count, |r| Ok((r.read_so_u16()?, ClientPeerInfo::decode(r)?)))?;
        Ok(Self {
            server_username,
            map_saving_progress,
            saving_for,
            client_peer_info,
        })
    }
}

impl Encode for ClientsPeerInfo {
    fn encode(&self, w: &mut Writer) -> Result<(), EncodeError> {
        fn so_u16_len(len: usize) -> Result<u16, EncodeError> {
            u16::try_from(len).map_err(|_| EncodeError::ValueOutOfRange("peer count"))
        }

        w.write_str(&self.server_username)?;
        self.map_saving_progress.encode(w)?;
        w.write_so_u16(so_u16_len(self.saving_for.len())?);
        for peer in &self.saving_for {
            w.write_so_u16(*peer);
        }
        w.write_so_u16(so_u16_len(self.client_peer_info.len())?);
        for (peer, info) in &self.client_peer_info {
            w.write_so_u16(*peer);
            info.encode(w)?;
        }
        Ok(())
    }
}

/// Server's verdict on a connection attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionAcceptOrDeny {
    /// Client's request id.
    pub client_request_id: u32,
    /// Verdict.
    pub status: ConnectionRequestStatus,
    /// Game name.
    pub game_name: String,
    /// Server hash.
    pub server_hash: String,
    /// Game description.
    pub description: String,
    /// Latency window in ticks.
    pub latency: u8,
    /// Simulation rate cap.
    pub max_updates_per_second: u32,
    /// Game id.
    pub game_id: u32,
    /// Steam id of the server.
    pub steam_id: [u8; 8],
    /// Connected peers.
    pub clients_peer_info: ClientsPeerInfo,
    /// First heartbeat sequence number the server expects from the client.
    pub first_sequence_number_to_expect: u32,
    /// First heartbeat sequence number the server sends.
    pub first_sequence_number_to_send: u32,
    /// Peer id assigned to the client.
    pub new_peer_id: u16,
    /// Mods enabled on the server.
    pub active_mods: Vec<ModId>,
    /// Startup mod settings of the server.
    pub startup_mod_settings: PropertyTree,
    /// Peer that paused the game, if any.
    pub paused_by: u16,
}

/// A decoded network message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// See [`ConnectionRequest`].
    ConnectionRequest(ConnectionRequest),
    /// See [`ConnectionRequestReply`].
    ConnectionRequestReply(ConnectionRequestReply),
    /// See [`ConnectionRequestReplyConfirm`].
    ConnectionRequestReplyConfirm(ConnectionRequestReplyConfirm),
    /// See [`ConnectionAcceptOrDeny`].
    ConnectionAcceptOrDeny(ConnectionAcceptOrDeny),
    /// Heartbeat written by a client.
    ClientToServerHeartbeat(Heartbeat),
    /// Heartbeat written by the server.
    ServerToClientHeartbeat(Heartbeat),
    /// Request for one map block.
    TransferBlockRequest {
        /// Block index.
        block_number: u32,
    },
    /// One map block.
    TransferBlock {
        /// Block index.
        block_number: u32,
        /// Block contents.
        data: Vec<u8>,
    },
    /// Keep-alive with no body.
    Empty,
}

impl Message {
    /// Tag written into the frame header.
    pub fn message_type(&self) -> NetworkMessageType {
        match self {
            Self::ConnectionRequest(_) => NetworkMessageType::ConnectionRequest,
            Self::ConnectionRequestReply(_) => NetworkMessageType::ConnectionRequestReply,
            Self::ConnectionRequestReplyConfirm(_) => {
                NetworkMessageType::ConnectionRequestReplyConfirm
            }
            Self::ConnectionAcceptOrDeny(_) => NetworkMessageType::ConnectionAcceptOrDeny,
            Self::ClientToServerHeartbeat(_) => NetworkMessageType::ClientToServerHeartbeat,
            Self::ServerToClientHeartbeat(_) => NetworkMessageType::ServerToClientHeartbeat,
            Self::TransferBlockRequest { .. } => NetworkMessageType::TransferBlockRequest,
            Self::TransferBlock { .. } => NetworkMessageType::TransferBlock,
            Self::Empty => NetworkMessageType::Empty,
        }
    }

    /// Decode a complete message body. Unread trailing bytes are an error.
    pub fn decode(message_type: u8, payload: &[u8]) -> Result<Self, DecodeError> {
        let unknown = || DecodeError::new(0, DecodeErrorKind::UnknownMessageType(message_type));
        let ty = NetworkMessageType::try_from(message_type).map_err(|_| unknown())?;
        let r = &mut Reader::new(payload);
        let message = match ty {
            NetworkMessageType::ConnectionRequest => Self::ConnectionRequest(ConnectionRequest {
                version: Version::decode(r)?,
                client_request_id: r.read_u32()?,
            }),
            NetworkMessageType::ConnectionRequestReply => {
                Self::ConnectionRequestReply(ConnectionRequestReply {
                    version: Version::decode(r)?,
                    client_request_id: r.read_u32()?,
                    server_request_id: r.read_u32()?,
                })
            }
            NetworkMessageType::ConnectionRequestReplyConfirm => {
                Self::ConnectionRequestReplyConfirm(ConnectionRequestReplyConfirm {
                    client_request_id: r.read_u32()?,
                    server_request_id: r.read_u32()?,
                    instance_id: r.read_u32()?,
                    username: r.read_string()?,
                    password_hash: r.read_string()?,
                    server_key: r.read_string()?,
                    server_key_timestamp: r.read_string()?,
                    core_checksum: r.read_u32()?,
                    prototype_list_checksum: r.read_u32()?,
                    active_mods: r.read_vec(ModId::decode)?,
                    startup_mod_settings: PropertyTree::decode(r)?,
                })
            }
            NetworkMessageType::ConnectionAcceptOrDeny => {
                Self::ConnectionAcceptOrDeny(ConnectionAcceptOrDeny {
                    client_request_id: r.read_u32()?,
                    status: ConnectionRequestStatus::decode(r)?,
                    game_name: r.read_string()?,
                    server_hash: r.read_string()?,
                    description: r.read_string()?,
                    latency: r.read_u8()?,
                    max_updates_per_second: r.read_so_u32()?,
                    game_id: r.read_u32()?,
                    steam_id: r.read_array()?,
                    clients_peer_info: ClientsPeerInfo::decode(r)?,
                    first_sequence_number_to_expect: r.read_u32()?,
                    first_sequence_number_to_send: r.read_u32()?,
                    new_peer_id: r.read_u16()?,
                    active_mods: r.read_vec(ModId::decode)?,
                    startup_mod_settings: PropertyTree::decode(r)?,
                    paused_by: r.read_u16()?,
                })
            }
            NetworkMessageType::ClientToServerHeartbeat => {
                Self::ClientToServerHeartbeat(Heartbeat::decode(r, Origin::Client)?)
            }
            NetworkMessageType::ServerToClientHeartbeat => {
                Self::ServerToClientHeartbeat(Heartbeat::decode(r, Origin::Server)?)
            }
            NetworkMessageType::TransferBlockRequest => Self::TransferBlockRequest {
                block_number: r.read_u32()?,
            },
            NetworkMessageType::TransferBlock => Self::TransferBlock {
                block_number: r.read_u32()?,
                data: r.read_rest(),
            },
            NetworkMessageType::Empty => Self::Empty,
            _ => return Err(unknown()),
        };
        r.finish()?;
        Ok(message)
    }

    /// Serialize the message body.
    pub fn encode_body(&self) -> Result<Vec<u8>, EncodeError> {
        encode_to_vec(self)
    }
}

impl Encode for Message {
    fn encode(&self, w: &mut Writer) -> Result<(), EncodeError> {
        match self {
            Self::ConnectionRequest(m) => {
                m.version.encode(w)?;
                w.write_u32(m.client_request_id);
            }
            Self::ConnectionRequestReply(m) => {
                m.version.encode(w)?;
                w.write_u32(m.client_request_id);
                w.write_u32(m.server_request_id);
            }
            Self::ConnectionRequestReplyConfirm(m) => {
                w.write_u32(m.client_request_id);
                w.write_u32(m.server_request_id);
                w.write_u32(m.instance_id);
                w.write_str(&m.username)?;
                w.write_str(&m.password_hash)?;
                w.write_str(&m.server_key)?;
                w.write_str(&m.server_key_timestamp)?;
                w.write_u32(m.core_checksum);
                w.write_u32(m.prototype_list_checksum);
                w.write_vec(&m.active_mods, |w, id| id.encode(w))?;
                m.startup_mod_settings.encode(w)?;
            }
            Self::ConnectionAcceptOrDeny(m) => {
                w.write_u32(m.client_request_id);
                m.status.encode(w)?;
                w.write_str(&m.game_name)?;
                w.write_str(&m.server_hash)?;
                w.write_str(&m.description)?;
                w.write_u8(m.latency);
                w.write_so_u32(m.max_updates_per_second);
                w.write_u32(m.game_id);
                w.write_bytes(&m.steam_id);
                m.clients_peer_info.encode(w)?;
                w.write_u32(m.first_sequence_number_to_expect);
                w.write_u32(m.first_sequence_number_to_send);
                w.write_u16(m.new_peer_id);
                w.write_vec(&m.active_mods, |w, id| id.encode(w))?;
                m.startup_mod_settings.encode(w)?;
                w.write_u16(m.paused_by);
            }
            Self::ClientToServerHeartbeat(h) => h.encode(w, Origin::Client)?,
            Self::ServerToClientHeartbeat(h) => h.encode(w, Origin::Server)?,
            Self::TransferBlockRequest { block_number } => w.write_u32(*block_number),
            Self::TransferBlock { block_number, data } => {
                w.write_u32(*block_number);
                w.write_bytes(data);
            }
            Self::Empty => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ModVersion, PropertyValue};
    use crate::heartbeat::TickClosure;

    fn roundtrip(message: &Message) -> Vec<u8> {
        let body = message.encode_body().unwrap();
        let decoded = Message::decode(message.message_type() as u8, &body).unwrap();
        assert_eq!(&decoded, message);
        assert_eq!(decoded.encode_body().unwrap(), body);
        body
    }

    fn sample_accept(status: ConnectionRequestStatus) -> ConnectionAcceptOrDeny {
        ConnectionAcceptOrDeny {
            client_request_id: 0x1234,
            status,
            game_name: "game".into(),
            server_hash: "hash".into(),
            description: "desc".into(),
            latency: 2,
            max_updates_per_second: 60,
            game_id: 99,
            steam_id: [0; 8],
            clients_peer_info: ClientsPeerInfo {
                server_username: "<server>".into(),
                map_saving_progress: SmallProgress::UNKNOWN,
                saving_for: vec![1],
                client_peer_info: vec![(
                    1,
                    ClientPeerInfo {
                        username: "alice".into(),
                        map_downloading_progress: Some(SmallProgress(100)),
                        ..ClientPeerInfo::default()
                    },
                )],
            },
            first_sequence_number_to_expect: 10,
            first_sequence_number_to_send: 20,
            new_peer_id: 2,
            active_mods: vec![ModId {
                name: "base".into(),
                version: ModVersion {
                    major: 1,
                    minor: 1,
                    sub: 110,
                },
                crc: 1,
            }],
            startup_mod_settings: PropertyTree::new(PropertyValue::Dictionary(vec![])),
            paused_by: 0,
        }
    }

    #[test]
    fn test_connection_request_layout() {
        let body = roundtrip(&Message::ConnectionRequest(ConnectionRequest {
            version: Version::new(1, 1, 110, 0),
            client_request_id: 0xaabbccdd,
        }));
        assert_eq!(body, vec![1, 1, 110, 0, 0, 0xdd, 0xcc, 0xbb, 0xaa]);
    }

    #[test]
    fn test_handshake_messages_roundtrip() {
        roundtrip(&Message::ConnectionRequestReply(ConnectionRequestReply {
            version: Version::default(),
            client_request_id: 1,
            server_request_id: 2,
        }));
        roundtrip(&Message::ConnectionRequestReplyConfirm(
            ConnectionRequestReplyConfirm {
                client_request_id: 1,
                server_request_id: 2,
                instance_id: 0,
                username: "player".into(),
                password_hash: String::new(),
                server_key: String::new(),
                server_key_timestamp: String::new(),
                core_checksum: 3,
                prototype_list_checksum: 4,
                active_mods: Vec::new(),
                startup_mod_settings: PropertyTree::empty_dictionary(),
            },
        ));
        roundtrip(&Message::ConnectionAcceptOrDeny(sample_accept(
            ConnectionRequestStatus::Valid,
        )));
    }

    #[test]
    fn test_client_peer_info_flags() {
        let info = ClientPeerInfo {
            username: "a".into(),
            map_saving_progress: Some(SmallProgress(5)),
            trying_to_catch_up_progress: Some(SmallProgress(6)),
            ..ClientPeerInfo::default()
        };
        let bytes = crate::codec::encode_to_vec(&info).unwrap();
        assert_eq!(bytes, vec![1, b'a', 0x12, 5, 6]);
        assert_eq!(crate::codec::decode_exact::<ClientPeerInfo>(&bytes).unwrap(), info);
    }

    #[test]
    fn test_transfer_messages() {
        let body = roundtrip(&Message::TransferBlock {
            block_number: 3,
            data: vec![7; TRANSFER_BLOCK_SIZE],
        });
        assert_eq!(body.len(), 4 + TRANSFER_BLOCK_SIZE);
        roundtrip(&Message::TransferBlockRequest { block_number: 3 });
        assert!(roundtrip(&Message::Empty).is_empty());
    }

    #[test]
    fn test_heartbeat_direction_follows_type() {
        let heartbeat = Heartbeat {
            sequence_number: 1,
            tick_closures: vec![TickClosure::empty(5)],
            next_to_receive_server_tick_closure: Some(6),
            ..Heartbeat::default()
        };
        let body = roundtrip(&Message::ClientToServerHeartbeat(heartbeat.clone()));
        let server = Message::ServerToClientHeartbeat(Heartbeat {
            next_to_receive_server_tick_closure: None,
            ..heartbeat
        });
        assert_eq!(roundtrip(&server).len() + 4, body.len());
    }

    #[test]
    fn test_unknown_and_trailing() {
        let err = Message::decode(NetworkMessageType::Ping as u8, &[]).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::UnknownMessageType(0));
        let err = Message::decode(31, &[]).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::UnknownMessageType(31));

        let err = Message::decode(NetworkMessageType::TransferBlockRequest as u8, &[1, 0, 0, 0, 9])
            .unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::TrailingBytes(1));
        assert_eq!(err.offset, 4);
    }
}
