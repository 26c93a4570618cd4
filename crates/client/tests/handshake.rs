//! Handshake and join against a scripted loopback server.

use facnet_client::{Client, ClientConfig, ClientError, ClientEvent};
use facnet_net::input::PlayerJoinGameData;
use facnet_net::synchronizer::MapReadyForDownloadData;
use facnet_net::{
    ClientMultiplayerState, ClientsPeerInfo, ConnectionAcceptOrDeny, ConnectionRequestReply,
    ConnectionRequestStatus, DisconnectReason, Frame, Heartbeat, InputAction, InputActionData,
    InputActionType, Message, MessageCodec, PropertyTree, Received, SynchronizerAction,
    SynchronizerActionData, TickClosure, Version,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};

const PEER: u16 = 3;
const WAIT: Duration = Duration::from_secs(5);

struct FakeServer {
    socket: UdpSocket,
    codec: MessageCodec,
    client: Option<SocketAddr>,
}

impl FakeServer {
    async fn bind() -> Self {
        Self {
            socket: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
            codec: MessageCodec::new(config().max_fragment_payload),
            client: None,
        }
    }

    fn addr(&self) -> SocketAddr {
        self.socket.local_addr().unwrap()
    }

    async fn recv(&mut self) -> Message {
        let mut buf = [0u8; 2048];
        loop {
            let (len, from) = self.socket.recv_from(&mut buf).await.unwrap();
            self.client = Some(from);
            let frame = Frame::decode(&buf[..len]).unwrap();
            assert!(!frame.fragmented, "client split a small message: {:?}", frame);
            if let Some(Received::Message(message)) = self.codec.handle_datagram(&buf[..len]) {
                return message;
            }
        }
    }

    async fn recv_heartbeat(&mut self, mut wanted: impl FnMut(&Heartbeat) -> bool) -> Heartbeat {
        loop {
            if let Message::ClientToServerHeartbeat(heartbeat) = self.recv().await {
                if wanted(&heartbeat) {
                    return heartbeat;
                }
            }
        }
    }

    async fn send(&mut self, message: Message) {
        let client = self.client.expect("no client seen yet");
        for datagram in self.codec.encode_message(&message).unwrap() {
            self.socket.send_to(&datagram, client).await.unwrap();
        }
    }

    /// Answer request and confirm, then hand out `status`.
    async fn handshake(&mut self, status: ConnectionRequestStatus) {
        let request = match self.recv().await {
            Message::ConnectionRequest(request) => request,
            other => panic!("expected a connection request, got {:?}", other),
        };
        self.send(Message::ConnectionRequestReply(ConnectionRequestReply {
            version: Version::default(),
            client_request_id: request.client_request_id,
            server_request_id: 0xabcd,
        }))
        .await;

        match self.recv().await {
            Message::ConnectionRequestReplyConfirm(confirm) => {
                assert_eq!(confirm.client_request_id, request.client_request_id);
                assert_eq!(confirm.server_request_id, 0xabcd);
                assert_eq!(confirm.username, "tester");
            }
            other => panic!("expected a confirm, got {:?}", other),
        }

        self.send(Message::ConnectionAcceptOrDeny(ConnectionAcceptOrDeny {
            client_request_id: request.client_request_id,
            status,
            game_name: "loopback".into(),
            server_hash: String::new(),
            description: String::new(),
            latency: 2,
            max_updates_per_second: 60,
            game_id: 1,
            steam_id: [0; 8],
            clients_peer_info: ClientsPeerInfo::default(),
            first_sequence_number_to_expect: 0,
            first_sequence_number_to_send: 0,
            new_peer_id: PEER,
            active_mods: Vec::new(),
            startup_mod_settings: PropertyTree::empty_dictionary(),
            paused_by: 0,
        }))
        .await;
    }
}

fn config() -> ClientConfig {
    ClientConfig {
        player_name: "tester".into(),
        ..ClientConfig::default()
    }
}

fn join_world() -> Heartbeat {
    let join = InputAction::new(
        InputActionType::PlayerJoinGame,
        5,
        InputActionData::PlayerJoinGame(PlayerJoinGameData {
            peer_id: PEER,
            player_index: 5,
            force_id: 1,
            username: "tester".into(),
            as_editor: false,
            admin: false,
        }),
    );
    Heartbeat {
        sequence_number: 0,
        tick_closures: vec![TickClosure {
            update_tick: 100,
            input_actions: vec![join],
            input_action_segments: Vec::new(),
        }],
        next_to_receive_server_tick_closure: None,
        synchronizer_actions: vec![
            SynchronizerAction::server(
                SynchronizerActionData::MapReadyForDownload(MapReadyForDownloadData {
                    update_tick: 100,
                    ..MapReadyForDownloadData::default()
                }),
                PEER,
            ),
            SynchronizerAction::server(
                SynchronizerActionData::ClientShouldStartSendingTickClosures { first_tick: 102 },
                PEER,
            ),
        ],
        requests_for_heartbeat: Vec::new(),
    }
}

#[tokio::test]
async fn test_refused_connection() {
    let mut server = FakeServer::bind().await;
    let addr = server.addr();
    let script = tokio::spawn(async move {
        server
            .handshake(ConnectionRequestStatus::PrototypeChecksumMismatch)
            .await;
    });

    let (mut client, mut events) = Client::new(config());
    let err = timeout(WAIT, client.connect(addr)).await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        ClientError::ConnectionRefused {
            status: ConnectionRequestStatus::PrototypeChecksumMismatch
        }
    ));
    assert_eq!(err.to_string(), "PrototypeChecksumMismatch");
    assert_eq!(client.state(), ClientMultiplayerState::Ready);
    script.await.unwrap();

    let mut saw_error = false;
    while let Ok(event) = events.try_recv() {
        saw_error |= matches!(event, ClientEvent::Error(ClientError::ConnectionRefused { .. }));
    }
    assert!(saw_error);
}

#[tokio::test]
async fn test_join_and_leave() {
    let mut server = FakeServer::bind().await;
    let addr = server.addr();
    let script = tokio::spawn(async move {
        server.handshake(ConnectionRequestStatus::Valid).await;
        server.recv_heartbeat(|_| true).await;
        server
            .send(Message::ServerToClientHeartbeat(join_world()))
            .await;
        let first_closures = server
            .recv_heartbeat(|heartbeat| !heartbeat.tick_closures.is_empty())
            .await;
        (server, first_closures)
    });

    let (mut client, mut events) = Client::new(config());
    let player_index = timeout(WAIT, client.connect(addr)).await.unwrap().unwrap();
    assert_eq!(player_index, 5);
    assert_eq!(client.state(), ClientMultiplayerState::InGame);
    assert_eq!(client.session().peer_id(), Some(PEER));

    let (mut server, heartbeat) = timeout(WAIT, script).await.unwrap().unwrap();
    assert_eq!(heartbeat.tick_closures[0].update_tick, 102);
    assert_eq!(heartbeat.next_to_receive_server_tick_closure, Some(101));

    client.close();
    let goodbye = timeout(
        WAIT,
        server.recv_heartbeat(is_quit),
    )
    .await
    .unwrap();
    assert!(goodbye.tick_closures.is_empty());

    let mut joined = false;
    let mut closed = false;
    while let Ok(event) = events.try_recv() {
        joined |= matches!(event, ClientEvent::JoinedGame { player_index: 5 });
        closed |= matches!(event, ClientEvent::Closed);
    }
    assert!(joined);
    assert!(closed);
}

#[tokio::test]
async fn test_cancelled_connect_resets_client() {
    let server = FakeServer::bind().await;
    let (mut client, _events) = Client::new(config());
    let attempt = timeout(Duration::from_millis(100), client.connect(server.addr())).await;
    assert!(attempt.is_err());
    assert_eq!(client.state(), ClientMultiplayerState::Ready);
    assert!(client.local_addr().is_none());
}

#[tokio::test]
async fn test_connect_timeout() {
    let server = FakeServer::bind().await;
    let (mut client, _events) = Client::new(ClientConfig {
        connect_timeout_ms: 100,
        ..config()
    });
    let err = client.connect(server.addr()).await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout));
    assert_eq!(client.state(), ClientMultiplayerState::Ready);
}

fn is_quit(heartbeat: &Heartbeat) -> bool {
    heartbeat.synchronizer_actions.iter().any(|action| {
        action.data
            == SynchronizerActionData::PeerDisconnect {
                reason: DisconnectReason::Quit,
            }
    })
}

#[tokio::test(start_paused = true)]
async fn test_connect_gives_up_after_configured_time() {
    let server = FakeServer::bind().await;
    let (mut client, _events) = Client::new(ClientConfig {
        connect_timeout_ms: 3_000,
        ..config()
    });

    let started = Instant::now();
    let err = client.connect(server.addr()).await.unwrap_err();
    let waited = started.elapsed();
    assert!(matches!(err, ClientError::Timeout));
    assert!(waited >= Duration::from_secs(3), "gave up after {:?}", waited);
    assert!(waited < Duration::from_millis(3_100), "gave up after {:?}", waited);
    assert_eq!(client.state(), ClientMultiplayerState::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeats_follow_the_configured_interval() {
    let mut server = FakeServer::bind().await;
    let addr = server.addr();
    let script = tokio::spawn(async move {
        server.handshake(ConnectionRequestStatus::Valid).await;
        let mut heartbeats = Vec::new();
        loop {
            let heartbeat = server.recv_heartbeat(|_| true).await;
            let quit = is_quit(&heartbeat);
            heartbeats.push((Instant::now(), heartbeat));
            if quit {
                return heartbeats;
            }
        }
    });

    // Accepted but never given a player, so the attempt runs into the timeout
    // while heartbeating.
    let (mut client, _events) = Client::new(ClientConfig {
        heartbeat_interval_us: 50_000,
        connect_timeout_ms: 1_000,
        ..config()
    });
    let err = client.connect(addr).await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout));

    let mut heartbeats = timeout(WAIT, script).await.unwrap().unwrap();
    let (_, last) = heartbeats.pop().unwrap();
    assert!(is_quit(&last));
    assert!(
        (14..=21).contains(&heartbeats.len()),
        "{} heartbeats in one second",
        heartbeats.len()
    );
    for pair in heartbeats.windows(2) {
        let ((earlier, first), (later, second)) = (&pair[0], &pair[1]);
        assert_eq!(second.sequence_number, first.sequence_number + 1);
        assert!(*later - *earlier <= Duration::from_millis(100));
    }
    let span = heartbeats[heartbeats.len() - 1].0 - heartbeats[0].0;
    assert!(span >= Duration::from_millis(50) * (heartbeats.len() as u32 - 2));
}
