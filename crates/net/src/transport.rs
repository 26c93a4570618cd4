//! UDP transport: frames outgoing messages and reassembles incoming ones.
//!
//! [`MessageCodec`] holds all per-connection state and never touches a socket,
//! so it can be fed datagrams directly. [`UdpTransport`] drives it over a
//! connected tokio socket.

use crate::error::{DecodeError, EncodeError, TransportError};
use crate::fragment::{fragment, MessageIdCounter, Reassembler};
use crate::frame::Frame;
use crate::message::Message;
use rand::Rng;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::UdpSocket;
use tracing::{debug, info, trace, warn};

/// Body bytes carried by one outgoing frame before fragmenting.
pub const DEFAULT_MAX_FRAGMENT_PAYLOAD: usize = 500;
/// Receive buffer size; larger than any datagram the protocol produces.
const RECV_BUFFER_SIZE: usize = 2048;

/// Traffic notification passed to a registered observer.
#[derive(Debug)]
pub enum TransportEvent<'a> {
    /// A datagram parsed into a frame.
    FrameReceived {
        /// The frame.
        frame: &'a Frame,
        /// Raw datagram.
        data: &'a [u8],
    },
    /// A complete message was decoded.
    MessageReceived {
        /// The message.
        message: &'a Message,
        /// Reassembled body bytes.
        body: &'a [u8],
    },
    /// A frame is about to be written to the socket.
    FrameSent {
        /// The frame.
        frame: &'a Frame,
        /// Encoded datagram.
        data: &'a [u8],
    },
    /// A message was serialized for sending.
    MessageSent {
        /// The message.
        message: &'a Message,
        /// Encoded body bytes.
        body: &'a [u8],
    },
    /// Inbound data could not be decoded and was dropped.
    DecodeFailed {
        /// What went wrong.
        error: &'a DecodeError,
        /// Bytes that failed to decode.
        data: &'a [u8],
    },
}

/// Callback receiving [`TransportEvent`]s.
pub type Observer = Box<dyn FnMut(&TransportEvent<'_>) + Send>;

/// Outcome of processing inbound data.
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    /// A complete, well-formed message.
    Message(Message),
    /// A datagram or reassembled body that failed to decode; it was dropped.
    Malformed(DecodeError),
}

/// Sans-IO framing state of one connection.
pub struct MessageCodec {
    reassembler: Reassembler,
    message_ids: MessageIdCounter,
    max_fragment_payload: usize,
    observer: Option<Observer>,
}

impl std::fmt::Debug for MessageCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageCodec")
            .field("reassembler", &self.reassembler)
            .field("message_ids", &self.message_ids)
            .field("max_fragment_payload", &self.max_fragment_payload)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAGMENT_PAYLOAD)
    }
}

impl MessageCodec {
    /// Codec splitting bodies above `max_fragment_payload` bytes.
    pub fn new(max_fragment_payload: usize) -> Self {
        Self {
            reassembler: Reassembler::new(),
            message_ids: MessageIdCounter::default(),
            max_fragment_payload,
            observer: None,
        }
    }

    /// Register the traffic observer, replacing any previous one.
    pub fn set_observer(&mut self, observer: Observer) {
        self.observer = Some(observer);
    }

    /// Forget partial fragments, finished ids and the message id sequence.
    pub fn reset(&mut self) {
        self.reassembler.clear();
        self.message_ids = MessageIdCounter::default();
    }

    fn notify(&mut self, event: TransportEvent<'_>) {
        if let Some(observer) = self.observer.as_mut() {
            observer(&event);
        }
    }

    /// Process one inbound datagram.
    ///
    /// Returns `None` while a fragmented message is still incomplete.
    pub fn handle_datagram(&mut self, data: &[u8]) -> Option<Received> {
        let frame = match Frame::decode(data) {
            Ok(frame) => frame,
            Err(error) => {
                debug!("Dropping malformed frame: {}", error);
                self.notify(TransportEvent::DecodeFailed { error: &error, data });
                return Some(Received::Malformed(error));
            }
        };
        self.notify(TransportEvent::FrameReceived { frame: &frame, data });

        let (message_type, body) = if frame.fragmented {
            trace!(
                "Fragment {} of message {} ({} bytes)",
                frame.fragment_number,
                frame.message_id,
                frame.payload.len()
            );
            self.reassembler.push(frame)?
        } else {
            (frame.message_type, frame.payload)
        };

        match Message::decode(message_type, &body) {
            Ok(message) => {
                self.notify(TransportEvent::MessageReceived {
                    message: &message,
                    body: &body,
                });
                Some(Received::Message(message))
            }
            Err(error) => {
                debug!("Dropping undecodable message type {}: {}", message_type, error);
                self.notify(TransportEvent::DecodeFailed {
                    error: &error,
                    data: &body,
                });
                Some(Received::Malformed(error))
            }
        }
    }

    /// Serialize a message into the datagrams to send, in order.
    pub fn encode_message(&mut self, message: &Message) -> Result<Vec<Vec<u8>>, EncodeError> {
        let message_type = message.message_type();
        let body = message.encode_body()?;
        self.notify(TransportEvent::MessageSent {
            message,
            body: &body,
        });

        let needs_id =
            body.len() > self.max_fragment_payload || message_type.always_has_message_id();
        let message_id = if needs_id { self.message_ids.next_id() } else { 0 };

        let frames = fragment(message_type, body, message_id, self.max_fragment_payload)?;
        let mut rng = rand::thread_rng();
        let mut datagrams = Vec::with_capacity(frames.len());
        for mut frame in frames {
            frame.random = rng.gen();
            let data = frame.encode()?;
            self.notify(TransportEvent::FrameSent {
                frame: &frame,
                data: &data,
            });
            datagrams.push(data);
        }
        Ok(datagrams)
    }
}

/// Connected UDP socket speaking the frame protocol.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    peer_addr: SocketAddr,
    codec: MessageCodec,
    recv_buffer: Box<[u8]>,
}

impl UdpTransport {
    /// Bind an ephemeral local port and connect it to `peer_addr`.
    pub async fn connect(
        peer_addr: SocketAddr,
        max_fragment_payload: usize,
    ) -> Result<Self, TransportError> {
        info!("Opening UDP transport to {}", peer_addr);
        let local = if peer_addr.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer_addr).await?;
        debug!("UDP transport bound to {}", socket.local_addr()?);

        Ok(Self {
            socket,
            peer_addr,
            codec: MessageCodec::new(max_fragment_payload),
            recv_buffer: vec![0; RECV_BUFFER_SIZE].into_boxed_slice(),
        })
    }

    /// Local socket address.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    /// Remote address datagrams are sent to.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Register the traffic observer.
    pub fn set_observer(&mut self, observer: Observer) {
        self.codec.set_observer(observer);
    }

    /// Clear per-connection framing state.
    pub fn reset(&mut self) {
        self.codec.reset();
    }

    /// Send a message without waiting.
    ///
    /// Datagrams the socket cannot take right now are dropped like any other
    /// lost packet.
    pub fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        for datagram in self.codec.encode_message(message)? {
            match self.socket.try_send(&datagram) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    warn!(
                        "Socket buffer full, dropping {} byte datagram to {}",
                        datagram.len(),
                        self.peer_addr
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Wait for the next complete message or malformed datagram.
    pub async fn recv(&mut self) -> Result<Received, TransportError> {
        loop {
            let len = self.socket.recv(&mut self.recv_buffer).await?;
            if let Some(received) = self.codec.handle_datagram(&self.recv_buffer[..len]) {
                return Ok(received);
            }
        }
    }
}
