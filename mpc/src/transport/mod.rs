pub mod net;

use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::sync::mpsc;
use tokio_serde::formats::Bincode;
use tokio_util::codec::LengthDelimitedCodec;
use tracing::warn;

use crate::shamir::SecretShare;

/// Message exchanged between parties, dispatched by variant on receipt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ProtocolMessage {
    /// A share of the identified value: the receiver's own share when
    /// `point.x` equals the receiver index, otherwise an opened share
    /// contributed towards reconstruction.
    Share { id: String, point: SecretShare },
    /// Re-share of a local product for multiplication degree reduction.
    Product {
        id: String,
        issuer: usize,
        point: SecretShare,
    },
    /// Contribution to the joint random field element of the random-bit
    /// sub-protocol.
    RandomElement {
        id: String,
        iteration: u32,
        point: SecretShare,
    },
    /// Degree-2t share of the square of the joint random element.
    SquaredElement {
        id: String,
        iteration: u32,
        point: SecretShare,
    },
}

/// Message delivered to a party engine together with the sender index.
pub type Envelope = (usize, ProtocolMessage);

/// Abstract message carrier between parties.
///
/// `send` never blocks the caller. Delivery happens asynchronously, including
/// self-sends, which go through the receiving party's inbox like any other
/// message.
pub trait Transport: Send + Sync {
    fn send(&self, receiver: usize, message: ProtocolMessage);
}

/// Length-framed bincode-encoded message channel.
pub type FramedChannel<T, C> =
    tokio_serde::Framed<tokio_util::codec::Framed<C, LengthDelimitedCodec>, T, T, Bincode<T, T>>;

/// Length-framed bincode-encoded tokio duplex stream.
pub type FramedDuplex<T> = FramedChannel<T, DuplexStream>;

/// Wrap an AsyncRead/Write byte stream into a framed message channel.
pub fn wrap_framed<T, C>(channel: C) -> FramedChannel<T, C>
where
    C: AsyncRead + AsyncWrite,
{
    let length_delimited = tokio_util::codec::Framed::new(channel, LengthDelimitedCodec::new());
    tokio_serde::Framed::new(length_delimited, Bincode::default())
}

/// Create a bidirectional in-process message channel.
pub fn framed_duplex<T>(max_buf_size: usize) -> (FramedDuplex<T>, FramedDuplex<T>) {
    let (a, b) = tokio::io::duplex(max_buf_size);
    (wrap_framed(a), wrap_framed(b))
}

/// Create pairwise in-process channels for `parties` parties.
///
/// Row `x - 1` holds party x's channels; the slot for the party itself is
/// `None` (self-sends bypass the wire).
pub fn duplex_matrix<T>(parties: usize, max_buf_size: usize) -> Vec<Vec<Option<FramedDuplex<T>>>> {
    let mut matrix: Vec<Vec<_>> = (0..parties)
        .map(|_| (0..parties).map(|_| None).collect())
        .collect();

    for i in 0..parties {
        for j in 0..i {
            let (a, b) = framed_duplex::<T>(max_buf_size);
            matrix[i][j] = Some(a);
            matrix[j][i] = Some(b);
        }
    }

    matrix
}

/// Transport over per-peer duplex channels.
///
/// A writer task per peer drains an unbounded outbox into the framed sink; a
/// reader task per peer pushes every inbound message into the party inbox
/// tagged with the peer index. The returned inbox receiver is pumped into
/// `PartyEngine::handle` by the caller.
pub struct ChannelTransport {
    index: usize,
    outboxes: Vec<Option<mpsc::UnboundedSender<ProtocolMessage>>>,
    inbox: mpsc::UnboundedSender<Envelope>,
}

impl ChannelTransport {
    /// Wire a party into its peer channels. `channels` is indexed by peer
    /// (slot x-1 for party x); every slot except the party's own must be
    /// present. Must be called within a tokio runtime.
    pub fn new<C, E>(
        channels: Vec<Option<C>>,
        index: usize,
    ) -> (Self, mpsc::UnboundedReceiver<Envelope>)
    where
        C: Stream<Item = Result<ProtocolMessage, E>> + Sink<ProtocolMessage> + Send + Unpin + 'static,
    {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let mut outboxes = Vec::with_capacity(channels.len());

        for (slot, channel) in channels.into_iter().enumerate() {
            let peer = slot + 1;
            let channel = match channel {
                Some(channel) => channel,
                None => {
                    assert_eq!(peer, index, "channel missing for party {}", peer);
                    outboxes.push(None);
                    continue;
                }
            };

            let (mut sink, mut stream) = channel.split();
            let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<ProtocolMessage>();
            outboxes.push(Some(outbox_tx));

            tokio::spawn(async move {
                while let Some(message) = outbox_rx.recv().await {
                    if sink.send(message).await.is_err() {
                        warn!(peer, "outbound channel closed");
                        break;
                    }
                }
            });

            let inbox = inbox_tx.clone();
            tokio::spawn(async move {
                while let Some(next) = stream.next().await {
                    match next {
                        Ok(message) => {
                            if inbox.send((peer, message)).is_err() {
                                break;
                            }
                        }
                        Err(_) => {
                            warn!(peer, "inbound channel closed");
                            break;
                        }
                    }
                }
            });
        }

        let transport = Self {
            index,
            outboxes,
            inbox: inbox_tx,
        };
        (transport, inbox_rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, receiver: usize, message: ProtocolMessage) {
        if receiver == self.index {
            // Loopback delivery stays asynchronous: the message queues behind
            // whatever the pump is already processing.
            let _ = self.inbox.send((self.index, message));
            return;
        }

        let outbox = self.outboxes[receiver - 1]
            .as_ref()
            .unwrap_or_else(|| panic!("no channel for party {}", receiver));
        if outbox.send(message).is_err() {
            warn!(receiver, "dropping message for disconnected party");
        }
    }
}
