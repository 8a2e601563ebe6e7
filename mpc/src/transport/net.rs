use std::{io, net::SocketAddr, time::Duration};

use futures::{future, stream::FuturesUnordered, StreamExt};
use serde::{de::DeserializeOwned, Serialize};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

use super::{wrap_framed, FramedChannel};

/// Delay in milliseconds after which connection to a peer is retried.
const CONNECTION_RETRY_DELAY: u64 = 1000;

/// Handshake word exchanged before any protocol traffic.
const HANDSHAKE_MAGIC: u32 = 0x53484D52;

/// Framed network channel.
pub type NetChannel<T> = FramedChannel<T, TcpStream>;

/// Establish pairwise connections for a multiparty session.
///
/// `addresses` holds one address per party ordered by index; the slot for
/// `index` itself is the local listen address. Lower-indexed parties dial us,
/// higher-indexed parties are dialed. Returns the channel vector consumed by
/// `ChannelTransport::new` (own slot `None`).
pub async fn connect_parties<T>(
    addresses: &[SocketAddr],
    index: usize,
) -> io::Result<Vec<Option<NetChannel<T>>>>
where
    T: Serialize + DeserializeOwned,
{
    assert!(
        index >= 1 && index <= addresses.len(),
        "party index out of range"
    );

    let listen = listen_for_parties(addresses[index - 1], index - 1);
    let dial = future::try_join_all(
        addresses[index..]
            .iter()
            .map(|&address| dial_party(address, index)),
    );
    let (accepted, dialed) = futures::try_join!(listen, dial)?;

    Ok(accepted
        .into_iter()
        .map(Some)
        .chain(std::iter::once(None))
        .chain(dialed.into_iter().map(Some))
        .map(|socket| socket.map(wrap_framed))
        .collect())
}

/// Listen for incoming connections from the `expected` lower-indexed parties.
async fn listen_for_parties(address: SocketAddr, expected: usize) -> io::Result<Vec<TcpStream>> {
    if expected == 0 {
        return Ok(Vec::new());
    }

    let listener = TcpListener::bind(address).await?;
    let mut handshakes = FuturesUnordered::new();
    let mut connected: Vec<Option<TcpStream>> = (0..expected).map(|_| None).collect();
    let mut remaining = expected;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, _) = accepted?;
                handshakes.push(greet_party(socket, expected));
            },
            done = handshakes.next(), if !handshakes.is_empty() => {
                if let Some(Ok((socket, peer))) = done {
                    if connected[peer - 1].is_none() {
                        connected[peer - 1] = Some(socket);
                        remaining -= 1;
                        if remaining == 0 {
                            break;
                        }
                    }
                }
            },
        }
    }

    Ok(connected.into_iter().map(|socket| socket.unwrap()).collect())
}

/// Handshake an incoming connection and learn the peer's index.
async fn greet_party(mut socket: TcpStream, max_index: usize) -> io::Result<(TcpStream, usize)> {
    if socket.read_u32().await? != HANDSHAKE_MAGIC {
        return Err(io::Error::new(io::ErrorKind::Other, "invalid handshake"));
    }

    let peer = socket.read_u32().await? as usize;
    if peer == 0 || peer > max_index {
        return Err(io::Error::new(io::ErrorKind::Other, "invalid party index"));
    }

    socket.write_u32(HANDSHAKE_MAGIC).await?;
    socket.flush().await?;

    Ok((socket, peer))
}

/// Dial a higher-indexed party, retrying until it is up.
async fn dial_party(address: SocketAddr, index: usize) -> io::Result<TcpStream> {
    let mut socket = loop {
        match TcpStream::connect(address).await {
            Ok(socket) => break socket,
            _ => tokio::time::sleep(Duration::from_millis(CONNECTION_RETRY_DELAY)).await,
        }
    };

    socket.write_u32(HANDSHAKE_MAGIC).await?;
    socket.write_u32(index as u32).await?;
    socket.flush().await?;

    if socket.read_u32().await? != HANDSHAKE_MAGIC {
        return Err(io::Error::new(io::ErrorKind::Other, "invalid handshake"));
    }

    Ok(socket)
}

#[cfg(test)]
mod tests {
    use futures::SinkExt;
    use num_bigint::BigUint;

    use super::*;
    use crate::shamir::SecretShare;
    use crate::transport::ProtocolMessage;

    async fn free_address() -> SocketAddr {
        TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap()
    }

    #[tokio::test]
    async fn test_two_party_handshake() {
        let addresses = vec![free_address().await, free_address().await];

        let (first, second) = futures::try_join!(
            connect_parties::<ProtocolMessage>(&addresses, 1),
            connect_parties::<ProtocolMessage>(&addresses, 2),
        )
        .unwrap();

        let mut first = first;
        let mut second = second;
        assert!(first[0].is_none());
        assert!(second[1].is_none());

        let mut to_second = first[1].take().unwrap();
        let mut from_first = second[0].take().unwrap();

        to_second
            .send(ProtocolMessage::Share {
                id: "x".into(),
                point: SecretShare {
                    x: 2,
                    y: BigUint::from(4u32),
                },
            })
            .await
            .unwrap();

        match from_first.next().await.unwrap().unwrap() {
            ProtocolMessage::Share { id, point } => {
                assert_eq!(id, "x");
                assert_eq!(point.x, 2);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }
}
