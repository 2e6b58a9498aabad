//! Benchmark client: one object per simulated connection.
//!
//! Each client drives a fixed count of fixed-size messages through the
//! connection with two logically concurrent chains. The send chain is
//! strictly sequential: send `i + 1` is never issued before send `i`
//! completes. The receive chain reassembles replies by byte count,
//! because the transport makes no promise that a read aligns with a
//! message boundary: a single read may return part of one message or
//! span several.
//!
//! Transport errors on either chain are always fatal for the client:
//! a well-behaved benchmark run controls both ends of the connection,
//! so there is no shutdown-class tolerance here (unlike the server
//! side, where teardown races are expected).

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::defaults;

/// One message's send/receive timestamp pair.
#[derive(Debug, Clone, Copy)]
pub struct MessageSample {
    /// Stamped at the moment the message began transmission.
    pub send: Instant,
    /// Stamped at the moment the reply was fully received.
    pub recv: Instant,
}

impl MessageSample {
    /// Round-trip latency of this message.
    pub fn latency(&self) -> Duration {
        self.recv.duration_since(self.send)
    }
}

/// Finalized measurements for one connection.
#[derive(Debug, Clone)]
pub struct ClientRecord {
    pub begin: Instant,
    pub end: Instant,
    pub samples: Vec<MessageSample>,
}

/// Client-side transport faults.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client send: {0}")]
    Send(#[source] std::io::Error),

    #[error("client recv: {0}")]
    Recv(#[source] std::io::Error),

    /// The server closed the connection before every reply arrived.
    #[error("connection closed after {received} of {expected} replies")]
    ShortReply { received: usize, expected: usize },
}

/// Sequential pipelined echo driver for a single connection.
pub struct BenchmarkClient {
    payload: Arc<[u8]>,
    messages: usize,
}

impl BenchmarkClient {
    pub fn new(payload: Arc<[u8]>, messages: usize) -> Self {
        Self { payload, messages }
    }

    /// Drive the configured message count through the connection and
    /// record one sample per message.
    ///
    /// Records the overall begin timestamp, then runs the send and
    /// receive chains concurrently on the two stream halves. The end
    /// timestamp is stamped by the receive chain when the last reply
    /// completes.
    pub async fn run(self, stream: TcpStream) -> Result<ClientRecord, ClientError> {
        let message_size = self.payload.len();
        let begin = Instant::now();

        let (read_half, write_half) = stream.into_split();
        let (send_times, (recv_times, end)) = tokio::try_join!(
            send_chain(write_half, self.payload, self.messages),
            recv_chain(read_half, message_size, self.messages),
        )?;

        debug!("client finished {} messages", self.messages);

        let samples = send_times
            .into_iter()
            .zip(recv_times)
            .map(|(send, recv)| MessageSample { send, recv })
            .collect();

        Ok(ClientRecord {
            begin,
            end,
            samples,
        })
    }
}

/// Build the payload shared read-only by every message of a client.
///
/// Byte `i` is `'0' + (i % 10)`, so echo fidelity checks can compare
/// content rather than just length.
pub fn build_payload(message_size: usize) -> Arc<[u8]> {
    (0..message_size)
        .map(|i| b'0' + (i % 10) as u8)
        .collect::<Vec<u8>>()
        .into()
}

/// Sequentially send `count` copies of the payload, stamping the send
/// time just before each write is issued.
async fn send_chain<W>(
    mut writer: W,
    payload: Arc<[u8]>,
    count: usize,
) -> Result<Vec<Instant>, ClientError>
where
    W: AsyncWrite + Unpin,
{
    let mut send_times = Vec::with_capacity(count);
    for _ in 0..count {
        send_times.push(Instant::now());
        writer.write_all(&payload).await.map_err(ClientError::Send)?;
    }
    Ok(send_times)
}

/// Consume echoed bytes until `count` whole replies have arrived,
/// stamping a receive time per completed message.
///
/// The cursor is `(index, pending)`: `pending` counts bytes of the
/// current expected reply already consumed, carried across reads so a
/// reply split over several reads still yields exactly one stamp and
/// a read spanning two replies yields two.
async fn recv_chain<R>(
    mut reader: R,
    message_size: usize,
    count: usize,
) -> Result<(Vec<Instant>, Instant), ClientError>
where
    R: AsyncRead + Unpin,
{
    let mut recv_times = Vec::with_capacity(count);
    let mut scratch = vec![0u8; defaults::SCRATCH_SIZE];
    let mut index = 0;
    let mut pending = 0usize;

    while index < count {
        let size = reader.read(&mut scratch).await.map_err(ClientError::Recv)?;
        if size == 0 {
            return Err(ClientError::ShortReply {
                received: index,
                expected: count,
            });
        }
        pending += size;
        while pending >= message_size && index < count {
            recv_times.push(Instant::now());
            pending -= message_size;
            index += 1;
        }
    }

    Ok((recv_times, Instant::now()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn recv_chain_reassembles_split_reads() {
        // A duplex capped at half a message forces every read to return
        // at most message_size / 2 bytes.
        let message_size = 10;
        let (mut tx, rx) = duplex(message_size / 2);

        let feeder = tokio::spawn(async move {
            tx.write_all(&vec![0xAB; message_size * 2]).await.unwrap();
        });

        let (recv_times, _end) = recv_chain(rx, message_size, 2).await.unwrap();
        assert_eq!(recv_times.len(), 2);
        feeder.await.unwrap();
    }

    #[tokio::test]
    async fn recv_chain_does_not_consume_into_next_message() {
        // One and a half messages on the wire, one message expected:
        // exactly one sample, and the chain stops without touching the
        // surplus bytes.
        let message_size = 10;
        let (mut tx, rx) = duplex(64);

        tx.write_all(&vec![1u8; message_size + message_size / 2])
            .await
            .unwrap();

        let (recv_times, _end) = recv_chain(rx, message_size, 1).await.unwrap();
        assert_eq!(recv_times.len(), 1);
    }

    #[tokio::test]
    async fn recv_chain_stamps_once_per_message_on_spanning_read() {
        // Two whole messages delivered by a single large read must
        // still yield two samples.
        let message_size = 8;
        let (mut tx, rx) = duplex(1024);

        tx.write_all(&vec![7u8; message_size * 2]).await.unwrap();

        let (recv_times, _end) = recv_chain(rx, message_size, 2).await.unwrap();
        assert_eq!(recv_times.len(), 2);
    }

    #[tokio::test]
    async fn recv_chain_fails_on_premature_close() {
        let message_size = 10;
        let (mut tx, rx) = duplex(64);

        tx.write_all(&vec![0u8; message_size]).await.unwrap();
        drop(tx);

        let err = recv_chain(rx, message_size, 2).await.unwrap_err();
        match err {
            ClientError::ShortReply { received, expected } => {
                assert_eq!(received, 1);
                assert_eq!(expected, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn send_chain_is_strictly_sequential() {
        let payload = build_payload(16);
        let (tx, mut rx) = duplex(4096);

        let reader = tokio::spawn(async move {
            let mut sink = Vec::new();
            rx.read_to_end(&mut sink).await.unwrap();
            sink
        });

        let send_times = send_chain(tx, Arc::clone(&payload), 5).await.unwrap();
        assert_eq!(send_times.len(), 5);
        // Monotonic clock: successive stamps never move backwards.
        assert!(send_times.windows(2).all(|w| w[0] <= w[1]));

        let sink = reader.await.unwrap();
        assert_eq!(sink.len(), 16 * 5);
        assert_eq!(&sink[..16], &payload[..]);
    }

    #[test]
    fn payload_follows_digit_pattern() {
        let payload = build_payload(12);
        assert_eq!(&payload[..], b"012345678901");
    }
}
