//! Echo server: listener loop plus per-connection echo sessions.
//!
//! The entire accept + echo pipeline runs on one dedicated background
//! thread driving a current-thread tokio runtime, pinned to logical
//! core 0 so the server never competes with client workers for a
//! core. Sessions echo whatever arbitrary-length chunk each read
//! returned, verbatim, with no interpretation of content.
//!
//! ## Failure semantics
//!
//! Errors split into two classes. Shutdown-class errors (peer closed,
//! connection reset, end-of-file, or the explicit stop signal) are
//! the expected case when the benchmark ends and sockets are torn
//! down, and end a session or the accept loop silently. Anything else
//! is fatal: the fault is captured by the server loop, becomes the
//! server thread's result, and is re-raised to the caller at
//! [`EchoServer::join`], so a misbehaving session cannot disappear
//! without being surfaced.

use std::io;
use std::net::SocketAddr;
use std::thread::JoinHandle;

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::{affinity, defaults};

/// Classify a transport error as shutdown-class.
///
/// Shutdown-class covers intentional or peer-initiated termination.
/// A broken pipe is deliberately not in this set: a write failing
/// mid-echo is an unexpected fault, not orderly teardown.
pub fn is_shutdown(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
    )
}

/// Echo server handle.
///
/// Owns the bound endpoint and the server thread. `stop()` cancels the
/// in-flight accept; `join()` waits for the thread and re-raises any
/// deferred fault.
pub struct EchoServer {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    thread: Option<JoinHandle<Result<()>>>,
}

impl EchoServer {
    /// Bind the listener and start accepting on a dedicated thread.
    ///
    /// The listener is bound synchronously, so bind failures surface
    /// as setup errors before any thread exists and the endpoint is
    /// connectable as soon as this returns.
    pub fn start(host: &str, port: u16) -> Result<Self> {
        let listener = std::net::TcpListener::bind((host, port))
            .with_context(|| format!("server bind {}:{}", host, port))?;
        listener
            .set_nonblocking(true)
            .context("server listener nonblocking")?;
        let local_addr = listener.local_addr().context("server local addr")?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let thread = std::thread::Builder::new()
            .name("echo-server".to_string())
            .spawn(move || -> Result<()> {
                affinity::pin_current_thread(0).context("server thread affinity")?;
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .context("server runtime")?;
                let (fault_tx, fault_rx) = mpsc::unbounded_channel();
                runtime.block_on(accept_loop(listener, shutdown_rx, fault_tx, fault_rx))
            })
            .context("spawn server thread")?;

        debug!("echo server listening on {}", local_addr);
        Ok(Self {
            local_addr,
            shutdown,
            thread: Some(thread),
        })
    }

    /// The bound address, useful when port 0 selected an ephemeral one.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Cancel the in-flight accept; the loop ends on its next wakeup.
    /// Sessions already spawned drain naturally as their connections
    /// close.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Join the server thread, re-raising any fault the accept loop or
    /// a session deferred.
    pub fn join(mut self) -> Result<()> {
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| anyhow!("server thread panicked"))?,
            None => Ok(()),
        }
    }
}

impl Drop for EchoServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Unbounded accept loop: every completed accept spawns one echo
/// session and immediately re-arms the next accept.
async fn accept_loop(
    listener: std::net::TcpListener,
    mut shutdown: watch::Receiver<bool>,
    fault_tx: mpsc::UnboundedSender<anyhow::Error>,
    mut fault_rx: mpsc::UnboundedReceiver<anyhow::Error>,
) -> Result<()> {
    let listener = TcpListener::from_std(listener).context("server listener register")?;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("echo server stopping");
                return Ok(());
            }
            Some(fault) = fault_rx.recv() => {
                // Becomes the thread's result, re-raised at join().
                return Err(fault);
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted.context("server accept")?;
                debug!("accepted connection from {}", peer);
                stream.set_nodelay(true).context("server TCP_NODELAY")?;
                tokio::spawn(echo_session(stream, fault_tx.clone()));
            }
        }
    }
}

/// Per-connection echo actor.
///
/// Shutdown-class errors end the session silently; anything else is
/// forwarded to the accept loop as a fatal fault.
async fn echo_session(stream: TcpStream, fault_tx: mpsc::UnboundedSender<anyhow::Error>) {
    let (read_half, write_half) = stream.into_split();
    if let Err(err) = echo_loop(read_half, write_half).await {
        forward_session_fault(err, &fault_tx);
    }
}

/// Route a finished session's error: shutdown-class ends quietly,
/// anything else goes to the accept loop as a fatal fault.
fn forward_session_fault(err: io::Error, fault_tx: &mpsc::UnboundedSender<anyhow::Error>) {
    if is_shutdown(&err) {
        debug!("echo session closed: {}", err);
    } else {
        let _ = fault_tx.send(anyhow::Error::new(err).context("server echo session"));
    }
}

/// Chained read → write → read pipeline for one connection.
///
/// The echo write runs on a separate writer task fed through a bounded
/// channel of capacity one, so the next read can be issued while the
/// previous write is still in flight, with at most one read and one
/// write outstanding at any time. The scratch buffer is reused by the next
/// read, so each echo write gets its own copy of the chunk.
async fn echo_loop<R, W>(mut read_half: R, mut write_half: W) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (echo_tx, mut echo_rx) = mpsc::channel::<Vec<u8>>(1);
    let mut writer = tokio::spawn(async move {
        while let Some(chunk) = echo_rx.recv().await {
            write_half.write_all(&chunk).await?;
        }
        Ok::<(), io::Error>(())
    });

    let mut scratch = vec![0u8; defaults::SCRATCH_SIZE];
    loop {
        tokio::select! {
            result = read_half.read(&mut scratch) => {
                let size = result?;
                if size == 0 {
                    // Peer closed; let the writer drain what it holds.
                    break;
                }
                if echo_tx.send(scratch[..size].to_vec()).await.is_err() {
                    // Writer ended first; its result carries the reason.
                    break;
                }
            }
            // Selecting on the writer surfaces a write fault promptly
            // even while the read side is idle.
            result = &mut writer => {
                return flatten_writer(result);
            }
        }
    }

    drop(echo_tx);
    flatten_writer(writer.await)
}

fn flatten_writer(result: Result<io::Result<()>, tokio::task::JoinError>) -> io::Result<()> {
    match result {
        Ok(inner) => inner,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::Other,
            "echo writer task lost",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_classification() {
        for kind in [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::UnexpectedEof,
        ] {
            assert!(is_shutdown(&io::Error::new(kind, "teardown")));
        }
        for kind in [
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::PermissionDenied,
            io::ErrorKind::Other,
        ] {
            assert!(!is_shutdown(&io::Error::new(kind, "fault")));
        }
    }

    struct FailingWriter;

    impl AsyncWrite for FailingWriter {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &[u8],
        ) -> std::task::Poll<io::Result<usize>> {
            std::task::Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "peer vanished",
            )))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn write_fault_ends_the_echo_loop_with_its_error() {
        let (mut tx, rx) = tokio::io::duplex(64);
        tx.write_all(b"payload").await.unwrap();

        let err = echo_loop(rx, FailingWriter).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn session_write_faults_are_forwarded_not_swallowed() {
        let (fault_tx, mut fault_rx) = mpsc::unbounded_channel();

        forward_session_fault(
            io::Error::new(io::ErrorKind::ConnectionReset, "reset"),
            &fault_tx,
        );
        assert!(fault_rx.try_recv().is_err());

        forward_session_fault(
            io::Error::new(io::ErrorKind::BrokenPipe, "pipe"),
            &fault_tx,
        );
        let fault = fault_rx.try_recv().unwrap();
        assert!(format!("{:#}", fault).contains("server echo session"));
        assert!(format!("{:#}", fault).contains("pipe"));
    }

    #[tokio::test]
    async fn deferred_fault_becomes_the_accept_loop_result() {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        listener.set_nonblocking(true).unwrap();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();

        fault_tx.send(anyhow::anyhow!("session fault")).unwrap();

        let err = accept_loop(listener, shutdown_rx, fault_tx, fault_rx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("session fault"));
    }

    #[tokio::test]
    async fn session_echoes_chunks_verbatim() {
        let server = EchoServer::start("127.0.0.1", 0).unwrap();
        let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();

        stream.write_all(b"hello").await.unwrap();
        let mut reply = [0u8; 5];
        stream.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"hello");

        drop(stream);
        server.stop();
        server.join().unwrap();
    }
}
