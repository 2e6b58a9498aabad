//! Benchmark orchestration.
//!
//! The runner owns the full lifecycle of a run: it starts the echo
//! server, opens every client connection, builds a multi-threaded
//! event loop shared by all connections, and aggregates the results.
//!
//! ## Synchronized start
//!
//! Worker threads rendezvous at a barrier as they come up, and the
//! last thread to arrive flips a start flag exactly once. Every client
//! task waits on that flag before its first send, so no connection
//! begins measuring while the worker pool is still warming up. Each
//! worker pins itself to its own logical core (worker `k` to core
//! `k + 1`, leaving core 0 to the server thread) before reaching the
//! barrier; a failed pin is a setup error that fails the whole run.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};

use anyhow::{Context, Result};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::affinity;
use crate::cli::BenchmarkConfig;
use crate::client::{self, BenchmarkClient, ClientRecord};
use crate::report::BenchmarkReport;
use crate::server::EchoServer;

/// Drives one complete benchmark run.
pub struct BenchmarkRunner {
    config: BenchmarkConfig,
}

/// Number of client worker threads: one per logical core, minus the
/// core reserved for the server thread, never less than one.
pub fn worker_count() -> usize {
    num_cpus::get().saturating_sub(1).max(1)
}

impl BenchmarkRunner {
    pub fn new(config: BenchmarkConfig) -> Self {
        Self { config }
    }

    /// Run the benchmark to completion and aggregate the report.
    ///
    /// Connections that fail mid-run are logged and excluded from the
    /// report; the run only errors out when setup fails, the server
    /// faults, or no connection completes at all.
    pub fn run(&self) -> Result<BenchmarkReport> {
        let server = EchoServer::start(&self.config.host, self.config.port)?;
        let addr = server.local_addr();
        info!(
            "benchmarking {} connections x {} messages x {} bytes against {}",
            self.config.connections, self.config.messages, self.config.message_size, addr
        );

        // Connect everything up front so the synchronized start only
        // gates the sends, not the connection establishment.
        let mut streams = Vec::with_capacity(self.config.connections);
        for index in 0..self.config.connections {
            let stream = std::net::TcpStream::connect(addr)
                .with_context(|| format!("connect client {} to {}", index, addr))?;
            stream.set_nodelay(true).context("client TCP_NODELAY")?;
            stream
                .set_nonblocking(true)
                .context("client nonblocking")?;
            streams.push(stream);
        }

        let workers = worker_count();
        let pin_error: Arc<Mutex<Option<anyhow::Error>>> = Arc::new(Mutex::new(None));
        let (runtime, started) = build_client_runtime(workers, Arc::clone(&pin_error))?;
        wait_for_workers(&runtime, &started, &pin_error)?;

        let payload = client::build_payload(self.config.message_size);
        let messages = self.config.messages;

        let records = runtime.block_on(async {
            let mut handles = Vec::with_capacity(streams.len());
            for stream in streams {
                handles.push(tokio::spawn(run_client(
                    stream,
                    Arc::clone(&payload),
                    messages,
                    started.clone(),
                )));
            }

            let mut records = Vec::with_capacity(handles.len());
            for (index, handle) in handles.into_iter().enumerate() {
                match handle.await {
                    Ok(Ok(record)) => records.push(record),
                    Ok(Err(err)) => error!("connection {} failed: {:#}", index, err),
                    Err(err) => error!("connection {} task panicked: {}", index, err),
                }
            }
            records
        });

        // Joins the worker threads so no client task can still be
        // touching a socket when the server is told to stop.
        drop(runtime);

        server.stop();
        server.join()?;

        if records.len() < self.config.connections {
            warn!(
                "{} of {} connections completed; report covers the completed subset",
                records.len(),
                self.config.connections
            );
        }

        BenchmarkReport::aggregate(&self.config, &records)
    }
}

/// Build the shared client runtime with pinned, barrier-synchronized
/// worker threads.
///
/// The returned receiver observes the start flag the last worker
/// flips. The thread-start hook also fires for blocking-pool threads,
/// so an arrivals counter limits pinning and the rendezvous to the
/// first `workers` threads.
fn build_client_runtime(
    workers: usize,
    pin_error: Arc<Mutex<Option<anyhow::Error>>>,
) -> Result<(tokio::runtime::Runtime, watch::Receiver<bool>)> {
    let (started_tx, started_rx) = watch::channel(false);
    let started_tx = Arc::new(started_tx);
    let barrier = Arc::new(Barrier::new(workers));
    let arrivals = Arc::new(AtomicUsize::new(0));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .thread_name("bench-worker")
        .enable_all()
        .on_thread_start({
            move || {
                let arrival = arrivals.fetch_add(1, Ordering::SeqCst);
                if arrival >= workers {
                    return;
                }
                // Core 0 belongs to the server thread.
                if let Err(err) = affinity::pin_current_thread(arrival + 1) {
                    if let Ok(mut slot) = pin_error.lock() {
                        slot.get_or_insert(err);
                    }
                }
                if barrier.wait().is_leader() {
                    debug!("all {} workers up, releasing clients", workers);
                    let _ = started_tx.send(true);
                }
            }
        })
        .build()
        .context("client runtime")?;

    Ok((runtime, started_rx))
}

/// Block until every worker has pinned itself and passed the barrier,
/// then surface any recorded pin failure.
///
/// The start flag flips happens-after every worker's pin attempt, so
/// checking here catches a failed pin before a single byte is sent.
fn wait_for_workers(
    runtime: &tokio::runtime::Runtime,
    started: &watch::Receiver<bool>,
    pin_error: &Mutex<Option<anyhow::Error>>,
) -> Result<()> {
    let mut started = started.clone();
    runtime
        .block_on(async move { started.wait_for(|flag| *flag).await.map(|_| ()) })
        .context("start signal lost")?;

    if let Some(err) = pin_error.lock().ok().and_then(|mut slot| slot.take()) {
        return Err(err.context("worker thread affinity"));
    }
    Ok(())
}

/// One connection's task: wait for the synchronized start, then drive
/// the full message exchange.
async fn run_client(
    stream: std::net::TcpStream,
    payload: Arc<[u8]>,
    messages: usize,
    mut started: watch::Receiver<bool>,
) -> Result<ClientRecord> {
    let stream = TcpStream::from_std(stream).context("client stream register")?;

    started
        .wait_for(|flag| *flag)
        .await
        .context("start signal lost")?;

    let client = BenchmarkClient::new(payload, messages);
    let record = client.run(stream).await?;
    Ok(record)
}
