//! # TCP Echo Benchmark Library
//!
//! Measures round-trip latency and sustained throughput of a raw TCP
//! echo protocol across configurable numbers of concurrent connections,
//! message counts, and message sizes.
//!
//! ## Architecture Overview
//!
//! The library is organized into a handful of focused modules:
//!
//! - `server`: the echo server: a listener loop on a dedicated pinned
//!   thread, spawning one echo session per accepted connection
//! - `client`: the benchmark client: a strictly sequential send chain
//!   and a byte-counting receive chain per connection
//! - `runner`: orchestration: worker-thread pool sharing one event
//!   loop, barrier-synchronized startup, CPU affinity, fault reporting
//! - `report`: statistics: pooled latency min/max/mean/median and
//!   aggregate MiB/s throughput over the shared timing window
//! - `cli`: command-line parsing and configuration validation
//! - `affinity`: best-effort thread-to-core pinning capability
//!
//! ## Wire Behavior
//!
//! There is no framing and no handshake: a client writes raw payload
//! bytes, the server echoes back byte-for-byte whatever each read
//! returned, and the client reassembles replies by byte count. Reads
//! may span or split message boundaries on both sides.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use echo_bench::{BenchmarkConfig, BenchmarkRunner};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = BenchmarkConfig {
//!         connections: 4,
//!         messages: 1024,
//!         message_size: 4096,
//!         host: "127.0.0.1".to_string(),
//!         port: 0,
//!     };
//!     let report = BenchmarkRunner::new(config).run()?;
//!     println!("{}", report);
//!     Ok(())
//! }
//! ```

pub mod affinity;
pub mod cli;
pub mod client;
pub mod report;
pub mod runner;
pub mod server;

pub use cli::{Args, BenchmarkConfig};
pub use client::{BenchmarkClient, ClientError, ClientRecord, MessageSample};
pub use report::{BenchmarkReport, LatencySummary};
pub use runner::BenchmarkRunner;
pub use server::EchoServer;

/// The current version of the benchmark, from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values.
///
/// These mirror the workload the benchmark was designed around: enough
/// connections and messages for the throughput numbers to stabilize,
/// with a message size that exercises both latency and bandwidth.
pub mod defaults {
    /// Default number of simultaneous connections.
    pub const CONNECTIONS: usize = 20;

    /// Default number of messages per connection.
    pub const MESSAGES: usize = 4096;

    /// Default message size in bytes.
    pub const MESSAGE_SIZE: usize = 4096;

    /// Default address for both the server and the clients.
    pub const HOST: &str = "127.0.0.1";

    /// Default TCP port.
    pub const PORT: u16 = 9000;

    /// Scratch buffer size for session and client reads.
    ///
    /// Reads are reassembled by byte count, so this does not bound the
    /// message size; it only bounds how much one read can return.
    pub const SCRATCH_SIZE: usize = 8 * 1024;
}
