//! Benchmark statistics and the final report.
//!
//! Latencies from every connection are pooled into one sample set
//! before summarizing. The median is the rank-`len / 2` order
//! statistic of that pool, selected in place rather than by sorting,
//! since a full sort buys nothing the benchmark reads.

use std::fmt;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cli::BenchmarkConfig;
use crate::client::ClientRecord;

const MIB: f64 = 1024.0 * 1024.0;

/// Pooled latency order statistics across all connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencySummary {
    pub min: Duration,
    pub max: Duration,
    pub mean: Duration,
    pub median: Duration,
    /// Number of pooled samples the statistics were computed over.
    pub samples: usize,
}

impl LatencySummary {
    /// Summarize a pool of round-trip latencies.
    ///
    /// The pool is consumed: median selection partially reorders it.
    pub fn from_samples(mut pool: Vec<Duration>) -> Result<Self> {
        if pool.is_empty() {
            bail!("no latency samples collected");
        }

        let samples = pool.len();
        let mut min = Duration::MAX;
        let mut max = Duration::ZERO;
        let mut total = Duration::ZERO;
        for &latency in &pool {
            min = min.min(latency);
            max = max.max(latency);
            total += latency;
        }
        let mean = total / samples as u32;

        let mid = samples / 2;
        let (_, &mut median, _) = pool.select_nth_unstable(mid);

        Ok(Self {
            min,
            max,
            mean,
            median,
            samples,
        })
    }
}

/// Final results of one benchmark run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkReport {
    /// When the report was produced.
    pub timestamp: DateTime<Utc>,
    /// Benchmark tool version.
    pub version: String,
    /// The configuration the run executed with.
    pub config: BenchmarkConfig,
    /// Connections that completed their full message count.
    pub completed_connections: usize,
    /// Payload bytes echoed end to end by completed connections.
    pub total_bytes: u64,
    /// Wall-clock span from the earliest connection start to the
    /// latest connection finish.
    pub elapsed: Duration,
    /// Aggregate throughput in MiB per second over the span.
    pub throughput_mib_s: f64,
    pub latency: LatencySummary,
}

impl BenchmarkReport {
    /// Aggregate per-connection records into the final report.
    ///
    /// The elapsed span runs from the earliest `begin` to the latest
    /// `end` across connections, so throughput reflects the whole
    /// overlapping window rather than a sum of per-connection rates.
    pub fn aggregate(config: &BenchmarkConfig, records: &[ClientRecord]) -> Result<Self> {
        if records.is_empty() {
            bail!("no connections completed");
        }

        let begin = records
            .iter()
            .map(|r| r.begin)
            .min()
            .ok_or_else(|| anyhow::anyhow!("no begin timestamps"))?;
        let end = records
            .iter()
            .map(|r| r.end)
            .max()
            .ok_or_else(|| anyhow::anyhow!("no end timestamps"))?;
        let elapsed = end.duration_since(begin);

        let pool: Vec<Duration> = records
            .iter()
            .flat_map(|r| r.samples.iter().map(|s| s.latency()))
            .collect();
        let latency = LatencySummary::from_samples(pool)?;

        let total_bytes =
            records.len() as u64 * config.messages as u64 * config.message_size as u64;
        let seconds = elapsed.as_secs_f64();
        let throughput_mib_s = if seconds > 0.0 {
            total_bytes as f64 / MIB / seconds
        } else {
            0.0
        };

        Ok(Self {
            timestamp: Utc::now(),
            version: crate::VERSION.to_string(),
            config: config.clone(),
            completed_connections: records.len(),
            total_bytes,
            elapsed,
            throughput_mib_s,
            latency,
        })
    }
}

impl fmt::Display for BenchmarkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.1} MiB in {:.3} s, {:.1} MiB/s, \
             min: {:.3} ms, max: {:.3} ms, avg: {:.3} ms, med: {:.3} ms",
            self.total_bytes as f64 / MIB,
            self.elapsed.as_secs_f64(),
            self.throughput_mib_s,
            as_ms(self.latency.min),
            as_ms(self.latency.max),
            as_ms(self.latency.mean),
            as_ms(self.latency.median),
        )
    }
}

fn as_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1e3
}
