//! Core of the sweeper engine: range expansion, checkpointed work queue,
//! bounded worker pool, serialized result sink and progress tracking.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

pub mod checkpoint;
pub mod error;
pub mod pool;
pub mod progress;
pub mod queue;
pub mod range;
pub mod record;
pub mod run;
pub mod sink;

pub use checkpoint::{CheckpointState, CheckpointStore};
pub use error::SweepError;
pub use pool::{run_workers, Completion, Outcome, Probe};
pub use progress::{ProgressTracker, Snapshot};
pub use queue::WorkQueue;
pub use range::{expand, load_ranges, total_len, AddressRange};
pub use record::load_service_targets;
pub use run::{run_stage, RunContext, RunStatus, RunSummary, StageSettings};
pub use sink::ResultSink;

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// How a stage names its targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// Bare address (port sweep).
    Host,
    /// Address plus a known open port (service verification).
    Service,
}

/// A single unit of work: one address, optionally pinned to one port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub host: IpAddr,
    pub port: Option<u16>,
}

impl Target {
    pub fn host(host: IpAddr) -> Self {
        Target { host, port: None }
    }

    pub fn service(host: IpAddr, port: u16) -> Self {
        Target { host, port: Some(port) }
    }

    pub fn kind(&self) -> TargetKind {
        match self.port {
            Some(_) => TargetKind::Service,
            None => TargetKind::Host,
        }
    }

    /// Stable identity used as the checkpoint key: `10.0.0.1` or `10.0.0.1:11434`
    /// (`[::1]:11434` for IPv6).
    pub fn identity(&self) -> String {
        match self.port {
            Some(p) => SocketAddr::new(self.host, p).to_string(),
            None => self.host.to_string(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identity())
    }
}

/// A positive finding: a host and the ports confirmed on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub host: IpAddr,
    pub open_ports: BTreeSet<u16>,
}

impl ScanRecord {
    pub fn new(host: IpAddr, ports: impl IntoIterator<Item = u16>) -> Self {
        ScanRecord { host, open_ports: ports.into_iter().collect() }
    }

    /// Ports as written to the `Open Ports` column.
    pub fn ports_field(&self) -> String {
        self.open_ports.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(",")
    }

    /// Identities of the targets this row stands for under the given scheme.
    pub fn identities(&self, kind: TargetKind) -> Vec<String> {
        match kind {
            TargetKind::Host => vec![Target::host(self.host).identity()],
            TargetKind::Service => self
                .open_ports
                .iter()
                .map(|&p| Target::service(self.host, p).identity())
                .collect(),
        }
    }
}
