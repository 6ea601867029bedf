//! TCP connect probing of one host over a port set, with timeouts and retries.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::{thread_rng, Rng};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use sweeper_core::{Outcome, Probe, Target};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::trace;

/// Parse a comma-separated list of ports/ranges (e.g., "11434", "8000-8002,11434").
pub fn parse_ports(spec: &str) -> Result<Vec<u16>> {
    let mut ports = Vec::new();
    for part in spec.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
        if let Some((start, end)) = part.split_once('-') {
            let s: u16 = start.parse()?;
            let e: u16 = end.parse()?;
            if s == 0 || e == 0 || s > e {
                return Err(anyhow!("invalid port range: {}", part));
            }
            ports.extend(s..=e);
        } else {
            let p: u16 = part.parse()?;
            if p == 0 {
                return Err(anyhow!("invalid port: {}", part));
            }
            ports.push(p);
        }
    }
    if ports.is_empty() {
        return Err(anyhow!("no ports in {:?}", spec));
    }
    ports.sort_unstable();
    ports.dedup();
    Ok(ports)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    Open,
    /// Actively refused.
    Closed,
    /// No answer within the retry budget.
    Filtered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostState {
    /// Ports that accepted a connection, ascending.
    Open(Vec<u16>),
    /// Host answered, every port refused.
    Closed,
    /// Nothing answered.
    Unreachable,
}

#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub timeout: Duration,
    /// Extra attempts after the first one for ports that do not answer.
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        ProbeOptions { timeout: Duration::from_secs(2), retries: 2, retry_delay: Duration::from_millis(500) }
    }
}

/// Connect to one port. Refusal is final; silence and other errors are retried.
pub async fn probe_port(addr: SocketAddr, opts: &ProbeOptions) -> PortState {
    let mut attempts = 0;
    loop {
        match timeout(opts.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => return PortState::Open,
            Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => return PortState::Closed,
            Ok(Err(e)) => trace!(%addr, attempt = attempts, error = %e, "connect failed"),
            Err(_) => trace!(%addr, attempt = attempts, "connect timed out"),
        }
        attempts += 1;
        if attempts > opts.retries {
            return PortState::Filtered;
        }
        let base = opts.retry_delay.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << attempts.min(6)); // cap growth
        let jitter = thread_rng().gen_range(0..(exp / 4 + 1));
        tokio::time::sleep(Duration::from_millis(exp + jitter)).await;
    }
}

/// Probe every port of `ip` concurrently and classify the host.
pub async fn probe_host(ip: IpAddr, ports: &[u16], opts: &ProbeOptions) -> HostState {
    let (tx, mut rx) = mpsc::channel::<(u16, PortState)>(ports.len().max(1));
    for &port in ports {
        let tx = tx.clone();
        let opts = opts.clone();
        tokio::spawn(async move {
            let state = probe_port(SocketAddr::new(ip, port), &opts).await;
            let _ = tx.send((port, state)).await;
        });
    }
    drop(tx);

    let mut open = Vec::new();
    let mut refused = false;
    while let Some((port, state)) = rx.recv().await {
        match state {
            PortState::Open => open.push(port),
            PortState::Closed => refused = true,
            PortState::Filtered => {}
        }
    }
    if !open.is_empty() {
        open.sort_unstable();
        HostState::Open(open)
    } else if refused {
        HostState::Closed
    } else {
        HostState::Unreachable
    }
}

/// Port sweep check for host targets.
#[derive(Debug, Clone)]
pub struct PortSweepProbe {
    ports: Vec<u16>,
    opts: ProbeOptions,
}

impl PortSweepProbe {
    pub fn new(ports: Vec<u16>, opts: ProbeOptions) -> Self {
        PortSweepProbe { ports, opts }
    }
}

#[async_trait]
impl Probe for PortSweepProbe {
    async fn check(&self, target: &Target) -> Outcome {
        let ports = match target.port {
            Some(p) => vec![p],
            None => self.ports.clone(),
        };
        match probe_host(target.host, &ports, &self.opts).await {
            HostState::Open(open) => Outcome::found(open),
            HostState::Closed => Outcome::Closed,
            HostState::Unreachable => Outcome::Unreachable,
        }
    }
}
