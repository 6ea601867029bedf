//! Host list loading and output files for the model inventory.

use anyhow::{Context, Result};
use serde::Serialize;
use service_check::{split_host_port, ModelReport};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Hosts from a plain list (one per line) or a CSV. CSVs with `Host` and
/// `Open Ports` columns become `host:port`; a lone host column is used as is;
/// anything else contributes its first column.
pub fn load_hosts(path: &Path) -> Result<Vec<String>> {
    let is_csv = path.extension().and_then(|e| e.to_str()).is_some_and(|e| e.eq_ignore_ascii_case("csv"));
    if !is_csv {
        let s = fs::read_to_string(path).with_context(|| format!("reading hosts file {}", path.display()))?;
        return Ok(s.lines().map(str::trim).filter(|l| !l.is_empty() && !l.starts_with('#')).map(String::from).collect());
    }

    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("reading hosts file {}", path.display()))?;
    let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.to_ascii_lowercase()).collect();
    let host_col = headers.iter().position(|h| h == "host");
    let ports_col = headers.iter().position(|h| h == "open ports");

    let mut hosts = Vec::new();
    for row in rdr.records() {
        let row = row?;
        let host = row.get(host_col.unwrap_or(0)).unwrap_or_default();
        if host.is_empty() {
            continue;
        }
        match ports_col.and_then(|i| row.get(i)).filter(|p| !p.is_empty() && host_col.is_some()) {
            Some(ports) => hosts.push(format!("{}:{}", host, ports)),
            None => hosts.push(host.to_string()),
        }
    }
    Ok(hosts)
}

#[derive(Debug, Serialize)]
struct HostModels<'a> {
    host: String,
    port: Option<u16>,
    models: &'a [String],
}

pub fn write_json(path: &Path, reports: &[ModelReport]) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut w, reports)?;
    writeln!(w)?;
    Ok(())
}

pub fn write_csv(path: &Path, reports: &[ModelReport]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["host", "status", "models", "error"])?;
    for r in reports {
        wtr.write_record([
            r.host.as_str(),
            r.status.as_str(),
            r.models.join(";").as_str(),
            r.error.as_deref().unwrap_or_default(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Only hosts that reported at least one model, split into host and port.
pub fn write_filtered(path: &Path, reports: &[ModelReport]) -> Result<usize> {
    let filtered: Vec<HostModels> = reports
        .iter()
        .filter(|r| !r.models.is_empty())
        .map(|r| {
            let (host, port) = split_host_port(&r.host);
            HostModels { host, port, models: &r.models }
        })
        .collect();
    let mut w = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut w, &filtered)?;
    writeln!(w)?;
    Ok(filtered.len())
}
