//! `Host,Open Ports` CSV rows: the output format of every stage and the
//! input of service verification.

use crate::error::SweepError;
use crate::{ScanRecord, Target};
use serde::Deserialize;
use std::io::Read;
use std::net::IpAddr;
use std::path::Path;

pub const HEADER: [&str; 2] = ["Host", "Open Ports"];

#[derive(Debug, Deserialize)]
struct Row {
    #[serde(rename = "Host")]
    host: String,
    #[serde(rename = "Open Ports")]
    ports: String,
}

fn parse_row(row: &Row) -> Result<ScanRecord, String> {
    let host: IpAddr = row.host.trim().parse().map_err(|_| format!("bad host {:?}", row.host))?;
    let mut ports = Vec::new();
    for part in row.ports.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let p: u16 = part.parse().map_err(|_| format!("bad port {:?} for {}", part, host))?;
        if p == 0 {
            return Err(format!("bad port 0 for {}", host));
        }
        ports.push(p);
    }
    if ports.is_empty() {
        return Err(format!("no ports listed for {}", host));
    }
    Ok(ScanRecord::new(host, ports))
}

fn rows<R: Read>(reader: R) -> impl Iterator<Item = Result<ScanRecord, String>> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader)
        .into_deserialize::<Row>()
        .enumerate()
        .map(|(i, row)| {
            row.map_err(|e| e.to_string())
                .and_then(|row| parse_row(&row))
                .map_err(|e| format!("row {}: {}", i + 1, e))
        })
}

/// Read every row of a results CSV; the first bad row fails the whole read.
pub fn read_records<R: Read>(reader: R) -> Result<Vec<ScanRecord>, String> {
    rows(reader).collect()
}

/// Every parsable row, plus a description of each row that was skipped.
pub fn read_valid_records<R: Read>(reader: R) -> (Vec<ScanRecord>, Vec<String>) {
    let mut good = Vec::new();
    let mut bad = Vec::new();
    for row in rows(reader) {
        match row {
            Ok(rec) => good.push(rec),
            Err(e) => bad.push(e),
        }
    }
    (good, bad)
}

/// Load port-sweep results as service targets, one per listed port.
/// Rows keep file order; ports within a row are ascending.
pub fn load_service_targets(path: &Path) -> Result<Vec<Target>, SweepError> {
    let file_err = |reason: String| SweepError::TargetFile { path: path.to_path_buf(), reason };
    let file = std::fs::File::open(path).map_err(|e| file_err(e.to_string()))?;
    let records = read_records(file).map_err(file_err)?;
    let mut targets = Vec::new();
    for rec in records {
        targets.extend(rec.open_ports.iter().map(|&p| Target::service(rec.host, p)));
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_quoted_multi_port_rows() {
        let data = "Host,Open Ports\n10.0.0.1,11434\n10.0.0.2,\"80,11434\"\n";
        let recs = read_records(data.as_bytes()).unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[1].ports_field(), "80,11434");
    }

    #[test]
    fn rejects_garbage() {
        assert!(read_records("Host,Open Ports\nnot-an-ip,11434\n".as_bytes()).is_err());
        assert!(read_records("Host,Open Ports\n10.0.0.1,\n".as_bytes()).is_err());
        assert!(read_records("Address\n10.0.0.1\n".as_bytes()).is_err());
    }

    #[test]
    fn valid_rows_survive_bad_neighbours() {
        let data = "Host,Open Ports\n10.0.0.1,11434\n10.0.0.,\n10.0.0.2,\"80,11434\"\n";
        let (good, bad) = read_valid_records(data.as_bytes());
        assert_eq!(good.iter().map(|r| r.host.to_string()).collect::<Vec<_>>(), vec!["10.0.0.1", "10.0.0.2"]);
        assert_eq!(bad.len(), 1);
        assert!(bad[0].starts_with("row 2:"));
    }

    #[test]
    fn service_targets_expand_ports() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep_results.csv");
        std::fs::write(&path, "Host,Open Ports\n10.0.0.3,11434\n10.0.0.1,\"8080,11434\"\n").unwrap();
        let ids: Vec<String> = load_service_targets(&path).unwrap().iter().map(Target::identity).collect();
        assert_eq!(ids, vec!["10.0.0.3:11434", "10.0.0.1:8080", "10.0.0.1:11434"]);
        assert!(load_service_targets(&dir.path().join("nope.csv")).unwrap_err().is_input());
    }
}
