//! The single owner of the results CSV and the checkpoint state.

use crate::checkpoint::{CheckpointState, CheckpointStore};
use crate::error::SweepError;
use crate::pool::Outcome;
use crate::record::{read_valid_records, HEADER};
use crate::{ScanRecord, Target, TargetKind};
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// What [`ResultSink::record`] did with a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// Positive outcome, row appended.
    Row,
    /// Negative outcome, only marked processed.
    Marked,
    /// Identity was already processed; nothing written.
    Duplicate,
}

pub struct ResultSink {
    kind: TargetKind,
    store: CheckpointStore,
    state: CheckpointState,
    out: File,
    /// Length of the output up to the last complete row.
    out_len: u64,
    output_path: PathBuf,
    save_every: u64,
    since_save: u64,
    found_this_run: u64,
}

impl ResultSink {
    /// Open (or create) the output CSV and adopt `state`. A partial trailing
    /// line is cut off; rows already in the CSV but missing from the
    /// checkpoint are folded into `processed`.
    pub fn open(
        kind: TargetKind,
        store: CheckpointStore,
        mut state: CheckpointState,
        output: &Path,
        save_every: u64,
    ) -> Result<Self, SweepError> {
        let out_err = |source| SweepError::Output { path: output.to_path_buf(), source };
        let existing = match fs::read(output) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(out_err(e)),
        };
        let complete = existing.iter().rposition(|&b| b == b'\n').map_or(0, |i| i + 1);
        if complete < existing.len() {
            warn!(output = %output.display(), bytes = existing.len() - complete, "dropping partial trailing line");
            OpenOptions::new()
                .write(true)
                .open(output)
                .and_then(|f| f.set_len(complete as u64))
                .map_err(out_err)?;
        }

        if complete > 0 {
            let (rows, skipped) = read_valid_records(&existing[..complete]);
            for reason in &skipped {
                warn!(output = %output.display(), %reason, "skipping unreadable result row");
            }
            let adopted = adopt_rows(kind, &mut state, rows);
            if adopted > 0 {
                info!(rows = adopted, output = %output.display(), "adopted results missing from checkpoint");
            }
        }

        let mut out = OpenOptions::new().create(true).append(true).open(output).map_err(out_err)?;
        let mut out_len = complete as u64;
        if complete == 0 {
            let header = encode_row(HEADER)?;
            out.write_all(&header).map_err(out_err)?;
            out_len = header.len() as u64;
        }

        Ok(ResultSink {
            kind,
            store,
            state,
            out,
            out_len,
            output_path: output.to_path_buf(),
            save_every: save_every.max(1),
            since_save: 0,
            found_this_run: 0,
        })
    }

    /// Fix the counters for this run: `already_done` of `total` are covered.
    pub fn begin(&mut self, total: u64, already_done: u64) {
        self.state.total_count = total;
        self.state.completed_count = already_done;
    }

    pub fn processed_snapshot(&self) -> BTreeSet<String> {
        self.state.processed.clone()
    }

    pub fn state(&self) -> &CheckpointState {
        &self.state
    }

    pub fn found_this_run(&self) -> u64 {
        self.found_this_run
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Account for one finished target. A failed append is rolled back and
    /// leaves the target unprocessed so a later run retries it.
    pub fn record(&mut self, target: &Target, outcome: &Outcome) -> Result<Recorded, SweepError> {
        let id = target.identity();
        if self.state.is_processed(&id) {
            self.state.completed_count += 1;
            return Ok(Recorded::Duplicate);
        }

        let recorded = match outcome {
            Outcome::Found(ports) if !ports.is_empty() => {
                let rec = ScanRecord::new(target.host, ports.iter().copied());
                self.append(&rec)?;
                self.state.results.push(rec);
                self.found_this_run += 1;
                Recorded::Row
            }
            _ => Recorded::Marked,
        };
        self.state.processed.insert(id);
        self.state.completed_count += 1;

        self.since_save += 1;
        if self.since_save >= self.save_every {
            if let Err(e) = self.persist() {
                self.since_save = 0;
                error!(error = %e, "checkpoint save failed, continuing");
            }
        }
        Ok(recorded)
    }

    /// Write one whole row or nothing.
    fn append(&mut self, rec: &ScanRecord) -> Result<(), SweepError> {
        let line = encode_row([rec.host.to_string(), rec.ports_field()])?;
        if let Err(source) = self.out.write_all(&line) {
            if let Err(e) = self.out.set_len(self.out_len) {
                error!(output = %self.output_path.display(), error = %e, "could not roll back partial row");
            }
            return Err(SweepError::Output { path: self.output_path.clone(), source });
        }
        self.out_len += line.len() as u64;
        Ok(())
    }

    pub fn persist(&mut self) -> Result<(), SweepError> {
        self.state.stamp();
        self.store.save(&self.state)?;
        self.since_save = 0;
        Ok(())
    }

    /// Sync the output and write the final checkpoint, retrying the write once.
    pub fn finish(mut self) -> Result<CheckpointState, SweepError> {
        if let Err(e) = self.out.sync_all() {
            error!(output = %self.output_path.display(), error = %e, "syncing results failed");
        }
        retry_once("final checkpoint save", || self.persist())?;
        Ok(self.state)
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }
}

fn encode_row<I, F>(fields: I) -> Result<Vec<u8>, SweepError>
where
    I: IntoIterator<Item = F>,
    F: AsRef<[u8]>,
{
    let mut w = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
    w.write_record(fields)?;
    w.into_inner().map_err(|e| SweepError::OutputWrite(csv::Error::from(e.into_error())))
}

fn retry_once<T>(what: &str, mut op: impl FnMut() -> Result<T, SweepError>) -> Result<T, SweepError> {
    match op() {
        Ok(v) => Ok(v),
        Err(first) => {
            warn!(error = %first, "{} failed, retrying once", what);
            op()
        }
    }
}

fn adopt_rows(kind: TargetKind, state: &mut CheckpointState, rows: Vec<ScanRecord>) -> usize {
    let mut adopted = 0;
    for row in rows {
        let mut fresh = false;
        for id in row.identities(kind) {
            fresh |= state.processed.insert(id);
        }
        if fresh {
            state.results.push(row);
            adopted += 1;
        }
    }
    adopted
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn open(dir: &Path, save_every: u64) -> ResultSink {
        let store = CheckpointStore::new(dir.join("state.json"));
        let state = store.load();
        ResultSink::open(TargetKind::Host, store, state, &dir.join("out.csv"), save_every).unwrap()
    }

    #[test]
    fn writes_header_once_and_only_positive_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = open(dir.path(), 10);
        sink.begin(3, 0);
        assert_eq!(sink.record(&Target::host(ip("10.0.0.1")), &Outcome::found([11434])).unwrap(), Recorded::Row);
        assert_eq!(sink.record(&Target::host(ip("10.0.0.2")), &Outcome::Closed).unwrap(), Recorded::Marked);
        assert_eq!(sink.record(&Target::host(ip("10.0.0.1")), &Outcome::found([11434])).unwrap(), Recorded::Duplicate);
        let state = sink.finish().unwrap();
        assert_eq!(state.processed.len(), 2);
        assert_eq!(state.completed_count, 3);
        assert_eq!(state.results.len(), 1);

        let mut sink = open(dir.path(), 10);
        sink.record(&Target::host(ip("10.0.0.3")), &Outcome::found([80, 11434])).unwrap();
        sink.finish().unwrap();
        let csv = std::fs::read_to_string(dir.path().join("out.csv")).unwrap();
        assert_eq!(csv, "Host,Open Ports\n10.0.0.1,11434\n10.0.0.3,\"80,11434\"\n");
    }

    #[test]
    fn saves_every_k_completions() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("state.json"));
        let mut sink = open(dir.path(), 2);
        sink.record(&Target::host(ip("10.0.0.1")), &Outcome::Closed).unwrap();
        assert!(!store.path().exists());
        sink.record(&Target::host(ip("10.0.0.2")), &Outcome::Unreachable).unwrap();
        assert_eq!(store.load().processed.len(), 2);
    }

    #[test]
    fn rows_missing_from_checkpoint_are_adopted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("out.csv"), "Host,Open Ports\n10.0.0.7,11434\n").unwrap();
        let mut sink = open(dir.path(), 10);
        assert!(sink.processed_snapshot().contains("10.0.0.7"));
        assert_eq!(sink.record(&Target::host(ip("10.0.0.7")), &Outcome::found([11434])).unwrap(), Recorded::Duplicate);
        assert_eq!(sink.state().results.len(), 1);
    }

    #[test]
    fn service_rows_are_keyed_by_host_and_port() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("out.csv"), "Host,Open Ports\n10.0.0.1,11434\n").unwrap();
        let store = CheckpointStore::new(dir.path().join("state.json"));
        let mut sink =
            ResultSink::open(TargetKind::Service, store, CheckpointState::default(), &dir.path().join("out.csv"), 10)
                .unwrap();
        assert!(sink.processed_snapshot().contains("10.0.0.1:11434"));
        let t = Target::service(ip("10.0.0.1"), 8080);
        assert_eq!(sink.record(&t, &Outcome::found([8080])).unwrap(), Recorded::Row);
        assert_eq!(sink.kind(), TargetKind::Service);
    }

    #[test]
    fn final_save_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let store = CheckpointStore::new(blocker.join("state.json"));
        let sink =
            ResultSink::open(TargetKind::Host, store, CheckpointState::default(), &dir.path().join("out.csv"), 10)
                .unwrap();
        assert!(matches!(sink.finish(), Err(SweepError::CheckpointWrite { .. })));
    }

    #[test]
    fn final_save_gets_one_retry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut attempts = 0;
        let saved = retry_once("save", || {
            attempts += 1;
            if attempts == 1 {
                return Err(SweepError::CheckpointWrite { path: path.clone(), source: io::ErrorKind::Other.into() });
            }
            fs::write(&path, "{}").map_err(|source| SweepError::CheckpointWrite { path: path.clone(), source })
        });
        assert!(saved.is_ok());
        assert_eq!(attempts, 2);
        assert!(path.exists());

        let mut attempts = 0;
        let failed: Result<(), _> = retry_once("save", || {
            attempts += 1;
            Err(SweepError::SinkTask("down".into()))
        });
        assert!(failed.is_err());
        assert_eq!(attempts, 2);
    }

    #[test]
    fn failed_periodic_save_waits_for_the_next_interval() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "x").unwrap();
        let store = CheckpointStore::new(blocker.join("state.json"));
        let mut sink =
            ResultSink::open(TargetKind::Host, store, CheckpointState::default(), &dir.path().join("out.csv"), 2)
                .unwrap();
        sink.record(&Target::host(ip("10.0.0.1")), &Outcome::Closed).unwrap();
        sink.record(&Target::host(ip("10.0.0.2")), &Outcome::Closed).unwrap();
        assert_eq!(sink.since_save, 0);
        sink.record(&Target::host(ip("10.0.0.3")), &Outcome::Closed).unwrap();
        assert_eq!(sink.since_save, 1);
    }

    #[test]
    fn partial_trailing_line_is_cut_before_appending() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.csv");
        fs::write(&out, "Host,Open Ports\n10.0.0.1,11434\n10.0.0.").unwrap();
        let mut sink = open(dir.path(), 10);
        assert!(sink.processed_snapshot().contains("10.0.0.1"));
        assert_eq!(sink.record(&Target::host(ip("10.0.0.1")), &Outcome::found([11434])).unwrap(), Recorded::Duplicate);
        assert_eq!(sink.record(&Target::host(ip("10.0.0.3")), &Outcome::found([11434])).unwrap(), Recorded::Row);
        sink.finish().unwrap();

        assert_eq!(fs::read_to_string(&out).unwrap(), "Host,Open Ports\n10.0.0.1,11434\n10.0.0.3,11434\n");
        let ids: Vec<String> = crate::load_service_targets(&out).unwrap().iter().map(Target::identity).collect();
        assert_eq!(ids, vec!["10.0.0.1:11434", "10.0.0.3:11434"]);
    }

    #[test]
    fn partial_header_is_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("out.csv"), "Host,Op").unwrap();
        let mut sink = open(dir.path(), 10);
        sink.record(&Target::host(ip("10.0.0.4")), &Outcome::found([11434])).unwrap();
        sink.finish().unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("out.csv")).unwrap(), "Host,Open Ports\n10.0.0.4,11434\n");
    }

    #[test]
    fn bad_rows_do_not_block_reconciliation() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("out.csv"), "Host,Open Ports\n10.0.0.1,11434\ngarbage,1\n10.0.0.2,11434\n").unwrap();
        let sink = open(dir.path(), 10);
        let seen = sink.processed_snapshot();
        assert!(seen.contains("10.0.0.1") && seen.contains("10.0.0.2"));
        assert_eq!(sink.state().results.len(), 2);
    }

    #[test]
    fn failed_append_is_rolled_back_and_retried() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.csv");
        let mut sink = open(dir.path(), 10);
        sink.out = File::open(&out).unwrap();
        let target = Target::host(ip("10.0.0.5"));
        assert!(sink.record(&target, &Outcome::found([11434])).is_err());
        assert!(!sink.processed_snapshot().contains("10.0.0.5"));
        assert_eq!(fs::read_to_string(&out).unwrap(), "Host,Open Ports\n");

        sink.out = OpenOptions::new().append(true).open(&out).unwrap();
        assert_eq!(sink.record(&target, &Outcome::found([11434])).unwrap(), Recorded::Row);
        assert_eq!(fs::read_to_string(&out).unwrap(), "Host,Open Ports\n10.0.0.5,11434\n");
    }
}
