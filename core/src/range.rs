//! Address ranges and their expansion into individual addresses.

use crate::error::SweepError;
use ipnet::{IpAddrRange, Ipv4AddrRange, Ipv6AddrRange};
use serde::Deserialize;
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

/// An inclusive `start..=end` span of addresses of one family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    start: IpAddr,
    end: IpAddr,
}

impl AddressRange {
    pub fn new(start: IpAddr, end: IpAddr) -> Result<Self, SweepError> {
        let invalid = |reason: &str| SweepError::InvalidRange {
            start: start.to_string(),
            end: end.to_string(),
            reason: reason.to_string(),
        };
        match (start, end) {
            (IpAddr::V4(s), IpAddr::V4(e)) if s > e => Err(invalid("start is after end")),
            (IpAddr::V6(s), IpAddr::V6(e)) if s > e => Err(invalid("start is after end")),
            (IpAddr::V4(_), IpAddr::V4(_)) | (IpAddr::V6(_), IpAddr::V6(_)) => Ok(AddressRange { start, end }),
            _ => Err(invalid("endpoints belong to different address families")),
        }
    }

    pub fn parse(start: &str, end: &str) -> Result<Self, SweepError> {
        let parse_one = |s: &str| {
            s.trim().parse::<IpAddr>().map_err(|_| SweepError::InvalidRange {
                start: start.to_string(),
                end: end.to_string(),
                reason: format!("{:?} is not an IP address", s),
            })
        };
        AddressRange::new(parse_one(start)?, parse_one(end)?)
    }

    pub fn start(&self) -> IpAddr {
        self.start
    }

    pub fn end(&self) -> IpAddr {
        self.end
    }

    /// Number of addresses in the range (saturates for very large IPv6 spans).
    pub fn len(&self) -> u64 {
        let n: u128 = match (self.start, self.end) {
            (IpAddr::V4(s), IpAddr::V4(e)) => (u32::from(e) - u32::from(s)) as u128 + 1,
            (IpAddr::V6(s), IpAddr::V6(e)) => (u128::from(e) - u128::from(s)).saturating_add(1),
            _ => 0,
        };
        u64::try_from(n).unwrap_or(u64::MAX)
    }

    /// A constructed range always holds at least its start address.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.start, self.end, ip) {
            (IpAddr::V4(s), IpAddr::V4(e), IpAddr::V4(x)) => s <= x && x <= e,
            (IpAddr::V6(s), IpAddr::V6(e), IpAddr::V6(x)) => s <= x && x <= e,
            _ => false,
        }
    }

    /// Ascending iterator over every address in the range.
    pub fn iter(&self) -> IpAddrRange {
        match (self.start, self.end) {
            (IpAddr::V4(s), IpAddr::V4(e)) => Ipv4AddrRange::new(s, e).into(),
            (IpAddr::V6(s), IpAddr::V6(e)) => Ipv6AddrRange::new(s, e).into(),
            // mixed families cannot be constructed; an inverted range is empty
            _ => Ipv4AddrRange::new(Ipv4Addr::BROADCAST, Ipv4Addr::UNSPECIFIED).into(),
        }
    }
}

/// Lazily expand ranges in input order. Cloning the iterator restarts it.
pub fn expand(ranges: &[AddressRange]) -> impl Iterator<Item = IpAddr> + Clone + Send + '_ {
    ranges.iter().flat_map(AddressRange::iter)
}

/// Cardinality of [`expand`] without walking it.
pub fn total_len(ranges: &[AddressRange]) -> u64 {
    ranges.iter().fold(0u64, |acc, r| acc.saturating_add(r.len()))
}

#[derive(Debug, Deserialize)]
struct RangeEntry {
    start: String,
    end: String,
}

/// Read a JSON array of `{"start": "...", "end": "..."}` objects.
pub fn load_ranges(path: &Path) -> Result<Vec<AddressRange>, SweepError> {
    let file_err = |reason: String| SweepError::RangeFile { path: path.to_path_buf(), reason };
    let text = fs::read_to_string(path).map_err(|e| file_err(e.to_string()))?;
    let entries: Vec<RangeEntry> = serde_json::from_str(&text).map_err(|e| file_err(e.to_string()))?;
    if entries.is_empty() {
        return Err(file_err("no ranges found".into()));
    }
    entries.iter().map(|e| AddressRange::parse(&e.start, &e.end)).collect()
}
