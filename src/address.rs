//! Provides functions to expand address ranges, CIDRs or range files.

use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use cidr_utils::cidr::IpInet;
use log::debug;
use thiserror::Error;
use tokio::fs;

/// Largest number of addresses a single range line may expand to, a `/8`.
pub const MAX_RANGE_ADDRESSES: u128 = 1 << 24;

/// Reasons a single range line could not be expanded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("invalid address '{address}' in range '{range}'")]
    InvalidAddress { range: String, address: String },

    #[error("invalid range format '{0}'. Expected 'start-end'. Example: 10.0.0.1-10.0.0.254")]
    InvalidRangeFormat(String),

    #[error("start address is greater than end address in range '{0}'")]
    InvertedRange(String),

    #[error("range '{0}' mixes IPv4 and IPv6 addresses")]
    MixedFamilies(String),

    #[error("invalid CIDR '{range}': {reason}")]
    InvalidCidr { range: String, reason: String },

    #[error("range '{0}' holds more than {max} addresses", max = MAX_RANGE_ADDRESSES)]
    TooLarge(String),
}

/// Reads a newline-delimited range file and expands every line.
///
/// Blank lines are skipped. A single malformed line fails the whole file.
pub async fn read_ranges(path: &Path) -> anyhow::Result<Vec<IpAddr>> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("could not read range file {}", path.display()))?;

    let addrs = expand_all(content.lines())
        .with_context(|| format!("malformed range in {}", path.display()))?;

    debug!("Expanded {} addresses from {}", addrs.len(), path.display());
    Ok(addrs)
}

/// Expands every range in order and concatenates the results.
///
/// Addresses are neither deduplicated nor reordered across ranges.
///
/// ```rust
/// # use edgescan::address::expand_all;
/// let ips = expand_all(["10.0.0.0/30", "192.168.1.7"]).unwrap();
/// assert_eq!(ips.len(), 3);
/// ```
pub fn expand_all<'a, I>(ranges: I) -> Result<Vec<IpAddr>, RangeError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut addrs = Vec::new();
    for range in ranges {
        let range = range.trim();
        if range.is_empty() {
            continue;
        }
        addrs.extend(expand(range)?);
    }
    Ok(addrs)
}

/// Given a string, parse it as a dash range, a CIDR or a single address.
///
/// ```rust
/// # use edgescan::address::expand;
/// let ips = expand("10.0.0.0/30").unwrap();
/// assert_eq!(ips, ["10.0.0.1".parse::<std::net::IpAddr>().unwrap(), "10.0.0.2".parse().unwrap()]);
/// ```
pub fn expand(range: &str) -> Result<Vec<IpAddr>, RangeError> {
    if range.contains('-') {
        expand_dash_range(range)
    } else if range.contains('/') {
        expand_cidr(range)
    } else {
        Ok(vec![parse_ip(range, range)?])
    }
}

/// Walks `start-end` inclusively.
///
/// A leading `.0` address is dropped, and when the walk ends on a `.0`
/// address the last two addresses are dropped.
fn expand_dash_range(range: &str) -> Result<Vec<IpAddr>, RangeError> {
    let Some((start, end)) = range.split_once('-') else {
        return Err(RangeError::InvalidRangeFormat(range.to_owned()));
    };
    if end.contains('-') {
        return Err(RangeError::InvalidRangeFormat(range.to_owned()));
    }

    let start = parse_ip(start.trim(), range)?;
    let end = parse_ip(end.trim(), range)?;
    if start > end {
        return Err(RangeError::InvertedRange(range.to_owned()));
    }

    let mut addrs = walk(start, end, range)?;

    if addrs.first().is_some_and(ends_with_zero_octet) {
        addrs.remove(0);
    }
    if addrs.last().is_some_and(ends_with_zero_octet) {
        addrs.truncate(addrs.len().saturating_sub(2));
    }

    Ok(addrs)
}

/// Enumerates the network containing `addr/prefix`, without its network and
/// broadcast addresses.
fn expand_cidr(range: &str) -> Result<Vec<IpAddr>, RangeError> {
    let inet = IpInet::from_str(range).map_err(|e| RangeError::InvalidCidr {
        range: range.to_owned(),
        reason: e.to_string(),
    })?;
    let network = inet.network();

    let mut addrs = walk(network.first_address(), network.last_address(), range)?;

    // /32 and /128 hold a single address, which is both ends at once.
    if addrs.len() < 2 {
        return Ok(Vec::new());
    }
    addrs.pop();
    addrs.remove(0);

    Ok(addrs)
}

fn parse_ip(address: &str, range: &str) -> Result<IpAddr, RangeError> {
    IpAddr::from_str(address).map_err(|_| RangeError::InvalidAddress {
        range: range.to_owned(),
        address: address.to_owned(),
    })
}

fn ends_with_zero_octet(addr: &IpAddr) -> bool {
    addr.to_string().ends_with(".0")
}

/// Returns every address from `start` to `end` inclusive.
///
/// Fails when the two addresses belong to different families or when the
/// span exceeds [`MAX_RANGE_ADDRESSES`].
fn walk(start: IpAddr, end: IpAddr, range: &str) -> Result<Vec<IpAddr>, RangeError> {
    let span = match (start, end) {
        (IpAddr::V4(s), IpAddr::V4(e)) => {
            u128::from(u32::from(e)).checked_sub(u128::from(u32::from(s)))
        }
        (IpAddr::V6(s), IpAddr::V6(e)) => u128::from(e).checked_sub(u128::from(s)),
        _ => return Err(RangeError::MixedFamilies(range.to_owned())),
    };
    if span.unwrap_or(0) >= MAX_RANGE_ADDRESSES {
        return Err(RangeError::TooLarge(range.to_owned()));
    }

    let addrs = match (start, end) {
        (IpAddr::V4(s), IpAddr::V4(e)) => walk_octets(s.octets(), e.octets())
            .into_iter()
            .map(IpAddr::from)
            .collect(),
        (IpAddr::V6(s), IpAddr::V6(e)) => walk_octets(s.octets(), e.octets())
            .into_iter()
            .map(IpAddr::from)
            .collect(),
        _ => Vec::new(),
    };
    Ok(addrs)
}

fn walk_octets<const N: usize>(start: [u8; N], end: [u8; N]) -> Vec<[u8; N]> {
    let mut current = start;
    let mut octets = Vec::new();
    while current <= end {
        octets.push(current);
        if !increment(&mut current) {
            break;
        }
    }
    octets
}

/// Adds one to a big-endian address, carrying from the least significant
/// octet toward the most significant one.
///
/// Returns `false` when every octet overflowed, i.e. the address wrapped.
pub fn increment(octets: &mut [u8]) -> bool {
    for octet in octets.iter_mut().rev() {
        *octet = octet.wrapping_add(1);
        if *octet != 0 {
            return true;
        }
    }
    false
}
