//! Collects accepted candidates from concurrent probes and writes the ranked
//! shortlist.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;

#[cfg(windows)]
const LINE_SEPARATOR: &str = "\r\n";
#[cfg(not(windows))]
const LINE_SEPARATOR: &str = "\n";

/// An address whose certificate matched a wanted server identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateResult {
    pub address: IpAddr,
    pub common_name: String,
    pub org_name: String,
    pub server_name: String,
    pub latency_millis: u64,
}

/// Shared accumulator of accepted candidates.
///
/// Cloning is cheap and every clone appends to the same collection, so one
/// handle can be moved into each probe task.
#[derive(Debug, Clone, Default)]
pub struct ResultSink {
    results: Arc<Mutex<Vec<CandidateResult>>>,
    flushed: Arc<AtomicBool>,
}

impl ResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a candidate. Safe to call from any number of tasks.
    pub fn accept(&self, result: CandidateResult) {
        self.lock().push(result);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Returns a snapshot of everything accepted so far, fastest first.
    ///
    /// Candidates with equal latency keep their acceptance order.
    pub fn finalize(&self) -> Vec<CandidateResult> {
        let mut ranked = self.lock().clone();
        ranked.sort_by_key(|result| result.latency_millis);
        ranked
    }

    /// Ranks the accepted candidates and writes them to `path`.
    ///
    /// Only the first call writes; later calls, and calls with nothing
    /// accepted, return `Ok(0)` without touching the file. Returns the
    /// number of lines written.
    pub fn flush(&self, path: &Path) -> io::Result<usize> {
        let ranked = self.finalize();
        if ranked.is_empty() {
            debug!("No candidates accepted, not writing {}", path.display());
            return Ok(0);
        }
        if self.flushed.swap(true, Ordering::SeqCst) {
            debug!("Results already written to {}", path.display());
            return Ok(0);
        }

        let mut writer = BufWriter::new(File::create(path)?);
        write_results(&mut writer, &ranked)?;
        writer.flush()?;

        debug!("Wrote {} candidates to {}", ranked.len(), path.display());
        Ok(ranked.len())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<CandidateResult>> {
        // A panicking probe cannot leave a half-pushed Vec behind.
        self.results.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Writes one `address latency common_name server_name` line per candidate.
pub fn write_results<W: Write>(writer: &mut W, results: &[CandidateResult]) -> io::Result<()> {
    for result in results {
        write!(
            writer,
            "{} {} {} {}{LINE_SEPARATOR}",
            result.address, result.latency_millis, result.common_name, result.server_name
        )?;
    }
    Ok(())
}
