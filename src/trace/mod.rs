use serde::Serialize;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use crate::error::{Error, Result};

/// One accepted trace line: `loc:<site>:branch:<branch>\t<variable>:<value>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub site: i64,
    pub branch: i64,
    pub variable: String,
    pub value: String,
}

/// Classification of a single trace line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    Empty,
    Accepted(Observation),
    /// Well-formed location with a negative branch id (function entry and
    /// similar non-decision markers).
    NegativeBranch,
    Malformed,
}

/// Per-file line counters.
///
/// `accepted + malformed + negative_branch <= total_lines`; the difference is
/// the number of blank lines.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TraceStats {
    pub total_lines: u64,
    pub accepted: u64,
    pub malformed: u64,
    pub negative_branch: u64,
    pub file_missing: bool,
    /// The file exists but could not be read to the end; counters are zeroed.
    pub read_failed: bool,
}

impl TraceStats {
    pub fn blank_lines(&self) -> u64 {
        self.total_lines - self.accepted - self.malformed - self.negative_branch
    }

    fn count(&mut self, outcome: &LineOutcome) {
        self.total_lines += 1;
        match outcome {
            LineOutcome::Empty => {}
            LineOutcome::Accepted(_) => self.accepted += 1,
            LineOutcome::NegativeBranch => self.negative_branch += 1,
            LineOutcome::Malformed => self.malformed += 1,
        }
    }
}

/// Every accepted observation of a trace file together with its counters.
#[derive(Debug, Default)]
pub struct TraceParse {
    pub observations: Vec<Observation>,
    pub stats: TraceStats,
}

/// Parses one line of the value trace. Never fails: anything that does not fit
/// the expected shape is reported as [`LineOutcome::Malformed`].
pub fn parse_line(raw: &str) -> LineOutcome {
    let line = raw.trim();
    if line.is_empty() {
        return LineOutcome::Empty;
    }

    let Some((location, assignment)) = line.split_once('\t') else {
        return LineOutcome::Malformed;
    };
    let Some((site, branch)) = parse_location(location) else {
        return LineOutcome::Malformed;
    };

    // The branch check comes before the assignment check: a negative-branch
    // marker is never counted as malformed.
    if branch < 0 {
        return LineOutcome::NegativeBranch;
    }

    let Some((variable, value)) = assignment.split_once(':') else {
        return LineOutcome::Malformed;
    };
    let variable = variable.trim();
    if variable.is_empty() {
        return LineOutcome::Malformed;
    }

    LineOutcome::Accepted(Observation {
        site,
        branch,
        variable: variable.to_string(),
        value: value.trim().to_string(),
    })
}

/// `loc:<int>:branch:<int>` with optional leading minus signs.
///
/// Ids are canonical integers: `loc:007` is site 7 and `-0` is branch 0, so
/// spellings of the same id share one map key. Ids outside the `i64` range
/// are malformed.
fn parse_location(location: &str) -> Option<(i64, i64)> {
    let rest = location.strip_prefix("loc:")?;
    let (site, branch) = rest.split_once(":branch:")?;
    Some((parse_signed(site)?, parse_signed(branch)?))
}

fn parse_signed(text: &str) -> Option<i64> {
    let digits = text.strip_prefix('-').unwrap_or(text);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

/// Streams every line of `reader` through [`parse_line`], handing accepted
/// observations to `sink`. Invalid UTF-8 is decoded lossily.
pub fn read_lines<R: BufRead>(mut reader: R, mut sink: impl FnMut(Observation)) -> io::Result<TraceStats> {
    let mut stats = TraceStats::default();
    let mut buffer = Vec::new();

    loop {
        buffer.clear();
        if reader.read_until(b'\n', &mut buffer)? == 0 {
            break;
        }
        let outcome = parse_line(&String::from_utf8_lossy(&buffer));
        stats.count(&outcome);
        if let LineOutcome::Accepted(observation) = outcome {
            sink(observation);
        }
    }

    Ok(stats)
}

/// Streams a trace file into `sink`. A missing file yields zeroed counters
/// with `file_missing` set; only read errors on an existing file are fatal.
pub fn read_trace<P: AsRef<Path>>(path: P, sink: impl FnMut(Observation)) -> Result<TraceStats> {
    let path = path.as_ref();
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "trace file not found, treating as empty");
            return Ok(TraceStats {
                file_missing: true,
                ..TraceStats::default()
            });
        }
        Err(err) => return Err(Error::io(path, err)),
    };

    read_lines(BufReader::new(file), sink).map_err(|err| Error::io(path, err))
}

/// Loads a whole trace file into memory.
pub fn parse_trace<P: AsRef<Path>>(path: P) -> Result<TraceParse> {
    let mut observations = Vec::new();
    let stats = read_trace(path, |observation| observations.push(observation))?;
    Ok(TraceParse { observations, stats })
}
