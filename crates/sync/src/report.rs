use std::collections::{BTreeMap, HashSet};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::{Mutex, MutexGuard, PoisonError};

use skiff_manifest::models::ContentKind;

use crate::error::Stage;

/// Rows a sync inserted versus adopted from an earlier run, for one kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindCounts {
    pub created: u64,
    pub adopted: u64,
}

/// A unit dropped under the `skip` integrity policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub key: String,
    pub stage: Stage,
    pub reason: String,
}

/// Outcome of a successful sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub repository: String,
    /// Number of the version this sync finalized.
    pub version: Option<u64>,
    pub content: BTreeMap<ContentKind, KindCounts>,
    /// Tags listed by the remote but not mirrored, with the reason.
    pub skipped_tags: Vec<(String, String)>,
    pub rejected: Vec<Rejection>,
    /// Targets fetched from the network.
    pub downloads: u64,
    /// Targets served from artifact storage instead of the network.
    pub cached: u64,
    pub associations: u64,
    /// Most units alive in the pipeline at any one time.
    pub peak_in_flight: usize,
}
impl SyncReport {
    pub fn counts(&self, kind: ContentKind) -> KindCounts {
        self.content.get(&kind).copied().unwrap_or_default()
    }

    pub fn created(&self) -> u64 {
        self.content.values().map(|counts| counts.created).sum()
    }

    pub fn adopted(&self) -> u64 {
        self.content.values().map(|counts| counts.adopted).sum()
    }
}
impl Display for SyncReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self.version {
            Some(version) => writeln!(f, "{} version {version}", self.repository)?,
            None => writeln!(f, "{} (not finalized)", self.repository)?,
        }
        for kind in ContentKind::ALL {
            let counts = self.counts(kind);
            writeln!(f, "  {:<14} {:>6} new {:>6} existing", kind.as_str(), counts.created, counts.adopted)?;
        }
        writeln!(f, "  downloads      {:>6} fetched {:>6} cached", self.downloads, self.cached)?;
        writeln!(f, "  associations   {:>6}", self.associations)?;
        for (tag, reason) in &self.skipped_tags {
            writeln!(f, "  skipped tag {tag}: {reason}")?;
        }
        for rejection in &self.rejected {
            writeln!(f, "  rejected {} during {}: {}", rejection.key, rejection.stage, rejection.reason)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Tally {
    report: SyncReport,
    /// Keys of `report.rejected`, for lookups while passes are planned.
    rejected: HashSet<String>,
}

/// Tallies shared by every stage of a sync.
#[derive(Debug, Default)]
pub(crate) struct Recorder {
    tally: Mutex<Tally>,
}
impl Recorder {
    fn lock(&self) -> MutexGuard<'_, Tally> {
        self.tally.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn saved(&self, kind: ContentKind, created: bool) {
        let mut tally = self.lock();
        let counts = tally.report.content.entry(kind).or_default();
        if created {
            counts.created += 1;
        } else {
            counts.adopted += 1;
        }
    }

    pub(crate) fn downloaded(&self, cached: bool) {
        let mut tally = self.lock();
        if cached {
            tally.report.cached += 1;
        } else {
            tally.report.downloads += 1;
        }
    }

    pub(crate) fn skipped_tag(&self, tag: impl Into<String>, reason: impl Into<String>) {
        self.lock().report.skipped_tags.push((tag.into(), reason.into()));
    }

    pub(crate) fn rejected(&self, key: impl Into<String>, stage: Stage, reason: impl Into<String>) {
        let key = key.into();
        let mut tally = self.lock();
        tally.rejected.insert(key.clone());
        tally.report.rejected.push(Rejection { key, stage, reason: reason.into() });
    }

    pub(crate) fn associated(&self, count: u64) {
        self.lock().report.associations += count;
    }

    pub(crate) fn is_rejected(&self, key: &str) -> bool {
        self.lock().rejected.contains(key)
    }

    pub(crate) fn finish(&self, repository: &str, version: u64, peak_in_flight: usize) -> SyncReport {
        let mut report = self.lock().report.clone();
        report.repository = repository.to_string();
        report.version = Some(version);
        report.peak_in_flight = peak_in_flight;
        report.skipped_tags.sort();
        report
    }
}
