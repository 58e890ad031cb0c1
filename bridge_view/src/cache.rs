//! Simulation cache: sample series keyed by `(source_name, access_path)`.
//!
//! Series are append-only between resets. Each keeps an absolute offset so a
//! retention truncation drops old samples without renumbering the rest.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use neurobridge::access_path::AccessPath;
use neurobridge::schema::{PlotLines, Sample, StepRecord};

pub type SeriesKey = (String, String);

/// Canonical spelling of an access path, so `probeable/x` and
/// `probeable.x` share one series.
pub fn normalize_path(path: &str) -> String {
    AccessPath::parse(path).to_string()
}

pub fn series_key(source: &str, access_path: &str) -> SeriesKey {
    (source.to_string(), normalize_path(access_path))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Series {
    offset: usize,
    samples: Vec<Sample>,
}

impl Series {
    /// Sample count since the last reset, truncated ones included.
    pub fn len(&self) -> usize {
        self.offset + self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn stored(&self) -> usize {
        self.samples.len()
    }

    pub fn get(&self, index: usize) -> Option<&Sample> {
        index.checked_sub(self.offset).and_then(|i| self.samples.get(i))
    }

    /// Half-open window `[start, end)` clipped to what is stored; returns the
    /// absolute index of the first returned sample.
    pub fn slice(&self, start: usize, end: usize) -> (usize, &[Sample]) {
        let lo = start.max(self.offset).min(self.len());
        let hi = end.min(self.len()).max(lo);
        (lo, &self.samples[lo - self.offset..hi - self.offset])
    }

    fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    fn truncate_front(&mut self, keep: usize) -> usize {
        let drop = self.samples.len().saturating_sub(keep);
        if drop > 0 {
            self.samples.drain(..drop);
            self.offset += drop;
        }
        drop
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimulationCache {
    sample_every: u64,
    series: BTreeMap<SeriesKey, Series>,
    /// One-shot `PlotLines` results by `(source, path)` then step.
    plots: BTreeMap<SeriesKey, BTreeMap<u64, Sample>>,
}

impl SimulationCache {
    pub fn new(sample_every: u64) -> Self {
        Self {
            sample_every: sample_every.max(1),
            ..Self::default()
        }
    }

    pub fn sample_every(&self) -> u64 {
        self.sample_every
    }

    /// Append every `(node_name, access_path, value)` of a `SimulationSteps`
    /// batch. Returns the number of samples stored.
    pub fn ingest(&mut self, records: &[StepRecord]) -> usize {
        let mut stored = 0;
        for record in records {
            let index = (record.step / self.sample_every) as usize;
            for (path, value) in &record.parameters {
                let series = self
                    .series
                    .entry(series_key(&record.node_name, path))
                    .or_default();
                if index < series.len() {
                    warn!(
                        source = %record.node_name,
                        path = %path,
                        step = record.step,
                        "sample already cached; ignored"
                    );
                    continue;
                }
                // A gap means samples were never sent; keep indices aligned.
                while series.len() < index {
                    series.push(Sample::Missing);
                }
                series.push(value.clone());
                stored += 1;
            }
        }
        debug!(records = records.len(), stored, "cache ingest");
        stored
    }

    pub fn store_plot(&mut self, plot: &PlotLines) {
        if let Some(data) = &plot.data {
            self.plots
                .entry(series_key(&plot.source, &plot.access_path))
                .or_default()
                .insert(plot.step, Sample::Matrix(data.clone()));
        }
    }

    pub fn plot(&self, source: &str, access_path: &str, step: u64) -> Option<&Sample> {
        self.plots.get(&series_key(source, access_path))?.get(&step)
    }

    pub fn series(&self, source: &str, access_path: &str) -> Option<&Series> {
        self.series.get(&series_key(source, access_path))
    }

    pub fn keys(&self) -> impl Iterator<Item = &SeriesKey> {
        self.series.keys()
    }

    pub fn get(&self, source: &str, access_path: &str, index: usize) -> Option<&Sample> {
        self.series(source, access_path)?.get(index)
    }

    pub fn slice(&self, source: &str, access_path: &str, start: usize, end: usize) -> (usize, &[Sample]) {
        match self.series(source, access_path) {
            Some(series) => series.slice(start, end),
            None => (start, &[]),
        }
    }

    /// Samples already cached, i.e. the longest series.
    pub fn simulation_cache_steps(&self) -> usize {
        self.series.values().map(Series::len).max().unwrap_or(0)
    }

    /// Keep at most `retention` stored samples per series.
    pub fn truncate(&mut self, retention: usize) -> usize {
        let dropped: usize = self
            .series
            .values_mut()
            .map(|s| s.truncate_front(retention))
            .sum();
        if dropped > 0 {
            debug!(dropped, retention, "cache truncated");
        }
        dropped
    }

    pub fn clear(&mut self) {
        self.series.clear();
        self.plots.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty() && self.plots.is_empty()
    }
}
