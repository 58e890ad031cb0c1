//! Axes and lines: plots fed from the simulation cache through expressions.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use neurobridge::schema::Sample;

use crate::cache::SimulationCache;
use crate::color::{ColorGenerator, Rgb};
use crate::expr::{Expr, ExprError, Scope, Value};

#[derive(Debug, Error)]
pub enum AxesError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Default for Range {
    fn default() -> Self {
        Self { min: 0.0, max: 1.0 }
    }
}

impl Range {
    /// Position of `v` in the range as a fraction; the middle for empty ranges.
    pub fn normalize(&self, v: f64) -> f64 {
        let span = self.max - self.min;
        if span == 0.0 {
            0.5
        } else {
            (v - self.min) / span
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Locator {
    Linear { numticks: usize },
    Integer { numticks: usize },
}

impl Default for Locator {
    fn default() -> Self {
        Locator::Linear { numticks: 5 }
    }
}

impl Locator {
    /// Tick positions in `[vmin, vmax]`; reversed bounds are swapped.
    pub fn ticks(&self, vmin: f64, vmax: f64) -> Vec<f64> {
        let (lo, hi) = if vmax < vmin { (vmax, vmin) } else { (vmin, vmax) };
        if !lo.is_finite() || !hi.is_finite() {
            return Vec::new();
        }
        let ticks: Vec<f64> = match *self {
            Locator::Linear { numticks: 0 } | Locator::Integer { numticks: 0 } => Vec::new(),
            Locator::Linear { numticks: 1 } => vec![lo],
            Locator::Linear { numticks } => {
                let n = (numticks - 1) as f64;
                (0..numticks)
                    .map(|i| lo + (hi - lo) * i as f64 / n)
                    .collect()
            }
            Locator::Integer { numticks } => {
                let first = lo.ceil();
                let last = hi.floor();
                if first > last {
                    Vec::new()
                } else if numticks == 1 {
                    vec![first]
                } else {
                    let step = ((last - first) / (numticks - 1) as f64).ceil().max(1.0);
                    let mut out = Vec::new();
                    let mut v = first;
                    while v <= last && out.len() < numticks {
                        out.push(v);
                        v += step;
                    }
                    out
                }
            }
        };
        let eps = (hi - lo).abs() * 1e-9;
        ticks
            .into_iter()
            .filter(|t| *t >= lo - eps && *t <= hi + eps)
            .collect()
    }
}

/// Format a tick value: `{}`, `{:.N}`, `{:.Nf}`, `{:d}`, `{:e}` or `%.Nf`,
/// with any surrounding text kept.
pub fn format_tick(fmt: &str, v: f64) -> String {
    if let (Some(open), Some(close)) = (fmt.find('{'), fmt.find('}')) {
        if open < close {
            let body = format_spec(&fmt[open + 1..close], v);
            return format!("{}{}{}", &fmt[..open], body, &fmt[close + 1..]);
        }
    }
    if let Some(pct) = fmt.find('%') {
        let rest = &fmt[pct + 1..];
        if let Some(end) = rest.find('f') {
            let body = match rest[..end].strip_prefix('.').map(str::parse::<usize>) {
                Some(Ok(n)) => format!("{:.*}", n, v),
                _ => format!("{v:.6}"),
            };
            return format!("{}{}{}", &fmt[..pct], body, &rest[end + 1..]);
        }
    }
    format!("{v}")
}

fn format_spec(spec: &str, v: f64) -> String {
    match spec {
        "" | ":" => format!("{v}"),
        ":d" => format!("{}", v.round() as i64),
        ":e" => format!("{v:e}"),
        _ => {
            let digits = spec
                .strip_prefix(":.")
                .map(|s| s.strip_suffix('f').unwrap_or(s))
                .and_then(|s| s.parse::<usize>().ok());
            match digits {
                Some(n) => format!("{:.*}", n, v),
                None => format!("{v}"),
            }
        }
    }
}

/// Where a line's data comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceBinding {
    pub source_name: String,
    pub access_path: String,
    /// Walk the window step by step (`row`), or read one sample (`data`).
    pub iterate_step: bool,
    pub fixed_step: u64,
}

impl SourceBinding {
    pub fn iterate(source_name: &str, access_path: &str) -> Self {
        Self {
            source_name: source_name.to_string(),
            access_path: access_path.to_string(),
            iterate_step: true,
            fixed_step: 0,
        }
    }

    pub fn fixed(source_name: &str, access_path: &str, step: u64) -> Self {
        Self {
            source_name: source_name.to_string(),
            access_path: access_path.to_string(),
            iterate_step: false,
            fixed_step: step,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineData {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
}

impl LineData {
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    fn axis(&self, i: usize) -> &[f64] {
        match i {
            0 => &self.x,
            1 => &self.y,
            _ => &self.z,
        }
    }

    fn clear(&mut self) {
        self.x.clear();
        self.y.clear();
        self.z.clear();
    }
}

/// Half-open sample window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub name: String,
    pub source: SourceBinding,
    pub get_x: String,
    pub get_y: String,
    /// Empty means a flat line at zero.
    #[serde(default)]
    pub get_z: String,
    pub update: bool,
    pub color: Rgb,
    #[serde(skip)]
    pub data: LineData,
}

impl Line {
    /// Recompute this line's points from the cache.
    pub fn refresh(&mut self, cache: &SimulationCache, window: Window, dt: f64) -> Result<(), ExprError> {
        self.data.clear();
        let gx = Expr::parse(&self.get_x)?;
        let gy = Expr::parse(&self.get_y)?;
        let gz = match self.get_z.trim() {
            "" => None,
            z => Some(Expr::parse(z)?),
        };
        let src = &self.source;

        if src.iterate_step {
            let se = cache.sample_every();
            let (first, rows) = cache.slice(&src.source_name, &src.access_path, window.start, window.end);
            let mut data = LineData::default();
            for (k, row) in rows.iter().enumerate() {
                if matches!(row, Sample::Missing) {
                    continue;
                }
                let step = ((first + k) as u64 * se) as f64;
                let scope = Scope {
                    step: Some(step),
                    t: Some(step * dt),
                    row: Some(row),
                    data: None,
                };
                data.x.push(gx.eval_scalar(&scope)?);
                data.y.push(gy.eval_scalar(&scope)?);
                data.z.push(match &gz {
                    Some(gz) => gz.eval_scalar(&scope)?,
                    None => 0.0,
                });
            }
            self.data = data;
            return Ok(());
        }

        let sample = cache
            .plot(&src.source_name, &src.access_path, src.fixed_step)
            .or_else(|| cache.get(&src.source_name, &src.access_path, src.fixed_step as usize));
        let Some(sample) = sample else {
            return Ok(());
        };
        let step = src.fixed_step as f64;
        let scope = Scope {
            step: Some(step),
            t: Some(step * dt),
            row: None,
            data: Some(sample),
        };
        let x = gx.eval(&scope)?;
        let y = gy.eval(&scope)?;
        let z = match &gz {
            Some(gz) => gz.eval(&scope)?,
            None => Value::Scalar(0.0),
        };
        let [x, y, z] = broadcast([x.into_vec(), y.into_vec(), z.into_vec()])?;
        self.data = LineData { x, y, z };
        Ok(())
    }
}

/// Stretch one-element axes to the length of the others.
fn broadcast(axes: [Vec<f64>; 3]) -> Result<[Vec<f64>; 3], ExprError> {
    let n = axes.iter().map(Vec::len).max().unwrap_or(0);
    let mut out: [Vec<f64>; 3] = Default::default();
    for (slot, axis) in out.iter_mut().zip(axes) {
        *slot = match axis.len() {
            len if len == n => axis,
            1 => vec![axis[0]; n],
            len => {
                return Err(ExprError::Shape(format!(
                    "axis of length {len} next to length {n}"
                )))
            }
        };
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub value: f64,
    pub label: String,
}

/// A line in axes coordinates, each component normalized to `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Curve {
    pub name: String,
    pub color: Rgb,
    pub points: Vec<[f64; 3]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AxesDrawing {
    pub name: String,
    pub title: String,
    pub labels: [String; 3],
    pub curves: Vec<Curve>,
    pub ticks: [Vec<Tick>; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axes {
    pub name: String,
    pub title: String,
    pub labels: [String; 3],
    pub formats: [String; 3],
    pub locators: [Locator; 3],
    pub ranges: [Range; 3],
    pub auto_range: bool,
    pub lines: Vec<Line>,
    pub colors: ColorGenerator,
}

impl Axes {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            title: name.to_string(),
            labels: ["x".to_string(), "y".to_string(), "z".to_string()],
            formats: ["{:.2}".to_string(), "{:.2}".to_string(), "{:.2}".to_string()],
            locators: [Locator::default(); 3],
            ranges: [Range::default(); 3],
            auto_range: true,
            lines: Vec::new(),
            colors: ColorGenerator::default(),
        }
    }

    /// Add a line; the expressions are checked here so a bad binding fails
    /// early instead of on every tick.
    pub fn add_line(
        &mut self,
        name: &str,
        source: SourceBinding,
        get_x: &str,
        get_y: &str,
        get_z: &str,
    ) -> Result<&mut Line, ExprError> {
        for e in [get_x, get_y] {
            Expr::parse(e)?;
        }
        if !get_z.trim().is_empty() {
            Expr::parse(get_z)?;
        }
        let color = self.colors.next_color();
        self.lines.retain(|l| l.name != name);
        self.lines.push(Line {
            name: name.to_string(),
            source,
            get_x: get_x.to_string(),
            get_y: get_y.to_string(),
            get_z: get_z.to_string(),
            update: true,
            color,
            data: LineData::default(),
        });
        let last = self.lines.len() - 1;
        Ok(&mut self.lines[last])
    }

    pub fn remove_line(&mut self, name: &str) -> bool {
        let before = self.lines.len();
        self.lines.retain(|l| l.name != name);
        self.lines.len() != before
    }

    pub fn line(&self, name: &str) -> Option<&Line> {
        self.lines.iter().find(|l| l.name == name)
    }

    /// Refresh every updating line, then the ranges. A failing line is
    /// emptied for this tick and reported; the others still update.
    pub fn refresh(&mut self, cache: &SimulationCache, window: Window, dt: f64) -> Vec<(String, ExprError)> {
        let mut errors = Vec::new();
        for line in self.lines.iter_mut().filter(|l| l.update) {
            if let Err(e) = line.refresh(cache, window, dt) {
                warn!(axes = %self.name, line = %line.name, "line skipped: {e}");
                line.data = LineData::default();
                errors.push((line.name.clone(), e));
            }
        }
        if self.auto_range {
            self.compute_ranges();
        }
        errors
    }

    /// Exact min/max over all lines, ignoring infinities; `[0, 1]` without data.
    pub fn compute_ranges(&mut self) {
        for axis in 0..3 {
            let mut values = self
                .lines
                .iter()
                .flat_map(|l| l.data.axis(axis).iter().copied())
                .filter(|v| v.is_finite())
                .peekable();
            self.ranges[axis] = if values.peek().is_none() {
                Range::default()
            } else {
                let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                    (lo.min(v), hi.max(v))
                });
                Range { min, max }
            };
        }
    }

    pub fn ticks(&self, axis: usize) -> Vec<Tick> {
        let (Some(range), Some(locator), Some(fmt)) = (
            self.ranges.get(axis),
            self.locators.get(axis),
            self.formats.get(axis),
        ) else {
            return Vec::new();
        };
        locator
            .ticks(range.min, range.max)
            .into_iter()
            .map(|value| Tick {
                value,
                label: format_tick(fmt, value),
            })
            .collect()
    }

    pub fn draw(&self) -> AxesDrawing {
        let curves = self
            .lines
            .iter()
            .filter(|l| !l.data.is_empty())
            .map(|l| Curve {
                name: l.name.clone(),
                color: l.color,
                points: (0..l.data.x.len())
                    .map(|i| {
                        [
                            self.ranges[0].normalize(l.data.x[i]),
                            self.ranges[1].normalize(l.data.y[i]),
                            self.ranges[2].normalize(l.data.z.get(i).copied().unwrap_or(0.0)),
                        ]
                    })
                    .collect(),
            })
            .collect();
        AxesDrawing {
            name: self.name.clone(),
            title: self.title.clone(),
            labels: self.labels.clone(),
            curves,
            ticks: [self.ticks(0), self.ticks(1), self.ticks(2)],
        }
    }
}

/// All axes of a scene, persisted with it as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AxesRegistry {
    axes: BTreeMap<String, Axes>,
}

impl AxesRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, axes: Axes) -> Option<Axes> {
        self.axes.insert(axes.name.clone(), axes)
    }

    pub fn remove(&mut self, name: &str) -> Option<Axes> {
        self.axes.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Axes> {
        self.axes.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Axes> {
        self.axes.get_mut(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Axes> {
        self.axes.values()
    }

    pub fn len(&self) -> usize {
        self.axes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    /// Refresh every axes; returns `(axes, line, error)` for skipped lines.
    pub fn refresh_all(
        &mut self,
        cache: &SimulationCache,
        window: Window,
        dt: f64,
    ) -> Vec<(String, String, ExprError)> {
        let mut errors = Vec::new();
        for axes in self.axes.values_mut() {
            for (line, e) in axes.refresh(cache, window, dt) {
                errors.push((axes.name.clone(), line, e));
            }
        }
        errors
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn save(&self, path: &Path) -> Result<(), AxesError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, AxesError> {
        Ok(Self::from_json(&fs::read_to_string(path)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neurobridge::schema::{PlotLines, StepRecord};

    fn cache_with(n: u64) -> SimulationCache {
        let mut cache = SimulationCache::new(1);
        let records: Vec<StepRecord> = (0..n)
            .map(|s| StepRecord {
                step: s,
                node_name: "a".to_string(),
                parameters: [(
                    "probeable.decoded_output".to_string(),
                    Sample::Vector(vec![s as f64 * 0.5, -(s as f64)]),
                )]
                .into(),
            })
            .collect();
        cache.ingest(&records);
        cache
    }

    #[test]
    fn ticks_swap_clip_and_count() {
        let lin = Locator::Linear { numticks: 3 };
        assert_eq!(lin.ticks(2.0, 0.0), vec![0.0, 1.0, 2.0]);
        assert!(Locator::Linear { numticks: 0 }.ticks(0.0, 1.0).is_empty());
        assert_eq!(Locator::Integer { numticks: 3 }.ticks(0.2, 4.7), vec![1.0, 3.0]);
        assert_eq!(Locator::Integer { numticks: 10 }.ticks(-1.5, 1.5), vec![-1.0, 0.0, 1.0]);
        assert!(Locator::Integer { numticks: 2 }.ticks(0.1, 0.9).is_empty());
    }

    #[test]
    fn tick_formats() {
        assert_eq!(format_tick("{:.2}", 1.23456), "1.23");
        assert_eq!(format_tick("{:.1f} s", 0.26), "0.3 s");
        assert_eq!(format_tick("{:d}", 2.6), "3");
        assert_eq!(format_tick("{:e}", 1500.0), "1.5e3");
        assert_eq!(format_tick("%.3f", 0.5), "0.500");
        assert_eq!(format_tick("{}", 2.0), "2");
    }

    #[test]
    fn iterated_line_follows_window() {
        let cache = cache_with(10);
        let mut axes = Axes::new("plot");
        axes.add_line(
            "decoded",
            SourceBinding::iterate("a", "probeable/decoded_output"),
            "step",
            "row[0]",
            "",
        )
        .unwrap();
        let errors = axes.refresh(&cache, Window { start: 4, end: 8 }, 0.001);
        assert!(errors.is_empty());
        let line = axes.line("decoded").unwrap();
        assert_eq!(line.data.x, vec![4.0, 5.0, 6.0, 7.0]);
        assert_eq!(line.data.y, vec![2.0, 2.5, 3.0, 3.5]);
        assert_eq!(axes.ranges[0], Range { min: 4.0, max: 7.0 });
        assert_eq!(axes.ranges[2], Range { min: 0.0, max: 0.0 });
    }

    #[test]
    fn fixed_step_reads_plot_results() {
        let mut cache = SimulationCache::new(1);
        let mut plot = PlotLines::request("a", "neurons.tuning_curves", 2);
        plot.data = Some(vec![vec![-1.0, 0.0, 5.0], vec![1.0, 40.0, 0.0]]);
        cache.store_plot(&plot);

        let mut axes = Axes::new("tuning");
        axes.add_line(
            "n1",
            SourceBinding::fixed("a", "neurons/tuning_curves", 2),
            "col(data, 0)",
            "col(data, 1)",
            "",
        )
        .unwrap();
        axes.refresh(&cache, Window { start: 0, end: 0 }, 0.001);
        let line = axes.line("n1").unwrap();
        assert_eq!(line.data.x, vec![-1.0, 1.0]);
        assert_eq!(line.data.y, vec![0.0, 40.0]);
        assert_eq!(line.data.z, vec![0.0, 0.0]);
    }

    #[test]
    fn failing_line_is_skipped_and_empty_axes_default() {
        let cache = cache_with(5);
        let mut axes = Axes::new("plot");
        axes.add_line("ok", SourceBinding::iterate("a", "probeable.decoded_output"), "step", "row[1]", "")
            .unwrap();
        axes.add_line("bad", SourceBinding::iterate("a", "probeable.decoded_output"), "step", "row[5]", "")
            .unwrap();
        let errors = axes.refresh(&cache, Window { start: 0, end: 5 }, 0.001);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "bad");
        assert_eq!(axes.line("ok").unwrap().data.x.len(), 5);
        assert!(axes.line("bad").unwrap().data.is_empty());
        assert!(axes.add_line("x", SourceBinding::iterate("a", "p"), "import(os)", "1", "").is_err());

        let mut empty = Axes::new("empty");
        empty
            .add_line("none", SourceBinding::iterate("zzz", "probeable.output"), "step", "row[0]", "")
            .unwrap();
        empty.refresh(&cache, Window { start: 0, end: 5 }, 0.001);
        assert_eq!(empty.ranges, [Range::default(); 3]);
        assert!(empty.draw().curves.is_empty());
    }

    #[test]
    fn registry_persists_without_line_data() {
        let cache = cache_with(3);
        let mut reg = AxesRegistry::new();
        let mut axes = Axes::new("plot");
        axes.locators[0] = Locator::Integer { numticks: 4 };
        axes.add_line("l", SourceBinding::iterate("a", "probeable.decoded_output"), "step", "row[0]", "")
            .unwrap();
        reg.add(axes);
        reg.refresh_all(&cache, Window { start: 0, end: 3 }, 0.001);

        let path = std::env::temp_dir().join(format!("axes-{}.json", std::process::id()));
        reg.save(&path).unwrap();
        let loaded = AxesRegistry::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let axes = loaded.get("plot").unwrap();
        assert_eq!(axes.locators[0], Locator::Integer { numticks: 4 });
        assert!(axes.line("l").unwrap().data.is_empty());
        assert_eq!(axes.lines[0].source, reg.get("plot").unwrap().lines[0].source);
    }
}
