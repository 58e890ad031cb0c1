//! Coloring modes shared by nodes and edges.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::warn;

use crate::axes::Range;
use crate::cache::SimulationCache;
use crate::color::{ColorGenerator, Gradient, Rgb};
use crate::expr::{Expr, ExprError, Scope};
use crate::mirror::MirrorGraph;

pub type Colors = BTreeMap<String, Rgb>;

/// How a dynamic value turns into a color.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DynamicMapping {
    /// Bucket `i` holds values with exactly `i` bounds at or below them.
    Buckets {
        bounds: Vec<f64>,
        #[serde(default)]
        colors: ColorGenerator,
    },
    /// Normalize into `[0, 1]` and sample the gradient. Without a fixed
    /// range the min/max over the colored objects is used.
    Gradient {
        #[serde(default)]
        gradient: Gradient,
        #[serde(default)]
        range: Option<Range>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Coloring {
    Single {
        color: Rgb,
    },
    Model {
        /// Static attribute path, e.g. `neuron_type`.
        attribute: String,
        #[serde(default)]
        colors: ColorGenerator,
    },
    ModelDynamic {
        access_path: String,
        get: String,
        mapping: DynamicMapping,
    },
}

impl Default for Coloring {
    fn default() -> Self {
        Coloring::Single {
            color: Rgb::default(),
        }
    }
}

/// Result of one coloring pass; failures are per object.
#[derive(Debug, Clone, Default)]
pub struct ColorPass {
    pub colors: Colors,
    pub errors: Vec<(String, ExprError)>,
}

impl Coloring {
    /// Needs re-evaluation on every timeline tick.
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Coloring::ModelDynamic { .. })
    }

    /// Colors for `names` at cache sample `index`. Dynamic objects with no
    /// sample at `index` are left out so they keep their last color.
    pub fn apply<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
        mirror: &MirrorGraph,
        cache: &SimulationCache,
        index: usize,
        dt: f64,
    ) -> ColorPass {
        match self {
            Coloring::Single { color } => ColorPass {
                colors: names.into_iter().map(|n| (n.to_string(), *color)).collect(),
                errors: Vec::new(),
            },
            Coloring::Model { attribute, colors } => ColorPass {
                colors: model_colors(names, mirror, attribute, colors),
                errors: Vec::new(),
            },
            Coloring::ModelDynamic {
                access_path,
                get,
                mapping,
            } => dynamic_colors(names, cache, access_path, get, mapping, index, dt),
        }
    }
}

fn attribute_key(value: &Json) -> Option<String> {
    match value {
        Json::Null => None,
        Json::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn model_colors<'a>(
    names: impl IntoIterator<Item = &'a str>,
    mirror: &MirrorGraph,
    attribute: &str,
    colors: &ColorGenerator,
) -> Colors {
    let keyed: Vec<(&str, Option<String>)> = names
        .into_iter()
        .map(|n| (n, mirror.attribute(n, attribute).and_then(attribute_key)))
        .collect();
    let unique: BTreeSet<&str> = keyed.iter().filter_map(|(_, k)| k.as_deref()).collect();
    let slot: BTreeMap<&str, usize> = unique.into_iter().enumerate().map(|(i, k)| (k, i)).collect();
    keyed
        .iter()
        .map(|(name, key)| {
            let color = key
                .as_deref()
                .and_then(|k| slot.get(k))
                .map_or_else(Rgb::default, |i| colors.color(*i));
            (name.to_string(), color)
        })
        .collect()
}

fn dynamic_colors<'a>(
    names: impl IntoIterator<Item = &'a str>,
    cache: &SimulationCache,
    access_path: &str,
    get: &str,
    mapping: &DynamicMapping,
    index: usize,
    dt: f64,
) -> ColorPass {
    let mut pass = ColorPass::default();
    let expr = match Expr::parse(get) {
        Ok(expr) => expr,
        Err(e) => {
            warn!(get, "dynamic coloring disabled: {e}");
            pass.errors.push((get.to_string(), e));
            return pass;
        }
    };

    let step = (index as u64 * cache.sample_every()) as f64;
    let mut values = Vec::new();
    for name in names {
        let Some(sample) = cache.get(name, access_path, index) else {
            continue;
        };
        let scope = Scope {
            step: Some(step),
            t: Some(step * dt),
            row: None,
            data: Some(sample),
        };
        match expr.eval_scalar(&scope) {
            Ok(v) => values.push((name, v)),
            Err(e) => {
                warn!(object = name, "dynamic color skipped: {e}");
                pass.errors.push((name.to_string(), e));
            }
        }
    }

    match mapping {
        DynamicMapping::Buckets { bounds, colors } => {
            for (name, v) in values {
                let bucket = bounds.iter().filter(|b| **b <= v).count();
                pass.colors.insert(name.to_string(), colors.color(bucket));
            }
        }
        DynamicMapping::Gradient { gradient, range } => {
            let range = range.unwrap_or_else(|| {
                let finite = values.iter().map(|(_, v)| *v).filter(|v| v.is_finite());
                let (min, max) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                    (lo.min(v), hi.max(v))
                });
                if min <= max {
                    Range { min, max }
                } else {
                    Range::default()
                }
            });
            for (name, v) in values {
                pass.colors.insert(name.to_string(), gradient.at(range.normalize(v)));
            }
        }
    }
    pass
}

#[cfg(test)]
mod tests {
    use super::*;
    use neurobridge::model::Model;
    use neurobridge::resolver::NameResolver;
    use neurobridge::schema::{Sample, StepRecord};
    use neurobridge::snapshot::ModelAdapter;

    fn mirror() -> MirrorGraph {
        let model = Model::demo();
        let names = NameResolver::new(&model);
        MirrorGraph::from_snapshot(&ModelAdapter::new(&model, &names).snapshot())
    }

    fn cache() -> SimulationCache {
        let mut cache = SimulationCache::new(1);
        let rec = |node: &str, v: f64| StepRecord {
            step: 0,
            node_name: node.to_string(),
            parameters: [("probeable.decoded_output".to_string(), Sample::Vector(vec![v]))].into(),
        };
        cache.ingest(&[rec("a", 0.0), rec("squared", 2.0)]);
        cache
    }

    #[test]
    fn single_colors_everything() {
        let red = Rgb::new(1.0, 0.0, 0.0);
        let pass = Coloring::Single { color: red }.apply(["a", "stim"], &mirror(), &cache(), 0, 0.001);
        assert_eq!(pass.colors.len(), 2);
        assert!(pass.colors.values().all(|c| *c == red));
    }

    #[test]
    fn model_coloring_groups_by_attribute() {
        let m = mirror();
        let coloring = Coloring::Model {
            attribute: "n_neurons".to_string(),
            colors: ColorGenerator::default(),
        };
        let pass = coloring.apply(["a", "squared", "stim"], &m, &cache(), 0, 0.001);
        assert_ne!(pass.colors["a"], pass.colors["squared"]);
        // Nodes have no neuron count.
        assert_eq!(pass.colors["stim"], Rgb::default());
        assert!(!coloring.is_dynamic());
    }

    #[test]
    fn dynamic_gradient_and_buckets() {
        let m = mirror();
        let black = Rgb::new(0.0, 0.0, 0.0);
        let white = Rgb::new(1.0, 1.0, 1.0);
        let gradient = Coloring::ModelDynamic {
            access_path: "probeable/decoded_output".to_string(),
            get: "data[0]".to_string(),
            mapping: DynamicMapping::Gradient {
                gradient: Gradient { stops: vec![black, white] },
                range: None,
            },
        };
        assert!(gradient.is_dynamic());
        let pass = gradient.apply(["a", "squared", "stim"], &m, &cache(), 0, 0.001);
        assert_eq!(pass.colors["a"], black);
        assert_eq!(pass.colors["squared"], white);
        assert!(!pass.colors.contains_key("stim"));

        let colors = ColorGenerator::default();
        let buckets = Coloring::ModelDynamic {
            access_path: "probeable.decoded_output".to_string(),
            get: "data[0]".to_string(),
            mapping: DynamicMapping::Buckets {
                bounds: vec![1.0],
                colors: colors.clone(),
            },
        };
        let pass = buckets.apply(["a", "squared"], &m, &cache(), 0, 0.001);
        assert_eq!(pass.colors["a"], colors.color(0));
        assert_eq!(pass.colors["squared"], colors.color(1));
    }

    #[test]
    fn failing_get_skips_only_that_object() {
        let coloring = Coloring::ModelDynamic {
            access_path: "probeable.decoded_output".to_string(),
            get: "data[0] / data[1]".to_string(),
            mapping: DynamicMapping::Gradient {
                gradient: Gradient::default(),
                range: Some(Range::default()),
            },
        };
        let pass = coloring.apply(["a"], &mirror(), &cache(), 0, 0.001);
        assert!(pass.colors.is_empty());
        assert_eq!(pass.errors.len(), 1);
    }

    #[test]
    fn coloring_round_trips_as_json() {
        let c = Coloring::Model {
            attribute: "neuron_type".to_string(),
            colors: ColorGenerator::default(),
        };
        let text = serde_json::to_string(&c).unwrap();
        assert!(text.contains("\"mode\":\"MODEL\""));
        assert_eq!(serde_json::from_str::<Coloring>(&text).unwrap(), c);
    }
}
