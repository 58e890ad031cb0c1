//! Access paths name an attribute of a model entity.
//!
//! They double as probe specifiers on the backend and as cache-series keys on the
//! viewer. `.` and `/` are both accepted as separators, so `probeable.decoded_output`
//! and `probeable/decoded_output` address the same attribute.

use std::fmt;

/// Which part of the source object an access path reaches into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// The source object itself.
    Object,
    /// The `neurons` of an ensemble.
    Neurons,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessPath {
    /// `[neurons/]probeable/<attr>`: a sampler on a probeable attribute.
    Probeable { scope: Scope, attr: String },
    /// `neurons.tuning_curves`
    TuningCurves,
    /// `neurons.response_curves`
    ResponseCurves,
    /// Any other attribute path; read from the static model description.
    Static(Vec<String>),
}

pub fn segments(path: &str) -> Vec<&str> {
    path.split(['.', '/'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

impl AccessPath {
    pub fn parse(path: &str) -> Self {
        let segs = segments(path);
        match segs.as_slice() {
            ["probeable", attr] => AccessPath::Probeable {
                scope: Scope::Object,
                attr: (*attr).to_string(),
            },
            ["neurons", "probeable", attr] => AccessPath::Probeable {
                scope: Scope::Neurons,
                attr: (*attr).to_string(),
            },
            ["neurons", "tuning_curves"] => AccessPath::TuningCurves,
            ["neurons", "response_curves"] => AccessPath::ResponseCurves,
            _ => AccessPath::Static(segs.iter().map(|s| s.to_string()).collect()),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        !matches!(self, AccessPath::Static(_))
    }
}

impl fmt::Display for AccessPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessPath::Probeable {
                scope: Scope::Object,
                attr,
            } => write!(f, "probeable.{attr}"),
            AccessPath::Probeable {
                scope: Scope::Neurons,
                attr,
            } => write!(f, "neurons.probeable.{attr}"),
            AccessPath::TuningCurves => f.write_str("neurons.tuning_curves"),
            AccessPath::ResponseCurves => f.write_str("neurons.response_curves"),
            AccessPath::Static(segs) => f.write_str(&segs.join(".")),
        }
    }
}
