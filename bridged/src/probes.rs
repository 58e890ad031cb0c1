//! Per-session probe registry.
//!
//! At most one probe per `(target, attribute, sample_every)`. The registry
//! only records what should be probed; the simulator is built from it on the
//! first step and thrown away on reset.

use thiserror::Error;

use neurobridge::access_path::AccessPath;
use neurobridge::model::{Model, ObjectKind, Target};
use neurobridge::resolver::NameResolver;
use neurobridge::schema::Observe;
use neurobridge::simulator::ProbeSpec;

#[derive(Debug, Error, PartialEq)]
pub enum ObserveError {
    #[error("unknown source `{0}`")]
    UnknownSource(String),
    #[error("access path `{0}` is not of the form [neurons.]probeable.<attr>")]
    UnsupportedPath(String),
    #[error("cannot probe a {0}")]
    UnsupportedSource(String),
    #[error("`{attr}` is not probeable on `{source_name}` (probeable: {probeable:?})")]
    NotProbeable {
        source_name: String,
        attr: String,
        probeable: Vec<String>,
    },
    #[error("simulation already running; send a reset carrying this observation instead")]
    AfterStep,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledProbe {
    pub spec: ProbeSpec,
    /// Resolver name of the source, used as `node_name` in step records.
    pub source: String,
    /// Canonical access path, used as the parameter key in step records.
    pub access_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Installed {
    New,
    Existing,
}

#[derive(Debug, Default)]
pub struct ProbeRegistry {
    probes: Vec<InstalledProbe>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate an `Observe` request and record its probe.
    ///
    /// `locked` is set once a simulator exists; new probes are refused then,
    /// duplicates of installed ones are still accepted.
    pub fn observe(
        &mut self,
        model: &Model,
        names: &NameResolver,
        req: &Observe,
        locked: bool,
    ) -> Result<Installed, ObserveError> {
        let probe = resolve(model, names, req)?;
        if self.probes.iter().any(|p| p.spec == probe.spec) {
            return Ok(Installed::Existing);
        }
        if locked {
            return Err(ObserveError::AfterStep);
        }
        self.probes.push(probe);
        Ok(Installed::New)
    }

    pub fn specs(&self) -> Vec<ProbeSpec> {
        self.probes.iter().map(|p| p.spec.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstalledProbe> {
        self.probes.iter()
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    pub fn clear(&mut self) {
        self.probes.clear();
    }
}

fn resolve(model: &Model, names: &NameResolver, req: &Observe) -> Result<InstalledProbe, ObserveError> {
    let id = names
        .object(&req.source)
        .ok_or_else(|| ObserveError::UnknownSource(req.source.clone()))?;

    let path = AccessPath::parse(&req.access_path);
    let AccessPath::Probeable { scope, attr } = &path else {
        return Err(ObserveError::UnsupportedPath(req.access_path.clone()));
    };

    let target = Target::with_scope(id, *scope);
    let kind = match model.target_kind(target) {
        Some(
            kind @ (ObjectKind::Ensemble
            | ObjectKind::Node
            | ObjectKind::Connection
            | ObjectKind::Neurons),
        ) => kind,
        Some(other) => return Err(ObserveError::UnsupportedSource(other.to_string())),
        // `neurons.` on something that is not an ensemble.
        None => {
            let kind = model.kind(id).map_or("missing object".to_string(), |k| k.to_string());
            return Err(ObserveError::UnsupportedSource(format!("{kind}'s neurons")));
        }
    };

    let probeable = model.probeable(target);
    if !probeable.contains(&attr.as_str()) {
        return Err(ObserveError::NotProbeable {
            source_name: format!("{} ({kind})", req.source),
            attr: attr.clone(),
            probeable: probeable.iter().map(|s| s.to_string()).collect(),
        });
    }

    Ok(InstalledProbe {
        spec: ProbeSpec::new(target, attr, req.sample_every),
        source: req.source.clone(),
        access_path: path.to_string(),
    })
}
