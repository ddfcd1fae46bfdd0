//! A single point in the mixed categorical/continuous design space.

use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

use crate::errors::CsResult;
use crate::space::Domains;

/// Total the explicit continuous fields and the implicit balance add up to.
pub const COMPOSITION_TOTAL: f64 = 100.0;

/// Display name of the derived balance component.
pub const REMAINDER_NAME: &str = "Al%";

/// An immutable candidate configuration.
///
/// Values are stored in the declared order of the shared [`Domains`]. New
/// candidates are derived through [`Candidate::to_builder`], which copies the
/// value vectors, so no two candidates ever share mutable state.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    domains: Arc<Domains>,
    categorical: Vec<f64>,
    continuous: Vec<f64>,
}

impl Candidate {
    /// The starting point of a scan: first allowed value of every categorical
    /// variable, midpoint of every continuous domain.
    pub fn initial(domains: Arc<Domains>) -> CsResult<Self> {
        domains.validate()?;
        let categorical = domains.categorical.iter().map(|d| d.values[0]).collect();
        let continuous = domains.continuous.iter().map(|d| d.midpoint()).collect();
        Ok(Self {
            domains,
            categorical,
            continuous,
        })
    }

    pub fn domains(&self) -> &Arc<Domains> {
        &self.domains
    }

    pub fn categorical_values(&self) -> &[f64] {
        &self.categorical
    }

    pub fn continuous_values(&self) -> &[f64] {
        &self.continuous
    }

    pub fn categorical(&self, name: &str) -> Option<f64> {
        self.domains
            .categorical
            .iter()
            .position(|d| d.name == name)
            .map(|i| self.categorical[i])
    }

    pub fn continuous(&self, name: &str) -> Option<f64> {
        self.domains
            .continuous
            .iter()
            .position(|d| d.name == name)
            .map(|i| self.continuous[i])
    }

    /// Balance component: `100 - sum(continuous)`. Always recomputed.
    pub fn remainder(&self) -> f64 {
        COMPOSITION_TOTAL - self.continuous.iter().sum::<f64>()
    }

    /// Oracle input: categoricals, then the remainder, then continuous values,
    /// each group in declared order.
    pub fn feature_vector(&self) -> Vec<f64> {
        let mut features = Vec::with_capacity(self.domains.feature_len());
        features.extend_from_slice(&self.categorical);
        features.push(self.remainder());
        features.extend_from_slice(&self.continuous);
        features
    }

    /// Human-readable dump of every field plus the remainder.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for (domain, value) in self.domains.categorical.iter().zip(&self.categorical) {
            match domain.label_for(*value) {
                Some(label) => out.push_str(&format!("{}: {} ({})\n", domain.name, value, label)),
                None => out.push_str(&format!("{}: {}\n", domain.name, value)),
            }
        }
        out.push_str(&format!("{}: {:.2}\n", REMAINDER_NAME, self.remainder()));
        for (domain, value) in self.domains.continuous.iter().zip(&self.continuous) {
            out.push_str(&format!("{}: {}\n", domain.name, value));
        }
        out
    }

    /// Start a modified copy of this candidate.
    pub fn to_builder(&self) -> CandidateBuilder {
        CandidateBuilder {
            domains: Arc::clone(&self.domains),
            categorical: self.categorical.clone(),
            continuous: self.continuous.clone(),
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Owned working copy used to derive a new [`Candidate`].
#[derive(Debug, Clone)]
pub struct CandidateBuilder {
    domains: Arc<Domains>,
    categorical: Vec<f64>,
    continuous: Vec<f64>,
}

impl CandidateBuilder {
    /// Panics if `index` is outside the categorical table.
    pub fn set_categorical(&mut self, index: usize, value: f64) -> &mut Self {
        self.categorical[index] = value;
        self
    }

    /// Panics if `index` is outside the continuous table.
    pub fn set_continuous(&mut self, index: usize, value: f64) -> &mut Self {
        self.continuous[index] = value;
        self
    }

    pub fn build(self) -> Candidate {
        Candidate {
            domains: self.domains,
            categorical: self.categorical,
            continuous: self.continuous,
        }
    }
}

struct NamedValues<'a> {
    names: Vec<&'a str>,
    values: &'a [f64],
}

impl Serialize for NamedValues<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.names.iter().zip(self.values) {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl Serialize for Candidate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Candidate", 3)?;
        state.serialize_field(
            "categorical",
            &NamedValues {
                names: self.domains.categorical.iter().map(|d| d.name.as_str()).collect(),
                values: &self.categorical,
            },
        )?;
        state.serialize_field("remainder", &self.remainder())?;
        state.serialize_field(
            "continuous",
            &NamedValues {
                names: self.domains.continuous.iter().map(|d| d.name.as_str()).collect(),
                values: &self.continuous,
            },
        )?;
        state.end()
    }
}
