//! Search-space definitions: variable domains, targets and the per-mode presets.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::errors::{CsError, CsResult};
use crate::validation_error;

/// Name reserved for the "perturb every variable" sampler target.
pub const ALL_VARIABLES: &str = "all";

/// Which family of oracles and targets a scan optimizes against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    #[serde(rename = "DoS")]
    Dos,
    Mechanical,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dos => write!(f, "DoS"),
            Self::Mechanical => write!(f, "Mechanical"),
        }
    }
}

impl FromStr for Mode {
    type Err = CsError;

    fn from_str(s: &str) -> CsResult<Self> {
        match s.trim() {
            s if s.eq_ignore_ascii_case("dos") => Ok(Self::Dos),
            s if s.eq_ignore_ascii_case("mechanical") => Ok(Self::Mechanical),
            other => Err(validation_error!("unknown scan mode: {other}")),
        }
    }
}

/// How oracle predictions are reduced to one scalar loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LossPolicy {
    /// `|prediction - target|` for a single metric.
    Linear,
    /// Mean of `|prediction / target - 1| * 100` over two metrics.
    PercentageComposite,
}

impl fmt::Display for LossPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linear => write!(f, "Linear"),
            Self::PercentageComposite => write!(f, "Percentage"),
        }
    }
}

/// A property predicted by an oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Metric {
    #[serde(rename = "DoS")]
    Dos,
    #[serde(rename = "elongation%")]
    Elongation,
    #[serde(rename = "tensile strength(MPa)")]
    TensileStrength,
    #[serde(rename = "yield strength(MPa)")]
    YieldStrength,
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Dos => "DoS",
            Self::Elongation => "elongation%",
            Self::TensileStrength => "tensile strength(MPa)",
            Self::YieldStrength => "yield strength(MPa)",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Legend entry explaining what a categorical code means.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryLabel {
    pub value: f64,
    pub label: String,
}

/// A discrete variable and its allowed values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalDomain {
    pub name: String,
    pub values: Vec<f64>,
    /// Optional legend, only used for reporting.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<CategoryLabel>,
}

impl CategoricalDomain {
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            values,
            labels: Vec::new(),
        }
    }

    pub fn with_labels(mut self, labels: &[(f64, &str)]) -> Self {
        self.labels = labels
            .iter()
            .map(|(value, label)| CategoryLabel {
                value: *value,
                label: (*label).to_string(),
            })
            .collect();
        self
    }

    pub fn label_for(&self, value: f64) -> Option<&str> {
        self.labels
            .iter()
            .find(|l| l.value == value)
            .map(|l| l.label.as_str())
    }
}

/// A real-valued variable bounded to `[min, max]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuousDomain {
    pub name: String,
    pub min: f64,
    pub max: f64,
}

impl ContinuousDomain {
    pub fn new(name: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            min,
            max,
        }
    }

    /// `min == max`: the variable is pinned to a constant.
    pub fn is_fixed(&self) -> bool {
        self.min == self.max
    }

    pub fn midpoint(&self) -> f64 {
        (self.min + self.max) / 2.0
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Position of a named variable inside [`Domains`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableRef {
    Categorical(usize),
    Continuous(usize),
}

/// Ordered categorical and continuous variable tables.
///
/// Declaration order is significant: it fixes the oracle feature layout.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Domains {
    pub categorical: Vec<CategoricalDomain>,
    pub continuous: Vec<ContinuousDomain>,
}

impl Domains {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_categorical(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.categorical.push(CategoricalDomain::new(name, values));
        self
    }

    pub fn add_labelled(
        mut self,
        name: impl Into<String>,
        values: Vec<f64>,
        labels: &[(f64, &str)],
    ) -> Self {
        self.categorical
            .push(CategoricalDomain::new(name, values).with_labels(labels));
        self
    }

    pub fn add_continuous(mut self, name: impl Into<String>, min: f64, max: f64) -> Self {
        self.continuous.push(ContinuousDomain::new(name, min, max));
        self
    }

    /// Add several variables sharing the degenerate domain `[0, 0]`.
    pub fn add_absent(mut self, names: &[&str]) -> Self {
        for name in names {
            self.continuous.push(ContinuousDomain::new(*name, 0.0, 0.0));
        }
        self
    }

    /// All variable names: categorical first, then continuous, in declared order.
    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.categorical
            .iter()
            .map(|d| d.name.as_str())
            .chain(self.continuous.iter().map(|d| d.name.as_str()))
    }

    pub fn len(&self) -> usize {
        self.categorical.len() + self.continuous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Length of the oracle feature vector: categoricals, remainder, continuous.
    pub fn feature_len(&self) -> usize {
        self.categorical.len() + 1 + self.continuous.len()
    }

    pub fn find(&self, name: &str) -> Option<VariableRef> {
        if let Some(i) = self.categorical.iter().position(|d| d.name == name) {
            return Some(VariableRef::Categorical(i));
        }
        self.continuous
            .iter()
            .position(|d| d.name == name)
            .map(VariableRef::Continuous)
    }

    pub fn validate(&self) -> CsResult<()> {
        let mut seen = HashSet::new();
        for name in self.variable_names() {
            if name.is_empty() {
                return Err(validation_error!("variable names must not be empty"));
            }
            if name == ALL_VARIABLES {
                return Err(validation_error!(
                    "'{ALL_VARIABLES}' is reserved and cannot name a variable"
                ));
            }
            if !seen.insert(name) {
                return Err(validation_error!("duplicate variable name: {name}"));
            }
        }

        for domain in &self.categorical {
            if domain.values.is_empty() {
                return Err(validation_error!(
                    "categorical variable '{}' needs at least one option",
                    domain.name
                ));
            }
            if let Some(bad) = domain.values.iter().find(|v| !v.is_finite()) {
                return Err(validation_error!(
                    "categorical variable '{}' has non-finite option {bad}",
                    domain.name
                ));
            }
        }

        for domain in &self.continuous {
            if !domain.min.is_finite() || !domain.max.is_finite() {
                return Err(validation_error!(
                    "continuous variable '{}' has non-finite bounds",
                    domain.name
                ));
            }
            if domain.min > domain.max {
                return Err(validation_error!(
                    "continuous variable '{}' has min {} greater than max {}",
                    domain.name,
                    domain.min,
                    domain.max
                ));
            }
        }

        Ok(())
    }
}

/// Degree-of-sensitisation search: one target, linear loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DosSpace {
    pub target_dos: f64,
    pub domains: Domains,
    pub max_steps: usize,
}

/// Mechanical-property search: elongation and yield strength, percentage loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MechanicalSpace {
    pub target_elongation: f64,
    pub target_yield_strength: f64,
    pub domains: Domains,
    pub max_steps: usize,
}

/// The full search space, one variant per mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode")]
pub enum SearchSpace {
    #[serde(rename = "DoS")]
    Dos(DosSpace),
    Mechanical(MechanicalSpace),
}

const DOS_ELEMENTS: [&str; 16] = [
    "Ag%", "Ca%", "Ce%", "Cr%", "Cu%", "Fe%", "Ge%", "Mg%", "Mn%", "Nd%", "Ni%", "Si%", "Sr%",
    "Ti%", "Zn%", "Zr%",
];

const MECHANICAL_ELEMENTS: [&str; 24] = [
    "Ag%", "B%", "Be%", "Bi%", "Cd%", "Co%", "Cr%", "Cu%", "Er%", "Eu%", "Fe%", "Ga%", "Li%",
    "Mg%", "Mn%", "Ni%", "Pb%", "Sc%", "Si%", "Sn%", "Ti%", "V%", "Zn%", "Zr%",
];

const RECRYSTALLISED_LEGEND: [(f64, &str); 2] = [(0.0, "False"), (1.0, "True")];

const TEMPER_LEGEND: [(f64, &str); 7] = [
    (1.0, "H (lab)"),
    (2.0, "H116"),
    (3.0, "H131"),
    (4.0, "H321"),
    (5.0, "O"),
    (6.0, "Stabilised"),
    (7.0, "Unknown"),
];

const PROCESSING_LEGEND: [(f64, &str); 13] = [
    (1.0, "As-cast or as-fabricated"),
    (2.0, "Annealed, solutionised"),
    (3.0, "H (soft)"),
    (4.0, "H (hard)"),
    (5.0, "T1"),
    (6.0, "T2"),
    (7.0, "T3 (incl. T341 etc.)"),
    (8.0, "T4"),
    (9.0, "T5"),
    (10.0, "T6 (incl. T651 etc.)"),
    (11.0, "T7 (incl. T777 etc.)"),
    (12.0, "T8 (incl. T851 etc.)"),
    (13.0, "Lab routine or unknown"),
];

/// Build an element table where every element is absent except `varied`,
/// which gets `[min, max]`.
fn element_domains(domains: Domains, elements: &[&str], varied: &str, min: f64, max: f64) -> Domains {
    elements.iter().fold(domains, |acc, name| {
        if *name == varied {
            acc.add_continuous(*name, min, max)
        } else {
            acc.add_absent(&[*name])
        }
    })
}

impl SearchSpace {
    /// Build a DoS space and validate it.
    pub fn dos(target_dos: f64, domains: Domains, max_steps: usize) -> CsResult<Self> {
        let space = Self::Dos(DosSpace {
            target_dos,
            domains,
            max_steps,
        });
        space.validate()?;
        Ok(space)
    }

    /// Build a Mechanical space and validate it.
    pub fn mechanical(
        target_elongation: f64,
        target_yield_strength: f64,
        domains: Domains,
        max_steps: usize,
    ) -> CsResult<Self> {
        let space = Self::Mechanical(MechanicalSpace {
            target_elongation,
            target_yield_strength,
            domains,
            max_steps,
        });
        space.validate()?;
        Ok(space)
    }

    /// Reference DoS configuration.
    pub fn dos_preset() -> Self {
        let domains = Domains::new()
            .add_categorical("time(days)", vec![7.0])
            .add_categorical("temperature(C)", vec![150.0])
            .add_labelled("recrystallised", vec![1.0], &RECRYSTALLISED_LEGEND)
            .add_labelled("temper", vec![1.0, 2.0, 4.0, 5.0], &TEMPER_LEGEND);
        Self::Dos(DosSpace {
            target_dos: 10.0,
            domains: element_domains(domains, &DOS_ELEMENTS, "Mg%", 4.0, 5.5),
            max_steps: 1000,
        })
    }

    /// Reference Mechanical configuration.
    pub fn mechanical_preset() -> Self {
        let domains = Domains::new().add_labelled(
            "processing condition",
            vec![1.0, 2.0, 4.0, 6.0, 9.0, 10.0],
            &PROCESSING_LEGEND,
        );
        Self::Mechanical(MechanicalSpace {
            target_elongation: 6.0,
            target_yield_strength: 250.0,
            domains: element_domains(domains, &MECHANICAL_ELEMENTS, "Mg%", 4.0, 5.5),
            max_steps: 1000,
        })
    }

    pub fn preset(mode: Mode) -> Self {
        match mode {
            Mode::Dos => Self::dos_preset(),
            Mode::Mechanical => Self::mechanical_preset(),
        }
    }

    pub fn mode(&self) -> Mode {
        match self {
            Self::Dos(_) => Mode::Dos,
            Self::Mechanical(_) => Mode::Mechanical,
        }
    }

    pub fn loss_policy(&self) -> LossPolicy {
        match self {
            Self::Dos(_) => LossPolicy::Linear,
            Self::Mechanical(_) => LossPolicy::PercentageComposite,
        }
    }

    pub fn domains(&self) -> &Domains {
        match self {
            Self::Dos(s) => &s.domains,
            Self::Mechanical(s) => &s.domains,
        }
    }

    pub fn max_steps(&self) -> usize {
        match self {
            Self::Dos(s) => s.max_steps,
            Self::Mechanical(s) => s.max_steps,
        }
    }

    /// Metrics entering the loss, paired with their target values.
    pub fn targets(&self) -> Vec<(Metric, f64)> {
        match self {
            Self::Dos(s) => vec![(Metric::Dos, s.target_dos)],
            Self::Mechanical(s) => vec![
                (Metric::Elongation, s.target_elongation),
                (Metric::YieldStrength, s.target_yield_strength),
            ],
        }
    }

    /// Metrics shown in the final report.
    pub fn reported_metrics(&self) -> &'static [Metric] {
        match self {
            Self::Dos(_) => &[Metric::Dos],
            Self::Mechanical(_) => &[
                Metric::Elongation,
                Metric::TensileStrength,
                Metric::YieldStrength,
            ],
        }
    }

    pub fn validate(&self) -> CsResult<()> {
        if self.max_steps() < 1 {
            return Err(validation_error!(
                "max steps must be a positive integer, got {}",
                self.max_steps()
            ));
        }

        for (metric, target) in self.targets() {
            if !target.is_finite() {
                return Err(validation_error!("target {metric} must be finite"));
            }
            if self.loss_policy() == LossPolicy::PercentageComposite && target == 0.0 {
                return Err(validation_error!(
                    "target {metric} must be non-zero under the percentage loss"
                ));
            }
        }

        self.domains().validate()
    }
}
