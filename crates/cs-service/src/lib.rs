//! Environment-driven configuration for the scan host.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cs_scan::{LinearOracle, OracleSet, ScanSettings};
use cs_types::{config_error, CsResult, Metric, Mode, ScanDocument, SearchSpace};

pub const CONFIG_VAR: &str = "CS_SCAN_CONFIG";
pub const MODE_VAR: &str = "CS_SCAN_MODE";
pub const ORACLES_VAR: &str = "CS_ORACLES";
pub const SEED_VAR: &str = "CS_SCAN_SEED";
pub const ROWS_VAR: &str = "CS_PREDICT_ROWS";

/// What the host needs to start one scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Saved configuration document; the preset for `mode` when absent.
    pub config_path: Option<PathBuf>,
    pub mode: Mode,
    pub oracles_path: PathBuf,
    pub seed: Option<u64>,
    /// Feature rows to predict instead of running a scan.
    pub rows_path: Option<PathBuf>,
}

impl ServiceConfig {
    pub fn from_env() -> CsResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> CsResult<Self> {
        let mode = match lookup(MODE_VAR) {
            Some(raw) => raw.parse()?,
            None => Mode::Dos,
        };
        let oracles_path = lookup(ORACLES_VAR)
            .map(PathBuf::from)
            .ok_or_else(|| config_error!("{ORACLES_VAR} must point to an oracle definitions file"))?;
        let seed = lookup(SEED_VAR)
            .map(|raw| {
                raw.trim()
                    .parse::<u64>()
                    .map_err(|e| config_error!("invalid {SEED_VAR} {raw:?}: {e}"))
            })
            .transpose()?;

        Ok(Self {
            config_path: lookup(CONFIG_VAR).map(PathBuf::from),
            mode,
            oracles_path,
            seed,
            rows_path: lookup(ROWS_VAR).map(PathBuf::from),
        })
    }

    /// The saved space if one is configured, otherwise the built-in preset.
    pub fn load_space(&self) -> CsResult<SearchSpace> {
        match &self.config_path {
            Some(path) => Ok(ScanDocument::load(path)?.into_space()),
            None => Ok(SearchSpace::preset(self.mode)),
        }
    }

    pub fn load_oracles(&self) -> CsResult<Arc<OracleSet>> {
        load_oracles(&self.oracles_path).map(Arc::new)
    }

    /// Feature rows to predict, when prediction was requested.
    pub fn load_rows(&self) -> CsResult<Option<Vec<Vec<f64>>>> {
        self.rows_path.as_ref().map(load_rows).transpose()
    }

    pub fn settings(&self) -> ScanSettings {
        match self.seed {
            Some(seed) => ScanSettings::default().with_seed(seed),
            None => ScanSettings::default(),
        }
    }
}

/// Oracle definitions file: metric display name to linear surrogate.
///
/// ```json
/// { "DoS": { "weights": [0.0, 1.5], "bias": 2.0 } }
/// ```
#[derive(Debug, Deserialize)]
#[serde(transparent)]
struct OracleDefinitions(BTreeMap<Metric, LinearOracle>);

pub fn load_oracles(path: impl AsRef<Path>) -> CsResult<OracleSet> {
    let json = std::fs::read_to_string(path.as_ref())?;
    parse_oracles(&json)
}

pub fn parse_oracles(json: &str) -> CsResult<OracleSet> {
    let OracleDefinitions(definitions) = serde_json::from_str(json)?;
    if definitions.is_empty() {
        return Err(config_error!("oracle definitions are empty"));
    }
    let mut set = OracleSet::new();
    for (metric, oracle) in definitions {
        set.insert(metric, Arc::new(oracle));
    }
    Ok(set)
}

/// Feature rows file: a JSON array of numeric arrays.
pub fn load_rows(path: impl AsRef<Path>) -> CsResult<Vec<Vec<f64>>> {
    let json = std::fs::read_to_string(path.as_ref())?;
    parse_rows(&json)
}

pub fn parse_rows(json: &str) -> CsResult<Vec<Vec<f64>>> {
    let rows: Vec<Vec<f64>> = serde_json::from_str(json)?;
    if rows.is_empty() {
        return Err(config_error!("no feature rows to predict"));
    }
    Ok(rows)
}
