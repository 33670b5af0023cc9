//! Feature names, weights and per-derivation feature vectors.
//!
//! Dense features are registered once, before any scoring, and own a stable
//! slot for the lifetime of the weight vector. Anything else is sparse and
//! addressed by name.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Deserialize;
use tracing::{debug, info};

use crate::settings::{ConfigError, DecoderConfig};

// ---------------------------------------------------------------------------
// Naming
// ---------------------------------------------------------------------------

/// How weight names are spelled in configuration files and output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameConvention {
    #[default]
    Native,
    /// `tm-pt`/`lm-0` style names with a trailing `=` allowed on input.
    Moses,
}

impl NameConvention {
    pub fn to_internal(self, name: &str) -> String {
        match self {
            NameConvention::Native => name.to_string(),
            NameConvention::Moses => {
                let name = name.strip_suffix('=').unwrap_or(name);
                if name == "OOV_Penalty" {
                    "OOVPenalty".to_string()
                } else if name.starts_with("tm-") || name.starts_with("lm-") {
                    name.replace('-', "_")
                } else {
                    name.to_string()
                }
            }
        }
    }

    pub fn to_external(self, name: &str) -> String {
        match self {
            NameConvention::Moses if name.starts_with("tm_") || name.starts_with("lm_") => {
                name.replace('_', "-")
            }
            _ => name.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Dense feature registry
// ---------------------------------------------------------------------------

/// Frozen list of dense feature names; the position of a name is its slot.
#[derive(Debug, Default)]
pub struct DenseFeatures {
    names: Vec<String>,
    slots: HashMap<String, usize>,
}

impl DenseFeatures {
    pub fn new(names: Vec<String>) -> Result<Self, ConfigError> {
        let mut slots = HashMap::with_capacity(names.len());
        for (slot, name) in names.iter().enumerate() {
            if slots.insert(name.clone(), slot).is_some() {
                return Err(ConfigError::DuplicateFeature(name.clone()));
            }
        }
        Ok(Self { names, slots })
    }

    pub fn slot(&self, name: &str) -> Option<usize> {
        self.slots.get(name).copied()
    }

    pub fn name(&self, slot: usize) -> Option<&str> {
        self.names.get(slot).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Raw weight table (before dense registration)
// ---------------------------------------------------------------------------

/// Weights as read from configuration, keyed by internal name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightTable {
    entries: BTreeMap<String, f32>,
}

impl WeightTable {
    /// Run the full initialisation pipeline: weights file, then inline
    /// lines, then the overwrite string. Later sources win.
    pub fn from_config(config: &DecoderConfig) -> Result<Self, ConfigError> {
        let convention = config.name_convention();
        let mut table = WeightTable::default();
        if let Some(path) = &config.weights_file {
            table.read_file(path, convention)?;
        }
        for line in &config.weights {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 2 {
                return Err(ConfigError::InvalidWeightLine(line.clone()));
            }
            let value = parse_weight(fields[1], line)?;
            table.set(&convention.to_internal(fields[0]), value);
        }
        table.apply_overwrite(&config.weight_overwrite, convention)?;
        debug!(weights = table.len(), "weight table assembled");
        Ok(table)
    }

    /// Read `name value` lines; blank, `#` and `//` lines are skipped.
    pub fn read_file(&mut self, path: &Path, convention: NameConvention) -> Result<(), ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut read = 0usize;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 2 {
                return Err(ConfigError::InvalidWeightLine(line.to_string()));
            }
            let value = parse_weight(fields[1], line)?;
            self.set(&convention.to_internal(fields[0]), value);
            read += 1;
        }
        info!(path = %path.display(), weights = read, "read weights file");
        Ok(())
    }

    /// Apply a whitespace-separated `name value name value ...` string.
    pub fn apply_overwrite(&mut self, overwrite: &str, convention: NameConvention) -> Result<(), ConfigError> {
        let fields: Vec<&str> = overwrite.split_whitespace().collect();
        if fields.len() % 2 != 0 {
            return Err(ConfigError::InvalidWeightLine(overwrite.to_string()));
        }
        for pair in fields.chunks(2) {
            let value = parse_weight(pair[1], overwrite)?;
            self.set(&convention.to_internal(pair[0]), value);
        }
        Ok(())
    }

    pub fn set(&mut self, name: &str, value: f32) {
        self.entries.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.entries.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_weight(value: &str, line: &str) -> Result<f32, ConfigError> {
    value
        .parse::<f32>()
        .map_err(|_| ConfigError::InvalidWeightLine(line.to_string()))
}

// ---------------------------------------------------------------------------
// Live weights
// ---------------------------------------------------------------------------

struct WeightValues {
    dense: Vec<f32>,
    sparse: HashMap<String, f32>,
}

/// The process-wide weight vector.
///
/// Read concurrently by every worker; written at start-up and by the
/// `set_weights` directive. There is no isolation between a write and a
/// sentence that is mid-search: later edges simply see the new value.
pub struct Weights {
    dense_names: Arc<DenseFeatures>,
    values: RwLock<WeightValues>,
}

impl Weights {
    pub fn new(dense_names: Arc<DenseFeatures>, table: &WeightTable) -> Self {
        let mut dense = vec![0.0; dense_names.len()];
        let mut sparse = HashMap::new();
        for (name, value) in table.iter() {
            match dense_names.slot(name) {
                Some(slot) => dense[slot] = value,
                None => {
                    sparse.insert(name.to_string(), value);
                }
            }
        }
        for (slot, name) in dense_names.names().iter().enumerate() {
            debug!(feature = %name, slot, weight = dense[slot], "dense weight");
        }
        Self {
            dense_names,
            values: RwLock::new(WeightValues { dense, sparse }),
        }
    }

    pub fn dense_features(&self) -> &Arc<DenseFeatures> {
        &self.dense_names
    }

    pub fn dense(&self, slot: usize) -> f32 {
        self.read().dense.get(slot).copied().unwrap_or(0.0)
    }

    pub fn get(&self, name: &str) -> f32 {
        let values = self.read();
        match self.dense_names.slot(name) {
            Some(slot) => values.dense[slot],
            None => values.sparse.get(name).copied().unwrap_or(0.0),
        }
    }

    /// Set a weight, returning the previous value.
    pub fn set(&self, name: &str, value: f32) -> f32 {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        match self.dense_names.slot(name) {
            Some(slot) => std::mem::replace(&mut values.dense[slot], value),
            None => values.sparse.insert(name.to_string(), value).unwrap_or(0.0),
        }
    }

    /// Dense weights in slot order.
    pub fn dense_snapshot(&self) -> Vec<(String, f32)> {
        let values = self.read();
        self.dense_names
            .names()
            .iter()
            .cloned()
            .zip(values.dense.iter().copied())
            .collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, WeightValues> {
        self.values.read().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Feature vectors
// ---------------------------------------------------------------------------

/// Unweighted feature values of one derivation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureVector {
    dense: Vec<f32>,
    sparse: BTreeMap<String, f32>,
}

impl FeatureVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dense(&mut self, slot: usize, value: f32) {
        if self.dense.len() <= slot {
            self.dense.resize(slot + 1, 0.0);
        }
        self.dense[slot] += value;
    }

    pub fn add_sparse(&mut self, name: &str, value: f32) {
        *self.sparse.entry(name.to_string()).or_insert(0.0) += value;
    }

    pub fn dense(&self, slot: usize) -> f32 {
        self.dense.get(slot).copied().unwrap_or(0.0)
    }

    pub fn sparse(&self, name: &str) -> Option<f32> {
        self.sparse.get(name).copied()
    }

    pub fn get(&self, name: &str, names: &DenseFeatures) -> f32 {
        match names.slot(name) {
            Some(slot) => self.dense(slot),
            None => self.sparse(name).unwrap_or(0.0),
        }
    }

    pub fn merge(&mut self, other: &FeatureVector) {
        for (slot, &value) in other.dense.iter().enumerate() {
            self.add_dense(slot, value);
        }
        for (name, &value) in &other.sparse {
            self.add_sparse(name, value);
        }
    }

    pub fn inner_product(&self, weights: &Weights) -> f32 {
        let dense: f32 = self
            .dense
            .iter()
            .enumerate()
            .map(|(slot, v)| v * weights.dense(slot))
            .sum();
        let sparse: f32 = self.sparse.iter().map(|(n, v)| v * weights.get(n)).sum();
        dense + sparse
    }

    /// `name=value` pairs, space-joined and newline-terminated: every dense
    /// feature in slot order, then non-zero sparse features by name.
    pub fn text_format(&self, names: &DenseFeatures, convention: NameConvention) -> String {
        let mut out = String::new();
        let dense = names
            .names()
            .iter()
            .enumerate()
            .map(|(slot, name)| (name.as_str(), self.dense(slot)));
        let sparse = self
            .sparse
            .iter()
            .filter(|(_, v)| **v != 0.0)
            .map(|(n, v)| (n.as_str(), *v));
        for (name, value) in dense.chain(sparse) {
            if !out.is_empty() {
                out.push(' ');
            }
            let _ = write!(out, "{}={:.3}", convention.to_external(name), value);
        }
        out.push('\n');
        out
    }
}
