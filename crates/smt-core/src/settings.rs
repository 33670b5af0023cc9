//! Decoder configuration loaded from TOML.
//!
//! - `DecoderConfig::from_toml(s)` parses and validates a config string
//! - Missing keys take their values from `default_config.toml`, which is
//!   embedded via `include_str!` and checked at build time

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::grammar::GrammarError;
use crate::lm::BackendError;
use crate::weights::NameConvention;

pub const DEFAULT_CONFIG_TOML: &str = include_str!("default_config.toml");

/// Returns the embedded default config TOML content.
pub fn default_toml() -> &'static str {
    DEFAULT_CONFIG_TOML
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("TOML parse error: {0}")]
    Parse(String),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("weight lines must be `name value`, got {0:?}")]
    InvalidWeightLine(String),
    #[error("unknown feature in line {0:?}")]
    UnknownFeature(String),
    #[error("dense feature {0} registered twice")]
    DuplicateFeature(String),
    #[error("{feature} cannot be used with {search} search")]
    FeatureSearchMismatch { feature: String, search: SearchAlgorithm },
    #[error("{search} search needs an externally supplied search strategy")]
    UnsupportedSearch { search: SearchAlgorithm },
    #[error("cannot read {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error(transparent)]
    Grammar(#[from] GrammarError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchAlgorithm {
    /// Phrase-based stack decoding.
    #[default]
    Stack,
    /// Hierarchical chart parsing.
    Cky,
}

impl fmt::Display for SearchAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SearchAlgorithm::Stack => "stack",
            SearchAlgorithm::Cky => "cky",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrammarConfig {
    pub owner: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecoderConfig {
    pub num_parallel_decoders: usize,
    pub search_algorithm: SearchAlgorithm,
    pub top_n: usize,
    pub pop_limit: usize,
    pub num_translation_options: usize,
    pub reordering_limit: usize,
    pub max_phrase_length: usize,
    pub default_non_terminal: String,
    pub moses_naming: bool,
    pub weights_file: Option<PathBuf>,
    pub weights: Vec<String>,
    pub weight_overwrite: String,
    pub features: Vec<String>,
    pub grammars: Vec<GrammarConfig>,
    pub lm_library: Option<PathBuf>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            num_parallel_decoders: 1,
            search_algorithm: SearchAlgorithm::Stack,
            top_n: 1,
            pop_limit: 100,
            num_translation_options: 20,
            reordering_limit: 8,
            max_phrase_length: 5,
            default_non_terminal: "X".to_string(),
            moses_naming: false,
            weights_file: None,
            weights: Vec::new(),
            weight_overwrite: String::new(),
            features: Vec::new(),
            grammars: Vec::new(),
            lm_library: None,
        }
    }
}

impl DecoderConfig {
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: DecoderConfig =
            toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file. Relative paths inside it resolve against the
    /// file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    pub fn name_convention(&self) -> NameConvention {
        if self.moses_naming {
            NameConvention::Moses
        } else {
            NameConvention::Native
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        macro_rules! check_positive_usize {
            ($field:ident) => {
                if self.$field == 0 {
                    return Err(ConfigError::InvalidValue {
                        field: stringify!($field).to_string(),
                        reason: "must be positive".to_string(),
                    });
                }
            };
        }
        macro_rules! check_non_empty {
            ($value:expr, $field:expr) => {
                if $value.trim().is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: $field.to_string(),
                        reason: "must not be empty".to_string(),
                    });
                }
            };
        }

        check_positive_usize!(num_parallel_decoders);
        check_positive_usize!(top_n);
        check_positive_usize!(pop_limit);
        check_positive_usize!(num_translation_options);
        check_positive_usize!(max_phrase_length);

        check_non_empty!(self.default_non_terminal, "default_non_terminal");
        if self.default_non_terminal.contains(['[', ']', ',']) {
            return Err(ConfigError::InvalidValue {
                field: "default_non_terminal".to_string(),
                reason: "give the bare label, e.g. \"X\"".to_string(),
            });
        }
        for (i, line) in self.features.iter().enumerate() {
            check_non_empty!(line, format!("features[{i}]"));
        }
        for (i, grammar) in self.grammars.iter().enumerate() {
            check_non_empty!(grammar.owner, format!("grammars[{i}].owner"));
        }

        // reordering_limit may be zero: monotone decoding.
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        if let Some(p) = self.weights_file.as_mut() {
            resolve(p);
        }
        if let Some(p) = self.lm_library.as_mut() {
            resolve(p);
        }
        for grammar in &mut self.grammars {
            resolve(&mut grammar.path);
        }
    }
}
