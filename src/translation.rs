//! Results of translating one sentence.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use smt_core::search::Derivation;
use smt_core::weights::{DenseFeatures, NameConvention};

/// One output alternative, already rendered for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslatedDerivation {
    pub target: String,
    /// `name=value` pairs, space-joined and newline-terminated.
    pub features: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum Outcome {
    Success { derivations: Vec<TranslatedDerivation> },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Translation {
    id: u32,
    #[serde(flatten)]
    outcome: Outcome,
    elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    directive_output: Option<serde_json::Value>,
}

impl Translation {
    pub fn success(
        id: u32,
        derivations: Vec<Derivation>,
        names: &DenseFeatures,
        convention: NameConvention,
        elapsed: Duration,
    ) -> Self {
        let derivations = derivations
            .into_iter()
            .map(|d| TranslatedDerivation {
                features: d.features.text_format(names, convention),
                target: d.target,
                score: d.score,
            })
            .collect();
        Self {
            id,
            outcome: Outcome::Success { derivations },
            elapsed_ms: elapsed.as_millis() as u64,
            directive_output: None,
        }
    }

    pub fn failed(id: u32, reason: impl Into<String>) -> Self {
        Self {
            id,
            outcome: Outcome::Failed { reason: reason.into() },
            elapsed_ms: 0,
            directive_output: None,
        }
    }

    pub fn with_directive_output(mut self, output: Option<serde_json::Value>) -> Self {
        self.directive_output = output;
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed_ms = elapsed.as_millis() as u64;
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Failed { .. })
    }

    pub fn failure(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Failed { reason } => Some(reason),
            Outcome::Success { .. } => None,
        }
    }

    /// All kept alternatives, best first. Empty for a failure.
    pub fn derivations(&self) -> &[TranslatedDerivation] {
        match &self.outcome {
            Outcome::Success { derivations } => derivations,
            Outcome::Failed { .. } => &[],
        }
    }

    pub fn best(&self) -> Option<&TranslatedDerivation> {
        self.derivations().first()
    }

    /// Best target string; empty for a failure.
    pub fn target(&self) -> &str {
        self.best().map_or("", |d| d.target.as_str())
    }

    /// Best score; negative infinity for a failure.
    pub fn score(&self) -> f32 {
        self.best().map_or(f32::NEG_INFINITY, |d| d.score)
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    pub fn directive_output(&self) -> Option<&serde_json::Value> {
        self.directive_output.as_ref()
    }
}

/// `id ||| target ||| features ||| score`, one line per alternative.
impl fmt::Display for Translation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Outcome::Failed { reason } => write!(f, "{} ||| ||| FAILED: {} ||| -inf", self.id, reason),
            Outcome::Success { derivations } => {
                for (i, d) in derivations.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(
                        f,
                        "{} ||| {} ||| {} ||| {:.3}",
                        self.id,
                        d.target,
                        d.features.trim_end(),
                        d.score
                    )?;
                }
                Ok(())
            }
        }
    }
}
