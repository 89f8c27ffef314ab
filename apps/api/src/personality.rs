//! Personality trait vector: the 5-dimensional output of the trait model.
//!
//! Trait order is fixed and load-bearing: the fused model emits its five scalars
//! in exactly this order, and `TraitVector::from_model_output` maps them positionally.
//! Scores are raw model outputs and are NOT range-constrained.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One of the five personality dimensions scored per answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trait {
    Extraversion,
    Neuroticism,
    Agreeableness,
    Conscientiousness,
    Openness,
}

impl Trait {
    /// Model output order.
    pub const ALL: [Trait; 5] = [
        Trait::Extraversion,
        Trait::Neuroticism,
        Trait::Agreeableness,
        Trait::Conscientiousness,
        Trait::Openness,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Trait::Extraversion => "extraversion",
            Trait::Neuroticism => "neuroticism",
            Trait::Agreeableness => "agreeableness",
            Trait::Conscientiousness => "conscientiousness",
            Trait::Openness => "openness",
        }
    }

    fn position(&self) -> usize {
        match self {
            Trait::Extraversion => 0,
            Trait::Neuroticism => 1,
            Trait::Agreeableness => 2,
            Trait::Conscientiousness => 3,
            Trait::Openness => 4,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("trait model produced {actual} outputs, expected 5")]
pub struct OutputArityError {
    pub actual: usize,
}

/// Ordered trait → score mapping. All five keys are always present; serde
/// rejects a document missing any of them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TraitVector {
    pub extraversion: f64,
    pub neuroticism: f64,
    pub agreeableness: f64,
    pub conscientiousness: f64,
    pub openness: f64,
}

impl TraitVector {
    pub fn from_array(scores: [f64; 5]) -> Self {
        Self {
            extraversion: scores[0],
            neuroticism: scores[1],
            agreeableness: scores[2],
            conscientiousness: scores[3],
            openness: scores[4],
        }
    }

    /// Maps raw model outputs positionally onto `Trait::ALL`.
    pub fn from_model_output(outputs: &[f32]) -> Result<Self, OutputArityError> {
        if outputs.len() != Trait::ALL.len() {
            return Err(OutputArityError {
                actual: outputs.len(),
            });
        }
        let mut scores = [0.0_f64; 5];
        for (slot, value) in scores.iter_mut().zip(outputs) {
            *slot = f64::from(*value);
        }
        Ok(Self::from_array(scores))
    }

    pub fn to_array(&self) -> [f64; 5] {
        [
            self.extraversion,
            self.neuroticism,
            self.agreeableness,
            self.conscientiousness,
            self.openness,
        ]
    }

    pub fn get(&self, t: Trait) -> f64 {
        self.to_array()[t.position()]
    }

    /// Iterates `(trait, score)` pairs in model order.
    pub fn iter(&self) -> impl Iterator<Item = (Trait, f64)> + '_ {
        Trait::ALL.iter().map(move |t| (*t, self.get(*t)))
    }

    /// Display rounding for the HTTP boundary. Stored vectors keep full precision.
    pub fn rounded(&self, decimals: i32) -> Self {
        let factor = 10_f64.powi(decimals);
        let mut scores = self.to_array();
        for s in scores.iter_mut() {
            *s = (*s * factor).round() / factor;
        }
        Self::from_array(scores)
    }
}
