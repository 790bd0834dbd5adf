//! Clinical benchmark comparison
//!
//! A static table of reference figures for the conditions VoxRay can flag,
//! and a verdict comparing a model confidence against the typical radiologist
//! sensitivity for that condition. Contextual only, never a diagnostic rule.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::labels::DiagnosisCode;

/// Width of the "approaches" band below the reference sensitivity
pub const APPROACH_MARGIN: f32 = 0.1;

/// Conditions with published reference figures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Pneumonia,
    LungCancer,
}

impl Condition {
    /// Exhaustive mapping from diagnosis codes; `None` means no reference exists
    pub fn for_diagnosis(code: &DiagnosisCode) -> Option<Self> {
        match code {
            DiagnosisCode::NormalPneumonia | DiagnosisCode::Pneumonia => Some(Condition::Pneumonia),
            DiagnosisCode::LungCancer => Some(Condition::LungCancer),
            DiagnosisCode::NormalLung
            | DiagnosisCode::NormalBone
            | DiagnosisCode::Fractured
            | DiagnosisCode::Unknown(_) => None,
        }
    }

    pub fn benchmark(&self) -> Benchmark {
        match self {
            Condition::Pneumonia => Benchmark {
                radiologist_sensitivity: 0.85,
                radiologist_specificity: 0.90,
                state_of_the_art_auc: 0.96,
            },
            Condition::LungCancer => Benchmark {
                radiologist_sensitivity: 0.78,
                radiologist_specificity: 0.92,
                state_of_the_art_auc: 0.94,
            },
        }
    }
}

/// Reference figures for one condition
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Benchmark {
    pub radiologist_sensitivity: f32,
    pub radiologist_specificity: f32,
    pub state_of_the_art_auc: f32,
}

/// Qualitative position of a confidence relative to the reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonVerdict {
    MeetsOrExceedsReference,
    ApproachesReference,
    BelowReferenceRecommendReview,
    NoBenchmarkAvailable,
}

impl ComparisonVerdict {
    /// Whether the verdict asks for a human to look at the case
    pub fn recommends_review(&self) -> bool {
        matches!(self, ComparisonVerdict::BelowReferenceRecommendReview)
    }
}

impl fmt::Display for ComparisonVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ComparisonVerdict::MeetsOrExceedsReference => {
                "Model confidence meets or exceeds typical radiologist sensitivity."
            }
            ComparisonVerdict::ApproachesReference => {
                "Model confidence approaches typical radiologist sensitivity."
            }
            ComparisonVerdict::BelowReferenceRecommendReview => {
                "Model confidence is below typical screening thresholds; human review is strongly recommended."
            }
            ComparisonVerdict::NoBenchmarkAvailable => {
                "No benchmark mapping available for this class."
            }
        };
        write!(f, "{}", text)
    }
}

/// Verdict plus the figures it was derived from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkComparison {
    pub verdict: ComparisonVerdict,
    pub message: String,
    pub condition: Option<Condition>,
    pub benchmark: Option<Benchmark>,
}

/// Stateless lookup over the static benchmark table
#[derive(Debug, Clone, Copy, Default)]
pub struct BenchmarkComparator;

impl BenchmarkComparator {
    pub fn new() -> Self {
        Self
    }

    /// Verdict for a raw class label; unmapped labels are a normal outcome
    pub fn compare(&self, label: &str, confidence: f32) -> ComparisonVerdict {
        self.compare_diagnosis(&DiagnosisCode::from_label(label), confidence)
            .verdict
    }

    pub fn compare_diagnosis(&self, code: &DiagnosisCode, confidence: f32) -> BenchmarkComparison {
        let condition = Condition::for_diagnosis(code);
        let benchmark = condition.map(|c| c.benchmark());

        let verdict = match benchmark {
            None => ComparisonVerdict::NoBenchmarkAvailable,
            Some(b) if confidence >= b.radiologist_sensitivity => {
                ComparisonVerdict::MeetsOrExceedsReference
            }
            Some(b) if confidence >= (b.radiologist_sensitivity - APPROACH_MARGIN).max(0.0) => {
                ComparisonVerdict::ApproachesReference
            }
            Some(_) => ComparisonVerdict::BelowReferenceRecommendReview,
        };

        BenchmarkComparison {
            verdict,
            message: verdict.to_string(),
            condition,
            benchmark,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmapped_label_has_no_benchmark() {
        let comparator = BenchmarkComparator::new();

        assert_eq!(
            comparator.compare("F", 0.99),
            ComparisonVerdict::NoBenchmarkAvailable
        );
        assert_eq!(
            comparator.compare("05_FRACTURED", 0.99),
            ComparisonVerdict::NoBenchmarkAvailable
        );
        assert_eq!(
            comparator.compare("MASS_PNEUMONIA_LIKE", 0.99),
            ComparisonVerdict::NoBenchmarkAvailable
        );
    }

    #[test]
    fn test_pneumonia_bands() {
        let comparator = BenchmarkComparator::new();

        assert_eq!(
            comparator.compare("06_PNEUMONIA", 0.90),
            ComparisonVerdict::MeetsOrExceedsReference
        );
        assert_eq!(
            comparator.compare("03_NORMAL_PNEUMONIA", 0.80),
            ComparisonVerdict::ApproachesReference
        );
        assert_eq!(
            comparator.compare("06_PNEUMONIA", 0.50),
            ComparisonVerdict::BelowReferenceRecommendReview
        );
    }

    #[test]
    fn test_lung_cancer_comparison_carries_figures() {
        let comparison =
            BenchmarkComparator::new().compare_diagnosis(&DiagnosisCode::LungCancer, 0.7);

        assert_eq!(comparison.condition, Some(Condition::LungCancer));
        assert_eq!(comparison.verdict, ComparisonVerdict::ApproachesReference);
        assert_eq!(comparison.benchmark.map(|b| b.state_of_the_art_auc), Some(0.94));
        assert!(!comparison.verdict.recommends_review());
    }

    #[test]
    fn test_verdict_messages() {
        assert!(ComparisonVerdict::BelowReferenceRecommendReview
            .to_string()
            .contains("human review"));
        assert!(ComparisonVerdict::BelowReferenceRecommendReview.recommends_review());
    }
}
