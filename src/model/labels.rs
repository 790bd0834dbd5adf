//! Class label set and diagnosis codes
//!
//! The position of a label in [`ClassLabels`] is the only link between a model
//! output slot and a human-readable diagnosis, so the ordering must match the
//! ordering used when the model was trained.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::utils::error::{Result, VoxRayError};

/// VoxRay training-time class ordering
pub const VOXRAY_CLASS_LABELS: [&str; 6] = [
    "01_NORMAL_LUNG",
    "02_NORMAL_BONE",
    "03_NORMAL_PNEUMONIA",
    "04_LUNG_CANCER",
    "05_FRACTURED",
    "06_PNEUMONIA",
];

/// Ordered, non-empty list of class labels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ClassLabels {
    labels: Vec<String>,
}

impl ClassLabels {
    /// Build a label set; empty lists and duplicate labels are rejected
    pub fn new<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Result<Self> {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();

        if labels.is_empty() {
            return Err(VoxRayError::Config("class label set is empty".to_string()));
        }
        for (i, label) in labels.iter().enumerate() {
            if labels[..i].contains(label) {
                return Err(VoxRayError::Config(format!(
                    "duplicate class label '{}'",
                    label
                )));
            }
        }

        Ok(Self { labels })
    }

    /// The six VoxRay classes in training order
    pub fn voxray() -> Self {
        Self {
            labels: VOXRAY_CLASS_LABELS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Label at output slot `index`
    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// Output slot of `label`
    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    /// Fail unless a model with `output_width` outputs fits this label set
    pub fn check_output_width(&self, output_width: usize) -> Result<()> {
        if output_width != self.len() {
            return Err(VoxRayError::LabelMismatch {
                expected: self.len(),
                actual: output_width,
            });
        }
        Ok(())
    }
}

impl TryFrom<Vec<String>> for ClassLabels {
    type Error = VoxRayError;

    fn try_from(labels: Vec<String>) -> Result<Self> {
        Self::new(labels)
    }
}

impl From<ClassLabels> for Vec<String> {
    fn from(labels: ClassLabels) -> Self {
        labels.labels
    }
}

impl Default for ClassLabels {
    fn default() -> Self {
        Self::voxray()
    }
}

/// Enumerated diagnosis derived from an exact class label
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisCode {
    NormalLung,
    NormalBone,
    NormalPneumonia,
    LungCancer,
    Fractured,
    Pneumonia,
    /// Any label outside the known set, kept verbatim
    Unknown(String),
}

impl DiagnosisCode {
    /// Exact match only; anything else becomes `Unknown`
    pub fn from_label(label: &str) -> Self {
        match label {
            "01_NORMAL_LUNG" => DiagnosisCode::NormalLung,
            "02_NORMAL_BONE" => DiagnosisCode::NormalBone,
            "03_NORMAL_PNEUMONIA" => DiagnosisCode::NormalPneumonia,
            "04_LUNG_CANCER" => DiagnosisCode::LungCancer,
            "05_FRACTURED" => DiagnosisCode::Fractured,
            "06_PNEUMONIA" => DiagnosisCode::Pneumonia,
            other => DiagnosisCode::Unknown(other.to_string()),
        }
    }

    /// The class label this code was parsed from
    pub fn label(&self) -> &str {
        match self {
            DiagnosisCode::NormalLung => "01_NORMAL_LUNG",
            DiagnosisCode::NormalBone => "02_NORMAL_BONE",
            DiagnosisCode::NormalPneumonia => "03_NORMAL_PNEUMONIA",
            DiagnosisCode::LungCancer => "04_LUNG_CANCER",
            DiagnosisCode::Fractured => "05_FRACTURED",
            DiagnosisCode::Pneumonia => "06_PNEUMONIA",
            DiagnosisCode::Unknown(label) => label,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, DiagnosisCode::Unknown(_))
    }
}

impl fmt::Display for DiagnosisCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}
