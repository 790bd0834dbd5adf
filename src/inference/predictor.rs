//! Prediction Result Module
//!
//! Turns one probability vector into a labelled diagnosis: argmax, top-k,
//! margin and entropy, plus a human-readable rendering for the CLI.

use std::time::Duration;

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::model::labels::{ClassLabels, DiagnosisCode};
use crate::utils::error::{Result, ResultExt};
use crate::utils::metrics::{argmax, shannon_entropy, top_k};

/// Number of alternatives reported alongside the top class
pub const TOP_K: usize = 5;

/// Label to probability pairs in training order; serializes as a JSON object
#[derive(Debug, Clone, PartialEq)]
pub struct ClassProbabilities(Vec<(String, f32)>);

impl ClassProbabilities {
    pub fn new(labels: &ClassLabels, probabilities: &[f32]) -> Self {
        Self(
            labels
                .iter()
                .zip(probabilities)
                .map(|(label, &p)| (label.to_string(), p))
                .collect(),
        )
    }

    pub fn get(&self, label: &str) -> Option<f32> {
        self.0.iter().find(|(l, _)| l == label).map(|&(_, p)| p)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.0.iter().map(|(l, p)| (l.as_str(), *p))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for ClassProbabilities {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (label, p) in &self.0 {
            map.serialize_entry(label, p)?;
        }
        map.end()
    }
}

/// One ranked alternative
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedClass {
    pub index: usize,
    pub label: String,
    pub probability: f32,
}

/// Result of a single prediction
#[derive(Debug, Clone, Serialize)]
pub struct PredictionResult {
    /// Predicted class index
    pub predicted_class: usize,

    /// Predicted class label
    pub class_name: String,

    /// Enumerated diagnosis for the label
    pub diagnosis: DiagnosisCode,

    /// Probability of the predicted class
    pub confidence: f32,

    /// Full probability distribution, in label order
    pub probabilities: Vec<f32>,

    /// Top-k predictions, highest first
    pub top_k: Vec<RankedClass>,

    /// Wall-clock time of the call that produced the probabilities
    pub inference_time_ms: f64,
}

impl PredictionResult {
    /// Label a probability vector; its width must match the label set
    pub fn new(
        probabilities: Vec<f32>,
        labels: &ClassLabels,
        inference_time: Duration,
    ) -> Result<Self> {
        labels.check_output_width(probabilities.len())?;

        let (predicted_class, confidence) =
            argmax(&probabilities).context("empty probability vector")?;
        let class_name = labels.get(predicted_class).unwrap_or("Unknown").to_string();

        let top_k = top_k(&probabilities, TOP_K)
            .into_iter()
            .map(|(index, probability)| RankedClass {
                index,
                label: labels.get(index).unwrap_or("Unknown").to_string(),
                probability,
            })
            .collect();

        Ok(Self {
            predicted_class,
            diagnosis: DiagnosisCode::from_label(&class_name),
            class_name,
            confidence,
            probabilities,
            top_k,
            inference_time_ms: inference_time.as_secs_f64() * 1000.0,
        })
    }

    /// Shannon entropy of the distribution
    pub fn entropy(&self) -> f32 {
        shannon_entropy(&self.probabilities)
    }

    /// Gap between the top-1 and top-2 probabilities
    pub fn margin(&self) -> f32 {
        match self.top_k.as_slice() {
            [first, second, ..] => first.probability - second.probability,
            _ => self.confidence,
        }
    }

    /// Pretty print the prediction result
    pub fn display(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!(
            "Prediction: {} (class {})\n",
            self.class_name, self.predicted_class
        ));
        output.push_str(&format!("Confidence: {:.2}%\n", self.confidence * 100.0));
        output.push_str(&format!("Margin: {:.2}%\n", self.margin() * 100.0));
        output.push_str(&format!("Inference time: {:.2} ms\n", self.inference_time_ms));

        output.push_str(&format!("\nTop-{} predictions:\n", self.top_k.len()));
        for (i, ranked) in self.top_k.iter().enumerate() {
            output.push_str(&format!(
                "  {}. {} (class {}) - {:.2}%\n",
                i + 1,
                ranked.label,
                ranked.index,
                ranked.probability * 100.0
            ));
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::VoxRayError;

    fn six_labels() -> ClassLabels {
        ClassLabels::new(["A", "B", "C", "D", "E", "F"]).unwrap()
    }

    #[test]
    fn test_prediction_result_new() {
        let probs = vec![0.1, 0.1, 0.1, 0.1, 0.1, 0.5];
        let result = PredictionResult::new(probs, &six_labels(), Duration::from_millis(50)).unwrap();

        assert_eq!(result.predicted_class, 5);
        assert_eq!(result.class_name, "F");
        assert_eq!(result.confidence, 0.5);
        assert_eq!(result.top_k.len(), TOP_K);
        assert_eq!(result.top_k[0].label, "F");
        assert!((result.margin() - 0.4).abs() < 1e-6);
        assert!((result.inference_time_ms - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_diagnosis_code_attached() {
        let mut probs = vec![0.0; 6];
        probs[3] = 1.0;
        let result =
            PredictionResult::new(probs, &ClassLabels::voxray(), Duration::ZERO).unwrap();

        assert_eq!(result.diagnosis, DiagnosisCode::LungCancer);
        assert!(result.display().contains("04_LUNG_CANCER"));
    }

    #[test]
    fn test_width_mismatch_rejected() {
        let result = PredictionResult::new(vec![0.5, 0.5], &six_labels(), Duration::ZERO);
        assert!(matches!(
            result,
            Err(VoxRayError::LabelMismatch { expected: 6, actual: 2 })
        ));
    }

    #[test]
    fn test_prediction_entropy() {
        let labels = six_labels();
        let uniform = PredictionResult::new(vec![1.0 / 6.0; 6], &labels, Duration::ZERO).unwrap();
        let confident = PredictionResult::new(
            vec![0.95, 0.01, 0.01, 0.01, 0.01, 0.01],
            &labels,
            Duration::ZERO,
        )
        .unwrap();

        assert!(uniform.entropy() > confident.entropy());
    }

    #[test]
    fn test_class_probabilities_serialize_in_label_order() {
        let labels = ClassLabels::new(["Z", "A", "M"]).unwrap();
        let map = ClassProbabilities::new(&labels, &[0.2, 0.3, 0.5]);

        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"Z":0.2,"A":0.3,"M":0.5}"#);
        assert_eq!(map.get("M"), Some(0.5));
        assert_eq!(map.get("Q"), None);
    }
}
