//! Project label and attribute vocabularies.
//!
//! The vocabulary is computed by the document store as a read-only
//! aggregation over stored annotations and passed explicitly into stage
//! validation and schema description. It is never ambient state, and it
//! is not locked between validation and execution (accepted staleness
//! window).

use serde::{Deserialize, Serialize};

use crate::annotation::Shape;

/// One derived label: a distinct `(name, shape, group)` triple with the
/// union of attribute keys observed for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelDescriptor {
    /// Label name.
    pub name: String,
    /// Geometry shape the label appears on.
    pub shape: Shape,
    /// Provenance group.
    pub group: String,
    /// Attribute keys observed on predictions carrying this label.
    #[serde(default)]
    pub attributes: Vec<String>,
}

/// Read-only validation context: the labels and attribute keys currently
/// present in a project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectVocabulary {
    /// Distinct labels across the project's annotations.
    #[serde(default)]
    pub labels: Vec<LabelDescriptor>,
    /// Distinct image-level attribute keys.
    #[serde(default)]
    pub attributes: Vec<String>,
}

impl ProjectVocabulary {
    /// Creates a vocabulary from parts.
    pub fn new(labels: Vec<LabelDescriptor>, attributes: Vec<String>) -> Self {
        Self { labels, attributes }
    }

    /// Whether a `(name, shape)` label key exists in the project.
    pub fn contains_label(&self, name: &str, shape: Shape) -> bool {
        self.labels
            .iter()
            .any(|label| label.name == name && label.shape == shape)
    }

    /// Whether an image-level attribute key exists in the project.
    pub fn contains_attribute(&self, key: &str) -> bool {
        self.attributes.iter().any(|a| a == key)
    }

    /// Whether an attribute key is known for any label of a shape.
    pub fn contains_label_attribute(&self, shape: Shape, key: &str) -> bool {
        self.labels
            .iter()
            .filter(|label| label.shape == shape)
            .any(|label| label.attributes.iter().any(|a| a == key))
    }

    /// Distinct label names for one shape, in vocabulary order.
    pub fn label_names(&self, shape: Shape) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .labels
            .iter()
            .filter(|label| label.shape == shape)
            .map(|label| label.name.as_str())
            .collect();
        names.dedup();
        names
    }

    /// All distinct label names across shapes.
    pub fn all_label_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.labels.iter().map(|l| l.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> ProjectVocabulary {
        ProjectVocabulary::new(
            vec![
                LabelDescriptor {
                    name: "cat".into(),
                    shape: Shape::Box,
                    group: "ground_truth".into(),
                    attributes: vec!["occluded".into()],
                },
                LabelDescriptor {
                    name: "cat".into(),
                    shape: Shape::Polygon,
                    group: "model-v1".into(),
                    attributes: vec![],
                },
            ],
            vec!["weather".into()],
        )
    }

    #[test]
    fn test_label_lookup_is_shape_scoped() {
        let vocab = vocab();
        assert!(vocab.contains_label("cat", Shape::Box));
        assert!(vocab.contains_label("cat", Shape::Polygon));
        assert!(!vocab.contains_label("cat", Shape::Tag));
        assert!(!vocab.contains_label("dog", Shape::Box));
    }

    #[test]
    fn test_attribute_lookup() {
        let vocab = vocab();
        assert!(vocab.contains_attribute("weather"));
        assert!(!vocab.contains_attribute("occluded"));
        assert!(vocab.contains_label_attribute(Shape::Box, "occluded"));
        assert!(!vocab.contains_label_attribute(Shape::Polygon, "occluded"));
    }
}
