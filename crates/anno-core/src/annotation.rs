//! Annotation records and their typed prediction shapes.
//!
//! An [`AnnotationRecord`] holds every prediction attached to one sample
//! (image or video frame), grouped into per-shape collections. Geometric
//! coordinates are stored relative to the image dimensions, so every
//! coordinate must lie in `0.0..=1.0`; constructors enforce this.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::error::{CoreError, CoreResult};
use crate::id::{AnnotationId, ProjectId};
use crate::vocabulary::LabelDescriptor;

/// Provenance group assigned to predictions that carry none.
pub const DEFAULT_GROUP: &str = "ground_truth";

/// Geometry shape of a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[derive(AsRefStr, Display, EnumIter, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Shape {
    /// Bounding box detection.
    Box,
    /// Image-level tag.
    Tag,
    /// Keypoint set.
    Point,
    /// Closed polygon.
    Polygon,
    /// Open polyline.
    Polyline,
}

impl Shape {
    /// All shapes, in the order their collections appear on a record.
    pub const ALL: [Shape; 5] = [
        Shape::Box,
        Shape::Tag,
        Shape::Point,
        Shape::Polygon,
        Shape::Polyline,
    ];

    /// Name of the record collection holding predictions of this shape.
    pub const fn collection(&self) -> &'static str {
        match self {
            Shape::Box => "detections",
            Shape::Tag => "tags",
            Shape::Point => "points",
            Shape::Polygon => "polygons",
            Shape::Polyline => "polylines",
        }
    }
}

fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}

fn check_relative(values: &[f64]) -> CoreResult<()> {
    for &value in values {
        if !(0.0..=1.0).contains(&value) {
            return Err(CoreError::CoordinateOutOfRange { value });
        }
    }
    Ok(())
}

macro_rules! prediction_common {
    ($name:ident) => {
        impl $name {
            /// Sets the provenance group.
            #[must_use]
            pub fn with_group(mut self, group: impl Into<String>) -> Self {
                self.group = group.into();
                self
            }

            /// Sets an attribute value.
            #[must_use]
            pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
                self.attributes.insert(key.into(), value);
                self
            }
        }
    };
}

/// A bounding-box detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Label name.
    pub label: String,
    /// Relative `[x, y, width, height]` box.
    pub bbox: [f64; 4],
    /// Provenance group (ground truth or a model run).
    #[serde(default = "default_group")]
    pub group: String,
    /// Free-form attribute map.
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Detection {
    /// Creates a detection, validating that the box is relative.
    pub fn new(label: impl Into<String>, bbox: [f64; 4]) -> CoreResult<Self> {
        check_relative(&bbox)?;
        Ok(Self {
            label: label.into(),
            bbox,
            group: default_group(),
            attributes: Map::new(),
        })
    }
}

prediction_common!(Detection);

/// A closed polygon prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    /// Label name.
    pub label: String,
    /// Flattened relative `[x0, y0, x1, y1, ...]` vertices.
    pub points: Vec<f64>,
    /// Provenance group.
    #[serde(default = "default_group")]
    pub group: String,
    /// Free-form attribute map.
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Polygon {
    /// Creates a polygon, validating that all vertices are relative.
    pub fn new(label: impl Into<String>, points: Vec<f64>) -> CoreResult<Self> {
        check_relative(&points)?;
        Ok(Self {
            label: label.into(),
            points,
            group: default_group(),
            attributes: Map::new(),
        })
    }
}

prediction_common!(Polygon);

/// An open polyline prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polyline {
    /// Label name.
    pub label: String,
    /// Flattened relative vertices.
    pub points: Vec<f64>,
    /// Provenance group.
    #[serde(default = "default_group")]
    pub group: String,
    /// Free-form attribute map.
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Polyline {
    /// Creates a polyline, validating that all vertices are relative.
    pub fn new(label: impl Into<String>, points: Vec<f64>) -> CoreResult<Self> {
        check_relative(&points)?;
        Ok(Self {
            label: label.into(),
            points,
            group: default_group(),
            attributes: Map::new(),
        })
    }
}

prediction_common!(Polyline);

/// A keypoint-set prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keypoints {
    /// Label name.
    pub label: String,
    /// Flattened relative keypoint coordinates.
    pub points: Vec<f64>,
    /// Provenance group.
    #[serde(default = "default_group")]
    pub group: String,
    /// Free-form attribute map.
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Keypoints {
    /// Creates a keypoint set, validating that all points are relative.
    pub fn new(label: impl Into<String>, points: Vec<f64>) -> CoreResult<Self> {
        check_relative(&points)?;
        Ok(Self {
            label: label.into(),
            points,
            group: default_group(),
            attributes: Map::new(),
        })
    }
}

prediction_common!(Keypoints);

/// An image-level tag prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    /// Label name.
    pub label: String,
    /// Optional tag value (string or boolean).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Provenance group.
    #[serde(default = "default_group")]
    pub group: String,
    /// Free-form attribute map.
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Tag {
    /// Creates a tag with no value.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: None,
            group: default_group(),
            attributes: Map::new(),
        }
    }
}

prediction_common!(Tag);

/// A free-text caption attached to a sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Caption {
    /// Caption text.
    pub caption: String,
    /// Provenance group.
    #[serde(default = "default_group")]
    pub group: String,
    /// Free-form attribute map.
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Caption {
    /// Creates a caption.
    pub fn new(caption: impl Into<String>) -> Self {
        Self {
            caption: caption.into(),
            group: default_group(),
            attributes: Map::new(),
        }
    }
}

/// All annotations attached to one sample, identified by an event id
/// scoped to a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    /// Record identifier.
    #[serde(rename = "_id", default)]
    pub id: AnnotationId,
    /// Sample event id, unique within the project.
    pub event_id: String,
    /// Owning project.
    pub project_id: ProjectId,
    /// Whether an image is associated with this record.
    #[serde(default)]
    pub has_image: bool,
    /// Bounding-box detections.
    #[serde(default)]
    pub detections: Vec<Detection>,
    /// Polygons.
    #[serde(default)]
    pub polygons: Vec<Polygon>,
    /// Polylines.
    #[serde(default)]
    pub polylines: Vec<Polyline>,
    /// Keypoint sets.
    #[serde(default)]
    pub points: Vec<Keypoints>,
    /// Image-level tags.
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// Captions.
    #[serde(default)]
    pub captions: Vec<Caption>,
    /// Image-level attribute map.
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl AnnotationRecord {
    /// Creates an empty record for an event.
    pub fn new(event_id: impl Into<String>, project_id: ProjectId) -> Self {
        Self {
            id: AnnotationId::new(),
            event_id: event_id.into(),
            project_id,
            has_image: false,
            detections: Vec::new(),
            polygons: Vec::new(),
            polylines: Vec::new(),
            points: Vec::new(),
            tags: Vec::new(),
            captions: Vec::new(),
            attributes: Map::new(),
        }
    }

    /// Number of predictions in the collection for one shape.
    pub fn shape_len(&self, shape: Shape) -> usize {
        match shape {
            Shape::Box => self.detections.len(),
            Shape::Tag => self.tags.len(),
            Shape::Point => self.points.len(),
            Shape::Polygon => self.polygons.len(),
            Shape::Polyline => self.polylines.len(),
        }
    }

    /// Whether the record holds no predictions in any shape collection.
    pub fn is_empty(&self) -> bool {
        Shape::ALL.iter().all(|shape| self.shape_len(*shape) == 0)
    }

    /// Derives the distinct `(name, shape, group)` label triples appearing
    /// across all prediction collections, with the union of attribute keys
    /// seen per triple.
    ///
    /// Labels are derived, never stored independently per write.
    pub fn labels(&self) -> Vec<LabelDescriptor> {
        let mut harvest = LabelHarvest::default();

        for d in &self.detections {
            harvest.add(&d.label, Shape::Box, &d.group, &d.attributes);
        }
        for p in &self.polygons {
            harvest.add(&p.label, Shape::Polygon, &p.group, &p.attributes);
        }
        for p in &self.polylines {
            harvest.add(&p.label, Shape::Polyline, &p.group, &p.attributes);
        }
        for k in &self.points {
            harvest.add(&k.label, Shape::Point, &k.group, &k.attributes);
        }
        for t in &self.tags {
            harvest.add(&t.label, Shape::Tag, &t.group, &t.attributes);
        }

        harvest.into_labels()
    }
}

#[derive(Default)]
struct LabelHarvest {
    // Keyed by (name, shape, group); BTreeMap keeps output deterministic.
    entries: BTreeMap<(String, Shape, String), BTreeSet<String>>,
}

impl LabelHarvest {
    fn add(&mut self, name: &str, shape: Shape, group: &str, attributes: &Map<String, Value>) {
        let keys = self
            .entries
            .entry((name.to_string(), shape, group.to_string()))
            .or_default();
        keys.extend(attributes.keys().cloned());
    }

    fn into_labels(self) -> Vec<LabelDescriptor> {
        self.entries
            .into_iter()
            .map(|((name, shape, group), attributes)| LabelDescriptor {
                name,
                shape,
                group,
                attributes: attributes.into_iter().collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_relative_coordinates_enforced() {
        assert!(Detection::new("cat", [0.1, 0.1, 0.5, 0.5]).is_ok());
        assert!(Detection::new("cat", [0.1, 0.1, 1.5, 0.5]).is_err());
        assert!(Polygon::new("road", vec![0.0, 1.0, 0.5]).is_ok());
        assert!(Keypoints::new("hand", vec![-0.1]).is_err());
    }

    #[test]
    fn test_labels_derived_per_triple() {
        let project = ProjectId::new();
        let mut record = AnnotationRecord::new("evt-1", project);
        record.detections.push(
            Detection::new("cat", [0.1, 0.1, 0.2, 0.2])
                .unwrap()
                .with_attribute("occluded", json!(true)),
        );
        record.detections.push(
            Detection::new("cat", [0.3, 0.3, 0.2, 0.2])
                .unwrap()
                .with_attribute("truncated", json!(false)),
        );
        record
            .tags
            .push(Tag::new("daytime").with_group("model-v2"));

        let labels = record.labels();
        assert_eq!(labels.len(), 2);

        let cat = labels.iter().find(|l| l.name == "cat").unwrap();
        assert_eq!(cat.shape, Shape::Box);
        assert_eq!(cat.group, DEFAULT_GROUP);
        assert_eq!(cat.attributes, vec!["occluded", "truncated"]);

        let tag = labels.iter().find(|l| l.name == "daytime").unwrap();
        assert_eq!(tag.shape, Shape::Tag);
        assert_eq!(tag.group, "model-v2");
    }

    #[test]
    fn test_record_serde_roundtrip() {
        let project = ProjectId::new();
        let mut record = AnnotationRecord::new("evt-2", project);
        record.has_image = true;
        record.polygons.push(
            Polygon::new("road", vec![0.2, 0.2, 0.5, 0.5, 0.2, 0.5]).unwrap(),
        );
        record.attributes.insert("weather".into(), json!("sunny"));

        let value = serde_json::to_value(&record).unwrap();
        let back: AnnotationRecord = serde_json::from_value(value).unwrap();
        assert_eq!(record, back);
    }
}
