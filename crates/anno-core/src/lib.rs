#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod annotation;
mod dataset;
mod error;
mod id;
mod page;
mod vocabulary;

pub mod mock;
pub mod services;

pub use annotation::{
    AnnotationRecord, Caption, DEFAULT_GROUP, Detection, Keypoints, Polygon, Polyline, Shape, Tag,
};
pub use dataset::DatasetSnapshot;
pub use error::{CoreError, CoreResult};
pub use id::{AnnotationId, DatasetId, GraphId, ProjectId, QueryPipelineId, RunId};
pub use page::{Page, PageInfo, PageRequest, RawMetadata, RawQueryResult};
pub use services::{
    CallbackClient, DocumentStore, ImageInfo, JobHandle, JobQueue, JobSpec, JobStatus, MediaStore,
    SnapshotStore,
};
pub use vocabulary::{LabelDescriptor, ProjectVocabulary};
