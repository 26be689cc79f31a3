//! rollcall-core — Face gallery and identification engine.
//!
//! Stores one-to-many face descriptors per identity in a JSON gallery file
//! and matches probe descriptors against it by cosine similarity. Face
//! detection and embedding extraction are delegated to a [`FaceAnalyzer`].

pub mod analyzer;
pub mod matcher;
pub mod service;
pub mod store;
pub mod types;

pub use analyzer::{AnalyzerError, CommandAnalyzer, FaceAnalyzer};
pub use matcher::{
    BestDescriptorMatcher, FirstAcceptMatcher, MatchPolicy, Matcher, DEFAULT_THRESHOLD,
};
pub use service::{EnrollOutcome, GalleryService, ImageSkip, ServiceError};
pub use store::{Gallery, GalleryFile, StoreError};
pub use types::{round_confidence, DetectedFace, Descriptor, MatchRecord};
