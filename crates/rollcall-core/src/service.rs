//! Gallery operations as exposed to callers.
//!
//! Each operation loads the gallery, works on it, and saves it again if it
//! changed. The service itself does no locking; callers that share one
//! gallery file must run operations one at a time.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::matcher::{MatchPolicy, Matcher, DEFAULT_THRESHOLD};
use crate::store::{GalleryFile, StoreError};
use crate::types::{Descriptor, MatchRecord};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("no face detected in {0}")]
    NoFaceDetected(String),
    #[error("{0} is not enrolled")]
    NotFound(String),
    #[error("descriptor dimension mismatch: gallery has {expected}, probe has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("gallery store: {0}")]
    Store(#[from] StoreError),
    #[error("face analyzer: {0}")]
    Analyzer(#[from] AnalyzerError),
}

/// An enrollment image that contributed no descriptor.
#[derive(Debug, Clone, Serialize)]
pub struct ImageSkip {
    pub image: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrollOutcome {
    pub name: String,
    /// Descriptors added by this request.
    pub added: usize,
    /// Descriptors the identity holds after this request.
    pub total: usize,
    pub skipped: Vec<ImageSkip>,
}

pub struct GalleryService<A> {
    file: GalleryFile,
    analyzer: A,
    threshold: f32,
    policy: MatchPolicy,
    matcher: Box<dyn Matcher + Send + Sync>,
}

impl<A: FaceAnalyzer> GalleryService<A> {
    pub fn new(file: GalleryFile, analyzer: A) -> Self {
        Self {
            file,
            analyzer,
            threshold: DEFAULT_THRESHOLD,
            policy: MatchPolicy::default(),
            matcher: MatchPolicy::default().matcher(),
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_policy(mut self, policy: MatchPolicy) -> Self {
        self.policy = policy;
        self.matcher = policy.matcher();
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    pub fn gallery_path(&self) -> &Path {
        self.file.path()
    }

    /// Enroll `name` from one or more images, one descriptor per image.
    ///
    /// Images that fail analysis, contain no face, or yield a descriptor of
    /// the wrong length or with non-finite values are skipped. Nothing is
    /// saved unless at least one image contributed.
    pub fn enroll(&mut self, name: &str, images: &[PathBuf]) -> Result<EnrollOutcome, ServiceError> {
        let name = validate_name(name)?;
        if images.is_empty() {
            return Err(ServiceError::InvalidInput("at least one image is required".into()));
        }

        let mut gallery = self.file.load();
        let mut expected = gallery.dimension();
        let mut descriptors = Vec::with_capacity(images.len());
        let mut skipped = Vec::new();

        for image in images {
            match self.analyzer.detect_faces(image) {
                Ok(faces) => match faces.into_iter().next() {
                    Some(face) => match check_descriptor(&face.descriptor, expected) {
                        Ok(()) => {
                            tracing::debug!(name, image = %image.display(), "descriptor extracted");
                            expected.get_or_insert(face.descriptor.dim());
                            descriptors.push(face.descriptor);
                        }
                        Err(reason) => {
                            tracing::warn!(name, image = %image.display(), %reason, "image skipped");
                            skipped.push(ImageSkip {
                                image: image.clone(),
                                reason,
                            });
                        }
                    },
                    None => {
                        tracing::warn!(name, image = %image.display(), "no face detected");
                        skipped.push(ImageSkip {
                            image: image.clone(),
                            reason: "no face detected".into(),
                        });
                    }
                },
                Err(e) => {
                    tracing::warn!(name, image = %image.display(), error = %e, "image skipped");
                    skipped.push(ImageSkip {
                        image: image.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let added = gallery.enroll(name, descriptors)?;
        if added == 0 {
            return Err(ServiceError::NoFaceDetected(format!(
                "any of the {} image(s) for {name}",
                images.len()
            )));
        }

        self.file.save(&gallery)?;
        let total = gallery.get(name).map_or(0, <[Descriptor]>::len);
        tracing::info!(name, added, total, skipped = skipped.len(), "identity enrolled");

        Ok(EnrollOutcome {
            name: name.to_string(),
            added,
            total,
            skipped,
        })
    }

    pub fn delete(&mut self, name: &str) -> Result<(), ServiceError> {
        let name = validate_name(name)?;
        let mut gallery = self.file.load();
        if !gallery.delete(name) {
            return Err(ServiceError::NotFound(name.to_string()));
        }
        self.file.save(&gallery)?;
        tracing::info!(name, "identity deleted");
        Ok(())
    }

    pub fn list_names(&self) -> Vec<String> {
        self.file.load().names()
    }

    pub fn list_with_counts(&self) -> BTreeMap<String, usize> {
        self.file.load().counts()
    }

    /// Identify every face in the probe image.
    ///
    /// An empty result means no enrolled identity cleared the threshold.
    pub fn identify(&mut self, image: &Path) -> Result<Vec<MatchRecord>, ServiceError> {
        let faces = self.analyzer.detect_faces(image)?;
        tracing::debug!(image = %image.display(), faces = faces.len(), "probe analyzed");
        if faces.is_empty() {
            return Err(ServiceError::NoFaceDetected(image.display().to_string()));
        }

        let gallery = self.file.load();
        if gallery.is_empty() {
            tracing::debug!("gallery is empty; nothing to match");
            return Ok(Vec::new());
        }

        let queries: Vec<Descriptor> = faces.into_iter().map(|f| f.descriptor).collect();
        if let Some(expected) = gallery.dimension() {
            if let Some(bad) = queries.iter().find(|q| q.dim() != expected) {
                return Err(ServiceError::DimensionMismatch {
                    expected,
                    actual: bad.dim(),
                });
            }
        }

        let matches = self.matcher.identify(&gallery, &queries, self.threshold);
        tracing::info!(
            faces = queries.len(),
            matches = matches.len(),
            threshold = self.threshold,
            "probe identified"
        );
        Ok(matches)
    }
}

/// Per-image check so one bad descriptor does not sink the whole batch.
fn check_descriptor(descriptor: &Descriptor, expected: Option<usize>) -> Result<(), String> {
    if descriptor.as_slice().iter().any(|v| !v.is_finite()) {
        return Err("descriptor contains a non-finite value".into());
    }
    match expected {
        Some(expected) if descriptor.dim() != expected => Err(format!(
            "descriptor has {} values, gallery expects {expected}",
            descriptor.dim()
        )),
        _ => Ok(()),
    }
}

fn validate_name(name: &str) -> Result<&str, ServiceError> {
    if name.trim().is_empty() {
        return Err(ServiceError::InvalidInput("name is required".into()));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DetectedFace;
    use std::collections::HashMap;

    /// Analyzer keyed by image file name.
    #[derive(Default)]
    struct FakeAnalyzer {
        faces: HashMap<String, Vec<Vec<f32>>>,
        broken: Vec<String>,
        calls: usize,
    }

    impl FakeAnalyzer {
        fn face(mut self, image: &str, values: &[f32]) -> Self {
            self.faces
                .entry(image.to_string())
                .or_default()
                .push(values.to_vec());
            self
        }

        fn broken(mut self, image: &str) -> Self {
            self.broken.push(image.to_string());
            self
        }
    }

    impl FaceAnalyzer for FakeAnalyzer {
        fn detect_faces(&mut self, image: &Path) -> Result<Vec<DetectedFace>, AnalyzerError> {
            self.calls += 1;
            let key = image.file_name().unwrap().to_string_lossy().into_owned();
            if self.broken.contains(&key) {
                return Err(AnalyzerError::ImageNotFound(image.to_path_buf()));
            }
            Ok(self
                .faces
                .get(&key)
                .into_iter()
                .flatten()
                .map(|v| DetectedFace {
                    descriptor: Descriptor::new(v.clone()),
                    score: Some(0.9),
                })
                .collect())
        }
    }

    fn service(dir: &tempfile::TempDir, analyzer: FakeAnalyzer) -> GalleryService<FakeAnalyzer> {
        GalleryService::new(GalleryFile::new(dir.path().join("gallery.json")), analyzer)
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_enroll_counts_only_images_with_faces() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = FakeAnalyzer::default()
            .face("a.jpg", &[1.0, 0.0])
            .face("c.jpg", &[0.9, 0.1])
            .broken("d.jpg");
        let mut svc = service(&dir, analyzer);

        let outcome = svc
            .enroll("alice", &paths(&["a.jpg", "b.jpg", "c.jpg", "d.jpg"]))
            .unwrap();
        assert_eq!(outcome.added, 2);
        assert_eq!(outcome.total, 2);
        assert_eq!(outcome.skipped.len(), 2);
        assert_eq!(outcome.skipped[0].image, PathBuf::from("b.jpg"));
        assert_eq!(svc.list_with_counts().get("alice"), Some(&2));
    }

    #[test]
    fn test_enroll_skips_malformed_descriptor_keeps_rest() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = FakeAnalyzer::default()
            .face("a.jpg", &[1.0, 0.0])
            .face("bad.jpg", &[1.0, 0.0, 0.0])
            .face("nan.jpg", &[f32::NAN, 0.0])
            .face("c.jpg", &[0.0, 1.0]);
        let mut svc = service(&dir, analyzer);

        let outcome = svc
            .enroll("alice", &paths(&["a.jpg", "bad.jpg", "nan.jpg", "c.jpg"]))
            .unwrap();
        assert_eq!(outcome.added, 2);
        assert_eq!(outcome.total, 2);
        let skipped: Vec<_> = outcome.skipped.iter().map(|s| s.image.clone()).collect();
        assert_eq!(skipped, paths(&["bad.jpg", "nan.jpg"]));
        assert!(outcome.skipped[0].reason.contains("expects 2"));
        assert_eq!(svc.list_with_counts().get("alice"), Some(&2));
    }

    #[test]
    fn test_enroll_checks_dimension_against_existing_gallery() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = FakeAnalyzer::default()
            .face("a.jpg", &[1.0, 0.0])
            .face("wide.jpg", &[1.0, 0.0, 0.0]);
        let mut svc = service(&dir, analyzer);
        svc.enroll("alice", &paths(&["a.jpg"])).unwrap();

        let err = svc.enroll("bob", &paths(&["wide.jpg"])).unwrap_err();
        assert!(matches!(err, ServiceError::NoFaceDetected(_)));
        assert_eq!(svc.list_names(), vec!["alice".to_string()]);
    }

    #[test]
    fn test_enroll_uses_first_face_per_image() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = FakeAnalyzer::default()
            .face("group.jpg", &[1.0, 0.0])
            .face("group.jpg", &[0.0, 1.0]);
        let mut svc = service(&dir, analyzer);

        svc.enroll("alice", &paths(&["group.jpg"])).unwrap();
        let gallery = GalleryFile::new(svc.gallery_path()).load();
        assert_eq!(gallery.get("alice").unwrap(), &[Descriptor::new(vec![1.0, 0.0])][..]);
    }

    #[test]
    fn test_enroll_appends_to_existing_identity() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = FakeAnalyzer::default()
            .face("a.jpg", &[1.0, 0.0])
            .face("b.jpg", &[0.0, 1.0]);
        let mut svc = service(&dir, analyzer);

        svc.enroll("alice", &paths(&["a.jpg"])).unwrap();
        let outcome = svc.enroll("alice", &paths(&["b.jpg"])).unwrap();
        assert_eq!(outcome.added, 1);
        assert_eq!(outcome.total, 2);
    }

    #[test]
    fn test_enroll_without_faces_leaves_no_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut svc = service(&dir, FakeAnalyzer::default().broken("x.jpg"));

        let err = svc.enroll("alice", &paths(&["x.jpg", "y.jpg"])).unwrap_err();
        assert!(matches!(err, ServiceError::NoFaceDetected(_)));
        assert!(svc.list_names().is_empty());
    }

    #[test]
    fn test_enroll_without_faces_does_not_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gallery.json");
        std::fs::write(&path, br#"{"bob": [0.0, 1.0]}"#).unwrap();
        let mut svc = service(&dir, FakeAnalyzer::default());

        assert!(svc.enroll("alice", &paths(&["x.jpg"])).is_err());
        // The legacy shape is untouched because nothing was written.
        assert_eq!(std::fs::read_to_string(&path).unwrap(), r#"{"bob": [0.0, 1.0]}"#);
    }

    #[test]
    fn test_enroll_validates_before_touching_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut svc = service(&dir, FakeAnalyzer::default().face("a.jpg", &[1.0]));

        assert!(matches!(
            svc.enroll("", &paths(&["a.jpg"])).unwrap_err(),
            ServiceError::InvalidInput(_)
        ));
        assert!(matches!(
            svc.enroll("alice", &[]).unwrap_err(),
            ServiceError::InvalidInput(_)
        ));
        assert_eq!(svc.analyzer.calls, 0);
        assert!(!svc.gallery_path().exists());
    }

    #[test]
    fn test_delete_present_and_absent() {
        let dir = tempfile::tempdir().unwrap();
        let mut svc = service(&dir, FakeAnalyzer::default().face("a.jpg", &[1.0, 0.0]));
        svc.enroll("alice", &paths(&["a.jpg"])).unwrap();
        svc.enroll("bob", &paths(&["a.jpg"])).unwrap();

        svc.delete("alice").unwrap();
        assert_eq!(svc.list_names(), vec!["bob".to_string()]);

        let err = svc.delete("alice").unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(ref n) if n == "alice"));
        assert_eq!(svc.list_names(), vec!["bob".to_string()]);

        assert!(matches!(svc.delete(" ").unwrap_err(), ServiceError::InvalidInput(_)));
    }

    #[test]
    fn test_identify_no_face_in_probe() {
        let dir = tempfile::tempdir().unwrap();
        let mut svc = service(&dir, FakeAnalyzer::default());
        assert!(matches!(
            svc.identify(Path::new("empty.jpg")).unwrap_err(),
            ServiceError::NoFaceDetected(_)
        ));
    }

    #[test]
    fn test_identify_empty_gallery() {
        let dir = tempfile::tempdir().unwrap();
        let mut svc = service(&dir, FakeAnalyzer::default().face("probe.jpg", &[1.0, 0.0]));
        assert!(svc.identify(Path::new("probe.jpg")).unwrap().is_empty());
    }

    #[test]
    fn test_identify_matches_each_face() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = FakeAnalyzer::default()
            .face("alice.jpg", &[1.0, 0.0])
            .face("bob.jpg", &[0.0, 1.0])
            .face("group.jpg", &[0.0, 1.0])
            .face("group.jpg", &[1.0, 0.15])
            .face("stranger.jpg", &[-1.0, 0.0]);
        let mut svc = service(&dir, analyzer);
        svc.enroll("alice", &paths(&["alice.jpg"])).unwrap();
        svc.enroll("bob", &paths(&["bob.jpg"])).unwrap();

        let matches = svc.identify(Path::new("group.jpg")).unwrap();
        let names: Vec<_> = matches.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["bob", "alice"]);
        assert_eq!(matches[0].confidence, 1.0);
        assert!((matches[1].confidence - 0.99).abs() < 1e-6);

        assert!(svc.identify(Path::new("stranger.jpg")).unwrap().is_empty());
    }

    #[test]
    fn test_identify_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = FakeAnalyzer::default()
            .face("a.jpg", &[1.0, 0.0])
            .face("probe.jpg", &[1.0, 0.0, 0.0]);
        let mut svc = service(&dir, analyzer);
        svc.enroll("alice", &paths(&["a.jpg"])).unwrap();

        assert!(matches!(
            svc.identify(Path::new("probe.jpg")).unwrap_err(),
            ServiceError::DimensionMismatch { expected: 2, actual: 3 }
        ));
    }

    #[test]
    fn test_threshold_and_policy_configurable() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = FakeAnalyzer::default()
            .face("a.jpg", &[0.5, 0.866_025_4])
            .face("b.jpg", &[0.99, 0.141_067_36])
            .face("probe.jpg", &[1.0, 0.0]);
        let mut svc = service(&dir, analyzer).with_threshold(0.4);
        svc.enroll("alice", &paths(&["a.jpg", "b.jpg"])).unwrap();

        let first = svc.identify(Path::new("probe.jpg")).unwrap();
        assert!((first[0].confidence - 0.5).abs() < 1e-6);

        let mut svc = svc.with_policy(MatchPolicy::Best);
        let best = svc.identify(Path::new("probe.jpg")).unwrap();
        assert!((best[0].confidence - 0.99).abs() < 1e-6);
        assert_eq!(svc.policy(), MatchPolicy::Best);
    }
}
