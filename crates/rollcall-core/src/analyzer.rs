//! Face analysis capability.
//!
//! Detection and descriptor extraction happen outside this crate. The
//! gallery only needs, for one image, the list of faces found and each
//! face's descriptor.

use crate::types::DetectedFace;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("image not found: {}", .0.display())]
    ImageNotFound(PathBuf),
    #[error("failed to run analyzer {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("analyzer exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("analyzer output is not valid JSON: {0}")]
    BadOutput(#[from] serde_json::Error),
}

/// Finds faces in an image and returns one descriptor per face.
///
/// An empty result means no face was found; it is not an error.
pub trait FaceAnalyzer: Send {
    fn detect_faces(&mut self, image: &Path) -> Result<Vec<DetectedFace>, AnalyzerError>;
}

/// Runs an external program once per image.
///
/// The program is called as `<program> <args...> <image>` and must print a
/// JSON array of `{"embedding": [...], "score": ...}` objects on stdout.
#[derive(Debug, Clone)]
pub struct CommandAnalyzer {
    program: String,
    args: Vec<String>,
}

impl CommandAnalyzer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl FaceAnalyzer for CommandAnalyzer {
    fn detect_faces(&mut self, image: &Path) -> Result<Vec<DetectedFace>, AnalyzerError> {
        if !image.exists() {
            return Err(AnalyzerError::ImageNotFound(image.to_path_buf()));
        }

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(image)
            .output()
            .map_err(|source| AnalyzerError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(AnalyzerError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let faces: Vec<DetectedFace> = serde_json::from_slice(&output.stdout)?;
        tracing::debug!(
            image = %image.display(),
            faces = faces.len(),
            "analyzer finished"
        );
        Ok(faces)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandAnalyzer {
        CommandAnalyzer::new("sh", vec!["-c".into(), script.into(), "analyzer".into()])
    }

    fn image(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("probe.jpg");
        std::fs::write(&path, b"not really a jpeg").unwrap();
        path
    }

    #[test]
    fn test_parses_faces_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut analyzer =
            sh(r#"echo '[{"embedding":[1.0,0.0],"score":0.9},{"embedding":[0.0,1.0]}]'"#);

        let faces = analyzer.detect_faces(&image(&dir)).unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].descriptor.as_slice(), &[1.0, 0.0]);
        assert_eq!(faces[1].score, None);
    }

    #[test]
    fn test_receives_image_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = image(&dir);
        // $1 is the image path appended after the script's $0.
        let mut analyzer = sh(r#"test -f "$1" && echo '[]'"#);
        assert!(analyzer.detect_faces(&path).unwrap().is_empty());
    }

    #[test]
    fn test_missing_image() {
        let dir = tempfile::tempdir().unwrap();
        let mut analyzer = sh("echo '[]'");
        let err = analyzer
            .detect_faces(&dir.path().join("nope.jpg"))
            .unwrap_err();
        assert!(matches!(err, AnalyzerError::ImageNotFound(_)));
    }

    #[test]
    fn test_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let mut analyzer = sh("echo 'cannot decode image' >&2; exit 3");
        match analyzer.detect_faces(&image(&dir)).unwrap_err() {
            AnalyzerError::Failed { stderr, .. } => assert_eq!(stderr, "cannot decode image"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_malformed_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut analyzer = sh("echo 'faces: 1'");
        assert!(matches!(
            analyzer.detect_faces(&image(&dir)).unwrap_err(),
            AnalyzerError::BadOutput(_)
        ));
    }

    #[test]
    fn test_program_name() {
        assert_eq!(sh("true").program(), "sh");
    }

    #[test]
    fn test_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let mut analyzer = CommandAnalyzer::new("/nonexistent/rollcall-analyzer", Vec::new());
        assert!(matches!(
            analyzer.detect_faces(&image(&dir)).unwrap_err(),
            AnalyzerError::Spawn { .. }
        ));
    }
}
