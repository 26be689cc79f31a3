use anyhow::Context;
use rollcall_core::{MatchPolicy, DEFAULT_THRESHOLD};
use serde::Deserialize;
use std::path::PathBuf;

/// Which D-Bus bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Session,
    System,
}

impl BusKind {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "session" => Some(BusKind::Session),
            "system" => Some(BusKind::System),
            _ => None,
        }
    }
}

/// Optional TOML config file (`ROLLCALL_CONFIG`). Every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub gallery_path: Option<PathBuf>,
    pub similarity_threshold: Option<f32>,
    pub match_policy: Option<MatchPolicy>,
    pub analyzer_program: Option<String>,
    pub analyzer_args: Option<Vec<String>>,
    pub bus: Option<BusKind>,
}

/// Daemon configuration: defaults, then the config file, then `ROLLCALL_*`
/// environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the JSON gallery file.
    pub gallery_path: PathBuf,
    /// Cosine similarity a descriptor must exceed for a match.
    pub similarity_threshold: f32,
    pub match_policy: MatchPolicy,
    /// External program that turns an image into face descriptors.
    pub analyzer_program: String,
    pub analyzer_args: Vec<String>,
    pub bus: BusKind,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        let file = match std::env::var("ROLLCALL_CONFIG") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading config file {path}"))?;
                toml::from_str::<FileConfig>(&raw)
                    .with_context(|| format!("parsing config file {path}"))?
            }
            Err(_) => FileConfig::default(),
        };
        Ok(Self::resolve(file, |key| std::env::var(key).ok()))
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = env("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let gallery_path = env("ROLLCALL_GALLERY_PATH")
            .map(PathBuf::from)
            .or(file.gallery_path)
            .unwrap_or_else(|| data_dir.join("gallery.json"));

        let analyzer_args = env("ROLLCALL_ANALYZER_ARGS")
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .or(file.analyzer_args)
            .unwrap_or_default();

        Self {
            gallery_path,
            similarity_threshold: env("ROLLCALL_SIMILARITY_THRESHOLD")
                .and_then(|v| v.parse().ok())
                .or(file.similarity_threshold)
                .unwrap_or(DEFAULT_THRESHOLD),
            match_policy: env("ROLLCALL_MATCH_POLICY")
                .and_then(|v| v.parse().ok())
                .or(file.match_policy)
                .unwrap_or_default(),
            analyzer_program: env("ROLLCALL_ANALYZER")
                .or(file.analyzer_program)
                .unwrap_or_else(|| "rollcall-analyze".to_string()),
            analyzer_args,
            bus: env("ROLLCALL_BUS")
                .and_then(|v| BusKind::parse(&v))
                .or(file.bus)
                .unwrap_or(BusKind::Session),
        }
    }
}
