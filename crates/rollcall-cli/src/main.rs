use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const NO_MATCH_ERROR: &str = "io.rollcall.Gallery1.Error.NoMatch";

// `#[zbus::proxy]` generates `GalleryProxy` (async) and `GalleryProxyBlocking`.
#[zbus::proxy(
    interface = "io.rollcall.Gallery1",
    default_service = "io.rollcall.Gallery1",
    default_path = "/io/rollcall/Gallery1"
)]
trait Gallery {
    async fn enroll(&self, name: &str, images: Vec<String>) -> zbus::Result<String>;
    async fn delete(&self, name: &str) -> zbus::Result<()>;
    async fn list_names(&self) -> zbus::Result<Vec<String>>;
    async fn list_with_counts(&self) -> zbus::Result<HashMap<String, u32>>;
    async fn identify(&self, image: &str) -> zbus::Result<Vec<(String, f64)>>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face gallery CLI")]
struct Cli {
    /// Talk to the daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a person from one or more face images
    Enroll {
        name: String,
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Remove a person from the gallery
    Delete { name: String },
    /// List enrolled people
    List {
        /// Include the number of enrolled descriptors per person
        #[arg(short, long)]
        counts: bool,
    },
    /// Identify the faces in an image
    Identify { image: PathBuf },
    /// Show daemon status
    Status,
}

/// The daemon resolves paths relative to its own working directory.
fn absolute(path: &Path) -> Result<String> {
    let abs = std::fs::canonicalize(path)
        .with_context(|| format!("cannot access {}", path.display()))?;
    Ok(abs.to_string_lossy().into_owned())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let connection = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("connecting to D-Bus")?;
    let proxy = GalleryProxy::new(&connection)
        .await
        .context("rollcalld is not reachable")?;

    match cli.command {
        Commands::Enroll { name, images } => {
            let images = images.iter().map(|p| absolute(p)).collect::<Result<Vec<_>>>()?;
            tracing::debug!(name = %name, images = images.len(), "enrolling");
            let outcome = proxy.enroll(&name, images).await?;
            if cli.json {
                println!("{outcome}");
            } else {
                let v: serde_json::Value = serde_json::from_str(&outcome)?;
                println!(
                    "Enrolled {name}: {} descriptor(s) added, {} total",
                    v["added"], v["total"]
                );
                for skip in v["skipped"].as_array().into_iter().flatten() {
                    println!(
                        "  skipped {}: {}",
                        skip["image"].as_str().unwrap_or("?"),
                        skip["reason"].as_str().unwrap_or("?")
                    );
                }
            }
        }
        Commands::Delete { name } => {
            proxy.delete(&name).await?;
            if cli.json {
                println!("{}", serde_json::json!({ "deleted": name }));
            } else {
                println!("Deleted {name}");
            }
        }
        Commands::List { counts: false } => {
            let names = proxy.list_names().await?;
            if cli.json {
                println!("{}", serde_json::to_string(&names)?);
            } else if names.is_empty() {
                println!("No people enrolled");
            } else {
                for name in names {
                    println!("{name}");
                }
            }
        }
        Commands::List { counts: true } => {
            let counts = proxy.list_with_counts().await?;
            if cli.json {
                println!("{}", serde_json::json!({ "people": counts }));
            } else if counts.is_empty() {
                println!("No people enrolled");
            } else {
                let mut rows: Vec<_> = counts.into_iter().collect();
                rows.sort();
                for (name, n) in rows {
                    println!("{name}\t{n}");
                }
            }
        }
        Commands::Identify { image } => {
            let image = absolute(&image)?;
            match proxy.identify(&image).await {
                Ok(matches) => {
                    if cli.json {
                        let attendance: Vec<_> = matches
                            .iter()
                            .map(|(name, confidence)| {
                                serde_json::json!({ "name": name, "confidence": confidence })
                            })
                            .collect();
                        println!("{}", serde_json::json!({ "attendance": attendance }));
                    } else {
                        for (name, confidence) in matches {
                            println!("{name}\t{confidence:.2}");
                        }
                    }
                }
                Err(zbus::Error::MethodError(err_name, _, _))
                    if err_name.as_str() == NO_MATCH_ERROR =>
                {
                    if cli.json {
                        println!("{}", serde_json::json!({ "attendance": [] }));
                    } else {
                        println!("No match found");
                    }
                    std::process::exit(1);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Status => {
            let status = proxy.status().await?;
            println!("{status}");
        }
    }

    Ok(())
}
