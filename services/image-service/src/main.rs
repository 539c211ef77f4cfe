//! plfm-vt Image Service
//!
//! Command-line front end for the image repository:
//! - `add`: ingest one or more ISO images
//! - `verify`: re-check an ingested image against its verification hash
//! - `remove`: delete an image from the repository and the catalog

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use uuid::Uuid;

use plfm_image_service::config::Config;
use plfm_image_service::state::ImageStore;
use plfm_image_service::{logging, ImageKind, ImageService, Ingestor, SystemMountDriver};

/// plfm-vt image service - manage the local ISO image repository.
#[derive(Debug, Parser)]
#[command(name = "image-service")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Image repository root (overrides GHOST_IMAGE_REPO_ROOT).
    #[arg(long, global = true)]
    repository_root: Option<PathBuf>,

    /// Image catalog database (overrides GHOST_IMAGE_DB_PATH).
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ingest ISO images into the repository.
    Add {
        /// Source ISO files.
        #[arg(required = true)]
        isos: Vec<PathBuf>,

        /// Image family (base, mk, os).
        #[arg(long, default_value = "base")]
        kind: ImageKind,

        /// Free-form description stored with each image.
        #[arg(long, default_value = "")]
        description: String,

        /// Image uuid (single ISO only). Generated when omitted.
        #[arg(long)]
        uuid: Option<Uuid>,
    },

    /// Verify an ingested image.
    Verify {
        /// Image uuid.
        uuid: Uuid,
    },

    /// Remove an ingested image.
    Remove {
        /// Image uuid.
        uuid: Uuid,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::from(1);
        }
    };

    if let Err(e) = logging::init(&config.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::from(1);
    }

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "image-service failed");
            // Log the error chain
            for cause in e.chain().skip(1) {
                error!(cause = %cause, "caused by");
            }
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli, mut config: Config) -> Result<()> {
    if let Some(root) = cli.repository_root {
        config.repository_root = root;
    }
    if let Some(db_path) = cli.db_path {
        config.db_path = db_path;
    }

    info!(
        repository_root = %config.repository_root.display(),
        temp_root = %config.temp_root.display(),
        db_path = %config.db_path.display(),
        "Configuration loaded"
    );

    let store = ImageStore::open(&config.db_path)
        .with_context(|| format!("opening image catalog {}", config.db_path.display()))?;
    let ingestor = Ingestor::new(Arc::new(SystemMountDriver), config.ingest_config());
    let service = Arc::new(ImageService::new(
        ingestor,
        store,
        config.repository_root.clone(),
    ));

    match cli.command {
        Commands::Add {
            isos,
            kind,
            description,
            uuid,
        } => {
            if uuid.is_some() && isos.len() > 1 {
                bail!("--uuid can only be used with a single ISO");
            }

            // Distinct uuids never share scratch or destination paths, so
            // each ISO gets its own blocking worker.
            let mut handles = Vec::with_capacity(isos.len());
            for iso in isos {
                let service = Arc::clone(&service);
                let description = description.clone();
                let uuid = uuid.unwrap_or_else(Uuid::new_v4);
                handles.push(tokio::task::spawn_blocking(move || {
                    let result = service.add(kind, &iso, &description, uuid);
                    (iso, result)
                }));
            }

            let mut failed = 0usize;
            for handle in handles {
                let (iso, result) = handle.await.context("ingest worker panicked")?;
                match result {
                    Ok(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                    Err(e) => {
                        error!(iso = %iso.display(), error = %e, "could not add image");
                        failed += 1;
                    }
                }
            }

            if failed > 0 {
                bail!("{} image(s) failed to ingest", failed);
            }
        }
        Commands::Verify { uuid } => {
            let record = service.verify(&uuid)?;
            info!(uuid = %uuid, "image verified");
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Remove { uuid } => {
            let record = service.remove(&uuid)?;
            info!(uuid = %uuid, filename = %record.filename, "image removed");
        }
    }

    Ok(())
}
