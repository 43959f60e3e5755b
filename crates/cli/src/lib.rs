mod open;
mod scan;
mod search;
mod show;
mod view;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use stockroom_api::{Asset, Catalog, SearchQuery};
use stockroom_core::{Config, Library, MemoryCatalog};

#[derive(Parser)]
#[command(
    name = "stockroom",
    version,
    about = "Catalog 3D printing assets across local folders, git repositories and archives",
    long_about = "Stockroom walks the configured library backends, records every file, folder and \
                  archive member in a catalog, and renders previews for models and sliced prints."
)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, short, global = true, value_name = "FILE", default_value = "stockroom.toml")]
    pub config: PathBuf,

    /// Also print logs to stderr
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan backends, sweep removed files and process new ones
    #[command(
        long_about = "Runs one discovery cycle over every configured backend (or only the one named \
                      with --backend), then waits for rendering and enrichment to finish. The \
                      catalog is saved to <data_path>/catalog.json."
    )]
    Scan {
        /// Scan only this backend
        #[arg(long, value_name = "NAME")]
        backend: Option<String>,
    },
    /// Show one asset and its children
    Show {
        /// Asset id
        id: String,
        /// Print the raw JSON record
        #[arg(long)]
        json: bool,
    },
    /// Search assets by label and tags
    Search {
        /// Case-insensitive substring of the label
        label: Option<String>,
        /// Required tag, may be repeated
        #[arg(long = "tag", value_name = "TAG")]
        tags: Vec<String>,
    },
    /// Copy the bytes of an asset, or of a file inside a bundle asset
    Open {
        /// Asset id
        id: String,
        /// Path relative to the asset's filesystem (inside the archive for bundles)
        #[arg(value_name = "PATH")]
        path: Option<String>,
        /// Write to this file instead of stdout
        #[arg(long, short, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let component = match &cli.command {
        Commands::Scan { .. } => "scan",
        _ => "cli",
    };
    let _guard = stockroom_core::logging::init_logging(
        component,
        &stockroom_core::logging::default_log_dir(),
        cli.verbose,
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let session = Session::open(&cli.config)?;
        match cli.command {
            Commands::Scan { backend } => scan::run(&session, backend).await,
            Commands::Show { id, json } => show::run(&session, &id, json),
            Commands::Search { label, tags } => search::run(&session, label, tags),
            Commands::Open { id, path, output } => open::run(&session, &id, path, output),
        }
    })
}

/// Library plus the snapshot-backed catalog it writes to.
pub(crate) struct Session {
    pub library: Library,
    pub catalog: Arc<MemoryCatalog>,
}

impl Session {
    fn open(config_path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let config = Config::load(Some(config_path))?;
        let catalog = Arc::new(MemoryCatalog::load(config.data_path.join("catalog.json"))?);
        let library = Library::builder(config).catalog(catalog.clone()).build()?;
        Ok(Self { library, catalog })
    }

    fn resolve(&self, id: &str) -> Result<Asset, Box<dyn std::error::Error>> {
        resolve_asset(self.catalog.as_ref(), id)
    }
}

/// Look up an asset by full id or by a unique id prefix, as printed in tables.
pub(crate) fn resolve_asset(catalog: &dyn Catalog, id: &str) -> Result<Asset, Box<dyn std::error::Error>> {
    if let Ok(asset) = catalog.get_asset(id, false) {
        return Ok(asset);
    }
    let mut matches: Vec<Asset> = catalog
        .search(&SearchQuery::default())?
        .into_iter()
        .filter(|a| a.id.starts_with(id))
        .collect();
    match matches.len() {
        0 => Err(format!("no asset with id {}", id).into()),
        1 => Ok(matches.remove(0)),
        n => Err(format!("id prefix {} is ambiguous ({} assets)", id, n).into()),
    }
}
