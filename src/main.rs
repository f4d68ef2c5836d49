use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use strata::error::Result;
use strata::import::{DocumentMetadata, ImportJob, ImportPool};
use strata::markdown::ComrakRenderer;
use strata::node::Element;
use strata::parse::FieldParser;
use strata::render::{RenderContext, Renderer, render_error};
use strata::server::{AppState, router};
use strata::settings::{Loader, Settings};

#[derive(Parser)]
#[command(name = "strata", version, about = "Import notes and render their typed values")]
struct Cli {
    /// Configuration file layered over the defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import files and print each one's values as HTML
    Render {
        files: Vec<PathBuf>,
        /// Render arrays and objects inline instead of as nested lists
        #[arg(long)]
        inline: bool,
    },
    /// Serve the HTTP interface
    Serve {
        /// Overrides server.address
        #[arg(long)]
        address: Option<String>,
    },
}

fn load_settings(config: Option<&PathBuf>) -> Result<Settings> {
    let loader = match config {
        Some(path) => Loader::new().with_file(path),
        None => Loader::new().with_optional_file("strata.toml"),
    };
    loader.with_environment().build()
}

async fn render_files(settings: &Settings, files: Vec<PathBuf>, inline: bool) -> Result<()> {
    let pool = ImportPool::start(FieldParser::new(), &settings.import);
    let mut jobs = Vec::with_capacity(files.len());
    for file in &files {
        let contents = std::fs::read_to_string(file)?;
        let metadata = DocumentMetadata::from_fs(file)?;
        jobs.push(ImportJob::new(file.to_string_lossy(), contents, metadata));
    }
    let renderer = Renderer::new(Arc::new(ComrakRenderer::new()));
    let ctx = RenderContext::from_settings(&settings.render);
    for result in pool.import_all(jobs).await {
        let html = match result.value {
            Ok(value) => renderer.render_to_element(&value, &result.path, &ctx, !inline).await.to_html(),
            Err(e) => {
                warn!(path = %result.path, error = %e, "import failed");
                let mut root = Element::new("div");
                render_error(&mut root, &e.to_string());
                root.to_html()
            }
        };
        println!("<!-- {} -->\n{}", result.path, html);
    }
    pool.shutdown();
    Ok(())
}

async fn serve(settings: Settings, address: Option<String>) -> Result<()> {
    let address = address.unwrap_or(settings.server.address);
    let pool = ImportPool::start(FieldParser::new(), &settings.import);
    let renderer = Renderer::new(Arc::new(ComrakRenderer::new()));
    let state = Arc::new(AppState::new(pool, renderer, RenderContext::from_settings(&settings.render)));
    let listener = TcpListener::bind(&address).await?;
    info!(%address, "listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let outcome = match load_settings(cli.config.as_ref()) {
        Ok(settings) => match cli.command {
            Command::Render { files, inline } => render_files(&settings, files, inline).await,
            Command::Serve { address } => serve(settings, address).await,
        },
        Err(e) => Err(e),
    };
    if let Err(e) = outcome {
        eprintln!("strata: {e}");
        std::process::exit(1);
    }
}
