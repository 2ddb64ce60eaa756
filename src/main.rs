mod address;
mod cli;
mod deploy;
mod error;
mod project;
mod provider;
mod resource;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use cli::{Args, Mode};
use deploy::Outcome;
use project::ProjectConfig;
use provider::{LocalProvider, Provider};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the compiled files in test mode
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let Some(mode) = args.mode() else {
        eprintln!("{}", Args::command().render_help());
        std::process::exit(1);
    };

    let provider: Arc<dyn Provider> = Arc::new(LocalProvider);

    let config = ProjectConfig::load(provider.as_ref(), &args.config)
        .await
        .with_context(|| format!("Failed to load project file {}", args.config.display()))?;

    let base = args.config.parent().unwrap_or(Path::new("."));
    let project = config
        .into_project(base, provider)
        .context("Invalid project")?;

    let filter = args.filter.as_ref();

    match mode {
        Mode::Test => {
            for (file, text) in project.inspect(filter).await? {
                println!("# --- {file} ---");
                println!("{text}");
            }
        }
        Mode::Build => {
            let report = project.build(filter).await?;

            info!(
                dir = %project.dir().display(),
                swapped = report.count(Outcome::Swapped),
                skipped = report.count(Outcome::Skipped),
                "build finished"
            );
        }
    }

    Ok(())
}
