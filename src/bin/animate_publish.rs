//! Animate Publish CLI
//!
//! Rewrites one exported `.js` file in place.
//! Returns non-zero and prints usage on any failure.

use clap::{CommandFactory, Parser};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use animate_publish::{
    ExportVariant, PaletteConfig, PipelineError, PublishOptions, PublishOutcome, PublishPipeline,
    UnmatchedPolicy,
};

#[derive(Parser)]
#[command(name = "animate-publish", version)]
#[command(about = "Prepare an Adobe Animate canvas export for the simulation")]
struct Cli {
    /// Exported `.js` file to rewrite in place
    file: Option<PathBuf>,

    /// Publish even if the file is already marked as published
    #[arg(short, long)]
    force: bool,

    /// Do not write a `<name>.orig.js` backup copy
    #[arg(short, long)]
    no_backup: bool,

    /// Do not replace cached bitmap `images/` references
    #[arg(short = 'a', long, short_alias = 'c')]
    keep_asset_path: bool,

    /// Export dialect to rewrite for
    #[arg(long, value_enum, default_value_t = ExportVariant::Aliased)]
    variant: ExportVariant,

    /// Palette config JSON (built-in table if omitted)
    #[arg(short, long)]
    palette: Option<PathBuf>,

    /// What to do when a rule finds nothing to rewrite
    #[arg(long, value_enum, default_value_t = UnmatchedPolicy::Ignore)]
    on_unmatched: UnmatchedPolicy,

    /// Print the publish report as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "animate_publish=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match run(&cli) {
        Ok(outcome) => {
            if cli.json {
                match serde_json::to_string_pretty(&outcome) {
                    Ok(json) => println!("{}", json),
                    Err(e) => return fail(&e.into()),
                }
            } else if let PublishOutcome::Skipped { path } = &outcome {
                println!("Skipped {}: already published.", path.display());
            } else {
                println!("Published!");
            }
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

fn run(cli: &Cli) -> Result<PublishOutcome, PipelineError> {
    let file = cli.file.as_deref().ok_or(PipelineError::NoFileSpecified)?;

    let palette = match &cli.palette {
        Some(path) => PaletteConfig::load(path)?,
        None => PaletteConfig::default(),
    };

    let options = PublishOptions {
        variant: cli.variant,
        force: cli.force,
        backup: !cli.no_backup,
        remap_asset_path: !cli.keep_asset_path,
        on_unmatched: cli.on_unmatched,
        ..Default::default()
    };

    PublishPipeline::new(&palette, options)?.publish_file(file)
}

fn fail(error: &PipelineError) -> ExitCode {
    eprintln!("\nError: {}\n", error);
    eprintln!("{}", Cli::command().render_help());
    ExitCode::FAILURE
}
