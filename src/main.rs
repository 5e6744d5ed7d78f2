//! Blobshare CLI - One-way container to share mirror
//!
//! Resolves configuration from flags and the environment, runs one mirror
//! pass and exits non-zero on the first error.

use blobshare::config::{CliArgs, LogFormat, MirrorConfig, OutputFormat};
use blobshare::core::MirrorEngine;
use blobshare::error::Result;
use blobshare::progress::{LineReporter, MirrorObserver, NullObserver, ProgressReporter};
use blobshare::storage;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() {
    // Parse CLI arguments
    let args = CliArgs::parse();

    init_logging(&args);

    // Handle result
    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(args: &CliArgs) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match args.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        })
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match args.log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn run(args: CliArgs) -> Result<()> {
    // Build configuration
    let config = MirrorConfig::from_cli(&args)?;

    if args.verbose > 0 {
        print_config(&config);
    }

    let observer: Arc<dyn MirrorObserver> = if args.quiet || args.output_format == OutputFormat::Json {
        Arc::new(NullObserver)
    } else if args.progress {
        Arc::new(ProgressReporter::new())
    } else {
        Arc::new(LineReporter::stdout())
    };

    let runtime = tokio::runtime::Runtime::new()?;
    let report = runtime.block_on(async {
        let (source, destination) = storage::connect(&config).await?;
        MirrorEngine::new(source, destination, config.options.clone())
            .with_observer(observer)
            .execute()
            .await
    })?;

    match args.output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text if !args.quiet => report.print_summary(),
        OutputFormat::Text => {}
    }

    Ok(())
}

fn print_config(config: &MirrorConfig) {
    eprintln!("=== Blobshare Configuration ===");
    eprintln!("Backend:      {:?}", config.backend);
    eprintln!("Container:    {}", config.container);
    eprintln!("Share:        {}", config.share.display());
    eprintln!("Prune scope:  {:?}", config.options.prune_scope);
    eprintln!("Strategy:     {:?}", config.options.strategy);
    eprintln!("Parallelism:  {}", config.options.write.parallelism);
    eprintln!(
        "Chunk size:   {}",
        humansize::format_size(config.options.write.chunk_size as u64, humansize::BINARY)
    );
    eprintln!("Page size:    {}", config.page_size);
    eprintln!(
        "Case fold:    {}",
        config.options.normalizer.case_insensitive
    );
    eprintln!();
}
