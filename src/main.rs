//! streamsniff CLI entry point.

use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use streamsniff::cli::{Args, OutputFormatter};
use streamsniff::handlers::{FlowRecord, SniffHandlers};
use streamsniff_core::{FileSegmentSource, Pipeline, SegmentSource};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Set up logging; stdout carries results only
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| args.log_level().into()),
        )
        .with_writer(io::stderr)
        .init();

    let source = open_source(&args)?;
    let handlers = SniffHandlers::new(args.handler_options());
    let (handle, results) = Pipeline::new(handlers, args.pipeline_config()).spawn(source);

    // Ctrl-C drains instead of killing in-flight flows
    let stop = handle.stop_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, draining");
            stop.stop();
        }
    });

    let printer = tokio::spawn(print_results(OutputFormatter::new(args.format), results));

    // Flush, wait for every flow task, close results, then wait for the printer
    let summary = handle.join().await.context("Pipeline failed")?;
    printer
        .await
        .context("Result printer panicked")?
        .context("Failed to write results")?;

    if let Some(err) = summary.source_error {
        warn!(error = %err, "capture ended early");
    }
    Ok(())
}

async fn print_results(
    formatter: OutputFormatter,
    mut results: mpsc::Receiver<FlowRecord>,
) -> io::Result<()> {
    while let Some(record) = results.recv().await {
        let mut stdout = io::stdout().lock();
        formatter.write(&record, &mut stdout)?;
        stdout.flush()?;
    }
    Ok(())
}

fn open_source(args: &Args) -> Result<Box<dyn SegmentSource>> {
    if let Some(path) = &args.read {
        let source = FileSegmentSource::open(path)
            .with_context(|| format!("Failed to open capture file: {}", path.display()))?;
        info!(path = %path.display(), "reading capture file");
        return Ok(Box::new(source));
    }
    open_live(args)
}

#[cfg(feature = "live")]
fn open_live(args: &Args) -> Result<Box<dyn SegmentSource>> {
    let source = streamsniff_core::LiveSegmentSource::open(&args.live_options())
        .with_context(|| format!("Failed to open interface: {}", args.interface))?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "live"))]
fn open_live(args: &Args) -> Result<Box<dyn SegmentSource>> {
    anyhow::bail!(
        "live capture on {} needs the `live` feature; use -r FILE to read a capture",
        args.interface
    )
}
