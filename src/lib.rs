//! streamsniff - Reassemble TCP streams from captures and report what
//! each flow carries.
//!
//! The reassembly and dispatch machinery lives in `streamsniff-core`; this
//! crate adds the command line, output formatting and the per-flow
//! handlers (an RTMP connect probe and a byte summary).
//!
//! # Example
//!
//! ```no_run
//! use streamsniff::handlers::SniffHandlers;
//! use streamsniff_core::{FileSegmentSource, Pipeline, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let source = FileSegmentSource::open("capture.pcap")?;
//!     let (_, records) = Pipeline::new(SniffHandlers::default(), PipelineConfig::default())
//!         .run(source)
//!         .await?;
//!     for record in records {
//!         println!("{record:?}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod handlers;
