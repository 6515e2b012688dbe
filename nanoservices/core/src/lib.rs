//! databridge_core: schema-driven record transfer
//!
//! A bridge fetches raw records from a source plugin, converts every field
//! against a declarative column model, and upserts the typed records into a
//! destination in batched transactions.
//!
//! Basic usage:
//!
//! ```no_run
//! use databridge_core::config::load_config;
//! use databridge_core::pipeline::{Pipeline, RunOptions};
//! use databridge_core::registry::Registry;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("config.yaml")?;
//! let mut pipeline = Pipeline::new(&Registry::builtin(), config)?;
//! let summary = pipeline.run(&RunOptions::default(), None).await?;
//! println!("{summary}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod convert;
pub mod destinations;
pub mod model;
pub mod pipeline;
pub mod registry;
pub mod sources;
pub mod statement;
pub mod store;
pub mod window;

pub mod logging;

pub mod metrics;
