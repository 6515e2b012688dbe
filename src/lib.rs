pub use databridge_core as core;
pub use databridge_utils as utils;

// Convenience re-exports for common usage
pub use databridge_core::config::{load_config, BridgeConfig};
pub use databridge_core::destinations::Destination;
pub use databridge_core::model::{Model, TypedRecord, TypedValue};
pub use databridge_core::pipeline::{Pipeline, RunError, RunOptions, RunSummary};
pub use databridge_core::registry::Registry;
pub use databridge_core::sources::Source;
pub use databridge_utils::DatabridgeResult;
