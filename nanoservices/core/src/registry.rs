//! Name-to-constructor tables for sources and destinations.

use std::collections::HashMap;
use std::fmt;

use crate::destinations::{self, Destination};
use crate::sources::{self, Source};

type SourceFactory = Box<dyn Fn() -> Box<dyn Source> + Send + Sync>;
type DestinationFactory = Box<dyn Fn() -> Box<dyn Destination> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    Source,
    Destination,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PluginKind::Source => "source",
            PluginKind::Destination => "destination",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("{kind} plugin `{name}` is not registered")]
    NotFound { kind: PluginKind, name: String },
}

/// Every lookup returns a fresh instance, so plugins never share state across runs.
#[derive(Default)]
pub struct Registry {
    sources: HashMap<String, SourceFactory>,
    destinations: HashMap<String, DestinationFactory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the bundled `sql_api`, `csv` and `timescaledb` plugins.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        sources::register(&mut registry);
        destinations::timescaledb::register(&mut registry);
        registry
    }

    /// Register a source factory. A later registration under the same name replaces the earlier one.
    pub fn register_source<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Source> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.sources.insert(name.clone(), Box::new(factory)).is_some() {
            tracing::warn!(plugin = %name, "source plugin re-registered");
        }
    }

    pub fn register_destination<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Destination> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.destinations.insert(name.clone(), Box::new(factory)).is_some() {
            tracing::warn!(plugin = %name, "destination plugin re-registered");
        }
    }

    pub fn source(&self, name: &str) -> Result<Box<dyn Source>, RegistryError> {
        self.sources
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| not_found(PluginKind::Source, name))
    }

    pub fn destination(&self, name: &str) -> Result<Box<dyn Destination>, RegistryError> {
        self.destinations
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| not_found(PluginKind::Destination, name))
    }

    pub fn source_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sources.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn destination_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.destinations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

fn not_found(kind: PluginKind, name: &str) -> RegistryError {
    RegistryError::NotFound { kind, name: name.to_string() }
}
