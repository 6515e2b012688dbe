/// Initialize the tracing subscriber for the `databridge_core` crate.
///
/// `RUST_LOG` takes precedence over `level` when set. Safe to call more than
/// once; later calls are ignored (`try_init`).
pub fn init(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_twice_is_harmless() {
        super::init("debug");
        super::init("info");
        tracing::info!("logging initialized");
    }
}
