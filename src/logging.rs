use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Logs go to stderr so stdout stays
/// parseable; thread names identify which worker emitted a line.
///
/// `RUST_LOG` overrides the default level when set.
pub fn init(verbose: bool) {
    let default_directive = if verbose {
        "assembly_station=debug"
    } else {
        "assembly_station=warn"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    // A subscriber may already be installed when embedded in tests.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
