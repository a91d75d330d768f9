use tracing_subscriber::{EnvFilter, fmt::SubscriberBuilder};

/// Installs the global fmt subscriber on stderr. `RUST_LOG` wins over the
/// verbosity flag.
pub fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))
}
