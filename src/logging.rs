use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// Without `debug` the level is pinned to `info` so a stray `RUST_LOG` in the
/// environment cannot make the runtime verbose. With `debug` the `RUST_LOG`
/// filter wins and falls back to `debug`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init(debug: bool) {
    let level = if debug { "debug" } else { "info" };

    let filter = if debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    } else {
        EnvFilter::new(level)
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init(false);
        init(true);
        tracing::info!("logging initialised twice without panicking");
    }
}
