//! Opt-in tracing output.
//!
//! With the `tracing` feature the engine emits spans around flushes,
//! recompute rounds, vertex evaluation, structural edits and pastes. This
//! installs a formatting subscriber filtered by `RUST_LOG`.

#[cfg(feature = "tracing")]
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    // a subscriber installed by the host wins
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}

#[cfg(not(feature = "tracing"))]
pub fn init_tracing() {}
