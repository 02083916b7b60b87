// Debug-log setup: a tracing subscriber writing to debuglog.txt in the
// configured output directory. RUST_LOG filters as usual; default level is
// info so the hot paths stay quiet.

use crate::error::Result;
use std::fs::File;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

pub fn init(log_dir: &Path) -> Result<()> {
    let file = File::create(log_dir.join("debuglog.txt"))?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .finish();

    // A host process (or a test harness) may already have a subscriber; that
    // is fine, ours just does not become the global one.
    let _ = tracing::subscriber::set_global_default(subscriber);
    Ok(())
}
