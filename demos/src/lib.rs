//! Shared plumbing for the example programs

use std::sync::OnceLock;

use flux_runtime::StopHandle;

static STOP: OnceLock<StopHandle> = OnceLock::new();

extern "C" fn on_sigint(_sig: libc::c_int) {
    // Only an atomic store happens here.
    if let Some(stop) = STOP.get() {
        stop.stop();
    }
}

/// Route SIGINT to a clean graph stop
pub fn install_sigint(stop: StopHandle) {
    STOP.set(stop).ok();
    let handler = on_sigint as extern "C" fn(libc::c_int);
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
    }
}

/// Log to stderr; `RUST_LOG` overrides the default level
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
}
