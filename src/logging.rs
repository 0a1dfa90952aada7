use std::time::Duration;

use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins when set. Otherwise debug builds log this crate at debug
/// level and everything else at info.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            EnvFilter::new("collection_uploader=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });

    // A host may already have installed its own subscriber.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub fn fmt_ms(d: Duration) -> String {
    let ms = d.as_millis();
    if ms == 0 {
        "<1ms".into()
    } else {
        format!("{}ms", ms)
    }
}
