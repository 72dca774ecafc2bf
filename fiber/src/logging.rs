//! Logger setup. The library only logs through `log`; binaries and tests call
//! [`initialize`] to see the output, filtered by `RUST_LOG`.

use std::sync::Once;

use flexi_logger::{Logger, LoggerHandle};
use parking_lot::Mutex;

static INIT_LOG: Once = Once::new();

static HANDLE: Mutex<Option<LoggerHandle>> = Mutex::new(None);

pub fn initialize() {
    INIT_LOG.call_once(|| {
        match Logger::try_with_env_or_str("").and_then(|logger| logger.start()) {
            Ok(handle) => *HANDLE.lock() = Some(handle),
            Err(err) => eprintln!("failed to initialize logging: {err}"),
        }
    });
}
