//! Process-wide shutdown signal.
//!
//! A single `CancellationToken` is installed once at startup and handed to
//! every long-lived task (the scheduler loop, the two stream subscriptions,
//! the mempool timer). A `ctrlc` handler cancels it; any task can also
//! trigger it on an unrecoverable condition (§7's "the only fatal condition
//! is startup failure... the process exits").

use btcwatch_logger::info;
use once_cell::sync::OnceCell;
use tokio_util::sync::CancellationToken;

static TOKEN: OnceCell<CancellationToken> = OnceCell::new();

/// Install the global cancellation token and a `ctrlc` handler that cancels
/// it. Must be called exactly once, before any task calls [`token`].
pub fn init() -> CancellationToken {
    let token = CancellationToken::new();
    TOKEN.set(token.clone()).ok();
    let for_handler = token.clone();
    ctrlc::set_handler(move || {
        info!("received interrupt, shutting down");
        for_handler.cancel();
    })
    .expect("failed to install ctrlc handler");
    token
}

/// Borrow the global token. Panics if [`init`] was never called.
pub fn token() -> CancellationToken {
    TOKEN
        .get()
        .expect("btcwatch_stop_handler::init was not called")
        .clone()
}
