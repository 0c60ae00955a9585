//! This create houses common for me functions, because some things
//! are just boilerplate and aaAAAAAAAAA

use std::future::Future;

pub mod useful_methods;
pub mod user_resolving;

// Re-exported for the macros below, so that users of this crate don't need
// to have these exact names in scope.
#[doc(hidden)]
pub use log as __log;
#[doc(hidden)]
pub use teloxide as __teloxide;
#[doc(hidden)]
pub use tokio as __tokio;

/// Initialize logging and start the `closure` in an async runtime.
/// Logging is enabled by default on level `info` unless overridden
/// by environment variable `RUST_LOG`. This uses the crate
/// [pretty_env_logger][] internally, see its documentation for more details.
///
/// [pretty_env_logger]: https://docs.rs/pretty_env_logger
///
/// # Panics
///
/// Panics if the tokio runtime fails to start.
pub fn start_everything(closure: impl Future<Output = ()>) {
    let log_level = std::env::var_os("RUST_LOG")
        .unwrap_or_else(|| std::ffi::OsString::from("info"))
        .into_string()
        .unwrap_or_else(|_| String::from("info"));

    // journald timestamps everything on its own.
    let running_as_systemd_service = std::env::var_os("JOURNAL_STREAM").is_some();

    let mut builder = match running_as_systemd_service {
        true => pretty_env_logger::formatted_builder(),
        false => pretty_env_logger::formatted_timed_builder(),
    };

    builder.parse_filters(&log_level);

    if builder.try_init().is_err() {
        log::error!("Tried to init logger twice!");
    }

    log::info!("hi");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to start the tokio runtime!")
        .block_on(closure);
}

/// Retry a Telegram request a few times if it fails because of flood control
/// or a network hiccup. Any other error, or the third failure, is returned as is.
///
/// The expression is evaluated anew on each attempt, so it should construct
/// and `.await` the whole request:
///
/// ```ignore
/// let result = teloxide_retry!(bot.send_message(chat_id, "hi").await);
/// ```
#[macro_export]
macro_rules! teloxide_retry {
    ($request: expr) => {{
        let mut attempts: u8 = 0;
        loop {
            attempts += 1;
            match $request {
                Err($crate::__teloxide::RequestError::RetryAfter(seconds)) if attempts < 3 => {
                    $crate::__log::debug!("Flood control, sleeping for {} seconds", seconds.seconds());
                    $crate::__tokio::time::sleep(seconds.duration()).await;
                }
                Err($crate::__teloxide::RequestError::Network(e)) if attempts < 3 => {
                    $crate::__log::debug!("Network error, retrying: {e}");
                    $crate::__tokio::time::sleep(::std::time::Duration::from_secs(1)).await;
                }
                other => break other,
            }
        }
    }};
}
