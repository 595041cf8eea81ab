//! Logging setup
//!
//! Records go to stderr through `env_logger`. `PW_LOG` takes a standard
//! filter directive such as `warn,porchwatch::mqtt=trace`, and `PW_LOG_STYLE`
//! controls coloring (`auto`, `always` or `never`).


use env_logger::{Builder, Env};


#[cfg(debug_assertions)]
const DEFAULT_FILTER: &str = "info,porchwatch=debug";
#[cfg(not(debug_assertions))]
const DEFAULT_FILTER: &str = "info,actix_server=warn";


pub fn init() {

    let env = Env::new()
        .filter_or("PW_LOG", DEFAULT_FILTER)
        .write_style("PW_LOG_STYLE");

    Builder::from_env(env)
        .format_timestamp_secs()
        .format_module_path(false)
        .init();
}


/// Logs an error, with context, if the given `Result` is `Err`
///
/// For fallible work whose failure must not abort the caller, such as
/// background downloads and notifications.
#[macro_export]
macro_rules! allow_err {
    ($res:expr, $($context:tt)+) => {
        if let Err(err) = $res {
            log::error!("{}: {}", format_args!($($context)+), err);
        }
    };
}
