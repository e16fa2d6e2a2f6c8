//! Supporting utility type.

/// A type erased error, returned by subscriber handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Trace when `verbose` feature enabled.
macro_rules! verbose {
    ($($tt:tt)*) => {
        #[cfg(feature = "verbose")]
        tracing::trace!($($tt)*)
    };
}

/// Log debug when `log` feature enabled.
macro_rules! debug {
    ($($tt:tt)*) => {{
        #[cfg(feature = "log")]
        log::debug!($($tt)*);
        #[cfg(not(feature = "log"))]
        let _ = format_args!($($tt)*);
    }};
}

/// Log info when `log` feature enabled.
macro_rules! info {
    ($($tt:tt)*) => {{
        #[cfg(feature = "log")]
        log::info!($($tt)*);
        #[cfg(not(feature = "log"))]
        let _ = format_args!($($tt)*);
    }};
}

/// Log warning when `log` feature enabled.
macro_rules! warn_ {
    ($($tt:tt)*) => {{
        #[cfg(feature = "log")]
        log::warn!($($tt)*);
        #[cfg(not(feature = "log"))]
        let _ = format_args!($($tt)*);
    }};
}

pub(crate) use verbose;
pub(crate) use debug;
pub(crate) use info;
pub(crate) use warn_ as warn;
