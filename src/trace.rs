//! Feature-gated driver tracing.
//!
//! Wire traffic is high-volume, so all tracing stays compiled out unless
//! the `verbose` feature is enabled. Frame-level events go to the
//! `vertro::wire` target, driver phases to `vertro`, so subscribers can
//! filter one without the other.

/// Trace a frame-level event on the `vertro::wire` target.
macro_rules! verbose {
    ($($tt:tt)*) => {
        #[cfg(feature = "verbose")]
        tracing::trace!(target: "vertro::wire", $($tt)*)
    };
}

/// Enter a driver-phase span (connect, startup, prepare, copy-in) on the
/// `vertro` target.
macro_rules! span {
    ($($tt:tt)*) => {
        #[cfg(feature = "verbose")]
        let s = tracing::trace_span!(target: "vertro", $($tt)*);
        #[cfg(feature = "verbose")]
        let _s = s.enter();
    };
}

pub(crate) use span;
pub(crate) use verbose;
