//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Structured logging adapters for device polling."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
#[doc(hidden)]
#[macro_export]
macro_rules! __poll_event {
    ($level:expr, $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            $level,
            connection = ctx.connection.unwrap_or(""),
            host = ctx.host.unwrap_or(""),
            tick = ctx.tick.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational log enriched with connection context.
#[macro_export]
macro_rules! poll_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__poll_event!(tracing::Level::INFO, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__poll_event!(tracing::Level::INFO, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a debug log enriched with connection context.
#[macro_export]
macro_rules! poll_debug {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__poll_event!(tracing::Level::DEBUG, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__poll_event!(tracing::Level::DEBUG, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a warning enriched with connection context.
#[macro_export]
macro_rules! poll_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__poll_event!(tracing::Level::WARN, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__poll_event!(tracing::Level::WARN, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit an error log enriched with connection context.
#[macro_export]
macro_rules! poll_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__poll_event!(tracing::Level::ERROR, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__poll_event!(tracing::Level::ERROR, $crate::LogContext::default(), $($arg)+)
    };
}
