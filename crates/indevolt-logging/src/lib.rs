//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Structured logging adapters for device polling."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![warn(missing_docs)]

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

/// Initialize a baseline tracing subscriber suitable for tests and tooling.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer())
        .try_init();
}

/// Structured logging context propagated by the poll macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Connection (setup entry) identifier.
    pub connection: Option<&'a str>,
    /// Device host the connection polls.
    pub host: Option<&'a str>,
    /// Poll cycle sequence number.
    pub tick: Option<u64>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a connection identifier.
    pub fn with_connection(mut self, connection: &'a str) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Attach the device host.
    pub fn with_host(mut self, host: &'a str) -> Self {
        self.host = Some(host);
        self
    }

    /// Attach a tick value.
    pub fn with_tick(mut self, tick: u64) -> Self {
        self.tick = Some(tick);
        self
    }
}

/// Severity chosen for a failed fetch given the current failure streak.
///
/// Failures below `threshold` are expected noise on a flaky link and are
/// reported as warnings; once the streak reaches the threshold they escalate
/// to errors.
pub fn failure_level(consecutive_failures: u32, threshold: u32) -> Level {
    if consecutive_failures >= threshold.max(1) {
        Level::ERROR
    } else {
        Level::WARN
    }
}

/// Emit a fetch failure with severity escalating on the failure streak.
pub fn log_fetch_failure(
    context: &LogContext<'_>,
    kind: &str,
    error: &dyn std::fmt::Display,
    consecutive_failures: u32,
    threshold: u32,
) {
    let connection = context.connection.unwrap_or("");
    let host = context.host.unwrap_or("");
    let tick = context.tick.unwrap_or_default();
    // `tracing::event!` needs a const level, so branch instead of passing it through.
    if failure_level(consecutive_failures, threshold) == Level::ERROR {
        tracing::error!(
            connection,
            host,
            tick,
            kind,
            consecutive_failures,
            error = %error,
            "device unreachable; serving stale snapshot"
        );
    } else {
        tracing::warn!(
            connection,
            host,
            tick,
            kind,
            consecutive_failures,
            error = %error,
            "device fetch failed; keeping previous snapshot"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macros_emit_without_panic() {
        init();
        let ctx = LogContext::new()
            .with_connection("entry-a")
            .with_host("10.0.0.2");
        poll_info!(context = ctx.clone(), "connection ready");
        poll_debug!("debug message");
        poll_error!(context = ctx.with_tick(7), "status code: {}", 500);
    }

    #[test]
    fn failure_level_escalates_at_threshold() {
        assert_eq!(failure_level(1, 3), Level::WARN);
        assert_eq!(failure_level(2, 3), Level::WARN);
        assert_eq!(failure_level(3, 3), Level::ERROR);
        assert_eq!(failure_level(9, 3), Level::ERROR);
        assert_eq!(failure_level(1, 0), Level::ERROR);
    }

    #[test]
    fn fetch_failure_helper_emits() {
        init();
        let ctx = LogContext::new().with_connection("entry-a").with_tick(2);
        log_fetch_failure(&ctx, "timeout", &"request timed out", 1, 3);
        log_fetch_failure(&ctx, "timeout", &"request timed out", 3, 3);
    }
}
