//! # Structured Logging Module
//!
//! Environment-aware structured logging for workflow transitions, crew
//! dispatches and work item execution.
//!
//! The environment comes from `STUDIO_ENV` (falling back to `APP_ENV`, then
//! `development`). `RUST_LOG` overrides the level derived from it, and
//! `STUDIO_LOG_FORMAT=json` switches the console output to JSON lines.

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
///
/// Safe to call more than once; an already installed global subscriber is
/// left in place.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));
        let json = use_json_format();

        let layer = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .json()
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .boxed()
        };

        if tracing_subscriber::registry()
            .with(layer.with_filter(filter))
            .try_init()
            .is_err()
        {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Current environment name
pub fn get_environment() -> String {
    std::env::var("STUDIO_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        "test" => "warn",
        _ => "debug",
    }
}

fn use_json_format() -> bool {
    std::env::var("STUDIO_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Log a project moving between workflow states
pub fn log_workflow_transition(
    project_id: &str,
    workflow: &str,
    from_state: &str,
    to_state: &str,
    reason: Option<&str>,
) {
    tracing::info!(
        project_id = %project_id,
        workflow = %workflow,
        from_state = %from_state,
        to_state = %to_state,
        reason = reason,
        timestamp = %Utc::now().to_rfc3339(),
        "🔀 WORKFLOW_TRANSITION"
    );
}

/// Log a crew invocation and its outcome
pub fn log_crew_dispatch(
    project_id: &str,
    state: &str,
    crew: &str,
    status: &str,
    duration_ms: Option<u64>,
    details: Option<&str>,
) {
    tracing::info!(
        project_id = %project_id,
        state = %state,
        crew = %crew,
        status = %status,
        duration_ms = duration_ms,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "👷 CREW_DISPATCH"
    );
}

/// Log structured data for work item operations
pub fn log_work_item_operation(
    operation: &str,
    execution_id: &str,
    work_item_id: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        execution_id = %execution_id,
        work_item_id = %work_item_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🔧 WORK_ITEM_OPERATION"
    );
}

/// Log a reservation or release against the resource pools
pub fn log_resource_operation(
    operation: &str,
    work_item_id: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::debug!(
        operation = %operation,
        work_item_id = %work_item_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📦 RESOURCE_OPERATION"
    );
}

/// Log structured data for storage operations
pub fn log_persistence_operation(
    operation: &str,
    record_id: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        record_id = %record_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "💾 PERSISTENCE_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_detection() {
        std::env::set_var("STUDIO_ENV", "test_override");
        let env = get_environment();
        assert_eq!(env, "test_override");
        std::env::remove_var("STUDIO_ENV");
    }

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "warn");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("staging"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_structured_logging();
        init_structured_logging();
    }
}
