//! # Execution Monitoring
//!
//! Derived health indicators attached to every execution report: a 0-100
//! health score, performance rating, per-pool stress levels, alerts and
//! recommendations. These are diagnostics, not contracts.

use super::dependency_graph::GraphValidation;
use super::resource_manager::ResourceUtilization;
use crate::resilience::{CircuitBreakerStatus, CircuitState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Work item counts and timings for one execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionCounts {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub blocked: usize,
    pub running: usize,
    pub pending: usize,
    /// Sum of per-item run durations
    pub total_execution_seconds: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PerformanceRating {
    Excellent,
    Good,
    Fair,
    NeedsImprovement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StressLevel {
    Low,
    Moderate,
    High,
    Critical,
}

impl StressLevel {
    pub fn from_utilization(percent: f64) -> Self {
        if percent > 90.0 {
            StressLevel::Critical
        } else if percent > 75.0 {
            StressLevel::High
        } else if percent > 50.0 {
            StressLevel::Moderate
        } else {
            StressLevel::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLevel {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertCategory {
    Health,
    Performance,
    Resources,
    CircuitBreaker,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub category: AlertCategory,
    pub message: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemStatus {
    Healthy,
    Warning,
    Degraded,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub average_execution_seconds: f64,
    pub throughput_per_minute: f64,
    pub total_execution_seconds: f64,
    pub efficiency_ratio: f64,
    pub rating: PerformanceRating,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceHealth {
    pub stress_levels: BTreeMap<String, StressLevel>,
    pub critical_resources: Vec<String>,
    pub waiting: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringReport {
    pub timestamp: DateTime<Utc>,
    pub health_score: f64,
    pub performance: PerformanceMetrics,
    pub resource_health: ResourceHealth,
    pub circuit_breaker: CircuitBreakerStatus,
    pub dependency_graph: GraphValidation,
    pub alerts: Vec<Alert>,
    pub system_status: SystemStatus,
    pub recommendations: Vec<String>,
}

impl MonitoringReport {
    pub fn build(
        counts: &ExecutionCounts,
        utilization: &ResourceUtilization,
        circuit_breaker: CircuitBreakerStatus,
        dependency_graph: GraphValidation,
    ) -> Self {
        let health_score = health_score(counts);
        let performance = performance_metrics(counts);
        let resource_health = resource_health(utilization);
        let alerts = alerts(health_score, &performance, &resource_health, &circuit_breaker);
        let system_status = system_status(health_score, &alerts);
        let recommendations = recommendations(&alerts);

        Self {
            timestamp: Utc::now(),
            health_score,
            performance,
            resource_health,
            circuit_breaker,
            dependency_graph,
            alerts,
            system_status,
            recommendations,
        }
    }
}

/// Completion earns up to 100, active work counts half, failures cost 50 and
/// blocked items 30 per unit share of the run. Clamped to 0-100; an empty run
/// is fully healthy.
pub fn health_score(counts: &ExecutionCounts) -> f64 {
    if counts.total == 0 {
        return 100.0;
    }
    let total = counts.total as f64;
    let progress = (counts.completed as f64 + 0.5 * (counts.running + counts.pending) as f64) / total;
    let failure_penalty = counts.failed as f64 / total * 50.0;
    let blocking_penalty = counts.blocked as f64 / total * 30.0;

    (progress * 100.0 - failure_penalty - blocking_penalty).clamp(0.0, 100.0)
}

pub fn rate_performance(average_seconds: f64, throughput_per_minute: f64) -> PerformanceRating {
    if average_seconds < 30.0 && throughput_per_minute > 2.0 {
        PerformanceRating::Excellent
    } else if average_seconds < 60.0 && throughput_per_minute > 1.0 {
        PerformanceRating::Good
    } else if average_seconds < 120.0 && throughput_per_minute > 0.5 {
        PerformanceRating::Fair
    } else {
        PerformanceRating::NeedsImprovement
    }
}

fn performance_metrics(counts: &ExecutionCounts) -> PerformanceMetrics {
    let completed = counts.completed as f64;
    let average = if counts.completed > 0 {
        counts.total_execution_seconds / completed
    } else {
        0.0
    };
    // Sub-millisecond runs would otherwise report infinite throughput
    let minutes = (counts.total_execution_seconds / 60.0).max(1e-3 / 60.0);
    let throughput = if counts.completed > 0 { completed / minutes } else { 0.0 };
    let efficiency_ratio = if counts.total > 0 {
        completed / counts.total as f64
    } else {
        0.0
    };

    PerformanceMetrics {
        average_execution_seconds: average,
        throughput_per_minute: throughput,
        total_execution_seconds: counts.total_execution_seconds,
        efficiency_ratio,
        rating: rate_performance(average, throughput),
    }
}

fn resource_health(utilization: &ResourceUtilization) -> ResourceHealth {
    let mut stress_levels = BTreeMap::new();
    let mut critical_resources = Vec::new();
    for (kind, pool) in &utilization.pools {
        let level = StressLevel::from_utilization(pool.utilization_percent);
        if level == StressLevel::Critical {
            critical_resources.push(kind.to_string());
        }
        stress_levels.insert(kind.to_string(), level);
    }
    ResourceHealth {
        stress_levels,
        critical_resources,
        waiting: utilization.waiting,
    }
}

fn alerts(
    health_score: f64,
    performance: &PerformanceMetrics,
    resources: &ResourceHealth,
    circuit_breaker: &CircuitBreakerStatus,
) -> Vec<Alert> {
    let mut alerts = Vec::new();

    if health_score < 50.0 {
        alerts.push(Alert {
            level: AlertLevel::Critical,
            category: AlertCategory::Health,
            message: format!("System health critically low: {health_score:.1}/100"),
            recommendation: "Immediate investigation required".into(),
        });
    } else if health_score < 75.0 {
        alerts.push(Alert {
            level: AlertLevel::Warning,
            category: AlertCategory::Health,
            message: format!("System health degraded: {health_score:.1}/100"),
            recommendation: "Monitor closely and investigate issues".into(),
        });
    }

    if performance.rating == PerformanceRating::NeedsImprovement && performance.efficiency_ratio > 0.0
    {
        alerts.push(Alert {
            level: AlertLevel::Warning,
            category: AlertCategory::Performance,
            message: "Performance rating: NEEDS_IMPROVEMENT".into(),
            recommendation: "Optimize task execution and resource allocation".into(),
        });
    }

    if !resources.critical_resources.is_empty() {
        alerts.push(Alert {
            level: AlertLevel::Critical,
            category: AlertCategory::Resources,
            message: format!(
                "Critical resource utilization: {}",
                resources.critical_resources.join(", ")
            ),
            recommendation: "Scale resources or redistribute load immediately".into(),
        });
    }

    match circuit_breaker.state {
        CircuitState::Open => alerts.push(Alert {
            level: AlertLevel::Critical,
            category: AlertCategory::CircuitBreaker,
            message: format!("Circuit breaker {} is OPEN", circuit_breaker.name),
            recommendation: "Investigate root cause before resetting".into(),
        }),
        CircuitState::HalfOpen => alerts.push(Alert {
            level: AlertLevel::Warning,
            category: AlertCategory::CircuitBreaker,
            message: format!("Circuit breaker {} testing recovery", circuit_breaker.name),
            recommendation: "Monitor system recovery progress".into(),
        }),
        CircuitState::Closed => {}
    }

    alerts
}

fn system_status(health_score: f64, alerts: &[Alert]) -> SystemStatus {
    if alerts.iter().any(|alert| alert.level == AlertLevel::Critical) {
        SystemStatus::Critical
    } else if health_score < 50.0 {
        SystemStatus::Degraded
    } else if health_score < 75.0 {
        SystemStatus::Warning
    } else {
        SystemStatus::Healthy
    }
}

fn recommendations(alerts: &[Alert]) -> Vec<String> {
    let mut recommendations: Vec<&str> = Vec::new();
    let has = |category: AlertCategory| alerts.iter().any(|alert| alert.category == category);

    if has(AlertCategory::Health) {
        recommendations.push("Review task failure patterns and error handling");
        recommendations.push("Check dependency graph for circular dependencies");
    }
    if has(AlertCategory::Performance) {
        recommendations.push("Implement task parallelization where possible");
        recommendations.push("Consider increasing concurrent task limits");
    }
    if has(AlertCategory::Resources) {
        recommendations.push("Scale up resource capacity or redistribute tasks");
        recommendations.push("Review task resource requirements");
    }
    if has(AlertCategory::CircuitBreaker) {
        recommendations.push("Investigate and resolve root cause failures");
        recommendations.push("Consider implementing service degradation strategies");
    }
    if recommendations.is_empty() {
        recommendations.push("System operating normally - continue monitoring");
    }
    recommendations.into_iter().map(str::to_string).collect()
}
