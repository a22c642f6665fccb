use serde::Serialize;
use tracing::{info, warn};

use crate::pipeline::{RunOutcome, RunReport, StageReport};

/// Serializable view of a finished run for JSON and Prometheus exports.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_url: Option<String>,
    pub stages: StageReport,
    pub cleanup_seconds: f64,
    pub cleanup_removed: usize,
    pub cleanup_warnings: usize,
    pub total_seconds: f64,
    pub timers_created: u64,
}

impl RunSummary {
    pub fn from_report(report: &RunReport) -> Self {
        let (status, failed_stage, error_kind, error, product, artifact_url) = match &report.outcome
        {
            RunOutcome::Success {
                product,
                artifact_url,
                ..
            } => (
                "success",
                None,
                None,
                None,
                Some(product.title.clone()),
                Some(artifact_url.clone()),
            ),
            RunOutcome::Failed { stage, error } => (
                "failed",
                Some(stage.name().to_string()),
                Some(error.kind().to_string()),
                Some(error.to_string()),
                None,
                None,
            ),
        };
        Self {
            started_at: report.started_at.to_rfc3339(),
            status,
            failed_stage,
            error_kind,
            error,
            product,
            artifact_url,
            stages: report.stages.clone(),
            cleanup_seconds: report.cleanup_seconds,
            cleanup_removed: report.cleanup.removed.len(),
            cleanup_warnings: report.cleanup.warnings.len(),
            total_seconds: report.total_seconds,
            timers_created: report.timers_created,
        }
    }

    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();
        output.push_str("# HELP bench_front_run_success Whether the last run succeeded\n");
        output.push_str("# TYPE bench_front_run_success gauge\n");
        output.push_str(&format!(
            "bench_front_run_success {}\n",
            u8::from(self.status == "success")
        ));
        output.push_str("# HELP bench_front_stage_duration_seconds Stage duration in seconds\n");
        output.push_str("# TYPE bench_front_stage_duration_seconds gauge\n");
        for entry in self.stages.entries() {
            output.push_str(&format!(
                "bench_front_stage_duration_seconds{{stage=\"{}\"}} {:.6}\n",
                entry.stage, entry.seconds
            ));
        }
        output.push_str("# HELP bench_front_cleanup_duration_seconds Cleanup duration in seconds\n");
        output.push_str("# TYPE bench_front_cleanup_duration_seconds gauge\n");
        output.push_str(&format!(
            "bench_front_cleanup_duration_seconds {:.6}\n",
            self.cleanup_seconds
        ));
        output.push_str("# HELP bench_front_cleanup_warnings Cleanup warnings in the last run\n");
        output.push_str("# TYPE bench_front_cleanup_warnings gauge\n");
        output.push_str(&format!(
            "bench_front_cleanup_warnings {}\n",
            self.cleanup_warnings
        ));
        output.push_str("# HELP bench_front_run_duration_seconds Total run duration\n");
        output.push_str("# TYPE bench_front_run_duration_seconds gauge\n");
        output.push_str(&format!(
            "bench_front_run_duration_seconds {:.6}\n",
            self.total_seconds
        ));
        output
    }
}

pub fn log_report(report: &RunReport) {
    let summary = RunSummary::from_report(report);
    info!(
        status = summary.status,
        total_s = summary.total_seconds,
        stage_count = summary.stages.len(),
        timers = summary.timers_created,
        "Run metrics summary"
    );
    for entry in summary.stages.entries() {
        info!(
            stage = entry.stage.as_str(),
            duration_s = entry.seconds,
            "Stage metrics"
        );
    }
    info!(
        stage = "Cleanup",
        duration_s = summary.cleanup_seconds,
        removed = summary.cleanup_removed,
        "Stage metrics"
    );
    for warning in &report.cleanup.warnings {
        warn!("{warning}");
    }
}
