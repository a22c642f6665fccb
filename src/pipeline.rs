use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{error, info, instrument};

use crate::catalog::{Catalog, CatalogQuery};
use crate::cleanup::{CleanupPlan, CleanupSummary};
use crate::cms::CmsPublisher;
use crate::convert::{self, Converter};
use crate::error::StageError;
use crate::product::{Product, SelectionWindow};
use crate::publish::{KpiRecord, PublishSettings, Publisher};
use crate::selector::{self, IndexSource};
use crate::storage::ObjectStore;
use crate::timer::{Timer, TimerCounter};

const KPI_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Query,
    Select,
    Convert,
    Upload,
    #[serde(rename = "PublishKPI")]
    PublishKpi,
    Cms,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Query => "Query",
            Stage::Select => "Select",
            Stage::Convert => "Convert",
            Stage::Upload => "Upload",
            Stage::PublishKpi => "PublishKPI",
            Stage::Cms => "Cms",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageDuration {
    pub stage: String,
    pub seconds: f64,
}

/// Per-stage durations in the order the stages ran.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct StageReport {
    entries: Vec<StageDuration>,
}

impl StageReport {
    pub fn record(&mut self, stage: impl Into<String>, seconds: f64) {
        self.entries.push(StageDuration {
            stage: stage.into(),
            seconds,
        });
    }

    pub fn entries(&self) -> &[StageDuration] {
        &self.entries
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.stage.as_str()).collect()
    }

    pub fn get(&self, stage: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|e| e.stage == stage)
            .map(|e| e.seconds)
    }

    pub fn longest(&self) -> Option<&StageDuration> {
        self.entries
            .iter()
            .max_by(|a, b| a.seconds.total_cmp(&b.seconds))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug)]
pub struct StageFailure {
    pub stage: Stage,
    pub error: StageError,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage {} failed: {}", self.stage, self.error)
    }
}

impl std::error::Error for StageFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Success {
        artifact: PathBuf,
        artifact_url: String,
        product: Product,
        kpi: KpiRecord,
        total: Duration,
    },
    Failed {
        stage: Stage,
        error: StageError,
    },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success { .. })
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            RunOutcome::Failed { stage, .. } => Some(*stage),
            RunOutcome::Success { .. } => None,
        }
    }
}

/// Everything one pipeline run produced.
#[derive(Debug)]
pub struct RunReport {
    pub started_at: DateTime<Local>,
    pub outcome: RunOutcome,
    pub stages: StageReport,
    pub cleanup: CleanupSummary,
    pub cleanup_seconds: f64,
    pub total_seconds: f64,
    pub timers_created: u64,
}

/// Run-scoped settings handed to the orchestrator.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub work_dir: PathBuf,
    pub query: CatalogQuery,
    pub window: SelectionWindow,
    pub publish: PublishSettings,
    pub cleanup: CleanupPlan,
}

struct Completed {
    artifact: PathBuf,
    artifact_url: String,
    product: Product,
    kpi: KpiRecord,
}

pub struct Orchestrator {
    config: PipelineConfig,
    catalog: Box<dyn Catalog>,
    converter: Box<dyn Converter>,
    store: Box<dyn ObjectStore>,
    picker: Box<dyn IndexSource>,
    cms: Option<CmsPublisher>,
}

impl Orchestrator {
    pub fn new(
        config: PipelineConfig,
        catalog: Box<dyn Catalog>,
        converter: Box<dyn Converter>,
        store: Box<dyn ObjectStore>,
        picker: Box<dyn IndexSource>,
    ) -> Self {
        Self {
            config,
            catalog,
            converter,
            store,
            picker,
            cms: None,
        }
    }

    pub fn with_cms(mut self, cms: CmsPublisher) -> Self {
        self.cms = Some(cms);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs every stage in order, stopping at the first failure. Cleanup
    /// always runs afterwards and never changes the outcome.
    #[instrument(skip(self), fields(work_dir = %self.config.work_dir.display()))]
    pub fn run(&mut self) -> RunReport {
        let counter = TimerCounter::new();
        let started_at = Local::now();
        info!("START_PROCESSING");
        let mut main_timer = Timer::start(&counter);
        let mut stages = StageReport::default();

        let result = self.run_stages(&counter, &mut stages);

        info!(stage = "Cleanup", "START");
        let mut cleanup_timer = Timer::start(&counter);
        let cleanup = self.config.cleanup.run();
        cleanup_timer.stop();
        let cleanup_seconds = cleanup_timer.duration_secs().unwrap_or_default();
        info!(
            stage = "Cleanup",
            duration_s = cleanup_seconds,
            removed = cleanup.removed.len(),
            warnings = cleanup.warnings.len(),
            "STOP"
        );

        main_timer.stop();
        let total = main_timer.duration().unwrap_or_default();
        let outcome = match result {
            Ok(done) => {
                info!(
                    artifact_url = done.artifact_url.as_str(),
                    total_s = total.as_secs_f64(),
                    "Run succeeded"
                );
                RunOutcome::Success {
                    artifact: done.artifact,
                    artifact_url: done.artifact_url,
                    product: done.product,
                    kpi: done.kpi,
                    total,
                }
            }
            Err(failure) => {
                error!(
                    stage = failure.stage.name(),
                    kind = failure.error.kind(),
                    error = %failure.error,
                    total_s = total.as_secs_f64(),
                    "Run failed"
                );
                RunOutcome::Failed {
                    stage: failure.stage,
                    error: failure.error,
                }
            }
        };

        RunReport {
            started_at,
            outcome,
            stages,
            cleanup,
            cleanup_seconds,
            total_seconds: total.as_secs_f64(),
            timers_created: counter.count(),
        }
    }

    fn run_stages(
        &mut self,
        counter: &TimerCounter,
        report: &mut StageReport,
    ) -> Result<Completed, StageFailure> {
        let candidates = timed(counter, report, Stage::Query, || {
            search(self.catalog.as_ref(), &self.config.query)
        })?;

        let window = self.config.window;
        let picker = self.picker.as_mut();
        let product = timed(counter, report, Stage::Select, || {
            selector::select(&candidates, &window, picker)
        })?;

        let work_dir = &self.config.work_dir;
        let converter = self.converter.as_ref();
        let artifact = timed(counter, report, Stage::Convert, || {
            let output_dir = convert::prepare_output_dir(work_dir, product)?;
            converter.convert(product, &output_dir)
        })?;
        let convert_seconds = report.get(Stage::Convert.name()).unwrap_or_default();

        let publisher = Publisher::new(self.store.as_ref(), &self.config.publish);
        let artifact_url = timed(counter, report, Stage::Upload, || {
            publisher.upload_artifact(&artifact)
        })?;

        let now = Local::now().format(KPI_TIMESTAMP_FORMAT).to_string();
        let kpi = KpiRecord {
            timestamp: now.clone(),
            duration_secs: convert_seconds,
            product_path: product.identifier.clone(),
            artifact_url: artifact_url.clone(),
        };
        timed(counter, report, Stage::PublishKpi, || publisher.publish_kpi(&kpi))?;

        if let Some(cms) = &self.cms {
            let page = timed(counter, report, Stage::Cms, || {
                cms.publish(&now, product, &artifact_url, convert_seconds)
            })?;
            info!(page = %page.display(), "CMS page published");
        }

        Ok(Completed {
            artifact,
            artifact_url,
            product: product.clone(),
            kpi,
        })
    }
}

/// Outcome of a query-and-select run that stops before conversion.
#[derive(Debug)]
pub struct Preview {
    pub stages: StageReport,
    pub eligible: usize,
    pub result: Result<Product, StageFailure>,
}

pub fn preview(
    catalog: &dyn Catalog,
    query: &CatalogQuery,
    window: &SelectionWindow,
    picker: &mut dyn IndexSource,
) -> Preview {
    let counter = TimerCounter::new();
    let mut stages = StageReport::default();
    let mut eligible = 0;
    let result = timed(&counter, &mut stages, Stage::Query, || search(catalog, query))
        .and_then(|candidates| {
            eligible = selector::eligible(&candidates, window).len();
            timed(&counter, &mut stages, Stage::Select, || {
                selector::select(&candidates, window, picker).cloned()
            })
        });
    Preview {
        stages,
        eligible,
        result,
    }
}

fn search(catalog: &dyn Catalog, query: &CatalogQuery) -> Result<Vec<Product>, StageError> {
    let candidates = catalog.search(query)?;
    info!(found = candidates.len(), "Catalog returned candidates");
    Ok(candidates)
}

/// Runs one stage under its own timer and appends its duration to the
/// report whether or not the stage succeeded.
fn timed<T>(
    counter: &TimerCounter,
    report: &mut StageReport,
    stage: Stage,
    body: impl FnOnce() -> Result<T, StageError>,
) -> Result<T, StageFailure> {
    let span = tracing::span!(tracing::Level::INFO, "stage", stage = stage.name());
    let _guard = span.enter();
    info!(stage = stage.name(), "START");

    let mut timer = Timer::start(counter);
    let result = body();
    timer.stop();
    let seconds = timer.duration_secs().unwrap_or_default();
    report.record(stage.name(), seconds);

    match result {
        Ok(value) => {
            info!(stage = stage.name(), duration_s = seconds, "STOP");
            Ok(value)
        }
        Err(error) => {
            error!(
                stage = stage.name(),
                duration_s = seconds,
                kind = error.kind(),
                error = %error,
                "STOP with error"
            );
            Err(StageFailure { stage, error })
        }
    }
}
