use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Result, bail};
use bench_front::catalog::{Catalog, CatalogQuery, SortOrder};
use bench_front::cleanup::CleanupPlan;
use bench_front::cms::{CmsPublisher, CmsSettings};
use bench_front::convert::Converter;
use bench_front::pipeline::{Orchestrator, PipelineConfig, RunOutcome, Stage};
use bench_front::product::{CandidateSet, Product, SelectionWindow};
use bench_front::publish::PublishSettings;
use bench_front::selector::{IndexSource, SeededSource};
use bench_front::storage::ObjectStore;
use bench_front::StageError;
use chrono::{TimeZone, Utc};
use tempfile::{TempDir, tempdir};

const MB: u64 = 1024 * 1024;

struct FixedCatalog(CandidateSet);

impl Catalog for FixedCatalog {
    fn search(&self, _query: &CatalogQuery) -> Result<CandidateSet, StageError> {
        Ok(self.0.clone())
    }
}

struct DownCatalog;

impl Catalog for DownCatalog {
    fn search(&self, _query: &CatalogQuery) -> Result<CandidateSet, StageError> {
        Err(StageError::CatalogUnavailable("connection refused".into()))
    }
}

/// Writes `<title>.png` into the output directory.
struct FakeConverter;

impl Converter for FakeConverter {
    fn convert(&self, product: &Product, output_dir: &Path) -> Result<PathBuf, StageError> {
        let stem = product.title.split('.').next().unwrap_or("artifact");
        let artifact = output_dir.join(format!("{stem}.png"));
        fs::write(&artifact, b"png").map_err(|err| StageError::Conversion(err.to_string()))?;
        Ok(artifact)
    }
}

struct CrashingConverter;

impl Converter for CrashingConverter {
    fn convert(&self, _product: &Product, _output_dir: &Path) -> Result<PathBuf, StageError> {
        Err(StageError::Conversion("pconvert exited with exit status: 1".into()))
    }
}

#[derive(Clone, Default)]
struct RecordingStore {
    puts: Rc<RefCell<Vec<(String, String)>>>,
    reject_key: Option<String>,
}

impl RecordingStore {
    fn rejecting(key: &str) -> Self {
        Self {
            reject_key: Some(key.to_string()),
            ..Self::default()
        }
    }

    fn keys(&self) -> Vec<String> {
        self.puts.borrow().iter().map(|(key, _)| key.clone()).collect()
    }

    fn body(&self, key: &str) -> Option<String> {
        self.puts
            .borrow()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, body)| body.clone())
    }
}

impl ObjectStore for RecordingStore {
    fn put_file(&self, key: &str, path: &Path) -> Result<()> {
        if self.reject_key.as_deref() == Some(key) {
            bail!("403 Forbidden");
        }
        let body = fs::read_to_string(path).unwrap_or_default();
        self.puts.borrow_mut().push((key.to_string(), body));
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("https://eocloud.example/swift/v1/front-office-sample/{key}")
    }
}

struct FixedIndex(usize);

impl IndexSource for FixedIndex {
    fn pick_index(&mut self, _len: usize) -> usize {
        self.0
    }
}

fn product(title: &str, size_bytes: u64) -> Product {
    Product {
        title: title.to_string(),
        identifier: format!("/eodata/Sentinel-2/MSI/L1C/{title}"),
        size_bytes,
        start_date: Utc.with_ymd_and_hms(2019, 1, 3, 11, 4, 19).unwrap(),
        cloud_cover: 7.25,
        keywords: vec!["Spain".into(), "Europe".into()],
    }
}

fn scenario_products() -> CandidateSet {
    vec![
        product("S2A_MSIL1C_500.SAFE", 500 * MB),
        product("S2B_MSIL1C_800.SAFE", 800 * MB),
        product("S2A_MSIL1C_1100.SAFE", 1100 * MB),
    ]
}

fn pipeline_config(root: &TempDir) -> PipelineConfig {
    let work_dir = root.path().join("work");
    fs::create_dir_all(&work_dir).unwrap();
    PipelineConfig {
        work_dir: work_dir.clone(),
        query: CatalogQuery {
            endpoint: "https://finder.example/search.json".into(),
            max_records: 2000,
            published_after: Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap(),
            max_cloud_cover: 20.0,
            processing_level: "LEVELL1C".into(),
            dataset: "ESA-DATASET".into(),
            sort_param: "startDate".into(),
            sort_order: SortOrder::Descending,
        },
        window: SelectionWindow::new(700 * MB, 1000 * MB).unwrap(),
        publish: PublishSettings {
            key_prefix: "png/".into(),
            results_file: root.path().join("www").join("results.out"),
            results_key: "png/results.out".into(),
        },
        cleanup: CleanupPlan {
            work_dir,
            product_prefix: "S2".into(),
            keep: Vec::new(),
            cache_globs: Vec::new(),
        },
    }
}

fn orchestrator(
    root: &TempDir,
    catalog: Box<dyn Catalog>,
    converter: Box<dyn Converter>,
    store: RecordingStore,
    picker: Box<dyn IndexSource>,
) -> Orchestrator {
    Orchestrator::new(
        pipeline_config(root),
        catalog,
        converter,
        Box::new(store),
        picker,
    )
}

#[test]
fn successful_run_reports_every_stage_in_order() {
    let temp = tempdir().unwrap();
    let store = RecordingStore::default();
    let mut orchestrator = orchestrator(
        &temp,
        Box::new(FixedCatalog(scenario_products())),
        Box::new(FakeConverter),
        store.clone(),
        Box::new(FixedIndex(0)),
    );

    let report = orchestrator.run();

    assert_eq!(
        report.stages.stage_names(),
        vec!["Query", "Select", "Convert", "Upload", "PublishKPI"]
    );
    assert!(report.stages.entries().iter().all(|e| e.seconds >= 0.0));
    let longest = report.stages.longest().unwrap();
    assert!(report.total_seconds >= longest.seconds);

    match &report.outcome {
        RunOutcome::Success {
            artifact,
            artifact_url,
            product,
            kpi,
            total,
        } => {
            assert_eq!(product.size_bytes, 800 * MB);
            assert_eq!(
                artifact.file_name().unwrap().to_string_lossy(),
                "S2B_MSIL1C_800.png"
            );
            assert_eq!(
                artifact_url,
                "https://eocloud.example/swift/v1/front-office-sample/png/S2B_MSIL1C_800.png"
            );
            assert_eq!(kpi.product_path, product.identifier);
            assert!(total.as_secs_f64() >= longest.seconds);
        }
        RunOutcome::Failed { stage, error } => panic!("run failed at {stage}: {error}"),
    }

    assert_eq!(
        store.keys(),
        vec!["png/S2B_MSIL1C_800.png", "png/results.out"]
    );
    let kpi_body = store.body("png/results.out").unwrap();
    let lines: Vec<&str> = kpi_body.lines().collect();
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[2], "0");
    assert_eq!(lines[3], "/eodata/Sentinel-2/MSI/L1C/S2B_MSIL1C_800.SAFE");
    assert!(lines[4].ends_with("png/S2B_MSIL1C_800.png"));
    assert!(lines[1].parse::<f64>().unwrap() >= 0.0);

    let results_file = temp.path().join("www").join("results.out");
    assert_eq!(fs::read_to_string(results_file).unwrap(), kpi_body);

    // main timer, five stage timers, cleanup timer
    assert_eq!(report.timers_created, 7);
}

#[test]
fn empty_catalog_fails_at_select_and_still_cleans_up() {
    let temp = tempdir().unwrap();
    let store = RecordingStore::default();
    let mut orchestrator = orchestrator(
        &temp,
        Box::new(FixedCatalog(Vec::new())),
        Box::new(FakeConverter),
        store.clone(),
        Box::new(FixedIndex(0)),
    );
    let leftover = temp.path().join("work").join("S2A_LEFTOVER.SAFE");
    fs::create_dir_all(leftover.join("nested")).unwrap();

    let report = orchestrator.run();

    match &report.outcome {
        RunOutcome::Failed { stage, error } => {
            assert_eq!(*stage, Stage::Select);
            assert!(matches!(error, StageError::NoEligibleProduct { .. }));
        }
        RunOutcome::Success { .. } => panic!("expected failure"),
    }
    assert_eq!(report.stages.stage_names(), vec!["Query", "Select"]);
    assert!(store.keys().is_empty());
    assert!(!leftover.exists());
    assert_eq!(report.cleanup.removed, vec![leftover]);
}

#[test]
fn converter_failure_stops_before_upload() {
    let temp = tempdir().unwrap();
    let store = RecordingStore::default();
    let mut orchestrator = orchestrator(
        &temp,
        Box::new(FixedCatalog(scenario_products())),
        Box::new(CrashingConverter),
        store.clone(),
        Box::new(FixedIndex(0)),
    );

    let report = orchestrator.run();

    assert_eq!(report.outcome.failed_stage(), Some(Stage::Convert));
    assert!(matches!(
        report.outcome,
        RunOutcome::Failed {
            error: StageError::Conversion(_),
            ..
        }
    ));
    assert_eq!(
        report.stages.stage_names(),
        vec!["Query", "Select", "Convert"]
    );
    assert!(store.keys().is_empty());
    // the product's output directory was created, then removed by cleanup
    assert!(!temp.path().join("work").join("S2B_MSIL1C_800.SAFE").exists());
}

#[test]
fn catalog_outage_fails_at_query() {
    let temp = tempdir().unwrap();
    let mut orchestrator = orchestrator(
        &temp,
        Box::new(DownCatalog),
        Box::new(FakeConverter),
        RecordingStore::default(),
        Box::new(FixedIndex(0)),
    );

    let report = orchestrator.run();

    assert_eq!(report.outcome.failed_stage(), Some(Stage::Query));
    assert_eq!(report.stages.stage_names(), vec!["Query"]);
}

#[test]
fn existing_output_directory_fails_convert() {
    let temp = tempdir().unwrap();
    let mut orchestrator = orchestrator(
        &temp,
        Box::new(FixedCatalog(scenario_products())),
        Box::new(FakeConverter),
        RecordingStore::default(),
        Box::new(FixedIndex(0)),
    );
    fs::create_dir_all(temp.path().join("work").join("S2B_MSIL1C_800.SAFE")).unwrap();

    let report = orchestrator.run();

    assert!(matches!(
        report.outcome,
        RunOutcome::Failed {
            stage: Stage::Convert,
            error: StageError::DirectoryCreate { .. }
        }
    ));
}

#[test]
fn kpi_failure_keeps_artifact_upload() {
    let temp = tempdir().unwrap();
    let store = RecordingStore::rejecting("png/results.out");
    let mut orchestrator = orchestrator(
        &temp,
        Box::new(FixedCatalog(scenario_products())),
        Box::new(FakeConverter),
        store.clone(),
        Box::new(FixedIndex(0)),
    );

    let report = orchestrator.run();

    assert!(matches!(
        report.outcome,
        RunOutcome::Failed {
            stage: Stage::PublishKpi,
            error: StageError::KpiPublish(_)
        }
    ));
    assert_eq!(store.keys(), vec!["png/S2B_MSIL1C_800.png"]);
    assert_eq!(report.stages.len(), 5);
}

#[test]
fn rejected_artifact_upload_is_upload_error() {
    let temp = tempdir().unwrap();
    let store = RecordingStore::rejecting("png/S2B_MSIL1C_800.png");
    let mut orchestrator = orchestrator(
        &temp,
        Box::new(FixedCatalog(scenario_products())),
        Box::new(FakeConverter),
        store.clone(),
        Box::new(FixedIndex(0)),
    );

    let report = orchestrator.run();

    match &report.outcome {
        RunOutcome::Failed {
            stage: Stage::Upload,
            error: StageError::Upload { key, reason },
        } => {
            assert_eq!(key, "png/S2B_MSIL1C_800.png");
            assert!(reason.contains("403"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(store.keys().is_empty());
}

#[test]
fn cleanup_warnings_do_not_flip_success() {
    let temp = tempdir().unwrap();
    let mut config = pipeline_config(&temp);
    config.cleanup.cache_globs = vec!["[unclosed".into()];
    let mut orchestrator = Orchestrator::new(
        config,
        Box::new(FixedCatalog(scenario_products())),
        Box::new(FakeConverter),
        Box::new(RecordingStore::default()),
        Box::new(FixedIndex(0)),
    );

    let report = orchestrator.run();

    assert!(report.outcome.is_success());
    assert_eq!(report.cleanup.warnings.len(), 1);
}

#[test]
fn seeded_reruns_pick_the_same_product_and_kpi_fields() {
    let candidates: CandidateSet = (0..12)
        .map(|idx| product(&format!("S2A_MSIL1C_{idx:02}.SAFE"), (710 + idx * 20) * MB))
        .collect();

    let mut kpis = Vec::new();
    for _ in 0..2 {
        let temp = tempdir().unwrap();
        let mut orchestrator = orchestrator(
            &temp,
            Box::new(FixedCatalog(candidates.clone())),
            Box::new(FakeConverter),
            RecordingStore::default(),
            Box::new(SeededSource::new(7)),
        );
        match orchestrator.run().outcome {
            RunOutcome::Success { product, kpi, .. } => kpis.push((product, kpi)),
            RunOutcome::Failed { stage, error } => panic!("run failed at {stage}: {error}"),
        }
    }

    let (first_product, first_kpi) = &kpis[0];
    let (second_product, second_kpi) = &kpis[1];
    assert_eq!(first_product, second_product);
    assert_eq!(first_kpi.product_path, second_kpi.product_path);
    assert_eq!(first_kpi.artifact_url, second_kpi.artifact_url);
}

#[test]
fn cms_stage_publishes_numbered_page() {
    let temp = tempdir().unwrap();
    let content_root = temp.path().join("pages");
    let pages = content_root.join("02.eo_images");
    fs::create_dir_all(pages.join("3.EO_3")).unwrap();
    fs::create_dir_all(pages.join("12.EO_12")).unwrap();
    fs::create_dir_all(content_root.join("01.home")).unwrap();
    let template = temp.path().join("template.md");
    fs::write(
        &template,
        "title: EO _MAXNUM\nproduct: _PRODNAME\nimage: _PRODURL\ncloud: _CCOVERAGE\n",
    )
    .unwrap();
    let default_template = temp.path().join("template_default.md");
    fs::write(&default_template, "latest: _PRODPATH (_PRODSIZE MB)\n").unwrap();

    let cms = CmsPublisher::new(CmsSettings {
        content_root: content_root.clone(),
        pages_dir: "02.eo_images".into(),
        template,
        default_template,
        default_page: PathBuf::from("01.home/default.md"),
    });
    let mut orchestrator = orchestrator(
        &temp,
        Box::new(FixedCatalog(scenario_products())),
        Box::new(FakeConverter),
        RecordingStore::default(),
        Box::new(FixedIndex(0)),
    )
    .with_cms(cms);

    let report = orchestrator.run();

    assert!(report.outcome.is_success());
    assert_eq!(
        report.stages.stage_names(),
        vec!["Query", "Select", "Convert", "Upload", "PublishKPI", "Cms"]
    );
    let item = fs::read_to_string(pages.join("13.EO_13").join("item.md")).unwrap();
    assert_eq!(
        item,
        "title: EO 13\nproduct: S2B_MSIL1C_800.SAFE\nimage: https://eocloud.example/swift/v1/front-office-sample/png/S2B_MSIL1C_800.png\ncloud: 7.25\n"
    );
    let landing = fs::read_to_string(content_root.join("01.home").join("default.md")).unwrap();
    assert_eq!(
        landing,
        "latest: /eodata/Sentinel-2/MSI/L1C/S2B_MSIL1C_800.SAFE (800.00 MB)\n"
    );
}
