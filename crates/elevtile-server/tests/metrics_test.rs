//! Metrics emitted by the elevation service and written by the `elevtile` binary.

use elevtile_analytics::{RampRegistry, EMPTY_TILE};
use elevtile_raster::{Grid, MemoryTileStore, RasterError, TileAddress, TileStore};
use elevtile_server::metrics_export::InMemoryRecorder;
use elevtile_server::{ElevationService, RenderKind, ServerConfig, ServiceError};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const NODATA: f64 = -9999.0;

fn four_sample_service() -> ElevationService<MemoryTileStore> {
    let address = TileAddress::new(2, 1, 1).unwrap();
    let store = MemoryTileStore::new();
    store
        .insert(address, Grid::for_tile(&address, 2, 2, vec![1.0, 3.0, 5.0, 7.0], NODATA).unwrap())
        .unwrap();
    ElevationService::new(store, RampRegistry::shared().unwrap(), ServerConfig::default())
}

/// Store whose every read fails.
struct OfflineStore;

impl TileStore for OfflineStore {
    fn fetch(&self, address: &TileAddress) -> elevtile_raster::Result<Option<Grid>> {
        Err(RasterError::StoreUnavailable {
            z: address.zoom,
            x: address.x,
            y: address.y,
            reason: "connection refused".into(),
        })
    }
}

#[test]
fn request_outcomes_are_counted() {
    let recorder = InMemoryRecorder::new();
    let svc = four_sample_service();

    metrics::with_local_recorder(&recorder, || {
        elevtile_metrics::describe_metrics();

        svc.statistics(2, 1, 1).unwrap();
        assert!(matches!(svc.statistics(2, 0, 0), Err(ServiceError::NotFound(_))));
        assert_eq!(svc.render(RenderKind::Elevation, 2, 0, 0, None).unwrap(), EMPTY_TILE);
        assert!(matches!(
            svc.histogram(2, 1, 1, Some(0)),
            Err(ServiceError::InvalidParameter(_))
        ));
        svc.statistics_by_envelope(2, -80.0, 10.0, -10.0, 60.0).unwrap();
    });

    let requests = "elevtile.requests";
    assert_eq!(recorder.counter_value(requests, &[]), 5);
    assert_eq!(recorder.counter_value(requests, &[("operation", "statistics"), ("zoom", "2")]), 2);
    assert_eq!(recorder.counter_value(requests, &[("operation", "render.elevation")]), 1);
    assert_eq!(recorder.counter_value(requests, &[("operation", "statistics-envelope")]), 1);

    assert_eq!(
        recorder.counter_value("elevtile.requests.not_found", &[("operation", "statistics")]),
        1
    );
    assert_eq!(
        recorder.counter_value("elevtile.requests.invalid", &[("operation", "histogram")]),
        1
    );
    assert_eq!(recorder.counter_value("elevtile.requests.failed", &[]), 0);

    assert_eq!(
        recorder.counter_value("elevtile.render.placeholder", &[("operation", "render.elevation"), ("zoom", "2")]),
        1
    );

    // statistics and the envelope each read the stored tile; the miss and
    // the placeholder render each looked for an absent one
    let fetched = "elevtile.tiles.fetched";
    assert_eq!(recorder.counter_value(fetched, &[("outcome", "hit")]), 2);
    assert_eq!(recorder.counter_value(fetched, &[("outcome", "absent")]), 2);
    assert_eq!(recorder.counter_value(fetched, &[("outcome", "failed")]), 0);

    assert_eq!(recorder.histogram_count("elevtile.envelope.tiles"), 1);
    assert!(recorder.description("elevtile.requests").is_some());
    assert!(recorder.description("elevtile.tiles.fetched").is_some());
}

#[test]
fn store_failures_are_counted() {
    let recorder = InMemoryRecorder::new();
    let svc = ElevationService::new(OfflineStore, RampRegistry::shared().unwrap(), ServerConfig::default());

    metrics::with_local_recorder(&recorder, || {
        assert!(matches!(svc.statistics(3, 2, 2), Err(ServiceError::Internal(_))));
        assert!(matches!(
            svc.render(RenderKind::Elevation, 3, 2, 2, None),
            Err(ServiceError::Internal(_))
        ));
    });

    assert_eq!(recorder.counter_value("elevtile.tiles.fetched", &[("outcome", "failed")]), 2);
    assert_eq!(recorder.counter_value("elevtile.requests.failed", &[]), 2);
    assert_eq!(recorder.counter_value("elevtile.requests.not_found", &[]), 0);
    assert_eq!(recorder.counter_value("elevtile.render.placeholder", &[]), 0);
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("elevtile-metrics-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(dir.join("tiles")).unwrap();
    dir
}

/// Run the `elevtile` binary over an empty pyramid in `dir`, writing metrics
/// to `dir/metrics.json`.
fn run_elevtile(dir: &Path, args: &[&str]) -> (Output, serde_json::Value) {
    // CARGO_BIN_EXE_elevtile is set by cargo when running tests for this crate
    let binary = env!("CARGO_BIN_EXE_elevtile");
    let metrics_path = dir.join("metrics.json");

    let output = Command::new(binary)
        .current_dir(dir)
        .args(args)
        .arg("--tile-dir")
        .arg(dir.join("tiles"))
        .arg("--metrics-file")
        .arg(&metrics_path)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute elevtile binary");

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
        eprintln!("elevtile stderr:\n{}", stderr);
    }

    let text = std::fs::read_to_string(&metrics_path).expect("metrics file not written");
    let json = serde_json::from_str(&text).expect("metrics file is not JSON");
    (output, json)
}

#[test]
fn binary_writes_metrics_file() {
    let dir = scratch_dir("render");
    let out = dir.join("out.png");

    let (output, json) = run_elevtile(&dir, &["render", "5", "3", "3", "--output", out.to_str().unwrap()]);
    assert!(output.status.success());
    assert_eq!(std::fs::read(&out).unwrap(), EMPTY_TILE);

    let metrics = &json["metrics"];
    assert_eq!(metrics["elevtile.requests"]["kind"], "counter");
    assert_eq!(metrics["elevtile.requests"]["total"], 1);
    assert_eq!(metrics["elevtile.requests"]["labels"]["operation"]["render.elevation"], 1);
    assert_eq!(metrics["elevtile.render.placeholder"]["total"], 1);
    assert_eq!(metrics["elevtile.tiles.fetched"]["labels"]["outcome"]["absent"], 1);
    assert!(metrics["elevtile.requests"]["description"].is_string());

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn binary_writes_metrics_for_failed_command() {
    let dir = scratch_dir("stats");

    let (output, json) = run_elevtile(&dir, &["stats", "5", "3", "3"]);
    assert_eq!(output.status.code(), Some(3));

    let metrics = &json["metrics"];
    assert_eq!(metrics["elevtile.requests.not_found"]["total"], 1);
    assert_eq!(metrics["elevtile.requests.not_found"]["labels"]["zoom"]["5"], 1);
    assert!(metrics.get("elevtile.render.placeholder").is_none());

    std::fs::remove_dir_all(&dir).unwrap();
}
