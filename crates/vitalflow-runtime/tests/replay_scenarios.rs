//! End-to-end replay scenarios through the public pipeline API.
//!
//! Each test assembles a full pipeline (source, loader, shards, joiner,
//! enrichment, sink) and replays a bounded pointer stream, then checks the
//! published summaries against totals recomputed from the input itself.

use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;
use vitalflow_core::{
    BiometricRecord, FilePointer, JoinedSummary, PipelineConfig, StepsSummary,
};
use vitalflow_runtime::enrichment::StaticRecommender;
use vitalflow_runtime::generator::{generate, GeneratorConfig};
use vitalflow_runtime::pipeline::{Pipeline, PipelineReport};
use vitalflow_runtime::sink::CollectingSink;
use vitalflow_runtime::source::{DirLoader, FileSource, MemoryLoader, MemorySource};

/// Replay config: a huge watermark interval keeps wall-clock reductions out
/// of the run, so firing comes only from the end-of-input advance and the
/// outcome is a pure function of the data.
fn replay_config(partitions: usize) -> PipelineConfig {
    PipelineConfig {
        partitions,
        watermark_interval_ms: 3_600_000,
        ..Default::default()
    }
}

fn pointer_line(account: &str, event_time: &str, file: &str) -> String {
    serde_json::to_string(&FilePointer {
        account_id: account.into(),
        event_time: event_time.into(),
        bucket_name: "biometrics".into(),
        folder_name: "2023-11-14".into(),
        file_name: file.into(),
    })
    .unwrap()
}

/// Three accounts whose streams all end at t=2000, so the set of completed
/// windows is the same no matter how accounts land on shards.
fn mixed_accounts_loader() -> MemoryLoader {
    MemoryLoader::new()
        .with_batch(
            "ada.jsonl",
            vec![
                BiometricRecord::new("ada", 0, 100, 100.0),
                BiometricRecord::new("ada", 600, 50, 110.0),
                BiometricRecord::new("ada", 2000, 10, 99.0),
            ],
        )
        .with_batch(
            "bee.jsonl",
            vec![
                BiometricRecord::new("bee", 100, 300, 140.0),
                BiometricRecord::new("bee", 900, 200, 150.0),
                BiometricRecord::new("bee", 2000, 20, 101.0),
            ],
        )
        .with_batch(
            "cal.jsonl",
            vec![
                BiometricRecord::new("cal", 250, 700, 80.0),
                BiometricRecord::new("cal", 1500, 400, 90.0),
                BiometricRecord::new("cal", 2000, 30, 77.0),
            ],
        )
}

fn mixed_accounts_source() -> MemorySource {
    MemorySource::new(vec![
        pointer_line("ada", "1970-01-01T00:33:20Z", "ada.jsonl"),
        pointer_line("bee", "1970-01-01T00:33:20Z", "bee.jsonl"),
        pointer_line("cal", "1970-01-01T00:33:20Z", "cal.jsonl"),
    ])
}

async fn run_mixed_accounts(partitions: usize) -> (PipelineReport, CollectingSink) {
    let sink = CollectingSink::new();
    let pipeline = Pipeline::new(
        replay_config(partitions),
        Box::new(mixed_accounts_source()),
        Arc::new(mixed_accounts_loader()),
        Arc::new(StaticRecommender),
        Arc::new(sink.clone()),
    )
    .unwrap();
    let report = pipeline.run().await.unwrap();
    (report, sink)
}

fn sorted_steps(mut rows: Vec<StepsSummary>) -> Vec<(String, i64)> {
    rows.sort_by(|a, b| {
        (a.account.as_ref(), a.total_steps).cmp(&(b.account.as_ref(), b.total_steps))
    });
    rows.into_iter()
        .map(|s| (s.account.to_string(), s.total_steps))
        .collect()
}

fn sorted_joined(mut rows: Vec<JoinedSummary>) -> Vec<(String, i64, u64)> {
    rows.sort_by_key(|j| {
        (
            j.account.to_string(),
            j.total_steps,
            j.avg_glucose.to_bits(),
        )
    });
    rows.into_iter()
        .map(|j| (j.account.to_string(), j.total_steps, j.avg_glucose.to_bits()))
        .collect()
}

// =============================================================================
// Generated-corpus replay: files on disk, pointer log, full pipeline
// =============================================================================

#[tokio::test]
async fn test_generated_corpus_replay() {
    let dir = TempDir::new().unwrap();
    let gen_config = GeneratorConfig::default();
    let set = generate(&gen_config, dir.path()).unwrap();

    let sink = CollectingSink::new();
    let pipeline = Pipeline::new(
        replay_config(4),
        Box::new(FileSource::new(&set.pointer_file)),
        Arc::new(DirLoader::new(dir.path())),
        Arc::new(StaticRecommender),
        Arc::new(sink.clone()),
    )
    .unwrap();
    let report = pipeline.run().await.unwrap();

    assert_eq!(report.pointers, set.pointers as u64);
    assert_eq!(report.records, set.records as u64);
    assert_eq!(report.malformed_pointers, 0);
    assert_eq!(report.malformed_records, 0);
    assert_eq!(report.load_failures, 0);

    // The generated stream starts at 1_700_000_000 and runs in 60s steps for
    // 40 records per account, ending at 1_700_002_340. Aligned windows whose
    // end is past that never complete, which cuts off everything from the
    // slot starting at 1_700_002_200 onwards.
    let cutoff = 1_700_002_200i64;

    // Recompute per-account step totals for the completed range straight
    // from the files the pipeline read.
    let mut expected: HashMap<String, i64> = HashMap::new();
    let pointer_text = std::fs::read_to_string(&set.pointer_file).unwrap();
    for line in pointer_text.lines() {
        let pointer: FilePointer = serde_json::from_str(line).unwrap();
        let body = std::fs::read_to_string(
            dir.path()
                .join(&pointer.bucket_name)
                .join(&pointer.folder_name)
                .join(&pointer.file_name),
        )
        .unwrap();
        for record_line in body.lines() {
            let record: BiometricRecord = serde_json::from_str(record_line).unwrap();
            if record.time < cutoff {
                *expected.entry(record.account.to_string()).or_default() += record.steps_count;
            }
        }
    }
    assert_eq!(expected.len(), gen_config.accounts);

    // Long stream: four completed 600s windows per account.
    let steps = sink.steps().await;
    assert_eq!(report.steps_published, (gen_config.accounts * 4) as u64);
    let mut long_totals: HashMap<String, i64> = HashMap::new();
    for summary in &steps {
        *long_totals.entry(summary.account.to_string()).or_default() += summary.total_steps;
    }
    assert_eq!(long_totals, expected, "long-stream totals drifted from input");

    // Joined grid: eight completed 300s slots per account, every slot has
    // both sides, so nothing is published partial.
    let joined = sink.joined().await;
    assert_eq!(report.joined_published, (gen_config.accounts * 8) as u64);
    assert_eq!(report.partial_joins, 0);
    let mut joined_totals: HashMap<String, i64> = HashMap::new();
    for row in &joined {
        assert!(
            !row.recommendation.is_empty(),
            "every published row should carry a recommendation"
        );
        assert!(
            (70.0..180.0).contains(&row.avg_glucose),
            "glucose mean must stay inside the generated range"
        );
        *joined_totals.entry(row.account.to_string()).or_default() += row.total_steps;
    }
    assert_eq!(
        joined_totals, expected,
        "joined step totals drifted from the long stream"
    );
}

// =============================================================================
// Partitioning must not change what gets published
// =============================================================================

#[tokio::test]
async fn test_shard_count_does_not_change_output() {
    let (report_one, sink_one) = run_mixed_accounts(1).await;
    let (report_three, sink_three) = run_mixed_accounts(3).await;

    assert_eq!(report_one.steps_published, report_three.steps_published);
    assert_eq!(report_one.joined_published, report_three.joined_published);
    assert_eq!(report_one.partial_joins, report_three.partial_joins);

    assert_eq!(
        sorted_steps(sink_one.steps().await),
        sorted_steps(sink_three.steps().await)
    );
    assert_eq!(
        sorted_joined(sink_one.joined().await),
        sorted_joined(sink_three.joined().await)
    );
}

#[tokio::test]
async fn test_mixed_accounts_exact_rows() {
    let (report, sink) = run_mixed_accounts(1).await;

    // Completed long windows: ada [0,600)=100 and [600,1200)=50, bee
    // [0,600)=300 and [600,1200)=200, cal [0,600)=700 and [1200,1800)=400.
    // The trailing t=2000 records sit in windows that never complete.
    assert_eq!(report.steps_published, 6);
    assert_eq!(
        sorted_steps(sink.steps().await),
        vec![
            ("ada".to_string(), 50),
            ("ada".to_string(), 100),
            ("bee".to_string(), 200),
            ("bee".to_string(), 300),
            ("cal".to_string(), 400),
            ("cal".to_string(), 700),
        ]
    );

    // Joined: two complete slots per account, plus the glucose-only slots
    // from the sliding window overlap going out as partial rows.
    assert_eq!(report.joined_published, 15);
    assert_eq!(report.partial_joins, 9);

    let joined = sink.joined().await;
    let complete: Vec<_> = joined.iter().filter(|j| j.total_steps > 0).collect();
    assert_eq!(complete.len(), 6);
    let find = |account: &str, steps: i64| {
        complete
            .iter()
            .find(|j| j.account.as_ref() == account && j.total_steps == steps)
            .unwrap_or_else(|| panic!("missing complete row {account}/{steps}"))
    };
    assert!((find("ada", 100).avg_glucose - 100.0).abs() < 1e-9);
    assert!((find("ada", 50).avg_glucose - 105.0).abs() < 1e-9);
    assert!((find("bee", 300).avg_glucose - 140.0).abs() < 1e-9);
    assert!((find("bee", 200).avg_glucose - 150.0).abs() < 1e-9);
    assert!((find("cal", 700).avg_glucose - 80.0).abs() < 1e-9);
    assert!((find("cal", 400).avg_glucose - 90.0).abs() < 1e-9);

    // Partial rows carry the glucose mean and a zero step total.
    for row in joined.iter().filter(|j| j.total_steps == 0) {
        assert!(row.avg_glucose > 0.0);
        assert!(!row.recommendation.is_empty());
    }
}

// =============================================================================
// File sink: published summaries land on disk as JSON lines
// =============================================================================

#[tokio::test]
async fn test_file_sink_replay_round_trip() {
    use vitalflow_runtime::sink::FileSink;

    let dir = TempDir::new().unwrap();
    let steps_path = dir.path().join("steps.jsonl");
    let joined_path = dir.path().join("joined.jsonl");

    let pipeline = Pipeline::new(
        replay_config(2),
        Box::new(mixed_accounts_source()),
        Arc::new(mixed_accounts_loader()),
        Arc::new(StaticRecommender),
        Arc::new(FileSink::new("out", &steps_path, &joined_path).unwrap()),
    )
    .unwrap();
    let report = pipeline.run().await.unwrap();

    let steps_text = std::fs::read_to_string(&steps_path).unwrap();
    let steps: Vec<StepsSummary> = steps_text
        .lines()
        .map(|l| serde_json::from_str(l).expect("steps line decodes"))
        .collect();
    assert_eq!(steps.len() as u64, report.steps_published);

    let joined_text = std::fs::read_to_string(&joined_path).unwrap();
    let joined: Vec<JoinedSummary> = joined_text
        .lines()
        .map(|l| serde_json::from_str(l).expect("joined line decodes"))
        .collect();
    assert_eq!(joined.len() as u64, report.joined_published);
}

// =============================================================================
// Metrics: the registry reflects what the run counted
// =============================================================================

#[tokio::test]
async fn test_metrics_reflect_replay() {
    let sink = CollectingSink::new();
    let pipeline = Pipeline::new(
        replay_config(1),
        Box::new(mixed_accounts_source()),
        Arc::new(mixed_accounts_loader()),
        Arc::new(StaticRecommender),
        Arc::new(sink.clone()),
    )
    .unwrap();
    let metrics = pipeline.metrics();
    let report = pipeline.run().await.unwrap();
    assert_eq!(report.records, 9);

    let text = metrics.gather();
    assert!(text.contains("vitalflow_pointers_total 3"), "{text}");
    assert!(text.contains("vitalflow_records_total 9"), "{text}");
    assert!(
        text.contains("vitalflow_windows_fired_total{stream=\"steps_short\"}"),
        "{text}"
    );
    assert!(
        text.contains("vitalflow_windows_fired_total{stream=\"glucose\"}"),
        "{text}"
    );
    assert!(
        text.contains("vitalflow_join_emitted_total{mode=\"complete\"} 6"),
        "{text}"
    );
    assert!(
        text.contains("vitalflow_join_emitted_total{mode=\"partial\"} 9"),
        "{text}"
    );
}
