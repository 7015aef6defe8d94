//! Deterministic test-data generator.
//!
//! Writes a directory tree of record batches plus the pointer stream that
//! references them, shaped the way the production inbox lays objects out:
//! `<out>/<bucket>/<folder>/<file>` with one JSON record per line, and a
//! `pointers.jsonl` replay file next to the bucket.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use tracing::info;
use vitalflow_core::{BiometricRecord, FilePointer};

/// Shape of the generated data set.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub accounts: usize,
    pub batches_per_account: usize,
    pub records_per_batch: usize,
    /// Event time of the first record, unix seconds.
    pub start_secs: i64,
    pub record_spacing_secs: i64,
    pub bucket: String,
    pub seed: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            accounts: 3,
            batches_per_account: 4,
            records_per_batch: 10,
            start_secs: 1_700_000_000,
            record_spacing_secs: 60,
            bucket: "biometrics".to_string(),
            seed: 42,
        }
    }
}

/// What `generate` wrote and where.
#[derive(Debug)]
pub struct GeneratedSet {
    pub pointer_file: PathBuf,
    pub pointers: usize,
    pub records: usize,
}

/// Write a reproducible data set under `out_dir`.
///
/// Pointers are written account-major, so the replayed stream is mildly
/// out of order across accounts, the way a real inbox is.
pub fn generate(config: &GeneratorConfig, out_dir: &Path) -> Result<GeneratedSet> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut pointer_lines = String::new();
    let mut pointers = 0usize;
    let mut records = 0usize;

    for account_idx in 0..config.accounts {
        let account = format!("account-{:03}", account_idx + 1);
        for batch in 0..config.batches_per_account {
            let batch_start = config.start_secs
                + (batch * config.records_per_batch) as i64 * config.record_spacing_secs;
            let folder = DateTime::from_timestamp(batch_start, 0)
                .with_context(|| format!("batch start {batch_start} out of range"))?
                .format("%Y-%m-%d")
                .to_string();
            let file_name = format!("{account}-{batch:04}.jsonl");

            let dir = out_dir.join(&config.bucket).join(&folder);
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("creating {}", dir.display()))?;

            let mut body = String::new();
            let mut last_time = batch_start;
            for i in 0..config.records_per_batch {
                let time = batch_start + i as i64 * config.record_spacing_secs;
                last_time = time;
                let record = BiometricRecord::new(
                    account.as_str(),
                    time,
                    rng.gen_range(0..=200),
                    rng.gen_range(70.0..180.0),
                );
                body.push_str(&serde_json::to_string(&record)?);
                body.push('\n');
                records += 1;
            }
            std::fs::write(dir.join(&file_name), body)
                .with_context(|| format!("writing {file_name}"))?;

            let event_time = DateTime::from_timestamp(last_time, 0)
                .with_context(|| format!("batch end {last_time} out of range"))?
                .to_rfc3339_opts(SecondsFormat::Secs, true);
            let pointer = FilePointer {
                account_id: account.clone(),
                event_time,
                bucket_name: config.bucket.clone(),
                folder_name: folder,
                file_name,
            };
            pointer_lines.push_str(&serde_json::to_string(&pointer)?);
            pointer_lines.push('\n');
            pointers += 1;
        }
    }

    let pointer_file = out_dir.join("pointers.jsonl");
    std::fs::write(&pointer_file, pointer_lines)
        .with_context(|| format!("writing {}", pointer_file.display()))?;

    info!(
        pointers,
        records,
        out = %out_dir.display(),
        "generated data set"
    );
    Ok(GeneratedSet {
        pointer_file,
        pointers,
        records,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_generate_layout() {
        let dir = TempDir::new().unwrap();
        let config = GeneratorConfig::default();
        let set = generate(&config, dir.path()).unwrap();

        assert_eq!(set.pointers, 12);
        assert_eq!(set.records, 120);

        let pointer_lines: Vec<FilePointer> = std::fs::read_to_string(&set.pointer_file)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(pointer_lines.len(), 12);

        // Every referenced object exists with the right number of lines
        for pointer in &pointer_lines {
            let path = dir
                .path()
                .join(&pointer.bucket_name)
                .join(&pointer.folder_name)
                .join(&pointer.file_name);
            let body = std::fs::read_to_string(&path).unwrap();
            assert_eq!(body.lines().count(), config.records_per_batch);
        }
    }

    #[test]
    fn test_generate_is_reproducible() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let config = GeneratorConfig::default();
        generate(&config, dir_a.path()).unwrap();
        generate(&config, dir_b.path()).unwrap();

        let a = std::fs::read_to_string(dir_a.path().join("pointers.jsonl")).unwrap();
        let b = std::fs::read_to_string(dir_b.path().join("pointers.jsonl")).unwrap();
        assert_eq!(a, b);

        let pointer: FilePointer = serde_json::from_str(a.lines().next().unwrap()).unwrap();
        let rel = PathBuf::from(&pointer.bucket_name)
            .join(&pointer.folder_name)
            .join(&pointer.file_name);
        let batch_a = std::fs::read_to_string(dir_a.path().join(&rel)).unwrap();
        let batch_b = std::fs::read_to_string(dir_b.path().join(&rel)).unwrap();
        assert_eq!(batch_a, batch_b);
    }

    #[test]
    fn test_generated_records_decode() {
        let dir = TempDir::new().unwrap();
        let config = GeneratorConfig {
            accounts: 1,
            batches_per_account: 1,
            records_per_batch: 5,
            ..Default::default()
        };
        let set = generate(&config, dir.path()).unwrap();

        let pointers = std::fs::read_to_string(&set.pointer_file).unwrap();
        let pointer: FilePointer = serde_json::from_str(pointers.lines().next().unwrap()).unwrap();
        let body = std::fs::read_to_string(
            dir.path()
                .join(&pointer.bucket_name)
                .join(&pointer.folder_name)
                .join(&pointer.file_name),
        )
        .unwrap();

        for line in body.lines() {
            let record: BiometricRecord = serde_json::from_str(line).unwrap();
            assert_eq!(record.account.as_ref(), "account-001");
            assert!(record.time >= config.start_secs);
            assert!((70.0..180.0).contains(&record.glucose_level));
            assert!((0..=200).contains(&record.steps_count));
        }
    }
}
