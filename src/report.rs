//! Per-collection mismatch logs.
//!
//! Every non-matching outcome becomes one JSON line in
//! `<collection>_mismatches.jsonl` under the configured output directory. The
//! file is truncated at the start of each run so it always reflects the most
//! recent comparison.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use compare_core::{DiffOutcome, DifferenceEntry};
use serde_json::json;

/// Replace path-hostile characters so a collection name is safe as a file
/// name component.
pub fn sanitize_collection_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub fn mismatch_log_path(output_dir: &Path, collection: &str) -> PathBuf {
    output_dir.join(format!(
        "{}_mismatches.jsonl",
        sanitize_collection_name(collection)
    ))
}

pub struct MismatchLog {
    writer: BufWriter<File>,
    path: PathBuf,
    business_key_field: String,
    records: u64,
}

impl MismatchLog {
    /// Create (truncating) the log for one collection run.
    pub fn create(
        output_dir: &Path,
        collection: &str,
        business_key_field: &str,
    ) -> anyhow::Result<MismatchLog> {
        std::fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create output directory {output_dir:?}"))?;
        let path = mismatch_log_path(output_dir, collection);
        let file = File::create(&path)
            .with_context(|| format!("Failed to create mismatch log {path:?}"))?;
        Ok(MismatchLog {
            writer: BufWriter::new(file),
            path,
            business_key_field: business_key_field.to_string(),
            records: 0,
        })
    }

    pub fn append(&mut self, outcome: &DiffOutcome) -> anyhow::Result<()> {
        let record = json!({
            "ts": Utc::now().to_rfc3339(),
            "business_key": self.business_key_field,
            "business_key_value": outcome.key.to_json(),
            "status": outcome.status.as_str(),
            "error": outcome.error,
            "differences": outcome
                .differences
                .iter()
                .map(DifferenceEntry::to_json)
                .collect::<Vec<_>>(),
            "source": outcome.source.as_ref().map(|v| v.to_json()),
            "target": outcome.target.as_ref().map(|v| v.to_json()),
        });
        serde_json::to_writer(&mut self.writer, &record)
            .with_context(|| format!("Failed to write mismatch record to {:?}", self.path))?;
        self.writer.write_all(b"\n")?;
        self.records += 1;
        Ok(())
    }

    /// Flush and report how many records were written.
    pub fn finish(mut self) -> anyhow::Result<u64> {
        self.writer
            .flush()
            .with_context(|| format!("Failed to flush mismatch log {:?}", self.path))?;
        if self.records > 0 {
            tracing::info!("Wrote {} mismatch records to {:?}", self.records, self.path);
        }
        Ok(self.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compare_core::BusinessKey;

    #[test]
    fn hostile_names_are_sanitized() {
        assert_eq!(sanitize_collection_name("orders"), "orders");
        assert_eq!(sanitize_collection_name("a/b c.d"), "a_b_c_d");
        assert_eq!(sanitize_collection_name("Видео"), "_____");
    }

    #[test]
    fn log_path_uses_sanitized_name() {
        let path = mismatch_log_path(Path::new("/tmp/out"), "a/b");
        assert_eq!(path, PathBuf::from("/tmp/out/a_b_mismatches.jsonl"));
    }

    #[test]
    fn records_are_one_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = MismatchLog::create(dir.path(), "orders", "order_id").unwrap();
        let outcome = DiffOutcome::from_differences(
            BusinessKey::Int(7),
            Some(compare_core::DocumentValue::Int(1)),
            None,
            compare_core::diff(Some(&compare_core::DocumentValue::Int(1)), None, &Default::default()),
        );
        log.append(&outcome).unwrap();
        let written = log.finish().unwrap();
        assert_eq!(written, 1);

        let contents =
            std::fs::read_to_string(mismatch_log_path(dir.path(), "orders")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 1);
        let record: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(record["business_key"], "order_id");
        assert_eq!(record["business_key_value"], 7);
        assert_eq!(record["status"], "target_missing");
    }
}
