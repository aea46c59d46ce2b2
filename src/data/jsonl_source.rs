//! JSON Lines 数据源
//!
//! 按顺序串联多个 `.jsonl` 文件，每行一个 JSON 对象。
//! 读不了的文件跳过，格式错误的行计数后跳过。

use crate::data::{RecordSource, RecordVisitor};
use crate::types::Record;
use crate::{FrameError, Result};
use rayon::prelude::*;
use serde::de::IgnoredAny;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// 每批交给线程池的行数
const BATCH_LINES: usize = 4096;

/// 只逐条报告前几个格式错误
const REPORTED_MALFORMED: u64 = 10;

/// JSON Lines 数据源
#[derive(Debug, Clone)]
pub struct JsonLinesSource {
    files: Vec<PathBuf>,
    malformed: std::sync::Arc<AtomicU64>,
}

impl JsonLinesSource {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self {
            files,
            malformed: std::sync::Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// 上一次遍历中格式错误的行数
    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    fn open(path: &Path) -> Option<BufReader<File>> {
        match File::open(path) {
            Ok(file) => Some(BufReader::new(file)),
            Err(e) => {
                warn!("Skipping input {}: {}", path.display(), e);
                None
            }
        }
    }

    fn parse(&self, path: &Path, line: &str) -> Option<Record> {
        match serde_json::from_str::<Record>(line) {
            Ok(record) => Some(record),
            Err(e) => {
                let count = self.malformed.fetch_add(1, Ordering::Relaxed) + 1;
                if count <= REPORTED_MALFORMED {
                    warn!("Malformed record in {}: {}", path.display(), e);
                }
                None
            }
        }
    }

    fn dispatch(&self, path: &Path, batch: &[String], visit: RecordVisitor<'_>, dispatched: &AtomicU64) {
        batch.par_iter().for_each(|line| {
            if let Some(record) = self.parse(path, line) {
                let slot = rayon::current_thread_index().unwrap_or(0);
                visit(slot, record);
                dispatched.fetch_add(1, Ordering::Relaxed);
            }
        });
    }
}

impl RecordSource for JsonLinesSource {
    /// 只数能解析成 JSON 对象的行, 与实际分发的记录数一致
    fn total_records(&self) -> Option<u64> {
        let mut total = 0;
        for path in &self.files {
            let reader = File::open(path).ok().map(BufReader::new)?;
            total += reader
                .lines()
                .map_while(|line| line.ok())
                .filter(|line| !line.trim().is_empty())
                .filter(|line| serde_json::from_str::<BTreeMap<String, IgnoredAny>>(line).is_ok())
                .count() as u64;
        }
        Some(total)
    }

    fn for_each_record(&self, slot_count: usize, visit: RecordVisitor<'_>) -> Result<u64> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(slot_count.max(1))
            .thread_name(|i| format!("slotframe-slot-{}", i))
            .build()
            .map_err(|e| FrameError::config(&format!("Failed to create worker pool: {}", e)))?;

        self.malformed.store(0, Ordering::Relaxed);
        let dispatched = AtomicU64::new(0);
        let mut readable = 0;

        for path in &self.files {
            let Some(reader) = Self::open(path) else {
                continue;
            };
            readable += 1;
            info!("Reading {}", path.display());

            let mut batch = Vec::with_capacity(BATCH_LINES);
            for line in reader.lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Stopped reading {}: {}", path.display(), e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                batch.push(line);
                if batch.len() == BATCH_LINES {
                    pool.install(|| self.dispatch(path, &batch, visit, &dispatched));
                    batch.clear();
                }
            }
            if !batch.is_empty() {
                pool.install(|| self.dispatch(path, &batch, visit, &dispatched));
            }
        }

        if readable == 0 {
            return Err(FrameError::config("None of the input files could be read"));
        }

        let malformed = self.malformed();
        if malformed > 0 {
            warn!("Skipped {} malformed records", malformed);
        }
        let dispatched = dispatched.load(Ordering::Relaxed);
        debug!("Dispatched {} records from {} files", dispatched, readable);
        Ok(dispatched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn write_lines(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, lines.join("\n")).unwrap();
        path
    }

    #[test]
    fn test_reads_all_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_lines(dir.path(), "run041.jsonl", &[r#"{"e": 1}"#, "", r#"{"e": 2}"#]);
        let second = write_lines(dir.path(), "run042.jsonl", &[r#"{"e": 3}"#, "{broken", r#"{"e": 4}"#]);
        let source = JsonLinesSource::new(vec![first, dir.path().join("missing.jsonl"), second]);

        let seen = Mutex::new(Vec::new());
        let count = source
            .for_each_record(2, &|slot, record| {
                assert!(slot < 2);
                seen.lock().push(record.f64("e").unwrap());
            })
            .unwrap();

        assert_eq!(count, 4);
        assert_eq!(source.malformed(), 1);
        let mut seen = seen.into_inner();
        seen.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(seen, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_total_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_lines(
            dir.path(),
            "run.jsonl",
            &[r#"{"e": 1}"#, " ", "{broken", "42", r#"{"e": 2}"#],
        );
        let source = JsonLinesSource::new(vec![path.clone()]);
        assert_eq!(source.total_records(), Some(2));
        // 总数与分发数一致, 进度能走到 100 %
        assert_eq!(source.for_each_record(1, &|_, _| {}).unwrap(), 2);
        assert_eq!(
            JsonLinesSource::new(vec![path, dir.path().join("missing.jsonl")]).total_records(),
            None
        );
    }

    #[test]
    fn test_no_readable_input() {
        let dir = tempfile::tempdir().unwrap();
        let source = JsonLinesSource::new(vec![dir.path().join("missing.jsonl")]);
        assert!(source.for_each_record(1, &|_, _| {}).is_err());
    }
}
