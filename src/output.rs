//! 结果输出
//!
//! 合并后的容器按分组写出: 每个分组一个目录，每个对象一个文件。
//! 某个分组建不起来时报告并跳过，继续写下一个分组。

use crate::core::{DiagnosticKind, Diagnostics};
use crate::results::{ResultObject, SlotStore};
use crate::types::{is_plain_segment, GroupPath};
use crate::{FrameError, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// 分层结果存储
#[cfg_attr(test, mockall::automock)]
pub trait OutputStore {
    /// 创建并进入分组
    fn enter_group(&mut self, group: &GroupPath) -> Result<()>;

    /// 在分组中写一个对象
    fn write(&mut self, group: &GroupPath, object: &ResultObject) -> Result<()>;

    /// 所有分组写完后调用一次
    fn finish(&mut self) -> Result<()>;
}

/// 索引条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub path: String,
    pub class: String,
    pub file: String,
}

/// 文件系统存储
#[derive(Debug)]
pub struct FsOutputStore {
    root: PathBuf,
    compress: bool,
    index: Vec<IndexEntry>,
}

impl FsOutputStore {
    pub fn new(root: impl Into<PathBuf>, compress: bool) -> Self {
        Self {
            root: root.into(),
            compress,
            index: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index(&self) -> &[IndexEntry] {
        &self.index
    }

    /// 分组段必须是普通目录名, 不能离开本次运行的目录
    fn checked_group(group: &GroupPath) -> Result<()> {
        if group.is_plain() {
            Ok(())
        } else {
            Err(FrameError::output(
                &group.to_string(),
                "group segments must be non-empty names other than '.' and '..'",
            ))
        }
    }

    fn group_dir(&self, group: &GroupPath) -> PathBuf {
        group
            .segments()
            .iter()
            .fold(self.root.clone(), |dir, segment| dir.join(segment))
    }

    fn file_name(&self, object: &ResultObject) -> String {
        if self.compress {
            format!("{}.json.gz", object.name())
        } else {
            format!("{}.json", object.name())
        }
    }

    fn write_file(&self, path: &Path, object: &ResultObject) -> Result<()> {
        let file = BufWriter::new(File::create(path)?);
        if self.compress {
            let mut encoder = GzEncoder::new(file, Compression::default());
            serde_json::to_writer(&mut encoder, object)?;
            encoder.finish()?.flush()?;
        } else {
            let mut file = file;
            serde_json::to_writer_pretty(&mut file, object)?;
            file.flush()?;
        }
        Ok(())
    }
}

impl OutputStore for FsOutputStore {
    fn enter_group(&mut self, group: &GroupPath) -> Result<()> {
        Self::checked_group(group)?;
        let dir = self.group_dir(group);
        std::fs::create_dir_all(&dir)
            .map_err(|e| FrameError::output(&dir.display().to_string(), &e.to_string()))
    }

    fn write(&mut self, group: &GroupPath, object: &ResultObject) -> Result<()> {
        Self::checked_group(group)?;
        if !is_plain_segment(object.name()) {
            return Err(FrameError::output(
                &object.key.full_path(),
                "object name must be a non-empty file name without separators",
            ));
        }
        let file_name = self.file_name(object);
        let path = self.group_dir(group).join(&file_name);
        self.write_file(&path, object)
            .map_err(|e| FrameError::output(&path.display().to_string(), &e.to_string()))?;

        let relative = if group.is_root() {
            file_name
        } else {
            format!("{}/{}", group, file_name)
        };
        self.index.push(IndexEntry {
            path: object.key.full_path(),
            class: object.class_name().to_string(),
            file: relative,
        });
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        let path = self.root.join("index.json");
        let content = serde_json::to_string_pretty(&self.index)?;
        std::fs::write(&path, content)
            .map_err(|e| FrameError::output(&path.display().to_string(), &e.to_string()))?;
        info!("Wrote {} objects to {}", self.index.len(), self.root.display());
        Ok(())
    }
}

/// 写出统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub groups_written: usize,
    pub groups_failed: usize,
    pub objects_written: usize,
    pub objects_failed: usize,
}

/// 写出容器中输出清单里的全部对象
pub fn write_store(store: &SlotStore, output: &mut dyn OutputStore, diagnostics: &mut Diagnostics) -> WriteReport {
    let mut report = WriteReport::default();

    for group in store.groups() {
        if let Err(e) = output.enter_group(group) {
            diagnostics.error(
                DiagnosticKind::OutputWrite,
                None,
                group.to_string(),
                format!("failed to create group '{}', skipping it: {}", group, e),
            );
            report.groups_failed += 1;
            continue;
        }

        let mut written = 0;
        for object in store.group_objects(group) {
            match output.write(group, object) {
                Ok(()) => written += 1,
                Err(e) => {
                    diagnostics.error(
                        DiagnosticKind::OutputWrite,
                        None,
                        object.key.full_path(),
                        format!("failed to write '{}': {}", object.key, e),
                    );
                    report.objects_failed += 1;
                }
            }
        }
        debug!("Wrote {} objects in group '{}'", written, group);
        report.objects_written += written;
        report.groups_written += 1;
    }

    if let Err(e) = output.finish() {
        diagnostics.error(DiagnosticKind::OutputWrite, None, "", format!("failed to finish output: {}", e));
    }
    report
}
