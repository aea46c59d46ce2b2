//! 运行诊断
//!
//! 可恢复的问题 (对象超限、合并缺失、输出失败) 不会中断运行，
//! 在这里登记、打到日志，最后写进诊断日志文件。

use crate::types::SlotIndex;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::Path;
use tracing::{error, info, warn};

/// 严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        };
        write!(f, "{}", tag)
    }
}

/// 诊断类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// 对象序列化后超过尺寸上限, 已从输出中移除
    SizeLimit,
    /// 其他槽缺少同名对象
    MissingObject,
    /// 其他槽缺少整个分组
    MissingGroup,
    /// 没有合并规则的对象类型
    UnmergeableObject,
    /// 同类对象但无法合并 (分格或列不一致)
    IncompatibleMerge,
    /// 输出分组或对象写入失败
    OutputWrite,
    /// 插件钩子返回错误
    PluginHook,
}

/// 单条诊断
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub slot: Option<SlotIndex>,
    /// 分组或对象路径
    pub location: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.message)
    }
}

/// 诊断收集器
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一条诊断并按严重程度打日志
    pub fn push(
        &mut self,
        severity: Severity,
        kind: DiagnosticKind,
        slot: Option<SlotIndex>,
        location: impl Into<String>,
        message: impl Into<String>,
    ) {
        let diagnostic = Diagnostic {
            severity,
            kind,
            slot,
            location: location.into(),
            message: message.into(),
        };
        match severity {
            Severity::Info => info!(kind = ?kind, "{}", diagnostic.message),
            Severity::Warning => warn!(kind = ?kind, "{}", diagnostic.message),
            Severity::Error => error!(kind = ?kind, "{}", diagnostic.message),
        }
        self.entries.push(diagnostic);
    }

    pub fn warning(&mut self, kind: DiagnosticKind, slot: Option<SlotIndex>, location: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Warning, kind, slot, location, message);
    }

    pub fn error(&mut self, kind: DiagnosticKind, slot: Option<SlotIndex>, location: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Error, kind, slot, location, message);
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 某类诊断的条数
    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.entries.iter().filter(|d| d.kind == kind).count()
    }

    pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(move |d| d.kind == kind)
    }

    /// 写诊断日志, 每行一条
    pub fn write_log(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
        for diagnostic in &self.entries {
            match diagnostic.slot {
                Some(slot) => writeln!(file, "{} (slot {}, {})", diagnostic, slot, diagnostic.location)?,
                None => writeln!(file, "{} ({})", diagnostic, diagnostic.location)?,
            }
        }
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_count() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.warning(DiagnosticKind::MissingGroup, Some(1), "aux", "group 'aux' missing in slot 1");
        diagnostics.error(DiagnosticKind::SizeLimit, Some(0), "big", "too large");

        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics.count(DiagnosticKind::MissingGroup), 1);
        assert_eq!(diagnostics.count(DiagnosticKind::OutputWrite), 0);
        let missing: Vec<_> = diagnostics.of_kind(DiagnosticKind::MissingGroup).collect();
        assert_eq!(missing[0].slot, Some(1));
        assert_eq!(missing[0].to_string(), "[WARNING] group 'aux' missing in slot 1");
    }

    #[test]
    fn test_write_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("energy042.log");

        let mut diagnostics = Diagnostics::new();
        diagnostics.error(DiagnosticKind::OutputWrite, None, "timing", "failed to create group 'timing'");
        diagnostics.write_log(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.starts_with("[ERROR] failed to create group 'timing'"));
    }
}
