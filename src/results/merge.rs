//! 跨槽合并
//!
//! 以第 0 槽的输出清单为模板构建一个新的合并容器，各槽原样保留。
//! 合并顺序固定为槽号升序。

use super::object::{RecordTable, ResultObject, ResultPayload};
use super::store::SlotStore;
use crate::core::{DiagnosticKind, Diagnostics};
use crate::types::{GroupPath, ObjectKey};
use crate::{FrameError, Result};
use tracing::{debug, info};

/// 记录表合并报告
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMergeReport {
    pub key: ObjectKey,
    /// 各部分行数, 第一个是第 0 槽
    pub parts: Vec<usize>,
    /// 压缩前总行数
    pub total_before: usize,
    /// 压缩后总行数
    pub total_after: usize,
}

/// 合并结果
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub store: SlotStore,
    pub tables: Vec<TableMergeReport>,
}

/// 合并引擎
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeEngine;

impl MergeEngine {
    pub fn new() -> Self {
        Self
    }

    /// 把所有槽合并成一个新的容器
    pub fn merge(&self, slots: &[SlotStore], diagnostics: &mut Diagnostics) -> Result<MergeOutcome> {
        let (first, rest) = slots
            .split_first()
            .ok_or_else(|| FrameError::config("nothing to merge: no slots"))?;

        let mut merged = SlotStore::new(first.slot());
        let mut tables = Vec::new();

        for group in first.groups() {
            let contributors = Self::contributors(group, rest, diagnostics);
            for object in first.group_objects(group) {
                let (target, report) = Self::merge_object(object, group, &contributors, diagnostics);
                if let Some(report) = report {
                    tables.push(report);
                }
                merged.insert(target)?;
            }
        }

        info!(
            "Merged {} slots into {} objects ({} tables)",
            slots.len(),
            merged.output_len(),
            tables.len()
        );
        Ok(MergeOutcome { store: merged, tables })
    }

    /// 拥有该分组的其余槽; 缺整个分组的槽登记一次诊断
    fn contributors<'a>(group: &GroupPath, rest: &'a [SlotStore], diagnostics: &mut Diagnostics) -> Vec<&'a SlotStore> {
        rest.iter()
            .filter(|store| {
                if store.has_group(group) {
                    return true;
                }
                diagnostics.warning(
                    DiagnosticKind::MissingGroup,
                    Some(store.slot()),
                    group.to_string(),
                    format!("{}. slot: group '{}' is missing, skipping it for merge", store.slot(), group),
                );
                false
            })
            .collect()
    }

    fn merge_object(
        object: &ResultObject,
        group: &GroupPath,
        contributors: &[&SlotStore],
        diagnostics: &mut Diagnostics,
    ) -> (ResultObject, Option<TableMergeReport>) {
        let mut target = object.clone();
        let mut parts: Vec<&RecordTable> = Vec::new();

        for store in contributors {
            let slot = store.slot();
            let Some(theirs) = store.find_in_output(group, object.name()) else {
                if object.is_mergeable() {
                    diagnostics.warning(
                        DiagnosticKind::MissingObject,
                        Some(slot),
                        object.key.full_path(),
                        format!("{}. slot: {} '{}' not found", slot, object.class_name(), object.key),
                    );
                }
                continue;
            };

            match (&mut target.payload, &theirs.payload) {
                (ResultPayload::Accumulator(mine), ResultPayload::Accumulator(other)) => {
                    if let Err(e) = mine.merge(other) {
                        diagnostics.warning(
                            DiagnosticKind::IncompatibleMerge,
                            Some(slot),
                            object.key.full_path(),
                            format!("{}. slot: cannot merge '{}': {}", slot, object.key, e),
                        );
                    }
                }
                (ResultPayload::RecordTable(mine), ResultPayload::RecordTable(other)) => {
                    if mine.same_layout(other) {
                        parts.push(other);
                    } else {
                        diagnostics.warning(
                            DiagnosticKind::IncompatibleMerge,
                            Some(slot),
                            object.key.full_path(),
                            format!("{}. slot: cannot merge '{}': column layout differs", slot, object.key),
                        );
                    }
                }
                _ => {
                    diagnostics.warning(
                        DiagnosticKind::UnmergeableObject,
                        Some(slot),
                        object.key.full_path(),
                        format!(
                            "{}. slot: can't merge '{}' of class {}",
                            slot,
                            object.key,
                            theirs.class_name()
                        ),
                    );
                }
            }
        }

        let report = match &mut target.payload {
            ResultPayload::RecordTable(table) if !parts.is_empty() => {
                Self::merge_table(&object.key, table, &parts)
            }
            _ => None,
        };
        (target, report)
    }

    /// 拼接 + 压缩, 一张表只做一次
    fn merge_table(key: &ObjectKey, table: &mut RecordTable, parts: &[&RecordTable]) -> Option<TableMergeReport> {
        // 布局已逐个检查过, concat 不会失败
        let mut combined = table.concat(parts).ok()?;
        let mut counts = Vec::with_capacity(parts.len() + 1);
        counts.push(table.entries());
        counts.extend(parts.iter().map(|p| p.entries()));

        for (i, count) in counts.iter().enumerate() {
            debug!("'{}' part {}: {} entries", key, i, count);
        }
        let total_before = combined.entries();
        combined.compact();
        let total_after = combined.entries();
        info!(
            "Merged table '{}' from {} parts: {} entries, {} after compaction",
            key,
            counts.len(),
            total_before,
            total_after
        );

        *table = combined;
        Some(TableMergeReport {
            key: key.clone(),
            parts: counts,
            total_before,
            total_after,
        })
    }
}
