//! 按槽的结果容器
//!
//! 每个槽有自己的 [`SlotStore`]: 全部对象按创建顺序保存，另有一份按分组
//! 的输出清单。尺寸检查只把对象从输出清单里拿掉，插件仍然可以继续填充它。

use super::object::{Accumulator, RecordTable, ResultObject};
use super::size_guard::{GuardPhase, SizeGuard};
use crate::core::Diagnostics;
use crate::plugins::AnalysisPlugin;
use crate::types::{GroupPath, ObjectKey, SlotIndex};
use crate::{FrameError, Result};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// 一个槽的结果容器
#[derive(Debug, Clone, Default)]
pub struct SlotStore {
    slot: SlotIndex,
    /// 创建顺序
    objects: Vec<ResultObject>,
    /// 完整路径 → objects 下标
    index: HashMap<String, usize>,
    /// 输出清单: 分组 → objects 下标 (插入顺序)
    groups: BTreeMap<GroupPath, Vec<usize>>,
}

impl SlotStore {
    pub fn new(slot: SlotIndex) -> Self {
        Self {
            slot,
            ..Default::default()
        }
    }

    pub fn slot(&self) -> SlotIndex {
        self.slot
    }

    /// 登记一个对象并归入它的分组; 同槽同分组内重名报错
    pub fn insert(&mut self, object: ResultObject) -> Result<&mut ResultObject> {
        let path = object.key.full_path();
        if self.index.contains_key(&path) {
            return Err(FrameError::plugin(&format!(
                "{}. slot: object '{}' already exists",
                self.slot, path
            )));
        }
        let position = self.objects.len();
        self.groups
            .entry(object.key.group.clone())
            .or_default()
            .push(position);
        self.index.insert(path, position);
        self.objects.push(object);
        Ok(&mut self.objects[position])
    }

    /// 创建一个累加器
    pub fn book_accumulator(&mut self, key: impl Into<ObjectKey>, title: &str, accumulator: Accumulator) -> Result<()> {
        self.insert(ResultObject::accumulator(key, title, accumulator))
            .map(|_| ())
    }

    /// 创建一个记录表
    pub fn book_table(&mut self, key: impl Into<ObjectKey>, title: &str, table: RecordTable) -> Result<()> {
        self.insert(ResultObject::table(key, title, table)).map(|_| ())
    }

    /// 按完整路径取对象 (不论是否在输出清单里)
    pub fn get(&self, path: &str) -> Option<&ResultObject> {
        self.index.get(path).map(|&i| &self.objects[i])
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut ResultObject> {
        match self.index.get(path) {
            Some(&i) => Some(&mut self.objects[i]),
            None => None,
        }
    }

    pub fn accumulator_mut(&mut self, path: &str) -> Option<&mut Accumulator> {
        self.get_mut(path).and_then(ResultObject::as_accumulator_mut)
    }

    pub fn table_mut(&mut self, path: &str) -> Option<&mut RecordTable> {
        self.get_mut(path).and_then(ResultObject::as_table_mut)
    }

    /// 权重为 1 的填充; 对象不存在或不是累加器时报错, 方便插件发现拼写错误
    pub fn fill(&mut self, path: &str, coords: &[f64]) -> Result<()> {
        let slot = self.slot;
        let accumulator = self.accumulator_mut(path).ok_or_else(|| {
            FrameError::plugin(&format!("{}. slot: no accumulator named '{}'", slot, path))
        })?;
        if accumulator.fill(coords, 1.0) {
            Ok(())
        } else {
            Err(FrameError::plugin(&format!(
                "'{}' has {} axes, got {} coordinates",
                path,
                accumulator.dimensions(),
                coords.len()
            )))
        }
    }

    /// 全部对象, 包括已被移出输出清单的
    pub fn objects(&self) -> &[ResultObject] {
        &self.objects
    }

    /// 对象总数
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// 输出清单中的分组 (有序)
    pub fn groups(&self) -> impl Iterator<Item = &GroupPath> {
        self.groups.keys()
    }

    pub fn has_group(&self, group: &GroupPath) -> bool {
        self.groups.contains_key(group)
    }

    /// 分组中仍在输出清单里的对象
    pub fn group_objects<'a>(&'a self, group: &GroupPath) -> impl Iterator<Item = &'a ResultObject> + 'a {
        self.groups
            .get(group)
            .into_iter()
            .flatten()
            .map(move |&i| &self.objects[i])
    }

    /// 在输出清单中按分组和名字查找
    pub fn find_in_output(&self, group: &GroupPath, name: &str) -> Option<&ResultObject> {
        self.group_objects(group).find(|o| o.key.name == name)
    }

    /// 输出清单中的对象数
    pub fn output_len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    /// 把对象从输出清单拿掉, 对象本身保留
    pub fn remove_from_output(&mut self, key: &ObjectKey) -> bool {
        let Some(&position) = self.index.get(&key.full_path()) else {
            return false;
        };
        match self.groups.get_mut(&key.group) {
            Some(members) => {
                let before = members.len();
                members.retain(|&i| i != position);
                members.len() != before
            }
            None => false,
        }
    }

    /// 替换输出清单中的对象内容 (合并结果回填)
    pub fn replace(&mut self, object: ResultObject) -> Result<()> {
        let path = object.key.full_path();
        match self.index.get(&path) {
            Some(&i) => {
                self.objects[i] = object;
                Ok(())
            }
            None => Err(FrameError::merge(&format!("no object '{}' to replace", path))),
        }
    }
}

/// 为所有槽建立结果容器
///
/// 每个槽调用一次插件的 `setup_slot`，随后立即做 "use" 阶段的尺寸检查，
/// 让一开始就超限的对象在处理循环开始前就离开输出路径。
pub fn setup(
    slot_count: usize,
    plugin: &dyn AnalysisPlugin,
    guard: &SizeGuard,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<SlotStore>> {
    if slot_count == 0 {
        return Err(FrameError::config("slot count must be at least 1"));
    }

    let mut stores = Vec::with_capacity(slot_count);
    for slot in 0..slot_count {
        let mut store = SlotStore::new(slot);
        plugin.setup_slot(slot, &mut store).map_err(|e| {
            FrameError::plugin(&format!("{} failed to set up slot {}: {}", plugin.name(), slot, e))
        })?;
        debug!(
            "{}. slot: {} objects in {} groups",
            slot,
            store.len(),
            store.groups.len()
        );
        guard.check(&mut store, GuardPhase::PreUse, diagnostics);
        stores.push(store);
    }

    info!(
        "Created {} objects per slot for {} slots",
        stores.first().map(SlotStore::len).unwrap_or_default(),
        slot_count
    );
    Ok(stores)
}
