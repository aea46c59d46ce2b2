//! 结果对象
//!
//! 封闭的三种对象: 累加器 (直方图/计数器)、记录表、不透明对象。
//! 每种对象自带合并规则，合并引擎按枚举分派。

use crate::types::ObjectKey;
use crate::{FrameError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// 直方图坐标轴
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    pub label: String,
    pub bins: usize,
    pub low: f64,
    pub high: f64,
}

impl Axis {
    pub fn new(label: &str, bins: usize, low: f64, high: f64) -> Self {
        Self {
            label: label.to_string(),
            bins: bins.max(1),
            low,
            high,
        }
    }

    /// 含下溢(0)与上溢(bins+1)的格子数
    fn cells(&self) -> usize {
        self.bins + 2
    }

    fn cell(&self, x: f64) -> usize {
        if x.is_nan() || x < self.low {
            return 0;
        }
        if x >= self.high {
            return self.bins + 1;
        }
        let width = (self.high - self.low) / self.bins as f64;
        // 浮点误差可能让 x 恰好落在 high 之下的最后一格之外
        (((x - self.low) / width) as usize).min(self.bins.saturating_sub(1)) + 1
    }

    /// 第 `bin` 个格子 (1..=bins) 的中心
    pub fn center(&self, bin: usize) -> f64 {
        let width = (self.high - self.low) / self.bins as f64;
        self.low + (bin as f64 - 0.5) * width
    }
}

/// 累加器: n 维直方图, 0 维即计数器
///
/// 合并是逐格相加，满足交换律和结合律。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accumulator {
    axes: Vec<Axis>,
    cells: Vec<f64>,
    entries: u64,
}

impl Accumulator {
    pub fn new(axes: Vec<Axis>) -> Self {
        let size = axes.iter().map(Axis::cells).product::<usize>().max(1);
        Self {
            axes,
            cells: vec![0.0; size],
            entries: 0,
        }
    }

    /// 计数器
    pub fn counter() -> Self {
        Self::new(Vec::new())
    }

    pub fn h1(label: &str, bins: usize, low: f64, high: f64) -> Self {
        Self::new(vec![Axis::new(label, bins, low, high)])
    }

    pub fn h2(x: Axis, y: Axis) -> Self {
        Self::new(vec![x, y])
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn dimensions(&self) -> usize {
        self.axes.len()
    }

    /// 填充次数
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// 所有格子之和 (含溢出格)
    pub fn total(&self) -> f64 {
        self.cells.iter().sum()
    }

    /// 按坐标填充; 坐标个数与维度不符时忽略并返回 false
    pub fn fill(&mut self, coords: &[f64], weight: f64) -> bool {
        if coords.len() != self.axes.len() {
            return false;
        }
        let index = self.cell_index(coords);
        self.cells[index] += weight;
        self.entries += 1;
        true
    }

    /// 计数器加值; 有坐标轴的直方图不接受, 返回 false
    pub fn add(&mut self, value: f64) -> bool {
        if !self.axes.is_empty() {
            return false;
        }
        self.cells[0] += value;
        self.entries += 1;
        true
    }

    /// 坐标所在格子的内容
    pub fn content_at(&self, coords: &[f64]) -> Option<f64> {
        if coords.len() != self.axes.len() {
            return None;
        }
        Some(self.cells[self.cell_index(coords)])
    }

    fn cell_index(&self, coords: &[f64]) -> usize {
        // 第一根轴变化最快
        let mut index = 0;
        let mut stride = 1;
        for (axis, &x) in self.axes.iter().zip(coords) {
            index += axis.cell(x) * stride;
            stride *= axis.cells();
        }
        index
    }

    /// 把 `other` 逐格加到自身; 分格不同则拒绝
    pub fn merge(&mut self, other: &Accumulator) -> Result<()> {
        if self.axes != other.axes {
            return Err(FrameError::merge(&format!(
                "binning differs ({} vs {} axes / {} vs {} cells)",
                self.axes.len(),
                other.axes.len(),
                self.cells.len(),
                other.cells.len()
            )));
        }
        for (mine, theirs) in self.cells.iter_mut().zip(&other.cells) {
            *mine += theirs;
        }
        self.entries += other.entries;
        Ok(())
    }
}

/// 记录表
///
/// 合并 = 按槽顺序拼接 + 压缩。压缩去掉键列组合重复的行(保留第一次出现)，
/// 没有键列的表压缩不会删行。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordTable {
    columns: Vec<String>,
    key_columns: Vec<usize>,
    rows: Vec<Vec<Value>>,
}

impl RecordTable {
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            key_columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// 指定键列; 未知列名报错
    pub fn with_key(mut self, key_columns: &[&str]) -> Result<Self> {
        let mut indices = Vec::with_capacity(key_columns.len());
        for key in key_columns {
            let index = self
                .columns
                .iter()
                .position(|c| c == key)
                .ok_or_else(|| FrameError::plugin(&format!("unknown key column '{}'", key)))?;
            indices.push(index);
        }
        self.key_columns = indices;
        Ok(self)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn entries(&self) -> usize {
        self.rows.len()
    }

    pub fn push(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(FrameError::plugin(&format!(
                "row has {} values, table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// 列名与键列都相同
    pub fn same_layout(&self, other: &RecordTable) -> bool {
        self.columns == other.columns && self.key_columns == other.key_columns
    }

    /// 拼接所有部分 (顺序即参数顺序), 不做压缩
    pub fn concat(&self, parts: &[&RecordTable]) -> Result<RecordTable> {
        let mut merged = self.clone();
        let extra: usize = parts.iter().map(|p| p.entries()).sum();
        merged.rows.reserve(extra);
        for part in parts {
            if !self.same_layout(part) {
                return Err(FrameError::merge(&format!(
                    "column layout differs: [{}] vs [{}]",
                    self.columns.join(", "),
                    part.columns.join(", ")
                )));
            }
            merged.rows.extend(part.rows.iter().cloned());
        }
        Ok(merged)
    }

    /// 压缩, 返回删掉的行数; 对已压缩的表再次调用不做任何事
    pub fn compact(&mut self) -> usize {
        let before = self.rows.len();
        if !self.key_columns.is_empty() {
            let key_columns = &self.key_columns;
            let mut seen = HashSet::with_capacity(before);
            self.rows.retain(|row| {
                let key: Vec<String> = key_columns
                    .iter()
                    .map(|&i| row.get(i).map(Value::to_string).unwrap_or_default())
                    .collect();
                seen.insert(key)
            });
        }
        self.rows.shrink_to_fit();
        before - self.rows.len()
    }
}

/// 不透明对象: 无合并规则, 一般各槽相同(例如刻度常数快照)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpaqueObject {
    pub class: String,
    pub value: Value,
}

/// 对象内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum ResultPayload {
    Accumulator(Accumulator),
    RecordTable(RecordTable),
    Opaque(OpaqueObject),
}

/// 命名结果对象
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultObject {
    pub key: ObjectKey,
    pub title: String,
    pub payload: ResultPayload,
}

impl ResultObject {
    pub fn new(key: impl Into<ObjectKey>, title: &str, payload: ResultPayload) -> Self {
        Self {
            key: key.into(),
            title: title.to_string(),
            payload,
        }
    }

    pub fn accumulator(key: impl Into<ObjectKey>, title: &str, accumulator: Accumulator) -> Self {
        Self::new(key, title, ResultPayload::Accumulator(accumulator))
    }

    pub fn table(key: impl Into<ObjectKey>, title: &str, table: RecordTable) -> Self {
        Self::new(key, title, ResultPayload::RecordTable(table))
    }

    pub fn opaque(key: impl Into<ObjectKey>, class: &str, value: Value) -> Self {
        Self::new(
            key,
            "",
            ResultPayload::Opaque(OpaqueObject {
                class: class.to_string(),
                value,
            }),
        )
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    /// 类名, 用于诊断信息
    pub fn class_name(&self) -> &str {
        match &self.payload {
            ResultPayload::Accumulator(_) => "Accumulator",
            ResultPayload::RecordTable(_) => "RecordTable",
            ResultPayload::Opaque(o) => &o.class,
        }
    }

    /// 是否参与跨槽合并 (缺失时需要报告)
    pub fn is_mergeable(&self) -> bool {
        !matches!(self.payload, ResultPayload::Opaque(_))
    }

    pub fn as_accumulator(&self) -> Option<&Accumulator> {
        match &self.payload {
            ResultPayload::Accumulator(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_accumulator_mut(&mut self) -> Option<&mut Accumulator> {
        match &mut self.payload {
            ResultPayload::Accumulator(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&RecordTable> {
        match &self.payload {
            ResultPayload::RecordTable(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_table_mut(&mut self) -> Option<&mut RecordTable> {
        match &mut self.payload {
            ResultPayload::RecordTable(t) => Some(t),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_axis_cells() {
        let axis = Axis::new("energy", 10, 0.0, 100.0);
        assert_eq!(axis.cell(-1.0), 0);
        assert_eq!(axis.cell(0.0), 1);
        assert_eq!(axis.cell(99.999), 10);
        assert_eq!(axis.cell(100.0), 11);
        assert_eq!(axis.cell(f64::NAN), 0);
        assert!((axis.center(1) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_fill_and_content() {
        let mut h = Accumulator::h1("energy", 100, 0.0, 2000.0);
        assert!(h.fill(&[511.0], 1.0));
        assert!(h.fill(&[511.0], 2.0));
        assert!(!h.fill(&[1.0, 2.0], 1.0));
        assert_eq!(h.content_at(&[515.0]), Some(3.0));
        assert_eq!(h.entries(), 2);
    }

    #[test]
    fn test_add_is_counter_only() {
        let mut counter = Accumulator::counter();
        assert!(counter.add(2.5));
        assert_eq!(counter.total(), 2.5);

        let mut h = Accumulator::h1("energy", 10, 0.0, 100.0);
        assert!(!h.add(5.0));
        assert_eq!(h.total(), 0.0);
        assert_eq!(h.entries(), 0);
    }

    #[test]
    fn test_two_dimensional_fill() {
        let mut h = Accumulator::h2(Axis::new("x", 4, 0.0, 4.0), Axis::new("y", 4, 0.0, 4.0));
        h.fill(&[1.5, 2.5], 1.0);
        assert_eq!(h.content_at(&[1.1, 2.9]), Some(1.0));
        assert_eq!(h.content_at(&[2.5, 1.5]), Some(0.0));
    }

    #[test]
    fn test_accumulator_merge() {
        let mut a = Accumulator::counter();
        let mut b = Accumulator::counter();
        a.add(10.0);
        b.add(20.0);
        a.merge(&b).unwrap();
        assert_eq!(a.total(), 30.0);
        assert_eq!(a.entries(), 2);

        let c = Accumulator::h1("x", 10, 0.0, 1.0);
        assert!(a.merge(&c).is_err());
    }

    #[test]
    fn test_table_concat_and_compact() {
        let mut first = RecordTable::new(&["event", "energy"]).with_key(&["event"]).unwrap();
        first.push(vec![json!(1), json!(511.0)]).unwrap();
        first.push(vec![json!(2), json!(1332.5)]).unwrap();
        let mut second = first.clone();
        second.rows.clear();
        second.push(vec![json!(2), json!(1332.5)]).unwrap();
        second.push(vec![json!(3), json!(1173.2)]).unwrap();

        let mut merged = first.concat(&[&second]).unwrap();
        assert_eq!(merged.entries(), 4);
        assert_eq!(merged.compact(), 1);
        assert_eq!(merged.entries(), 3);
        // 幂等
        assert_eq!(merged.compact(), 0);
        assert_eq!(merged.entries(), 3);
    }

    #[test]
    fn test_table_without_key_never_shrinks() {
        let mut table = RecordTable::new(&["energy"]);
        table.push(vec![json!(1.0)]).unwrap();
        table.push(vec![json!(1.0)]).unwrap();
        assert_eq!(table.compact(), 0);
        assert_eq!(table.entries(), 2);
    }

    #[test]
    fn test_table_rejects_bad_rows_and_layouts() {
        let mut table = RecordTable::new(&["a", "b"]);
        assert!(table.push(vec![json!(1)]).is_err());
        assert!(RecordTable::new(&["a"]).with_key(&["b"]).is_err());

        let other = RecordTable::new(&["a", "c"]);
        assert!(table.concat(&[&other]).is_err());
    }

    #[test]
    fn test_class_names() {
        let acc = ResultObject::accumulator("counts", "", Accumulator::counter());
        let table = ResultObject::table("hits", "", RecordTable::new(&["id"]));
        let cal = ResultObject::opaque("calibration", "Calibration", json!({"gain": 1.0}));
        assert_eq!(acc.class_name(), "Accumulator");
        assert_eq!(table.class_name(), "RecordTable");
        assert_eq!(cal.class_name(), "Calibration");
        assert!(acc.is_mergeable() && table.is_mergeable());
        assert!(!cal.is_mergeable());
    }
}
