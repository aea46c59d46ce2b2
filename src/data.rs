//! slotframe 数据源
//!
//! 数据源负责把每条输入记录交给某个工作槽。回调里的槽号即工作线程编号，
//! 同一个槽不会被两个线程同时使用。

pub mod jsonl_source;

pub use jsonl_source::JsonLinesSource;

use crate::types::{Record, SlotIndex};
use crate::Result;
use tracing::debug;

/// 记录回调: (槽号, 记录)
pub type RecordVisitor<'a> = &'a (dyn Fn(SlotIndex, Record) + Send + Sync);

/// 数据源接口
pub trait RecordSource: Send + Sync {
    /// 记录总数, 未知时为 None
    fn total_records(&self) -> Option<u64>;

    /// 把所有记录分发到 `slot_count` 个槽, 返回分发的记录数
    fn for_each_record(&self, slot_count: usize, visit: RecordVisitor<'_>) -> Result<u64>;
}

/// 内存数据源
///
/// 默认轮询分配槽; 也可以为每条记录指定槽 (测试时固定记录落在哪个槽)。
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    records: Vec<(Option<SlotIndex>, Record)>,
}

impl MemorySource {
    /// 轮询分配
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: records.into_iter().map(|r| (None, r)).collect(),
        }
    }

    /// 指定槽
    pub fn pinned(records: Vec<(SlotIndex, Record)>) -> Self {
        Self {
            records: records.into_iter().map(|(s, r)| (Some(s), r)).collect(),
        }
    }

    pub fn push(&mut self, record: Record) {
        self.records.push((None, record));
    }

    pub fn push_to(&mut self, slot: SlotIndex, record: Record) {
        self.records.push((Some(slot), record));
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn slot_of(&self, position: usize, slot_count: usize) -> SlotIndex {
        match self.records[position].0 {
            Some(slot) => slot,
            None => position % slot_count,
        }
    }
}

impl RecordSource for MemorySource {
    fn total_records(&self) -> Option<u64> {
        Some(self.records.len() as u64)
    }

    fn for_each_record(&self, slot_count: usize, visit: RecordVisitor<'_>) -> Result<u64> {
        let slot_count = slot_count.max(1);

        // 每个槽一个任务, 各自按顺序处理自己的记录
        rayon::scope(|scope| {
            for slot in 0..slot_count {
                scope.spawn(move |_| {
                    for position in 0..self.records.len() {
                        if self.slot_of(position, slot_count) == slot {
                            visit(slot, self.records[position].1.clone());
                        }
                    }
                });
            }
        });

        // 指定到不存在的槽的记录原样交给调用方处理
        for position in 0..self.records.len() {
            let slot = self.slot_of(position, slot_count);
            if slot >= slot_count {
                visit(slot, self.records[position].1.clone());
            }
        }

        debug!("Dispatched {} records to {} slots", self.records.len(), slot_count);
        Ok(self.records.len() as u64)
    }
}
