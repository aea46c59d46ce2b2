//! 对象尺寸检查
//!
//! 输出格式对单个对象有大小上限。超限的对象从输出清单里拿掉并登记诊断，
//! 不会让整个运行失败。

use super::object::ResultObject;
use super::store::SlotStore;
use crate::core::{DiagnosticKind, Diagnostics};
use crate::types::{ObjectKey, SlotIndex};
use crate::Result;
use std::fmt;
use std::io;
use std::sync::Arc;
use tracing::{debug, warn};

/// 默认上限 (字节)
pub const DEFAULT_MAX_OBJECT_BYTES: u64 = 1_073_741_822;

const BYTES_PER_GIB: f64 = 1_073_741_824.0;

/// 检查发生的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardPhase {
    /// 建立之后, 处理之前
    PreUse,
    /// 合并之前
    PreWrite,
    /// 合并之后, 写出之前
    PostMerge,
}

impl fmt::Display for GuardPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            GuardPhase::PreUse => "use",
            GuardPhase::PreWrite => "write",
            GuardPhase::PostMerge => "write merged",
        };
        write!(f, "{}", verb)
    }
}

/// 序列化尺寸估算
pub trait SizeEstimator: Send + Sync {
    fn estimate(&self, object: &ResultObject) -> Result<u64>;
}

/// 只数字节的写出端
#[derive(Default)]
struct ByteCounter(u64);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// 按 JSON 序列化结果计算尺寸, 不分配缓冲
#[derive(Debug, Clone, Copy, Default)]
pub struct SerializedSize;

impl SizeEstimator for SerializedSize {
    fn estimate(&self, object: &ResultObject) -> Result<u64> {
        let mut counter = ByteCounter::default();
        serde_json::to_writer(&mut counter, &object.payload)?;
        Ok(counter.0)
    }
}

/// 被移出输出清单的对象
#[derive(Debug, Clone, PartialEq)]
pub struct PrunedObject {
    pub slot: SlotIndex,
    pub key: ObjectKey,
    pub class: String,
    pub bytes: u64,
    pub phase: GuardPhase,
}

/// 尺寸检查器
#[derive(Clone)]
pub struct SizeGuard {
    limit: u64,
    estimator: Arc<dyn SizeEstimator>,
}

impl fmt::Debug for SizeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SizeGuard").field("limit", &self.limit).finish()
    }
}

impl Default for SizeGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OBJECT_BYTES, Arc::new(SerializedSize))
    }
}

impl SizeGuard {
    pub fn new(limit: u64, estimator: Arc<dyn SizeEstimator>) -> Self {
        Self { limit, estimator }
    }

    pub fn with_limit(limit: u64) -> Self {
        Self::new(limit, Arc::new(SerializedSize))
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// 检查输出清单中的每个对象, 超过上限的移出清单
    pub fn check(&self, store: &mut SlotStore, phase: GuardPhase, diagnostics: &mut Diagnostics) -> Vec<PrunedObject> {
        let slot = store.slot();
        let mut pruned = Vec::new();

        for group in store.groups() {
            for object in store.group_objects(group) {
                let bytes = match self.estimator.estimate(object) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!("{}. slot: cannot estimate size of '{}': {}", slot, object.key, e);
                        continue;
                    }
                };
                if bytes > self.limit {
                    pruned.push(PrunedObject {
                        slot,
                        key: object.key.clone(),
                        class: object.class_name().to_string(),
                        bytes,
                        phase,
                    });
                }
            }
        }

        for object in &pruned {
            store.remove_from_output(&object.key);
            diagnostics.error(
                DiagnosticKind::SizeLimit,
                Some(slot),
                object.key.full_path(),
                format!(
                    "{}. slot: {} '{}' too large to {}: {} bytes = {:.3} GiB, removing it!",
                    slot,
                    object.class,
                    object.key,
                    phase,
                    object.bytes,
                    object.bytes as f64 / BYTES_PER_GIB
                ),
            );
        }

        debug!("{}. slot: size check ({}) pruned {} objects", slot, phase, pruned.len());
        pruned
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::results::object::Accumulator;
    use std::collections::HashMap;

    /// 固定尺寸的估算器, 按对象名覆盖
    pub(crate) struct FixedSize {
        default: u64,
        sizes: HashMap<String, u64>,
    }

    impl FixedSize {
        pub(crate) fn new(default: u64) -> Self {
            Self {
                default,
                sizes: HashMap::new(),
            }
        }

        pub(crate) fn with(mut self, name: &str, bytes: u64) -> Self {
            self.sizes.insert(name.to_string(), bytes);
            self
        }
    }

    impl SizeEstimator for FixedSize {
        fn estimate(&self, object: &ResultObject) -> Result<u64> {
            Ok(self.sizes.get(object.name()).copied().unwrap_or(self.default))
        }
    }

    fn store() -> SlotStore {
        let mut store = SlotStore::new(2);
        store.book_accumulator("spectra/huge", "", Accumulator::counter()).unwrap();
        store.book_accumulator("spectra/edge", "", Accumulator::counter()).unwrap();
        store.book_accumulator("spectra/over", "", Accumulator::counter()).unwrap();
        store.book_accumulator("small", "", Accumulator::counter()).unwrap();
        store
    }

    #[test]
    fn test_prunes_strictly_above_limit() {
        let limit = DEFAULT_MAX_OBJECT_BYTES;
        let estimator = FixedSize::new(100)
            .with("huge", 1_288_490_189) // 1.2 GiB
            .with("edge", limit)
            .with("over", limit + 1);
        let guard = SizeGuard::new(limit, Arc::new(estimator));
        let mut store = store();
        let mut diagnostics = Diagnostics::new();

        let pruned = guard.check(&mut store, GuardPhase::PreWrite, &mut diagnostics);
        let names: Vec<&str> = pruned.iter().map(|p| p.key.name.as_str()).collect();
        assert_eq!(names, vec!["huge", "over"]);
        assert_eq!(store.output_len(), 2);
        assert_eq!(store.len(), 4);
        assert!(store.find_in_output(&"spectra".into(), "edge").is_some());

        assert_eq!(diagnostics.count(DiagnosticKind::SizeLimit), 2);
        let message = &diagnostics.entries()[0].message;
        assert_eq!(
            message,
            "2. slot: Accumulator 'spectra/huge' too large to write: 1288490189 bytes = 1.200 GiB, removing it!"
        );
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(GuardPhase::PreUse.to_string(), "use");
        assert_eq!(GuardPhase::PreWrite.to_string(), "write");
        assert_eq!(GuardPhase::PostMerge.to_string(), "write merged");
    }

    #[test]
    fn test_second_check_is_quiet() {
        let guard = SizeGuard::new(10, Arc::new(FixedSize::new(5).with("huge", 50)));
        let mut store = store();
        let mut diagnostics = Diagnostics::new();
        assert_eq!(guard.check(&mut store, GuardPhase::PreUse, &mut diagnostics).len(), 1);
        assert!(guard.check(&mut store, GuardPhase::PreWrite, &mut diagnostics).is_empty());
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn test_serialized_size_grows_with_content() {
        let small = ResultObject::accumulator("a", "", Accumulator::h1("x", 10, 0.0, 1.0));
        let large = ResultObject::accumulator("b", "", Accumulator::h1("x", 1000, 0.0, 1.0));
        let estimator = SerializedSize;
        let small_bytes = estimator.estimate(&small).unwrap();
        let large_bytes = estimator.estimate(&large).unwrap();
        assert!(small_bytes > 0);
        assert!(large_bytes > small_bytes);
        assert_eq!(
            small_bytes,
            serde_json::to_vec(&small.payload).unwrap().len() as u64
        );
    }
}
