//! 处理进度
//!
//! 工作线程只做原子自增，按 10% 为一档打印进度。

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::info;

/// 进度计数器
#[derive(Debug)]
pub struct Progress {
    total: Option<u64>,
    processed: AtomicU64,
    /// 已经打印过的档位 (0..=10)
    reported: AtomicUsize,
}

impl Progress {
    pub fn new(total: Option<u64>) -> Self {
        Self {
            total: total.filter(|&t| t > 0),
            processed: AtomicU64::new(0),
            reported: AtomicUsize::new(0),
        }
    }

    /// 记录一条已处理的记录
    pub fn tick(&self) {
        let done = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        let Some(total) = self.total else {
            return;
        };
        let step = ((done.min(total) * 10) / total) as usize;
        let mut reported = self.reported.load(Ordering::Relaxed);
        while step > reported {
            // 只有一个线程能把档位推进到 step
            match self.reported.compare_exchange_weak(reported, step, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => {
                    info!("[{:<10}] {:>3} % ({}/{})", "#".repeat(step), step * 10, done, total);
                    break;
                }
                Err(current) => reported = current,
            }
        }
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// 完成比例, 总数未知时为 None
    pub fn fraction(&self) -> Option<f64> {
        self.total
            .map(|total| (self.processed() as f64 / total as f64).min(1.0))
    }
}
