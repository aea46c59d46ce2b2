//! slotframe - 并行分析插件运行框架
//!
//! 把用户编写的分析插件编译成动态库按需加载，在 N 个工作槽上并行处理输入记录，
//! 最后把所有槽的结果对象合并成一份并按分组写出。
//!
//! # 架构分层
//!
//! - **插件层**: 插件接口、构建、加载和注册表
//! - **结果层**: 按槽结果容器、尺寸检查、跨槽合并
//! - **数据与输出**: 记录来源和分层结果存储
//! - **运行器**: 驱动一次完整运行
//!
//! # 插件示例
//!
//! ```ignore
//! use slotframe::prelude::*;
//!
//! struct Energy;
//!
//! impl Energy {
//!     fn new(_args: &InitArgs) -> Result<Self> {
//!         Ok(Energy)
//!     }
//! }
//!
//! impl AnalysisPlugin for Energy {
//!     fn name(&self) -> &str { "Energy" }
//!     fn setup_slot(&self, _slot: SlotIndex, store: &mut SlotStore) -> Result<()> {
//!         store.book_accumulator("energy/crossE", "Cross energy", Accumulator::h1("E", 2000, 0.0, 2000.0))
//!     }
//!     fn process(&self, _slot: SlotIndex, record: &Record, store: &mut SlotStore) -> Result<()> {
//!         match record.f64("energy") {
//!             Some(e) => store.fill("energy/crossE", &[e]),
//!             None => Ok(()),
//!         }
//!     }
//! }
//!
//! slotframe::declare_plugin!(Energy, Energy::new);
//! ```

pub mod config;
pub mod core;
pub mod data;
pub mod error;
pub mod output;
pub mod plugins;
pub mod results;
pub mod runner;
pub mod types;

// 重新导出核心类型
pub use error::{FrameError, Result};
pub use types::*;

/// 插件作者常用的类型
pub mod prelude {
    pub use crate::plugins::{AnalysisPlugin, InitArgs};
    pub use crate::results::{Accumulator, Axis, RecordTable, ResultObject, SlotStore};
    pub use crate::types::{GroupPath, ObjectKey, Record, SlotIndex};
    pub use crate::{FrameError, Result};
    pub use serde_json::{json, Value};
}

// 插件只链接 slotframe, 通过这里使用日志宏
pub use tracing;

/// 框架信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const FRAMEWORK_NAME: &str = "slotframe";

/// 初始化日志系统; 重复调用不做任何事
pub fn init_logging(config: &config::LoggingConfig) {
    let level: tracing::Level = config.level.into();
    let installed = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(true)
        .with_target(config.verbose)
        .with_thread_names(config.verbose)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!("{} v{} logging at {}", FRAMEWORK_NAME, VERSION, level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framework_info() {
        assert_eq!(FRAMEWORK_NAME, "slotframe");
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_init_logging_twice() {
        let config = config::LoggingConfig::default();
        init_logging(&config);
        init_logging(&config);
    }
}
