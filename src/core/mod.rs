//! 核心基础层模块
//!
//! 诊断收集和进度计数

pub mod diagnostics;
pub mod progress;

// 重新导出核心组件
pub use diagnostics::*;
pub use progress::*;
