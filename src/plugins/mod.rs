//! 插件层模块
//!
//! 插件接口、构建、加载和注册表

pub mod compiler;
pub mod core;
pub mod dynamic_loader;
pub mod registry;

// 重新导出核心组件
pub use self::core::{AnalysisPlugin, CreateFn, DestroyFn, InitArgs, PluginBox, PluginManifest, CREATE_SYMBOL, DESTROY_SYMBOL};
pub use compiler::{needs_rebuild, CommandBuilder, PluginBuilder, PluginLayout, PluginSpec};
pub use dynamic_loader::{DylibLoader, LibraryLoader, LoadedPlugin, PluginInstance};
pub use registry::PluginRegistry;
