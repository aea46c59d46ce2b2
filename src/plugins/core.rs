//! 插件系统核心特征定义
//!
//! 分析插件是一个单独编译的动态库，导出两个固定符号:
//! 构造函数 [`CREATE_SYMBOL`] 和析构函数 [`DESTROY_SYMBOL`]。
//! 插件作者只需实现 [`AnalysisPlugin`] 并调用 [`declare_plugin!`](crate::declare_plugin)。
//!
//! # 同编译器约束
//!
//! 跨边界传递的是 Rust 类型 (`Box<dyn AnalysisPlugin>`、[`SlotStore`]、[`Record`])，
//! 因此插件必须和宿主用同一个 `rustc` 编译。陈旧检查把宿主本身当作运行时组件，
//! 宿主更新后插件会被重新编译。

use crate::results::SlotStore;
use crate::types::{Record, SlotIndex};
use crate::{FrameError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// 构造函数符号名
pub const CREATE_SYMBOL: &str = "slotframe_create_plugin";
/// 析构函数符号名
pub const DESTROY_SYMBOL: &str = "slotframe_destroy_plugin";

/// 跨边界传递的插件实例句柄
pub type PluginBox = Box<dyn AnalysisPlugin>;

/// 构造函数签名: 初始化参数 → 插件实例句柄 (失败时为空指针)
pub type CreateFn = unsafe extern "C" fn(*const InitArgs) -> *mut PluginBox;

/// 析构函数签名
pub type DestroyFn = unsafe extern "C" fn(*mut PluginBox);

/// 分析插件接口
///
/// 每次运行只有一个实例，所有按槽的状态都放在槽自己的结果对象里，
/// 所以实例方法只拿 `&self`。
pub trait AnalysisPlugin: Send + Sync {
    /// 插件声明的名字, 用作输出和日志文件名前缀
    fn name(&self) -> &str;

    /// 为一个槽创建结果对象
    fn setup_slot(&self, slot: SlotIndex, store: &mut SlotStore) -> Result<()>;

    /// 处理一条记录, 只写本槽的对象
    fn process(&self, slot: SlotIndex, record: &Record, store: &mut SlotStore) -> Result<()>;

    /// 所有槽合并之后调用一次
    fn on_run_end(&self, _merged: &mut SlotStore) -> Result<()> {
        Ok(())
    }
}

/// 初始化参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitArgs {
    pub plugin_name: String,
    pub slot_count: usize,
    pub parameters: Map<String, Value>,
}

impl InitArgs {
    pub fn new(plugin_name: &str, slot_count: usize) -> Self {
        Self {
            plugin_name: plugin_name.to_string(),
            slot_count,
            parameters: Map::new(),
        }
    }

    pub fn with_parameter(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    /// 读取参数; 不存在时为 None, 类型不符时报错
    pub fn parameter<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.parameters.get(key) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|e| {
                FrameError::plugin(&format!("Failed to deserialize parameter '{}': {}", key, e))
            }),
        }
    }

    /// 数值参数, 缺失或非数值时取默认值
    pub fn f64_or(&self, key: &str, default: f64) -> f64 {
        self.parameters
            .get(key)
            .and_then(Value::as_f64)
            .unwrap_or(default)
    }
}

/// 插件清单 (源文件同名的 `.json` 接口文件)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginManifest {
    pub name: String,
    pub version: String,
    pub description: String,
    pub parameters: Map<String, Value>,
}

impl PluginManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FrameError::config(&format!("Failed to read plugin manifest {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            FrameError::config(&format!("Failed to parse plugin manifest {}: {}", path.display(), e))
        })
    }
}

/// `declare_plugin!` 的实现细节
#[doc(hidden)]
pub fn export_plugin<P: AnalysisPlugin + 'static>(
    created: std::thread::Result<Result<P>>,
) -> *mut PluginBox {
    match created {
        Ok(Ok(plugin)) => {
            let boxed: PluginBox = Box::new(plugin);
            Box::into_raw(Box::new(boxed))
        }
        Ok(Err(e)) => {
            tracing::error!("Plugin constructor failed: {}", e);
            std::ptr::null_mut()
        }
        Err(_) => {
            tracing::error!("Plugin constructor panicked");
            std::ptr::null_mut()
        }
    }
}

/// 导出插件的构造/析构符号
///
/// ```ignore
/// slotframe::declare_plugin!(EnergyPlugin, EnergyPlugin::new);
/// ```
///
/// 构造函数签名为 `fn(&InitArgs) -> slotframe::Result<EnergyPlugin>`。
#[macro_export]
macro_rules! declare_plugin {
    ($plugin_type:ty, $constructor:path) => {
        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub unsafe extern "C" fn slotframe_create_plugin(
            args: *const $crate::plugins::InitArgs,
        ) -> *mut $crate::plugins::PluginBox {
            if args.is_null() {
                return ::std::ptr::null_mut();
            }
            let constructor: fn(&$crate::plugins::InitArgs) -> $crate::Result<$plugin_type> =
                $constructor;
            // SAFETY: 宿主保证 args 在调用期间有效
            let args = unsafe { &*args };
            let created =
                ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(|| constructor(args)));
            $crate::plugins::core::export_plugin(created)
        }

        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub unsafe extern "C" fn slotframe_destroy_plugin(plugin: *mut $crate::plugins::PluginBox) {
            if !plugin.is_null() {
                // SAFETY: 指针来自 slotframe_create_plugin 中的 Box::into_raw
                drop(unsafe { Box::from_raw(plugin) });
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_init_args_parameters() {
        let args = InitArgs::new("Energy", 4)
            .with_parameter("gain", 0.5)
            .with_parameter("detectors", json!(["cross", "back"]));

        assert_eq!(args.f64_or("gain", 1.0), 0.5);
        assert_eq!(args.f64_or("offset", 2.0), 2.0);
        let detectors: Option<Vec<String>> = args.parameter("detectors").unwrap();
        assert_eq!(detectors.unwrap(), vec!["cross", "back"]);
        assert!(args.parameter::<u32>("missing").unwrap().is_none());
        assert!(args.parameter::<u32>("detectors").is_err());
    }

    #[test]
    fn test_manifest_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("energy.json");
        std::fs::write(&path, r#"{"name": "Energy", "parameters": {"gain": 2.0}}"#).unwrap();

        let manifest = PluginManifest::load(&path).unwrap();
        assert_eq!(manifest.name, "Energy");
        assert_eq!(manifest.version, "");
        assert_eq!(manifest.parameters["gain"], json!(2.0));

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(PluginManifest::load(&path), Err(FrameError::Config { .. })));
    }

    struct Nothing;

    impl AnalysisPlugin for Nothing {
        fn name(&self) -> &str {
            "Nothing"
        }
        fn setup_slot(&self, _slot: SlotIndex, _store: &mut SlotStore) -> Result<()> {
            Ok(())
        }
        fn process(&self, _slot: SlotIndex, _record: &Record, _store: &mut SlotStore) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_export_plugin() {
        let raw = export_plugin(Ok(Ok(Nothing)));
        assert!(!raw.is_null());
        let plugin = unsafe { Box::from_raw(raw) };
        assert_eq!(plugin.name(), "Nothing");

        assert!(export_plugin::<Nothing>(Ok(Err(FrameError::plugin("bad")))).is_null());
        assert!(export_plugin::<Nothing>(Err(Box::new("panic"))).is_null());
    }
}
