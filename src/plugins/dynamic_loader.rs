//! 动态插件加载器
//!
//! 打开插件动态库并解析构造/析构两个符号。两个符号都找到之后才会产生
//! [`LoadedPlugin`]，调用方永远看不到只加载了一半的插件。

use super::core::{AnalysisPlugin, CreateFn, DestroyFn, InitArgs, PluginBox, CREATE_SYMBOL, DESTROY_SYMBOL};
use crate::{FrameError, Result};
use libloading::{Library, Symbol};
use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;
use tracing::{debug, info};

/// 动态库加载器
pub trait LibraryLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<LoadedPlugin>;
}

/// 已加载的插件动态库
pub struct LoadedPlugin {
    path: PathBuf,
    create: CreateFn,
    destroy: DestroyFn,
    // 最后释放: 函数指针在库卸载后失效
    _library: Option<Library>,
}

impl fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedPlugin")
            .field("path", &self.path)
            .field("dynamic", &self._library.is_some())
            .finish()
    }
}

impl LoadedPlugin {
    /// 由进程内的入口函数构造, 不对应任何动态库
    pub fn from_entry_points(path: impl Into<PathBuf>, create: CreateFn, destroy: DestroyFn) -> Self {
        Self {
            path: path.into(),
            create,
            destroy,
            _library: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 调用构造函数创建插件实例
    pub fn instantiate(self: &Arc<Self>, args: &InitArgs) -> Result<PluginInstance> {
        // SAFETY: create 来自已解析的符号 (或进程内函数), args 在调用期间有效
        let raw = unsafe { (self.create)(args as *const InitArgs) };
        let plugin = NonNull::new(raw).ok_or_else(|| FrameError::Load {
            path: self.path.clone(),
            message: format!("{} returned no plugin instance", CREATE_SYMBOL),
        })?;

        let instance = PluginInstance {
            plugin,
            owner: Arc::clone(self),
        };
        info!("Created plugin '{}' from {}", instance.name(), self.path.display());
        Ok(instance)
    }
}

/// 插件实例
///
/// 解引用为 `dyn AnalysisPlugin`。持有库的引用计数，析构时调用插件的析构函数。
pub struct PluginInstance {
    plugin: NonNull<PluginBox>,
    owner: Arc<LoadedPlugin>,
}

// SAFETY: PluginBox 指向的对象满足 AnalysisPlugin: Send + Sync
unsafe impl Send for PluginInstance {}
unsafe impl Sync for PluginInstance {}

impl PluginInstance {
    /// 来源动态库
    pub fn library(&self) -> &Path {
        self.owner.path()
    }
}

impl Deref for PluginInstance {
    type Target = dyn AnalysisPlugin;

    fn deref(&self) -> &Self::Target {
        // SAFETY: 指针非空, 直到 drop 前一直有效
        unsafe { self.plugin.as_ref().as_ref() }
    }
}

impl fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginInstance")
            .field("name", &self.name())
            .field("library", &self.owner.path)
            .finish()
    }
}

impl Drop for PluginInstance {
    fn drop(&mut self) {
        debug!("Destroying plugin instance from {}", self.owner.path.display());
        // SAFETY: 指针来自同一个库的构造函数, 只析构一次
        unsafe { (self.owner.destroy)(self.plugin.as_ptr()) };
    }
}

/// 基于 libloading 的加载器
#[derive(Debug, Clone, Copy, Default)]
pub struct DylibLoader;

impl DylibLoader {
    fn resolve<T: Copy>(library: &Library, symbol: &str, path: &Path) -> Result<T> {
        // SAFETY: 符号类型由 declare_plugin! 生成的签名保证
        let found: Symbol<T> = unsafe { library.get(symbol.as_bytes()) }.map_err(|e| FrameError::Symbol {
            symbol: symbol.to_string(),
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(*found)
    }
}

impl LibraryLoader for DylibLoader {
    fn load(&self, path: &Path) -> Result<LoadedPlugin> {
        if !path.is_file() {
            return Err(FrameError::Load {
                path: path.to_path_buf(),
                message: "library does not exist or is not accessible".to_string(),
            });
        }

        // SAFETY: 加载外部库会执行其初始化代码, 插件库按约定是可信的
        let library = unsafe { Library::new(path) }.map_err(|e| FrameError::Load {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let create: CreateFn = Self::resolve(&library, CREATE_SYMBOL, path)?;
        let destroy: DestroyFn = Self::resolve(&library, DESTROY_SYMBOL, path)?;

        info!("Loaded plugin library {}", path.display());
        Ok(LoadedPlugin {
            path: path.to_path_buf(),
            create,
            destroy,
            _library: Some(library),
        })
    }
}
