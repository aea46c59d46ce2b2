//! 插件注册表
//!
//! 负责一次运行中唯一的插件: 需要时构建、加载并缓存。
//! 注册表是普通的值，由运行器持有，构建器和加载器都可以替换。

use super::compiler::{needs_rebuild, runtime_component, CommandBuilder, PluginBuilder, PluginLayout, PluginSpec};
use super::core::PluginManifest;
use super::dynamic_loader::{DylibLoader, LibraryLoader, LoadedPlugin};
use crate::config::BuildSettings;
use crate::{FrameError, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// 已解析的插件
#[derive(Debug)]
struct Resolved {
    spec: PluginSpec,
    layout: PluginLayout,
    plugin: Arc<LoadedPlugin>,
    manifest: PluginManifest,
}

/// 插件注册表
pub struct PluginRegistry {
    settings: BuildSettings,
    /// 未指定时在第一次构建前按配置创建 [`CommandBuilder`]
    builder: Option<Box<dyn PluginBuilder>>,
    loader: Box<dyn LibraryLoader>,
    current: Option<Resolved>,
    builds: usize,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("current", &self.current.as_ref().map(|r| r.spec.path()))
            .field("builds", &self.builds)
            .finish()
    }
}

impl PluginRegistry {
    pub fn new(settings: BuildSettings) -> Self {
        Self {
            settings,
            builder: None,
            loader: Box::new(DylibLoader),
            current: None,
            builds: 0,
        }
    }

    pub fn with_builder(mut self, builder: Box<dyn PluginBuilder>) -> Self {
        self.builder = Some(builder);
        self
    }

    pub fn with_loader(mut self, loader: Box<dyn LibraryLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// 解析插件: 陈旧时重新构建, 然后加载
    ///
    /// 同一个插件再次解析直接返回缓存; 已有其他插件时报错。
    pub fn resolve(&mut self, spec: &PluginSpec) -> Result<Arc<LoadedPlugin>> {
        if let Some(current) = &self.current {
            if current.spec == *spec {
                debug!("Plugin {} already loaded", spec.path().display());
                return Ok(Arc::clone(&current.plugin));
            }
            return Err(FrameError::AlreadyLoaded {
                loaded: current.spec.path().to_path_buf(),
                requested: spec.path().to_path_buf(),
            });
        }

        let layout = spec.layout(&self.settings);
        if layout.is_source() {
            let runtime = runtime_component(&self.settings)?;
            if needs_rebuild(&layout, &runtime)? {
                let settings = &self.settings;
                let builder = self
                    .builder
                    .get_or_insert_with(|| -> Box<dyn PluginBuilder> {
                        Box::new(CommandBuilder::new(settings, runtime.clone()))
                    });
                builder.build(&layout)?;
                self.builds += 1;
            } else {
                info!("{} is up to date", layout.library().display());
            }
        }

        let plugin = Arc::new(self.loader.load(layout.library())?);

        let manifest_path = layout.manifest();
        let manifest = if manifest_path.is_file() {
            PluginManifest::load(manifest_path)?
        } else {
            debug!("No manifest at {}", manifest_path.display());
            PluginManifest::default()
        };

        self.current = Some(Resolved {
            spec: spec.clone(),
            layout,
            plugin: Arc::clone(&plugin),
            manifest,
        });
        Ok(plugin)
    }

    /// 当前加载的插件
    pub fn loaded(&self) -> Option<Arc<LoadedPlugin>> {
        self.current.as_ref().map(|r| Arc::clone(&r.plugin))
    }

    /// 当前插件的清单
    pub fn manifest(&self) -> Option<&PluginManifest> {
        self.current.as_ref().map(|r| &r.manifest)
    }

    pub fn layout(&self) -> Option<&PluginLayout> {
        self.current.as_ref().map(|r| &r.layout)
    }

    /// 本注册表执行过的构建次数
    pub fn builds(&self) -> usize {
        self.builds
    }

    /// 释放缓存的插件; 库在最后一个实例销毁后卸载
    pub fn teardown(&mut self) {
        if let Some(resolved) = self.current.take() {
            debug!("Releasing plugin {}", resolved.spec.path().display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::core::{AnalysisPlugin, InitArgs, PluginBox};
    use crate::results::SlotStore;
    use crate::types::{Record, SlotIndex};
    use parking_lot::Mutex;
    use std::path::{Path, PathBuf};
    use std::time::{Duration, SystemTime};

    struct Idle;

    impl AnalysisPlugin for Idle {
        fn name(&self) -> &str {
            "Idle"
        }
        fn setup_slot(&self, _slot: SlotIndex, _store: &mut SlotStore) -> Result<()> {
            Ok(())
        }
        fn process(&self, _slot: SlotIndex, _record: &Record, _store: &mut SlotStore) -> Result<()> {
            Ok(())
        }
    }

    #[allow(improper_ctypes_definitions)]
    unsafe extern "C" fn create(_args: *const InitArgs) -> *mut PluginBox {
        let plugin: PluginBox = Box::new(Idle);
        Box::into_raw(Box::new(plugin))
    }

    #[allow(improper_ctypes_definitions)]
    unsafe extern "C" fn destroy(plugin: *mut PluginBox) {
        drop(unsafe { Box::from_raw(plugin) });
    }

    /// 记录调用并生成动态库文件
    #[derive(Clone, Default)]
    struct TouchBuilder {
        calls: Arc<Mutex<Vec<PathBuf>>>,
    }

    impl PluginBuilder for TouchBuilder {
        fn build(&self, layout: &PluginLayout) -> Result<()> {
            std::fs::write(layout.library(), b"library")?;
            self.calls.lock().push(layout.library().to_path_buf());
            Ok(())
        }
    }

    struct FakeLoader;

    impl LibraryLoader for FakeLoader {
        fn load(&self, path: &Path) -> Result<LoadedPlugin> {
            Ok(LoadedPlugin::from_entry_points(path, create, destroy))
        }
    }

    fn touch(path: &Path, time: SystemTime) {
        let file = std::fs::File::options().create(true).write(true).open(path).unwrap();
        file.set_modified(time).unwrap();
    }

    struct Fixture {
        dir: tempfile::TempDir,
        settings: BuildSettings,
        builder: TouchBuilder,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let past = SystemTime::now() - Duration::from_secs(3600);
            let runtime = dir.path().join("slotframe");
            touch(&runtime, past);
            touch(&dir.path().join("energy.rs"), past);
            std::fs::write(dir.path().join("energy.json"), r#"{"name": "Energy", "parameters": {"gain": 2.0}}"#)
                .unwrap();
            touch(&dir.path().join("energy.json"), past);
            let settings = BuildSettings {
                runtime_component: Some(runtime),
                ..BuildSettings::default()
            };
            Self {
                dir,
                settings,
                builder: TouchBuilder::default(),
            }
        }

        fn spec(&self) -> PluginSpec {
            PluginSpec::new(self.dir.path().join("energy.rs"))
        }

        fn registry(&self) -> PluginRegistry {
            PluginRegistry::new(self.settings.clone())
                .with_builder(Box::new(self.builder.clone()))
                .with_loader(Box::new(FakeLoader))
        }
    }

    #[test]
    fn test_resolve_builds_once() {
        let fixture = Fixture::new();
        let mut registry = fixture.registry();

        let first = registry.resolve(&fixture.spec()).unwrap();
        let second = registry.resolve(&fixture.spec()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.builds(), 1);
        assert_eq!(fixture.builder.calls.lock().len(), 1);

        let manifest = registry.manifest().unwrap();
        assert_eq!(manifest.name, "Energy");
        assert_eq!(manifest.parameters["gain"], serde_json::json!(2.0));

        let instance = first.instantiate(&InitArgs::new("Energy", 1)).unwrap();
        assert_eq!(instance.name(), "Idle");
    }

    #[test]
    fn test_fresh_library_is_not_rebuilt() {
        let fixture = Fixture::new();
        fixture.registry().resolve(&fixture.spec()).unwrap();

        // 新的注册表 (下一次运行)
        let mut registry = fixture.registry();
        registry.resolve(&fixture.spec()).unwrap();
        assert_eq!(registry.builds(), 0);
        assert_eq!(fixture.builder.calls.lock().len(), 1);
    }

    #[test]
    fn test_touched_interface_triggers_rebuild() {
        let fixture = Fixture::new();
        fixture.registry().resolve(&fixture.spec()).unwrap();
        let library = fixture.spec().layout(&fixture.settings).library().to_path_buf();
        touch(&library, SystemTime::now() - Duration::from_secs(60));
        touch(&fixture.dir.path().join("energy.json"), SystemTime::now());

        let mut registry = fixture.registry();
        registry.resolve(&fixture.spec()).unwrap();
        assert_eq!(registry.builds(), 1);
    }

    #[test]
    fn test_second_plugin_rejected_until_teardown() {
        let fixture = Fixture::new();
        let mut registry = fixture.registry();
        registry.resolve(&fixture.spec()).unwrap();

        let other = PluginSpec::new(fixture.dir.path().join("timing.so"));
        let result = registry.resolve(&other);
        assert!(matches!(result, Err(FrameError::AlreadyLoaded { .. })));

        registry.teardown();
        assert!(registry.loaded().is_none());
        // 预编译库不经过构建
        registry.resolve(&other).unwrap();
        assert_eq!(registry.builds(), 1);
        assert_eq!(registry.manifest().unwrap(), &PluginManifest::default());
    }
}
