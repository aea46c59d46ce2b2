//! 插件构建
//!
//! 由插件路径推导出接口文件、中间目标文件和动态库的位置，
//! 判断动态库是否陈旧，需要时分编译、链接两步重新构建。

use crate::config::BuildSettings;
use crate::{FrameError, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::SystemTime;
use tracing::{debug, info};

/// 用户给出的插件路径
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PluginSpec {
    path: PathBuf,
}

impl PluginSpec {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 推导相关文件的位置
    pub fn layout(&self, settings: &BuildSettings) -> PluginLayout {
        let is_source = self
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e == settings.source_extension);

        if is_source {
            PluginLayout::Source {
                source: self.path.clone(),
                interface: self.path.with_extension(&settings.interface_extension),
                object: self.path.with_extension(&settings.object_extension),
                library: self.path.with_extension(std::env::consts::DLL_EXTENSION),
            }
        } else {
            PluginLayout::Prebuilt {
                library: self.path.clone(),
                manifest: self.path.with_extension("json"),
            }
        }
    }
}

/// 插件相关文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginLayout {
    /// 可构建的源文件
    Source {
        source: PathBuf,
        interface: PathBuf,
        object: PathBuf,
        library: PathBuf,
    },
    /// 预编译动态库, 原样加载
    Prebuilt { library: PathBuf, manifest: PathBuf },
}

impl PluginLayout {
    /// 要加载的动态库
    pub fn library(&self) -> &Path {
        match self {
            Self::Source { library, .. } | Self::Prebuilt { library, .. } => library,
        }
    }

    /// 插件清单 (可能不存在)
    pub fn manifest(&self) -> &Path {
        match self {
            Self::Source { interface, .. } => interface,
            Self::Prebuilt { manifest, .. } => manifest,
        }
    }

    pub fn is_source(&self) -> bool {
        matches!(self, Self::Source { .. })
    }
}

/// 运行时组件: 配置指定的文件, 否则为当前可执行文件
pub fn runtime_component(settings: &BuildSettings) -> Result<PathBuf> {
    match &settings.runtime_component {
        Some(path) => Ok(path.clone()),
        None => std::env::current_exe().map_err(|e| {
            FrameError::build(&format!("cannot locate the running executable: {}", e), "", "")
        }),
    }
}

fn modified(path: &Path) -> Result<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).map_err(|e| {
        FrameError::build(&format!("failed to stat {}: {}", path.display(), e), "", "")
    })
}

/// 是否需要重新构建
///
/// 动态库不存在时需要; 否则只有当动态库严格新于源文件、接口文件和运行时组件时才跳过。
/// 预编译动态库从不重建。
pub fn needs_rebuild(layout: &PluginLayout, runtime: &Path) -> Result<bool> {
    let PluginLayout::Source {
        source,
        interface,
        library,
        ..
    } = layout
    else {
        return Ok(false);
    };

    if !library.exists() {
        debug!("{} does not exist yet", library.display());
        return Ok(true);
    }

    let source_time = modified(source)?;
    let interface_time = modified(interface)?;
    let runtime_time = modified(runtime)?;
    let library_time = modified(library)?;

    let newest_input = source_time.max(interface_time).max(runtime_time);
    Ok(library_time <= newest_input)
}

/// 插件构建器
pub trait PluginBuilder: Send + Sync {
    fn build(&self, layout: &PluginLayout) -> Result<()>;
}

/// 用 shell 命令构建: 先编译, 再链接
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    compile_command: String,
    link_command: String,
    runtime: PathBuf,
}

impl CommandBuilder {
    pub fn new(settings: &BuildSettings, runtime: PathBuf) -> Self {
        Self {
            compile_command: settings.compile_command.clone(),
            link_command: settings.link_command.clone(),
            runtime,
        }
    }

    /// 替换命令模板中的占位符
    pub fn render(template: &str, source: &Path, object: &Path, library: &Path, runtime: &Path) -> String {
        let include_dir = parent_or_dot(source);
        let runtime_dir = parent_or_dot(runtime);
        template
            .replace("{source}", &source.display().to_string())
            .replace("{object}", &object.display().to_string())
            .replace("{library}", &library.display().to_string())
            .replace("{include_dir}", &include_dir.display().to_string())
            .replace("{runtime_dir}", &runtime_dir.display().to_string())
    }

    fn run(&self, step: &str, command_line: &str) -> Result<()> {
        debug!("{}: {}", step, command_line);
        let output = shell(command_line)
            .output()
            .map_err(|e| FrameError::build(&format!("failed to start {}: {}", step, e), command_line, ""))?;

        if !output.status.success() {
            let captured = format!(
                "{}{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
            return Err(FrameError::build(
                &format!("{} failed ({})", step, output.status),
                command_line,
                &captured,
            ));
        }
        Ok(())
    }
}

impl PluginBuilder for CommandBuilder {
    fn build(&self, layout: &PluginLayout) -> Result<()> {
        let PluginLayout::Source {
            source,
            object,
            library,
            ..
        } = layout
        else {
            return Ok(());
        };

        info!("Starting compilation of {}", source.display());
        let compile = Self::render(&self.compile_command, source, object, library, &self.runtime);
        self.run("compilation", &compile)?;

        info!("Starting linking of {}", library.display());
        let link = Self::render(&self.link_command, source, object, library, &self.runtime);
        self.run("linking", &link)?;

        info!("Done building {}", library.display());
        Ok(())
    }
}

fn parent_or_dot(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(unix)]
fn shell(command_line: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(command_line);
    command
}

#[cfg(windows)]
fn shell(command_line: &str) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C").arg(command_line);
    command
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;

    fn touch(path: &Path, time: SystemTime) {
        let file = File::options().create(true).write(true).open(path).unwrap();
        file.set_modified(time).unwrap();
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        layout: PluginLayout,
        runtime: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let spec = PluginSpec::new(dir.path().join("energy.rs"));
        let layout = spec.layout(&BuildSettings::default());
        let runtime = dir.path().join("runtime");
        let base = SystemTime::now() - Duration::from_secs(3600);
        if let PluginLayout::Source { source, interface, .. } = &layout {
            touch(source, base);
            touch(interface, base);
        }
        touch(&runtime, base);
        Fixture {
            _dir: dir,
            layout,
            runtime,
        }
    }

    #[test]
    fn test_layout_from_source() {
        let spec = PluginSpec::new("/work/EnergyHelper.rs");
        let layout = spec.layout(&BuildSettings::default());
        match &layout {
            PluginLayout::Source {
                interface, object, library, ..
            } => {
                assert_eq!(interface, Path::new("/work/EnergyHelper.json"));
                assert_eq!(object, Path::new("/work/EnergyHelper.a"));
                assert_eq!(
                    library.extension().unwrap(),
                    std::env::consts::DLL_EXTENSION
                );
            }
            other => panic!("unexpected layout {:?}", other),
        }
        assert_eq!(layout.manifest(), Path::new("/work/EnergyHelper.json"));
    }

    #[test]
    fn test_layout_prebuilt() {
        let layout = PluginSpec::new("/work/libenergy.so").layout(&BuildSettings::default());
        assert!(!layout.is_source());
        assert_eq!(layout.library(), Path::new("/work/libenergy.so"));
        assert_eq!(layout.manifest(), Path::new("/work/libenergy.json"));
    }

    #[test]
    fn test_missing_library_needs_rebuild() {
        let f = fixture();
        assert!(needs_rebuild(&f.layout, &f.runtime).unwrap());
    }

    #[test]
    fn test_newer_library_is_fresh() {
        let f = fixture();
        touch(f.layout.library(), SystemTime::now());
        assert!(!needs_rebuild(&f.layout, &f.runtime).unwrap());
    }

    #[test]
    fn test_equal_times_rebuild() {
        let f = fixture();
        let time = SystemTime::now() - Duration::from_secs(60);
        touch(f.layout.library(), time);
        touch(&f.runtime, time);
        assert!(needs_rebuild(&f.layout, &f.runtime).unwrap());
    }

    #[test]
    fn test_touched_source_rebuilds() {
        let f = fixture();
        touch(f.layout.library(), SystemTime::now() - Duration::from_secs(60));
        if let PluginLayout::Source { source, .. } = &f.layout {
            touch(source, SystemTime::now());
        }
        assert!(needs_rebuild(&f.layout, &f.runtime).unwrap());
    }

    #[test]
    fn test_missing_interface_is_error() {
        let f = fixture();
        touch(f.layout.library(), SystemTime::now());
        std::fs::remove_file(f.layout.manifest()).unwrap();
        assert!(matches!(needs_rebuild(&f.layout, &f.runtime), Err(FrameError::Build { .. })));
    }

    #[test]
    fn test_render_placeholders() {
        let command = CommandBuilder::render(
            "cc -I{include_dir} -L{runtime_dir} -c {source} -o {object} && ld {library}",
            Path::new("src/energy.rs"),
            Path::new("src/energy.a"),
            Path::new("src/energy.so"),
            Path::new("/opt/slotframe/bin/slotframe"),
        );
        assert_eq!(
            command,
            "cc -Isrc -L/opt/slotframe/bin -c src/energy.rs -o src/energy.a && ld src/energy.so"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_command_builder_runs_both_steps() {
        let f = fixture();
        let settings = BuildSettings {
            compile_command: "cp {source} {object}".to_string(),
            link_command: "cp {object} {library}".to_string(),
            ..BuildSettings::default()
        };
        let builder = CommandBuilder::new(&settings, f.runtime.clone());
        builder.build(&f.layout).unwrap();
        assert!(f.layout.library().exists());
        assert!(!needs_rebuild(&f.layout, &f.runtime).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_compile_skips_link() {
        let f = fixture();
        let settings = BuildSettings {
            compile_command: "echo broken plugin >&2; exit 3".to_string(),
            link_command: "touch {library}".to_string(),
            ..BuildSettings::default()
        };
        let builder = CommandBuilder::new(&settings, f.runtime.clone());
        let error = builder.build(&f.layout).unwrap_err();
        match &error {
            FrameError::Build { command, output, .. } => {
                assert!(command.starts_with("echo broken plugin"));
                assert!(output.contains("broken plugin"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(!f.layout.library().exists());
    }
}
