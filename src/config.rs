//! slotframe 配置管理系统
//!
//! YAML (或 TOML) 配置文件驱动一次运行: 输入、插件、构建命令、尺寸上限、输出和日志。

use crate::results::DEFAULT_MAX_OBJECT_BYTES;
use crate::{FrameError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// 框架配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// 运行设置
    pub run: RunSettings,
    /// 插件设置
    pub plugin: PluginSettings,
    /// 插件构建设置
    pub build: BuildSettings,
    /// 对象尺寸上限
    pub limits: LimitSettings,
    /// 输出设置
    pub output: OutputSettings,
    /// 日志配置
    pub logging: LoggingConfig,
}

/// 运行设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// 输入文件, 按顺序串联
    pub inputs: Vec<PathBuf>,
    /// 工作槽数, 0 视为 1
    pub max_workers: usize,
    /// 运行标记; 为空时由输入文件名推导
    pub run_token: Option<String>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            max_workers: num_cpus::get(),
            run_token: None,
        }
    }
}

impl RunSettings {
    /// 实际槽数
    pub fn slot_count(&self) -> usize {
        self.max_workers.max(1)
    }
}

/// 插件设置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSettings {
    /// 插件源文件或预编译动态库
    pub path: Option<PathBuf>,
    /// 传给插件的参数, 覆盖清单中的同名参数
    pub parameters: Map<String, Value>,
}

/// 插件构建设置
///
/// 命令模板中可用的占位符: `{source}` `{object}` `{library}` `{include_dir}` `{runtime_dir}`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSettings {
    /// 源文件扩展名
    pub source_extension: String,
    /// 接口文件 (插件清单) 扩展名
    pub interface_extension: String,
    /// 中间目标文件扩展名
    pub object_extension: String,
    /// 编译命令模板
    pub compile_command: String,
    /// 链接命令模板
    pub link_command: String,
    /// 运行时组件; 为空时使用当前可执行文件
    pub runtime_component: Option<PathBuf>,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            source_extension: "rs".to_string(),
            interface_extension: "json".to_string(),
            object_extension: "a".to_string(),
            compile_command: "rustc --edition=2021 --crate-type=staticlib -g -C relocation-model=pic \
                -L {runtime_dir} -L {runtime_dir}/deps \
                --extern slotframe={runtime_dir}/libslotframe.rlib -o {object} {source}"
                .to_string(),
            link_command: "cc -shared -fPIC -g -o {library} -Wl,--whole-archive {object} \
                -Wl,--no-whole-archive -lpthread -ldl -lm"
                .to_string(),
            runtime_component: None,
        }
    }
}

/// 尺寸上限
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitSettings {
    /// 单个对象序列化后的最大字节数
    pub max_object_bytes: u64,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_object_bytes: DEFAULT_MAX_OBJECT_BYTES,
        }
    }
}

/// 输出设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// 输出根目录, 每次运行在下面建 `<插件名><运行标记>` 目录
    pub directory: PathBuf,
    /// 是否 gzip 压缩对象文件
    pub compress: bool,
    /// 诊断日志目录; 为空时写在输出根目录
    pub log_directory: Option<PathBuf>,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("output"),
            compress: false,
            log_directory: None,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: LogLevel,
    /// 是否启用详细日志 (显示模块路径和线程)
    pub verbose: bool,
}

/// 日志级别
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// 配置文件格式, 由扩展名决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Yaml,
    Toml,
}

impl ConfigFormat {
    fn of(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::Toml,
            _ => Self::Yaml,
        }
    }
}

/// 配置管理器
#[derive(Debug)]
pub struct ConfigManager {
    config: FrameConfig,
}

impl ConfigManager {
    /// 从文件加载配置
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| FrameError::config(&format!("Failed to read config file {}: {}", path.display(), e)))?;

        let config: FrameConfig = match ConfigFormat::of(path) {
            ConfigFormat::Yaml => serde_yaml::from_str(&content)
                .map_err(|e| FrameError::config(&format!("Failed to parse config file: {}", e)))?,
            ConfigFormat::Toml => toml::from_str(&content)
                .map_err(|e| FrameError::config(&format!("Failed to parse config file: {}", e)))?,
        };

        Ok(Self { config })
    }

    /// 由已有配置创建
    pub fn from_config(config: FrameConfig) -> Self {
        Self { config }
    }

    /// 创建默认配置
    pub fn new_default() -> Self {
        Self {
            config: FrameConfig::default(),
        }
    }

    /// 保存配置到文件
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = match ConfigFormat::of(path) {
            ConfigFormat::Yaml => serde_yaml::to_string(&self.config)
                .map_err(|e| FrameError::config(&format!("Failed to serialize config: {}", e)))?,
            ConfigFormat::Toml => toml::to_string_pretty(&self.config)
                .map_err(|e| FrameError::config(&format!("Failed to serialize config: {}", e)))?,
        };

        tokio::fs::write(path, content)
            .await
            .map_err(|e| FrameError::config(&format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// 获取配置
    pub fn get_config(&self) -> &FrameConfig {
        &self.config
    }

    /// 获取可变配置
    pub fn get_config_mut(&mut self) -> &mut FrameConfig {
        &mut self.config
    }

    pub fn into_config(self) -> FrameConfig {
        self.config
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        let config = &self.config;

        if config.plugin.path.is_none() {
            return Err(FrameError::MissingPlugin);
        }

        if config.run.inputs.is_empty() {
            return Err(FrameError::config("At least one input file must be given"));
        }

        if config.limits.max_object_bytes == 0 {
            return Err(FrameError::config("Maximum object size must be positive"));
        }

        let build = &config.build;
        if build.compile_command.trim().is_empty() || build.link_command.trim().is_empty() {
            return Err(FrameError::config("Compile and link commands cannot be empty"));
        }
        if build.source_extension.is_empty() || build.object_extension.is_empty() {
            return Err(FrameError::config("Build file extensions cannot be empty"));
        }

        if let Some(token) = &config.run.run_token {
            if token.contains(std::path::MAIN_SEPARATOR) || token.contains('/') {
                return Err(FrameError::config("Run token cannot contain a path separator"));
            }
        }

        tracing::info!("Configuration validation passed");
        Ok(())
    }
}

/// 生成默认配置文件
pub async fn generate_default_config_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let mut config_manager = ConfigManager::new_default();
    let config = config_manager.get_config_mut();
    config.run.inputs = vec![PathBuf::from("data/run042.jsonl")];
    config.plugin.path = Some(PathBuf::from("demos/energy_plugin.rs"));
    config_manager.save_to_file(path).await?;
    Ok(())
}
