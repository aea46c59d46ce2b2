//! slotframe 错误处理系统
//!
//! 统一的错误类型。只有配置错误和构建/加载错误会终止运行，
//! 对象级别的问题(尺寸超限、合并不一致、输出失败)走 [`crate::core::Diagnostics`]。

use std::path::PathBuf;
use thiserror::Error;

/// 框架统一错误类型
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("No plugin provided! Please provide the location of the plugin source or library in the configuration.")]
    MissingPlugin,

    #[error("Build error: {message} using '{command}'{output}")]
    Build {
        message: String,
        command: String,
        output: String,
    },

    #[error("Failed to load plugin library '{}': {message}", path.display())]
    Load { path: PathBuf, message: String },

    #[error("Failed to find symbol `{symbol}` in plugin library '{}': {message}", path.display())]
    Symbol {
        symbol: String,
        path: PathBuf,
        message: String,
    },

    #[error("Plugin '{}' is already loaded, refusing to load '{}'", loaded.display(), requested.display())]
    AlreadyLoaded { loaded: PathBuf, requested: PathBuf },

    #[error("Plugin error: {message}")]
    Plugin { message: String },

    #[error("Merge error: {message}")]
    Merge { message: String },

    #[error("Output error at '{path}': {message}")]
    Output { path: String, message: String },
}

impl FrameError {
    /// 创建配置相关错误
    pub fn config(message: &str) -> Self {
        Self::Config {
            message: message.to_string(),
        }
    }

    /// 创建插件相关错误
    pub fn plugin(message: &str) -> Self {
        Self::Plugin {
            message: message.to_string(),
        }
    }

    /// 创建合并相关错误
    pub fn merge(message: &str) -> Self {
        Self::Merge {
            message: message.to_string(),
        }
    }

    /// 创建输出相关错误
    pub fn output(path: &str, message: &str) -> Self {
        Self::Output {
            path: path.to_string(),
            message: message.to_string(),
        }
    }

    /// 构建失败, `command` 是失败的那条命令
    pub fn build(message: &str, command: &str, output: &str) -> Self {
        let output = if output.trim().is_empty() {
            String::new()
        } else {
            format!("\n{}", output.trim_end())
        };
        Self::Build {
            message: message.to_string(),
            command: command.to_string(),
            output,
        }
    }

    /// 是否为运行前的致命错误 (配置、构建、加载)
    pub fn is_fatal_setup(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::MissingPlugin
                | Self::Build { .. }
                | Self::Load { .. }
                | Self::Symbol { .. }
                | Self::AlreadyLoaded { .. }
        )
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, FrameError>;
