//! slotframe 运行器
//!
//! 驱动一次完整运行: 解析插件 → 建立各槽 → 并行处理 → 尺寸检查 → 合并 →
//! 结束钩子 → 写出 → 诊断日志。

use crate::config::FrameConfig;
use crate::core::{Diagnostic, DiagnosticKind, Diagnostics, Progress};
use crate::data::RecordSource;
use crate::output::{write_store, FsOutputStore, OutputStore};
use crate::plugins::{InitArgs, PluginInstance, PluginRegistry, PluginSpec};
use crate::results::{setup, GuardPhase, MergeEngine, PrunedObject, ResultObject, SizeGuard, SlotStore, TableMergeReport};
use crate::types::{ObjectKey, Record, SlotIndex};
use crate::{FrameError, Result};
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// 逐条报告的记录级错误数
const REPORTED_RECORD_ERRORS: u64 = 10;

/// 运行结果摘要
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub plugin: String,
    pub run_token: String,
    pub started_at: DateTime<Local>,
    pub slots: usize,
    /// 分发的记录数
    pub records: u64,
    /// 处理失败或槽号越界的记录数
    pub failed_records: u64,
    pub pruned: Vec<PrunedObject>,
    pub tables: Vec<TableMergeReport>,
    pub diagnostics: Vec<Diagnostic>,
    pub groups_written: usize,
    pub objects_written: usize,
    pub log_file: PathBuf,
    pub elapsed: Duration,
}

/// 运行器
#[derive(Debug)]
pub struct RunOrchestrator {
    config: FrameConfig,
    registry: PluginRegistry,
    guard: SizeGuard,
    merger: MergeEngine,
}

impl RunOrchestrator {
    pub fn new(config: FrameConfig, registry: PluginRegistry, guard: SizeGuard) -> Self {
        Self {
            config,
            registry,
            guard,
            merger: MergeEngine::new(),
        }
    }

    /// 按配置创建默认的注册表和尺寸检查器
    pub fn from_config(config: FrameConfig) -> Self {
        let registry = PluginRegistry::new(config.build.clone());
        let guard = SizeGuard::with_limit(config.limits.max_object_bytes);
        Self::new(config, registry, guard)
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut PluginRegistry {
        &mut self.registry
    }

    /// 运行标记: 配置值, 否则由输入文件名推导
    pub fn run_token(&self) -> String {
        match &self.config.run.run_token {
            Some(token) => token.clone(),
            None => derive_run_token(&self.config.run.inputs),
        }
    }

    /// 本次运行的输出目录
    pub fn output_dir(&self, plugin_name: &str) -> PathBuf {
        self.config
            .output
            .directory
            .join(format!("{}{}", plugin_name, self.run_token()))
    }

    /// 诊断日志文件
    pub fn log_file(&self, plugin_name: &str) -> PathBuf {
        let dir = self
            .config
            .output
            .log_directory
            .as_deref()
            .unwrap_or(&self.config.output.directory);
        dir.join(format!("{}{}.log", plugin_name, self.run_token()))
    }

    /// 运行并写到给定的存储
    pub fn run(&mut self, source: &dyn RecordSource, output: &mut dyn OutputStore) -> Result<RunSummary> {
        let started = Instant::now();
        let (plugin, args) = self.start()?;
        self.execute(&plugin, &args, source, output, started)
    }

    /// 运行并写到 `<输出目录>/<插件名><运行标记>`
    pub fn run_to_disk(&mut self, source: &dyn RecordSource) -> Result<RunSummary> {
        let started = Instant::now();
        let (plugin, args) = self.start()?;
        let mut output = FsOutputStore::new(self.output_dir(plugin.name()), self.config.output.compress);
        self.execute(&plugin, &args, source, &mut output, started)
    }

    /// 解析、加载并实例化插件
    fn start(&mut self) -> Result<(PluginInstance, InitArgs)> {
        let path = self.config.plugin.path.clone().ok_or(FrameError::MissingPlugin)?;
        let spec = PluginSpec::new(&path);
        let loaded = self.registry.resolve(&spec)?;

        let manifest = self.registry.manifest().cloned().unwrap_or_default();
        let name = if manifest.name.is_empty() {
            plugin_stem(&path)
        } else {
            manifest.name.clone()
        };

        let mut args = InitArgs::new(&name, self.config.run.slot_count());
        args.parameters = manifest.parameters;
        for (key, value) in &self.config.plugin.parameters {
            args.parameters.insert(key.clone(), value.clone());
        }
        let plugin = loaded.instantiate(&args)?;
        Ok((plugin, args))
    }

    fn execute(
        &self,
        plugin: &PluginInstance,
        args: &InitArgs,
        source: &dyn RecordSource,
        output: &mut dyn OutputStore,
        started: Instant,
    ) -> Result<RunSummary> {
        let started_at = Local::now();
        let slot_count = self.config.run.slot_count();
        let run_token = self.run_token();
        let mut diagnostics = Diagnostics::new();
        info!(
            "Running {} on {} slots (run '{}', started {})",
            plugin.name(),
            slot_count,
            run_token,
            started_at.format("%Y-%m-%d %H:%M:%S")
        );

        let stores = setup(slot_count, &**plugin, &self.guard, &mut diagnostics)?;
        let (mut stores, records, failed_records) = self.process(plugin, source, stores)?;

        let mut pruned = Vec::new();
        for store in &mut stores {
            pruned.extend(self.guard.check(store, GuardPhase::PreWrite, &mut diagnostics));
        }

        let outcome = self.merger.merge(&stores, &mut diagnostics)?;
        drop(stores);
        let mut merged = outcome.store;

        if let Err(e) = plugin.on_run_end(&mut merged) {
            diagnostics.error(
                DiagnosticKind::PluginHook,
                None,
                plugin.name(),
                format!("{} end-of-run hook failed: {}", plugin.name(), e),
            );
        }

        // 结束钩子可能新增对象, 尺寸检查放在它之后
        record_parameters(&mut merged, args, &mut diagnostics);
        pruned.extend(self.guard.check(&mut merged, GuardPhase::PostMerge, &mut diagnostics));

        let report = write_store(&merged, output, &mut diagnostics);

        let log_file = self.log_file(plugin.name());
        if let Err(e) = diagnostics.write_log(&log_file) {
            error!("Failed to write diagnostics log {}: {}", log_file.display(), e);
        }

        let elapsed = started.elapsed();
        info!("Done after {}", format_elapsed(elapsed));

        Ok(RunSummary {
            plugin: plugin.name().to_string(),
            run_token,
            started_at,
            slots: slot_count,
            records,
            failed_records,
            pruned,
            tables: outcome.tables,
            diagnostics: diagnostics.entries().to_vec(),
            groups_written: report.groups_written,
            objects_written: report.objects_written,
            log_file,
            elapsed,
        })
    }

    /// 并行处理; 每个槽一把锁, 只有该槽的工作线程会去拿
    fn process(
        &self,
        plugin: &PluginInstance,
        source: &dyn RecordSource,
        stores: Vec<SlotStore>,
    ) -> Result<(Vec<SlotStore>, u64, u64)> {
        let slots: Vec<Mutex<SlotStore>> = stores.into_iter().map(Mutex::new).collect();
        let progress = Progress::new(source.total_records());
        let failed = AtomicU64::new(0);

        let report_failure = |message: String| {
            let count = failed.fetch_add(1, Ordering::Relaxed) + 1;
            if count <= REPORTED_RECORD_ERRORS {
                warn!("{}", message);
            } else if count == REPORTED_RECORD_ERRORS + 1 {
                warn!("Further record errors are suppressed");
            }
        };

        let visit = |slot: SlotIndex, record: Record| {
            progress.tick();
            let Some(cell) = slots.get(slot) else {
                report_failure(format!("Record routed to slot {} of {}", slot, slots.len()));
                return;
            };
            let mut store = cell.lock();
            if let Err(e) = plugin.process(slot, &record, &mut store) {
                report_failure(format!("{}. slot: failed to process record: {}", slot, e));
            }
        };

        let records = source.for_each_record(slots.len(), &visit)?;
        let failed = failed.load(Ordering::Relaxed);
        info!("Processed {} records ({} failed)", records, failed);

        let stores = slots.into_iter().map(Mutex::into_inner).collect();
        Ok((stores, records, failed))
    }
}

/// 合并结果中记录参数对象的名字 (根分组)
pub const PARAMETERS_OBJECT: &str = "parameters";

/// 把插件实际拿到的参数 (清单 + 配置覆盖) 随结果一起写出
fn record_parameters(merged: &mut SlotStore, args: &InitArgs, diagnostics: &mut Diagnostics) {
    let snapshot = ResultObject::opaque(
        ObjectKey::root(PARAMETERS_OBJECT),
        "Parameters",
        Value::Object(args.parameters.clone()),
    );
    if let Err(e) = merged.insert(snapshot) {
        diagnostics.warning(
            DiagnosticKind::OutputWrite,
            None,
            PARAMETERS_OBJECT,
            format!("parameters are not written: {}", e),
        );
    }
}

/// 由输入文件名推导运行标记
///
/// 取第一个文件名 (去掉所有扩展名) 的最后三个字符；多个输入时再接上 `-` 和最后一个文件的标记。
pub fn derive_run_token(inputs: &[PathBuf]) -> String {
    match inputs {
        [] => String::new(),
        [only] => file_token(only),
        [first, .., last] => format!("{}-{}", file_token(first), file_token(last)),
    }
}

fn file_token(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.split('.').next().unwrap_or_default();
    let chars: Vec<char> = stem.chars().collect();
    chars[chars.len().saturating_sub(3)..].iter().collect()
}

fn plugin_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "plugin".to_string())
}

/// `h:mm:ss.sss`
pub fn format_elapsed(elapsed: Duration) -> String {
    let millis = elapsed.as_millis();
    let hours = millis / 3_600_000;
    let minutes = (millis / 60_000) % 60;
    let seconds = (millis / 1000) % 60;
    format!("{}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis % 1000)
}
