//! slotframe 主程序 - 配置驱动运行
//!
//! 通过 YAML/TOML 配置文件驱动一次插件分析运行

use anyhow::Context;
use slotframe::{
    config::{generate_default_config_file, ConfigManager, LoggingConfig},
    data::JsonLinesSource,
    init_logging,
    runner::{format_elapsed, RunOrchestrator, RunSummary},
    FRAMEWORK_NAME, VERSION,
};
use std::env;
use std::path::Path;

const DEFAULT_CONFIG_PATH: &str = "slotframe.yaml";

/// 程序入口点
#[tokio::main]
async fn main() {
    // 运行主逻辑并处理错误
    match run_main().await {
        Ok(_) => {}
        Err(e) => {
            // 配置加载前出错时日志尚未初始化
            init_logging(&LoggingConfig::default());
            tracing::error!("❌ 运行失败: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// 主要逻辑函数
async fn run_main() -> anyhow::Result<()> {
    // 获取命令行参数
    let args: Vec<String> = env::args().collect();

    match args.as_slice() {
        [_, command] if command == "init" => generate_config_file(DEFAULT_CONFIG_PATH).await,
        [_, command, path] if command == "init" => generate_config_file(path).await,
        [_, path] => run_with_config_file(path).await,
        _ => {
            print_usage();
            Ok(())
        }
    }
}

/// 使用配置文件运行
async fn run_with_config_file(config_path: &str) -> anyhow::Result<()> {
    if !Path::new(config_path).exists() {
        anyhow::bail!(
            "配置文件不存在: {} (使用 'slotframe init' 生成默认配置文件)",
            config_path
        );
    }

    // 加载配置
    let config_manager = ConfigManager::load_from_file(config_path)
        .await
        .with_context(|| format!("加载配置文件 {} 失败", config_path))?;
    init_logging(&config_manager.get_config().logging);
    config_manager.validate()?;

    tracing::info!("🚀 启动 {} v{}", FRAMEWORK_NAME, VERSION);
    tracing::info!("📄 配置文件: {}", config_path);

    let config = config_manager.into_config();
    if let Some(plugin) = &config.plugin.path {
        tracing::info!("🔌 插件: {}", plugin.display());
    }
    tracing::info!("🔧 工作槽: {}", config.run.slot_count());

    // 处理循环是同步并行的, 放到阻塞线程上
    let summary = tokio::task::spawn_blocking(move || {
        let source = JsonLinesSource::new(config.run.inputs.clone());
        let mut runner = RunOrchestrator::from_config(config);
        runner.run_to_disk(&source)
    })
    .await
    .context("运行线程异常退出")??;

    display_summary(&summary);
    Ok(())
}

/// 生成默认配置文件
async fn generate_config_file(config_path: &str) -> anyhow::Result<()> {
    init_logging(&LoggingConfig::default());
    tracing::info!("📝 生成默认配置文件: {}", config_path);

    generate_default_config_file(config_path).await?;

    tracing::info!("✅ 配置文件生成完成");
    tracing::info!("🔧 请编辑配置文件后运行: slotframe {}", config_path);
    Ok(())
}

/// 显示运行结果
fn display_summary(summary: &RunSummary) {
    tracing::info!("📈 {} 运行结果 ({}):", summary.plugin, summary.run_token);
    tracing::info!("    🧵 工作槽: {}", summary.slots);
    tracing::info!("    📋 记录: {} (失败 {})", summary.records, summary.failed_records);
    for table in &summary.tables {
        tracing::info!(
            "    📊 表 {}: {} → {} 行",
            table.key,
            table.total_before,
            table.total_after
        );
    }
    if !summary.pruned.is_empty() {
        tracing::warn!("    ✂️  超限移除: {} 个对象", summary.pruned.len());
    }
    tracing::info!(
        "    💾 写出: {} 个分组, {} 个对象",
        summary.groups_written,
        summary.objects_written
    );
    if !summary.diagnostics.is_empty() {
        tracing::warn!(
            "    ⚠️  诊断: {} 条, 见 {}",
            summary.diagnostics.len(),
            summary.log_file.display()
        );
    }
    tracing::info!("    ⏱️  用时: {}", format_elapsed(summary.elapsed));
}

/// 打印使用说明
fn print_usage() {
    println!("{} {}", FRAMEWORK_NAME, VERSION);
    println!();
    println!("用法:");
    println!("  slotframe init [config_file]   # 生成默认配置文件");
    println!("  slotframe <config_file>        # 使用指定配置文件运行");
    println!();
    println!("配置文件格式: YAML (.yaml/.yml) 或 TOML (.toml)");
}
