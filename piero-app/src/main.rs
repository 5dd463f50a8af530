use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use piero_config::{AppConfig, ConfigError};
use piero_engine::{Viewer, command::CommandResponse, host::NotificationLevel};
use piero_io::ImportSource;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

mod demo;

/// 无界面的场景交互演示：导入 GeoJSON 标注与量测，运行脚本化交互并导出结果。
#[derive(Debug, Parser)]
#[command(name = "piero", version)]
struct Cli {
    /// 配置文件路径，缺省时按 `PIERO_CONFIG` 或 `config/default.toml` 查找
    #[arg(long)]
    config: Option<PathBuf>,
    /// 导入的标注 GeoJSON 文件
    #[arg(long = "annotations", value_name = "FILE")]
    annotations: Vec<PathBuf>,
    /// 导入的量测 GeoJSON 文件
    #[arg(long = "measures", value_name = "FILE")]
    measures: Vec<PathBuf>,
    #[arg(long, value_name = "FILE")]
    export_annotations: Option<PathBuf>,
    #[arg(long, value_name = "FILE")]
    export_measures: Option<PathBuf>,
    /// 跳过内置演示脚本
    #[arg(long)]
    no_demo: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_configuration(cli.config.clone());
    init_logging(&config);
    info!("启动 Piero 场景交互演示");

    let mut viewer = Viewer::new(&config);
    let mut bench = demo::Workbench::new();

    if !cli.annotations.is_empty() {
        let sources = cli.annotations.iter().cloned().map(ImportSource::Path).collect();
        viewer.store_mut().import_annotation_files(sources);
    }
    if !cli.measures.is_empty() {
        let sources = cli.measures.iter().cloned().map(ImportSource::Path).collect();
        viewer.store_mut().import_measure_files(sources);
    }
    report(&viewer.process_commands(&mut bench.host()));

    if !cli.no_demo {
        demo::run(&mut viewer, &mut bench)?;
    }

    if let Some(path) = cli.export_annotations {
        viewer.store_mut().export_annotations(path);
    }
    if let Some(path) = cli.export_measures {
        viewer.store_mut().export_measures(path);
    }
    let responses = viewer.process_commands(&mut bench.host());
    report(&responses);

    for notification in bench.notifications.entries() {
        match notification.level {
            NotificationLevel::Warning => {
                warn!(title = %notification.title, "{}", notification.text)
            }
            _ => info!(title = %notification.title, "{}", notification.text),
        }
    }

    if let Some(failed) = responses.iter().find(|response| !response.success) {
        bail!(
            "导出失败: {}",
            failed.message.as_deref().unwrap_or("未知错误")
        );
    }
    Ok(())
}

fn report(responses: &[CommandResponse]) {
    for response in responses {
        let message = response.message.as_deref().unwrap_or_default();
        if response.success {
            println!("{message}");
        } else {
            eprintln!("{message}");
        }
    }
}

fn load_configuration(override_path: Option<PathBuf>) -> AppConfig {
    match override_path {
        Some(path) => AppConfig::from_file(&path).unwrap_or_else(|err| {
            warn!(path = %path.display(), error = %err, "加载指定配置失败，使用默认配置");
            AppConfig::default()
        }),
        None => match AppConfig::discover() {
            Ok(cfg) => cfg,
            Err(err) => {
                match &err {
                    ConfigError::Io { path, .. } | ConfigError::Parse { path, .. } => {
                        warn!(path = %path.display(), error = %err, "加载默认配置失败，使用内建默认值");
                    }
                    ConfigError::Context { .. } => {
                        warn!(error = %err, "加载默认配置失败，使用内建默认值");
                    }
                }
                AppConfig::default()
            }
        },
    }
}

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_new(config.logging.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter);
    if subscriber.try_init().is_err() {
        // 已初始化，忽略
    }
}
