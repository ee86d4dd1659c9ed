//! 实验室工作流命令行入口

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use lab_admin::{init_tracing, ConfigManager, LabAdmin, LabConfig};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "lab-server")]
#[command(about = "隐形矫治器实验室病例与生产工作流")]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 写出默认配置文件
    Init {
        #[arg(default_value = "lab.toml")]
        path: PathBuf,
    },
    /// 系统概览
    Overview {
        /// 统计逾期的参考日期，默认今天
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// 生成到期牙套的计划补货订单
    Replenish {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// 病例替换库存汇总
    Summary { treatment_code: String },
    /// 最近的审计记录
    Audit {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// 创建状态快照
    Snapshot,
    /// 从快照恢复
    Restore { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Command::Init { path } = &args.command {
        let text = LabConfig::default().to_toml()?;
        tokio::fs::write(path, text)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("{}", path.display());
        return Ok(());
    }

    let config_manager = Arc::new(ConfigManager::new(args.config.as_deref())?);
    let mut logging = config_manager.get_config().await.logging;
    if let Some(level) = args.log_level {
        logging.level = level;
    }
    init_tracing(&logging)?;

    let admin = LabAdmin::from_manager(config_manager).await?;

    info!("启动实验室工作流命令: {:?}", args.command);
    if let Err(e) = run(&admin, args.command).await {
        error!("命令执行失败: {:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(admin: &LabAdmin, command: Command) -> Result<()> {
    let engine = admin.engine();
    let today = Local::now().date_naive();

    match command {
        Command::Init { .. } => Ok(()),
        Command::Overview { date } => print_json(&engine.system_overview(date.unwrap_or(today)).await?),
        Command::Replenish { date } => {
            let created = engine
                .lab_orders()
                .generate_programmed_replenishments(date.unwrap_or(today))
                .await?;
            info!("生成计划补货订单 {} 个", created.len());
            print_json(&created)
        }
        Command::Summary { treatment_code } => {
            let case = engine
                .cases()
                .find_by_code(&treatment_code)
                .await?
                .with_context(|| format!("病例不存在: {}", treatment_code))?;
            print_json(&engine.replacement_bank().get_replacement_bank_summary(case.id).await?)
        }
        Command::Audit { limit } => print_json(&engine.audit().recent(limit).await?),
        Command::Snapshot => {
            let snapshot = admin.create_snapshot().await?;
            info!("快照已创建: {}", snapshot.file_path.display());
            print_json(&snapshot)
        }
        Command::Restore { file } => {
            admin.restore_snapshot(&file).await?;
            info!("状态已从 {} 恢复", file.display());
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
