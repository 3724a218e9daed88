// ==========================================
// 供应链数据导入引擎 - 命令行入口
// ==========================================
// 子命令: ingest / validate / status / history / restore / config
// 输出: JSON（便于脚本处理）
// ==========================================

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use supply_chain_ingest::api::IngestApi;
use supply_chain_ingest::app::{get_default_data_dir, AppState};
use supply_chain_ingest::config::ConfigManager;
use supply_chain_ingest::domain::types::{JobStatus, OverlapStrategy, UploadMode};
use supply_chain_ingest::engine::IngestRequest;
use supply_chain_ingest::logging;

#[derive(Parser, Debug)]
#[command(author, version, about = "供应链数据导入引擎", long_about = None)]
struct Cli {
    /// 数据目录（默认: 用户数据目录）
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// 以 JSON 行格式输出日志
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 导入文件并等待任务结束
    Ingest(IngestArgs),
    /// 预检文件（不提交）
    Validate(ValidateArgs),
    /// 各类别生效状态
    Status,
    /// 查看历史版本
    History(HistoryArgs),
    /// 恢复历史版本
    Restore(RestoreArgs),
    /// 查看或覆写运行参数（下次启动生效）
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// 列出已覆写的配置项
    Show,
    /// 覆写单个配置项
    Set {
        #[arg(long)]
        key: String,
        #[arg(long)]
        value: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Replace,
    Append,
    Merge,
    SmartMerge,
}

#[derive(Args, Debug)]
struct IngestArgs {
    #[arg(long)]
    category: String,
    #[arg(long)]
    file: PathBuf,
    #[arg(long, value_enum, default_value = "replace")]
    mode: ModeArg,
    /// merge 模式的键列
    #[arg(long)]
    key: Option<String>,
    /// smart-merge 的重叠策略: keep_existing / replace_with_new / average_values
    #[arg(long)]
    strategy: Option<String>,
    #[arg(long, default_value = "cli")]
    user: String,
}

#[derive(Args, Debug)]
struct ValidateArgs {
    #[arg(long)]
    category: String,
    #[arg(long)]
    file: PathBuf,
}

#[derive(Args, Debug)]
struct HistoryArgs {
    #[arg(long)]
    category: String,
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Args, Debug)]
struct RestoreArgs {
    #[arg(long)]
    category: String,
    #[arg(long)]
    version: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.json_logs {
        logging::init_json();
    } else {
        logging::init();
    }

    let data_dir = cli.data_dir.unwrap_or_else(get_default_data_dir);
    let state = AppState::open(&data_dir)
        .await
        .with_context(|| format!("初始化失败: {}", data_dir.display()))?;
    let api = state.ingest_api.as_ref();

    match cli.command {
        Command::Ingest(args) => handle_ingest(api, args).await,
        Command::Validate(args) => handle_validate(api, args),
        Command::Status => print_json(&api.get_all_status()?),
        Command::History(args) => {
            let category = IngestApi::parse_category(&args.category)?;
            print_json(&api.get_history(category, args.limit)?)
        }
        Command::Restore(args) => {
            let category = IngestApi::parse_category(&args.category)?;
            let outcome = api.restore(&args.version, category).await?;
            print_json(&outcome.upload)
        }
        Command::Config(cmd) => handle_config(&state.db_path, cmd),
    }
}

fn handle_config(db_path: &str, cmd: ConfigCommand) -> Result<()> {
    let manager = ConfigManager::new(db_path).map_err(|e| anyhow!("配置库打开失败: {}", e))?;
    match cmd {
        ConfigCommand::Show => {}
        ConfigCommand::Set { key, value } => {
            manager
                .set_config(&key, &value)
                .map_err(|e| anyhow!("配置写入失败: {}", e))?;
        }
    }
    let all = manager
        .get_all_config()
        .map_err(|e| anyhow!("配置读取失败: {}", e))?;
    print_json(&all)
}

fn build_mode(args: &IngestArgs) -> Result<UploadMode> {
    Ok(match args.mode {
        ModeArg::Replace => UploadMode::Replace,
        ModeArg::Append => UploadMode::Append,
        ModeArg::Merge => UploadMode::Merge {
            key: args.key.clone().ok_or_else(|| anyhow!("merge 模式需要 --key"))?,
        },
        ModeArg::SmartMerge => {
            let raw = args.strategy.as_deref().unwrap_or("keep_existing");
            let strategy =
                OverlapStrategy::parse(raw).ok_or_else(|| anyhow!("未知重叠策略: {}", raw))?;
            UploadMode::SmartMerge { strategy }
        }
    })
}

fn read_upload(path: &PathBuf) -> Result<(String, Vec<u8>)> {
    let bytes = std::fs::read(path).with_context(|| format!("读取文件失败: {}", path.display()))?;
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("无效文件名: {}", path.display()))?
        .to_string();
    Ok((filename, bytes))
}

async fn handle_ingest(api: &IngestApi, args: IngestArgs) -> Result<()> {
    let category = IngestApi::parse_category(&args.category)?;
    let mode = build_mode(&args)?;
    let (filename, bytes) = read_upload(&args.file)?;

    let job_id = api.ingest(IngestRequest {
        category,
        filename,
        bytes: bytes.into(),
        mode,
        uploaded_by: args.user.clone(),
    })?;
    let job = api.wait_for_job(&job_id, Duration::from_millis(100)).await?;
    print_json(&job)?;

    if job.status == JobStatus::Failed {
        bail!("导入失败");
    }
    Ok(())
}

fn handle_validate(api: &IngestApi, args: ValidateArgs) -> Result<()> {
    let category = IngestApi::parse_category(&args.category)?;
    let (filename, bytes) = read_upload(&args.file)?;
    print_json(&api.validate_and_score(&filename, &bytes, category)?)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
