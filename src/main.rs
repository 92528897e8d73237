// ==========================================
// 禁令/召回记录导入管道 - 命令行入口
// ==========================================
// 用法: recall-import <FILE> [--format] [--delimiter] [--no-header]
//       [--map SRC=CANONICAL]... [--default FIELD=VALUE]... [--db PATH]
// 输出: 终态状态 JSON（stdout）; FAILED 时退出码 1
// ==========================================

use anyhow::{Context, Result};
use clap::Parser;
use recall_import::api::{ImportApi, ImportRequest};
use recall_import::{db, logging, ImportStatus};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// 批量导入禁令/召回记录
#[derive(Parser, Debug)]
#[command(name = "recall-import", version, about = "批量导入禁令/召回记录（CSV/TSV/JSON/JSON Lines）")]
struct Cli {
    /// 待导入文件
    file: PathBuf,

    /// 格式提示（csv / tsv / json / jsonl）
    #[arg(long)]
    format: Option<String>,

    /// 表格分隔符（单个 ASCII 字符）
    #[arg(long)]
    delimiter: Option<char>,

    /// 表格无表头（列名按 column_1.. 生成）
    #[arg(long)]
    no_header: bool,

    /// 显式映射: 源字段=标准字段（可重复）
    #[arg(long = "map", value_name = "SRC=CANONICAL", value_parser = parse_pair)]
    mappings: Vec<(String, String)>,

    /// 默认上下文: 标准字段=值（可重复）
    #[arg(long = "default", value_name = "FIELD=VALUE", value_parser = parse_pair)]
    defaults: Vec<(String, String)>,

    /// SQLite 数据库路径（默认: 用户数据目录）
    #[arg(long)]
    db: Option<PathBuf>,

    /// 状态轮询间隔（毫秒）
    #[arg(long, default_value_t = 200)]
    poll_ms: u64,
}

fn parse_pair(raw: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("需要 KEY=VALUE 形式: {}", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("KEY 不能为空: {}", raw));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();

    let db_path = cli.db.clone().unwrap_or_else(db::default_db_path);
    let db_path = db_path.to_string_lossy().to_string();
    tracing::info!("{} v{}", recall_import::APP_NAME, recall_import::VERSION);
    tracing::info!("使用数据库: {}", db_path);

    let content = std::fs::read(&cli.file)
        .with_context(|| format!("读取文件失败: {}", cli.file.display()))?;
    let api = ImportApi::open(&db_path).context("初始化导入API失败")?;

    let request = ImportRequest {
        content,
        filename: cli
            .file
            .file_name()
            .map(|name| name.to_string_lossy().to_string()),
        format_hint: cli.format,
        content_type: None,
        field_mapping: cli.mappings.into_iter().collect::<BTreeMap<_, _>>(),
        default_context: cli.defaults.into_iter().collect::<BTreeMap<_, _>>(),
        delimiter: cli.delimiter,
        has_header: cli.no_header.then_some(false),
        auto_classify: false,
        auto_trigger_workflow: false,
    };

    let submitted = api.submit_import(request).await.context("提交导入失败")?;
    tracing::info!("导入已提交: {}", submitted.import_id);

    let status = api
        .wait_for_terminal(&submitted.import_id, Duration::from_millis(cli.poll_ms.max(1)))
        .await
        .context("查询导入状态失败")?;
    println!("{}", serde_json::to_string_pretty(&status)?);

    if status.status == ImportStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}
