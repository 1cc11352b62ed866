//! rsdiscovery 目录扫描示例
//! 充当外部遍历器：walkdir 遍历目录，把文件交给规则引擎，输出 JSON 结果
//!
//! 运行命令:
//! cargo run --example discover_tree -- ./my-project --selector "konveyor.io/fact=JPA" --pretty
//! RUST_LOG=rsdiscovery=debug cargo run --example discover_tree -- ./my-project

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rsdiscovery::{
    discovery_ruleset_builder, findings_to_json, findings_to_pretty_json, Artifact, ConfigManager, LabelSelector,
    RuleEngine, RuleLoader, Symbol, SymbolTable,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "discover-tree")]
#[command(about = "Run discovery rules over a source tree")]
#[command(version)]
struct Cli {
    /// 待扫描目录
    root: PathBuf,

    /// 追加的规则语料文件（YAML）
    #[arg(long, short = 'r')]
    rules: Vec<PathBuf>,

    /// 规则标签选择器，如 `konveyor.io/fact=EJB || !konveyor.io/target`
    #[arg(long, short = 's')]
    selector: Option<String>,

    /// 预解析的符号表（JSON：相对路径 -> 符号列表）
    #[arg(long)]
    symbols: Option<PathBuf>,

    /// 并发工作数
    #[arg(long, short = 'w')]
    workers: Option<usize>,

    /// 单个（规则, 文件）评估超时，毫秒
    #[arg(long, default_value_t = 30_000)]
    timeout_ms: u64,

    /// 跳过大于该字节数的文件
    #[arg(long, default_value_t = 8 * 1024 * 1024)]
    max_file_size: u64,

    /// 格式化输出
    #[arg(long)]
    pretty: bool,
}

/// 遍历目录生成制品；读取失败的文件以不可读制品交给引擎
fn collect_artifacts(root: &Path, max_size: u64, symbols: &mut HashMap<String, Vec<Symbol>>) -> Vec<Artifact> {
    let mut artifacts = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !e.file_name().to_string_lossy().starts_with('.'))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("遍历失败：{}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path()).to_path_buf();
        let too_large = entry.metadata().map(|m| m.len() > max_size).unwrap_or(false);
        let mut artifact = if too_large {
            Artifact::unreadable(&relative, format!("larger than {} bytes", max_size))
        } else {
            match std::fs::read(entry.path()) {
                Ok(bytes) => Artifact::new(&relative, bytes),
                Err(e) => Artifact::unreadable(&relative, e.to_string()),
            }
        };

        let key = relative.to_string_lossy().replace('\\', "/");
        if let Some(list) = symbols.remove(&key) {
            artifact = artifact.with_symbols(list.into_iter().collect::<SymbolTable>());
        }
        artifacts.push(artifact);
    }

    artifacts
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rsdiscovery=info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // ========== 1. 组装规则集 ==========
    let mut builder = discovery_ruleset_builder().context("内置规则加载失败")?;
    for path in &cli.rules {
        let corpus = RuleLoader::load_file(path)
            .await
            .with_context(|| format!("规则文件加载失败：{}", path.display()))?;
        builder = builder.corpus(corpus);
    }
    let ruleset = builder.build()?;

    // ========== 2. 引擎配置 ==========
    let mut config = ConfigManager::custom().artifact_timeout(Duration::from_millis(cli.timeout_ms));
    if let Some(workers) = cli.workers {
        config = config.workers(workers);
    }
    if let Some(expr) = &cli.selector {
        config = config.selector(LabelSelector::parse(expr));
    }
    let engine = RuleEngine::new(&ruleset, config.build())?;
    for diagnostic in engine.compile_diagnostics() {
        warn!("{}", diagnostic.message);
    }

    // ========== 3. 遍历并评估 ==========
    let mut symbols: HashMap<String, Vec<Symbol>> = match &cli.symbols {
        Some(path) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("符号表读取失败：{}", path.display()))?;
            serde_json::from_str(&text).context("符号表格式错误")?
        }
        None => HashMap::new(),
    };
    let artifacts = collect_artifacts(&cli.root, cli.max_file_size, &mut symbols);
    info!("共收集文件{}个，规则{}条", artifacts.len(), engine.compiled().len());

    let report = engine.run(artifacts).await;
    for diagnostic in &report.diagnostics {
        warn!("[{}] {}", diagnostic.kind, diagnostic.message);
    }

    // ========== 4. 输出 ==========
    let json = if cli.pretty {
        findings_to_pretty_json(&report.findings)?
    } else {
        findings_to_json(&report.findings)?
    };
    println!("{}", json);

    Ok(())
}
