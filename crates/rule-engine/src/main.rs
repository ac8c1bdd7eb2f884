//! 规则树校验工具
//!
//! 加载配置和属性目录，编译规则目录下的全部规则树定义文件（*.json）并登记到注册表。
//! 任一文件存在结构错误时以非零状态退出。
//!
//! 用法：`rule-tree-check [rules_dir]`，未指定时使用配置中的 `engine.rules_dir`。

use anyhow::{Context, Result, bail};
use ledger_rules_shared::config::AppConfig;
use ledger_rules_shared::observability;
use rule_engine::{EngineContext, RegistryItem};
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load("rule-tree-check").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    let obs_config = config.observability.clone().with_service_name("rule-tree-check");
    let _guard = observability::init(&obs_config).await?;

    let rules_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| config.engine.rules_dir.clone())
        .context("未指定规则目录：请传入参数或配置 engine.rules_dir")?;

    let context = EngineContext::from_config(&config)?;
    let files = collect_rule_files(&rules_dir)?;
    info!(dir = %rules_dir.display(), files = files.len(), "开始校验规则树");

    let mut failures = 0usize;
    for path in &files {
        match check_file(&context, path) {
            Ok(rule_tree_id) => {
                info!(file = %path.display(), rule_tree_id = %rule_tree_id, "校验通过")
            }
            Err(e) => {
                failures += 1;
                error!(file = %path.display(), error = %e, "校验失败");
            }
        }
    }

    let stats = context.trees.stats();
    info!(
        trees = stats.trees_count,
        rules = stats.total_rules,
        failures,
        "规则树校验完成"
    );

    if failures > 0 {
        bail!("{} 个规则树定义存在错误", failures);
    }
    Ok(())
}

/// 编译单个文件并登记到注册表
fn check_file(context: &EngineContext, path: &Path) -> Result<String> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("读取文件失败: {}", path.display()))?;

    let rule_tree_id = context.trees.load_from_json(&json)?;
    let compiled = context.trees.require(&rule_tree_id)?;
    context.registry.add_item(RegistryItem::from_compiled(&compiled))?;

    Ok(rule_tree_id)
}

/// 目录下按文件名排序的 *.json 文件
fn collect_rule_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("读取目录失败: {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
