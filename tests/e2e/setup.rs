//! 测试环境管理
//!
//! 在临时目录写入配置、属性目录和规则树定义，再按正式入口的方式加载，
//! 统一提供引擎上下文、内存记录存储和编排器。

use anyhow::{Context, Result};
use ledger_rules_shared::config::AppConfig;
use rule_engine::{CachedDomainOperator, EngineContext, Record, RegistryItem};
use rule_orchestrator::{MemoryRecordStore, Orchestrator};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_ENV: AtomicUsize = AtomicUsize::new(0);

pub const CATALOG_JSON: &str = r#"
[
    {"name": "applicant_age", "isNumeric": true},
    {"name": "income", "isNumeric": true, "defaultValue": "0"},
    {"name": "requested", "isNumeric": true, "defaultValue": "0"},
    {"name": "country", "maxLength": 2},
    {"name": "email", "maxLength": 64},
    {"name": "status", "maxLength": 12, "defaultValue": "pending"},
    {"name": "credit_limit", "isNumeric": true, "defaultValue": "0"}
]
"#;

/// 贷款申请：成年与国家白名单（ERROR），收入覆盖申请额（ERROR），
/// 邮箱格式（WARNING），通过后写入状态与授信额度
pub const LOAN_JSON: &str = r#"
{
    "id": "loan-application",
    "name": "贷款申请审核",
    "root": "root",
    "rule_sets": [
        {
            "id": "root",
            "compose_mode": "AND",
            "rules": [
                {
                    "id": 1,
                    "target_attribute": "applicant_age",
                    "operator": "greater_than_or_equal",
                    "operands": [{"literal": "18"}]
                },
                {
                    "id": 2,
                    "target_attribute": "country",
                    "operator": "custom",
                    "custom_operator": "allowed_country",
                    "operands": [{"attribute": "country"}]
                }
            ],
            "children": ["affordability", "contact", "decision"]
        },
        {
            "id": "affordability",
            "compose_mode": "AND",
            "rules": [
                {
                    "id": 3,
                    "target_attribute": "income",
                    "operator": "greater_than_or_equal",
                    "operands": [{"attribute": "requested"}]
                }
            ]
        },
        {
            "id": "contact",
            "compose_mode": "OR",
            "severity": "WARNING",
            "rules": [
                {
                    "id": 4,
                    "target_attribute": "email",
                    "operator": "matches",
                    "operands": [{"literal": "^[^@]+@[^@]+$"}]
                }
            ]
        },
        {
            "id": "decision",
            "compose_mode": "AND",
            "rules": [
                {
                    "id": 5,
                    "target_attribute": "status",
                    "operator": "assign",
                    "operands": [{"literal": "approved"}]
                },
                {
                    "id": 6,
                    "target_attribute": "credit_limit",
                    "operator": "multiply",
                    "operands": [{"attribute": "income"}, {"literal": "3"}]
                }
            ]
        }
    ]
}
"#;

pub const LOAN_TREE_ID: &str = "loan-application";

/// 端到端测试环境
pub struct TestEnvironment {
    pub dir: PathBuf,
    pub config: AppConfig,
    pub engine: EngineContext,
    pub store: Arc<MemoryRecordStore>,
}

impl TestEnvironment {
    /// 创建测试环境：落盘配置与规则后从磁盘加载
    pub fn setup() -> Result<Self> {
        let dir = std::env::temp_dir().join(format!(
            "ledger-rules-e2e-{}-{}",
            std::process::id(),
            NEXT_ENV.fetch_add(1, Ordering::SeqCst)
        ));
        let rules_dir = dir.join("rules");
        std::fs::create_dir_all(&rules_dir)?;

        std::fs::write(dir.join("catalog.json"), CATALOG_JSON)?;
        std::fs::write(rules_dir.join("loan.json"), LOAN_JSON)?;
        std::fs::write(
            dir.join("default.toml"),
            format!(
                "[engine]\ntrace_enabled = true\nmax_depth = 16\nrules_dir = '{}'\n\n\
                 [catalog]\npath = '{}'\n\n\
                 [orchestrator]\nstep_timeout_ms = 5000\n",
                rules_dir.display(),
                dir.join("catalog.json").display()
            ),
        )?;

        let config = AppConfig::load_from(&dir, "e2e", "test").context("加载测试配置失败")?;
        let engine = EngineContext::from_config(&config)?;
        engine
            .operators
            .register("allowed_country", CachedDomainOperator::new(["US", "CA"]))?;

        let rules_dir = config.engine.rules_dir.clone().context("未配置规则目录")?;
        load_rules(&engine, &rules_dir)?;

        let store = Arc::new(MemoryRecordStore::with_catalog(Arc::clone(&engine.catalog)));

        Ok(Self {
            dir,
            config,
            engine,
            store,
        })
    }

    /// 本地评估的编排器
    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            self.store.clone(),
            self.engine.clone(),
            self.config.orchestrator.clone(),
        )
    }

    /// 写入一条已提交的申请记录
    pub fn seed_applicant(&self, record_id: &str, age: &str, income: &str) {
        self.store.seed(
            record_id,
            Record::new()
                .with("applicant_age", age)
                .with("income", income)
                .with("country", "US")
                .with("email", "applicant@example.com")
                .with("status", "pending"),
        );
    }
}

impl Drop for TestEnvironment {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

/// 编译规则目录下的全部定义并登记到注册表
fn load_rules(engine: &EngineContext, rules_dir: &Path) -> Result<()> {
    for entry in std::fs::read_dir(rules_dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }

        let json = std::fs::read_to_string(&path)?;
        let rule_tree_id = engine
            .trees
            .load_from_json(&json)
            .with_context(|| format!("规则树编译失败: {}", path.display()))?;
        let compiled = engine.trees.require(&rule_tree_id)?;
        engine
            .registry
            .add_item(RegistryItem::from_compiled(&compiled).with_owner("risk-team"))?;
    }
    Ok(())
}
