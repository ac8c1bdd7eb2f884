//! 引擎上下文
//!
//! 每个进程一个实例，持有属性目录、自定义操作符注册表、规则树存储和注册表，
//! 组件间通过 `Arc` 共享。

use crate::catalog::AttributeCatalog;
use crate::custom::CustomOperatorRegistry;
use crate::error::Result;
use crate::executor::RuleTreeExecutor;
use crate::registry::RuleRegistry;
use crate::store::RuleTreeStore;
use ledger_rules_shared::config::{AppConfig, EngineConfig};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// 引擎上下文
#[derive(Clone)]
pub struct EngineContext {
    pub catalog: Arc<AttributeCatalog>,
    pub operators: Arc<CustomOperatorRegistry>,
    pub trees: RuleTreeStore,
    pub registry: Arc<RuleRegistry>,
    pub config: EngineConfig,
}

impl EngineContext {
    pub fn new(catalog: AttributeCatalog, config: EngineConfig) -> Self {
        let catalog = Arc::new(catalog);
        Self {
            trees: RuleTreeStore::new(Arc::clone(&catalog)),
            catalog,
            operators: Arc::new(CustomOperatorRegistry::new()),
            registry: Arc::new(RuleRegistry::new()),
            config,
        }
    }

    /// 按应用配置构建：加载属性目录文件（未配置时使用空目录）
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let catalog = match &config.catalog.path {
            Some(path) => AttributeCatalog::load_from_file(path)?,
            None => {
                warn!("未配置属性目录文件，使用空目录");
                AttributeCatalog::default()
            }
        };

        info!(
            attributes = catalog.len(),
            trace_enabled = config.engine.trace_enabled,
            max_depth = config.engine.max_depth,
            "引擎上下文已初始化"
        );
        Ok(Self::new(catalog, config.engine.clone()))
    }

    /// 替换注册表（例如绑定持久化接收端）
    pub fn with_registry(mut self, registry: RuleRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// 按配置创建执行器
    pub fn executor(&self) -> RuleTreeExecutor {
        let executor = RuleTreeExecutor::new(Arc::clone(&self.catalog), Arc::clone(&self.operators))
            .with_max_depth(self.config.max_depth);

        if self.config.trace_enabled {
            executor.with_trace()
        } else {
            executor
        }
    }

    /// 创建绑定取消信号的执行器
    pub fn executor_with_cancel(&self, cancel: watch::Receiver<bool>) -> RuleTreeExecutor {
        self.executor().with_cancellation(cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Attribute;
    use crate::models::{Record, Rule, RuleSet, RuleTree};
    use crate::operators::OperatorKind;

    #[test]
    fn test_executor_from_context() {
        let catalog = AttributeCatalog::new(vec![Attribute::numeric("age")]).unwrap();
        let context = EngineContext::new(
            catalog,
            EngineConfig {
                trace_enabled: true,
                ..Default::default()
            },
        );

        let compiled = context
            .trees
            .load(RuleTree::new(
                "adult",
                RuleSet::and("root").with_rule(
                    Rule::new(1, "age", OperatorKind::GreaterThanOrEqual).with_literal("18"),
                ),
            ))
            .unwrap();

        let mut new = Record::new().with("age", "30");
        let report = context
            .executor()
            .execute(&compiled.tree, &Record::new(), &mut new)
            .unwrap();

        assert!(report.passed);
        assert!(!report.evaluation_trace.is_empty());
    }

    #[test]
    fn test_from_config_without_catalog() {
        let context = EngineContext::from_config(&AppConfig::default()).unwrap();
        assert!(context.catalog.is_empty());
        assert_eq!(context.config.max_depth, 64);
    }
}
