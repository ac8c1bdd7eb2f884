//! 规则树存储管理
//!
//! 使用 DashMap 提供线程安全的编译结果缓存，支持规则树的加载、更新、删除和批量操作。

use crate::catalog::AttributeCatalog;
use crate::compiler::{CompiledRuleTree, RuleTreeCompiler};
use crate::error::{Result, RuleError};
use crate::models::{RuleTree, RuleTreeDefinition};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// 规则树存储
#[derive(Clone)]
pub struct RuleTreeStore {
    trees: Arc<DashMap<String, Arc<CompiledRuleTree>>>,
    compiler: Arc<parking_lot::Mutex<RuleTreeCompiler>>,
}

impl RuleTreeStore {
    pub fn new(catalog: Arc<AttributeCatalog>) -> Self {
        Self {
            trees: Arc::new(DashMap::new()),
            compiler: Arc::new(parking_lot::Mutex::new(RuleTreeCompiler::new(catalog))),
        }
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    /// 加载规则树，返回编译结果
    #[instrument(skip(self, tree), fields(rule_tree_id = %tree.id, name = %tree.name))]
    pub fn load(&self, tree: RuleTree) -> Result<Arc<CompiledRuleTree>> {
        let compiled = {
            let mut compiler = self.compiler.lock();
            compiler.compile(tree)?
        };
        Ok(self.insert(compiled))
    }

    /// 加载外部定义格式的规则树
    #[instrument(skip(self, definition), fields(rule_tree_id = %definition.id))]
    pub fn load_definition(&self, definition: RuleTreeDefinition) -> Result<Arc<CompiledRuleTree>> {
        let compiled = {
            let mut compiler = self.compiler.lock();
            compiler.compile_definition(definition)?
        };
        Ok(self.insert(compiled))
    }

    /// 从 JSON 加载，返回规则树 ID
    #[instrument(skip(self, json))]
    pub fn load_from_json(&self, json: &str) -> Result<String> {
        let compiled = {
            let mut compiler = self.compiler.lock();
            compiler.compile_from_json(json)?
        };
        Ok(self.insert(compiled).id().to_string())
    }

    fn insert(&self, compiled: CompiledRuleTree) -> Arc<CompiledRuleTree> {
        let compiled = Arc::new(compiled);
        let rule_tree_id = compiled.id().to_string();
        self.trees.insert(rule_tree_id.clone(), Arc::clone(&compiled));

        info!(
            rule_tree_id = %rule_tree_id,
            rules = compiled.rule_count(),
            compile_version = compiled.compile_version,
            "规则树已加载"
        );
        compiled
    }

    /// 更新已存在的规则树
    #[instrument(skip(self, tree), fields(rule_tree_id = %tree.id))]
    pub fn update(&self, tree: RuleTree) -> Result<Arc<CompiledRuleTree>> {
        if !self.trees.contains_key(&tree.id) {
            warn!("更新不存在的规则树: {}", tree.id);
            return Err(RuleError::RuleTreeNotFound(tree.id));
        }

        self.load(tree)
    }

    #[instrument(skip(self))]
    pub fn delete(&self, rule_tree_id: &str) -> Result<()> {
        if self.trees.remove(rule_tree_id).is_some() {
            info!("规则树已删除: {}", rule_tree_id);
            Ok(())
        } else {
            warn!("删除不存在的规则树: {}", rule_tree_id);
            Err(RuleError::RuleTreeNotFound(rule_tree_id.to_string()))
        }
    }

    pub fn get(&self, rule_tree_id: &str) -> Option<Arc<CompiledRuleTree>> {
        self.trees.get(rule_tree_id).map(|t| Arc::clone(t.value()))
    }

    /// 获取规则树，不存在时返回 RuleTreeNotFound
    pub fn require(&self, rule_tree_id: &str) -> Result<Arc<CompiledRuleTree>> {
        self.get(rule_tree_id)
            .ok_or_else(|| RuleError::RuleTreeNotFound(rule_tree_id.to_string()))
    }

    pub fn contains(&self, rule_tree_id: &str) -> bool {
        self.trees.contains_key(rule_tree_id)
    }

    /// 按 ID 排序
    pub fn list_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.trees.iter().map(|t| t.key().clone()).collect();
        ids.sort();
        ids
    }

    /// 批量加载，失败项记录日志后跳过
    #[instrument(skip(self, trees))]
    pub fn load_batch(&self, trees: Vec<RuleTree>) -> Vec<String> {
        let mut loaded_ids = Vec::with_capacity(trees.len());
        let mut errors = Vec::new();

        for tree in trees {
            let rule_tree_id = tree.id.clone();
            match self.load(tree) {
                Ok(_) => loaded_ids.push(rule_tree_id),
                Err(e) => errors.push((rule_tree_id, e)),
            }
        }

        if !errors.is_empty() {
            warn!("批量加载部分失败: {:?}", errors);
        }

        info!("批量加载完成: {} 成功, {} 失败", loaded_ids.len(), errors.len());
        loaded_ids
    }

    #[instrument(skip(self))]
    pub fn clear(&self) {
        let count = self.trees.len();
        self.trees.clear();
        info!("已清空 {} 棵规则树", count);
    }

    pub fn stats(&self) -> RuleTreeStoreStats {
        let trees_count = self.trees.len();
        let total_rules: usize = self.trees.iter().map(|t| t.rule_count()).sum();

        RuleTreeStoreStats {
            trees_count,
            total_rules,
            avg_rules_per_tree: if trees_count > 0 {
                total_rules as f64 / trees_count as f64
            } else {
                0.0
            },
        }
    }
}

/// 规则树存储统计信息
#[derive(Debug, Clone)]
pub struct RuleTreeStoreStats {
    pub trees_count: usize,
    pub total_rules: usize,
    pub avg_rules_per_tree: f64,
}
