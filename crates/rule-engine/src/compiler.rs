//! 规则树编译器
//!
//! 将规则树（或按 id 引用子规则集的外部定义）校验并编译为可执行形式：
//! 结构校验、属性引用校验、循环检测，并预提取规则树涉及的属性集合。

use crate::catalog::AttributeCatalog;
use crate::error::{Result, RuleError};
use crate::models::{Operand, Rule, RuleSet, RuleSetDefinition, RuleTree, RuleTreeDefinition};
use crate::operators::OperatorKind;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;

/// 编译后的规则树
#[derive(Debug, Clone)]
pub struct CompiledRuleTree {
    pub tree: RuleTree,
    /// 规则树读写的全部属性
    pub required_attributes: BTreeSet<String>,
    /// 编译版本号（用于缓存失效）
    pub compile_version: u64,
}

impl CompiledRuleTree {
    pub fn id(&self) -> &str {
        &self.tree.id
    }

    pub fn name(&self) -> &str {
        &self.tree.name
    }

    pub fn root(&self) -> &RuleSet {
        &self.tree.root
    }

    pub fn rule_count(&self) -> usize {
        self.tree.root.rule_count()
    }
}

/// 规则树编译器
pub struct RuleTreeCompiler {
    catalog: Arc<AttributeCatalog>,
    compile_version: u64,
}

impl RuleTreeCompiler {
    pub fn new(catalog: Arc<AttributeCatalog>) -> Self {
        Self {
            catalog,
            compile_version: 0,
        }
    }

    /// 从 JSON 编译，支持嵌套形式（`RuleTree`）与引用形式（`RuleTreeDefinition`）
    pub fn compile_from_json(&mut self, json: &str) -> Result<CompiledRuleTree> {
        let value: serde_json::Value = serde_json::from_str(json)?;

        if value.get("rule_sets").is_some() {
            let definition: RuleTreeDefinition = serde_json::from_value(value)?;
            self.compile_definition(definition)
        } else {
            let tree: RuleTree = serde_json::from_value(value)?;
            self.compile(tree)
        }
    }

    /// 编译外部定义：按 id 解析子规则集引用，拒绝循环、悬空和重复引用
    pub fn compile_definition(
        &mut self,
        definition: RuleTreeDefinition,
    ) -> Result<CompiledRuleTree> {
        let mut sets: HashMap<&str, &RuleSetDefinition> =
            HashMap::with_capacity(definition.rule_sets.len());
        for set in &definition.rule_sets {
            if sets.insert(set.id.as_str(), set).is_some() {
                return Err(RuleError::Structural(format!("规则集 id 重复: {}", set.id)));
            }
        }

        let mut stack = Vec::new();
        let mut placed = HashSet::new();
        let root = Self::assemble(&definition.root, &sets, &mut stack, &mut placed)?;

        if placed.len() < sets.len() {
            let mut orphans: Vec<&str> = sets
                .keys()
                .filter(|id| !placed.contains(**id))
                .copied()
                .collect();
            orphans.sort_unstable();
            warn!(rule_tree_id = %definition.id, orphans = ?orphans, "存在未被引用的规则集");
        }

        let now = Utc::now();
        self.compile(RuleTree {
            id: definition.id,
            name: definition.name,
            version: definition.version,
            root,
            created_at: now,
            updated_at: now,
        })
    }

    /// 编译规则树
    pub fn compile(&mut self, tree: RuleTree) -> Result<CompiledRuleTree> {
        self.validate_tree(&tree)?;

        let mut required_attributes = BTreeSet::new();
        Self::collect_attributes(&tree.root, &mut required_attributes);

        self.compile_version += 1;

        Ok(CompiledRuleTree {
            tree,
            required_attributes,
            compile_version: self.compile_version,
        })
    }

    fn assemble(
        id: &str,
        sets: &HashMap<&str, &RuleSetDefinition>,
        stack: &mut Vec<String>,
        placed: &mut HashSet<String>,
    ) -> Result<RuleSet> {
        if let Some(pos) = stack.iter().position(|s| s == id) {
            let mut cycle: Vec<&str> = stack[pos..].iter().map(String::as_str).collect();
            cycle.push(id);
            return Err(RuleError::CycleDetected {
                cycle: cycle.join(" -> "),
            });
        }

        let definition = sets.get(id).ok_or_else(|| {
            RuleError::Structural(format!("引用了不存在的规则集: {}", id))
        })?;

        // 同一规则集只能出现在树中一处，否则其规则会被访问多次
        if !placed.insert(id.to_string()) {
            return Err(RuleError::Structural(format!("规则集被多次引用: {}", id)));
        }

        stack.push(id.to_string());
        let children = definition
            .children
            .iter()
            .map(|child| Self::assemble(child, sets, stack, placed))
            .collect::<Result<Vec<_>>>()?;
        stack.pop();

        Ok(RuleSet {
            id: definition.id.clone(),
            description: definition.description.clone(),
            compose_mode: definition.compose_mode,
            severity: definition.severity,
            rules: definition.rules.clone(),
            child_rule_sets: children,
        })
    }

    fn validate_tree(&self, tree: &RuleTree) -> Result<()> {
        if tree.id.trim().is_empty() {
            return Err(RuleError::ParseError("规则树 ID 不能为空".to_string()));
        }

        if tree.name.trim().is_empty() {
            return Err(RuleError::ParseError("规则树名称不能为空".to_string()));
        }

        let mut set_ids = HashSet::new();
        let mut rule_ids = HashSet::new();
        self.validate_rule_set(&tree.root, "root", &mut set_ids, &mut rule_ids)
    }

    fn validate_rule_set(
        &self,
        rule_set: &RuleSet,
        path: &str,
        set_ids: &mut HashSet<String>,
        rule_ids: &mut HashSet<u32>,
    ) -> Result<()> {
        if rule_set.id.trim().is_empty() {
            return Err(RuleError::ParseError(format!("规则集 '{}' 的 id 不能为空", path)));
        }

        if !set_ids.insert(rule_set.id.clone()) {
            return Err(RuleError::Structural(format!("规则集 id 重复: {}", rule_set.id)));
        }

        if rule_set.rules.is_empty() && rule_set.child_rule_sets.is_empty() {
            return Err(RuleError::Structural(format!(
                "规则集 '{}' ({}) 不包含任何规则或子规则集",
                rule_set.id, path
            )));
        }

        for (i, rule) in rule_set.rules.iter().enumerate() {
            let rule_path = format!("{}.rules[{}]", path, i);
            if !rule_ids.insert(rule.id) {
                return Err(RuleError::Structural(format!(
                    "规则 id 重复: {} ({})",
                    rule.id, rule_path
                )));
            }
            self.validate_rule(rule, &rule_path)?;
        }

        for (i, child) in rule_set.child_rule_sets.iter().enumerate() {
            let child_path = format!("{}.children[{}]", path, i);
            self.validate_rule_set(child, &child_path, set_ids, rule_ids)?;
        }

        Ok(())
    }

    fn validate_rule(&self, rule: &Rule, path: &str) -> Result<()> {
        self.catalog.require(&rule.target_attribute, path)?;

        for operand in &rule.operands {
            if let Operand::Attribute(name) = operand {
                self.catalog.require(name, path)?;
            }
        }

        // 自定义操作符名称与自定义类操作符一一对应
        match (rule.operator.is_custom(), &rule.custom_operator) {
            (true, None) => {
                return Err(RuleError::ParseError(format!(
                    "规则 '{}' 的 {} 操作符需要指定自定义操作符名称",
                    path, rule.operator
                )));
            }
            (true, Some(name)) if name.trim().is_empty() => {
                return Err(RuleError::ParseError(format!(
                    "规则 '{}' 的自定义操作符名称不能为空",
                    path
                )));
            }
            (false, Some(name)) => {
                return Err(RuleError::ParseError(format!(
                    "规则 '{}' 的 {} 操作符不能绑定自定义操作符 '{}'",
                    path, rule.operator, name
                )));
            }
            _ => {}
        }

        let count = rule.operands.len();
        if count < rule.operator.min_operands() {
            return Err(RuleError::ParseError(format!(
                "规则 '{}' 的 {} 操作符至少需要 {} 个操作数，当前 {} 个",
                path,
                rule.operator,
                rule.operator.min_operands(),
                count
            )));
        }
        if let Some(max) = rule.operator.max_operands() {
            if count > max {
                return Err(RuleError::ParseError(format!(
                    "规则 '{}' 的 {} 操作符最多接受 {} 个操作数，当前 {} 个",
                    path, rule.operator, max, count
                )));
            }
        }

        if rule.operator == OperatorKind::Matches {
            if let Some(Operand::Literal(pattern)) = rule.operands.first() {
                // 预验证正则表达式
                regex::Regex::new(pattern).map_err(|e| {
                    RuleError::ParseError(format!("规则 '{}' 的正则表达式无效: {}", path, e))
                })?;
            }
        }

        Ok(())
    }

    fn collect_attributes(rule_set: &RuleSet, attributes: &mut BTreeSet<String>) {
        for rule in &rule_set.rules {
            attributes.insert(rule.target_attribute.clone());
            for operand in &rule.operands {
                if let Operand::Attribute(name) = operand {
                    attributes.insert(name.clone());
                }
            }
        }

        for child in &rule_set.child_rule_sets {
            Self::collect_attributes(child, attributes);
        }
    }
}
