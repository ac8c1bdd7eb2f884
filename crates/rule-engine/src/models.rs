//! 规则引擎领域模型

use crate::operators::{ComposeMode, OperatorKind, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// 数据记录：属性名 -> 字符串值
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, String>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 JSON 对象创建
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.fields.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// 用另一条记录的字段覆盖当前记录
    pub fn merge(&mut self, other: &Record) {
        for (name, value) in other.iter() {
            self.fields.insert(name.to_string(), value.to_string());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// 规则读取目标值的记录
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TargetRecord {
    Old,
    #[default]
    New,
}

/// 规则操作数：字面量或属性引用（从新记录读取）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Literal(String),
    Attribute(String),
}

impl Operand {
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    pub fn attribute(name: impl Into<String>) -> Self {
        Self::Attribute(name.into())
    }
}

/// 原子规则
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: u32,
    #[serde(default)]
    pub target_record: TargetRecord,
    pub target_attribute: String,
    pub operator: OperatorKind,
    #[serde(default)]
    pub operands: Vec<Operand>,
    /// 仅当 operator 为自定义类时设置
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_operator: Option<String>,
    #[serde(default)]
    pub negate: bool,
}

impl Rule {
    pub fn new(id: u32, target_attribute: impl Into<String>, operator: OperatorKind) -> Self {
        Self {
            id,
            target_record: TargetRecord::New,
            target_attribute: target_attribute.into(),
            operator,
            operands: Vec::new(),
            custom_operator: None,
            negate: false,
        }
    }

    /// 自定义操作符规则
    pub fn custom(
        id: u32,
        target_attribute: impl Into<String>,
        operator: OperatorKind,
        operator_name: impl Into<String>,
    ) -> Self {
        Self {
            custom_operator: Some(operator_name.into()),
            ..Self::new(id, target_attribute, operator)
        }
    }

    pub fn with_literal(mut self, value: impl Into<String>) -> Self {
        self.operands.push(Operand::literal(value));
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>) -> Self {
        self.operands.push(Operand::attribute(name));
        self
    }

    pub fn on_old_record(mut self) -> Self {
        self.target_record = TargetRecord::Old;
        self
    }

    pub fn negated(mut self) -> Self {
        self.negate = !self.negate;
        self
    }
}

/// 规则集（AND/OR 组）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub compose_mode: ComposeMode,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub child_rule_sets: Vec<RuleSet>,
}

impl RuleSet {
    pub fn new(id: impl Into<String>, compose_mode: ComposeMode, severity: Severity) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            compose_mode,
            severity,
            rules: Vec::new(),
            child_rule_sets: Vec::new(),
        }
    }

    pub fn and(id: impl Into<String>) -> Self {
        Self::new(id, ComposeMode::And, Severity::Error)
    }

    pub fn or(id: impl Into<String>) -> Self {
        Self::new(id, ComposeMode::Or, Severity::Error)
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_child(mut self, child: RuleSet) -> Self {
        self.child_rule_sets.push(child);
        self
    }

    /// 子树中的规则总数
    pub fn rule_count(&self) -> usize {
        self.rules.len()
            + self
                .child_rule_sets
                .iter()
                .map(RuleSet::rule_count)
                .sum::<usize>()
    }
}

/// 规则树
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleTree {
    pub id: String,
    pub name: String,
    pub version: String,
    pub root: RuleSet,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl RuleTree {
    pub fn new(name: impl Into<String>, root: RuleSet) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            version: "1.0".to_string(),
            root,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// 规则集定义（外部标记格式，子规则集按 id 引用）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSetDefinition {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub compose_mode: ComposeMode,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub children: Vec<String>,
}

/// 规则树定义（外部标记格式）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleTreeDefinition {
    pub id: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// 根规则集 id
    pub root: String,
    pub rule_sets: Vec<RuleSetDefinition>,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// 单条规则的评估结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub rule_id: u32,
    pub rule_set_id: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// 规则集的聚合结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSetOutcome {
    pub rule_set_id: String,
    pub passed: bool,
}

/// 规则树评估报告
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleTreeReport {
    pub rule_tree_id: String,
    /// 根规则集的聚合结果
    pub passed: bool,
    pub failure_count: u32,
    pub failed_rule_set_ids: Vec<String>,
    pub failed_rule_ids: Vec<String>,
    /// 一旦置位不再复位
    pub is_severe_failure: bool,
    #[serde(default)]
    pub rule_outcomes: Vec<RuleOutcome>,
    #[serde(default)]
    pub rule_set_outcomes: Vec<RuleSetOutcome>,
    #[serde(default)]
    pub evaluation_trace: Vec<String>,
    #[serde(default)]
    pub evaluation_time_ms: i64,
}

impl RuleTreeReport {
    pub fn new(rule_tree_id: impl Into<String>) -> Self {
        Self {
            rule_tree_id: rule_tree_id.into(),
            ..Default::default()
        }
    }

    /// 记录一次规则失败，每次失败都追加规则 id 与所属规则集 id
    pub fn record_failure(&mut self, rule_set_id: &str, rule_id: u32) {
        self.failure_count += 1;
        self.failed_rule_ids.push(rule_id.to_string());
        self.failed_rule_set_ids.push(rule_set_id.to_string());
    }

    /// 记录规则集聚合结果为失败；ERROR 级别置位严重失败，置位后不再复位
    pub fn record_rule_set_failure(&mut self, severity: Severity) {
        if severity == Severity::Error {
            self.is_severe_failure = true;
        }
    }

    /// 不存在严重失败即视为有效
    pub fn is_valid(&self) -> bool {
        !self.is_severe_failure
    }

    /// 本次评估访问过的规则数
    pub fn visited_rule_count(&self) -> usize {
        self.rule_outcomes.len()
    }

    pub fn rule_set_passed(&self, rule_set_id: &str) -> Option<bool> {
        self.rule_set_outcomes
            .iter()
            .find(|o| o.rule_set_id == rule_set_id)
            .map(|o| o.passed)
    }
}
