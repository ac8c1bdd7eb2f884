//! 规则与规则组（Grove）注册表
//!
//! 登记规则树元数据（gas 成本区间、所需属性、所属规则组），并维护有序的规则组。
//! 规则组内的位置从 1 开始，0 表示未分配。每次写入条目后，将该单个条目序列化交给
//! 可选的持久化接收端。

use crate::compiler::CompiledRuleTree;
use crate::error::{Result, RuleError};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// 注册表条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryItem {
    pub rule_tree_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub min_gas_cost: u64,
    #[serde(default)]
    pub max_gas_cost: u64,
    #[serde(default)]
    pub required_attributes: BTreeSet<String>,
    /// 规则组 id -> 组内位置
    #[serde(default)]
    pub grove_memberships: BTreeMap<String, u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RegistryItem {
    pub fn new(rule_tree_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            rule_tree_id: rule_tree_id.into(),
            description: String::new(),
            owner: String::new(),
            min_gas_cost: 0,
            max_gas_cost: 0,
            required_attributes: BTreeSet::new(),
            grove_memberships: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// 由编译结果生成条目
    pub fn from_compiled(compiled: &CompiledRuleTree) -> Self {
        Self {
            description: compiled.name().to_string(),
            required_attributes: compiled.required_attributes.clone(),
            ..Self::new(compiled.id())
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_gas_cost(mut self, min: u64, max: u64) -> Self {
        self.min_gas_cost = min;
        self.max_gas_cost = max;
        self
    }
}

/// 规则组：有序的规则树集合
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleGrove {
    pub grove_id: String,
    #[serde(default)]
    pub description: String,
    /// 规则树 id -> 组内位置
    #[serde(default)]
    pub members: BTreeMap<String, u32>,
}

impl RuleGrove {
    pub fn new(grove_id: impl Into<String>) -> Self {
        Self {
            grove_id: grove_id.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// 按位置升序的成员 id，位置相同时按 id 排序
    pub fn ordered_member_ids(&self) -> Vec<String> {
        let mut members: Vec<(&String, &u32)> = self.members.iter().collect();
        members.sort_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)));
        members.into_iter().map(|(id, _)| id.clone()).collect()
    }
}

/// 条目持久化接收端
pub trait RegistrySink: Send + Sync {
    /// 写入单个条目的序列化结果
    fn persist(&self, item_id: &str, payload: &str) -> Result<()>;
}

/// 内存接收端，保留每个条目最近一次的序列化结果
#[derive(Debug, Default)]
pub struct MemorySink {
    payloads: Mutex<BTreeMap<String, String>>,
    writes: Mutex<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn payload(&self, item_id: &str) -> Option<String> {
        self.payloads.lock().get(item_id).cloned()
    }

    /// 累计写入次数
    pub fn write_count(&self) -> usize {
        *self.writes.lock()
    }
}

impl RegistrySink for MemorySink {
    fn persist(&self, item_id: &str, payload: &str) -> Result<()> {
        self.payloads
            .lock()
            .insert(item_id.to_string(), payload.to_string());
        *self.writes.lock() += 1;
        Ok(())
    }
}

#[derive(Default)]
struct RegistryState {
    items: HashMap<String, RegistryItem>,
    groves: HashMap<String, RuleGrove>,
}

/// 规则与规则组注册表
#[derive(Default)]
pub struct RuleRegistry {
    state: RwLock<RegistryState>,
    sink: Option<Arc<dyn RegistrySink>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(sink: Arc<dyn RegistrySink>) -> Self {
        Self {
            state: RwLock::default(),
            sink: Some(sink),
        }
    }

    /// 按 id 新增或覆盖条目，已有的规则组成员关系保留
    #[instrument(skip(self, item), fields(rule_tree_id = %item.rule_tree_id))]
    pub fn add_item(&self, mut item: RegistryItem) -> Result<()> {
        if item.rule_tree_id.trim().is_empty() {
            return Err(RuleError::ParseError("注册表条目 id 不能为空".to_string()));
        }

        if item.min_gas_cost > item.max_gas_cost && item.max_gas_cost != 0 {
            return Err(RuleError::InvalidValue {
                attribute: "maxGasCost".to_string(),
                reason: format!(
                    "最小 gas 成本 {} 大于最大 gas 成本 {}",
                    item.min_gas_cost, item.max_gas_cost
                ),
            });
        }

        let mut state = self.state.write();
        if let Some(existing) = state.items.get(&item.rule_tree_id) {
            item.created_at = existing.created_at;
            item.grove_memberships = existing.grove_memberships.clone();
            item.updated_at = Utc::now();
        }

        self.persist(&item)?;

        info!(owner = %item.owner, "注册表条目已写入");
        state.items.insert(item.rule_tree_id.clone(), item);
        Ok(())
    }

    pub fn get_item(&self, rule_tree_id: &str) -> Option<RegistryItem> {
        self.state.read().items.get(rule_tree_id).cloned()
    }

    /// 删除条目，同时从所有规则组中移除
    #[instrument(skip(self))]
    pub fn remove_item(&self, rule_tree_id: &str) -> Result<RegistryItem> {
        let mut state = self.state.write();
        let item = state
            .items
            .remove(rule_tree_id)
            .ok_or_else(|| RuleError::RuleTreeNotFound(rule_tree_id.to_string()))?;

        for grove_id in item.grove_memberships.keys() {
            if let Some(grove) = state.groves.get_mut(grove_id) {
                grove.members.remove(rule_tree_id);
            }
        }

        info!("注册表条目已删除");
        Ok(item)
    }

    /// 按 id 排序
    pub fn item_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.read().items.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// 新增或覆盖规则组描述，已有成员保留
    #[instrument(skip(self, grove), fields(grove_id = %grove.grove_id))]
    pub fn add_grove(&self, grove: RuleGrove) -> Result<()> {
        if grove.grove_id.trim().is_empty() {
            return Err(RuleError::ParseError("规则组 id 不能为空".to_string()));
        }

        let mut state = self.state.write();
        let entry = state
            .groves
            .entry(grove.grove_id.clone())
            .or_insert_with(|| RuleGrove::new(grove.grove_id.clone()));
        entry.description = grove.description;

        let members = grove.members;
        drop(state);

        for (rule_tree_id, order) in members {
            self.add_grove_member(&grove.grove_id, &rule_tree_id, order)?;
        }

        debug!("规则组已写入");
        Ok(())
    }

    pub fn get_grove(&self, grove_id: &str) -> Option<RuleGrove> {
        self.state.read().groves.get(grove_id).cloned()
    }

    /// 将规则树加入规则组
    ///
    /// `order == 0` 时忽略并返回 `Ok(false)`。规则组不存在时隐式创建。
    #[instrument(skip(self))]
    pub fn add_grove_member(&self, grove_id: &str, rule_tree_id: &str, order: u32) -> Result<bool> {
        if order == 0 {
            debug!("位置为 0，忽略");
            return Ok(false);
        }

        let mut state = self.state.write();
        let Some(item) = state.items.get_mut(rule_tree_id) else {
            return Err(RuleError::RuleTreeNotFound(rule_tree_id.to_string()));
        };
        item.grove_memberships.insert(grove_id.to_string(), order);
        item.updated_at = Utc::now();
        let item = item.clone();

        state
            .groves
            .entry(grove_id.to_string())
            .or_insert_with(|| RuleGrove::new(grove_id))
            .members
            .insert(rule_tree_id.to_string(), order);

        self.persist(&item)?;

        info!("规则组成员已写入");
        Ok(true)
    }

    /// 从规则组移除成员，返回是否存在
    #[instrument(skip(self))]
    pub fn remove_grove_member(&self, grove_id: &str, rule_tree_id: &str) -> Result<bool> {
        let mut state = self.state.write();

        let removed = state
            .groves
            .get_mut(grove_id)
            .and_then(|g| g.members.remove(rule_tree_id))
            .is_some();

        if let Some(item) = state.items.get_mut(rule_tree_id) {
            if item.grove_memberships.remove(grove_id).is_some() {
                item.updated_at = Utc::now();
                let item = item.clone();
                self.persist(&item)?;
            }
        }

        Ok(removed)
    }

    /// 规则组成员条目，按位置升序
    pub fn get_grove_members(&self, grove_id: &str) -> Vec<RegistryItem> {
        let state = self.state.read();
        let Some(grove) = state.groves.get(grove_id) else {
            return Vec::new();
        };

        grove
            .ordered_member_ids()
            .iter()
            .filter_map(|id| state.items.get(id).cloned())
            .collect()
    }

    /// 规则组成员 id，按位置升序
    pub fn get_grove_member_ids(&self, grove_id: &str) -> Vec<String> {
        self.state
            .read()
            .groves
            .get(grove_id)
            .map(RuleGrove::ordered_member_ids)
            .unwrap_or_default()
    }

    fn persist(&self, item: &RegistryItem) -> Result<()> {
        if let Some(sink) = &self.sink {
            let payload = serde_json::to_string(item)?;
            sink.persist(&item.rule_tree_id, &payload)?;
        }
        Ok(())
    }
}
