//! 加权多签确认状态机
//!
//! 记录待执行变更的所有者权重与确认情况。已确认所有者的权重之和达到最低分数时，
//! 变更才被视为已批准。状态本身不执行任何变更，由编排器在提交前查询。

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

/// 所有者数量上限
pub const MAX_OWNERS: usize = 250;

/// 未指定权重时的默认权重
pub const DEFAULT_OWNER_WEIGHT: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionError {
    #[error("不是所有者: {0}")]
    NotAnOwner(String),

    #[error("所有者数量 {count} 超过上限 {max}")]
    TooManyOwners { count: usize, max: usize },

    #[error("至少需要一个所有者")]
    NoOwners,

    #[error("所有者地址不能为空")]
    BlankOwner,

    #[error("所有者 {0} 的权重必须大于 0")]
    InvalidWeight(String),

    #[error("最低确认分数必须大于 0")]
    InvalidMinScore,

    #[error("确认分数不足: 当前 {current}, 需要 {required} (已确认: {confirmed:?}, 未确认: {unconfirmed:?})")]
    NotConfirmed {
        current: u64,
        required: u64,
        confirmed: Vec<String>,
        unconfirmed: Vec<String>,
    },

    #[error("执行者未获批准: {0}")]
    ExecutorNotApproved(String),
}

impl PermissionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotAnOwner(_) => "NOT_AN_OWNER",
            Self::TooManyOwners { .. } => "TOO_MANY_OWNERS",
            Self::NoOwners => "NO_OWNERS",
            Self::BlankOwner => "BLANK_OWNER",
            Self::InvalidWeight(_) => "INVALID_WEIGHT",
            Self::InvalidMinScore => "INVALID_MIN_SCORE",
            Self::NotConfirmed { .. } => "NOT_CONFIRMED",
            Self::ExecutorNotApproved(_) => "EXECUTOR_NOT_APPROVED",
        }
    }
}

pub type PermissionResult<T> = std::result::Result<T, PermissionError>;

/// 确认进度（按需计算，不单独存储）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfirmationStatus {
    NoConfirmations,
    PartiallyConfirmed,
    FullyConfirmed,
}

impl fmt::Display for ConfirmationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoConfirmations => write!(f, "NO_CONFIRMATIONS"),
            Self::PartiallyConfirmed => write!(f, "PARTIALLY_CONFIRMED"),
            Self::FullyConfirmed => write!(f, "FULLY_CONFIRMED"),
        }
    }
}

/// 待执行变更的多签状态
///
/// 反序列化先读入持久化形式，再经过与构造函数相同的校验。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "TransactionStateRecord")]
pub struct TransactionState {
    contract_address: String,
    owner_weights: BTreeMap<String, u32>,
    confirmations: BTreeMap<String, bool>,
    min_required_score: u64,
    /// 最低分数是否显式设置；未设置时随所有者变化重新计算默认值
    explicit_min_score: bool,
    approved_executors: BTreeSet<String>,
}

/// 持久化形式，字段与 [`TransactionState`] 的序列化结果一致
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionStateRecord {
    contract_address: String,
    owner_weights: BTreeMap<String, u32>,
    #[serde(default)]
    confirmations: BTreeMap<String, bool>,
    #[serde(default)]
    min_required_score: u64,
    #[serde(default)]
    explicit_min_score: bool,
    #[serde(default)]
    approved_executors: BTreeSet<String>,
}

impl TryFrom<TransactionStateRecord> for TransactionState {
    type Error = PermissionError;

    fn try_from(record: TransactionStateRecord) -> PermissionResult<Self> {
        let mut state = Self::new(record.contract_address, record.owner_weights)?;
        // 未显式设置时最低分数由所有者数量推导
        if record.explicit_min_score {
            state.set_min_score_requirement(record.min_required_score)?;
        }
        for (owner, confirmed) in record.confirmations {
            if !state.is_owner(&owner) {
                return Err(PermissionError::NotAnOwner(owner));
            }
            if confirmed {
                state.add_confirmation(&owner)?;
            }
        }
        for executor in record.approved_executors {
            state.approve_executor(executor);
        }
        Ok(state)
    }
}

impl TransactionState {
    /// 创建状态，最低分数取默认值
    pub fn new<I, S>(contract_address: impl Into<String>, owners: I) -> PermissionResult<Self>
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let mut owner_weights = BTreeMap::new();
        for (owner, weight) in owners {
            let owner = owner.into();
            Self::validate_owner(&owner, weight)?;
            owner_weights.insert(owner, weight);
        }

        if owner_weights.is_empty() {
            return Err(PermissionError::NoOwners);
        }
        if owner_weights.len() > MAX_OWNERS {
            return Err(PermissionError::TooManyOwners {
                count: owner_weights.len(),
                max: MAX_OWNERS,
            });
        }

        let confirmations = owner_weights.keys().map(|o| (o.clone(), false)).collect();
        let min_required_score = Self::default_min_score(owner_weights.len());

        Ok(Self {
            contract_address: contract_address.into(),
            owner_weights,
            confirmations,
            min_required_score,
            explicit_min_score: false,
            approved_executors: BTreeSet::new(),
        })
    }

    /// 所有者权重均为默认值
    pub fn with_equal_weights<I, S>(
        contract_address: impl Into<String>,
        owners: I,
    ) -> PermissionResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            contract_address,
            owners.into_iter().map(|o| (o, DEFAULT_OWNER_WEIGHT)),
        )
    }

    /// 显式指定最低分数
    pub fn with_min_score(mut self, min_required_score: u64) -> PermissionResult<Self> {
        self.set_min_score_requirement(min_required_score)?;
        Ok(self)
    }

    /// 默认最低分数：所有者数量的一半（向下取整），至少为 1
    pub fn default_min_score(owner_count: usize) -> u64 {
        ((owner_count / 2) as u64).max(1)
    }

    pub fn contract_address(&self) -> &str {
        &self.contract_address
    }

    pub fn owner_count(&self) -> usize {
        self.owner_weights.len()
    }

    pub fn owner_weight(&self, owner: &str) -> Option<u32> {
        self.owner_weights.get(owner).copied()
    }

    pub fn is_owner(&self, owner: &str) -> bool {
        self.owner_weights.contains_key(owner)
    }

    pub fn min_required_score(&self) -> u64 {
        self.min_required_score
    }

    pub fn is_confirmed_by(&self, owner: &str) -> bool {
        self.confirmations.get(owner).copied().unwrap_or(false)
    }

    /// 所有者确认
    pub fn add_confirmation(&mut self, owner: &str) -> PermissionResult<()> {
        let confirmed = self
            .confirmations
            .get_mut(owner)
            .ok_or_else(|| PermissionError::NotAnOwner(owner.to_string()))?;
        *confirmed = true;

        debug!(
            contract = %self.contract_address,
            owner,
            score = self.confirmed_score(),
            required = self.min_required_score,
            "所有者已确认"
        );
        Ok(())
    }

    /// 撤销单个所有者的确认
    pub fn revoke_confirmation(&mut self, owner: &str) -> PermissionResult<()> {
        let confirmed = self
            .confirmations
            .get_mut(owner)
            .ok_or_else(|| PermissionError::NotAnOwner(owner.to_string()))?;
        *confirmed = false;
        Ok(())
    }

    pub fn revoke_all_confirmations(&mut self) {
        for confirmed in self.confirmations.values_mut() {
            *confirmed = false;
        }
    }

    /// 清理待执行变更（提交或中止后调用）
    pub fn clear_pending_transaction(&mut self) {
        self.revoke_all_confirmations();
    }

    /// 已确认所有者的权重之和
    pub fn confirmed_score(&self) -> u64 {
        self.confirmations
            .iter()
            .filter(|(_, confirmed)| **confirmed)
            .filter_map(|(owner, _)| self.owner_weights.get(owner))
            .map(|w| u64::from(*w))
            .sum()
    }

    pub fn is_transaction_confirmed(&self) -> bool {
        self.confirmed_score() >= self.min_required_score
    }

    pub fn status(&self) -> ConfirmationStatus {
        if self.is_transaction_confirmed() {
            ConfirmationStatus::FullyConfirmed
        } else if self.confirmations.values().any(|c| *c) {
            ConfirmationStatus::PartiallyConfirmed
        } else {
            ConfirmationStatus::NoConfirmations
        }
    }

    /// 未达到最低分数时返回带上下文的错误
    pub fn ensure_confirmed(&self) -> PermissionResult<()> {
        if self.is_transaction_confirmed() {
            return Ok(());
        }

        let (confirmed, unconfirmed): (Vec<_>, Vec<_>) =
            self.confirmations.iter().partition(|(_, c)| **c);

        Err(PermissionError::NotConfirmed {
            current: self.confirmed_score(),
            required: self.min_required_score,
            confirmed: confirmed.into_iter().map(|(o, _)| o.clone()).collect(),
            unconfirmed: unconfirmed.into_iter().map(|(o, _)| o.clone()).collect(),
        })
    }

    /// 新增所有者或更新权重
    pub fn set_owner(&mut self, owner: impl Into<String>, weight: u32) -> PermissionResult<()> {
        let owner = owner.into();
        Self::validate_owner(&owner, weight)?;

        if !self.owner_weights.contains_key(&owner) && self.owner_weights.len() >= MAX_OWNERS {
            return Err(PermissionError::TooManyOwners {
                count: self.owner_weights.len() + 1,
                max: MAX_OWNERS,
            });
        }

        self.confirmations.entry(owner.clone()).or_insert(false);
        self.owner_weights.insert(owner, weight);
        self.refresh_default_min_score();
        Ok(())
    }

    /// 移除所有者及其确认；不允许移除最后一个所有者
    pub fn remove_owner(&mut self, owner: &str) -> PermissionResult<()> {
        if !self.owner_weights.contains_key(owner) {
            return Err(PermissionError::NotAnOwner(owner.to_string()));
        }
        if self.owner_weights.len() == 1 {
            return Err(PermissionError::NoOwners);
        }

        self.owner_weights.remove(owner);
        self.confirmations.remove(owner);
        self.refresh_default_min_score();
        self.warn_if_unreachable();
        Ok(())
    }

    pub fn set_min_score_requirement(&mut self, min_required_score: u64) -> PermissionResult<()> {
        if min_required_score == 0 {
            return Err(PermissionError::InvalidMinScore);
        }

        self.min_required_score = min_required_score;
        self.explicit_min_score = true;
        self.warn_if_unreachable();
        Ok(())
    }

    /// 批准执行者；批准列表为空时不限制执行者
    pub fn approve_executor(&mut self, executor: impl Into<String>) {
        self.approved_executors.insert(executor.into());
    }

    pub fn revoke_executor(&mut self, executor: &str) -> bool {
        self.approved_executors.remove(executor)
    }

    pub fn approved_executors(&self) -> impl Iterator<Item = &str> {
        self.approved_executors.iter().map(String::as_str)
    }

    pub fn ensure_executor_approved(&self, executor: Option<&str>) -> PermissionResult<()> {
        if self.approved_executors.is_empty() {
            return Ok(());
        }

        match executor {
            Some(e) if self.approved_executors.contains(e) => Ok(()),
            Some(e) => Err(PermissionError::ExecutorNotApproved(e.to_string())),
            None => Err(PermissionError::ExecutorNotApproved("<anonymous>".to_string())),
        }
    }

    fn validate_owner(owner: &str, weight: u32) -> PermissionResult<()> {
        if owner.trim().is_empty() {
            return Err(PermissionError::BlankOwner);
        }
        if weight == 0 {
            return Err(PermissionError::InvalidWeight(owner.to_string()));
        }
        Ok(())
    }

    fn refresh_default_min_score(&mut self) {
        if !self.explicit_min_score {
            self.min_required_score = Self::default_min_score(self.owner_weights.len());
        }
    }

    fn warn_if_unreachable(&self) {
        let total: u64 = self.owner_weights.values().map(|w| u64::from(*w)).sum();
        if self.min_required_score > total {
            warn!(
                contract = %self.contract_address,
                required = self.min_required_score,
                total_weight = total,
                "最低确认分数超过全部所有者权重之和"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weighted() -> TransactionState {
        TransactionState::new("0xcontract", [("A", 1), ("B", 1), ("C", 2)])
            .unwrap()
            .with_min_score(2)
            .unwrap()
    }

    #[test]
    fn test_weighted_scenario() {
        let mut state = weighted();
        state.add_confirmation("C").unwrap();
        assert!(state.is_transaction_confirmed());

        state.revoke_all_confirmations();
        state.add_confirmation("A").unwrap();
        assert!(!state.is_transaction_confirmed());
        assert_eq!(state.status(), ConfirmationStatus::PartiallyConfirmed);

        state.add_confirmation("B").unwrap();
        assert!(state.is_transaction_confirmed());
        assert_eq!(state.status(), ConfirmationStatus::FullyConfirmed);
    }

    #[test]
    fn test_add_revoke_round_trip() {
        let mut state = weighted();
        state.add_confirmation("A").unwrap();
        let before = state.confirmed_score();

        state.add_confirmation("C").unwrap();
        state.revoke_confirmation("C").unwrap();

        assert_eq!(state.confirmed_score(), before);
    }

    #[test]
    fn test_confirmation_is_idempotent() {
        let mut state = weighted();
        state.add_confirmation("A").unwrap();
        state.add_confirmation("A").unwrap();
        assert_eq!(state.confirmed_score(), 1);
    }

    #[test]
    fn test_unknown_owner() {
        let mut state = weighted();
        assert_eq!(
            state.add_confirmation("Z"),
            Err(PermissionError::NotAnOwner("Z".to_string()))
        );
        assert!(state.revoke_confirmation("Z").is_err());
        assert!(state.remove_owner("Z").is_err());
    }

    #[test]
    fn test_owner_count_limits() {
        let none: Vec<(String, u32)> = Vec::new();
        assert_eq!(
            TransactionState::new("0xc", none).unwrap_err(),
            PermissionError::NoOwners
        );

        let owners: Vec<String> = (0..=MAX_OWNERS).map(|i| format!("0x{:04}", i)).collect();
        let err = TransactionState::with_equal_weights("0xc", owners).unwrap_err();
        assert_eq!(err.code(), "TOO_MANY_OWNERS");

        let owners: Vec<String> = (0..MAX_OWNERS).map(|i| format!("0x{:04}", i)).collect();
        let mut state = TransactionState::with_equal_weights("0xc", owners).unwrap();
        assert!(matches!(
            state.set_owner("0xextra", 1),
            Err(PermissionError::TooManyOwners { count: 251, max: 250 })
        ));
        // 更新已有所有者不受上限影响
        assert!(state.set_owner("0x0001", 3).is_ok());
    }

    #[test]
    fn test_default_min_score() {
        let state = TransactionState::with_equal_weights("0xc", ["A", "B", "C", "D", "E"]).unwrap();
        assert_eq!(state.min_required_score(), 2);

        let single = TransactionState::with_equal_weights("0xc", ["A"]).unwrap();
        assert_eq!(single.min_required_score(), 1);
        assert!(!single.is_transaction_confirmed());
    }

    #[test]
    fn test_default_min_score_follows_owners() {
        let mut state = TransactionState::with_equal_weights("0xc", ["A", "B"]).unwrap();
        assert_eq!(state.min_required_score(), 1);

        state.set_owner("C", 1).unwrap();
        state.set_owner("D", 1).unwrap();
        assert_eq!(state.min_required_score(), 2);

        let mut explicit = weighted();
        explicit.set_owner("D", 1).unwrap();
        explicit.set_owner("E", 1).unwrap();
        explicit.set_owner("F", 1).unwrap();
        assert_eq!(explicit.min_required_score(), 2);
    }

    #[test]
    fn test_invalid_owner_and_min_score() {
        let mut state = weighted();
        assert_eq!(state.set_owner("  ", 1), Err(PermissionError::BlankOwner));
        assert!(matches!(state.set_owner("D", 0), Err(PermissionError::InvalidWeight(_))));
        assert_eq!(
            state.set_min_score_requirement(0),
            Err(PermissionError::InvalidMinScore)
        );
        assert_eq!(state.min_required_score(), 2);
    }

    #[test]
    fn test_remove_owner_drops_confirmation() {
        let mut state = weighted();
        state.add_confirmation("C").unwrap();
        state.remove_owner("C").unwrap();

        assert!(!state.is_owner("C"));
        assert_eq!(state.confirmed_score(), 0);

        let mut single = TransactionState::with_equal_weights("0xc", ["A"]).unwrap();
        assert_eq!(single.remove_owner("A"), Err(PermissionError::NoOwners));
    }

    #[test]
    fn test_not_confirmed_context() {
        let mut state = weighted();
        state.add_confirmation("A").unwrap();

        match state.ensure_confirmed() {
            Err(PermissionError::NotConfirmed {
                current,
                required,
                confirmed,
                unconfirmed,
            }) => {
                assert_eq!(current, 1);
                assert_eq!(required, 2);
                assert_eq!(confirmed, vec!["A"]);
                assert_eq!(unconfirmed, vec!["B", "C"]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_clear_pending_transaction() {
        let mut state = weighted();
        state.add_confirmation("A").unwrap();
        state.add_confirmation("C").unwrap();

        state.clear_pending_transaction();

        assert_eq!(state.status(), ConfirmationStatus::NoConfirmations);
        assert_eq!(state.confirmed_score(), 0);
    }

    #[test]
    fn test_executor_approval() {
        let mut state = weighted();
        assert!(state.ensure_executor_approved(None).is_ok());

        state.approve_executor("0xrelayer");
        assert!(state.ensure_executor_approved(Some("0xrelayer")).is_ok());
        assert!(state.ensure_executor_approved(Some("0xother")).is_err());
        assert!(state.ensure_executor_approved(None).is_err());

        assert!(state.revoke_executor("0xrelayer"));
        assert!(state.ensure_executor_approved(Some("0xother")).is_ok());
    }

    #[test]
    fn test_serde_round_trip_keeps_state() {
        let mut state = weighted();
        state.add_confirmation("C").unwrap();
        state.approve_executor("0xrelayer");

        let json = serde_json::to_string(&state).unwrap();
        let restored: TransactionState = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.min_required_score(), 2);
        assert!(restored.is_confirmed_by("C"));
        assert!(!restored.is_confirmed_by("A"));
        assert_eq!(restored.status(), ConfirmationStatus::FullyConfirmed);
        assert!(restored.ensure_executor_approved(Some("0xrelayer")).is_ok());

        // 默认最低分数在恢复后继续随所有者变化
        let mut restored: TransactionState = serde_json::from_str(
            r#"{"contractAddress": "0xc", "ownerWeights": {"A": 1, "B": 1, "C": 1, "D": 1}}"#,
        )
        .unwrap();
        assert_eq!(restored.min_required_score(), 2);
        restored.set_owner("E", 1).unwrap();
        restored.set_owner("F", 1).unwrap();
        assert_eq!(restored.min_required_score(), 3);
    }

    #[test]
    fn test_deserialize_rejects_invalid_state() {
        let parse = |json: &str| serde_json::from_str::<TransactionState>(json);

        let err = parse(r#"{"contractAddress": "0xc", "ownerWeights": {}}"#).unwrap_err();
        assert!(err.to_string().contains("至少需要一个所有者"));

        assert!(parse(r#"{"contractAddress": "0xc", "ownerWeights": {"A": 0}}"#).is_err());
        assert!(parse(r#"{"contractAddress": "0xc", "ownerWeights": {" ": 1}}"#).is_err());

        let zero_min = r#"{
            "contractAddress": "0xc",
            "ownerWeights": {"A": 1},
            "minRequiredScore": 0,
            "explicitMinScore": true
        }"#;
        assert!(parse(zero_min).is_err());

        let stranger = r#"{
            "contractAddress": "0xc",
            "ownerWeights": {"A": 1},
            "confirmations": {"Z": true}
        }"#;
        let err = parse(stranger).unwrap_err();
        assert!(err.to_string().contains("不是所有者: Z"));
    }
}
