//! 外部记录存储接口
//!
//! 编排器只把存储当作不透明的键值推拉加远程调用面，每次调用都带执行模式：
//! Simulate 只写暂存区、不产生持久影响；Commit 持久化。

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rule_engine::{AttributeCatalog, Record};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// 执行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionMode {
    Simulate,
    Commit,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simulate => write!(f, "SIMULATE"),
            Self::Commit => write!(f, "COMMIT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("记录不存在: {0}")]
    RecordNotFound(String),

    #[error("存储不接受字段: {field} (记录: {record_id})")]
    UnknownField { record_id: String, field: String },

    #[error("字段 {field} 的值长度超过上限 {max}")]
    ValueTooLong { field: String, max: usize },

    #[error("远程函数不存在: {0}")]
    UnknownFunction(String),

    #[error("存储后端错误: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::RecordNotFound(_) => "RECORD_NOT_FOUND",
            Self::UnknownField { .. } => "UNKNOWN_FIELD",
            Self::ValueTooLong { .. } => "VALUE_TOO_LONG",
            Self::UnknownFunction(_) => "UNKNOWN_FUNCTION",
            Self::Backend(_) => "BACKEND_ERROR",
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// 记录存储 / 账本接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// 将字段值写入存储（Simulate 写暂存区）
    async fn serialize(
        &self,
        record_id: &str,
        fields: &Record,
        mode: ExecutionMode,
    ) -> StoreResult<()>;

    /// 读取记录当前值（Simulate 读暂存区）
    async fn deserialize(&self, record_id: &str, mode: ExecutionMode) -> StoreResult<Record>;

    /// 调用存储侧的远程函数
    async fn invoke(
        &self,
        function: &str,
        args: &[String],
        mode: ExecutionMode,
    ) -> StoreResult<String>;
}

/// 远程函数：参数、执行模式 -> 返回值
pub type StoreFunction = Arc<dyn Fn(&[String], ExecutionMode) -> StoreResult<String> + Send + Sync>;

/// 存储调用记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Serialize { record_id: String, mode: ExecutionMode },
    Deserialize { record_id: String, mode: ExecutionMode },
    Invoke { function: String, mode: ExecutionMode },
}

/// 内存记录存储
///
/// 提交区保存持久值；暂存区以提交值为底，叠加 Simulate 写入的字段。
/// 配置属性目录后只接受目录中的字段，并按最大长度校验值。
#[derive(Default)]
pub struct MemoryRecordStore {
    committed: DashMap<String, Record>,
    staged: DashMap<String, Record>,
    functions: DashMap<String, StoreFunction>,
    catalog: Option<Arc<AttributeCatalog>>,
    calls: Mutex<Vec<StoreCall>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(catalog: Arc<AttributeCatalog>) -> Self {
        Self {
            catalog: Some(catalog),
            ..Default::default()
        }
    }

    /// 注册远程函数
    pub fn register_function<F>(&self, name: impl Into<String>, function: F)
    where
        F: Fn(&[String], ExecutionMode) -> StoreResult<String> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
    }

    /// 直接写入提交区（初始化数据）
    pub fn seed(&self, record_id: impl Into<String>, record: Record) {
        self.committed.insert(record_id.into(), record);
    }

    pub fn committed(&self, record_id: &str) -> Option<Record> {
        self.committed.get(record_id).map(|r| r.value().clone())
    }

    pub fn staged(&self, record_id: &str) -> Option<Record> {
        self.staged.get(record_id).map(|r| r.value().clone())
    }

    /// 已发生的调用，按时间顺序
    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().clone()
    }

    /// 指定模式下的调用次数
    pub fn call_count(&self, mode: ExecutionMode) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| match c {
                StoreCall::Serialize { mode: m, .. }
                | StoreCall::Deserialize { mode: m, .. }
                | StoreCall::Invoke { mode: m, .. } => *m == mode,
            })
            .count()
    }

    fn check_fields(&self, record_id: &str, fields: &Record) -> StoreResult<()> {
        let Some(catalog) = &self.catalog else {
            return Ok(());
        };

        for (name, value) in fields.iter() {
            let attribute = catalog.get(name).ok_or_else(|| StoreError::UnknownField {
                record_id: record_id.to_string(),
                field: name.to_string(),
            })?;

            if attribute.max_length > 0 && value.chars().count() > attribute.max_length {
                return Err(StoreError::ValueTooLong {
                    field: name.to_string(),
                    max: attribute.max_length,
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn serialize(
        &self,
        record_id: &str,
        fields: &Record,
        mode: ExecutionMode,
    ) -> StoreResult<()> {
        self.calls.lock().push(StoreCall::Serialize {
            record_id: record_id.to_string(),
            mode,
        });
        self.check_fields(record_id, fields)?;

        match mode {
            ExecutionMode::Simulate => {
                let mut staged = self.committed(record_id).unwrap_or_default();
                staged.merge(fields);
                self.staged.insert(record_id.to_string(), staged);
            }
            ExecutionMode::Commit => {
                self.committed
                    .entry(record_id.to_string())
                    .or_default()
                    .merge(fields);
                self.staged.remove(record_id);
            }
        }

        debug!(record_id, %mode, fields = fields.len(), "记录已写入存储");
        Ok(())
    }

    async fn deserialize(&self, record_id: &str, mode: ExecutionMode) -> StoreResult<Record> {
        self.calls.lock().push(StoreCall::Deserialize {
            record_id: record_id.to_string(),
            mode,
        });

        let record = match mode {
            ExecutionMode::Simulate => self.staged(record_id).or_else(|| self.committed(record_id)),
            ExecutionMode::Commit => self.committed(record_id),
        };

        record.ok_or_else(|| StoreError::RecordNotFound(record_id.to_string()))
    }

    async fn invoke(
        &self,
        function: &str,
        args: &[String],
        mode: ExecutionMode,
    ) -> StoreResult<String> {
        self.calls.lock().push(StoreCall::Invoke {
            function: function.to_string(),
            mode,
        });

        let handler = self
            .functions
            .get(function)
            .map(|f| Arc::clone(f.value()))
            .ok_or_else(|| StoreError::UnknownFunction(function.to_string()))?;

        handler(args, mode)
    }
}
