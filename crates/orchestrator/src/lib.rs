//! 记录变更编排
//!
//! - 模拟-提交两阶段协议，保证存在严重规则失败时不会持久化
//! - 加权多签确认状态机，作为提交前置条件
//! - 外部记录存储接口与内存实现

pub mod error;
pub mod orchestrator;
pub mod permission;
pub mod store;

pub use error::{OrchestratorError, ProtocolStep, Result};
pub use orchestrator::{CycleOutcome, EvaluationSite, Orchestrator, RecordCommand};
pub use permission::{
    ConfirmationStatus, PermissionError, PermissionResult, TransactionState, DEFAULT_OWNER_WEIGHT,
    MAX_OWNERS,
};
pub use store::{
    ExecutionMode, MemoryRecordStore, RecordStore, StoreCall, StoreError, StoreFunction,
    StoreResult,
};
