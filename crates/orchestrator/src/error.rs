//! 编排器错误类型

use crate::permission::PermissionError;
use crate::store::StoreError;
use rule_engine::RuleError;
use std::fmt;
use thiserror::Error;

/// 协议步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolStep {
    Serialize,
    Simulate,
    Permission,
    Commit,
    Deserialize,
}

impl fmt::Display for ProtocolStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Serialize => "serialize",
            Self::Simulate => "simulate",
            Self::Permission => "permission",
            Self::Commit => "commit",
            Self::Deserialize => "deserialize",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// 暂存写入失败，后续步骤均未执行
    #[error("协议中止于 {step} 步骤: {source}")]
    ProtocolAbort {
        step: ProtocolStep,
        #[source]
        source: StoreError,
    },

    #[error("存储调用失败 ({step}): {source}")]
    Store {
        step: ProtocolStep,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error("规则树结构错误: {0}")]
    Structural(RuleError),

    #[error("远程评估报告无法解析: {0}")]
    InvalidReport(#[from] serde_json::Error),

    #[error("编排已取消 ({step})")]
    Cancelled { step: ProtocolStep },

    #[error("步骤 {step} 超时 ({timeout_ms}ms)")]
    Timeout { step: ProtocolStep, timeout_ms: u64 },
}

impl OrchestratorError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ProtocolAbort { .. } => "PROTOCOL_ABORT",
            Self::Store { .. } => "STORE_ERROR",
            Self::Permission(e) => e.code(),
            Self::Structural(_) => "STRUCTURAL_ERROR",
            Self::InvalidReport(_) => "INVALID_REPORT",
            Self::Cancelled { .. } => "CANCELLED",
            Self::Timeout { .. } => "TIMEOUT",
        }
    }

    /// 失败发生的协议步骤
    pub fn step(&self) -> Option<ProtocolStep> {
        match self {
            Self::ProtocolAbort { step, .. }
            | Self::Store { step, .. }
            | Self::Cancelled { step }
            | Self::Timeout { step, .. } => Some(*step),
            Self::Permission(_) => Some(ProtocolStep::Permission),
            Self::Structural(_) | Self::InvalidReport(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
