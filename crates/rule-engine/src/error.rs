//! 规则引擎错误类型

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("规则定义解析失败: {0}")]
    ParseError(String),

    #[error("未知属性: {attribute} (位置: {path})")]
    UnknownAttribute { attribute: String, path: String },

    #[error("规则树结构错误: {0}")]
    Structural(String),

    #[error("规则集存在循环引用: {cycle}")]
    CycleDetected { cycle: String },

    #[error("自定义操作符已注册: {0}")]
    DuplicateOperator(String),

    #[error("自定义操作符未注册: {0}")]
    UnknownOperator(String),

    #[error("自定义操作符调用失败: {name} - {message}")]
    CustomOperatorFailed { name: String, message: String },

    #[error("类型不匹配: 期望 {expected}, 实际 {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("属性值无效: {attribute} - {reason}")]
    InvalidValue { attribute: String, reason: String },

    #[error("规则树未找到: {0}")]
    RuleTreeNotFound(String),

    #[error("规则树评估已取消")]
    Cancelled,

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RuleError>;

impl RuleError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::ParseError(_) => "PARSE_ERROR",
            Self::UnknownAttribute { .. } => "UNKNOWN_ATTRIBUTE",
            Self::Structural(_) => "STRUCTURAL_ERROR",
            Self::CycleDetected { .. } => "CYCLE_DETECTED",
            Self::DuplicateOperator(_) => "DUPLICATE_OPERATOR",
            Self::UnknownOperator(_) => "UNKNOWN_OPERATOR",
            Self::CustomOperatorFailed { .. } => "CUSTOM_OPERATOR_FAILED",
            Self::TypeMismatch { .. } => "TYPE_MISMATCH",
            Self::InvalidValue { .. } => "INVALID_VALUE",
            Self::RuleTreeNotFound(_) => "RULE_TREE_NOT_FOUND",
            Self::Cancelled => "CANCELLED",
            Self::JsonError(_) => "JSON_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// 是否为结构性错误（规则树本身有缺陷，整次评估中止）
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::Structural(_) | Self::CycleDetected { .. } | Self::ParseError(_)
        )
    }
}
