//! 规则操作符定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 规则操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorKind {
    // 比较
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,

    // 存在性与取值范围
    Populated,
    InDomain,

    // 字符串
    Matches,

    // 时间
    Before,
    After,

    // 算术赋值：对操作数求值后写入目标属性
    Add,
    Subtract,
    Multiply,
    Divide,

    // 直接赋值
    Assign,

    // 自定义操作符：Custom 以返回值作为判定结果，CustomAssign 将返回值写入目标属性
    Custom,
    CustomAssign,
}

impl OperatorKind {
    /// 是否为赋值类操作符（不产生通过/失败判定）
    pub fn is_assignment(&self) -> bool {
        matches!(
            self,
            Self::Add
                | Self::Subtract
                | Self::Multiply
                | Self::Divide
                | Self::Assign
                | Self::CustomAssign
        )
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            Self::Add | Self::Subtract | Self::Multiply | Self::Divide
        )
    }

    /// 是否需要绑定自定义操作符名称
    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom | Self::CustomAssign)
    }

    /// 操作数个数下限
    pub fn min_operands(&self) -> usize {
        match self {
            Self::Populated | Self::Custom | Self::CustomAssign => 0,
            _ => 1,
        }
    }

    /// 操作数个数上限，None 表示不限制
    pub fn max_operands(&self) -> Option<usize> {
        match self {
            Self::Populated => Some(0),
            Self::Equal
            | Self::NotEqual
            | Self::GreaterThan
            | Self::GreaterThanOrEqual
            | Self::LessThan
            | Self::LessThanOrEqual
            | Self::Matches
            | Self::Before
            | Self::After
            | Self::Assign => Some(1),
            Self::Custom | Self::CustomAssign => Some(crate::custom::CUSTOM_OPERATOR_ARITY),
            Self::InDomain | Self::Add | Self::Subtract | Self::Multiply | Self::Divide => None,
        }
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Equal => "equal",
            Self::NotEqual => "not_equal",
            Self::GreaterThan => "greater_than",
            Self::GreaterThanOrEqual => "greater_than_or_equal",
            Self::LessThan => "less_than",
            Self::LessThanOrEqual => "less_than_or_equal",
            Self::Populated => "populated",
            Self::InDomain => "in_domain",
            Self::Matches => "matches",
            Self::Before => "before",
            Self::After => "after",
            Self::Add => "add",
            Self::Subtract => "subtract",
            Self::Multiply => "multiply",
            Self::Divide => "divide",
            Self::Assign => "assign",
            Self::Custom => "custom",
            Self::CustomAssign => "custom_assign",
        };
        write!(f, "{}", s)
    }
}

/// 规则集组合方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ComposeMode {
    And,
    Or,
}

impl fmt::Display for ComposeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
        }
    }
}

/// 规则集失败的严重级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    #[default]
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "ERROR"),
            Self::Warning => write!(f, "WARNING"),
        }
    }
}
