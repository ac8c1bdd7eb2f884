//! 条件评估器
//!
//! 实现内置操作符的判定与赋值计算。数值比较按属性声明的数值类型解析操作数，
//! 解析失败以错误返回，由执行器记为规则失败。

use crate::catalog::Attribute;
use crate::error::{Result, RuleError};
use crate::operators::OperatorKind;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use std::cmp::Ordering;

/// 条件评估器
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// 评估判定类操作符
    ///
    /// # Arguments
    /// * `operator` - 操作符
    /// * `target` - 目标属性的当前值，记录中不存在时为 None
    /// * `operands` - 已解析为字符串的操作数
    /// * `attribute` - 目标属性的元数据
    pub fn evaluate(
        operator: OperatorKind,
        target: Option<&str>,
        operands: &[String],
        attribute: &Attribute,
    ) -> Result<bool> {
        if operator == OperatorKind::Populated {
            return Ok(target.is_some_and(|v| !v.trim().is_empty()));
        }

        // 目标值不存在时，其余判定均不成立
        let Some(target) = target else {
            return Ok(false);
        };

        match operator {
            OperatorKind::Equal => {
                Self::equals(target, Self::first(operator, operands)?, attribute)
            }
            OperatorKind::NotEqual => {
                Self::equals(target, Self::first(operator, operands)?, attribute).map(|r| !r)
            }
            OperatorKind::GreaterThan => Self::compare(target, operator, operands, attribute)
                .map(|o| o == Ordering::Greater),
            OperatorKind::GreaterThanOrEqual => Self::compare(target, operator, operands, attribute)
                .map(|o| o != Ordering::Less),
            OperatorKind::LessThan => {
                Self::compare(target, operator, operands, attribute).map(|o| o == Ordering::Less)
            }
            OperatorKind::LessThanOrEqual => Self::compare(target, operator, operands, attribute)
                .map(|o| o != Ordering::Greater),
            OperatorKind::InDomain => Self::in_domain(target, operands, attribute),
            OperatorKind::Matches => Self::regex_match(target, Self::first(operator, operands)?),
            OperatorKind::Before => {
                Self::time_compare(target, Self::first(operator, operands)?, |a, b| a < b)
            }
            OperatorKind::After => {
                Self::time_compare(target, Self::first(operator, operands)?, |a, b| a > b)
            }
            other => Err(RuleError::Structural(format!(
                "操作符 {} 不是判定类操作符",
                other
            ))),
        }
    }

    /// 计算赋值类操作符的结果值（不含自定义操作符）
    pub fn compute(operator: OperatorKind, operands: &[String]) -> Result<String> {
        match operator {
            OperatorKind::Assign => Ok(Self::first(operator, operands)?.to_string()),
            OperatorKind::Add => Self::fold(operands, |acc, v| Ok(acc + v)),
            OperatorKind::Subtract => Self::fold(operands, |acc, v| Ok(acc - v)),
            OperatorKind::Multiply => Self::fold(operands, |acc, v| Ok(acc * v)),
            OperatorKind::Divide => Self::fold(operands, |acc, v| {
                if v == 0.0 {
                    Err(RuleError::InvalidValue {
                        attribute: "divisor".to_string(),
                        reason: "除数为 0".to_string(),
                    })
                } else {
                    Ok(acc / v)
                }
            }),
            other => Err(RuleError::Structural(format!(
                "操作符 {} 不是内置赋值操作符",
                other
            ))),
        }
    }

    /// 将自定义操作符返回值解释为布尔判定
    pub fn is_truthy(value: &str) -> bool {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "y"
        )
    }

    fn first<'a>(operator: OperatorKind, operands: &'a [String]) -> Result<&'a str> {
        operands
            .first()
            .map(String::as_str)
            .ok_or_else(|| RuleError::ParseError(format!("{} 操作符缺少操作数", operator)))
    }

    /// 相等比较：数值属性按数值比较（避免 "100" 与 "100.0" 不等）
    fn equals(target: &str, expected: &str, attribute: &Attribute) -> Result<bool> {
        if attribute.is_numeric {
            let a = Self::parse_number(target)?;
            let b = Self::parse_number(expected)?;
            return Ok((a - b).abs() < f64::EPSILON);
        }
        Ok(target == expected)
    }

    /// 大小比较：数值属性按数值，其余按字典序
    fn compare(
        target: &str,
        operator: OperatorKind,
        operands: &[String],
        attribute: &Attribute,
    ) -> Result<Ordering> {
        let expected = Self::first(operator, operands)?;

        if attribute.is_numeric {
            let a = Self::parse_number(target)?;
            let b = Self::parse_number(expected)?;
            return a.partial_cmp(&b).ok_or_else(|| RuleError::TypeMismatch {
                expected: "comparable number".to_string(),
                actual: format!("{} / {}", target, expected),
            });
        }

        Ok(target.cmp(expected))
    }

    /// 值域检查
    fn in_domain(target: &str, operands: &[String], attribute: &Attribute) -> Result<bool> {
        for candidate in operands {
            if Self::equals(target, candidate, attribute)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// 正则表达式匹配
    fn regex_match(target: &str, pattern: &str) -> Result<bool> {
        let regex = Regex::new(pattern).map_err(|e| {
            RuleError::ParseError(format!("无效的正则表达式 '{}': {}", pattern, e))
        })?;
        Ok(regex.is_match(target))
    }

    /// 时间比较
    fn time_compare<F>(target: &str, expected: &str, cmp: F) -> Result<bool>
    where
        F: Fn(DateTime<Utc>, DateTime<Utc>) -> bool,
    {
        let target_time = Self::parse_datetime(target)?;
        let expected_time = Self::parse_datetime(expected)?;
        Ok(cmp(target_time, expected_time))
    }

    /// 解析日期时间（RFC 3339 或纯日期）
    fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
            return Ok(dt.with_timezone(&Utc));
        }

        if let Some(dt) = NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
        {
            return Ok(dt.and_utc());
        }

        Err(RuleError::TypeMismatch {
            expected: "datetime".to_string(),
            actual: format!("'{}'", value),
        })
    }

    fn parse_number(value: &str) -> Result<f64> {
        value
            .trim()
            .parse::<f64>()
            .map_err(|_| RuleError::TypeMismatch {
                expected: "number".to_string(),
                actual: format!("'{}'", value),
            })
    }

    fn fold<F>(operands: &[String], op: F) -> Result<String>
    where
        F: Fn(f64, f64) -> Result<f64>,
    {
        let (first, rest) = operands
            .split_first()
            .ok_or_else(|| RuleError::ParseError("算术操作符缺少操作数".to_string()))?;

        let mut acc = Self::parse_number(first)?;
        for value in rest {
            acc = op(acc, Self::parse_number(value)?)?;
        }

        Ok(Self::format_number(acc))
    }

    /// 整数结果不带小数部分输出
    fn format_number(value: f64) -> String {
        if value.fract() == 0.0 && value.abs() < 1e15 {
            format!("{}", value as i64)
        } else {
            value.to_string()
        }
    }
}
