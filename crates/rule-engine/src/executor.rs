//! 规则树执行器
//!
//! 深度优先、先序遍历规则集树。不做短路求值：每条规则在一次评估中恰好访问一次，
//! 保证赋值类规则总能执行、报告完整；规则集自身的结果按 AND/OR 聚合成员结果。

use crate::catalog::AttributeCatalog;
use crate::custom::CustomOperatorRegistry;
use crate::error::{Result, RuleError};
use crate::evaluator::ConditionEvaluator;
use crate::models::{
    Operand, Record, Rule, RuleOutcome, RuleSet, RuleSetOutcome, RuleTree, RuleTreeReport,
    TargetRecord,
};
use crate::operators::{ComposeMode, OperatorKind};
use ledger_rules_shared::observability::metrics::{
    RULE_TREE_EVALUATIONS_TOTAL, RULE_TREE_EVALUATION_DURATION_SECONDS,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, instrument};

/// 默认最大嵌套深度
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// 规则树执行器
pub struct RuleTreeExecutor {
    catalog: Arc<AttributeCatalog>,
    operators: Arc<CustomOperatorRegistry>,
    /// 是否记录详细评估追踪
    trace_enabled: bool,
    max_depth: usize,
    cancel: Option<watch::Receiver<bool>>,
}

impl RuleTreeExecutor {
    pub fn new(catalog: Arc<AttributeCatalog>, operators: Arc<CustomOperatorRegistry>) -> Self {
        Self {
            catalog,
            operators,
            trace_enabled: false,
            max_depth: DEFAULT_MAX_DEPTH,
            cancel: None,
        }
    }

    /// 启用评估追踪
    pub fn with_trace(mut self) -> Self {
        self.trace_enabled = true;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// 绑定取消信号，信号为 true 时在下一条规则前停止
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// 执行规则树评估
    ///
    /// 规则失败记录在报告中；仅结构错误和取消以 Err 返回。
    /// 赋值类规则会修改 `new`。
    #[instrument(skip_all, fields(rule_tree_id = %tree.id))]
    pub fn execute(
        &self,
        tree: &RuleTree,
        old: &Record,
        new: &mut Record,
    ) -> Result<RuleTreeReport> {
        let start = Instant::now();
        let mut report = RuleTreeReport::new(tree.id.clone());

        self.check_cancelled()?;

        let outcome = self.evaluate_rule_set(&tree.root, 0, "root", old, new, &mut report);

        let elapsed = start.elapsed();
        metrics::histogram!(RULE_TREE_EVALUATION_DURATION_SECONDS).record(elapsed.as_secs_f64());

        let passed = match outcome {
            Ok(passed) => passed,
            Err(e) => {
                metrics::counter!(RULE_TREE_EVALUATIONS_TOTAL, "outcome" => "error").increment(1);
                return Err(e);
            }
        };

        report.passed = passed;
        report.evaluation_time_ms = elapsed.as_millis() as i64;

        let label = if report.is_severe_failure {
            "severe_failure"
        } else if report.failure_count > 0 {
            "warning"
        } else {
            "passed"
        };
        metrics::counter!(RULE_TREE_EVALUATIONS_TOTAL, "outcome" => label).increment(1);

        debug!(
            passed = report.passed,
            failure_count = report.failure_count,
            is_severe_failure = report.is_severe_failure,
            visited = report.visited_rule_count(),
            "规则树评估完成"
        );

        Ok(report)
    }

    /// 递归评估规则集：先规则、后子规则集，均按声明顺序
    fn evaluate_rule_set(
        &self,
        rule_set: &RuleSet,
        depth: usize,
        path: &str,
        old: &Record,
        new: &mut Record,
        report: &mut RuleTreeReport,
    ) -> Result<bool> {
        if depth > self.max_depth {
            return Err(RuleError::Structural(format!(
                "规则集 '{}' 嵌套深度超过上限 {}",
                rule_set.id, self.max_depth
            )));
        }

        if rule_set.rules.is_empty() && rule_set.child_rule_sets.is_empty() {
            return Err(RuleError::Structural(format!(
                "规则集 '{}' ({}) 不包含任何规则或子规则集",
                rule_set.id, path
            )));
        }

        if self.trace_enabled {
            report.evaluation_trace.push(format!(
                "{}: 开始评估 {} 规则集 '{}' ({} 条规则, {} 个子规则集)",
                path,
                rule_set.compose_mode,
                rule_set.id,
                rule_set.rules.len(),
                rule_set.child_rule_sets.len()
            ));
        }

        let mut results = Vec::with_capacity(rule_set.rules.len() + rule_set.child_rule_sets.len());

        for rule in &rule_set.rules {
            self.check_cancelled()?;
            results.push(self.evaluate_rule(rule, rule_set, path, old, new, report));
        }
        let own_rule_failed = results.iter().any(|r| !*r);

        for (i, child) in rule_set.child_rule_sets.iter().enumerate() {
            let child_path = format!("{}.children[{}]", path, i);
            results.push(self.evaluate_rule_set(child, depth + 1, &child_path, old, new, report)?);
        }

        let passed = match rule_set.compose_mode {
            ComposeMode::And => results.iter().all(|r| *r),
            ComposeMode::Or => results.iter().any(|r| *r),
        };

        if self.trace_enabled {
            report.evaluation_trace.push(format!(
                "{}: {} 规则集 '{}' => {}",
                path,
                rule_set.compose_mode,
                rule_set.id,
                if passed { "PASSED" } else { "FAILED" }
            ));
        }

        // 严重级别按聚合结果判定；仅由子规则集导致的失败沿用子规则集自身的级别
        if !passed && own_rule_failed {
            report.record_rule_set_failure(rule_set.severity);
        }

        report.rule_set_outcomes.push(RuleSetOutcome {
            rule_set_id: rule_set.id.clone(),
            passed,
        });

        Ok(passed)
    }

    /// 评估单条规则并记录结果
    ///
    /// 规则级错误（属性无法解析、操作符未注册、类型不匹配等）只记为本规则失败。
    fn evaluate_rule(
        &self,
        rule: &Rule,
        rule_set: &RuleSet,
        path: &str,
        old: &Record,
        new: &mut Record,
        report: &mut RuleTreeReport,
    ) -> bool {
        let (passed, detail) = match self.apply_rule(rule, old, new) {
            Ok(passed) => (passed, None),
            Err(e) => (false, Some(e.to_string())),
        };

        if self.trace_enabled {
            report.evaluation_trace.push(format!(
                "{}.rules[{}]: {} {} {:?}{} => {}",
                path,
                rule.id,
                rule.target_attribute,
                rule.operator,
                rule.operands,
                if rule.negate { " (negated)" } else { "" },
                match (&detail, passed) {
                    (Some(err), _) => format!("ERROR ({})", err),
                    (None, true) => "PASSED".to_string(),
                    (None, false) => "FAILED".to_string(),
                }
            ));
        }

        if !passed {
            report.record_failure(&rule_set.id, rule.id);
        }

        report.rule_outcomes.push(RuleOutcome {
            rule_id: rule.id,
            rule_set_id: rule_set.id.clone(),
            passed,
            detail,
        });

        passed
    }

    fn apply_rule(&self, rule: &Rule, old: &Record, new: &mut Record) -> Result<bool> {
        let attribute = self.catalog.require(&rule.target_attribute, "rule target")?;
        let operands = self.resolve_operands(rule, new)?;

        let target = match rule.target_record {
            TargetRecord::Old => old.get(&rule.target_attribute),
            TargetRecord::New => new.get(&rule.target_attribute),
        }
        .map(str::to_string);

        let result = match rule.operator {
            OperatorKind::Custom => {
                let value = self.invoke_custom(rule, &operands)?;
                ConditionEvaluator::is_truthy(&value)
            }
            OperatorKind::CustomAssign => {
                let value = self.invoke_custom(rule, &operands)?;
                attribute.validate(&value)?;
                new.set(rule.target_attribute.clone(), value);
                return Ok(true);
            }
            op if op.is_assignment() => {
                let value = ConditionEvaluator::compute(op, &operands)?;
                attribute.validate(&value)?;
                new.set(rule.target_attribute.clone(), value);
                return Ok(true);
            }
            op => ConditionEvaluator::evaluate(op, target.as_deref(), &operands, attribute)?,
        };

        Ok(result != rule.negate)
    }

    /// 解析操作数：属性引用从新记录读取，缺失时回退到属性默认值
    fn resolve_operands(&self, rule: &Rule, new: &Record) -> Result<Vec<String>> {
        rule.operands
            .iter()
            .map(|operand| match operand {
                Operand::Literal(value) => Ok(value.clone()),
                Operand::Attribute(name) => {
                    let attribute = self.catalog.require(name, "rule operand")?;
                    Ok(new
                        .get(name)
                        .map(str::to_string)
                        .unwrap_or_else(|| attribute.default_value.clone()))
                }
            })
            .collect()
    }

    fn invoke_custom(&self, rule: &Rule, operands: &[String]) -> Result<String> {
        let name = rule.custom_operator.as_deref().ok_or_else(|| {
            RuleError::Structural(format!("规则 {} 缺少自定义操作符名称", rule.id))
        })?;

        self.operators.invoke(name, operands).map_err(|e| match e {
            RuleError::UnknownOperator(_) | RuleError::CustomOperatorFailed { .. } => e,
            other => RuleError::CustomOperatorFailed {
                name: name.to_string(),
                message: other.to_string(),
            },
        })
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(cancel) if *cancel.borrow() => Err(RuleError::Cancelled),
            _ => Ok(()),
        }
    }
}
