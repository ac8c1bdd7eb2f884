//! 模拟-提交编排器
//!
//! 单次记录变更周期严格按以下顺序执行：
//! 1. 将命令字段写入存储暂存区（失败即中止，后续步骤不执行）
//! 2. 模拟评估，不产生持久影响
//! 3. 出现严重失败则结束周期、不尝试提交；否则查询多签状态
//! 4. 提交评估，持久化结果
//! 5. 从存储读回最终值写入命令
//!
//! 每个存储调用都受取消信号和步骤超时约束。

use crate::error::{OrchestratorError, ProtocolStep, Result};
use crate::permission::TransactionState;
use crate::store::{ExecutionMode, RecordStore, StoreError, StoreResult};
use ledger_rules_shared::config::OrchestratorConfig;
use ledger_rules_shared::observability::metrics::{
    ORCHESTRATION_CYCLES_TOTAL, ORCHESTRATION_CYCLE_DURATION_SECONDS,
};
use rule_engine::{CompiledRuleTree, EngineContext, Record, RuleError, RuleTreeReport};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// 记录变更命令
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCommand {
    pub record_id: String,
    pub fields: Record,
    /// 发起执行的账户，多签状态配置了批准列表时校验
    #[serde(default)]
    pub executor: Option<String>,
}

impl RecordCommand {
    pub fn new(record_id: impl Into<String>, fields: Record) -> Self {
        Self {
            record_id: record_id.into(),
            fields,
            executor: None,
        }
    }

    pub fn with_executor(mut self, executor: impl Into<String>) -> Self {
        self.executor = Some(executor.into());
        self
    }
}

/// 规则树评估位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationSite {
    /// 进程内引擎评估，提交时由编排器写回存储
    #[default]
    Local,
    /// 调用存储侧镜像合约评估，由存储自行持久化
    Remote,
}

/// 单次周期结果
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub cycle_id: String,
    /// 周期是否成功提交且无严重失败
    pub valid: bool,
    pub committed: bool,
    pub report: RuleTreeReport,
}

/// 模拟-提交编排器
pub struct Orchestrator {
    store: Arc<dyn RecordStore>,
    engine: EngineContext,
    config: OrchestratorConfig,
    site: EvaluationSite,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        engine: EngineContext,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            engine,
            config,
            site: EvaluationSite::Local,
        }
    }

    pub fn with_site(mut self, site: EvaluationSite) -> Self {
        self.site = site;
        self
    }

    pub fn site(&self) -> EvaluationSite {
        self.site
    }

    /// 执行一次完整的模拟-提交周期
    ///
    /// 规则失败通过 `CycleOutcome::valid` 与报告返回；存储、权限、取消、超时以 Err 返回。
    #[instrument(
        skip_all,
        fields(record_id = %command.record_id, rule_tree_id = %tree.id(), site = ?self.site)
    )]
    pub async fn execute(
        &self,
        command: &mut RecordCommand,
        tree: Arc<CompiledRuleTree>,
        gate: Option<&mut TransactionState>,
        cancel: &watch::Receiver<bool>,
    ) -> Result<CycleOutcome> {
        let start = Instant::now();
        let cycle_id = Uuid::now_v7().to_string();

        let result = self.run_cycle(&cycle_id, command, &tree, gate, cancel).await;

        metrics::histogram!(ORCHESTRATION_CYCLE_DURATION_SECONDS)
            .record(start.elapsed().as_secs_f64());
        let label = match &result {
            Ok(outcome) if outcome.committed => "committed",
            Ok(_) => "rejected",
            Err(e) => e.code(),
        };
        metrics::counter!(ORCHESTRATION_CYCLES_TOTAL, "outcome" => label).increment(1);

        match &result {
            Ok(outcome) => info!(
                cycle_id = %cycle_id,
                valid = outcome.valid,
                committed = outcome.committed,
                failure_count = outcome.report.failure_count,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "编排周期完成"
            ),
            Err(e) => warn!(cycle_id = %cycle_id, error = %e, step = ?e.step(), "编排周期失败"),
        }

        result
    }

    async fn run_cycle(
        &self,
        cycle_id: &str,
        command: &mut RecordCommand,
        tree: &CompiledRuleTree,
        mut gate: Option<&mut TransactionState>,
        cancel: &watch::Receiver<bool>,
    ) -> Result<CycleOutcome> {
        // 1. 写入暂存区
        self.call(
            ProtocolStep::Serialize,
            cancel,
            self.store
                .serialize(&command.record_id, &command.fields, ExecutionMode::Simulate),
        )
        .await
        .map_err(|e| match e {
            OrchestratorError::Store { step, source } => {
                OrchestratorError::ProtocolAbort { step, source }
            }
            other => other,
        })?;

        // 2. 模拟评估
        let report = self
            .evaluate(ProtocolStep::Simulate, &command.record_id, tree, cancel)
            .await?;

        // 3. 严重失败则不提交
        if report.is_severe_failure {
            info!(
                failed_rules = ?report.failed_rule_ids,
                failed_rule_sets = ?report.failed_rule_set_ids,
                "模拟评估存在严重失败，放弃提交"
            );
            if let Some(gate) = gate.as_deref_mut() {
                gate.clear_pending_transaction();
            }
            return Ok(Self::rejected(cycle_id, report));
        }

        if let Some(gate) = gate.as_deref() {
            Self::check_cancelled(ProtocolStep::Permission, cancel)?;
            gate.ensure_executor_approved(command.executor.as_deref())?;
            gate.ensure_confirmed()?;
            debug!(score = gate.confirmed_score(), "多签确认已满足");
        }

        // 4. 提交评估
        let report = self
            .evaluate(ProtocolStep::Commit, &command.record_id, tree, cancel)
            .await?;

        if report.is_severe_failure {
            warn!(
                failed_rules = ?report.failed_rule_ids,
                "提交评估出现模拟阶段未出现的严重失败，未持久化"
            );
            if let Some(gate) = gate.as_deref_mut() {
                gate.clear_pending_transaction();
            }
            return Ok(Self::rejected(cycle_id, report));
        }

        // 5. 读回最终值
        command.fields = self
            .call(
                ProtocolStep::Deserialize,
                cancel,
                self.store.deserialize(&command.record_id, ExecutionMode::Commit),
            )
            .await?;

        if let Some(gate) = gate.as_deref_mut() {
            gate.clear_pending_transaction();
        }

        Ok(CycleOutcome {
            cycle_id: cycle_id.to_string(),
            valid: true,
            committed: true,
            report,
        })
    }

    fn rejected(cycle_id: &str, report: RuleTreeReport) -> CycleOutcome {
        CycleOutcome {
            cycle_id: cycle_id.to_string(),
            valid: false,
            committed: false,
            report,
        }
    }

    /// 按评估位置执行一次评估；Commit 步骤在无严重失败时持久化
    async fn evaluate(
        &self,
        step: ProtocolStep,
        record_id: &str,
        tree: &CompiledRuleTree,
        cancel: &watch::Receiver<bool>,
    ) -> Result<RuleTreeReport> {
        let mode = match step {
            ProtocolStep::Commit => ExecutionMode::Commit,
            _ => ExecutionMode::Simulate,
        };

        match self.site {
            EvaluationSite::Local => {
                self.evaluate_local(step, mode, record_id, tree, cancel)
                    .await
            }
            EvaluationSite::Remote => {
                self.evaluate_remote(step, mode, record_id, tree, cancel)
                    .await
            }
        }
    }

    async fn evaluate_local(
        &self,
        step: ProtocolStep,
        mode: ExecutionMode,
        record_id: &str,
        tree: &CompiledRuleTree,
        cancel: &watch::Receiver<bool>,
    ) -> Result<RuleTreeReport> {
        let staged = self
            .call(step, cancel, self.store.deserialize(record_id, ExecutionMode::Simulate))
            .await?;

        // 记录尚未提交过时以空记录作为旧值
        let old = match self
            .call(step, cancel, self.store.deserialize(record_id, ExecutionMode::Commit))
            .await
        {
            Ok(record) => record,
            Err(OrchestratorError::Store {
                source: StoreError::RecordNotFound(_),
                ..
            }) => Record::new(),
            Err(e) => return Err(e),
        };

        let mut new = staged;
        let report = self
            .engine
            .executor_with_cancel(cancel.clone())
            .execute(&tree.tree, &old, &mut new)
            .map_err(|e| match e {
                RuleError::Cancelled => OrchestratorError::Cancelled { step },
                other => OrchestratorError::Structural(other),
            })?;

        debug!(
            %mode,
            failure_count = report.failure_count,
            is_severe_failure = report.is_severe_failure,
            "本地评估完成"
        );

        if mode == ExecutionMode::Commit && !report.is_severe_failure {
            self.call(step, cancel, self.store.serialize(record_id, &new, ExecutionMode::Commit))
                .await?;
        }

        Ok(report)
    }

    async fn evaluate_remote(
        &self,
        step: ProtocolStep,
        mode: ExecutionMode,
        record_id: &str,
        tree: &CompiledRuleTree,
        cancel: &watch::Receiver<bool>,
    ) -> Result<RuleTreeReport> {
        let args = [tree.id().to_string(), record_id.to_string()];
        let raw = self
            .call(
                step,
                cancel,
                self.store
                    .invoke(&self.config.remote_execute_function, &args, mode),
            )
            .await?;

        let report: RuleTreeReport = serde_json::from_str(&raw)?;
        debug!(
            %mode,
            function = %self.config.remote_execute_function,
            failure_count = report.failure_count,
            "远程评估完成"
        );
        Ok(report)
    }

    /// 带取消与超时的存储调用
    ///
    /// 取消信号在调用前已置位时不发起调用；调用进行中置位则停止等待。
    async fn call<T, F>(
        &self,
        step: ProtocolStep,
        cancel: &watch::Receiver<bool>,
        fut: F,
    ) -> Result<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        Self::check_cancelled(step, cancel)?;

        let timeout_ms = self.config.step_timeout_ms;
        let guarded = async move {
            if timeout_ms == 0 {
                Ok::<_, tokio::time::error::Elapsed>(fut.await)
            } else {
                tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await
            }
        };

        let mut cancel = cancel.clone();
        tokio::select! {
            // 偏向取消信号
            biased;

            _ = wait_for_cancel(&mut cancel) => Err(OrchestratorError::Cancelled { step }),

            result = guarded => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(source)) => Err(OrchestratorError::Store { step, source }),
                Err(_) => Err(OrchestratorError::Timeout { step, timeout_ms }),
            },
        }
    }

    fn check_cancelled(step: ProtocolStep, cancel: &watch::Receiver<bool>) -> Result<()> {
        if *cancel.borrow() {
            return Err(OrchestratorError::Cancelled { step });
        }
        Ok(())
    }
}

/// 等待取消信号置位；发送端已关闭时永不返回
async fn wait_for_cancel(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}
