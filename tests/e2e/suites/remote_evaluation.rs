//! 远程评估测试套件
//!
//! 存储侧注册镜像评估函数：读取暂存区与提交区，执行同一棵规则树，
//! Commit 模式下自行持久化，并以 JSON 返回评估报告。

use crate::setup::{LOAN_TREE_ID, TestEnvironment};
use rule_engine::Record;
use rule_orchestrator::{
    EvaluationSite, ExecutionMode, MemoryRecordStore, RecordCommand, StoreCall, StoreError,
};
use std::sync::{Arc, Weak};
use tokio::sync::watch;

fn register_mirror(env: &TestEnvironment) {
    let store: Weak<MemoryRecordStore> = Arc::downgrade(&env.store);
    let engine = env.engine.clone();
    let function = env.config.orchestrator.remote_execute_function.clone();

    env.store.register_function(function, move |args: &[String], mode: ExecutionMode| {
        let [rule_tree_id, record_id] = args else {
            return Err(StoreError::Backend(format!("参数个数错误: {}", args.len())));
        };
        let store = store
            .upgrade()
            .ok_or_else(|| StoreError::Backend("存储已释放".to_string()))?;
        let tree = engine
            .trees
            .require(rule_tree_id)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let old = store.committed(record_id).unwrap_or_default();
        let mut new = store.staged(record_id).unwrap_or_else(|| old.clone());
        let report = engine
            .executor()
            .execute(&tree.tree, &old, &mut new)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        if mode == ExecutionMode::Commit && !report.is_severe_failure {
            store.seed(record_id.clone(), new);
        }

        serde_json::to_string(&report).map_err(|e| StoreError::Backend(e.to_string()))
    });
}

#[tokio::test]
async fn test_remote_cycle_matches_local_result() {
    let env = TestEnvironment::setup().unwrap();
    env.seed_applicant("app-20", "52", "7000");
    register_mirror(&env);
    let tree = env.engine.trees.require(LOAN_TREE_ID).unwrap();
    let orchestrator = env.orchestrator().with_site(EvaluationSite::Remote);
    let (_tx, rx) = watch::channel(false);

    let mut command = RecordCommand::new("app-20", Record::new().with("requested", "500"));
    let outcome = orchestrator
        .execute(&mut command, tree, None, &rx)
        .await
        .unwrap();

    assert!(outcome.committed);
    assert_eq!(command.fields.get("credit_limit"), Some("21000"));
    assert_eq!(command.fields.get("status"), Some("approved"));

    let function = env.config.orchestrator.remote_execute_function.clone();
    assert_eq!(
        env.store.calls(),
        vec![
            StoreCall::Serialize {
                record_id: "app-20".to_string(),
                mode: ExecutionMode::Simulate
            },
            StoreCall::Invoke {
                function: function.clone(),
                mode: ExecutionMode::Simulate
            },
            StoreCall::Invoke {
                function,
                mode: ExecutionMode::Commit
            },
            StoreCall::Deserialize {
                record_id: "app-20".to_string(),
                mode: ExecutionMode::Commit
            },
        ]
    );
}

#[tokio::test]
async fn test_remote_severe_failure_skips_commit() {
    let env = TestEnvironment::setup().unwrap();
    env.seed_applicant("app-21", "16", "7000");
    register_mirror(&env);
    let tree = env.engine.trees.require(LOAN_TREE_ID).unwrap();
    let orchestrator = env.orchestrator().with_site(EvaluationSite::Remote);
    let (_tx, rx) = watch::channel(false);

    let mut command = RecordCommand::new("app-21", Record::new().with("requested", "500"));
    let outcome = orchestrator
        .execute(&mut command, tree, None, &rx)
        .await
        .unwrap();

    assert!(!outcome.committed);
    assert!(outcome.report.is_severe_failure);
    assert_eq!(env.store.call_count(ExecutionMode::Commit), 0);
    assert_eq!(env.store.committed("app-21").unwrap().get("status"), Some("pending"));
}
