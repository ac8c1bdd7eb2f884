//! 多签门控测试套件
//!
//! 验证确认分数不足时周期停在权限步骤、确认保留以便重试，
//! 达到分数后提交并清理确认。

use crate::setup::{LOAN_TREE_ID, TestEnvironment};
use rule_engine::Record;
use rule_orchestrator::{ConfirmationStatus, OrchestratorError, RecordCommand, TransactionState};
use std::sync::Arc;
use tokio::sync::watch;

fn gate() -> TransactionState {
    let mut gate = TransactionState::new("0xloans", [("alice", 1), ("bob", 1), ("carol", 2)])
        .unwrap()
        .with_min_score(3)
        .unwrap();
    gate.approve_executor("0xdesk");
    gate
}

#[tokio::test]
async fn test_insufficient_score_blocks_commit_then_retry_succeeds() {
    let env = TestEnvironment::setup().unwrap();
    env.seed_applicant("app-10", "35", "6000");
    let tree = env.engine.trees.require(LOAN_TREE_ID).unwrap();
    let orchestrator = env.orchestrator();
    let (_tx, rx) = watch::channel(false);
    let mut gate = gate();

    gate.add_confirmation("alice").unwrap();
    let mut command = RecordCommand::new("app-10", Record::new().with("requested", "2000"))
        .with_executor("0xdesk");
    let err = orchestrator
        .execute(&mut command, Arc::clone(&tree), Some(&mut gate), &rx)
        .await
        .unwrap_err();

    match err {
        OrchestratorError::Permission(e) => {
            assert_eq!(e.code(), "NOT_CONFIRMED");
            assert!(e.to_string().contains("当前 1"));
        }
        other => panic!("unexpected error: {other}"),
    }
    // 权限失败不清理确认，未持久化
    assert_eq!(gate.status(), ConfirmationStatus::PartiallyConfirmed);
    assert_eq!(env.store.committed("app-10").unwrap().get("status"), Some("pending"));

    gate.add_confirmation("carol").unwrap();
    assert_eq!(gate.status(), ConfirmationStatus::FullyConfirmed);

    let mut command = RecordCommand::new("app-10", Record::new().with("requested", "2000"))
        .with_executor("0xdesk");
    let outcome = orchestrator
        .execute(&mut command, tree, Some(&mut gate), &rx)
        .await
        .unwrap();

    assert!(outcome.committed);
    assert_eq!(command.fields.get("credit_limit"), Some("18000"));
    assert_eq!(gate.status(), ConfirmationStatus::NoConfirmations);
    assert_eq!(gate.confirmed_score(), 0);
}

#[tokio::test]
async fn test_rule_failure_clears_confirmations() {
    let env = TestEnvironment::setup().unwrap();
    env.seed_applicant("app-11", "17", "6000");
    let tree = env.engine.trees.require(LOAN_TREE_ID).unwrap();
    let (_tx, rx) = watch::channel(false);
    let mut gate = gate();
    gate.add_confirmation("carol").unwrap();
    gate.add_confirmation("bob").unwrap();

    let mut command =
        RecordCommand::new("app-11", Record::new().with("requested", "10")).with_executor("0xdesk");
    let outcome = env
        .orchestrator()
        .execute(&mut command, tree, Some(&mut gate), &rx)
        .await
        .unwrap();

    assert!(!outcome.committed);
    assert_eq!(outcome.report.failed_rule_ids, vec!["1"]);
    assert_eq!(gate.status(), ConfirmationStatus::NoConfirmations);
}

#[tokio::test]
async fn test_owner_changes_recompute_default_score() {
    let mut gate =
        TransactionState::with_equal_weights("0xloans", ["alice", "bob", "carol", "dave"])
            .unwrap();
    assert_eq!(gate.min_required_score(), 2);

    gate.set_owner("erin", 1).unwrap();
    gate.set_owner("frank", 1).unwrap();
    assert_eq!(gate.min_required_score(), 3);

    gate.remove_owner("alice").unwrap();
    assert_eq!(gate.min_required_score(), 2);
    assert!(gate.add_confirmation("alice").is_err());
}
