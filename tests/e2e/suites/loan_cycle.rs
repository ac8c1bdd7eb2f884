//! 贷款申请模拟-提交周期测试套件
//!
//! 验证从磁盘加载的规则树在本地评估下的完整周期：
//! 通过时写回派生字段，严重失败时已提交记录保持不变。

use crate::setup::{LOAN_TREE_ID, TestEnvironment};
use rule_engine::Record;
use rule_orchestrator::{ExecutionMode, RecordCommand};
use tokio::sync::watch;

#[tokio::test]
async fn test_approved_application_commits_derived_fields() {
    let env = TestEnvironment::setup().unwrap();
    env.seed_applicant("app-1", "30", "5000");
    let tree = env.engine.trees.require(LOAN_TREE_ID).unwrap();
    let (_tx, rx) = watch::channel(false);

    let mut command = RecordCommand::new("app-1", Record::new().with("requested", "4000"));
    let outcome = env
        .orchestrator()
        .execute(&mut command, tree, None, &rx)
        .await
        .unwrap();

    assert!(outcome.valid);
    assert!(outcome.committed);
    assert!(outcome.report.passed);
    assert_eq!(outcome.report.failure_count, 0);
    // 配置开启了评估追踪
    assert!(!outcome.report.evaluation_trace.is_empty());

    assert_eq!(command.fields.get("status"), Some("approved"));
    assert_eq!(command.fields.get("credit_limit"), Some("15000"));

    let committed = env.store.committed("app-1").unwrap();
    assert_eq!(committed.get("requested"), Some("4000"));
    assert_eq!(committed.get("credit_limit"), Some("15000"));
}

#[tokio::test]
async fn test_unaffordable_request_leaves_record_untouched() {
    let env = TestEnvironment::setup().unwrap();
    env.seed_applicant("app-2", "30", "5000");
    let tree = env.engine.trees.require(LOAN_TREE_ID).unwrap();
    let (_tx, rx) = watch::channel(false);

    let mut command = RecordCommand::new("app-2", Record::new().with("requested", "9000"));
    let outcome = env
        .orchestrator()
        .execute(&mut command, tree, None, &rx)
        .await
        .unwrap();

    assert!(!outcome.valid);
    assert!(!outcome.committed);
    assert!(outcome.report.is_severe_failure);
    assert_eq!(outcome.report.failed_rule_ids, vec!["3"]);
    assert_eq!(outcome.report.rule_set_passed("affordability"), Some(false));

    let committed = env.store.committed("app-2").unwrap();
    assert_eq!(committed.get("status"), Some("pending"));
    assert!(!committed.contains("requested"));
    assert!(!committed.contains("credit_limit"));
    assert_eq!(env.store.call_count(ExecutionMode::Commit), 1);
}

#[tokio::test]
async fn test_unsupported_country_is_severe() {
    let env = TestEnvironment::setup().unwrap();
    env.seed_applicant("app-3", "45", "8000");
    let tree = env.engine.trees.require(LOAN_TREE_ID).unwrap();
    let (_tx, rx) = watch::channel(false);

    let mut command = RecordCommand::new(
        "app-3",
        Record::new().with("requested", "100").with("country", "FR"),
    );
    let outcome = env
        .orchestrator()
        .execute(&mut command, tree, None, &rx)
        .await
        .unwrap();

    assert!(!outcome.committed);
    assert_eq!(outcome.report.failed_rule_ids, vec!["2"]);
    assert_eq!(env.store.committed("app-3").unwrap().get("country"), Some("US"));
}

#[tokio::test]
async fn test_warning_failure_still_commits() {
    let env = TestEnvironment::setup().unwrap();
    env.seed_applicant("app-4", "22", "3000");
    let tree = env.engine.trees.require(LOAN_TREE_ID).unwrap();
    let (_tx, rx) = watch::channel(false);

    let mut command = RecordCommand::new(
        "app-4",
        Record::new().with("requested", "1000").with("email", "no-at-sign"),
    );
    let outcome = env
        .orchestrator()
        .execute(&mut command, tree, None, &rx)
        .await
        .unwrap();

    assert!(outcome.valid);
    assert!(outcome.committed);
    assert!(!outcome.report.is_severe_failure);
    assert_eq!(outcome.report.failed_rule_set_ids, vec!["contact"]);
    assert_eq!(command.fields.get("email"), Some("no-at-sign"));
    assert_eq!(command.fields.get("credit_limit"), Some("9000"));
}

#[tokio::test]
async fn test_first_cycle_creates_record() {
    let env = TestEnvironment::setup().unwrap();
    let tree = env.engine.trees.require(LOAN_TREE_ID).unwrap();
    let (_tx, rx) = watch::channel(false);

    let mut command = RecordCommand::new(
        "app-new",
        Record::new()
            .with("applicant_age", "41")
            .with("income", "1200")
            .with("requested", "1200")
            .with("country", "CA")
            .with("email", "new@example.com"),
    );
    let outcome = env
        .orchestrator()
        .execute(&mut command, tree, None, &rx)
        .await
        .unwrap();

    assert!(outcome.committed);
    let committed = env.store.committed("app-new").unwrap();
    assert_eq!(committed.get("status"), Some("approved"));
    assert_eq!(committed.get("credit_limit"), Some("3600"));
    assert!(env.store.staged("app-new").is_none());
}
