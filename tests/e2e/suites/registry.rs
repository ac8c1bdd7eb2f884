//! 规则注册表测试套件

use crate::setup::{LOAN_TREE_ID, TestEnvironment};
use rule_engine::{OperatorKind, RegistryItem, Rule, RuleGrove, RuleSet, RuleTree};

#[test]
fn test_loaded_trees_are_registered() {
    let env = TestEnvironment::setup().unwrap();

    let item = env.engine.registry.get_item(LOAN_TREE_ID).unwrap();
    assert_eq!(item.owner, "risk-team");
    assert_eq!(item.description, "贷款申请审核");
    assert!(item.required_attributes.contains(&"credit_limit".to_string()));
    assert_eq!(env.engine.registry.item_ids(), vec![LOAN_TREE_ID]);
}

#[test]
fn test_grove_orders_members() {
    let env = TestEnvironment::setup().unwrap();
    let kyc = env
        .engine
        .trees
        .load(
            RuleTree::new(
                "KYC",
                RuleSet::and("root")
                    .with_rule(Rule::new(1, "applicant_age", OperatorKind::Populated)),
            )
            .with_id("kyc"),
        )
        .unwrap();
    env.engine
        .registry
        .add_item(RegistryItem::from_compiled(&kyc).with_gas_cost(10, 50))
        .unwrap();

    env.engine
        .registry
        .add_grove(RuleGrove::new("lending").with_description("放贷流程"))
        .unwrap();
    assert!(env.engine.registry.add_grove_member("lending", LOAN_TREE_ID, 2).unwrap());
    assert!(env.engine.registry.add_grove_member("lending", "kyc", 1).unwrap());
    // 顺序为 0 视为无操作
    assert!(!env.engine.registry.add_grove_member("lending", "kyc", 0).unwrap());

    assert_eq!(
        env.engine.registry.get_grove_member_ids("lending"),
        vec!["kyc".to_string(), LOAN_TREE_ID.to_string()]
    );

    let err = env
        .engine
        .registry
        .add_grove_member("lending", "missing", 3)
        .unwrap_err();
    assert_eq!(err.code(), "RULE_TREE_NOT_FOUND");
}
