//! 规则树引擎
//!
//! 提供记录校验与赋值能力，支持：
//! - 属性目录与值校验
//! - 嵌套 AND/OR 规则集、严重级别聚合
//! - 四参数统一调用的自定义操作符
//! - 规则树编译、缓存与规则组注册表

pub mod catalog;
pub mod compiler;
pub mod context;
pub mod custom;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod models;
pub mod operators;
pub mod registry;
pub mod store;

pub use catalog::{Attribute, AttributeCatalog};
pub use compiler::{CompiledRuleTree, RuleTreeCompiler};
pub use context::EngineContext;
pub use custom::{
    CachedDomainOperator, CustomOperator, CustomOperatorKind, CustomOperatorRegistry,
    CustomOperatorSource, LedgerInvoker, LookupBackend, SourcedOperator, CUSTOM_OPERATOR_ARITY,
};
pub use error::{Result, RuleError};
pub use executor::RuleTreeExecutor;
pub use models::{
    Operand, Record, Rule, RuleOutcome, RuleSet, RuleSetDefinition, RuleSetOutcome, RuleTree,
    RuleTreeDefinition, RuleTreeReport, TargetRecord,
};
pub use operators::{ComposeMode, OperatorKind, Severity};
pub use registry::{MemorySink, RegistryItem, RegistrySink, RuleGrove, RuleRegistry};
pub use store::{RuleTreeStore, RuleTreeStoreStats};
