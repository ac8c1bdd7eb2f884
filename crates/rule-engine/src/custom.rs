//! 自定义操作符
//!
//! 自定义操作符统一为固定四参数、单返回值的调用接口，不论底层实现的真实参数个数，
//! 规则通过名称引用，由注册表解析后分发。内置三类实现：
//! - SQL 查询 / 存储过程（通过 `LookupBackend`）
//! - 账本合约调用（通过 `LedgerInvoker`）
//! - 缓存值域校验（`CachedDomainOperator`）

use crate::error::{Result, RuleError};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// 自定义操作符的固定参数个数
pub const CUSTOM_OPERATOR_ARITY: usize = 4;

/// 自定义操作符能力接口
///
/// 未使用的尾部参数以空字符串传入。调用的副作用（网络请求、缓存更新）对注册表透明。
pub trait CustomOperator: Send + Sync {
    fn invoke(&self, arg1: &str, arg2: &str, arg3: &str, arg4: &str) -> Result<String>;

    /// 以实际操作数调用（不超过四个）
    ///
    /// 默认补齐为四参数后转给 [`CustomOperator::invoke`]；需要区分
    /// "未提供" 与 "空值" 的实现可覆盖此方法。
    fn invoke_args(&self, args: &[&str]) -> Result<String> {
        let arg = |i: usize| args.get(i).copied().unwrap_or("");
        self.invoke(arg(0), arg(1), arg(2), arg(3))
    }
}

impl<F> CustomOperator for F
where
    F: Fn(&str, &str, &str, &str) -> Result<String> + Send + Sync,
{
    fn invoke(&self, arg1: &str, arg2: &str, arg3: &str, arg4: &str) -> Result<String> {
        self(arg1, arg2, arg3, arg4)
    }
}

/// 外部数据源调用方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomOperatorKind {
    SqlLookup,
    StoredProcedure,
    LedgerCall,
    CachedDomain,
}

impl fmt::Display for CustomOperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SqlLookup => "sql_lookup",
            Self::StoredProcedure => "stored_procedure",
            Self::LedgerCall => "ledger_call",
            Self::CachedDomain => "cached_domain",
        };
        write!(f, "{}", s)
    }
}

/// 外部数据源描述
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomOperatorSource {
    pub source_id: String,
    #[serde(default)]
    pub sender_address: String,
    /// 访问凭据，不参与序列化输出
    #[serde(default, skip_serializing)]
    pub credential: String,
    #[serde(default)]
    pub target_address: String,
    #[serde(default)]
    pub query_or_procedure_text: String,
    #[serde(default)]
    pub custom_operator_method_name: String,
}

impl CustomOperatorSource {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            ..Default::default()
        }
    }

    pub fn with_target(mut self, target_address: impl Into<String>) -> Self {
        self.target_address = target_address.into();
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query_or_procedure_text = query.into();
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.custom_operator_method_name = method.into();
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>, credential: impl Into<String>) -> Self {
        self.sender_address = sender.into();
        self.credential = credential.into();
        self
    }
}

// 手动实现 Debug，避免凭据出现在日志里
impl fmt::Debug for CustomOperatorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomOperatorSource")
            .field("source_id", &self.source_id)
            .field("sender_address", &self.sender_address)
            .field("credential", &"***")
            .field("target_address", &self.target_address)
            .field("query_or_procedure_text", &self.query_or_procedure_text)
            .field("custom_operator_method_name", &self.custom_operator_method_name)
            .finish()
    }
}

/// SQL / 存储过程查询后端
pub trait LookupBackend: Send + Sync {
    /// 以参数执行数据源中的查询文本，返回单个字符串结果
    fn query(&self, source: &CustomOperatorSource, params: &[&str]) -> Result<String>;
}

/// 账本合约调用后端
pub trait LedgerInvoker: Send + Sync {
    /// 调用 `source.target_address` 上的 `source.custom_operator_method_name`
    fn call(&self, source: &CustomOperatorSource, args: &[&str]) -> Result<String>;
}

/// 调用通道
#[derive(Clone)]
enum Invocation {
    Lookup(Arc<dyn LookupBackend>),
    Ledger(Arc<dyn LedgerInvoker>),
}

/// 绑定外部数据源的自定义操作符
#[derive(Clone)]
pub struct SourcedOperator {
    kind: CustomOperatorKind,
    source: CustomOperatorSource,
    invocation: Invocation,
}

impl SourcedOperator {
    pub fn sql_lookup(source: CustomOperatorSource, backend: Arc<dyn LookupBackend>) -> Self {
        Self {
            kind: CustomOperatorKind::SqlLookup,
            source,
            invocation: Invocation::Lookup(backend),
        }
    }

    pub fn stored_procedure(source: CustomOperatorSource, backend: Arc<dyn LookupBackend>) -> Self {
        Self {
            kind: CustomOperatorKind::StoredProcedure,
            source,
            invocation: Invocation::Lookup(backend),
        }
    }

    pub fn ledger_call(source: CustomOperatorSource, invoker: Arc<dyn LedgerInvoker>) -> Self {
        Self {
            kind: CustomOperatorKind::LedgerCall,
            source,
            invocation: Invocation::Ledger(invoker),
        }
    }

    pub fn kind(&self) -> CustomOperatorKind {
        self.kind
    }

    pub fn source(&self) -> &CustomOperatorSource {
        &self.source
    }
}

impl CustomOperator for SourcedOperator {
    fn invoke(&self, arg1: &str, arg2: &str, arg3: &str, arg4: &str) -> Result<String> {
        self.invoke_args(&[arg1, arg2, arg3, arg4])
    }

    /// 操作数原样传给数据源，空字符串操作数同样计入参数个数
    fn invoke_args(&self, args: &[&str]) -> Result<String> {
        debug!(
            kind = %self.kind,
            source_id = %self.source.source_id,
            arg_count = args.len(),
            "调用外部数据源"
        );

        match &self.invocation {
            Invocation::Lookup(backend) => backend.query(&self.source, args),
            Invocation::Ledger(invoker) => invoker.call(&self.source, args),
        }
    }
}

/// 缓存值域校验
///
/// 判断第一个参数是否属于缓存的值域，返回 "true" / "false"。
/// 值域可由数据源刷新（查询结果按逗号或换行分隔）。
pub struct CachedDomainOperator {
    domain: RwLock<HashSet<String>>,
    loader: Option<(CustomOperatorSource, Arc<dyn LookupBackend>)>,
}

impl CachedDomainOperator {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            domain: RwLock::new(values.into_iter().map(Into::into).collect()),
            loader: None,
        }
    }

    /// 由数据源加载值域
    pub fn with_loader(source: CustomOperatorSource, backend: Arc<dyn LookupBackend>) -> Self {
        Self {
            domain: RwLock::new(HashSet::new()),
            loader: Some((source, backend)),
        }
    }

    /// 从数据源重新加载值域，返回加载后的值个数
    #[instrument(skip(self))]
    pub fn refresh(&self) -> Result<usize> {
        let Some((source, backend)) = &self.loader else {
            return Ok(self.domain.read().len());
        };

        let raw = backend.query(source, &[])?;
        let values: HashSet<String> = raw
            .split([',', '\n'])
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect();

        let count = values.len();
        *self.domain.write() = values;

        info!(source_id = %source.source_id, count, "值域缓存已刷新");
        Ok(count)
    }

    pub fn contains(&self, value: &str) -> bool {
        self.domain.read().contains(value)
    }

    pub fn insert(&self, value: impl Into<String>) {
        self.domain.write().insert(value.into());
    }

    pub fn len(&self) -> usize {
        self.domain.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.domain.read().is_empty()
    }
}

impl CustomOperator for CachedDomainOperator {
    fn invoke(&self, arg1: &str, _arg2: &str, _arg3: &str, _arg4: &str) -> Result<String> {
        Ok(self.contains(arg1).to_string())
    }
}

/// 自定义操作符注册表
///
/// 进程启动时注册，之后只读。
#[derive(Default)]
pub struct CustomOperatorRegistry {
    operators: DashMap<String, Arc<dyn CustomOperator>>,
}

impl CustomOperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册操作符，名称已绑定时返回 DuplicateOperator
    pub fn register(
        &self,
        name: impl Into<String>,
        operator: impl CustomOperator + 'static,
    ) -> Result<()> {
        self.register_arc(name, Arc::new(operator))
    }

    pub fn register_arc(
        &self,
        name: impl Into<String>,
        operator: Arc<dyn CustomOperator>,
    ) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        let name = name.into();
        match self.operators.entry(name.clone()) {
            Entry::Occupied(_) => Err(RuleError::DuplicateOperator(name)),
            Entry::Vacant(slot) => {
                slot.insert(operator);
                info!(operator = %name, "自定义操作符已注册");
                Ok(())
            }
        }
    }

    /// 解析操作符，未注册时返回 UnknownOperator
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn CustomOperator>> {
        self.operators
            .get(name)
            .map(|op| Arc::clone(op.value()))
            .ok_or_else(|| RuleError::UnknownOperator(name.to_string()))
    }

    /// 以实际操作数调用，操作数个数不超过四个
    ///
    /// 普通操作符的缺省参数补空字符串；外部数据源操作符按实际个数传参。
    pub fn invoke(&self, name: &str, args: &[String]) -> Result<String> {
        if args.len() > CUSTOM_OPERATOR_ARITY {
            return Err(RuleError::ParseError(format!(
                "自定义操作符 '{}' 最多接受 {} 个参数，实际 {} 个",
                name,
                CUSTOM_OPERATOR_ARITY,
                args.len()
            )));
        }

        let operator = self.resolve(name)?;
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        metrics::counter!(
            ledger_rules_shared::observability::metrics::CUSTOM_OPERATOR_CALLS_TOTAL,
            "operator" => name.to_string()
        )
        .increment(1);

        operator.invoke_args(&args)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operators.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.operators.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}
