//! 规则引擎与编排器端到端测试
//!
//! 测试覆盖完整的业务流程，包括：
//! - 配置文件、属性目录和规则树定义从磁盘加载
//! - 模拟-提交周期（本地与远程评估）
//! - 多签确认门控
//! - 规则注册表与规则组

pub mod setup;
pub mod suites;

pub use setup::TestEnvironment;
