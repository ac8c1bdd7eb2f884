//! 端到端测试套件

mod loan_cycle;
mod multisig_gate;
mod registry;
mod remote_evaluation;
