//! 命令定义和实现

pub mod config;
pub mod run;
pub mod simulate;

pub use config::ConfigCommand;
pub use run::RunCommand;
pub use simulate::SimulateCommand;
