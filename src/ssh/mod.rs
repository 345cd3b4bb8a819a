//! SSH 模块
//! 连接配置、会话与执行结果

pub mod config;
pub mod execution;
pub mod session;

pub use config::{HostKeyVerification, KeyFileAuth, SshConfig};
pub use execution::ExecutionResult;
pub use session::{discard_output, OutputSink, OutputStream, RemoteShell, SshSession};
