//! 软件包仓库主机的远程部署控制
//! 通过一条 SSH 会话驱动 apt / yum 仓库刷新与 staging

pub mod archive;
pub mod command;
pub mod config;
pub mod error;
pub mod output;
pub mod release;
pub mod runbook;
pub mod s3cfg;
pub mod ssh;
pub mod telemetry;
pub mod transfer;

pub use archive::ArchiveController;
pub use error::{AppError, Result};
pub use runbook::{run_staging, StagingReport, StagingRequest, Step};
