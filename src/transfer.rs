//! 本地目录树上传
//!
//! 上传不走已建立的 SSH 会话，而是为每个目录启动一个本地 `scp -r` 进程，
//! 逐个等待结束。退出码记录在结果中，不视为错误

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::ssh::config::HostKeyVerification;
use crate::ssh::execution::ExecutionResult;

/// 一次目录上传请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeCopy {
    pub source: PathBuf,
    pub username: String,
    pub host: String,
    pub destination: String,
}

impl TreeCopy {
    /// scp 目标 `user@host:/path`
    pub fn remote_target(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.destination)
    }
}

/// 文件传输接口
#[async_trait]
pub trait FileTransfer: Send + Sync {
    async fn copy_tree(&self, request: &TreeCopy) -> Result<ExecutionResult>;
}

/// 基于本地 `scp` 进程的传输
#[derive(Debug, Clone)]
pub struct ScpTransfer {
    program: String,
    key_file: PathBuf,
    port: u16,
    host_key_verification: HostKeyVerification,
}

impl ScpTransfer {
    pub fn new(key_file: impl AsRef<Path>, host_key_verification: HostKeyVerification) -> Self {
        Self {
            program: "scp".to_string(),
            key_file: key_file.as_ref().to_path_buf(),
            port: 22,
            host_key_verification,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// 替换 scp 可执行文件
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// scp 参数数组
    pub fn arguments(&self, request: &TreeCopy) -> Vec<String> {
        vec![
            "-o".to_string(),
            self.host_key_verification.openssh_option().to_string(),
            "-P".to_string(),
            self.port.to_string(),
            "-i".to_string(),
            self.key_file.display().to_string(),
            "-r".to_string(),
            request.source.display().to_string(),
            request.remote_target(),
        ]
    }
}

#[async_trait]
impl FileTransfer for ScpTransfer {
    async fn copy_tree(&self, request: &TreeCopy) -> Result<ExecutionResult> {
        let start_time = Instant::now();
        let args = self.arguments(request);
        let command_line = format!("{} {}", self.program, args.join(" "));

        info!(
            source = %request.source.display(),
            remote = %request.remote_target(),
            "Copying directory tree"
        );

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .await
            .map_err(|e| AppError::Transfer(format!("failed to run {}: {}", self.program, e)))?;

        let result = ExecutionResult::completed(
            command_line,
            output.status.code(),
            String::from_utf8_lossy(&output.stdout).to_string(),
            String::from_utf8_lossy(&output.stderr).to_string(),
            start_time.elapsed().as_secs_f64(),
        );

        if result.is_failure() {
            warn!(
                source = %request.source.display(),
                exit_code = ?result.exit_code,
                stderr = %result.stderr.trim(),
                "scp finished with a non-zero status"
            );
        }

        Ok(result)
    }
}
