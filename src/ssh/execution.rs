//! 执行结果模型
//!
//! 每条远程命令（以及每次本地 scp 传输）都产生一个 `ExecutionResult`，
//! 由调用方根据退出码自行判断成败

use serde::Serialize;

/// 超时时使用的退出码，与 coreutils `timeout` 一致
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// 执行结果
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// 实际发送的完整命令
    pub command: String,

    /// 退出码，远端未报告退出状态时为 None
    pub exit_code: Option<i32>,

    /// 标准输出
    pub stdout: String,

    /// 标准错误
    pub stderr: String,

    /// 执行时长（秒）
    pub duration_secs: f64,

    /// 是否超时
    pub timed_out: bool,
}

impl ExecutionResult {
    /// 创建已完成的结果
    pub fn completed(
        command: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
        duration_secs: f64,
    ) -> Self {
        Self {
            command,
            exit_code,
            stdout,
            stderr,
            duration_secs,
            timed_out: false,
        }
    }

    /// 创建超时结果，保留超时前收到的输出
    pub fn timeout(command: String, stdout: String, stderr: String, duration_secs: f64) -> Self {
        Self {
            command,
            exit_code: Some(TIMEOUT_EXIT_CODE),
            stdout,
            stderr,
            duration_secs,
            timed_out: true,
        }
    }

    /// 判断是否成功
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }

    /// 判断是否失败
    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    /// 标准输出逐行（去掉首尾空白）
    pub fn stdout_lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines().map(str::trim)
    }

    /// 标准错误逐行（去掉首尾空白）
    pub fn stderr_lines(&self) -> impl Iterator<Item = &str> {
        self.stderr.lines().map(str::trim)
    }
}
