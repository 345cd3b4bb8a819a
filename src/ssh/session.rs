//! SSH 会话
//!
//! 使用 russh 建立一条经过认证的会话，并在其上逐条执行命令。
//! `RemoteShell` 是控制器与具体传输之间的接缝，测试中以录制实现替换

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use russh::client;
use russh::ChannelMsg;
use russh_keys::key::PublicKey;
use russh_keys::load_secret_key;
use russh_keys::PublicKeyBase64;
use secrecy::ExposeSecret;
use serde::Serialize;
use sha2::Digest;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::{AppError, Result};
use crate::ssh::config::{HostKeyVerification, SshConfig};
use crate::ssh::execution::ExecutionResult;

/// 输出所属的流
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// 输出回调：每收到一整行调用一次
pub type OutputSink = Arc<dyn Fn(OutputStream, &str) + Send + Sync>;

/// 丢弃所有输出的回调
pub fn discard_output() -> OutputSink {
    Arc::new(|_, _| {})
}

/// 远程命令执行接口
#[async_trait]
pub trait RemoteShell: Send {
    /// 执行一条命令，写入 stdin（如有）后关闭输入，读到通道结束为止
    async fn exec(
        &mut self,
        command: &str,
        stdin: Option<&[u8]>,
        output: &OutputSink,
    ) -> Result<ExecutionResult>;

    /// 关闭会话
    async fn close(&mut self) -> Result<()>;
}

/// 把字节流切分为行，行尾的 `\r\n` / `\n` 被去掉
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, data: &[u8], mut emit: impl FnMut(&str)) {
        self.pending.extend_from_slice(data);
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            emit(text.trim_end_matches(['\n', '\r']));
        }
    }

    pub(crate) fn finish(&mut self, mut emit: impl FnMut(&str)) {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            emit(String::from_utf8_lossy(&rest).trim_end_matches('\r'));
        }
    }
}

/// russh 会话
pub struct SshSession {
    handle: client::Handle<HostKeyChecker>,
    target: String,
    command_timeout: Option<Duration>,
}

impl SshSession {
    /// 建立连接并用私钥认证
    pub async fn connect(config: &SshConfig) -> Result<Self> {
        debug!(
            host = %config.host,
            port = config.port,
            user = %config.username,
            verification = ?config.host_key_verification,
            "Opening SSH session"
        );

        let client_config = Arc::new(client::Config::default());
        let checker = HostKeyChecker::from_config(config);

        let mut handle = timeout(
            Duration::from_secs(config.connect_timeout_secs),
            client::connect(client_config, (config.host.clone(), config.port), checker),
        )
        .await
        .map_err(|_| AppError::Timeout(format!("SSH connect to {}", config.target())))?
        .map_err(|e| {
            error!(error = %e, remote = %config.target(), "SSH connection failed");
            AppError::SshConnection(format!("{}: {}", config.target(), e))
        })?;

        let passphrase = config
            .auth
            .passphrase
            .as_ref()
            .map(|p| p.expose_secret().as_str());
        let key = load_secret_key(&config.auth.path, passphrase).map_err(|e| {
            error!(error = %e, path = %config.auth.path.display(), "Failed to load private key");
            AppError::SshAuthentication(format!(
                "cannot load private key {}: {}",
                config.auth.path.display(),
                e
            ))
        })?;

        let authenticated = handle
            .authenticate_publickey(config.username.clone(), Arc::new(key))
            .await
            .map_err(|e| AppError::SshAuthentication(e.to_string()))?;

        if !authenticated {
            error!(remote = %config.target(), "SSH public key rejected");
            return Err(AppError::SshAuthentication(format!(
                "public key rejected for {}",
                config.target()
            )));
        }

        info!(remote = %config.target(), "SSH session established");

        Ok(Self {
            handle,
            target: config.target(),
            command_timeout: config.command_timeout_secs.map(Duration::from_secs),
        })
    }
}

#[async_trait]
impl RemoteShell for SshSession {
    async fn exec(
        &mut self,
        command: &str,
        stdin: Option<&[u8]>,
        output: &OutputSink,
    ) -> Result<ExecutionResult> {
        let start_time = Instant::now();

        let mut channel = self.handle.channel_open_session().await.map_err(|e| {
            error!(error = %e, "Failed to open SSH channel");
            AppError::SshExecution(format!("open channel on {}: {}", self.target, e))
        })?;

        channel.exec(true, command).await.map_err(|e| {
            error!(error = %e, "Failed to start remote command");
            AppError::SshExecution(format!("exec on {}: {}", self.target, e))
        })?;

        if let Some(input) = stdin {
            channel.data(input).await?;
        }
        channel.eof().await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut stdout_lines = LineBuffer::default();
        let mut stderr_lines = LineBuffer::default();
        let mut exit_code = None;
        let mut timed_out = false;
        let deadline = self
            .command_timeout
            .map(|t| tokio::time::Instant::now() + t);

        loop {
            let msg = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, channel.wait()).await {
                    Ok(msg) => msg,
                    Err(_) => {
                        warn!(remote = %self.target, "Remote command timed out");
                        timed_out = true;
                        break;
                    }
                },
                None => channel.wait().await,
            };

            match msg {
                Some(ChannelMsg::Data { ref data }) => {
                    stdout.extend_from_slice(data);
                    stdout_lines.push(data, |line| output(OutputStream::Stdout, line));
                }
                Some(ChannelMsg::ExtendedData { ref data, ext }) => {
                    // SSH_EXTENDED_DATA_STDERR
                    if ext == 1 {
                        stderr.extend_from_slice(data);
                        stderr_lines.push(data, |line| output(OutputStream::Stderr, line));
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    exit_code = Some(exit_status as i32);
                }
                Some(ChannelMsg::Close) | None => break,
                _ => {}
            }
        }

        stdout_lines.finish(|line| output(OutputStream::Stdout, line));
        stderr_lines.finish(|line| output(OutputStream::Stderr, line));

        let _ = channel.close().await;

        let duration_secs = start_time.elapsed().as_secs_f64();
        let stdout = String::from_utf8_lossy(&stdout).to_string();
        let stderr = String::from_utf8_lossy(&stderr).to_string();

        debug!(
            remote = %self.target,
            exit_code = ?exit_code,
            duration_secs = duration_secs,
            stdout_len = stdout.len(),
            stderr_len = stderr.len(),
            "Command finished"
        );

        if timed_out {
            return Ok(ExecutionResult::timeout(
                command.to_string(),
                stdout,
                stderr,
                duration_secs,
            ));
        }

        Ok(ExecutionResult::completed(
            command.to_string(),
            exit_code,
            stdout,
            stderr,
            duration_secs,
        ))
    }

    async fn close(&mut self) -> Result<()> {
        self.handle
            .disconnect(russh::Disconnect::ByApplication, "", "English")
            .await?;
        info!(remote = %self.target, "SSH session closed");
        Ok(())
    }
}

/// 计算主机公钥指纹（SHA-256，十六进制）
pub fn fingerprint(server_public_key: &PublicKey) -> String {
    let key_data = server_public_key.public_key_base64();
    let mut hasher = sha2::Sha256::new();
    hasher.update(key_data.as_bytes());
    hex::encode(hasher.finalize())
}

/// 主机密钥验证结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HostKeyDecision {
    Known,
    FirstSeen,
    Unverified,
    Mismatch,
    Unknown,
}

impl HostKeyDecision {
    pub(crate) fn accepted(self) -> bool {
        matches!(
            self,
            HostKeyDecision::Known | HostKeyDecision::FirstSeen | HostKeyDecision::Unverified
        )
    }
}

/// 会话处理器：按策略检查主机密钥
pub struct HostKeyChecker {
    verification: HostKeyVerification,
    known_hosts: HashMap<String, String>,
    host_key: String,
}

impl HostKeyChecker {
    fn from_config(config: &SshConfig) -> Self {
        Self {
            verification: config.host_key_verification.clone(),
            known_hosts: config.known_hosts.clone(),
            host_key: config.host_key(),
        }
    }

    pub(crate) fn decide(&self, fingerprint: &str) -> HostKeyDecision {
        if self.verification == HostKeyVerification::Disabled {
            return HostKeyDecision::Unverified;
        }

        match self.known_hosts.get(&self.host_key) {
            Some(stored) if stored.eq_ignore_ascii_case(fingerprint) => HostKeyDecision::Known,
            Some(_) => HostKeyDecision::Mismatch,
            None if self.verification == HostKeyVerification::Accept => HostKeyDecision::FirstSeen,
            None => HostKeyDecision::Unknown,
        }
    }
}

#[async_trait]
impl client::Handler for HostKeyChecker {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let fingerprint = fingerprint(server_public_key);
        let decision = self.decide(&fingerprint);

        match decision {
            HostKeyDecision::Unverified => {
                warn!(host = %self.host_key, "Host key verification DISABLED - accepting key")
            }
            HostKeyDecision::Known => debug!(host = %self.host_key, "Host key verified"),
            HostKeyDecision::FirstSeen => info!(
                host = %self.host_key,
                fingerprint = %fingerprint,
                "First time connecting - accepting host key"
            ),
            HostKeyDecision::Mismatch => error!(
                host = %self.host_key,
                actual = %fingerprint,
                "Host key mismatch - rejecting connection"
            ),
            HostKeyDecision::Unknown => error!(
                host = %self.host_key,
                "Unknown host in strict mode - rejecting connection"
            ),
        }

        Ok(decision.accepted())
    }
}
