//! SSH 连接配置
//!
//! 主机密钥策略是显式配置项，不再隐式地接受任意主机

use secrecy::Secret;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// 主机密钥验证策略
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyVerification {
    /// 严格模式：只接受已知的主机密钥
    Strict,
    /// 接受模式：未知主机首次连接时接受，已知主机必须匹配
    #[default]
    Accept,
    /// 禁用验证（接受任何主机密钥）
    Disabled,
}

impl HostKeyVerification {
    /// 对应的 OpenSSH `StrictHostKeyChecking` 取值，供 scp 使用
    pub fn openssh_option(&self) -> &'static str {
        match self {
            HostKeyVerification::Strict => "StrictHostKeyChecking=yes",
            HostKeyVerification::Accept => "StrictHostKeyChecking=accept-new",
            HostKeyVerification::Disabled => "StrictHostKeyChecking=no",
        }
    }
}

impl std::str::FromStr for HostKeyVerification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "accept" => Ok(Self::Accept),
            "disabled" | "none" | "false" => Ok(Self::Disabled),
            _ => Err(format!("Unknown host key verification mode: {}", s)),
        }
    }
}

/// SSH 认证方式：私钥文件
#[derive(Debug, Clone)]
pub struct KeyFileAuth {
    /// 私钥文件路径
    pub path: PathBuf,
    /// 私钥密码（如果有）
    pub passphrase: Option<Secret<String>>,
}

/// SSH 连接配置
#[derive(Debug, Clone)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: KeyFileAuth,

    /// 连接与握手超时（秒）
    pub connect_timeout_secs: u64,

    /// 命令执行超时（秒），None 表示一直等待到通道关闭
    pub command_timeout_secs: Option<u64>,

    pub host_key_verification: HostKeyVerification,

    /// 已知主机指纹，键为 `host:port`，值为 SHA-256 十六进制指纹
    pub known_hosts: HashMap<String, String>,
}

pub(crate) fn default_ssh_port() -> u16 {
    22
}

pub(crate) fn default_connect_timeout() -> u64 {
    10
}

impl SshConfig {
    /// 创建使用私钥文件认证的配置
    pub fn with_key_file(host: String, username: String, key_file: impl Into<PathBuf>) -> Self {
        Self {
            host,
            port: default_ssh_port(),
            username,
            auth: KeyFileAuth {
                path: key_file.into(),
                passphrase: None,
            },
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: None,
            host_key_verification: HostKeyVerification::default(),
            known_hosts: HashMap::new(),
        }
    }

    /// 设置端口
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// 设置私钥密码
    pub fn with_key_passphrase(mut self, passphrase: Secret<String>) -> Self {
        self.auth.passphrase = Some(passphrase);
        self
    }

    /// 设置连接超时
    pub fn with_connect_timeout(mut self, timeout_secs: u64) -> Self {
        self.connect_timeout_secs = timeout_secs;
        self
    }

    /// 设置命令超时
    pub fn with_command_timeout(mut self, timeout_secs: Option<u64>) -> Self {
        self.command_timeout_secs = timeout_secs;
        self
    }

    /// 设置主机密钥验证策略
    pub fn with_host_key_verification(mut self, verification: HostKeyVerification) -> Self {
        self.host_key_verification = verification;
        self
    }

    /// 记录一个已知主机指纹
    pub fn with_known_host(mut self, fingerprint: impl Into<String>) -> Self {
        let key = self.host_key();
        self.known_hosts.insert(key, fingerprint.into());
        self
    }

    /// 已知主机表中使用的键
    pub fn host_key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// 获取目标地址字符串
    pub fn target(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}
