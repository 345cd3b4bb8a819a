//! 配置系统
//! 默认值 + 环境变量（前缀 `STAGER_`，层级分隔符 `__`）

use config::{Config, ConfigError, Environment};
use secrecy::Secret;
use serde::Deserialize;

use crate::s3cfg::CredentialPolicy;
use crate::ssh::config::{HostKeyVerification, SshConfig};

/// gpg-preset-passphrase 预置口令的签名密钥指纹
pub const DEFAULT_GPG_KEY_FINGERPRINT: &str = "F36A89E33CC1BD0F71079007327574EE02A818DD";

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别: trace, debug, info, warn, error
    pub level: String,
    /// 日志格式: json, pretty, compact
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SshSettings {
    pub port: u16,
    /// 连接与握手超时（秒）
    pub connect_timeout_secs: u64,
    /// 命令执行超时（秒），不设置则一直等待
    pub command_timeout_secs: Option<u64>,
    pub host_key_verification: HostKeyVerification,
    /// 目标主机的 SHA-256 指纹（strict 模式必填）
    pub known_host_fingerprint: Option<String>,
    /// 加密私钥的口令（STAGER_SSH__KEY_PASSPHRASE）
    #[serde(default)]
    pub key_passphrase: Option<Secret<String>>,
}

/// 仓库主机上的固定布局
#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveSettings {
    /// 脚本与构建产物所在的远程基础目录
    pub base_dir: String,
    /// SSH 登录用户
    pub username: String,
    /// 运行仓库脚本与 gpg-agent 的非特权用户
    pub repo_user: String,
    /// 发布根目录
    pub publish_root: String,
    /// apt 仓库的 suite 名
    pub deb_suite: String,
    pub gpg_key_fingerprint: String,
    /// 本地 apt / yum / ec2_build 目录所在位置
    pub scripts_root: String,
    pub credential_policy: CredentialPolicy,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            base_dir: "/tmp".to_string(),
            username: "ubuntu".to_string(),
            repo_user: "www-data".to_string(),
            publish_root: "/var/www/archive_public".to_string(),
            deb_suite: "cloudera-freezer".to_string(),
            gpg_key_fingerprint: DEFAULT_GPG_KEY_FINGERPRINT.to_string(),
            scripts_root: "../..".to_string(),
            credential_policy: CredentialPolicy::default(),
        }
    }
}

impl ArchiveSettings {
    /// `<base_dir>/<name>`
    pub fn remote_path(&self, name: &str) -> String {
        format!("{}/{}", self.base_dir.trim_end_matches('/'), name)
    }

    /// gpg 主目录（带结尾斜杠）
    pub fn gpg_home(&self) -> String {
        format!("{}/", self.remote_path("apt/gpg-home"))
    }

    /// gpg-agent 写出的环境变量文件
    pub fn agent_info_file(&self) -> String {
        self.remote_path(".gpg-agent-info")
    }

    /// `<publish_root>/<sub>/`
    pub fn publish_dir(&self, sub: &str) -> String {
        let root = self.publish_root.trim_end_matches('/');
        if sub.is_empty() {
            format!("{}/", root)
        } else {
            format!("{}/{}/", root, sub)
        }
    }

    /// s3cmd 配置文件路径
    pub fn s3cfg_path(&self) -> String {
        format!("/home/{}/.s3cfg", self.username)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub ssh: SshSettings,
    pub archive: ArchiveSettings,
    /// 签名密钥口令，只从环境读取（STAGER_GPG_PASSPHRASE）
    #[serde(default)]
    pub gpg_passphrase: Option<Secret<String>>,
}

impl AppConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = ArchiveSettings::default();
        let mut settings = Config::builder();

        settings = settings
            .set_default("logging.level", "info")?
            .set_default("logging.format", "compact")?
            .set_default("ssh.port", 22)?
            .set_default("ssh.connect_timeout_secs", 10)?
            .set_default("ssh.host_key_verification", "accept")?
            .set_default("archive.base_dir", defaults.base_dir)?
            .set_default("archive.username", defaults.username)?
            .set_default("archive.repo_user", defaults.repo_user)?
            .set_default("archive.publish_root", defaults.publish_root)?
            .set_default("archive.deb_suite", defaults.deb_suite)?
            .set_default("archive.gpg_key_fingerprint", defaults.gpg_key_fingerprint)?
            .set_default("archive.scripts_root", defaults.scripts_root)?
            .set_default("archive.credential_policy", "require")?;

        settings = settings.add_source(
            Environment::with_prefix("STAGER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = settings.build()?.try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    /// 验证配置合法性
    fn validate(&self) -> Result<(), ConfigError> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                )))
            }
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log format: {}. Must be one of: json, pretty, compact",
                    self.logging.format
                )))
            }
        }

        if self.ssh.connect_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "ssh.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.ssh.command_timeout_secs == Some(0) {
            return Err(ConfigError::Message(
                "ssh.command_timeout_secs must be greater than 0 when set".to_string(),
            ));
        }

        if self.ssh.host_key_verification == HostKeyVerification::Strict
            && self.ssh.known_host_fingerprint.is_none()
        {
            return Err(ConfigError::Message(
                "ssh.known_host_fingerprint is required in strict host key mode".to_string(),
            ));
        }

        if !self.archive.base_dir.starts_with('/') || !self.archive.publish_root.starts_with('/') {
            return Err(ConfigError::Message(
                "archive.base_dir and archive.publish_root must be absolute paths".to_string(),
            ));
        }

        if self.archive.username.trim().is_empty() || self.archive.repo_user.trim().is_empty() {
            return Err(ConfigError::Message(
                "archive.username and archive.repo_user must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// 为目标主机构造 SSH 配置
    pub fn ssh_config(&self, host: &str, key_file: &str, username: Option<&str>) -> SshConfig {
        let username = username.unwrap_or(&self.archive.username).to_string();
        let mut config = SshConfig::with_key_file(host.to_string(), username, key_file)
            .with_port(self.ssh.port)
            .with_connect_timeout(self.ssh.connect_timeout_secs)
            .with_command_timeout(self.ssh.command_timeout_secs)
            .with_host_key_verification(self.ssh.host_key_verification.clone());
        if let Some(fingerprint) = &self.ssh.known_host_fingerprint {
            config = config.with_known_host(fingerprint.clone());
        }
        if let Some(passphrase) = &self.ssh.key_passphrase {
            config = config.with_key_passphrase(passphrase.clone());
        }
        config
    }
}
