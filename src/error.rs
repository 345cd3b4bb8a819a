//! 统一错误模型
//! 定义控制器、SSH 会话与配置加载的所有错误类型
//!
//! 远程命令的非零退出码不是错误：它们以 `ExecutionResult` 的形式返回给调用方

/// 应用错误类型
#[derive(Debug, Clone, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("SSH connection error: {0}")]
    SshConnection(String),

    #[error("SSH authentication failed: {0}")]
    SshAuthentication(String),

    #[error("SSH execution error: {0}")]
    SshExecution(String),

    #[error("Release '{0}' does not match the expected cdh<digits> format")]
    ReleaseFormat(String),

    #[error("Invalid build label: {0}")]
    InvalidBuild(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Malformed gpg-agent info: {0}")]
    MalformedAgentInfo(String),

    #[error("Missing credential: environment variable {0} is not set")]
    MissingCredential(String),

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    IoError(String),
}

impl AppError {
    /// 进程退出码，供二进制入口使用
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Config(_) | AppError::MissingCredential(_) => 78,
            AppError::ReleaseFormat(_) | AppError::InvalidBuild(_) | AppError::InvalidCommand(_) => {
                64
            }
            AppError::SshConnection(_) | AppError::SshAuthentication(_) => 69,
            AppError::Timeout(_) => 124,
            AppError::SshExecution(_)
            | AppError::MalformedAgentInfo(_)
            | AppError::Transfer(_)
            | AppError::IoError(_) => 70,
        }
    }

    /// 是否为连接阶段的错误
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            AppError::SshConnection(_) | AppError::SshAuthentication(_) | AppError::Timeout(_)
        )
    }

    // 便捷方法
    pub fn invalid_build(msg: &str) -> Self {
        AppError::InvalidBuild(msg.to_string())
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, AppError>;

/// 从 std::io::Error 转换
impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::IoError(e.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        AppError::Config(e.to_string())
    }
}

impl From<shlex::QuoteError> for AppError {
    fn from(e: shlex::QuoteError) -> Self {
        AppError::InvalidCommand(e.to_string())
    }
}

impl From<russh::Error> for AppError {
    fn from(e: russh::Error) -> Self {
        AppError::SshExecution(e.to_string())
    }
}
