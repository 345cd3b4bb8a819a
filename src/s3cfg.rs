//! s3cmd 配置文件生成
//!
//! 模板中只有 `access_key` 与 `secret_key` 两处被替换，其余（包括
//! `%(gpg_command)s` 之类 s3cmd 自己的插值）原样保留

use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use tracing::warn;

use crate::error::{AppError, Result};

pub const ACCESS_KEY_VAR: &str = "AWS_ACCESS_KEY_ID";
pub const SECRET_KEY_VAR: &str = "AWS_SECRET_ACCESS_KEY";

/// 凭据缺失时写入的占位文本
pub const UNSET_PLACEHOLDER: &str = "None";

const ACCESS_KEY_MARKER: &str = "%(access_key)s";
const SECRET_KEY_MARKER: &str = "%(secret_key)s";

pub const S3CFG_TEMPLATE: &str = "[default]
access_key = %(access_key)s
acl_public = False
bucket_location = US
cloudfront_host = cloudfront.amazonaws.com
cloudfront_resource = /2008-06-30/distribution
default_mime_type = binary/octet-stream
delete_removed = False
dry_run = False
encoding = UTF-8
encrypt = False
force = False
get_continue = False
gpg_command = /usr/bin/gpg
gpg_decrypt = %(gpg_command)s -d --verbose --no-use-agent --batch --yes --passphrase-fd %(passphrase_fd)s -o %(output_file)s %(input_file)s
gpg_encrypt = %(gpg_command)s -c --verbose --no-use-agent --batch --yes --passphrase-fd %(passphrase_fd)s -o %(output_file)s %(input_file)s
gpg_passphrase =
guess_mime_type = True
host_base = s3.amazonaws.com
host_bucket = %(bucket)s.s3.amazonaws.com
human_readable_sizes = False
list_md5 = False
preserve_attrs = True
progress_meter = True
proxy_host =
proxy_port = 0
recursive = False
recv_chunk = 4096
secret_key = %(secret_key)s
send_chunk = 4096
simpledb_host = sdb.amazonaws.com
skip_existing = False
use_https = True
verbosity = WARNING";

/// 本地凭据缺失时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CredentialPolicy {
    /// 缺失即报错
    #[default]
    Require,
    /// 写入占位文本并记录警告
    Placeholder,
}

impl std::str::FromStr for CredentialPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "require" => Ok(Self::Require),
            "placeholder" => Ok(Self::Placeholder),
            _ => Err(format!("Unknown credential policy: {}", s)),
        }
    }
}

/// s3cmd 使用的 AWS 凭据
#[derive(Debug, Clone)]
pub struct S3Credentials {
    pub access_key: Secret<String>,
    pub secret_key: Secret<String>,
}

impl S3Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: Secret::new(access_key.into()),
            secret_key: Secret::new(secret_key.into()),
        }
    }

    /// 从本地进程环境变量读取
    pub fn from_env(policy: CredentialPolicy) -> Result<Self> {
        Self::from_lookup(policy, |name| std::env::var(name).ok())
    }

    /// 通过任意查找函数读取，便于测试
    pub fn from_lookup(
        policy: CredentialPolicy,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let fetch = |name: &str| -> Result<String> {
            match lookup(name).filter(|v| !v.is_empty()) {
                Some(value) => Ok(value),
                None => match policy {
                    CredentialPolicy::Require => Err(AppError::MissingCredential(name.to_string())),
                    CredentialPolicy::Placeholder => {
                        warn!(variable = name, "Credential not set, writing placeholder into .s3cfg");
                        Ok(UNSET_PLACEHOLDER.to_string())
                    }
                },
            }
        };

        Ok(Self::new(fetch(ACCESS_KEY_VAR)?, fetch(SECRET_KEY_VAR)?))
    }
}

/// 渲染 s3cmd 配置
pub fn render(credentials: &S3Credentials) -> Secret<String> {
    Secret::new(
        S3CFG_TEMPLATE
            .replace(ACCESS_KEY_MARKER, credentials.access_key.expose_secret())
            .replace(SECRET_KEY_MARKER, credentials.secret_key.expose_secret()),
    )
}
