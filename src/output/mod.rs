//! 输出脱敏与控制台输出
//!
//! 远程命令的输出在打印到控制台或写入报告之前先经过脱敏

use regex::Regex;
use std::sync::Arc;
use once_cell::sync::Lazy;

use crate::ssh::session::{OutputSink, OutputStream};

/// 输出脱敏器
pub struct OutputSanitizer {
    rules: Vec<SanitizeRule>,
}

/// 脱敏规则
#[derive(Clone, Debug)]
pub struct SanitizeRule {
    pattern: Regex,
    replacement: String,
}

impl SanitizeRule {
    pub fn new(pattern: Regex, replacement: impl Into<String>) -> Self {
        Self {
            pattern,
            replacement: replacement.into(),
        }
    }
}

impl OutputSanitizer {
    /// 创建默认脱敏器
    pub fn new_default() -> Self {
        Self {
            rules: vec![
                // s3cmd 配置中的密钥行
                SanitizeRule::new(
                    Regex::new(r"(?i)\b(access_key|secret_key|gpg_passphrase)(\s*=\s*)\S+").unwrap(),
                    "$1$2***",
                ),
                // AWS Access Key ID
                SanitizeRule::new(Regex::new(r"\b(AKIA|ASIA)[A-Z0-9]{16}\b").unwrap(), "AKIA****"),
                // 通用口令
                SanitizeRule::new(
                    Regex::new(r"(?i)(password|passphrase|passwd)([\s=:]+)\S+").unwrap(),
                    "$1$2***",
                ),
            ],
        }
    }

    /// 创建自定义脱敏器
    pub fn new(rules: Vec<SanitizeRule>) -> Self {
        Self { rules }
    }

    /// 脱敏输出
    pub fn sanitize(&self, output: &str) -> String {
        let mut result = output.to_string();

        for rule in &self.rules {
            result = rule.pattern.replace_all(&result, rule.replacement.as_str()).to_string();
        }

        result
    }
}

/// 全局默认脱敏器
static DEFAULT_SANITIZER: Lazy<Arc<OutputSanitizer>> =
    Lazy::new(|| Arc::new(OutputSanitizer::new_default()));

/// 获取默认脱敏器
pub fn default_sanitizer() -> Arc<OutputSanitizer> {
    Arc::clone(&DEFAULT_SANITIZER)
}

/// 把每行脱敏后打印到控制台：stdout 行到 stdout，stderr 行到 stderr
pub fn console_sink() -> OutputSink {
    let sanitizer = default_sanitizer();
    Arc::new(move |stream, line| {
        let line = sanitizer.sanitize(line);
        match stream {
            OutputStream::Stdout => println!("{}", line.trim()),
            OutputStream::Stderr => eprintln!("{}", line.trim()),
        }
    })
}
