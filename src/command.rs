//! 远程命令构造
//!
//! 命令由程序名与参数数组组成，渲染时逐个做 POSIX shell 转义；
//! 环境变量列表是不可变值，追加变量会得到一个新的列表

use std::borrow::Cow;

use serde::Serialize;

use crate::error::{AppError, Result};

/// 合并标准错误到标准输出的重定向后缀
pub const MERGE_STDERR_SUFFIX: &str = " 2>&1";

fn quote(token: &str) -> Result<Cow<'_, str>> {
    Ok(shlex::try_quote(token)?)
}

fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn render_assignment(key: &str, value: &str) -> Result<String> {
    Ok(format!("{}={}", key, quote(value)?))
}

/// 有序的 `KEY=VALUE` 列表，作为每条远程命令的前缀
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Environment {
    vars: Vec<(String, String)>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// 返回追加了 `key=value` 的新列表，原列表不变
    pub fn with(&self, key: &str, value: &str) -> Result<Self> {
        if !is_valid_key(key) {
            return Err(AppError::InvalidCommand(format!(
                "invalid environment variable name: {:?}",
                key
            )));
        }
        let mut vars = self.vars.clone();
        vars.push((key.to_string(), value.to_string()));
        Ok(Self { vars })
    }

    /// 解析一行 `KEY=VALUE` 并追加
    pub fn with_assignment(&self, assignment: &str) -> Result<Self> {
        let (key, value) = assignment.split_once('=').ok_or_else(|| {
            AppError::InvalidCommand(format!("not a KEY=VALUE assignment: {:?}", assignment))
        })?;
        self.with(key, value)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    /// 空格连接的赋值列表，值经过转义
    pub fn render(&self) -> Result<String> {
        let rendered = self
            .vars
            .iter()
            .map(|(k, v)| render_assignment(k, v))
            .collect::<Result<Vec<_>>>()?;
        Ok(rendered.join(" "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Arg {
    Plain(String),
    Assignment(String, String),
}

/// 远程命令：程序名 + 参数数组
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    program: String,
    args: Vec<Arg>,
    stdout_to: Option<String>,
}

impl RemoteCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdout_to: None,
        }
    }

    /// `sudo -E -u <user> <program>`
    pub fn sudo_as(user: &str, program: impl Into<String>) -> Self {
        Self::sudo_as_with_env(user, &Environment::new(), program)
    }

    /// `sudo -E -u <user> KEY=VALUE... <program>`
    ///
    /// 赋值必须位于程序名之前，sudo 才会把它们设置到目标进程的环境中
    pub fn sudo_as_with_env(user: &str, env: &Environment, program: impl Into<String>) -> Self {
        Self::new("sudo")
            .args(["-E", "-u", user])
            .env_args(env)
            .arg(program)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(Arg::Plain(arg.into()));
        self
    }

    pub fn args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.args
            .extend(args.into_iter().map(|a| Arg::Plain(a.into())));
        self
    }

    /// `<flag> <value>` 形式的选项
    pub fn opt(self, flag: &str, value: impl Into<String>) -> Self {
        self.arg(flag).arg(value)
    }

    /// 把环境变量作为参数传入（用于 `sudo VAR=value cmd`）
    fn env_args(mut self, env: &Environment) -> Self {
        self.args.extend(
            env.iter()
                .map(|(k, v)| Arg::Assignment(k.to_string(), v.to_string())),
        );
        self
    }

    /// 将标准输出重定向到远程文件
    pub fn stdout_to(mut self, path: impl Into<String>) -> Self {
        self.stdout_to = Some(path.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// 渲染为 shell 命令行
    pub fn render(&self) -> Result<String> {
        let mut parts = vec![quote(&self.program)?.into_owned()];
        for arg in &self.args {
            match arg {
                Arg::Plain(a) => parts.push(quote(a)?.into_owned()),
                Arg::Assignment(k, v) => parts.push(render_assignment(k, v)?),
            }
        }
        if let Some(path) = &self.stdout_to {
            parts.push(">".to_string());
            parts.push(quote(path)?.into_owned());
        }
        Ok(parts.join(" "))
    }
}

/// 组合完整命令：`<env> <command>`，可选追加 ` 2>&1`
pub fn compose(env: &Environment, command: &RemoteCommand, merge_stderr: bool) -> Result<String> {
    let mut composed = format!("{} {}", env.render()?, command.render()?);
    if merge_stderr {
        composed.push_str(MERGE_STDERR_SUFFIX);
    }
    Ok(composed)
}
