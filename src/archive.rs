//! 仓库主机控制器
//!
//! 在一条 SSH 会话上按固定目录执行部署操作：安装软件包、启动 gpg-agent、
//! 预置签名口令、刷新 apt / yum 元数据、完成 staging。
//!
//! 环境变量列表由调用方持有并逐次传入；`get_gpg_env` 返回追加了
//! agent 变量的新列表，控制器自身不保存跨调用的状态。

use std::path::Path;

use secrecy::{ExposeSecret, Secret};
use tracing::{info, warn};

use crate::command::{compose, Environment, RemoteCommand};
use crate::config::ArchiveSettings;
use crate::error::{AppError, Result};
use crate::release::{cdh_version, validate_build};
use crate::s3cfg::{self, S3Credentials};
use crate::ssh::config::SshConfig;
use crate::ssh::execution::ExecutionResult;
use crate::ssh::session::{discard_output, OutputSink, RemoteShell, SshSession};
use crate::transfer::{FileTransfer, TreeCopy};

/// 每次部署前清理并重新上传的脚本目录
pub const SCRIPT_DIRS: [&str; 3] = ["apt", "yum", "ec2_build"];

/// 部署前在仓库主机上安装的软件包
pub const PACKAGES_TO_INSTALL: [&str; 3] = ["gnupg-agent", "gnupg2", "s3cmd"];

const GPG_HOME_VAR: &str = "GNUPGHOME";
const GPG_PRESET_PASSPHRASE: &str = "/usr/lib/gnupg2/gpg-preset-passphrase";

/// 仓库主机控制器
pub struct ArchiveController<S: RemoteShell> {
    shell: S,
    settings: ArchiveSettings,
    output: OutputSink,
}

impl ArchiveController<SshSession> {
    /// 建立 SSH 会话；登录用户以 `ssh.username` 为准
    pub async fn connect(mut settings: ArchiveSettings, ssh: &SshConfig) -> Result<Self> {
        let session = SshSession::connect(ssh).await?;
        settings.username = ssh.username.clone();
        Ok(Self::new(session, settings))
    }
}

impl<S: RemoteShell> ArchiveController<S> {
    /// 包装一个已连接的会话
    pub fn new(shell: S, settings: ArchiveSettings) -> Self {
        Self {
            shell,
            settings,
            output: discard_output(),
        }
    }

    /// 设置远程输出的逐行回调
    pub fn with_output(mut self, output: OutputSink) -> Self {
        self.output = output;
        self
    }

    pub fn settings(&self) -> &ArchiveSettings {
        &self.settings
    }

    /// 初始环境：`GNUPGHOME=<base>/apt/gpg-home/`
    pub fn initial_environment(&self) -> Result<Environment> {
        Environment::new().with(GPG_HOME_VAR, &self.settings.gpg_home())
    }

    /// 执行一条带环境前缀的命令
    pub async fn execute(
        &mut self,
        env: &Environment,
        command: &RemoteCommand,
        merge_stderr: bool,
    ) -> Result<ExecutionResult> {
        let composed = compose(env, command, merge_stderr)?;
        self.run(&composed, None).await
    }

    async fn run(&mut self, composed: &str, stdin: Option<&[u8]>) -> Result<ExecutionResult> {
        info!("EXECUTING: [{}]", composed);
        let result = self.shell.exec(composed, stdin, &self.output).await?;
        if result.is_failure() {
            warn!(
                exit_code = ?result.exit_code,
                timed_out = result.timed_out,
                command = %composed,
                "Remote command did not succeed"
            );
        }
        Ok(result)
    }

    /// 清理远程脚本目录，然后用 scp 重新上传
    ///
    /// 三条删除命令全部发出之后才开始第一次上传
    pub async fn copy_scripts<T: FileTransfer + ?Sized>(
        &mut self,
        env: &Environment,
        host: &str,
        transfer: &T,
    ) -> Result<Vec<ExecutionResult>> {
        let mut results = Vec::with_capacity(SCRIPT_DIRS.len() * 2);

        info!("Cleanup script area");
        for dir in SCRIPT_DIRS {
            let rm = RemoteCommand::new("rm").opt("-rf", self.settings.remote_path(dir));
            results.push(self.execute(env, &rm, false).await?);
        }

        let scripts_root = Path::new(&self.settings.scripts_root);
        for dir in SCRIPT_DIRS {
            info!(dir, "Copy {} related scripts", dir);
            let request = TreeCopy {
                source: scripts_root.join(dir),
                username: self.settings.username.clone(),
                host: host.to_string(),
                destination: self.settings.remote_path(dir),
            };
            results.push(transfer.copy_tree(&request).await?);
        }

        Ok(results)
    }

    /// 更新系统、安装依赖软件包并写入 s3cmd 配置
    pub async fn install_packages(
        &mut self,
        env: &Environment,
        credentials: &S3Credentials,
    ) -> Result<Vec<ExecutionResult>> {
        let mut results = Vec::with_capacity(4);

        info!("Update system");
        let update = RemoteCommand::new("sudo").args(["apt-get", "update"]);
        results.push(self.execute(env, &update, true).await?);
        let upgrade = RemoteCommand::new("sudo").args(["apt-get", "-y", "upgrade"]);
        results.push(self.execute(env, &upgrade, true).await?);

        info!(packages = %PACKAGES_TO_INSTALL.join(", "), "Install packages");
        let install = RemoteCommand::new("sudo")
            .args(["apt-get", "-y", "install"])
            .args(PACKAGES_TO_INSTALL);
        results.push(self.execute(env, &install, true).await?);

        info!(path = %self.settings.s3cfg_path(), "Setup s3cmd configuration file");
        let content = s3cfg::render(credentials);
        let write = RemoteCommand::new("cat").stdout_to(self.settings.s3cfg_path());
        let composed = compose(env, &write, false)?;
        results.push(
            self.run(&composed, Some(content.expose_secret().as_bytes()))
                .await?,
        );

        Ok(results)
    }

    /// 读取 gpg-agent 写出的环境变量文件，返回追加了该变量的新环境
    pub async fn get_gpg_env(&mut self, env: &Environment) -> Result<Environment> {
        info!("Retrieve GPG environment variable");
        let cat = RemoteCommand::new("cat")
            .arg(self.settings.agent_info_file())
            .render()?;
        let result = self.shell.exec(&cat, None, &discard_output()).await?;

        if result.is_failure() {
            return Err(AppError::MalformedAgentInfo(format!(
                "cannot read {}: {}",
                self.settings.agent_info_file(),
                result.stderr.trim()
            )));
        }

        let assignment = parse_agent_info(&result.stdout)?;
        env.with_assignment(assignment)
            .map_err(|e| AppError::MalformedAgentInfo(e.to_string()))
    }

    /// 开放 gpg 主目录权限并以仓库用户启动 gpg-agent
    ///
    /// 两条命令都不合并 stderr；启动 agent 时合并会让会话挂住
    pub async fn start_gpg(&mut self, env: &Environment) -> Result<Vec<ExecutionResult>> {
        let gpg_home = self.settings.gpg_home();
        let mut results = Vec::with_capacity(2);

        info!("Setup gpg home directory");
        let chmod = RemoteCommand::new("chmod").args(["-R", "777"]).arg(&gpg_home);
        results.push(self.execute(env, &chmod, false).await?);

        info!("Start gpg-agent");
        let agent = RemoteCommand::sudo_as(&self.settings.repo_user, "gpg-agent")
            .arg("--daemon")
            .opt("--write-env-file", self.settings.agent_info_file())
            .opt("--homedir", &gpg_home)
            .arg("--allow-preset-passphrase");
        results.push(self.execute(env, &agent, false).await?);

        Ok(results)
    }

    /// 通过 gpg-preset-passphrase 为签名密钥预置口令
    ///
    /// 不经过 `execute` 的前缀拼接：环境变量作为 sudo 的参数放在程序名之前，
    /// 口令写入远程进程的标准输入
    pub async fn set_gpg_passphrase(
        &mut self,
        env: &Environment,
        passphrase: &Secret<String>,
    ) -> Result<ExecutionResult> {
        info!(key = %self.settings.gpg_key_fingerprint, "Set gpg passphrase");
        let preset =
            RemoteCommand::sudo_as_with_env(&self.settings.repo_user, env, GPG_PRESET_PASSPHRASE)
                .arg("-v")
                .opt("--preset", &self.settings.gpg_key_fingerprint)
                .render()?;
        self.run(&preset, Some(passphrase.expose_secret().as_bytes()))
            .await
    }

    /// 刷新 apt 仓库
    pub async fn update_deb_repo(
        &mut self,
        env: &Environment,
        build: &str,
        release: &str,
    ) -> Result<Vec<ExecutionResult>> {
        let build = validate_build(build)?;
        cdh_version(release)?;
        let mut results = Vec::with_capacity(2);

        info!(build, "Clean up previous builds");
        let clean = RemoteCommand::new("sudo")
            .args(["rm", "-rf"])
            .arg(self.settings.remote_path(build));
        results.push(self.execute(env, &clean, true).await?);

        info!(build, release, "Update deb repository");
        let update = RemoteCommand::sudo_as(
            &self.settings.repo_user,
            self.settings.remote_path("apt/update_repo.sh"),
        )
        .opt("-s", &self.settings.deb_suite)
        .opt("-b", build)
        .opt("-c", release)
        .opt("-r", self.settings.publish_dir("debian"));
        results.push(self.execute(env, &update, true).await?);

        Ok(results)
    }

    /// 刷新 yum 仓库
    pub async fn update_yum_repo(
        &mut self,
        env: &Environment,
        build: &str,
        release: &str,
    ) -> Result<ExecutionResult> {
        let build = validate_build(build)?;
        let version = cdh_version(release)?;

        info!(build, version, "Update yum repository");
        let source = format!("{}/", self.settings.remote_path(build));
        let update = RemoteCommand::sudo_as(
            &self.settings.repo_user,
            self.settings.remote_path("yum/update_repos.sh"),
        )
        .opt("-s", source)
        .opt("-c", version)
        .opt("-r", self.settings.publish_dir("redhat"));
        self.execute(env, &update, true).await
    }

    /// 复制 tarball、changelog 与文档到发布目录
    pub async fn finalize_staging(
        &mut self,
        env: &Environment,
        build: &str,
        release: &str,
    ) -> Result<ExecutionResult> {
        let build = validate_build(build)?;
        let version = cdh_version(release)?;

        info!(build, version, "Finalize staging");
        let finalize = RemoteCommand::sudo_as(
            &self.settings.repo_user,
            self.settings.remote_path("ec2_build/bin/finalize-staging.sh"),
        )
        .opt("-b", build)
        .opt("-c", version)
        .opt("-r", self.settings.publish_dir(""));
        self.execute(env, &finalize, true).await
    }

    /// 关闭会话
    pub async fn disconnect(mut self) -> Result<()> {
        self.shell.close().await
    }
}

/// 解析 gpg-agent 环境文件：恰好一行 `KEY=VALUE`，允许 `; export KEY` 尾缀
pub fn parse_agent_info(content: &str) -> Result<&str> {
    let lines: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let line = match lines.as_slice() {
        [line] => *line,
        [] => return Err(AppError::MalformedAgentInfo("file is empty".to_string())),
        _ => {
            return Err(AppError::MalformedAgentInfo(format!(
                "expected one line, found {}",
                lines.len()
            )))
        }
    };

    let assignment = line.split(';').next().unwrap_or(line).trim();
    match assignment.split_once('=') {
        Some((key, value)) if !key.is_empty() && !value.is_empty() => Ok(assignment),
        _ => Err(AppError::MalformedAgentInfo(format!(
            "not a KEY=VALUE line: {:?}",
            line
        ))),
    }
}
