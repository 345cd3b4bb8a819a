//! 发布流程
//!
//! 按固定顺序在仓库主机上执行一次完整的 staging，并汇总每一步的结果

use secrecy::Secret;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::archive::ArchiveController;
use crate::error::Result;
use crate::release::{cdh_version, validate_build};
use crate::s3cfg::S3Credentials;
use crate::ssh::execution::ExecutionResult;
use crate::ssh::session::RemoteShell;
use crate::transfer::FileTransfer;

/// 流程中的步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    CopyScripts,
    InstallPackages,
    StartGpg,
    GetGpgEnv,
    SetGpgPassphrase,
    UpdateDebRepo,
    UpdateYumRepo,
    FinalizeStaging,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::CopyScripts => "copy_scripts",
            Step::InstallPackages => "install_packages",
            Step::StartGpg => "start_gpg",
            Step::GetGpgEnv => "get_gpg_env",
            Step::SetGpgPassphrase => "set_gpg_passphrase",
            Step::UpdateDebRepo => "update_deb_repo",
            Step::UpdateYumRepo => "update_yum_repo",
            Step::FinalizeStaging => "finalize_staging",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// 一次 staging 的输入
#[derive(Debug, Clone)]
pub struct StagingRequest {
    pub host: String,
    pub build: String,
    pub cdh_release: String,
    pub passphrase: Secret<String>,
    /// None 表示跳过 install_packages
    pub credentials: Option<S3Credentials>,
    pub copy_scripts: bool,
    pub stop_on_failure: bool,
}

/// 单步结果
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: Step,
    pub results: Vec<ExecutionResult>,
    pub success: bool,
}

impl StepReport {
    fn new(step: Step, results: Vec<ExecutionResult>) -> Self {
        Self::with_tolerated(step, results, Vec::new())
    }

    /// `tolerated` 中的失败保留在结果里，但不影响本步的成败
    fn with_tolerated(
        step: Step,
        mut required: Vec<ExecutionResult>,
        tolerated: Vec<ExecutionResult>,
    ) -> Self {
        let success = required.iter().all(ExecutionResult::is_success);
        required.extend(tolerated);
        Self {
            step,
            results: required,
            success,
        }
    }
}

/// 整体结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct StagingReport {
    pub steps: Vec<StepReport>,
    /// 因失败而中止时所在的步骤
    pub aborted_at: Option<Step>,
}

impl StagingReport {
    pub fn is_success(&self) -> bool {
        self.aborted_at.is_none() && self.steps.iter().all(|s| s.success)
    }

    /// 所有未成功的命令
    pub fn failures(&self) -> impl Iterator<Item = (Step, &ExecutionResult)> {
        self.steps.iter().flat_map(|s| {
            s.results
                .iter()
                .filter(|r| r.is_failure())
                .map(move |r| (s.step, r))
        })
    }

    /// 记录一步；返回 false 表示应当中止
    fn record(&mut self, report: StepReport, stop_on_failure: bool) -> bool {
        let step = report.step;
        let success = report.success;
        self.steps.push(report);

        if success {
            if self.steps.last().is_some_and(|s| s.results.iter().any(ExecutionResult::is_failure)) {
                warn!(step = %step, "Step completed with tolerated failures");
            } else {
                info!(step = %step, "Step completed");
            }
            return true;
        }
        if stop_on_failure {
            error!(step = %step, "Step failed, aborting staging");
            self.aborted_at = Some(step);
            return false;
        }
        warn!(step = %step, "Step failed, continuing");
        true
    }
}

/// 执行完整的 staging 流程
///
/// 构建标签与版本字符串在发出任何远程命令之前校验。
/// 连接、会话或解析错误直接返回 Err；远程命令的非零退出记录在报告中。
pub async fn run_staging<S, T>(
    controller: &mut ArchiveController<S>,
    transfer: &T,
    request: &StagingRequest,
) -> Result<StagingReport>
where
    S: RemoteShell,
    T: FileTransfer + ?Sized,
{
    validate_build(&request.build)?;
    cdh_version(&request.cdh_release)?;

    let mut report = StagingReport::default();
    let env = controller.initial_environment()?;

    if request.copy_scripts {
        let results = controller.copy_scripts(&env, &request.host, transfer).await?;
        if !report.record(StepReport::new(Step::CopyScripts, results), request.stop_on_failure) {
            return Ok(report);
        }
    }

    if let Some(credentials) = &request.credentials {
        let results = controller.install_packages(&env, credentials).await?;
        if !report.record(
            StepReport::new(Step::InstallPackages, results),
            request.stop_on_failure,
        ) {
            return Ok(report);
        }
    }

    // agent 已在运行时 gpg-agent --daemon 返回非零，但环境文件仍然有效；
    // 只容忍这一条，chmod 失败照常处理
    let mut results = controller.start_gpg(&env).await?;
    let agent = results.split_off(results.len().min(1));
    if !report.record(
        StepReport::with_tolerated(Step::StartGpg, results, agent),
        request.stop_on_failure,
    ) {
        return Ok(report);
    }

    let env = controller.get_gpg_env(&env).await?;
    report.record(StepReport::new(Step::GetGpgEnv, Vec::new()), request.stop_on_failure);

    let result = controller.set_gpg_passphrase(&env, &request.passphrase).await?;
    if !report.record(
        StepReport::new(Step::SetGpgPassphrase, vec![result]),
        request.stop_on_failure,
    ) {
        return Ok(report);
    }

    let results = controller
        .update_deb_repo(&env, &request.build, &request.cdh_release)
        .await?;
    if !report.record(StepReport::new(Step::UpdateDebRepo, results), request.stop_on_failure) {
        return Ok(report);
    }

    let result = controller
        .update_yum_repo(&env, &request.build, &request.cdh_release)
        .await?;
    if !report.record(
        StepReport::new(Step::UpdateYumRepo, vec![result]),
        request.stop_on_failure,
    ) {
        return Ok(report);
    }

    let result = controller
        .finalize_staging(&env, &request.build, &request.cdh_release)
        .await?;
    report.record(
        StepReport::new(Step::FinalizeStaging, vec![result]),
        request.stop_on_failure,
    );

    Ok(report)
}
