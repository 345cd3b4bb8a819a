//! archive-stager 入口
//! 连接仓库主机，执行一次完整的 staging 并打印结果

use archive_stager::{
    config::AppConfig,
    output::{console_sink, default_sanitizer},
    run_staging,
    s3cfg::S3Credentials,
    telemetry,
    transfer::ScpTransfer,
    AppError, ArchiveController, StagingReport, StagingRequest,
};
use clap::Parser;

/// 在仓库主机上发布一个构建
///
/// 签名密钥口令只从环境变量 STAGER_GPG_PASSPHRASE 读取；
/// 加密私钥的口令从 STAGER_SSH__KEY_PASSPHRASE 读取
#[derive(Debug, Parser)]
#[command(name = "archive-stager", version, about)]
struct Cli {
    /// 仓库主机地址
    #[arg(long)]
    host: String,

    /// SSH 私钥文件
    #[arg(long, short = 'i')]
    key_file: String,

    /// 登录用户（默认取 STAGER_ARCHIVE__USERNAME，即 ubuntu）
    #[arg(long, short = 'u')]
    user: Option<String>,

    /// 要发布的构建标签
    #[arg(long)]
    build: String,

    /// CDH 版本字符串，例如 cdh3u1
    #[arg(long)]
    cdh_release: String,

    /// 不重新上传 apt / yum / ec2_build 脚本
    #[arg(long)]
    skip_copy: bool,

    /// 不执行系统更新与软件包安装
    #[arg(long)]
    skip_install: bool,

    /// 某一步失败后继续执行后续步骤
    #[arg(long)]
    keep_going: bool,

    /// 以 JSON 输出报告
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 按优先级加载：.env.local > .env
    dotenv::from_filename(".env.local").ok();
    dotenv::dotenv().ok();

    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        anyhow::anyhow!("Failed to load configuration: {}", e)
    })?;

    telemetry::init_telemetry(&config.logging);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %cli.host,
        build = %cli.build,
        release = %cli.cdh_release,
        "archive-stager starting"
    );

    let report = match run(&cli, &config).await {
        Ok(report) => report,
        Err(e) => {
            if e.is_connection_error() {
                tracing::error!(error = %e, host = %cli.host, "Could not reach the repository host");
            } else {
                tracing::error!(error = %e, "Staging failed");
            }
            std::process::exit(e.exit_code());
        }
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !report.is_success() {
        std::process::exit(1);
    }

    Ok(())
}

/// 读取本地凭据、连接主机并执行一次 staging
///
/// 口令与凭据在连接前读取，缺失时不做任何远程操作
async fn run(cli: &Cli, config: &AppConfig) -> Result<StagingReport, AppError> {
    let passphrase = config
        .gpg_passphrase
        .clone()
        .ok_or_else(|| AppError::MissingCredential("STAGER_GPG_PASSPHRASE".to_string()))?;

    let credentials = if cli.skip_install {
        None
    } else {
        Some(S3Credentials::from_env(config.archive.credential_policy)?)
    };

    let ssh = config.ssh_config(&cli.host, &cli.key_file, cli.user.as_deref());
    let transfer = ScpTransfer::new(&cli.key_file, ssh.host_key_verification.clone())
        .with_port(ssh.port);

    let mut controller = ArchiveController::connect(config.archive.clone(), &ssh)
        .await?
        .with_output(console_sink());

    let request = StagingRequest {
        host: cli.host.clone(),
        build: cli.build.clone(),
        cdh_release: cli.cdh_release.clone(),
        passphrase,
        credentials,
        copy_scripts: !cli.skip_copy,
        stop_on_failure: !cli.keep_going,
    };

    let outcome = run_staging(&mut controller, &transfer, &request).await;

    if let Err(e) = controller.disconnect().await {
        tracing::warn!(error = %e, "Failed to close SSH session cleanly");
    }

    outcome
}

/// 打印人类可读的报告
fn print_report(report: &StagingReport) {
    let sanitizer = default_sanitizer();

    println!();
    println!("Staging report");
    for step in &report.steps {
        let status = if step.success { "ok" } else { "FAILED" };
        println!("  {:<20} {}", step.step.name(), status);
    }

    for (step, result) in report.failures() {
        println!();
        println!("[{}] exit={:?} {}", step, result.exit_code, result.command);
        for line in result.stdout_lines().chain(result.stderr_lines()) {
            println!("    {}", sanitizer.sanitize(line));
        }
    }

    if let Some(step) = report.aborted_at {
        println!();
        println!("Aborted at {}", step);
    }
}
