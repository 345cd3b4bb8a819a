//! 仓库主机控制器测试
//! 使用录制型会话校验发出的命令与顺序

mod common;

use std::sync::{Arc, Mutex};

use archive_stager::{
    command::{compose, Environment, RemoteCommand},
    s3cfg::S3Credentials,
    ssh::{OutputSink, OutputStream},
    AppError,
};
use common::{commands, controller, events, new_log, Event, RecordingShell, RecordingTransfer, AGENT_INFO};
use secrecy::Secret;

const GNUPG_PREFIX: &str = "GNUPGHOME=/tmp/apt/gpg-home/";

/// 追加了 agent 变量之后的前缀
fn agent_prefix() -> String {
    Environment::new()
        .with("GNUPGHOME", "/tmp/apt/gpg-home/")
        .unwrap()
        .with_assignment(AGENT_INFO)
        .unwrap()
        .render()
        .unwrap()
}

#[tokio::test]
async fn test_execute_composes_prefix() {
    let log = new_log();
    let mut ctl = controller(RecordingShell::new(log.clone()));
    let env = ctl.initial_environment().unwrap();

    let ls = RemoteCommand::new("ls").arg("/tmp");
    ctl.execute(&env, &ls, true).await.unwrap();
    ctl.execute(&env, &ls, false).await.unwrap();

    assert_eq!(
        commands(&log),
        vec![
            format!("{} ls /tmp 2>&1", GNUPG_PREFIX),
            format!("{} ls /tmp", GNUPG_PREFIX),
        ]
    );
}

#[tokio::test]
async fn test_execute_streams_lines_to_output_sink() {
    let log = new_log();
    let shell = RecordingShell::new(log.clone()).respond(
        "apt-get update",
        0,
        "Reading package lists...\nDone\n",
        "W: mirror slow\n",
    );
    let received: Arc<Mutex<Vec<(OutputStream, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink_lines = received.clone();
    let sink: OutputSink = Arc::new(move |stream, line| {
        sink_lines.lock().unwrap().push((stream, line.to_string()));
    });
    let mut ctl = controller(shell).with_output(sink);
    let env = ctl.initial_environment().unwrap();

    let update = RemoteCommand::new("sudo").args(["apt-get", "update"]);
    ctl.execute(&env, &update, true).await.unwrap();

    assert_eq!(
        *received.lock().unwrap(),
        vec![
            (OutputStream::Stdout, "Reading package lists...".to_string()),
            (OutputStream::Stdout, "Done".to_string()),
            (OutputStream::Stderr, "W: mirror slow".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_execute_returns_remote_exit_code() {
    let log = new_log();
    let mut ctl = controller(RecordingShell::new(log.clone()).respond("false", 3, "", "boom\n"));
    let env = ctl.initial_environment().unwrap();

    let result = ctl
        .execute(&env, &RemoteCommand::new("false"), false)
        .await
        .unwrap();

    assert_eq!(result.exit_code, Some(3));
    assert!(result.is_failure());
    assert_eq!(result.stderr_lines().collect::<Vec<_>>(), vec!["boom"]);
}

#[tokio::test]
async fn test_get_gpg_env_appends_agent_once() {
    let log = new_log();
    let mut ctl = controller(RecordingShell::with_agent(log.clone()));
    let env = ctl.initial_environment().unwrap();

    let gpg_env = ctl.get_gpg_env(&env).await.unwrap();
    assert_eq!(env.len(), 1);
    assert_eq!(gpg_env.len(), 2);
    assert_eq!(gpg_env.get("GPG_AGENT_INFO"), Some("/tmp/gpg-Xy12/S.gpg-agent:4242:1"));

    ctl.execute(&gpg_env, &RemoteCommand::new("ls"), true)
        .await
        .unwrap();

    let cmds = commands(&log);
    assert_eq!(cmds[0], "cat /tmp/.gpg-agent-info");
    assert_eq!(cmds[1], format!("{} ls 2>&1", agent_prefix()));
    assert_eq!(cmds[1].matches("GPG_AGENT_INFO=").count(), 1);
}

#[tokio::test]
async fn test_get_gpg_env_rejects_malformed_file() {
    let log = new_log();
    let mut ctl = controller(RecordingShell::new(log.clone()).respond(
        ".gpg-agent-info",
        0,
        "A=1\nB=2\n",
        "",
    ));
    let env = ctl.initial_environment().unwrap();

    let err = ctl.get_gpg_env(&env).await.unwrap_err();
    assert!(matches!(err, AppError::MalformedAgentInfo(_)));
}

#[tokio::test]
async fn test_get_gpg_env_missing_file() {
    let log = new_log();
    let mut ctl = controller(RecordingShell::new(log.clone()).respond(
        ".gpg-agent-info",
        1,
        "",
        "cat: /tmp/.gpg-agent-info: No such file or directory\n",
    ));
    let env = ctl.initial_environment().unwrap();

    let err = ctl.get_gpg_env(&env).await.unwrap_err();
    assert!(matches!(err, AppError::MalformedAgentInfo(_)));
}

#[tokio::test]
async fn test_copy_scripts_removes_before_copying() {
    let log = new_log();
    let mut ctl = controller(RecordingShell::new(log.clone()));
    let transfer = RecordingTransfer::new(log.clone());
    let env = ctl.initial_environment().unwrap();

    let results = ctl
        .copy_scripts(&env, "repo.example.com", &transfer)
        .await
        .unwrap();
    assert_eq!(results.len(), 6);

    let recorded = events(&log);
    assert_eq!(recorded.len(), 6);
    for (event, dir) in recorded[..3].iter().zip(["apt", "yum", "ec2_build"]) {
        assert_eq!(
            event.command(),
            Some(format!("{} rm -rf /tmp/{}", GNUPG_PREFIX, dir).as_str())
        );
    }
    for (event, dir) in recorded[3..].iter().zip(["apt", "yum", "ec2_build"]) {
        match event {
            Event::Copy(copy) => {
                assert_eq!(copy.source, std::path::Path::new("../..").join(dir));
                assert_eq!(copy.remote_target(), format!("ubuntu@repo.example.com:/tmp/{}", dir));
            }
            other => panic!("expected copy, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_copy_scripts_records_failed_transfer() {
    let log = new_log();
    let mut ctl = controller(RecordingShell::new(log.clone()));
    let transfer = RecordingTransfer::failing(log.clone());
    let env = ctl.initial_environment().unwrap();

    let results = ctl.copy_scripts(&env, "h", &transfer).await.unwrap();
    assert_eq!(results.iter().filter(|r| r.is_failure()).count(), 3);
}

#[tokio::test]
async fn test_install_packages_writes_s3cfg_over_stdin() {
    let log = new_log();
    let mut ctl = controller(RecordingShell::new(log.clone()));
    let env = ctl.initial_environment().unwrap();

    let results = ctl
        .install_packages(&env, &S3Credentials::new("A1", "S1"))
        .await
        .unwrap();
    assert_eq!(results.len(), 4);

    let recorded = events(&log);
    let cmds = commands(&log);
    assert_eq!(
        cmds[..3].to_vec(),
        vec![
            format!("{} sudo apt-get update 2>&1", GNUPG_PREFIX),
            format!("{} sudo apt-get -y upgrade 2>&1", GNUPG_PREFIX),
            format!("{} sudo apt-get -y install gnupg-agent gnupg2 s3cmd 2>&1", GNUPG_PREFIX),
        ]
    );
    assert_eq!(cmds[3], format!("{} cat > /home/ubuntu/.s3cfg", GNUPG_PREFIX));

    match &recorded[3] {
        Event::Exec {
            command,
            stdin: Some(stdin),
        } => {
            assert!(!command.contains("A1"));
            assert!(!command.contains("S1"));
            let text = String::from_utf8(stdin.clone()).unwrap();
            assert!(text.lines().any(|l| l == "access_key = A1"));
            assert!(text.lines().any(|l| l == "secret_key = S1"));
        }
        other => panic!("expected s3cfg write with stdin, got {:?}", other),
    }
}

#[tokio::test]
async fn test_start_gpg_commands() {
    let log = new_log();
    let mut ctl = controller(RecordingShell::new(log.clone()));
    let env = ctl.initial_environment().unwrap();

    ctl.start_gpg(&env).await.unwrap();

    assert_eq!(
        commands(&log),
        vec![
            format!("{} chmod -R 777 /tmp/apt/gpg-home/", GNUPG_PREFIX),
            format!(
                "{} sudo -E -u www-data gpg-agent --daemon --write-env-file /tmp/.gpg-agent-info \
                 --homedir /tmp/apt/gpg-home/ --allow-preset-passphrase",
                GNUPG_PREFIX
            ),
        ]
    );
}

#[tokio::test]
async fn test_set_gpg_passphrase_uses_stdin() {
    let log = new_log();
    let mut ctl = controller(RecordingShell::with_agent(log.clone()));
    let env = ctl.initial_environment().unwrap();
    let gpg_env = ctl.get_gpg_env(&env).await.unwrap();

    ctl.set_gpg_passphrase(&gpg_env, &Secret::new("s3cr3t pass".to_string()))
        .await
        .unwrap();

    let recorded = events(&log);
    match &recorded[1] {
        Event::Exec {
            command,
            stdin: Some(stdin),
        } => {
            assert_eq!(
                command,
                &format!(
                    "sudo -E -u www-data {} /usr/lib/gnupg2/gpg-preset-passphrase -v \
                     --preset F36A89E33CC1BD0F71079007327574EE02A818DD",
                    agent_prefix()
                )
            );

            // sudo 只在程序名之前接受环境赋值
            let program = command.find("gpg-preset-passphrase").unwrap();
            for key in ["GNUPGHOME=", "GPG_AGENT_INFO="] {
                let at = command.find(key).unwrap();
                assert!(at < program, "{} must precede the program", key);
            }
            assert!(!command.contains("s3cr3t"));
            assert_eq!(stdin.as_slice(), b"s3cr3t pass");
        }
        other => panic!("expected preset with stdin, got {:?}", other),
    }
}

#[tokio::test]
async fn test_update_deb_repo_commands() {
    let log = new_log();
    let mut ctl = controller(RecordingShell::new(log.clone()));
    let env = ctl.initial_environment().unwrap();

    ctl.update_deb_repo(&env, "nightly-42", "cdh3u1")
        .await
        .unwrap();

    assert_eq!(
        commands(&log),
        vec![
            format!("{} sudo rm -rf /tmp/nightly-42 2>&1", GNUPG_PREFIX),
            format!(
                "{} sudo -E -u www-data /tmp/apt/update_repo.sh -s cloudera-freezer \
                 -b nightly-42 -c cdh3u1 -r /var/www/archive_public/debian/ 2>&1",
                GNUPG_PREFIX
            ),
        ]
    );
}

#[tokio::test]
async fn test_update_yum_repo_uses_version() {
    let log = new_log();
    let mut ctl = controller(RecordingShell::new(log.clone()));
    let env = ctl.initial_environment().unwrap();

    ctl.update_yum_repo(&env, "nightly-42", "cdh3u1")
        .await
        .unwrap();

    assert_eq!(
        commands(&log),
        vec![format!(
            "{} sudo -E -u www-data /tmp/yum/update_repos.sh -s /tmp/nightly-42/ \
             -c 3 -r /var/www/archive_public/redhat/ 2>&1",
            GNUPG_PREFIX
        )]
    );
}

#[tokio::test]
async fn test_finalize_staging_command() {
    let log = new_log();
    let mut ctl = controller(RecordingShell::new(log.clone()));
    let env = ctl.initial_environment().unwrap();

    ctl.finalize_staging(&env, "nightly-42", "cdh4")
        .await
        .unwrap();

    assert_eq!(
        commands(&log),
        vec![format!(
            "{} sudo -E -u www-data /tmp/ec2_build/bin/finalize-staging.sh -b nightly-42 \
             -c 4 -r /var/www/archive_public/ 2>&1",
            GNUPG_PREFIX
        )]
    );
}

#[tokio::test]
async fn test_invalid_release_issues_no_commands() {
    let log = new_log();
    let mut ctl = controller(RecordingShell::new(log.clone()));
    let env = ctl.initial_environment().unwrap();

    let err = ctl.update_deb_repo(&env, "b1", "3u1").await.unwrap_err();
    assert!(matches!(err, AppError::ReleaseFormat(_)));
    let err = ctl.update_yum_repo(&env, "b1", "CDH3").await.unwrap_err();
    assert!(matches!(err, AppError::ReleaseFormat(_)));
    let err = ctl.finalize_staging(&env, "b1", "").await.unwrap_err();
    assert!(matches!(err, AppError::ReleaseFormat(_)));

    assert!(events(&log).is_empty());
}

#[tokio::test]
async fn test_invalid_build_issues_no_commands() {
    let log = new_log();
    let mut ctl = controller(RecordingShell::new(log.clone()));
    let env = ctl.initial_environment().unwrap();

    let err = ctl
        .update_deb_repo(&env, "../etc", "cdh3u1")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidBuild(_)));
    assert!(events(&log).is_empty());
}

#[tokio::test]
async fn test_disconnect_closes_session() {
    let log = new_log();
    let ctl = controller(RecordingShell::new(log.clone()));

    ctl.disconnect().await.unwrap();
    assert_eq!(events(&log), vec![Event::Close]);
}

#[test]
fn test_compose_matches_controller_prefix() {
    let env = Environment::new()
        .with("GNUPGHOME", "/tmp/apt/gpg-home/")
        .unwrap();
    let cmd = RemoteCommand::new("true");
    assert_eq!(
        compose(&env, &cmd, true).unwrap(),
        format!("{} true 2>&1", GNUPG_PREFIX)
    );
}
