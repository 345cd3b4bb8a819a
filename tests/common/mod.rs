//! 测试公共模块
//! 录制型 RemoteShell / FileTransfer，按发生顺序记录所有操作

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use archive_stager::{
    config::ArchiveSettings,
    error::Result,
    ssh::{ExecutionResult, OutputSink, OutputStream, RemoteShell},
    transfer::{FileTransfer, TreeCopy},
    ArchiveController,
};
use async_trait::async_trait;

pub const AGENT_INFO: &str = "GPG_AGENT_INFO=/tmp/gpg-Xy12/S.gpg-agent:4242:1";

/// 录制到的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Exec {
        command: String,
        stdin: Option<Vec<u8>>,
    },
    Copy(TreeCopy),
    Close,
}

impl Event {
    pub fn command(&self) -> Option<&str> {
        match self {
            Event::Exec { command, .. } => Some(command),
            _ => None,
        }
    }
}

pub type EventLog = Arc<Mutex<Vec<Event>>>;

pub fn new_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn events(log: &EventLog) -> Vec<Event> {
    log.lock().unwrap().clone()
}

pub fn commands(log: &EventLog) -> Vec<String> {
    events(log)
        .iter()
        .filter_map(|e| e.command().map(str::to_string))
        .collect()
}

/// 预设的响应：命令包含 `needle` 时返回，后添加的优先
#[derive(Debug, Clone)]
struct Response {
    needle: String,
    exit_code: i32,
    stdout: String,
    stderr: String,
}

/// 录制型远程 shell
pub struct RecordingShell {
    log: EventLog,
    responses: Vec<Response>,
}

impl RecordingShell {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            responses: Vec::new(),
        }
    }

    /// 默认对 `cat .../.gpg-agent-info` 返回一行有效的 agent 变量
    pub fn with_agent(log: EventLog) -> Self {
        Self::new(log).respond(".gpg-agent-info", 0, &format!("{}\n", AGENT_INFO), "")
    }

    pub fn respond(mut self, needle: &str, exit_code: i32, stdout: &str, stderr: &str) -> Self {
        self.responses.push(Response {
            needle: needle.to_string(),
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        });
        self
    }
}

#[async_trait]
impl RemoteShell for RecordingShell {
    async fn exec(
        &mut self,
        command: &str,
        stdin: Option<&[u8]>,
        output: &OutputSink,
    ) -> Result<ExecutionResult> {
        self.log.lock().unwrap().push(Event::Exec {
            command: command.to_string(),
            stdin: stdin.map(<[u8]>::to_vec),
        });

        let response = self
            .responses
            .iter()
            .rev()
            .find(|r| command.contains(&r.needle))
            .cloned();
        let (exit_code, stdout, stderr) = match response {
            Some(r) => (r.exit_code, r.stdout, r.stderr),
            None => (0, String::new(), String::new()),
        };

        for line in stdout.lines() {
            output(OutputStream::Stdout, line);
        }
        for line in stderr.lines() {
            output(OutputStream::Stderr, line);
        }

        Ok(ExecutionResult::completed(
            command.to_string(),
            Some(exit_code),
            stdout,
            stderr,
            0.0,
        ))
    }

    async fn close(&mut self) -> Result<()> {
        self.log.lock().unwrap().push(Event::Close);
        Ok(())
    }
}

/// 录制型传输
pub struct RecordingTransfer {
    log: EventLog,
    exit_code: i32,
}

impl RecordingTransfer {
    pub fn new(log: EventLog) -> Self {
        Self { log, exit_code: 0 }
    }

    pub fn failing(log: EventLog) -> Self {
        Self { log, exit_code: 1 }
    }
}

#[async_trait]
impl FileTransfer for RecordingTransfer {
    async fn copy_tree(&self, request: &TreeCopy) -> Result<ExecutionResult> {
        self.log.lock().unwrap().push(Event::Copy(request.clone()));
        Ok(ExecutionResult::completed(
            format!("scp -r {} {}", request.source.display(), request.remote_target()),
            Some(self.exit_code),
            String::new(),
            String::new(),
            0.0,
        ))
    }
}

/// 默认布局下的控制器
pub fn controller(shell: RecordingShell) -> ArchiveController<RecordingShell> {
    ArchiveController::new(shell, ArchiveSettings::default())
}
