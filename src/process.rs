// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 子进程执行
//!
//! 同步运行平台命令，标准输出与标准错误并发读入同一个缓冲区。

use log::{debug, error, warn};

use std::{
    io::Read,
    path::Path,
    process::{Command, ExitStatus, Stdio},
    sync::Mutex,
    thread,
};

use crate::exception::Exception;

const READ_CHUNK: usize = 4096;

/// 要执行的命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSpec {
    /// 平台的目录列表命令（`ls` / `dir`）
    Listing,
    /// 交给平台 shell（`sh -c` / `cmd /c`）执行的命令行
    Shell(String),
}

impl CommandSpec {
    fn command(&self) -> Command {
        let line = match self {
            CommandSpec::Listing if cfg!(windows) => "dir",
            CommandSpec::Listing => "ls",
            CommandSpec::Shell(line) => line.as_str(),
        };
        let mut command = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/c");
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c");
            c
        };
        command.arg(line);
        command
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// 标准输出与标准错误按到达顺序合并后的内容
    pub captured: Vec<u8>,
    pub status: ExitStatus,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

pub struct ProcessRunner;

impl ProcessRunner {
    /// 在 `dir` 下运行命令并阻塞到子进程退出。
    ///
    /// 只有启动失败或等待失败才返回错误；退出码由调用方根据策略处理。
    pub fn run(spec: &CommandSpec, dir: &Path) -> Result<ProcessOutput, Exception> {
        let mut command = spec.command();
        command
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        debug!("在{}下执行命令：{:?}", dir.display(), spec);

        let mut child = command.spawn().map_err(|e| {
            error!("无法启动子进程{:?}：{}", spec, e);
            Exception::SubprocessFailed {
                message: e.to_string(),
                captured: vec![],
            }
        })?;

        let captured = Mutex::new(Vec::new());
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let status = thread::scope(|s| {
            if let Some(out) = stdout {
                s.spawn(|| drain(out, &captured));
            }
            if let Some(err) = stderr {
                s.spawn(|| drain(err, &captured));
            }
            child.wait()
        });
        let captured = match captured.into_inner() {
            Ok(buffer) => buffer,
            Err(poisoned) => poisoned.into_inner(),
        };

        match status {
            Ok(status) => {
                debug!("子进程退出：{}，输出{}字节", status, captured.len());
                Ok(ProcessOutput { captured, status })
            }
            Err(e) => {
                error!("等待子进程时出错：{}", e);
                Err(Exception::SubprocessFailed {
                    message: e.to_string(),
                    captured,
                })
            }
        }
    }
}

fn drain<R: Read>(mut source: R, sink: &Mutex<Vec<u8>>) {
    let mut buffer = [0u8; READ_CHUNK];
    loop {
        match source.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => match sink.lock() {
                Ok(mut lock) => lock.extend_from_slice(&buffer[..n]),
                Err(poisoned) => poisoned.into_inner().extend_from_slice(&buffer[..n]),
            },
            Err(e) => {
                warn!("读取子进程输出时出错：{}", e);
                break;
            }
        }
    }
}
