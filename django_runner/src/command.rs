use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context};
use tokio::io::AsyncWriteExt;
use tokio::process::Command as TokioCommand;
use tracing::debug;

// 一次外部命令调用的描述
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    pub envs: Vec<(String, String)>,
    pub stdin: Option<Vec<u8>>,
    /// display() 中需要隐藏的片段
    pub secrets: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.envs.push((key.to_string(), value.to_string()));
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn secret(mut self, value: &str) -> Self {
        if !value.is_empty() {
            self.secrets.push(value.to_string());
        }
        self
    }

    /// 用于日志和错误信息的命令行, secret 被替换为 ***
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        for secret in &self.secrets {
            line = line.replace(secret.as_str(), "***");
        }
        line
    }
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// 被信号终止时为 None
    pub status_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == Some(0)
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines()
    }
}

/// 执行命令并收集输出, 非零退出码不视为错误
pub async fn run(spec: &CommandSpec) -> anyhow::Result<CommandOutput> {
    debug!("执行命令: {}", spec.display());

    let mut command = TokioCommand::new(&spec.program);
    command
        .args(&spec.args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);
    if let Some(dir) = &spec.current_dir {
        command.current_dir(dir);
    }
    for (key, value) in &spec.envs {
        command.env(key, value);
    }

    let mut child = command
        .spawn()
        .with_context(|| format!("无法启动命令 `{}`", spec.display()))?;

    // 写 stdin 与读取输出同时进行, 否则子进程输出填满管道后双方互相等待
    let child_stdin = child.stdin.take();
    let write_stdin = async {
        if let (Some(mut child_stdin), Some(input)) = (child_stdin, &spec.stdin) {
            match child_stdin.write_all(input).await {
                // 子进程不读 stdin 就退出时忽略
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                other => other?,
            }
            // drop 后子进程读到 EOF
        }
        Ok::<_, std::io::Error>(())
    };
    let (_, output) = tokio::try_join!(write_stdin, child.wait_with_output())
        .with_context(|| format!("等待命令 `{}` 结束失败", spec.display()))?;

    let result = CommandOutput {
        status_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    debug!(
        "命令 `{}` 结束, 退出码: {:?}, stdout {} 字节",
        spec.display(),
        result.status_code,
        result.stdout.len()
    );
    Ok(result)
}

/// 执行命令, 非零退出码返回带 stderr 的错误
pub async fn run_checked(spec: &CommandSpec) -> anyhow::Result<CommandOutput> {
    let output = run(spec).await?;
    if !output.success() {
        let code = output
            .status_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        bail!(
            "command `{}` exited with {}: {}",
            spec.display(),
            code,
            output.stderr.trim()
        );
    }
    Ok(output)
}
