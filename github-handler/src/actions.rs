//! GitHub Actions 运行时交互: 步骤输出, 步骤摘要, 日志注解

use std::env;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct ActionsRuntime {
    pub output_path: Option<PathBuf>,
    pub summary_path: Option<PathBuf>,
}

impl ActionsRuntime {
    pub fn from_env() -> Self {
        let path = |key: &str| {
            env::var(key)
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        };
        Self {
            output_path: path("GITHUB_OUTPUT"),
            summary_path: path("GITHUB_STEP_SUMMARY"),
        }
    }

    /// 写入步骤输出, 本地运行没有 GITHUB_OUTPUT 时只打日志
    pub fn set_output(&self, name: &str, value: &str) -> anyhow::Result<()> {
        info!("output {}={}", name, value);
        let Some(path) = &self.output_path else {
            return Ok(());
        };
        let entry = if value.contains('\n') || value.contains('\r') {
            let delimiter = heredoc_delimiter(value);
            format!("{}<<{}\n{}\n{}\n", name, delimiter, value, delimiter)
        } else {
            format!("{}={}\n", name, value)
        };
        append(path, &entry).with_context(|| format!("写入步骤输出 {} 失败", name))
    }

    pub fn append_step_summary(&self, markdown: &str) -> anyhow::Result<()> {
        let Some(path) = &self.summary_path else {
            return Ok(());
        };
        let mut entry = markdown.to_string();
        if !entry.ends_with('\n') {
            entry.push('\n');
        }
        append(path, &entry).context("写入步骤摘要失败")
    }
}

fn append(path: &PathBuf, text: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(text.as_bytes())
}

// 分隔符不能出现在值中
fn heredoc_delimiter(value: &str) -> String {
    let mut delimiter = format!("ghadelimiter_{}", std::process::id());
    while value.contains(&delimiter) {
        delimiter.push('_');
    }
    delimiter
}

fn escape_data(message: &str) -> String {
    message
        .replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

pub fn error_annotation_line(message: &str) -> String {
    format!("::error::{}", escape_data(message))
}

/// 在 workflow 日志中标红错误
pub fn error_annotation(message: &str) {
    println!("{}", error_annotation_line(message));
}
