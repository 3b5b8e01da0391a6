use anyhow::Context;
use tracing::info;
use url::Url;

use crate::command::{run_checked, CommandSpec};

// 每次 dump 都会变化的行, 保留会导致无意义的 diff
const VOLATILE_PREFIXES: [&str; 4] = [
    "-- Dumped from database version",
    "-- Dumped by pg_dump version",
    "\\restrict",
    "\\unrestrict",
];

#[derive(Debug, Clone)]
pub struct PgDump {
    pub program: String,
    pub database_url: String,
    pub extra_args: Vec<String>,
}

impl PgDump {
    pub fn new(database_url: &str) -> Self {
        Self {
            program: "pg_dump".to_string(),
            database_url: database_url.to_string(),
            extra_args: Vec::new(),
        }
    }

    pub fn spec(&self) -> CommandSpec {
        let spec = CommandSpec::new(&self.program)
            .args([
                "--schema-only",
                "--no-owner",
                "--no-privileges",
                "--dbname",
                self.database_url.as_str(),
            ])
            .args(self.extra_args.iter().cloned());
        // 连接串中的密码不能出现在日志和错误信息里
        match Url::parse(&self.database_url) {
            Ok(url) => match url.password() {
                Some(password) => spec.secret(password),
                None => spec,
            },
            Err(_) => spec,
        }
    }

    pub async fn dump(&self) -> anyhow::Result<String> {
        info!("导出数据库 schema");
        let output = run_checked(&self.spec())
            .await
            .context("pg_dump 执行失败")?;
        Ok(output.stdout)
    }
}

/// 去掉易变行, 压缩多余空行, 保证以单个换行结尾
pub fn normalize_dump(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        if VOLATILE_PREFIXES.iter().any(|p| line.starts_with(p)) {
            continue;
        }
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 2 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        normalized.push_str(line);
        normalized.push('\n');
    }
    let trimmed = normalized.trim_end_matches('\n').len();
    normalized.truncate(trimmed);
    normalized.push('\n');
    normalized
}
