use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

// 默认 GitHub API 地址, GHES 通过 GITHUB_API_URL 覆盖
const DEFAULT_API_URL: &str = "https://api.github.com";

// GitHub 相关配置, 来自 Actions 运行时的环境变量
#[derive(Debug, Clone)]
pub struct GithubConfig {
    pub token: String,
    pub api_url: Url,
    pub owner: String,
    pub repo: String,
    pub sha: Option<String>,
    pub event_name: Option<String>,
    pub event_path: Option<PathBuf>,
}

impl GithubConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 按给定的查找函数读取配置, 空字符串视为未设置
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let token = match get("INPUT_GITHUB_TOKEN") {
            Some(token) => {
                debug!("从 INPUT_GITHUB_TOKEN 加载令牌");
                token
            }
            None => get("GITHUB_TOKEN")
                .context("缺少 GitHub 令牌, 请设置 github_token 输入或 GITHUB_TOKEN")?,
        };

        let repository = get("GITHUB_REPOSITORY").context("缺少 GITHUB_REPOSITORY")?;
        let (owner, repo) = parse_repository(&repository)?;

        let api_url = get("GITHUB_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_url =
            Url::parse(&api_url).with_context(|| format!("无效的 GITHUB_API_URL: {}", api_url))?;

        let config = GithubConfig {
            token,
            api_url,
            owner,
            repo,
            sha: get("GITHUB_SHA"),
            event_name: get("GITHUB_EVENT_NAME"),
            event_path: get("GITHUB_EVENT_PATH").map(PathBuf::from),
        };
        info!(
            "GitHub 配置: {}/{} ({}), 令牌 {}",
            config.owner,
            config.repo,
            config.api_url,
            mask_token(&config.token)
        );
        Ok(config)
    }

    pub fn repository(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    /// check run 挂载的提交
    ///
    /// pull_request 事件下 GITHUB_SHA 是合并提交, 需要从事件文件中取 PR 的 head sha。
    /// 其余情况依次回退到 GITHUB_SHA 和本地 HEAD。
    pub async fn resolve_head_sha(&self, repo_dir: &Path) -> anyhow::Result<String> {
        let is_pull_request = matches!(
            self.event_name.as_deref(),
            Some("pull_request") | Some("pull_request_target")
        );
        if is_pull_request {
            if let Some(path) = &self.event_path {
                match read_pull_request_head_sha(path) {
                    Ok(Some(sha)) => return Ok(sha),
                    Ok(None) => warn!("事件文件中没有 pull_request.head.sha"),
                    Err(e) => warn!("读取事件文件失败: {:#}", e),
                }
            }
        }
        if let Some(sha) = &self.sha {
            return Ok(sha.clone());
        }
        django_runner::git::head_sha(repo_dir).await
    }
}

/// 解析 owner/repo
pub fn parse_repository(repository: &str) -> anyhow::Result<(String, String)> {
    match repository.trim().split_once('/') {
        Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => bail!("仓库格式应为 owner/repo: {}", repository),
    }
}

#[derive(Debug, Deserialize)]
struct PullRequestEvent {
    pull_request: Option<EventPullRequest>,
}

#[derive(Debug, Deserialize)]
struct EventPullRequest {
    head: EventHead,
}

#[derive(Debug, Deserialize)]
struct EventHead {
    sha: String,
}

fn read_pull_request_head_sha(path: &Path) -> anyhow::Result<Option<String>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("无法读取 {}", path.display()))?;
    let event: PullRequestEvent = serde_json::from_str(&contents)?;
    Ok(event.pull_request.map(|pr| pr.head.sha))
}

/// 日志中隐藏令牌, 只保留首尾少量字符
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    let len = chars.len();
    if len <= 8 {
        "*".repeat(len)
    } else {
        let start: String = chars[..4].iter().collect();
        let end: String = chars[len - 4..].iter().collect();
        format!("{}{}{}", start, "*".repeat(len - 8), end)
    }
}
