use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use model::check_run::CheckRunResult;
use model::github::{
    CheckRun, CompleteCheckRun, ContentsResponse, CreateCheckRun, CreatePullRequest,
    CreateRefRequest, GitRef, PullRequest, PutFileRequest, PutFileResponse, RepoFile,
    RestfulRepository,
};
use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};
use url::Url;

use crate::config::{mask_token, GithubConfig};

const USER_AGENT: &str = "django-migration-actions";
const API_VERSION: &str = "2022-11-28";

// GitHub API客户端, 绑定到单个仓库
pub struct GitHubApiClient {
    client: Client,
    api_url: Url,
    token: String,
    owner: String,
    repo: String,
}

impl GitHubApiClient {
    pub fn new(config: &GithubConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(GitHubApiClient {
            client,
            api_url: config.api_url.clone(),
            token: config.token.clone(),
            owner: config.owner.clone(),
            repo: config.repo.clone(),
        })
    }

    /// /repos/{owner}/{repo}/{segments...}, 每段单独转义
    fn repo_endpoint(&self, segments: &[&str]) -> anyhow::Result<Url> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("GitHub API 地址不能作为 base: {}", self.api_url))?
            .pop_if_empty()
            .extend(["repos", self.owner.as_str(), self.repo.as_str()])
            .extend(segments.iter().flat_map(|s| s.split('/')));
        Ok(url)
    }

    // 创建带有认证头的请求构建器
    fn authorized_request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header(header::AUTHORIZATION, format!("token {}", self.token))
            .header(header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    async fn send(&self, builder: RequestBuilder) -> anyhow::Result<Response> {
        let request = builder.build()?;
        let description = format!("{} {}", request.method(), request.url().path());
        debug!("请求 GitHub API: {}", description);

        let response = match self.client.execute(request).await {
            Ok(resp) => resp,
            Err(e) => {
                error!("API请求 {} 失败: {}", description, e);
                return Err(e.into());
            }
        };
        self.github_api_limit_check(response, &description).await
    }

    // 404 视为资源不存在
    async fn send_optional(&self, builder: RequestBuilder) -> anyhow::Result<Option<Response>> {
        match self.send(builder).await {
            Ok(response) => Ok(Some(response)),
            Err(e) => match e.downcast_ref::<ApiError>() {
                Some(api_error) if api_error.status == StatusCode::NOT_FOUND => Ok(None),
                _ => Err(e),
            },
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> anyhow::Result<T> {
        let response = self.send(builder).await?;
        Ok(response.json::<T>().await?)
    }

    // api 限流检查, 非 2xx 响应转换为 ApiError
    async fn github_api_limit_check(
        &self,
        response: Response,
        description: &str,
    ) -> anyhow::Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            let header_value = |name: &str| {
                response
                    .headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            };
            if let Some(remaining) = header_value("x-ratelimit-remaining") {
                error!("GitHub API速率限制剩余: {}", remaining);
            }
            if let Some(reset) = header_value("x-ratelimit-reset") {
                let reset_time = reset.parse::<i64>().unwrap_or(0);
                let wait_time = reset_time - chrono::Utc::now().timestamp();
                error!(
                    "GitHub API速率限制重置时间: {} (还需等待约{}秒), token: {}",
                    reset_time,
                    wait_time.max(0),
                    mask_token(&self.token)
                );
            }
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read response body".to_string());
        error!("❌ HTTP Error: {} - {} - {}", description, status, body);
        Err(ApiError {
            status,
            description: description.to_string(),
            body,
        }
        .into())
    }

    pub async fn get_repo_info(&self) -> anyhow::Result<RestfulRepository> {
        let url = self.repo_endpoint(&[])?;
        let res: RestfulRepository = self
            .send_json(self.authorized_request(Method::GET, url))
            .await?;
        info!("请求repo 信息成功: {}, 默认分支 {}", res.full_name, res.default_branch);
        Ok(res)
    }

    pub async fn create_check_run(&self, name: &str, head_sha: &str) -> anyhow::Result<CheckRun> {
        let url = self.repo_endpoint(&["check-runs"])?;
        let body = CreateCheckRun {
            name,
            head_sha,
            status: "in_progress",
            started_at: chrono::Utc::now(),
        };
        let check_run: CheckRun = self
            .send_json(self.authorized_request(Method::POST, url).json(&body))
            .await?;
        info!("创建 check run {} ({}) @ {}", check_run.id, name, head_sha);
        Ok(check_run)
    }

    pub async fn complete_check_run(
        &self,
        check_run_id: u64,
        result: &CheckRunResult,
    ) -> anyhow::Result<CheckRun> {
        let id = check_run_id.to_string();
        let url = self.repo_endpoint(&["check-runs", id.as_str()])?;
        let body = CompleteCheckRun::new(result, chrono::Utc::now());
        let check_run: CheckRun = self
            .send_json(self.authorized_request(Method::PATCH, url).json(&body))
            .await?;
        info!("check run {} 完成: {}", check_run_id, result.conclusion);
        Ok(check_run)
    }

    /// 读取分支上的文件, 不存在时返回 None
    pub async fn get_file(&self, path: &str, git_ref: &str) -> anyhow::Result<Option<RepoFile>> {
        let url = self.repo_endpoint(&["contents", path])?;
        let request = self
            .authorized_request(Method::GET, url)
            .query(&[("ref", git_ref)]);
        let Some(response) = self.send_optional(request).await? else {
            debug!("{}@{} 不存在", path, git_ref);
            return Ok(None);
        };
        let contents: ContentsResponse = response.json().await?;
        if contents.encoding == "none" {
            // 超过 1MB 的文件不返回内容, 只能依赖 sha
            debug!("{} 过大, contents API 未返回内容", path);
            return Ok(Some(RepoFile {
                sha: contents.sha,
                path: contents.path,
                content: Vec::new(),
            }));
        }
        if !contents.encoding.is_empty() && contents.encoding != "base64" {
            anyhow::bail!("不支持的文件编码 {}: {}", contents.encoding, path);
        }
        // GitHub 返回的 base64 每 60 个字符换行
        let encoded: String = contents
            .content
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        let content = STANDARD.decode(encoded)?;
        Ok(Some(RepoFile {
            sha: contents.sha,
            path: contents.path,
            content,
        }))
    }

    /// 创建或更新文件, sha 为 None 时创建
    pub async fn put_file(
        &self,
        path: &str,
        branch: &str,
        message: &str,
        content: &[u8],
        sha: Option<&str>,
    ) -> anyhow::Result<PutFileResponse> {
        let url = self.repo_endpoint(&["contents", path])?;
        let body = PutFileRequest {
            message,
            content: STANDARD.encode(content),
            branch,
            sha,
        };
        let response: PutFileResponse = self
            .send_json(self.authorized_request(Method::PUT, url).json(&body))
            .await?;
        info!(
            "{} {} 到 {}, commit {}",
            if sha.is_some() { "更新" } else { "创建" },
            path,
            branch,
            response.commit.sha
        );
        Ok(response)
    }

    pub async fn get_branch_sha(&self, branch: &str) -> anyhow::Result<Option<String>> {
        let url = self.repo_endpoint(&["git", "ref", "heads", branch])?;
        let Some(response) = self
            .send_optional(self.authorized_request(Method::GET, url))
            .await?
        else {
            return Ok(None);
        };
        let git_ref: GitRef = response.json().await?;
        Ok(Some(git_ref.object.sha))
    }

    pub async fn create_branch(&self, branch: &str, sha: &str) -> anyhow::Result<GitRef> {
        let url = self.repo_endpoint(&["git", "refs"])?;
        let body = CreateRefRequest {
            git_ref: format!("refs/heads/{}", branch),
            sha,
        };
        let git_ref: GitRef = self
            .send_json(self.authorized_request(Method::POST, url).json(&body))
            .await?;
        info!("创建分支 {} @ {}", branch, sha);
        Ok(git_ref)
    }

    pub async fn find_open_pull_request(
        &self,
        head_branch: &str,
    ) -> anyhow::Result<Option<PullRequest>> {
        let url = self.repo_endpoint(&["pulls"])?;
        let head = format!("{}:{}", self.owner, head_branch);
        let request = self
            .authorized_request(Method::GET, url)
            .query(&[("head", head.as_str()), ("state", "open")]);
        let pulls: Vec<PullRequest> = self.send_json(request).await?;
        Ok(pulls.into_iter().next())
    }

    pub async fn create_pull_request(
        &self,
        title: &str,
        head: &str,
        base: &str,
        body: &str,
    ) -> anyhow::Result<PullRequest> {
        let url = self.repo_endpoint(&["pulls"])?;
        let request = CreatePullRequest {
            title,
            head,
            base,
            body,
        };
        let pull: PullRequest = self
            .send_json(self.authorized_request(Method::POST, url).json(&request))
            .await?;
        info!("创建 PR #{}: {}", pull.number, pull.html_url);
        Ok(pull)
    }
}

/// GitHub 返回的非 2xx 响应
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub description: String,
    pub body: String,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "GitHub API {} returned {}: {}",
            self.description, self.status, self.body
        )
    }
}

impl std::error::Error for ApiError {}
