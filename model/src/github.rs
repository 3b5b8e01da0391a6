use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::check_run::CheckRunResult;

// 仓库信息, 只取需要的字段
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RestfulRepository {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    pub default_branch: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CheckRun {
    pub id: u64,
    pub html_url: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateCheckRun<'a> {
    pub name: &'a str,
    pub head_sha: &'a str,
    pub status: &'a str,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CheckRunOutput<'a> {
    pub title: &'a str,
    pub summary: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub text: &'a str,
}

#[derive(Debug, Serialize)]
pub struct CompleteCheckRun<'a> {
    pub status: &'a str,
    pub conclusion: &'a str,
    pub completed_at: DateTime<Utc>,
    pub output: CheckRunOutput<'a>,
}

impl<'a> CompleteCheckRun<'a> {
    pub fn new(result: &'a CheckRunResult, completed_at: DateTime<Utc>) -> Self {
        Self {
            status: "completed",
            conclusion: result.conclusion.as_str(),
            completed_at,
            output: CheckRunOutput {
                title: &result.title,
                summary: &result.summary,
                text: &result.text,
            },
        }
    }
}

// contents API 的返回, content 为带换行的 base64
#[derive(Debug, Deserialize, Clone)]
pub struct ContentsResponse {
    pub sha: String,
    pub path: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub encoding: String,
}

// 解码后的仓库文件
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct RepoFile {
    pub sha: String,
    pub path: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Serialize)]
pub struct PutFileRequest<'a> {
    pub message: &'a str,
    pub content: String,
    pub branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha: Option<&'a str>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CommitRef {
    pub sha: String,
    pub html_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PutFileResponse {
    pub commit: CommitRef,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitObject {
    pub sha: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitRef {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub object: GitObject,
}

#[derive(Debug, Serialize)]
pub struct CreateRefRequest<'a> {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub sha: &'a str,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PullRequest {
    pub number: u64,
    pub html_url: String,
    pub state: String,
    pub title: String,
}

#[derive(Debug, Serialize)]
pub struct CreatePullRequest<'a> {
    pub title: &'a str,
    pub head: &'a str,
    pub base: &'a str,
    pub body: &'a str,
}
