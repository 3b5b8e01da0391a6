use std::path::{Path, PathBuf};

use anyhow::Context;
use model::migration::TrackedFile;
use tracing::debug;

use crate::command::{run_checked, CommandSpec};
use crate::parser::parse_ls_files_stage;

fn git(repo_dir: &Path) -> CommandSpec {
    CommandSpec::new("git")
        .current_dir(repo_dir)
        // 避免在 CI 中弹出交互式提示
        .env("GIT_TERMINAL_PROMPT", "0")
}

/// 仓库内相对路径的规范形式, 与 git 输出和 contents API 一致:
/// 去掉 `.` 和空段, 解析 `..`, 统一使用 `/`
pub fn normalize_repo_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }
    segments.join("/")
}

/// 文件未被跟踪时返回 None
pub async fn ls_files_stage(repo_dir: &Path, path: &str) -> anyhow::Result<Option<TrackedFile>> {
    let path = normalize_repo_path(path);
    let spec = git(repo_dir).args(["ls-files", "-z", "--stage", "--", path.as_str()]);
    let output = run_checked(&spec).await?;
    let tracked = parse_ls_files_stage(&output.stdout, &path);
    debug!("{} 跟踪状态: {:?}", path, tracked);
    Ok(tracked)
}

/// 计算内容的 blob sha, 不写入对象库
pub async fn hash_object(repo_dir: &Path, content: &[u8]) -> anyhow::Result<String> {
    let spec = git(repo_dir)
        .args(["hash-object", "--stdin"])
        .stdin(content.to_vec());
    let output = run_checked(&spec).await?;
    let sha = output.stdout.trim().to_string();
    if sha.is_empty() {
        anyhow::bail!("git hash-object 没有输出");
    }
    Ok(sha)
}

pub async fn head_sha(repo_dir: &Path) -> anyhow::Result<String> {
    let spec = git(repo_dir).args(["rev-parse", "HEAD"]);
    let output = run_checked(&spec)
        .await
        .context("获取 HEAD 提交失败")?;
    Ok(output.stdout.trim().to_string())
}

/// 仓库根目录, contents API 的路径相对于它
pub async fn toplevel(dir: &Path) -> anyhow::Result<PathBuf> {
    let spec = git(dir).args(["rev-parse", "--show-toplevel"]);
    let output = run_checked(&spec)
        .await
        .with_context(|| format!("{} 不在 git 仓库中", dir.display()))?;
    Ok(PathBuf::from(output.stdout.trim()))
}
