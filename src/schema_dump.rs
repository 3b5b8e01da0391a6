use std::path::Path;

use anyhow::Context;
use django_runner::git;
use django_runner::manage::ManagePy;
use django_runner::pg_dump::{normalize_dump, PgDump};
use github_handler::actions::ActionsRuntime;
use github_handler::services::github_api::GitHubApiClient;
use model::github::PullRequest;
use tracing::info;

#[derive(Debug, Clone)]
pub struct DumpSettings {
    pub schema_path: String,
    pub branch: String,
    pub base_branch: Option<String>,
    pub commit_message: String,
    pub pr_title: String,
    pub pr_body: String,
    pub skip_migrate: bool,
}

#[derive(Debug)]
pub enum DumpOutcome {
    /// 工作区中已跟踪的 schema 与新导出一致
    Unchanged,
    Changed {
        pull_request: PullRequest,
        /// head 分支上已有相同内容时不会产生新提交
        committed: bool,
    },
}

pub async fn dump_schema(
    client: &GitHubApiClient,
    manage: &ManagePy,
    pg_dump: &PgDump,
    repo_dir: &Path,
    settings: &DumpSettings,
) -> anyhow::Result<DumpOutcome> {
    if settings.skip_migrate {
        info!("跳过 migrate");
    } else {
        manage.migrate().await?;
    }

    // git 输出和 contents API 使用同一种路径写法
    let schema_path = git::normalize_repo_path(&settings.schema_path);
    if schema_path.is_empty() {
        anyhow::bail!("无效的 schema 路径: {:?}", settings.schema_path);
    }

    let dump = normalize_dump(&pg_dump.dump().await?);
    let content = dump.as_bytes();

    let tracked = git::ls_files_stage(repo_dir, &schema_path).await?;
    let blob_sha = git::hash_object(repo_dir, content).await?;
    match &tracked {
        Some(tracked) if tracked.blob_sha == blob_sha => {
            info!("{} 没有变化 ({})", schema_path, blob_sha);
            return Ok(DumpOutcome::Unchanged);
        }
        Some(tracked) => info!(
            "{} 已变化: {} -> {}",
            schema_path, tracked.blob_sha, blob_sha
        ),
        None => info!("{} 尚未被跟踪, 将新建", schema_path),
    }

    let target = repo_dir.join(&schema_path);
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&target, content)
        .await
        .with_context(|| format!("写入 {} 失败", target.display()))?;

    let base = match &settings.base_branch {
        Some(base) => base.clone(),
        None => client.get_repo_info().await?.default_branch,
    };
    ensure_branch(client, &settings.branch, &base).await?;

    // contents API 返回的 sha 就是 blob sha
    let existing = client.get_file(&schema_path, &settings.branch).await?;
    let committed = match existing {
        Some(file) if file.sha == blob_sha => {
            info!("{} 上的 {} 已是最新", settings.branch, schema_path);
            false
        }
        existing => {
            client
                .put_file(
                    &schema_path,
                    &settings.branch,
                    &settings.commit_message,
                    content,
                    existing.as_ref().map(|file| file.sha.as_str()),
                )
                .await?;
            true
        }
    };

    let pull_request = match client.find_open_pull_request(&settings.branch).await? {
        Some(pull_request) => {
            info!("已存在 PR #{}: {}", pull_request.number, pull_request.html_url);
            pull_request
        }
        None => {
            client
                .create_pull_request(
                    &settings.pr_title,
                    &settings.branch,
                    &base,
                    &settings.pr_body,
                )
                .await?
        }
    };

    Ok(DumpOutcome::Changed {
        pull_request,
        committed,
    })
}

/// head 分支不存在时从 base 分支最新提交创建
async fn ensure_branch(client: &GitHubApiClient, branch: &str, base: &str) -> anyhow::Result<()> {
    if client.get_branch_sha(branch).await?.is_some() {
        info!("复用已有分支 {}", branch);
        return Ok(());
    }
    let base_sha = client
        .get_branch_sha(base)
        .await?
        .with_context(|| format!("base 分支 {} 不存在", base))?;
    client.create_branch(branch, &base_sha).await?;
    Ok(())
}

pub fn report_outcome(runtime: &ActionsRuntime, outcome: &DumpOutcome) -> anyhow::Result<()> {
    match outcome {
        DumpOutcome::Unchanged => {
            runtime.set_output("changed", "false")?;
        }
        DumpOutcome::Changed {
            pull_request,
            committed,
        } => {
            runtime.set_output("changed", "true")?;
            runtime.set_output("committed", &committed.to_string())?;
            runtime.set_output("pull-request-number", &pull_request.number.to_string())?;
            runtime.set_output("pull-request-url", &pull_request.html_url)?;
            runtime.append_step_summary(&format!(
                "Database schema changed, see [#{}]({}).",
                pull_request.number, pull_request.html_url
            ))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use django_runner::command::{run_checked, CommandSpec};
    use github_handler::config::GithubConfig;
    use mockito::{Matcher, Server};
    use serde_json::json;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use url::Url;

    const SCHEMA: &str = "CREATE TABLE public.orders_order (id bigint NOT NULL);\n";

    async fn git(dir: &Path, args: &[&str]) {
        run_checked(&CommandSpec::new("git").current_dir(dir).args(args.iter().copied()))
            .await
            .unwrap();
    }

    // 临时仓库, 带 fake pg_dump 和 fake manage.py
    async fn workspace(committed_schema: Option<&str>) -> (tempfile::TempDir, PgDump, ManagePy) {
        let dir = tempfile::tempdir().unwrap();
        git(dir.path(), &["init", "-q"]).await;
        git(dir.path(), &["config", "user.email", "ci@example.com"]).await;
        git(dir.path(), &["config", "user.name", "ci"]).await;
        if let Some(schema) = committed_schema {
            fs::write(dir.path().join("schema.sql"), schema).unwrap();
            git(dir.path(), &["add", "schema.sql"]).await;
        }

        let fake_pg_dump = dir.path().join("fake_pg_dump");
        fs::write(
            &fake_pg_dump,
            format!(
                "#!/bin/sh\necho '-- Dumped from database version 16.4'\nprintf '{}'\n",
                SCHEMA.replace('\n', "\\n")
            ),
        )
        .unwrap();
        fs::set_permissions(&fake_pg_dump, fs::Permissions::from_mode(0o755)).unwrap();
        let mut pg_dump = PgDump::new("postgres://localhost/app");
        pg_dump.program = fake_pg_dump.to_string_lossy().into_owned();

        fs::write(dir.path().join("manage.py"), "echo \"  Applying $1\"\n").unwrap();
        let manage = ManagePy {
            python: "sh".to_string(),
            manage_py: "manage.py".to_string(),
            working_dir: Some(PathBuf::from(dir.path())),
            settings_module: None,
        };
        (dir, pg_dump, manage)
    }

    fn client_for(server: &Server) -> GitHubApiClient {
        let config = GithubConfig {
            token: "t".to_string(),
            api_url: Url::parse(&server.url()).unwrap(),
            owner: "acme".to_string(),
            repo: "shop".to_string(),
            sha: None,
            event_name: None,
            event_path: None,
        };
        GitHubApiClient::new(&config).unwrap()
    }

    fn settings() -> DumpSettings {
        DumpSettings {
            schema_path: "schema.sql".to_string(),
            branch: "update-db-schema".to_string(),
            base_branch: Some("main".to_string()),
            commit_message: "Update database schema".to_string(),
            pr_title: "Update database schema".to_string(),
            pr_body: "".to_string(),
            skip_migrate: false,
        }
    }

    #[tokio::test]
    async fn test_unchanged_schema_makes_no_api_calls() {
        let (dir, pg_dump, manage) = workspace(Some(SCHEMA)).await;
        let server = Server::new_async().await;
        let client = client_for(&server);

        let outcome = dump_schema(&client, &manage, &pg_dump, dir.path(), &settings())
            .await
            .unwrap();
        assert!(matches!(outcome, DumpOutcome::Unchanged));
    }

    #[tokio::test]
    async fn test_dotted_schema_path_is_recognised_as_tracked() {
        let (dir, pg_dump, manage) = workspace(Some(SCHEMA)).await;
        let server = Server::new_async().await;
        let client = client_for(&server);

        let mut settings = settings();
        settings.schema_path = "./schema.sql".to_string();
        let outcome = dump_schema(&client, &manage, &pg_dump, dir.path(), &settings)
            .await
            .unwrap();
        assert!(matches!(outcome, DumpOutcome::Unchanged));
    }

    #[tokio::test]
    async fn test_changed_schema_creates_branch_commit_and_pull_request() {
        let (dir, pg_dump, manage) = workspace(Some("CREATE TABLE old ();\n")).await;
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/repos/acme/shop/git/ref/heads/update-db-schema")
            .with_status(404)
            .with_body(r#"{"message": "Not Found"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/repos/acme/shop/git/ref/heads/main")
            .with_status(200)
            .with_body(r#"{"ref": "refs/heads/main", "object": {"sha": "basesha"}}"#)
            .create_async()
            .await;
        let create_ref = server
            .mock("POST", "/repos/acme/shop/git/refs")
            .match_body(Matcher::PartialJson(json!({"sha": "basesha"})))
            .with_status(201)
            .with_body(r#"{"ref": "refs/heads/update-db-schema", "object": {"sha": "basesha"}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/repos/acme/shop/contents/schema.sql")
            .match_query(Matcher::UrlEncoded("ref".into(), "update-db-schema".into()))
            .with_status(200)
            .with_body(r#"{"sha": "oldsha", "path": "schema.sql", "encoding": "base64", "content": ""}"#)
            .create_async()
            .await;
        let put = server
            .mock("PUT", "/repos/acme/shop/contents/schema.sql")
            .match_body(Matcher::PartialJson(json!({
                "branch": "update-db-schema",
                "sha": "oldsha"
            })))
            .with_status(200)
            .with_body(r#"{"commit": {"sha": "newcommit"}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/repos/acme/shop/pulls")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;
        let create_pull = server
            .mock("POST", "/repos/acme/shop/pulls")
            .match_body(Matcher::PartialJson(json!({
                "head": "update-db-schema",
                "base": "main"
            })))
            .with_status(201)
            .with_body(r#"{"number": 12, "html_url": "https://github.com/acme/shop/pull/12", "state": "open", "title": "Update database schema"}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let outcome = dump_schema(&client, &manage, &pg_dump, dir.path(), &settings())
            .await
            .unwrap();

        match outcome {
            DumpOutcome::Changed {
                pull_request,
                committed,
            } => {
                assert_eq!(pull_request.number, 12);
                assert!(committed);
            }
            DumpOutcome::Unchanged => panic!("schema should have changed"),
        }
        // 工作区文件已更新, 版本行被去掉
        assert_eq!(
            fs::read_to_string(dir.path().join("schema.sql")).unwrap(),
            SCHEMA
        );
        create_ref.assert_async().await;
        put.assert_async().await;
        create_pull.assert_async().await;
    }

    #[tokio::test]
    async fn test_up_to_date_branch_reuses_open_pull_request() {
        let (dir, pg_dump, manage) = workspace(None).await;
        let blob_sha = git::hash_object(dir.path(), SCHEMA.as_bytes()).await.unwrap();

        let mut server = Server::new_async().await;
        server
            .mock("GET", "/repos/acme/shop/git/ref/heads/update-db-schema")
            .with_status(200)
            .with_body(r#"{"ref": "refs/heads/update-db-schema", "object": {"sha": "headsha"}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/repos/acme/shop/contents/schema.sql")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(json!({"sha": blob_sha, "path": "schema.sql", "encoding": "none", "content": ""}).to_string())
            .create_async()
            .await;
        let put = server
            .mock("PUT", "/repos/acme/shop/contents/schema.sql")
            .expect(0)
            .create_async()
            .await;
        server
            .mock("GET", "/repos/acme/shop/pulls")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"[{"number": 3, "html_url": "https://github.com/acme/shop/pull/3", "state": "open", "title": "Update database schema"}]"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let mut settings = settings();
        settings.skip_migrate = true;
        let outcome = dump_schema(&client, &manage, &pg_dump, dir.path(), &settings)
            .await
            .unwrap();

        match outcome {
            DumpOutcome::Changed {
                pull_request,
                committed,
            } => {
                assert_eq!(pull_request.number, 3);
                assert!(!committed);
            }
            DumpOutcome::Unchanged => panic!("untracked schema counts as changed"),
        }
        put.assert_async().await;
    }

    #[test]
    fn test_report_outcome_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = ActionsRuntime {
            output_path: Some(dir.path().join("output")),
            summary_path: None,
        };
        let outcome = DumpOutcome::Changed {
            pull_request: PullRequest {
                number: 12,
                html_url: "https://github.com/acme/shop/pull/12".to_string(),
                state: "open".to_string(),
                title: "Update database schema".to_string(),
            },
            committed: true,
        };
        report_outcome(&runtime, &outcome).unwrap();
        let output = fs::read_to_string(dir.path().join("output")).unwrap();
        assert!(output.contains("changed=true\n"));
        assert!(output.contains("pull-request-number=12\n"));
    }
}
