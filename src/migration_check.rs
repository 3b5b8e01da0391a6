use django_runner::lock_analysis;
use django_runner::manage::ManagePy;
use django_runner::parser::{parse_makemigrations, parse_plan, unapplied};
use futures::stream::{self, StreamExt, TryStreamExt};
use github_handler::actions::ActionsRuntime;
use github_handler::services::github_api::GitHubApiClient;
use model::check_run::CheckRunResult;
use model::migration::{MigrationDetail, MigrationRef};
use tracing::{error, info};

use crate::report::{self, CheckReport};

#[derive(Debug, Clone)]
pub struct CheckSettings {
    pub check_name: String,
    pub analyze_locks: bool,
    pub fail_on_unapplied: bool,
    pub concurrency: usize,
}

/// 运行 makemigrations 和 showmigrations, 再为每个未应用迁移取 SQL
pub async fn collect(
    manage: &ManagePy,
    analyze_locks: bool,
    concurrency: usize,
) -> anyhow::Result<CheckReport> {
    let (makemigrations, plan) =
        tokio::try_join!(manage.makemigrations_dry_run(), manage.showmigrations_plan())?;

    let makemigrations = parse_makemigrations(&makemigrations);
    let pending = unapplied(&parse_plan(&plan));
    info!(
        "{} 个 app 缺少迁移, {} 个迁移未应用",
        makemigrations.apps.len(),
        pending.len()
    );

    // buffered 保持 plan 顺序
    let details: Vec<MigrationDetail> = stream::iter(pending)
        .map(|migration| detail(manage, migration, analyze_locks))
        .buffered(concurrency.max(1))
        .try_collect()
        .await?;

    Ok(CheckReport {
        makemigrations,
        details,
    })
}

async fn detail(
    manage: &ManagePy,
    migration: MigrationRef,
    analyze_locks: bool,
) -> anyhow::Result<MigrationDetail> {
    let sql = manage.sqlmigrate(&migration).await?;
    let lock_analysis = analyze_locks.then(|| {
        let locks = lock_analysis::analyze(&sql);
        lock_analysis::render_markdown(&locks)
    });
    Ok(MigrationDetail {
        migration,
        sql,
        lock_analysis,
    })
}

#[derive(Debug)]
pub struct CheckOutcome {
    pub report: CheckReport,
    pub result: CheckRunResult,
}

/// 创建 check run, 收集结果后完成它; 之后任何一步失败, check run 都以 failure 结束并返回错误
pub async fn run_check(
    client: &GitHubApiClient,
    manage: &ManagePy,
    head_sha: &str,
    settings: &CheckSettings,
) -> anyhow::Result<CheckOutcome> {
    let check_run = client.create_check_run(&settings.check_name, head_sha).await?;

    let outcome = async {
        let report = collect(manage, settings.analyze_locks, settings.concurrency).await?;
        let result = report::build_result(&report, settings.fail_on_unapplied);
        client.complete_check_run(check_run.id, &result).await?;
        Ok::<_, anyhow::Error>(CheckOutcome { report, result })
    }
    .await;

    match outcome {
        Ok(outcome) => {
            if let Some(url) = &check_run.html_url {
                info!("check run: {}", url);
            }
            Ok(outcome)
        }
        Err(e) => {
            error!("迁移检查失败: {:#}", e);
            let result = CheckRunResult::from_error(&format!("{:#}", e));
            if let Err(complete_err) = client.complete_check_run(check_run.id, &result).await {
                error!("无法完成 check run {}: {:#}", check_run.id, complete_err);
            }
            Err(e)
        }
    }
}

pub fn report_outcome(
    runtime: &ActionsRuntime,
    check_name: &str,
    outcome: &CheckOutcome,
) -> anyhow::Result<()> {
    let result = &outcome.result;
    runtime.set_output(
        "missing",
        &outcome.report.makemigrations.file_count().to_string(),
    )?;
    runtime.set_output("unapplied", &outcome.report.details.len().to_string())?;
    runtime.set_output("conclusion", result.conclusion.as_str())?;
    let mut summary = format!("# {}\n\n{}\n", check_name, result.summary);
    if !result.text.is_empty() {
        summary.push('\n');
        summary.push_str(&result.text);
        summary.push('\n');
    }
    runtime.append_step_summary(&summary)
}

#[cfg(test)]
mod test {
    use super::*;
    use github_handler::config::GithubConfig;
    use mockito::{Matcher, Server};
    use model::check_run::Conclusion;
    use serde_json::json;
    use std::fs;
    use std::path::PathBuf;
    use url::Url;

    const FAKE_MANAGE: &str = r#"
case "$1" in
  showmigrations) printf '[X]  orders.0001_initial\n[ ]  orders.0002_status\n[ ]  billing.0001_initial\n' ;;
  makemigrations) echo "No changes detected" ;;
  sqlmigrate)
    if [ "$2" = "orders" ]; then
      printf 'BEGIN;\nALTER TABLE "orders_order" ADD COLUMN "status" varchar(16) DEFAULT %s NOT NULL;\nCOMMIT;\n' "'new'"
    else
      printf 'BEGIN;\nCREATE TABLE "billing_invoice" ("id" bigint NOT NULL PRIMARY KEY);\nCOMMIT;\n'
    fi ;;
esac
"#;

    fn manage_with(script: &str) -> (tempfile::TempDir, ManagePy) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("manage.py"), script).unwrap();
        let manage = ManagePy {
            python: "sh".to_string(),
            manage_py: "manage.py".to_string(),
            working_dir: Some(PathBuf::from(dir.path())),
            settings_module: None,
        };
        (dir, manage)
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

    fn settings() -> CheckSettings {
        CheckSettings {
            check_name: "Django migrations".to_string(),
            analyze_locks: true,
            fail_on_unapplied: false,
            concurrency: 4,
        }
    }

    #[tokio::test]
    async fn test_collect_keeps_plan_order() {
        let (_dir, manage) = manage_with(FAKE_MANAGE);
        let report = collect(&manage, true, 2).await.unwrap();

        assert!(!report.makemigrations.has_changes());
        let names: Vec<String> = report.details.iter().map(|d| d.migration.to_string()).collect();
        assert_eq!(names, vec!["orders.0002_status", "billing.0001_initial"]);
        assert!(report.details[0].sql.contains("ADD COLUMN \"status\""));
        let analysis = report.details[0].lock_analysis.as_deref().unwrap();
        assert!(analysis.contains("ACCESS EXCLUSIVE"));
    }

    #[tokio::test]
    async fn test_collect_without_lock_analysis() {
        let (_dir, manage) = manage_with(FAKE_MANAGE);
        let report = collect(&manage, false, 0).await.unwrap();
        assert_eq!(report.details.len(), 2);
        assert!(report.details.iter().all(|d| d.lock_analysis.is_none()));
    }

    #[tokio::test]
    async fn test_run_check_completes_check_run() {
        let (_dir, manage) = manage_with(FAKE_MANAGE);
        let mut server = Server::new_async().await;
        let create = server
            .mock("POST", "/repos/acme/shop/check-runs")
            .match_body(Matcher::PartialJson(json!({
                "name": "Django migrations",
                "head_sha": "headsha",
                "status": "in_progress"
            })))
            .with_status(201)
            .with_body(r#"{"id": 42, "html_url": "https://github.com/acme/shop/runs/42", "status": "in_progress"}"#)
            .create_async()
            .await;
        let complete = server
            .mock("PATCH", "/repos/acme/shop/check-runs/42")
            .match_body(Matcher::PartialJson(json!({
                "status": "completed",
                "conclusion": "success",
                "output": {"title": "2 unapplied migrations"}
            })))
            .with_status(200)
            .with_body(r#"{"id": 42, "status": "completed"}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let outcome = run_check(&client, &manage, "headsha", &settings())
            .await
            .unwrap();
        assert_eq!(outcome.result.conclusion, Conclusion::Success);
        assert_eq!(outcome.report.details.len(), 2);
        create.assert_async().await;
        complete.assert_async().await;
    }

    #[tokio::test]
    async fn test_run_check_reports_errors_on_check_run() {
        let (_dir, manage) = manage_with("echo 'django.core.exceptions.ImproperlyConfigured' >&2\nexit 1\n");
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/repos/acme/shop/check-runs")
            .with_status(201)
            .with_body(r#"{"id": 7}"#)
            .create_async()
            .await;
        let complete = server
            .mock("PATCH", "/repos/acme/shop/check-runs/7")
            .match_body(Matcher::PartialJson(json!({
                "conclusion": "failure",
                "output": {"title": "Migration check errored"}
            })))
            .with_status(200)
            .with_body(r#"{"id": 7, "status": "completed"}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let err = run_check(&client, &manage, "headsha", &settings())
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("ImproperlyConfigured"));
        complete.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_completion_marks_check_run_failed() {
        let (_dir, manage) = manage_with(FAKE_MANAGE);
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/repos/acme/shop/check-runs")
            .with_status(201)
            .with_body(r#"{"id": 9}"#)
            .create_async()
            .await;
        let rejected = server
            .mock("PATCH", "/repos/acme/shop/check-runs/9")
            .match_body(Matcher::PartialJson(json!({"conclusion": "success"})))
            .with_status(422)
            .with_body(r#"{"message": "Validation Failed"}"#)
            .create_async()
            .await;
        let failed = server
            .mock("PATCH", "/repos/acme/shop/check-runs/9")
            .match_body(Matcher::PartialJson(json!({
                "conclusion": "failure",
                "output": {"title": "Migration check errored"}
            })))
            .with_status(200)
            .with_body(r#"{"id": 9, "status": "completed"}"#)
            .expect(1)
            .create_async()
            .await;

        let client = client_for(&server);
        let err = run_check(&client, &manage, "headsha", &settings())
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("422"));
        rejected.assert_async().await;
        failed.assert_async().await;
    }

    #[test]
    fn test_report_outcome_writes_summary() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = ActionsRuntime {
            output_path: Some(dir.path().join("output")),
            summary_path: Some(dir.path().join("summary.md")),
        };
        let outcome = CheckOutcome {
            report: CheckReport::default(),
            result: CheckRunResult::new(
                Conclusion::Failure,
                "Missing migrations",
                "Model changes without migrations in 1 app: orders.",
                "## Missing migrations".to_string(),
            ),
        };
        report_outcome(&runtime, "Django migrations", &outcome).unwrap();

        let output = fs::read_to_string(dir.path().join("output")).unwrap();
        assert_eq!(output, "missing=0\nunapplied=0\nconclusion=failure\n");
        let summary = fs::read_to_string(dir.path().join("summary.md")).unwrap();
        assert_eq!(
            summary,
            "# Django migrations\n\nModel changes without migrations in 1 app: orders.\n\n## Missing migrations\n"
        );
    }
}
