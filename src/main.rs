use std::env;

use anyhow::Context;
use clap::Parser;
use django_runner::git;
use django_runner::pg_dump::PgDump;
use github_handler::actions::{self, ActionsRuntime};
use github_handler::config::GithubConfig;
use github_handler::services::github_api::GitHubApiClient;
use tracing::{error, info};

mod cli;
mod migration_check;
mod report;
mod schema_dump;

use crate::cli::{non_empty, CheckMigrationsArgs, Cli, Commands, DumpSchemaArgs};
use crate::migration_check::CheckSettings;
use crate::schema_dump::DumpSettings;

// 初始化日志
fn init_logger() {
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .init();
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_logger();

    let cli = Cli::parse();
    let runtime = ActionsRuntime::from_env();

    if let Err(e) = run(&cli, &runtime).await {
        error!("{:#}", e);
        actions::error_annotation(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: &Cli, runtime: &ActionsRuntime) -> anyhow::Result<()> {
    let config = GithubConfig::from_env()?;
    let client = GitHubApiClient::new(&config)?;

    match &cli.command {
        Commands::DumpSchema(args) => dump_schema(cli, args, &client, runtime).await,
        Commands::CheckMigrations(args) => {
            check_migrations(cli, args, &config, &client, runtime).await
        }
    }
}

async fn dump_schema(
    cli: &Cli,
    args: &DumpSchemaArgs,
    client: &GitHubApiClient,
    runtime: &ActionsRuntime,
) -> anyhow::Result<()> {
    let database_url = non_empty(args.database_url.clone())
        .or_else(|| non_empty(env::var("DATABASE_URL").ok()))
        .context("缺少数据库连接, 请设置 database_url 输入或 DATABASE_URL")?;

    let mut pg_dump = PgDump::new(&database_url);
    pg_dump.program = args.pg_dump.clone();
    pg_dump.extra_args = args
        .pg_dump_args
        .split_whitespace()
        .map(str::to_string)
        .collect();

    let repo_dir = git::toplevel(&cli.working_directory).await?;
    info!("仓库根目录: {}", repo_dir.display());

    let settings = DumpSettings {
        schema_path: args.schema_path.clone(),
        branch: args.branch.clone(),
        base_branch: non_empty(args.base_branch.clone()),
        commit_message: args.commit_message.clone(),
        pr_title: args.pr_title.clone(),
        pr_body: args.pr_body.clone(),
        skip_migrate: args.skip_migrate,
    };
    let outcome =
        schema_dump::dump_schema(client, &cli.manage(), &pg_dump, &repo_dir, &settings).await?;
    schema_dump::report_outcome(runtime, &outcome)
}

async fn check_migrations(
    cli: &Cli,
    args: &CheckMigrationsArgs,
    config: &GithubConfig,
    client: &GitHubApiClient,
    runtime: &ActionsRuntime,
) -> anyhow::Result<()> {
    let head_sha = config.resolve_head_sha(&cli.working_directory).await?;
    let settings = CheckSettings {
        check_name: args.check_name.clone(),
        analyze_locks: args.analyze_locks,
        fail_on_unapplied: args.fail_on_unapplied,
        concurrency: args.concurrency,
    };
    let outcome = migration_check::run_check(client, &cli.manage(), &head_sha, &settings).await?;
    info!(
        "{}: {} ({})",
        config.repository(),
        outcome.result.title,
        outcome.result.conclusion
    );
    migration_check::report_outcome(runtime, &settings.check_name, &outcome)
}
