use std::path::PathBuf;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args, Parser, Subcommand};
use django_runner::manage::ManagePy;

// 参数与 action 的 inputs 一一对应, 运行时从 INPUT_<NAME> 读取
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Django 项目目录 (manage.py 所在目录)
    #[arg(long, global = true, env = "INPUT_WORKING_DIRECTORY", default_value = ".")]
    pub working_directory: PathBuf,

    /// Python 解释器
    #[arg(long, global = true, env = "INPUT_PYTHON", default_value = "python")]
    pub python: String,

    /// manage.py 路径, 相对于 working_directory
    #[arg(long, global = true, env = "INPUT_MANAGE_PY", default_value = "manage.py")]
    pub manage_py: String,

    #[arg(long, global = true, env = "INPUT_DJANGO_SETTINGS_MODULE")]
    pub settings_module: Option<String>,
}

impl Cli {
    pub fn manage(&self) -> ManagePy {
        ManagePy {
            python: self.python.clone(),
            manage_py: self.manage_py.clone(),
            working_dir: Some(self.working_directory.clone()),
            settings_module: non_empty(self.settings_module.clone()),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 应用迁移, 导出 schema, 有变化时提交并开 PR
    DumpSchema(DumpSchemaArgs),
    /// 检查缺失和未应用的迁移, 结果发布为 check run
    CheckMigrations(CheckMigrationsArgs),
}

#[derive(Args, Debug, Clone)]
pub struct DumpSchemaArgs {
    /// schema 文件路径, 相对于仓库根目录
    #[arg(long, env = "INPUT_SCHEMA_PATH", default_value = "schema.sql")]
    pub schema_path: String,

    /// 未设置时使用 DATABASE_URL
    #[arg(long, env = "INPUT_DATABASE_URL")]
    pub database_url: Option<String>,

    #[arg(long, env = "INPUT_PG_DUMP", default_value = "pg_dump")]
    pub pg_dump: String,

    /// 追加给 pg_dump 的参数, 空白分隔
    #[arg(long, env = "INPUT_PG_DUMP_ARGS", default_value = "")]
    pub pg_dump_args: String,

    #[arg(long, env = "INPUT_BRANCH", default_value = "update-db-schema")]
    pub branch: String,

    /// 未设置时使用仓库默认分支
    #[arg(long, env = "INPUT_BASE_BRANCH")]
    pub base_branch: Option<String>,

    #[arg(long, env = "INPUT_COMMIT_MESSAGE", default_value = "Update database schema")]
    pub commit_message: String,

    #[arg(long, env = "INPUT_PR_TITLE", default_value = "Update database schema")]
    pub pr_title: String,

    #[arg(
        long,
        env = "INPUT_PR_BODY",
        default_value = "The database schema dump changed after applying migrations."
    )]
    pub pr_body: String,

    #[arg(
        long,
        env = "INPUT_SKIP_MIGRATE",
        default_value = "false",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub skip_migrate: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CheckMigrationsArgs {
    #[arg(long, env = "INPUT_CHECK_NAME", default_value = "Django migrations")]
    pub check_name: String,

    /// 为每个未应用迁移附加锁分析
    #[arg(
        long,
        env = "INPUT_ANALYZE_LOCKS",
        default_value = "false",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub analyze_locks: bool,

    /// 存在未应用迁移时 check run 失败
    #[arg(
        long,
        env = "INPUT_FAIL_ON_UNAPPLIED",
        default_value = "false",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub fail_on_unapplied: bool,

    /// 并发执行 sqlmigrate 的数量
    #[arg(long, env = "INPUT_CONCURRENCY", default_value_t = 4)]
    pub concurrency: usize,
}

/// GitHub 对未填写的 input 传空字符串
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
