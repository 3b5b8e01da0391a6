use std::path::PathBuf;

use anyhow::Context;
use model::migration::MigrationRef;
use tracing::info;

use crate::command::{run_checked, CommandOutput, CommandSpec};

// manage.py 调用方式
#[derive(Debug, Clone)]
pub struct ManagePy {
    pub python: String,
    pub manage_py: String,
    pub working_dir: Option<PathBuf>,
    pub settings_module: Option<String>,
}

impl Default for ManagePy {
    fn default() -> Self {
        Self {
            python: "python".to_string(),
            manage_py: "manage.py".to_string(),
            working_dir: None,
            settings_module: None,
        }
    }
}

impl ManagePy {
    pub fn spec<I, S>(&self, command: &str, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut spec = CommandSpec::new(&self.python)
            .arg(self.manage_py.as_str())
            .arg(command)
            .args(args)
            .arg("--no-color");
        if let Some(dir) = &self.working_dir {
            spec = spec.current_dir(dir);
        }
        if let Some(settings) = &self.settings_module {
            spec = spec.env("DJANGO_SETTINGS_MODULE", settings);
        }
        spec
    }

    async fn call(&self, command: &str, args: &[&str]) -> anyhow::Result<CommandOutput> {
        let spec = self.spec(command, args.iter().copied());
        run_checked(&spec)
            .await
            .with_context(|| format!("manage.py {} 执行失败", command))
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        info!("应用数据库迁移");
        let output = self.call("migrate", &["--noinput"]).await?;
        for line in output.lines().filter(|l| l.trim_start().starts_with("Applying")) {
            info!("{}", line.trim());
        }
        Ok(())
    }

    pub async fn makemigrations_dry_run(&self) -> anyhow::Result<String> {
        let output = self
            .call("makemigrations", &["--dry-run", "--noinput"])
            .await?;
        Ok(output.stdout)
    }

    pub async fn showmigrations_plan(&self) -> anyhow::Result<String> {
        let output = self.call("showmigrations", &["--plan"]).await?;
        Ok(output.stdout)
    }

    pub async fn sqlmigrate(&self, migration: &MigrationRef) -> anyhow::Result<String> {
        let output = self
            .call(
                "sqlmigrate",
                &[migration.app_label.as_str(), migration.name.as_str()],
            )
            .await
            .with_context(|| format!("无法获取 {} 的 SQL", migration))?;
        Ok(output.stdout)
    }
}
