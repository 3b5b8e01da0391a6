use model::migration::{
    MakemigrationsReport, MigrationRef, MissingMigrations, PendingMigrationFile, PlanEntry,
    TrackedFile,
};
use once_cell::sync::Lazy;
use regex::Regex;

// showmigrations --plan 的行格式: "[X]  app.0001_initial"
static PLAN_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[([X ])\]\s+([^.\s]+)\.(\S+)$").unwrap());

static MIGRATIONS_FOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Migrations for '([^']+)':$").unwrap());

// 新版 Django 在操作前加 + - ~ x 等标记, 旧版统一用 -
static OPERATION_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[-+~x]\s+").unwrap());

const NO_CHANGES: &str = "No changes detected";

/// 解析 showmigrations --plan 的输出, 不匹配的行直接忽略
pub fn parse_plan(stdout: &str) -> Vec<PlanEntry> {
    stdout
        .lines()
        .filter_map(|line| {
            let captures = PLAN_LINE.captures(line.trim_end())?;
            Some(PlanEntry {
                migration: MigrationRef::new(&captures[2], &captures[3]),
                applied: &captures[1] == "X",
            })
        })
        .collect()
}

pub fn unapplied(plan: &[PlanEntry]) -> Vec<MigrationRef> {
    plan.iter()
        .filter(|entry| !entry.applied)
        .map(|entry| entry.migration.clone())
        .collect()
}

/// 解析 makemigrations --dry-run 的输出
pub fn parse_makemigrations(stdout: &str) -> MakemigrationsReport {
    let mut report = MakemigrationsReport {
        apps: Vec::new(),
        raw_output: stdout.trim_end().to_string(),
    };
    if stdout.trim().is_empty() || stdout.lines().any(|l| l.trim() == NO_CHANGES) {
        return report;
    }

    for line in stdout.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(captures) = MIGRATIONS_FOR.captures(trimmed) {
            report.apps.push(MissingMigrations {
                app_label: captures[1].to_string(),
                files: Vec::new(),
            });
            continue;
        }
        let Some(app) = report.apps.last_mut() else {
            // 头部之前的杂项输出 (例如 warnings)
            continue;
        };
        if trimmed.ends_with(".py") && !OPERATION_MARKER.is_match(trimmed) {
            app.files.push(PendingMigrationFile {
                path: trimmed.to_string(),
                operations: Vec::new(),
            });
        } else if let Some(file) = app.files.last_mut() {
            let operation = OPERATION_MARKER.replace(trimmed, "");
            file.operations.push(operation.trim().to_string());
        }
    }

    report
}

/// 在 git ls-files -z --stage 的输出中查找指定路径
/// 记录格式: "<mode> <sha> <stage>\t<path>\0", -z 下路径不做引号转义
pub fn parse_ls_files_stage(stdout: &str, path: &str) -> Option<TrackedFile> {
    stdout.split('\0').find_map(|line| {
        let (meta, file_path) = line.split_once('\t')?;
        if file_path != path {
            return None;
        }
        let mut parts = meta.split_whitespace();
        let mode = parts.next()?;
        let blob_sha = parts.next()?;
        Some(TrackedFile {
            mode: mode.to_string(),
            blob_sha: blob_sha.to_string(),
            path: file_path.to_string(),
        })
    })
}
