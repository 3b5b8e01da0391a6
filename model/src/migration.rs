use serde::{Deserialize, Serialize};
use std::fmt;

// 迁移引用: app label + 迁移名, 来自 showmigrations --plan
#[derive(Debug, Deserialize, Serialize, Hash, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct MigrationRef {
    pub app_label: String,
    pub name: String,
}

impl MigrationRef {
    pub fn new(app_label: &str, name: &str) -> Self {
        Self {
            app_label: app_label.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for MigrationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app_label, self.name)
    }
}

// plan 中的一行
#[derive(Debug, Serialize, PartialEq, Eq, Clone)]
pub struct PlanEntry {
    pub migration: MigrationRef,
    pub applied: bool,
}

// 未应用迁移的详细信息: SQL 以及可选的锁分析
#[derive(Debug, Serialize, Clone)]
pub struct MigrationDetail {
    pub migration: MigrationRef,
    pub sql: String,
    pub lock_analysis: Option<String>,
}

/// `makemigrations --dry-run` 中某个 app 将要生成的迁移文件
#[derive(Debug, Serialize, PartialEq, Eq, Clone, Default)]
pub struct PendingMigrationFile {
    pub path: String,
    pub operations: Vec<String>,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone)]
pub struct MissingMigrations {
    pub app_label: String,
    pub files: Vec<PendingMigrationFile>,
}

/// `makemigrations --dry-run` 的解析结果, apps 为空表示模型与迁移一致
#[derive(Debug, Serialize, PartialEq, Eq, Clone, Default)]
pub struct MakemigrationsReport {
    pub apps: Vec<MissingMigrations>,
    pub raw_output: String,
}

impl MakemigrationsReport {
    pub fn has_changes(&self) -> bool {
        !self.apps.is_empty()
    }

    pub fn file_count(&self) -> usize {
        self.apps.iter().map(|app| app.files.len()).sum()
    }
}

// git ls-files --stage 中的一条记录
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TrackedFile {
    pub mode: String,
    pub blob_sha: String,
    pub path: String,
}
