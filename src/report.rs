//! check run 的标题, 摘要和 markdown 正文

use model::check_run::{CheckRunResult, Conclusion};
use model::migration::{MakemigrationsReport, MigrationDetail};

#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    pub makemigrations: MakemigrationsReport,
    pub details: Vec<MigrationDetail>,
}

impl CheckReport {
    pub fn conclusion(&self, fail_on_unapplied: bool) -> Conclusion {
        let unapplied_fails = fail_on_unapplied && !self.details.is_empty();
        if self.makemigrations.has_changes() || unapplied_fails {
            Conclusion::Failure
        } else {
            Conclusion::Success
        }
    }
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{} {}", count, noun)
    } else {
        format!("{} {}s", count, noun)
    }
}

pub fn title(report: &CheckReport) -> String {
    if report.makemigrations.has_changes() {
        "Missing migrations".to_string()
    } else if !report.details.is_empty() {
        plural(report.details.len(), "unapplied migration")
    } else {
        "Migrations up to date".to_string()
    }
}

pub fn summary(report: &CheckReport) -> String {
    let mut parts = Vec::new();
    if report.makemigrations.has_changes() {
        let apps: Vec<&str> = report
            .makemigrations
            .apps
            .iter()
            .map(|app| app.app_label.as_str())
            .collect();
        parts.push(format!(
            "Model changes without migrations in {}: {}.",
            plural(apps.len(), "app"),
            apps.join(", ")
        ));
    }
    if !report.details.is_empty() {
        parts.push(format!(
            "{} not applied to the database.",
            plural(report.details.len(), "migration")
        ));
    }
    if parts.is_empty() {
        return "No missing or unapplied migrations.".to_string();
    }
    parts.join(" ")
}

pub fn render_text(report: &CheckReport) -> String {
    let mut out = String::new();

    if report.makemigrations.has_changes() {
        out.push_str("## Missing migrations\n\n");
        out.push_str("`makemigrations --dry-run` would create:\n\n");
        for app in &report.makemigrations.apps {
            for file in &app.files {
                out.push_str(&format!("- **{}**: `{}`\n", app.app_label, file.path));
                for operation in &file.operations {
                    out.push_str(&format!("  - {}\n", operation));
                }
            }
        }
        out.push_str("\n<details><summary>makemigrations output</summary>\n\n```\n");
        out.push_str(&report.makemigrations.raw_output);
        out.push_str("\n```\n\n</details>\n\n");
    }

    if !report.details.is_empty() {
        out.push_str("## Unapplied migrations\n\n");
        for detail in &report.details {
            out.push_str(&format!("### `{}`\n\n", detail.migration));
            out.push_str("```sql\n");
            out.push_str(detail.sql.trim_end());
            out.push_str("\n```\n\n");
            if let Some(analysis) = &detail.lock_analysis {
                out.push_str("#### Lock analysis\n\n");
                out.push_str(analysis.trim_end());
                out.push_str("\n\n");
            }
        }
    }

    out.trim_end().to_string()
}

pub fn build_result(report: &CheckReport, fail_on_unapplied: bool) -> CheckRunResult {
    CheckRunResult::new(
        report.conclusion(fail_on_unapplied),
        &title(report),
        &summary(report),
        render_text(report),
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use django_runner::parser::parse_makemigrations;
    use model::migration::MigrationRef;

    fn detail(app: &str, name: &str, lock_analysis: Option<&str>) -> MigrationDetail {
        MigrationDetail {
            migration: MigrationRef::new(app, name),
            sql: "BEGIN;\nALTER TABLE \"t\" ADD COLUMN \"c\" int NULL;\nCOMMIT;\n".to_string(),
            lock_analysis: lock_analysis.map(str::to_string),
        }
    }

    #[test]
    fn test_clean_report() {
        let report = CheckReport::default();
        let result = build_result(&report, true);
        assert_eq!(result.conclusion, Conclusion::Success);
        assert_eq!(result.title, "Migrations up to date");
        assert_eq!(result.summary, "No missing or unapplied migrations.");
        assert!(result.text.is_empty());
    }

    #[test]
    fn test_unapplied_only() {
        let report = CheckReport {
            makemigrations: MakemigrationsReport::default(),
            details: vec![detail("orders", "0002_status", Some("No locking statements."))],
        };
        let result = build_result(&report, false);
        assert_eq!(result.conclusion, Conclusion::Success);
        assert_eq!(result.title, "1 unapplied migration");
        assert_eq!(result.summary, "1 migration not applied to the database.");
        assert!(result.text.contains("### `orders.0002_status`"));
        assert!(result.text.contains("```sql\nBEGIN;"));
        assert!(result.text.contains("#### Lock analysis\n\nNo locking statements."));

        assert_eq!(build_result(&report, true).conclusion, Conclusion::Failure);
    }

    #[test]
    fn test_missing_migrations_fail() {
        let report = CheckReport {
            makemigrations: parse_makemigrations(
                "Migrations for 'orders':\n  orders/migrations/0003_note.py\n    - Add field note to order\n",
            ),
            details: vec![detail("orders", "0002_status", None), detail("billing", "0001_initial", None)],
        };
        let result = build_result(&report, false);
        assert_eq!(result.conclusion, Conclusion::Failure);
        assert_eq!(result.title, "Missing migrations");
        assert_eq!(
            result.summary,
            "Model changes without migrations in 1 app: orders. 2 migrations not applied to the database."
        );
        assert!(result
            .text
            .starts_with("## Missing migrations\n\n`makemigrations --dry-run` would create:\n\n- **orders**: `orders/migrations/0003_note.py`\n  - Add field note to order\n"));
        assert!(!result.text.contains("Lock analysis"));
    }
}
