//! sqlmigrate 输出的锁分析
//!
//! 按语句类型推断 PostgreSQL 获取的表级锁, 并标记常见的高风险写法
//! (整表重写, 全表扫描, 持锁建索引等)。只做文本层面的判断,
//! 不连接数据库。

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockLevel {
    /// 新建对象, 不与现有读写冲突
    None,
    RowExclusive,
    ShareUpdateExclusive,
    Share,
    ShareRowExclusive,
    AccessExclusive,
    Unknown,
}

impl LockLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockLevel::None => "none",
            LockLevel::RowExclusive => "ROW EXCLUSIVE",
            LockLevel::ShareUpdateExclusive => "SHARE UPDATE EXCLUSIVE",
            LockLevel::Share => "SHARE",
            LockLevel::ShareRowExclusive => "SHARE ROW EXCLUSIVE",
            LockLevel::AccessExclusive => "ACCESS EXCLUSIVE",
            LockLevel::Unknown => "unknown",
        }
    }

    /// 对线上读写的影响
    pub fn impact(&self) -> &'static str {
        match self {
            LockLevel::None => "no conflict with existing tables",
            LockLevel::RowExclusive => "normal row writes",
            LockLevel::ShareUpdateExclusive => "reads and writes continue",
            LockLevel::Share | LockLevel::ShareRowExclusive => "blocks writes",
            LockLevel::AccessExclusive => "blocks reads and writes",
            LockLevel::Unknown => "not classified",
        }
    }
}

impl fmt::Display for LockLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementLock {
    pub statement: String,
    pub lock: LockLevel,
    pub tables: Vec<String>,
    pub notes: Vec<String>,
}

// 普通或带引号的标识符, 允许 schema 前缀
const IDENT: &str = r#"((?:"[^"]+"|[\w$]+)(?:\.(?:"[^"]+"|[\w$]+))?)"#;

static CREATE_INDEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)^CREATE\s+(?:UNIQUE\s+)?INDEX\s+(CONCURRENTLY\s+)?.*?\bON\s+(?:ONLY\s+)?{}",
        IDENT
    ))
    .unwrap()
});
static DROP_INDEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^DROP\s+INDEX\s+(CONCURRENTLY\s+)?").unwrap());
static ALTER_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)^ALTER\s+TABLE\s+(?:IF\s+EXISTS\s+)?(?:ONLY\s+)?{}",
        IDENT
    ))
    .unwrap()
});
static REFERENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?i)\bREFERENCES\s+{}", IDENT)).unwrap());
static FOREIGN_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bFOREIGN\s+KEY\b").unwrap());
static NOT_VALID: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bNOT\s+VALID\b").unwrap());
static VALIDATE_CONSTRAINT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bVALIDATE\s+CONSTRAINT\b").unwrap());
static ALTER_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bALTER\s+(?:COLUMN\s+)?\S+\s+(?:SET\s+DATA\s+)?TYPE\b").unwrap());
static SET_NOT_NULL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bSET\s+NOT\s+NULL\b").unwrap());
static ADD_COLUMN_CALL_DEFAULT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bADD\s+COLUMN\b.*\bDEFAULT\s+([A-Za-z_][\w.]*)\s*\(").unwrap()
});

// PG11+ 对 stable/immutable 默认值只记录元数据, 不重写表
const NON_VOLATILE_DEFAULTS: [&str; 8] = [
    "now",
    "statement_timestamp",
    "transaction_timestamp",
    "current_timestamp",
    "localtimestamp",
    "current_date",
    "lower",
    "upper",
];
static ADD_UNIQUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bADD\s+CONSTRAINT\s+\S+\s+UNIQUE\b").unwrap());
static TABLE_TARGET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)^(?:DROP\s+TABLE|TRUNCATE(?:\s+TABLE)?|CLUSTER|VACUUM\s+FULL|LOCK\s+TABLE)\s+(?:IF\s+EXISTS\s+)?(?:ONLY\s+)?{}",
        IDENT
    ))
    .unwrap()
});
static DML: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)^(?:INSERT\s+INTO|UPDATE|DELETE\s+FROM)\s+(?:ONLY\s+)?{}",
        IDENT
    ))
    .unwrap()
});
static CREATE_TRIGGER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)^CREATE\s+(?:OR\s+REPLACE\s+)?(?:CONSTRAINT\s+)?TRIGGER\s+.*?\bON\s+{}",
        IDENT
    ))
    .unwrap()
});
static CREATE_OTHER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^CREATE\s+").unwrap());

fn unquote(ident: &str) -> String {
    ident.replace('"', "")
}

fn collapse_whitespace(statement: &str) -> String {
    statement.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_transaction_control(statement: &str) -> bool {
    let upper = statement.trim_end_matches(';').trim().to_ascii_uppercase();
    matches!(
        upper.as_str(),
        "BEGIN" | "COMMIT" | "START TRANSACTION" | "END"
    )
}

/// 按 `;` 切分语句, 忽略引号, 美元引用和注释中的分号
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut rest = sql;

    while let Some(c) = rest.chars().next() {
        if rest.starts_with("--") {
            // 行注释直接丢弃
            rest = rest.find('\n').map(|i| &rest[i..]).unwrap_or("");
            continue;
        }
        if rest.starts_with("/*") {
            rest = rest.find("*/").map(|i| &rest[i + 2..]).unwrap_or("");
            current.push(' ');
            continue;
        }
        let starts_escape_string = (c == 'E' || c == 'e')
            && rest[1..].starts_with('\'')
            && !current.ends_with(|p: char| p.is_alphanumeric() || p == '_');
        if starts_escape_string {
            let end = escape_string_len(rest);
            current.push_str(&rest[..end]);
            rest = &rest[end..];
            continue;
        }
        if c == '\'' || c == '"' {
            let end = rest[1..].find(c).map(|i| i + 2).unwrap_or(rest.len());
            current.push_str(&rest[..end]);
            rest = &rest[end..];
            continue;
        }
        if c == '$' {
            if let Some(tag_len) = dollar_tag_len(rest) {
                let tag = &rest[..tag_len];
                let end = rest[tag_len..]
                    .find(tag)
                    .map(|i| tag_len + i + tag_len)
                    .unwrap_or(rest.len());
                current.push_str(&rest[..end]);
                rest = &rest[end..];
                continue;
            }
        }
        if c == ';' {
            push_statement(&mut statements, &current);
            current.clear();
        } else {
            current.push(c);
        }
        rest = &rest[c.len_utf8()..];
    }
    push_statement(&mut statements, &current);
    statements
}

// E'...' 的长度, 反斜杠转义下一个字符, '' 表示单引号
fn escape_string_len(text: &str) -> usize {
    let bytes = text.as_bytes();
    let mut i = 2;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\'' if bytes.get(i + 1) == Some(&b'\'') => i += 2,
            b'\'' => return i + 1,
            _ => i += 1,
        }
    }
    text.len()
}

// "$$" 或 "$tag$" 的长度
fn dollar_tag_len(text: &str) -> Option<usize> {
    let body = &text[1..];
    let close = body.find('$')?;
    let tag = &body[..close];
    let valid = tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !tag.starts_with(|c: char| c.is_ascii_digit());
    valid.then_some(close + 2)
}

fn push_statement(statements: &mut Vec<String>, raw: &str) {
    let statement = raw.trim();
    if statement.is_empty() || is_transaction_control(statement) {
        return;
    }
    statements.push(statement.to_string());
}

/// 推断单条语句获取的锁
pub fn classify(statement: &str) -> StatementLock {
    let text = collapse_whitespace(statement);
    let mut tables = Vec::new();
    let mut notes = Vec::new();

    let lock = if let Some(caps) = CREATE_INDEX.captures(&text) {
        tables.push(unquote(&caps[2]));
        if caps.get(1).is_some() {
            LockLevel::ShareUpdateExclusive
        } else {
            notes.push("blocks writes while the index builds; consider CONCURRENTLY".to_string());
            LockLevel::Share
        }
    } else if let Some(caps) = DROP_INDEX.captures(&text) {
        if caps.get(1).is_some() {
            LockLevel::ShareUpdateExclusive
        } else {
            LockLevel::AccessExclusive
        }
    } else if let Some(caps) = ALTER_TABLE.captures(&text) {
        tables.push(unquote(&caps[1]));
        classify_alter_table(&text, &mut tables, &mut notes)
    } else if let Some(caps) = TABLE_TARGET.captures(&text) {
        tables.push(unquote(&caps[1]));
        LockLevel::AccessExclusive
    } else if let Some(caps) = DML.captures(&text) {
        tables.push(unquote(&caps[1]));
        let upper = text.to_ascii_uppercase();
        if upper.starts_with("UPDATE") && !upper.contains(" WHERE ") {
            notes.push("updates every row in a single transaction".to_string());
        }
        LockLevel::RowExclusive
    } else if let Some(caps) = CREATE_TRIGGER.captures(&text) {
        tables.push(unquote(&caps[1]));
        LockLevel::ShareRowExclusive
    } else if CREATE_OTHER.is_match(&text) {
        LockLevel::None
    } else {
        LockLevel::Unknown
    };

    StatementLock {
        statement: text,
        lock,
        tables,
        notes,
    }
}

fn classify_alter_table(text: &str, tables: &mut Vec<String>, notes: &mut Vec<String>) -> LockLevel {
    if FOREIGN_KEY.is_match(text) {
        if let Some(caps) = REFERENCES.captures(text) {
            tables.push(unquote(&caps[1]));
        }
        if !NOT_VALID.is_match(text) {
            notes.push(
                "validates existing rows while holding the lock; consider NOT VALID then VALIDATE"
                    .to_string(),
            );
        }
        // 只加外键时持有的锁较弱, 同一语句中还有其他子句则按最强锁处理
        if !ALTER_TYPE.is_match(text) && !SET_NOT_NULL.is_match(text) {
            return LockLevel::ShareRowExclusive;
        }
    }
    if VALIDATE_CONSTRAINT.is_match(text) {
        return LockLevel::ShareUpdateExclusive;
    }
    if ALTER_TYPE.is_match(text) {
        notes.push("changing a column type may rewrite the table".to_string());
    }
    if SET_NOT_NULL.is_match(text) {
        notes.push("SET NOT NULL scans the whole table".to_string());
    }
    if let Some(caps) = ADD_COLUMN_CALL_DEFAULT.captures(text) {
        let function = caps[1].rsplit('.').next().unwrap_or("").to_ascii_lowercase();
        if !NON_VOLATILE_DEFAULTS.contains(&function.as_str()) {
            notes.push(format!(
                "column default {}() may be volatile and rewrite the table",
                function
            ));
        }
    }
    if ADD_UNIQUE.is_match(text) {
        notes.push("builds a unique index while holding the lock".to_string());
    }
    LockLevel::AccessExclusive
}

pub fn analyze(sql: &str) -> Vec<StatementLock> {
    split_statements(sql).iter().map(|s| classify(s)).collect()
}

/// 分析结果中最强的锁
pub fn strongest(locks: &[StatementLock]) -> Option<LockLevel> {
    locks
        .iter()
        .map(|l| l.lock)
        .filter(|l| *l != LockLevel::Unknown)
        .max()
}

const STATEMENT_PREVIEW: usize = 80;

fn preview(statement: &str) -> String {
    let mut chars = statement.chars();
    let mut short: String = chars.by_ref().take(STATEMENT_PREVIEW).collect();
    if chars.next().is_some() {
        short.push('…');
    }
    escape_cell(&short)
}

// markdown 表格单元格转义
fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('`', "'")
}

pub fn render_markdown(locks: &[StatementLock]) -> String {
    if locks.is_empty() {
        return "No locking statements.".to_string();
    }
    let mut out = String::new();
    if let Some(level) = strongest(locks) {
        out.push_str(&format!(
            "Strongest lock: **{}** ({})\n\n",
            level,
            level.impact()
        ));
    }
    out.push_str("| Statement | Lock | Tables | Notes |\n");
    out.push_str("| --- | --- | --- | --- |\n");
    for lock in locks {
        out.push_str(&format!(
            "| `{}` | {} | {} | {} |\n",
            preview(&lock.statement),
            lock.lock,
            escape_cell(&lock.tables.join(", ")),
            escape_cell(&lock.notes.join("; "))
        ));
    }
    out
}
