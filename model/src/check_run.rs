use serde::{Deserialize, Serialize};
use std::fmt;

// GitHub 对 check run output.text 的长度上限
pub const MAX_OUTPUT_TEXT: usize = 65535;

const TRUNCATED_NOTICE: &str = "\n\n_Output truncated, see the job log for the full report._";

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum Conclusion {
    Success,
    Failure,
}

impl Conclusion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Conclusion::Success => "success",
            Conclusion::Failure => "failure",
        }
    }
}

impl fmt::Display for Conclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// 回写到 check run 的最终结果
#[derive(Debug, Serialize, Clone)]
pub struct CheckRunResult {
    pub conclusion: Conclusion,
    pub title: String,
    pub summary: String,
    pub text: String,
}

impl CheckRunResult {
    pub fn new(conclusion: Conclusion, title: &str, summary: &str, text: String) -> Self {
        Self {
            conclusion,
            title: title.to_string(),
            summary: summary.to_string(),
            text: truncate_text(text, MAX_OUTPUT_TEXT),
        }
    }

    /// 流程中途出错时使用: summary 即错误信息
    pub fn from_error(error: &str) -> Self {
        // summary 与 text 有同样的长度上限
        let summary = truncate_text(error.to_string(), MAX_OUTPUT_TEXT);
        Self::new(
            Conclusion::Failure,
            "Migration check errored",
            &summary,
            String::new(),
        )
    }
}

/// 按字符边界截断, 截断后追加提示, 总长度不超过 limit
pub fn truncate_text(text: String, limit: usize) -> String {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit.saturating_sub(TRUNCATED_NOTICE.len());
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = text[..end].to_string();
    truncated.push_str(TRUNCATED_NOTICE);
    truncated
}
