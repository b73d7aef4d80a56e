//! 消息内容清洗
//!
//! 顺序固定：先对非 URL 片段做脏词过滤，再对整段文本做 HTML 转义。

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// 内置脏词表
const PROFANITY_WORDS: &[&str] = &[
    "arse", "asshole", "bastard", "bitch", "bollocks", "crap", "cunt", "damn", "dick",
    "fuck", "motherfucker", "piss", "prick", "shit", "slut", "twat", "wanker", "whore",
];

static PROFANITY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    let words = PROFANITY_WORDS.join("|");
    Regex::new(&format!(r"(?i)\b(?:{words})(?:s|es|ed|er|ers|ing)?\b"))
        .expect("profanity pattern")
});

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(?:https?://|www\.)[^\s<>"']+"#).expect("url pattern")
});

/// 是否包含脏词
pub fn contains_profanity(text: &str) -> bool {
    PROFANITY_PATTERN.is_match(text)
}

/// 过滤脏词，URL 片段原样保留
pub fn filter_profanity(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut cursor = 0;

    for url in URL_PATTERN.find_iter(text) {
        output.push_str(&mask_segment(&text[cursor..url.start()]));
        output.push_str(url.as_str());
        cursor = url.end();
    }
    output.push_str(&mask_segment(&text[cursor..]));
    output
}

fn mask_segment(segment: &str) -> String {
    PROFANITY_PATTERN
        .replace_all(segment, |caps: &regex::Captures<'_>| {
            "*".repeat(caps[0].chars().count())
        })
        .into_owned()
}

/// 转义 `& < > " '` 五个 HTML 特殊字符
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#039;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// 已清洗的消息内容。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageContent(String);

impl MessageContent {
    /// 校验长度后依次执行脏词过滤和 HTML 转义。
    /// 长度按原始输入的字符数计算，转义带来的膨胀不计入。
    pub fn sanitize(raw: &str, max_length: usize) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_argument("content", "cannot be empty"));
        }
        let length = trimmed.chars().count();
        if length > max_length {
            return Err(DomainError::invalid_argument(
                "content",
                format!("too long ({length} > {max_length} characters)"),
            ));
        }

        Ok(Self(escape_html(&filter_profanity(trimmed))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}
