//! 提示词相似度（Jaccard）
//!
//! 归一化：小写、去标点、合并空白；按词边界切分并保留词内下划线（`my_func` 仍是一个词）。
//! 含 CJK 字符的词再用 jieba 搜索模式细分，否则整句中文只会得到一个词。

use std::collections::HashSet;
use std::sync::OnceLock;

use jieba_rs::Jieba;
use regex::Regex;

static JIEBA: OnceLock<Jieba> = OnceLock::new();
static PUNCT_RE: OnceLock<Regex> = OnceLock::new();
static WORD_RE: OnceLock<Regex> = OnceLock::new();

fn jieba() -> &'static Jieba {
    JIEBA.get_or_init(Jieba::new)
}

fn punct_re() -> &'static Regex {
    PUNCT_RE.get_or_init(|| Regex::new(r"[^\w\s]").expect("static regex"))
}

fn word_re() -> &'static Regex {
    WORD_RE.get_or_init(|| Regex::new(r"\w+").expect("static regex"))
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}' |
        '\u{3400}'..='\u{4DBF}' |
        '\u{F900}'..='\u{FAFF}' |
        '\u{3040}'..='\u{309F}' |
        '\u{30A0}'..='\u{30FF}'
    )
}

/// 小写、去标点、合并空白
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped = punct_re().replace_all(&lowered, "");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 归一化后切词，返回词集合
pub fn tokenize(text: &str) -> HashSet<String> {
    let normalized = normalize(text);
    let mut tokens = HashSet::new();
    for m in word_re().find_iter(&normalized) {
        let word = m.as_str();
        if word.chars().any(is_cjk) {
            tokens.extend(
                jieba()
                    .cut_for_search(word, true)
                    .into_iter()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(String::from),
            );
        } else {
            tokens.insert(word.to_string());
        }
    }
    tokens
}

/// Jaccard 相似度 |A∩B| / |A∪B|；任一集合为空时为 0
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

/// 两个提示词的相似度，取值 [0, 1]，对称且确定
pub fn similarity(a: &str, b: &str) -> f64 {
    jaccard(&tokenize(a), &tokenize(b))
}
