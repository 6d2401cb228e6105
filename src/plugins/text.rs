//! 文本处理能力

use std::collections::HashMap;

use serde_json::json;

use super::{CapabilityArgs, CapabilityResult, Handler, Provider, RegistryBuilder, RegistryError};

pub const PROVIDER: Provider = Provider {
    name: "text",
    register,
};

const DEFAULT_KEYWORDS: usize = 5;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "can", "do", "for", "from", "have",
    "how", "i", "if", "in", "is", "it", "me", "my", "not", "of", "on", "or", "so", "that", "the",
    "this", "to", "was", "we", "what", "when", "with", "you", "your",
];

fn register(b: &mut RegistryBuilder) -> Result<(), RegistryError> {
    b.register("word_count", "Number of whitespace-separated words", Handler::Plain(word_count))?;
    b.register(
        "truncate",
        "Cut a string to at most n characters, appending '...' when cut",
        Handler::Plain(truncate),
    )?;
    b.register(
        "extract_keywords",
        "Most frequent non-stopword words, most frequent first",
        Handler::Plain(extract_keywords),
    )
}

fn word_count(args: &CapabilityArgs) -> CapabilityResult {
    Ok(json!(args.str(0, "text")?.split_whitespace().count()))
}

fn truncate(args: &CapabilityArgs) -> CapabilityResult {
    let text = args.str(0, "text")?;
    let limit = args.opt_usize(1, "n")?.unwrap_or(100);
    if text.chars().count() <= limit {
        return Ok(json!(text));
    }
    let cut: String = text.chars().take(limit).collect();
    Ok(json!(format!("{cut}...")))
}

fn extract_keywords(args: &CapabilityArgs) -> CapabilityResult {
    let text = args.str(0, "text")?;
    let n = args.opt_usize(1, "n")?.unwrap_or(DEFAULT_KEYWORDS);
    Ok(json!(keywords(text, n)))
}

pub(crate) fn keywords(text: &str, n: usize) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    let words = text
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .map(|w| w.trim_matches('\'').to_lowercase())
        .filter(|w| w.chars().count() > 2 && !STOPWORDS.contains(&w.as_str()));
    for (pos, word) in words.enumerate() {
        counts.entry(word).or_insert((0, pos)).0 += 1;
    }
    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    // 频次降序，首次出现位置升序
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked.into_iter().take(n).map(|(w, _)| w).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_count() {
        let args = CapabilityArgs::positional(vec![json!("  one two\nthree ")]);
        assert_eq!(word_count(&args).unwrap(), json!(3));
    }

    #[test]
    fn test_truncate_counts_chars() {
        let args = CapabilityArgs::positional(vec![json!("héllo world"), json!(5)]);
        assert_eq!(truncate(&args).unwrap(), json!("héllo..."));
        let args = CapabilityArgs::positional(vec![json!("short"), json!(10)]);
        assert_eq!(truncate(&args).unwrap(), json!("short"));
    }

    #[test]
    fn test_keywords_rank_by_frequency() {
        let got = keywords("Rust is fast. Rust is safe, and the borrow checker keeps rust safe.", 3);
        assert_eq!(got, vec!["rust", "safe", "fast"]);
    }
}
