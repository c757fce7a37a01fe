//! Canonical form for agent responses before they are compared.
//!
//! Strips the formatting and boilerplate that differ between providers but carry no
//! meaning: YAML front matter, a wrapping code fence, markdown link targets, "As an AI"
//! prefaces, decorative heading-only lines, trailing follow-up offers and excess
//! whitespace. `normalize` is idempotent.

use once_cell::sync::Lazy;
use regex::Regex;

static FRONT_MATTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)^---\n.*?\n---\n").expect("front matter pattern"));
static CODE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)^```(?:[\w.+-]+)?\n(.*?)\n```$").expect("code fence pattern"));
static MARKDOWN_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").expect("markdown link pattern"));
static AI_PREFACE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^as\s+an\s+ai(?:\s+language\s+model)?[:,\s].*?[.!]\s*").expect("ai preface pattern")
});
static HEADING_ONLY_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?mi)^[\s\W]*(?:tl;?\s*dr|summary|overview|conclusion|key\s+takeaways?|key\s+points?|highlights?)\s*[:\-–—•]*\s*$",
    )
    .expect("heading pattern")
});
static MULTI_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]{2,}").expect("whitespace pattern"));
static MULTI_NL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("newline pattern"));
static TRAILING_FOLLOWUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\s*(?:would you like|shall i|should i|do you want|can i|let me know).*?\?\s*)+$")
        .expect("follow-up pattern")
});

fn strip_code_fence(text: &str) -> String {
    match CODE_FENCE.captures(text.trim()) {
        Some(c) => c[1].to_string(),
        None => text.to_string(),
    }
}

fn pass(text: &str) -> String {
    let t = text.replace("\r\n", "\n").replace('\r', "\n");
    let t = FRONT_MATTER.replacen(&t, 1, "").into_owned();
    let t = strip_code_fence(&t);
    let t = MARKDOWN_LINK.replace_all(&t, "${1}").into_owned();
    let t = AI_PREFACE.replacen(&t, 1, "").into_owned();
    let t = HEADING_ONLY_LINE.replace_all(&t, "").into_owned();
    let t = MULTI_WS.replace_all(&t, " ").into_owned();
    let t = MULTI_NL.replace_all(&t, "\n\n").into_owned();
    let t = TRAILING_FOLLOWUP.replace(t.trim_end(), "").into_owned();
    t.trim().to_string()
}

/// Rewrites `text` into its canonical form.
pub fn normalize(text: &str) -> String {
    // A pass never grows the text, so this settles on a fixed point.
    let mut current = pass(text);
    loop {
        let next = pass(&current);
        if next == current { return current; }
        current = next;
    }
}

/// Normalizes each text independently, preserving order.
pub fn batch_normalize<S: AsRef<str>>(texts: &[S]) -> Vec<String> {
    texts.iter().map(|t| normalize(t.as_ref())).collect()
}
