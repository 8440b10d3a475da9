//! Text canonicalization shared by every textual comparison.

use std::fmt;

/// Lower-cased text with punctuation replaced by spaces and whitespace
/// collapsed to single spaces. Only [`normalize`] constructs it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct NormalizedText(String);

impl NormalizedText {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn char_len(&self) -> usize {
        self.0.chars().count()
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.0.split(' ').filter(|t| !t.is_empty())
    }

    /// Plain substring containment. A needle cut off mid-word still counts,
    /// which is how streamed transcript chunks usually end.
    pub fn contains(&self, needle: &NormalizedText) -> bool {
        !needle.is_empty() && self.0.contains(needle.as_str())
    }
}

impl fmt::Display for NormalizedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lower-cases, turns every character that is not alphanumeric or `_` into a
/// space, collapses runs of whitespace, and trims.
///
/// ```rust
/// use scripture_sync::normalize::normalize;
///
/// assert_eq!(normalize("God's love").as_str(), "god s love");
/// ```
pub fn normalize(text: &str) -> NormalizedText {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for ch in text.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_space = true;
        }
    }

    NormalizedText(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_punctuation_and_case() {
        assert_eq!(normalize("Hello, World!").as_str(), "hello world");
        assert_eq!(normalize("God's love").as_str(), "god s love");
    }

    #[test]
    fn test_collapses_whitespace() {
        assert_eq!(normalize("  Multiple   spaces  ").as_str(), "multiple spaces");
        assert_eq!(normalize("line\nbreak\ttab").as_str(), "line break tab");
    }

    #[test]
    fn test_empty_and_punctuation_only() {
        assert!(normalize("").is_empty());
        assert!(normalize(" ?!, ").is_empty());
    }

    #[test]
    fn test_deterministic() {
        let a = normalize("The LORD is my shepherd; I shall not want.");
        let b = normalize("The LORD is my shepherd; I shall not want.");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "the lord is my shepherd i shall not want");
    }

    #[test]
    fn test_contains_is_plain_substring() {
        let verse = normalize("he is also loved");
        assert!(verse.contains(&normalize("also loved")));
        assert!(verse.contains(&normalize("so lov")));
        assert!(!verse.contains(&normalize("loved him")));
        assert!(!verse.contains(&normalize("")));
    }

    #[test]
    fn test_tokens() {
        let t = normalize("In the beginning, God");
        assert_eq!(t.tokens().collect::<Vec<_>>(), vec!["in", "the", "beginning", "god"]);
    }
}
