use crate::config::BOILERPLATE_MARKERS;
use crate::markup::{MarkupStripper, StripError, WikitextStripper};
use memchr::memmem;
use once_cell::sync::Lazy;
use regex::Regex;

static CITATION_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[0-9]+\]").unwrap());

/// Ideographs with a Unicode numeric value. They are letters (`Lo`), so
/// `char::is_numeric` misses them.
const CJK_NUMERALS: &str = "零一二三四五六七八九十百千万萬億亿兆廿卅壹贰貳叁參肆伍陆陸柒捌玖拾佰仟";

/// Turns raw revision markup into cleaned plain text.
#[derive(Debug, Clone)]
pub struct TextNormalizer<S = WikitextStripper> {
    stripper: S,
}

impl<S: MarkupStripper> TextNormalizer<S> {
    pub fn new(stripper: S) -> Self {
        Self { stripper }
    }

    pub fn normalize(&self, raw: &str) -> Result<String, StripError> {
        let plain = self.stripper.strip(raw)?;
        Ok(clean_text(&plain))
    }
}

impl Default for TextNormalizer {
    fn default() -> Self {
        Self::new(WikitextStripper::new())
    }
}

/// Cleaning steps applied to already-rendered plain text.
pub fn clean_text(plain: &str) -> String {
    let kept = truncate_at_markers(plain);
    let joined = drop_numeric_tokens(kept);
    remove_citations(&joined)
}

/// Cuts at each marker in turn; every cut sees the previous cut's result.
pub fn truncate_at_markers(text: &str) -> &str {
    BOILERPLATE_MARKERS.iter().fold(text, |text, marker| {
        match memmem::find(text.as_bytes(), marker.as_bytes()) {
            Some(pos) => &text[..pos],
            None => text,
        }
    })
}

/// Whitespace tokenization only; punctuation stays attached to its token.
pub fn drop_numeric_tokens(text: &str) -> String {
    text.split_whitespace()
        .filter(|token| !is_numeric(token))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn remove_citations(text: &str) -> String {
    CITATION_REGEX.replace_all(text, "").into_owned()
}

fn is_numeric(token: &str) -> bool {
    !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_numeric() || CJK_NUMERALS.contains(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_to_end_example() {
        assert_eq!(clean_text("Hello [1] 2020 world"), "Hello  world");
    }

    #[test]
    fn references_cuts_everything_after() {
        let text = "Body text\nReferences\nExternal links\nNotes\nmore";
        assert_eq!(clean_text(text), "Body text");
    }

    #[test]
    fn references_marker_alone() {
        let text = "Keep this.\nReferences\n[1] Smith 1999. Some book.";
        assert_eq!(clean_text(text), "Keep this.");
    }

    #[test]
    fn marker_needs_trailing_newline() {
        assert_eq!(clean_text("See References"), "See References");
        assert_eq!(truncate_at_markers("a\nNotes"), "a\nNotes");
    }

    #[test]
    fn markers_apply_sequentially() {
        let text = "intro\nNotes\nx\nExternal links\ny";
        assert_eq!(truncate_at_markers(text), "intro\n");
        let text = "intro\nExternal links\nx\nNotes\ny";
        assert_eq!(truncate_at_markers(text), "intro\n");
    }

    #[test]
    fn absent_markers_are_noops() {
        assert_eq!(truncate_at_markers("nothing to cut"), "nothing to cut");
    }

    #[test]
    fn numeric_tokens_dropped_others_kept() {
        assert_eq!(
            drop_numeric_tokens("In 1999, 42 people (3) came ½ ² 7th"),
            "In 1999, people (3) came 7th"
        );
    }

    #[test]
    fn cjk_numeral_tokens_dropped() {
        assert_eq!(drop_numeric_tokens("三 月 三月 万 二十 ３ 〇"), "月 三月");
    }

    #[test]
    fn whitespace_rejoined_single_space() {
        assert_eq!(drop_numeric_tokens("  a\n\n b\t c  "), "a b c");
    }

    #[test]
    fn citations_removed_without_collapsing() {
        assert_eq!(remove_citations("fact[12] and[3][4] more [a]"), "fact and more [a]");
        assert_eq!(remove_citations("x [] y"), "x [] y");
    }

    // Holds only when no citation is glued to a number or nested in brackets.
    #[test]
    fn cleaned_tokens_are_stable_when_citations_stand_apart() {
        let samples = [
            "Hello [1] 2020 world",
            "The band formed in 2013.[2] They released 3 albums",
            "Ladilla Rusa\nNotes\n1 2 3",
            "trailing [99]",
            "",
        ];
        for sample in samples {
            let once = clean_text(sample);
            let twice = remove_citations(&drop_numeric_tokens(&once));
            let tokens = |s: &str| s.split_whitespace().map(str::to_string).collect::<Vec<_>>();
            assert_eq!(tokens(&twice), tokens(&once), "sample {:?}", sample);
        }
    }

    #[test]
    fn reapplying_can_remove_what_citation_removal_exposed() {
        // The citation hides a numeric token, then a nested one hides another.
        let once = clean_text("[1]2020 a");
        assert_eq!(once, "2020 a");
        assert_eq!(clean_text(&once), "a");

        let once = clean_text("[[1]2] b");
        assert_eq!(once, "[2] b");
        assert_eq!(clean_text(&once), " b");
    }

    #[test]
    fn normalizer_strips_markup_first() {
        let normalizer = TextNormalizer::new(WikitextStripper::new());
        let raw = "'''Ladilla Rusa''' is a duo formed in 2017.<ref>{{cite web}}</ref>\n\n== References ==\n{{reflist}}\n* Smith, 2019";
        assert_eq!(
            normalizer.normalize(raw).unwrap(),
            "Ladilla Rusa is a duo formed in 2017."
        );
    }

    #[test]
    fn normalizer_propagates_strip_errors() {
        struct Failing;
        impl MarkupStripper for Failing {
            fn strip(&self, _raw: &str) -> Result<String, StripError> {
                Err(StripError("unbalanced".to_string()))
            }
        }
        assert!(TextNormalizer::new(Failing).normalize("x").is_err());
    }
}
