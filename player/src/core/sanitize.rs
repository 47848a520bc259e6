//! Filesystem-safe names derived from user-entered game and task names.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

static ILLEGAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\-]").expect("valid illegal-char regex"));
static UNDERSCORES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_+").expect("valid underscore regex"));

/// Fold accented characters to their base letters.
///
/// Decomposes (NFD), drops combining marks, and recomposes (NFC). The stroked
/// `Đ`/`đ` have no decomposition and are mapped explicitly.
pub fn remove_accents(text: &str) -> String {
    let folded: String = text
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| match c {
            'Đ' => 'D',
            'đ' => 'd',
            other => other,
        })
        .collect();
    folded.nfc().collect()
}

/// Turn an arbitrary display name into a directory/file name component.
///
/// Accents are folded, spaces become underscores, anything outside
/// word/hyphen/underscore is removed, runs of underscores collapse to one, and
/// leading/trailing underscores are trimmed.
pub fn sanitize_filename(text: &str) -> String {
    let folded = remove_accents(text).replace(' ', "_");
    let stripped = ILLEGAL_RE.replace_all(&folded, "");
    let collapsed = UNDERSCORES_RE.replace_all(&stripped, "_");
    collapsed.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_vietnamese_game_name() {
        assert_eq!(sanitize_filename("Đế Chế 2 Việt"), "De_Che_2_Viet");
    }

    #[test]
    fn strips_illegal_and_collapses_underscores() {
        assert_eq!(sanitize_filename("  daily / quest!!  run "), "daily_quest_run");
        assert_eq!(sanitize_filename("a__b---c"), "a_b---c");
        assert_eq!(sanitize_filename("__x__"), "x");
    }

    #[test]
    fn empty_and_symbol_only_names_become_empty() {
        assert_eq!(sanitize_filename(""), "");
        assert_eq!(sanitize_filename("?!*"), "");
    }

    #[test]
    fn remove_accents_keeps_plain_text() {
        assert_eq!(remove_accents("Crème brûlée"), "Creme brulee");
        assert_eq!(remove_accents("plain"), "plain");
        assert_eq!(remove_accents("đường"), "duong");
    }
}
