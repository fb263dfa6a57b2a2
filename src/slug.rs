//! URL slugs derived from a person's name.
//!
//! Slugs are trimmed, non-empty identifiers composed of lowercase ASCII
//! letters, digits, and hyphens.

use crate::models::PERSON_SLUG_MAX;

/// Slugs that would shadow a fixed route.
pub const RESERVED: &[&str] = &["index", "report"];

/// Derive a slug from a display name.
///
/// Whitespace, slashes, underscores and dashes become a single `-`; accented
/// Latin letters are reduced to their base letter; everything else is dropped.
/// The result is cut to [`PERSON_SLUG_MAX`] characters.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());

    for ch in name.chars().flat_map(char::to_lowercase) {
        match ch {
            'a'..='z' | '0'..='9' => slug.push(ch),
            '-' | '_' | '/' | '\\' | '\u{2013}' | '\u{2014}' | '\u{2015}' => {
                push_separator(&mut slug);
            }
            c if c.is_whitespace() => push_separator(&mut slug),
            c => {
                if let Some(ascii) = transliterate(c) {
                    slug.push_str(ascii);
                }
            }
        }
    }

    // Transliteration can lengthen a name, e.g. `ß` becomes `ss`. Slugs are ASCII.
    slug.truncate(PERSON_SLUG_MAX);
    slug.trim_end_matches('-').to_owned()
}

fn push_separator(slug: &mut String) {
    if !slug.is_empty() && !slug.ends_with('-') {
        slug.push('-');
    }
}

fn transliterate(ch: char) -> Option<&'static str> {
    let ascii = match ch {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => "a",
        'æ' => "ae",
        'ç' | 'ć' | 'ĉ' | 'č' => "c",
        'ď' | 'đ' | 'ð' => "d",
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' => "e",
        'ĝ' | 'ğ' | 'ġ' | 'ģ' => "g",
        'ĥ' | 'ħ' => "h",
        'ì' | 'í' | 'î' | 'ï' | 'ĩ' | 'ī' | 'ĭ' | 'į' | 'ı' => "i",
        'ĵ' => "j",
        'ķ' => "k",
        'ĺ' | 'ļ' | 'ľ' | 'ŀ' | 'ł' => "l",
        'ñ' | 'ń' | 'ņ' | 'ň' => "n",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ŏ' | 'ő' => "o",
        'œ' => "oe",
        'ŕ' | 'ŗ' | 'ř' => "r",
        'ś' | 'ŝ' | 'ş' | 'š' => "s",
        'ß' => "ss",
        'ţ' | 'ť' | 'ŧ' => "t",
        'þ' => "th",
        'ù' | 'ú' | 'û' | 'ü' | 'ũ' | 'ū' | 'ŭ' | 'ů' | 'ű' | 'ų' => "u",
        'ŵ' => "w",
        'ý' | 'ÿ' | 'ŷ' => "y",
        'ź' | 'ż' | 'ž' => "z",
        _ => return None,
    };
    Some(ascii)
}

/// Return `true` when `value` is a valid slug.
pub fn is_valid_slug(value: &str) -> bool {
    is_trimmed_non_empty(value) && has_allowed_slug_chars(value)
}

pub fn is_reserved(value: &str) -> bool {
    RESERVED.contains(&value)
}

fn is_trimmed_non_empty(value: &str) -> bool {
    !value.is_empty() && value.trim() == value
}

fn has_allowed_slug_chars(value: &str) -> bool {
    value
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn punctuation_is_dropped_and_spaces_join() {
        assert_eq!(slugify("Jane O'Neil (1950\u{2013}2024)"), "jane-oneil-1950-2024");
        assert_eq!(slugify("  Dr. John   Smith!  "), "dr-john-smith");
        assert_eq!(slugify("AC/DC fan"), "ac-dc-fan");
    }

    #[test]
    fn accented_letters_are_transliterated() {
        assert_eq!(slugify("Zoë Müller"), "zoe-muller");
        assert_eq!(slugify("Straße Łukasz"), "strasse-lukasz");
    }

    #[test]
    fn expanded_names_are_cut_to_the_column_limit() {
        let slug = slugify(&"ß".repeat(200));
        assert_eq!(slug.len(), PERSON_SLUG_MAX);
        assert!(is_valid_slug(&slug));

        // A cut that lands on a separator leaves no trailing `-`.
        let name = format!("{} b", "a".repeat(PERSON_SLUG_MAX - 1));
        let slug = slugify(&name);
        assert_eq!(slug, "a".repeat(PERSON_SLUG_MAX - 1));
    }

    #[test]
    fn unmappable_names_produce_an_empty_slug() {
        assert_eq!(slugify("王小明"), "");
        assert_eq!(slugify("?!"), "");
    }

    #[test]
    fn generated_slugs_are_valid() {
        for name in ["Ada Lovelace", "—Grace—Hopper—", "René  Descartes", "x_y"] {
            let slug = slugify(name);
            assert!(is_valid_slug(&slug), "{name:?} -> {slug:?}");
        }
    }

    #[test]
    fn validation_rejects_foreign_characters() {
        assert!(!is_valid_slug("Ada"));
        assert!(!is_valid_slug("ada lovelace"));
        assert!(!is_valid_slug(""));
        assert!(is_valid_slug("ada-lovelace-2"));
    }

    #[test]
    fn fixed_routes_are_reserved() {
        assert!(is_reserved("index"));
        assert!(is_reserved("report"));
        assert!(!is_reserved("ada"));
    }
}
