//! Free-text sanitizer applied to every case field before it is persisted.
//!
//! Pure and idempotent: an already-sanitized string is returned unchanged,
//! so cases can be re-saved any number of times without double encoding.

use std::sync::LazyLock;

use regex::Regex;

/// Entities left untouched when they already appear in the input.
static KNOWN_ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^&(?:amp|lt|gt|quot|apos|#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6});")
        .expect("static entity pattern compiles")
});

/// Sanitize a free-text value for storage.
///
/// 1. Strip non-visible Unicode characters
/// 2. Strip control characters (except newline, carriage return, tab)
/// 3. HTML-entity-encode markup characters
pub fn sanitize_text(raw: &str) -> String {
    let text = remove_invisible_unicode(raw);
    let text = remove_control_characters(&text);
    encode_entities(&text)
}

/// Remove zero-width and invisible Unicode characters.
fn remove_invisible_unicode(text: &str) -> String {
    text.chars()
        .filter(|c| {
            !matches!(
                *c,
                '\u{200B}'..='\u{200F}'  // Zero-width chars
                | '\u{202A}'..='\u{202E}' // Directional formatting
                | '\u{2060}'..='\u{2064}' // Invisible operators
                | '\u{2066}'..='\u{2069}' // Directional isolates
                | '\u{FEFF}'              // BOM
                | '\u{00AD}'              // Soft hyphen
            )
        })
        .collect()
}

fn remove_control_characters(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || matches!(*c, '\n' | '\r' | '\t'))
        .collect()
}

fn encode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (index, c) in text.char_indices() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '&' if KNOWN_ENTITY.is_match(&text[index..]) => out.push('&'),
            '&' => out.push_str("&amp;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_tag_is_encoded() {
        let clean = sanitize_text("<script>alert('x')</script>");
        assert_eq!(
            clean,
            "&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt;"
        );
        assert!(!clean.contains('<'));
    }

    #[test]
    fn sanitizing_twice_is_stable() {
        let inputs = [
            "plain note",
            "BP 120/80 & HR < 100",
            "\"quoted\" & 'single'",
            "already &amp; encoded &lt;b&gt;",
            "&#169; &#xA9; & &bogus;",
            "tab\tnew\nline\r\n",
        ];
        for input in inputs {
            let once = sanitize_text(input);
            assert_eq!(sanitize_text(&once), once, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn bare_ampersand_is_encoded_but_entities_kept() {
        assert_eq!(sanitize_text("A & B"), "A &amp; B");
        assert_eq!(sanitize_text("A &amp; B"), "A &amp; B");
        assert_eq!(sanitize_text("&bogus;"), "&amp;bogus;");
    }

    #[test]
    fn invisible_and_control_characters_removed() {
        let raw = "Met\u{200B}formin\u{0007} 500mg\u{FEFF}\n";
        assert_eq!(sanitize_text(raw), "Metformin 500mg\n");
    }

    #[test]
    fn clinical_text_without_markup_unchanged() {
        let note = "Pt reports 2/10 pain; on lisinopril 10 mg daily.\nNo allergies.";
        assert_eq!(sanitize_text(note), note);
    }
}
