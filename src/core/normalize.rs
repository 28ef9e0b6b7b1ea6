//! Text repair for model-produced file contents.
//!
//! Model responses routinely arrive JSON-escaped, double-encoded, or both.
//! The pipeline order is a contract: standard escape decoding runs first,
//! Mojibake substitution second. Swapping the passes silently regresses
//! double-encoded inputs such as `"fallar\u{c3}\u{a1}\\n"`.

/// UTF-8-misread-as-Latin-1 sequences and their repairs.
///
/// Longest keys first: several entries share the `â€` prefix and must win
/// before the shorter forms are tried.
pub const MOJIBAKE_TABLE: &[(&str, &str)] = &[
    ("â€œ", "\u{201c}"),
    ("â€\u{9d}", "\u{201d}"),
    ("â€™", "'"),
    ("â€˜", "\u{2018}"),
    ("â€”", "\u{2014}"),
    ("â€“", "\u{2013}"),
    ("â€¦", "\u{2026}"),
    ("Ã¡", "á"),
    ("Ã©", "é"),
    ("Ã­", "í"),
    ("Ã³", "ó"),
    ("Ãº", "ú"),
    ("Ã±", "ñ"),
    ("Ã¼", "ü"),
    ("Ã§", "ç"),
    ("Ã€", "À"),
    ("Ã‰", "É"),
    ("Ã‘", "Ñ"),
    ("Ã¤", "ä"),
    ("Ã¶", "ö"),
    ("Ã¨", "è"),
    ("Ã\u{a0}", "à"),
    ("Â¡", "¡"),
    ("Â¿", "¿"),
    ("Â°", "°"),
    ("Â«", "«"),
    ("Â»", "»"),
];

/// Outcome of one normalization run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub text: String,
    /// Whether the escape-decode pass rewrote the string.
    pub escapes_decoded: bool,
    /// Total Mojibake substitutions applied.
    pub mojibake_replacements: usize,
    /// True when a Mojibake key or a literal `\uXXXX` survives in the output.
    pub residue_suspected: bool,
}

/// Normalize one file's contents before it is written to disk.
pub fn normalize(input: &str) -> Normalized {
    let mut escapes_decoded = false;
    let mut text = if input.contains('\\') {
        match decode_escapes(input) {
            // Malformed escapes keep the original string unchanged.
            Some(decoded) => {
                escapes_decoded = decoded != input;
                decoded
            }
            None => input.to_string(),
        }
    } else {
        input.to_string()
    };

    let mut mojibake_replacements = 0;
    for (key, replacement) in MOJIBAKE_TABLE {
        if text.contains(key) {
            mojibake_replacements += text.matches(key).count();
            text = text.replace(key, replacement);
        }
    }

    let residue_suspected = has_residue(&text);
    Normalized {
        text,
        escapes_decoded,
        mojibake_replacements,
        residue_suspected,
    }
}

fn has_residue(text: &str) -> bool {
    if MOJIBAKE_TABLE.iter().any(|(key, _)| text.contains(key)) {
        return true;
    }
    // A surviving literal `\uXXXX` means the decode pass missed a layer.
    let bytes = text.as_bytes();
    for (idx, window) in bytes.windows(2).enumerate() {
        if window == br"\u"
            && bytes[idx + 2..]
                .iter()
                .take(4)
                .filter(|b| b.is_ascii_hexdigit())
                .count()
                == 4
        {
            return true;
        }
    }
    false
}

/// Decode standard escape sequences: `\n`, `\t`, `\r`, `\"`, `\'`, `\\`,
/// `\0`, `\xNN`, `\uXXXX` (with surrogate pairs).
///
/// Returns `None` on any malformed escape; callers must then keep the
/// original string.
fn decode_escapes(input: &str) -> Option<String> {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '"' => out.push('"'),
            '\'' => out.push('\''),
            '\\' => out.push('\\'),
            '/' => out.push('/'),
            '0' => out.push('\0'),
            'x' => {
                let value = hex_digits(&mut chars, 2)?;
                out.push(char::from_u32(value)?);
            }
            'u' => {
                let unit = hex_digits(&mut chars, 4)?;
                if (0xd800..0xdc00).contains(&unit) {
                    // High surrogate: a `\uXXXX` low surrogate must follow.
                    if chars.next()? != '\\' || chars.next()? != 'u' {
                        return None;
                    }
                    let low = hex_digits(&mut chars, 4)?;
                    if !(0xdc00..0xe000).contains(&low) {
                        return None;
                    }
                    let combined = 0x10000 + ((unit - 0xd800) << 10) + (low - 0xdc00);
                    out.push(char::from_u32(combined)?);
                } else if (0xdc00..0xe000).contains(&unit) {
                    return None;
                } else {
                    out.push(char::from_u32(unit)?);
                }
            }
            _ => return None,
        }
    }
    Some(out)
}

fn hex_digits(chars: &mut std::str::Chars<'_>, count: usize) -> Option<u32> {
    let mut value = 0u32;
    for _ in 0..count {
        let digit = chars.next()?.to_digit(16)?;
        value = value * 16 + digit;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_backslash_n() {
        assert_eq!(normalize(r"a\nb").text, "a\nb");
    }

    #[test]
    fn decodes_unicode_escape() {
        assert_eq!(normalize("Funci\\u00f3n").text, "Función");
    }

    #[test]
    fn repairs_mojibake() {
        assert_eq!(normalize("usarÃ¡").text, "usará");
    }

    #[test]
    fn decodes_then_repairs_in_one_pass() {
        let result = normalize("Descripci\\u00f3n: fallarÃ¡\\n");
        assert_eq!(result.text, "Descripción: fallará\n");
        assert!(result.escapes_decoded);
        assert_eq!(result.mojibake_replacements, 1);
    }

    #[test]
    fn clean_text_is_unchanged() {
        let clean = "fn main() {\n    println!(\"hola\");\n}\n";
        assert!(!clean.contains('\\'));
        let result = normalize(clean);
        assert_eq!(result.text, clean);
        assert!(!result.escapes_decoded);
        assert_eq!(result.mojibake_replacements, 0);
        assert!(!result.residue_suspected);
    }

    #[test]
    fn normalize_is_idempotent_on_clean_output() {
        let once = normalize("Descripci\\u00f3n: fallarÃ¡\\n");
        let twice = normalize(&once.text);
        assert_eq!(once.text, twice.text);
    }

    #[test]
    fn malformed_escape_keeps_original() {
        let input = r"path\with\dirs";
        let result = normalize(input);
        assert_eq!(result.text, input);
        assert!(!result.escapes_decoded);
    }

    #[test]
    fn surrogate_pair_decodes_to_single_char() {
        assert_eq!(normalize("\\ud83d\\ude00").text, "😀");
    }

    #[test]
    fn lone_low_surrogate_keeps_original() {
        let input = r"bad \udc00 escape";
        assert_eq!(normalize(input).text, input);
    }

    #[test]
    fn counts_multiple_replacements() {
        let result = normalize("Ã¡ y Ã¡ y Ã±");
        assert_eq!(result.mojibake_replacements, 3);
    }

    #[test]
    fn flags_surviving_unicode_escape() {
        // Double-escaped input decodes one layer and leaves a literal \uXXXX.
        let result = normalize("a\\\\u00f3b");
        assert_eq!(result.text, "a\\u00f3b");
        assert!(result.residue_suspected);
    }
}
