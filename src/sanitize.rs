use crate::config::Sanitize;
use unicode_normalization::UnicodeNormalization;

/// Prepares one cell's text for the builtin PDF fonts.
pub fn cell_text(cfg: &Sanitize, raw: &str) -> String {
    let mut s = if cfg.normalize_unicode {
        raw.nfkc().collect::<String>()
    } else {
        raw.to_string()
    };

    s = sanitize_control_chars(&s, &cfg.control_chars_to_sanitize);

    // Cells are single-line; line structure is flattened to spaces.
    s = s
        .split(['\n', '\r', '\t'])
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    to_latin1(&s)
}

fn sanitize_control_chars(s: &str, codes: &[u8]) -> String {
    if codes.is_empty() {
        return s.to_string();
    }

    let mut mask = [false; 128];
    for &code in codes {
        if (code as usize) < mask.len() {
            mask[code as usize] = true;
        }
    }

    s.chars()
        .filter(|&ch| {
            if ch == '\n' || ch == '\r' || ch == '\t' {
                return true;
            }
            let cp = ch as u32;
            if cp < 128 { !mask[cp as usize] } else { true }
        })
        .collect()
}

// Builtin Helvetica only covers WinAnsi; anything past Latin-1 gets '?'.
fn to_latin1(s: &str) -> String {
    s.chars()
        .map(|ch| if (ch as u32) < 0x100 { ch } else { '?' })
        .collect()
}

/// Cuts `s` to at most `max_chars` characters, marking the cut with "..".
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    if max_chars <= 2 {
        return s.chars().take(max_chars).collect();
    }
    let mut out: String = s.chars().take(max_chars - 2).collect();
    out.push_str("..");
    out
}
