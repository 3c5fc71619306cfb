use crate::scan::strip_comments;

const PREAMBLE_FALLBACK_CHARS: usize = 2000;

/// Stable fingerprint over a document's preamble, used to key learned
/// engine statistics.
///
/// The preamble is the text before `\begin{document}`; documents without
/// one are keyed by their first 2000 characters. Comments are stripped and
/// whitespace runs collapsed before hashing so cosmetic edits do not
/// invalidate learned history.
#[must_use]
pub fn preamble_fingerprint(source: &str) -> String {
    let preamble = match source.find("\\begin{document}") {
        Some(idx) => &source[..idx],
        None => {
            let end = source
                .char_indices()
                .nth(PREAMBLE_FALLBACK_CHARS)
                .map_or(source.len(), |(idx, _)| idx);
            &source[..end]
        }
    };
    let normalized = normalize(preamble);
    format!("p_{}", to_radix36(djb2(normalized.as_bytes())))
}

fn normalize(preamble: &str) -> String {
    let stripped = strip_comments(preamble);
    let mut out = String::with_capacity(stripped.len());
    let mut in_space = false;
    for ch in stripped.chars() {
        if ch.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(ch);
            in_space = false;
        }
    }
    out.trim().to_string()
}

// djb2: h = ((h << 5) + h) + c, over bytes, wrapping at 32 bits.
fn djb2(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 5381;
    for byte in bytes {
        hash = hash
            .wrapping_shl(5)
            .wrapping_add(hash)
            .wrapping_add(u32::from(*byte));
    }
    hash
}

fn to_radix36(mut value: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while value > 0 {
        buf.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).expect("radix-36 digits are ascii")
}
