use std::sync::OnceLock;

use regex::Regex;

/// Token pdftex emits when a document trips font expansion on bitmap fonts.
/// Seeing it marks the fingerprint so the selector steers away from pdflatex.
pub const LEGACY_FONT_EXPANSION_TOKEN: &str =
    "auto expansion is only possible with scalable fonts";

const STRIP_EXTENSIONS: [&str; 7] = [".sty", ".cls", ".def", ".clo", ".fd", ".cfg", ".tex"];
const SKIP_NAMES: [&str; 5] = ["document", "texput", "null", "undefined", "NaN"];

fn latex_error_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"! LaTeX Error: File `([^']+)' not found").unwrap())
}

fn package_error_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"! Package \S+ Error: .*?file ([^\s]+)").unwrap())
}

fn font_family_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(ec|tc)[a-z]{2}[0-9]+$").unwrap())
}

fn valid_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{2,50}$").unwrap())
}

/// Pull missing-file names out of an engine log.
///
/// Matches the two error shapes TeX emits for an absent input, normalises to
/// bare filenames and deduplicates within the pass, preserving order.
#[must_use]
pub fn parse_missing_files(log: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for re in [latex_error_re(), package_error_re()] {
        for caps in re.captures_iter(log) {
            let raw = caps[1].trim().trim_end_matches(['.', ',', ';']);
            let bare = raw.rsplit('/').next().unwrap_or(raw);
            if bare.is_empty() {
                continue;
            }
            if seen.insert(bare.to_string()) {
                out.push(bare.to_string());
            }
        }
    }
    out
}

/// Derive the repository package name for a missing file, or `None` when the
/// name is not worth a lookup.
///
/// Recognised extensions are stripped; `ec`/`tc` bitmap font names resolve to
/// `cm-super`; anything outside `[A-Za-z0-9_-]{2,50}` or in the skip set is
/// rejected.
#[must_use]
pub fn package_from_missing_file(file: &str) -> Option<String> {
    let mut name = file.trim();
    for ext in STRIP_EXTENSIONS {
        if let Some(stripped) = name.strip_suffix(ext) {
            name = stripped;
            break;
        }
    }
    if font_family_re().is_match(name) {
        return Some("cm-super".to_string());
    }
    if !valid_name_re().is_match(name) {
        return None;
    }
    if SKIP_NAMES.contains(&name) {
        return None;
    }
    Some(name.to_string())
}

#[must_use]
pub fn has_legacy_font_expansion(log: &str) -> bool {
    log.contains(LEGACY_FONT_EXPANSION_TOKEN)
}
