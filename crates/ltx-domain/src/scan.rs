use std::sync::OnceLock;

use regex::Regex;

fn usepackage_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\\usepackage\s*(?:\[[^\]]*\])?\s*\{([^}]*)\}").unwrap())
}

fn requirepackage_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\\RequirePackage\s*(?:\[[^\]]*\])?\s*\{([^}]*)\}").unwrap())
}

fn documentclass_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\\documentclass\s*(?:\[[^\]]*\])?\s*\{([^}]*)\}").unwrap())
}

/// Remove TeX line comments: `%` to end of line, unless the `%` is escaped.
#[must_use]
pub fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    for line in source.split_inclusive('\n') {
        let mut cut = line.len();
        let bytes = line.as_bytes();
        for (idx, byte) in bytes.iter().enumerate() {
            if *byte == b'%' && (idx == 0 || bytes[idx - 1] != b'\\') {
                cut = idx;
                break;
            }
        }
        out.push_str(&line[..cut]);
        if cut < line.len() && line.ends_with('\n') {
            out.push('\n');
        }
    }
    out
}

/// Extract the package identifiers a document asks for.
///
/// Scans `\usepackage`, `\RequirePackage` and `\documentclass`; comma lists
/// are split and trimmed, and the document class counts as a package. Order
/// of first appearance is preserved, duplicates dropped.
#[must_use]
pub fn extract_packages(source: &str) -> Vec<String> {
    let stripped = strip_comments(source);
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for re in [documentclass_re(), usepackage_re(), requirepackage_re()] {
        for caps in re.captures_iter(&stripped) {
            for raw in caps[1].split(',') {
                let name = raw.trim();
                if name.is_empty() {
                    continue;
                }
                if seen.insert(name.to_string()) {
                    out.push(name.to_string());
                }
            }
        }
    }
    out
}

const UNICODE_FONT_COMMANDS: [&str; 3] = ["\\setmainfont", "\\setsansfont", "\\setmonofont"];

/// Whether the source demands a Unicode-capable engine (xelatex or lualatex).
///
/// True when `fontspec` or `unicode-math` is loaded, or any of the fontspec
/// font-selection commands appears outside a comment.
#[must_use]
pub fn requires_unicode_engine(source: &str) -> bool {
    let stripped = strip_comments(source);
    let packages = extract_packages(&stripped);
    if packages.iter().any(|p| p == "fontspec" || p == "unicode-math") {
        return true;
    }
    UNICODE_FONT_COMMANDS.iter().any(|cmd| stripped.contains(cmd))
}
