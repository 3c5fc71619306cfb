use serde::{Deserialize, Serialize};

use crate::engine::{Engine, ALL_ENGINES};
use crate::scan::strip_comments;
use crate::stats::EngineStats;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

/// The selector's verdict for one document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineChoice {
    pub engine: Engine,
    pub reason: String,
    pub confidence: Confidence,
}

const XELATEX_PACKAGES: [&str; 10] = [
    "fontspec",
    "unicode-math",
    "polyglossia",
    "xeCJK",
    "xunicode",
    "xltxtra",
    "mathspec",
    "realscripts",
    "metalogo",
    "xetex",
];

const XELATEX_COMMANDS: [&str; 6] = [
    "\\setmainfont",
    "\\setsansfont",
    "\\setmonofont",
    "\\newfontfamily",
    "\\setmathfont",
    "\\defaultfontfeatures",
];

// Arabic, Devanagari, Thai, CJK, Hangul.
const UNICODE_SCRIPT_RANGES: [(u32, u32); 5] = [
    (0x0600, 0x06FF),
    (0x0900, 0x097F),
    (0x0E00, 0x0E7F),
    (0x3000, 0x9FFF),
    (0xAC00, 0xD7AF),
];

const LUALATEX_PACKAGES: [&str; 5] =
    ["luacode", "luatexbase", "luaotfload", "luamplib", "luatextra"];

const LUALATEX_COMMANDS: [&str; 3] = ["\\directlua", "\\luaexec", "\\luadirect"];

// Layout-heavy packages that historically behave better under xelatex.
const SOFT_XELATEX_PACKAGES: [&str; 7] = [
    "geometry", "fancyhdr", "titlesec", "enumitem", "babel", "inputenc", "fontenc",
];

/// Pick an engine for a document.
///
/// Decision order, first match wins: hard engine requirements from packages,
/// commands or Unicode scripts; the historically fastest reliable engine for
/// this fingerprint; avoidance of engines that keep failing; the learned
/// legacy-font-expansion flag; a soft package preference; pdflatex.
#[must_use]
pub fn select_engine(
    source: &str,
    packages: &[String],
    history: &[EngineStats],
    legacy_font_expansion: bool,
) -> EngineChoice {
    let stripped = strip_comments(source);

    if let Some(choice) = hard_requirement(&stripped, packages) {
        return choice;
    }

    if let Some(best) = history
        .iter()
        .filter(|stats| stats.is_reliable())
        .min_by(|a, b| a.running_avg_ms.total_cmp(&b.running_avg_ms))
    {
        return EngineChoice {
            engine: best.engine,
            reason: format!(
                "history: {} averaged {:.0}ms over {} compiles",
                best.engine, best.running_avg_ms, best.compile_count
            ),
            confidence: Confidence::High,
        };
    }

    if !history.is_empty() {
        let failed: Vec<Engine> = history
            .iter()
            .filter(|stats| stats.running_success_rate <= 0.5)
            .map(|stats| stats.engine)
            .collect();
        if failed.len() == history.len() {
            if let Some(engine) = ALL_ENGINES.into_iter().find(|e| !failed.contains(e)) {
                return EngineChoice {
                    engine,
                    reason: format!(
                        "avoiding {} after repeated failures",
                        failed
                            .iter()
                            .map(|engine| engine.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                    confidence: Confidence::Medium,
                };
            }
        }
    }

    if legacy_font_expansion {
        return EngineChoice {
            engine: Engine::Xelatex,
            reason: "document previously hit font expansion limits under pdflatex".to_string(),
            confidence: Confidence::High,
        };
    }

    if let Some(pkg) = packages
        .iter()
        .find(|p| SOFT_XELATEX_PACKAGES.contains(&p.as_str()))
    {
        return EngineChoice {
            engine: Engine::Xelatex,
            reason: format!("package {pkg} leans xelatex"),
            confidence: Confidence::Medium,
        };
    }

    EngineChoice {
        engine: Engine::Pdflatex,
        reason: "default engine".to_string(),
        confidence: Confidence::Low,
    }
}

fn hard_requirement(stripped: &str, packages: &[String]) -> Option<EngineChoice> {
    if let Some(pkg) = packages
        .iter()
        .find(|p| XELATEX_PACKAGES.contains(&p.as_str()))
    {
        return Some(required(Engine::Xelatex, format!("package {pkg} requires xelatex")));
    }
    if let Some(cmd) = XELATEX_COMMANDS.iter().find(|cmd| stripped.contains(*cmd)) {
        return Some(required(Engine::Xelatex, format!("command {cmd} requires xelatex")));
    }
    if stripped.chars().any(|ch| {
        let cp = u32::from(ch);
        UNICODE_SCRIPT_RANGES
            .iter()
            .any(|(lo, hi)| cp >= *lo && cp <= *hi)
    }) {
        return Some(required(
            Engine::Xelatex,
            "non-Latin script requires a Unicode engine".to_string(),
        ));
    }

    if let Some(pkg) = packages
        .iter()
        .find(|p| LUALATEX_PACKAGES.contains(&p.as_str()))
    {
        return Some(required(Engine::Lualatex, format!("package {pkg} requires lualatex")));
    }
    if let Some(cmd) = LUALATEX_COMMANDS.iter().find(|cmd| stripped.contains(*cmd)) {
        return Some(required(Engine::Lualatex, format!("command {cmd} requires lualatex")));
    }
    None
}

fn required(engine: Engine, reason: String) -> EngineChoice {
    EngineChoice {
        engine,
        reason,
        confidence: Confidence::High,
    }
}
