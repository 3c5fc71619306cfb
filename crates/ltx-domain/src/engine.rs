use serde::{Deserialize, Serialize};

/// The three supported TeX engines, in default-preference order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Pdflatex,
    Xelatex,
    Lualatex,
}

pub const ALL_ENGINES: [Engine; 3] = [Engine::Pdflatex, Engine::Xelatex, Engine::Lualatex];

impl Engine {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Engine::Pdflatex => "pdflatex",
            Engine::Xelatex => "xelatex",
            Engine::Lualatex => "lualatex",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pdflatex" | "pdftex" => Some(Engine::Pdflatex),
            "xelatex" | "xetex" => Some(Engine::Xelatex),
            "lualatex" | "luatex" => Some(Engine::Lualatex),
            _ => None,
        }
    }

    /// Name of the format bundle this engine mounts (`fmt-pdflatex` and friends).
    #[must_use]
    pub fn format_bundle(self) -> String {
        format!("fmt-{}", self.as_str())
    }

    /// Engine invocation argv per the compilation contract. `main_file` is the
    /// path of the root document inside the engine filesystem.
    #[must_use]
    pub fn argv(self, main_file: &str) -> Vec<String> {
        vec![
            self.as_str().to_string(),
            "-interaction=nonstopmode".to_string(),
            "-halt-on-error".to_string(),
            main_file.to_string(),
        ]
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_engine_aliases() {
        assert_eq!(Engine::parse("pdflatex"), Some(Engine::Pdflatex));
        assert_eq!(Engine::parse("XeLaTeX"), Some(Engine::Xelatex));
        assert_eq!(Engine::parse("luatex"), Some(Engine::Lualatex));
        assert_eq!(Engine::parse("tex4ht"), None);
    }

    #[test]
    fn argv_carries_nonstop_and_halt_flags() {
        let argv = Engine::Xelatex.argv("main.tex");
        assert_eq!(
            argv,
            ["xelatex", "-interaction=nonstopmode", "-halt-on-error", "main.tex"]
        );
    }
}
