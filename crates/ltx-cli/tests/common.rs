#![allow(dead_code)]

use std::io::Write as _;
use std::path::{Path, PathBuf};

use assert_cmd::assert::Assert;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};

pub const PDFLATEX_CLOSURE: [&str; 8] = [
    "core",
    "latex-base",
    "l3",
    "graphics",
    "tools",
    "fmt-pdflatex",
    "fonts-cm",
    "amsfonts",
];

/// Parses the single JSON object a `--json` invocation prints on stdout.
///
/// # Panics
/// Panics if stdout is not valid JSON.
pub fn parse_json(assert: &Assert) -> Value {
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout);
    serde_json::from_str(stdout.trim()).unwrap_or_else(|err| {
        panic!("stdout is not JSON ({err}): {stdout}");
    })
}

fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).expect("gzip write");
    encoder.finish().expect("gzip finish")
}

/// Publish a minimal but complete bundle base into `base`: registry
/// manifests plus one single-file bundle per known name.
pub fn publish_distribution(base: &Path) {
    std::fs::create_dir_all(base).expect("bundle base");
    let mut names: Vec<&str> = PDFLATEX_CLOSURE.to_vec();
    names.extend(["fmt-xelatex", "fmt-lualatex", "fontspec", "unicode-math"]);
    std::fs::write(
        base.join("registry.json"),
        serde_json::to_vec(&names).expect("registry json"),
    )
    .expect("registry");
    std::fs::write(
        base.join("package-map.json"),
        json!({"article": "latex-base"}).to_string(),
    )
    .expect("package map");
    std::fs::write(base.join("file-manifest.json"), b"{}").expect("file manifest");

    for name in names {
        let payload = format!("{name} contents");
        let meta = json!({
            "name": name,
            "files": [{
                "path": format!("/texlive/texmf-dist/{name}"),
                "name": format!("{name}.txt"),
                "start": 0,
                "end": payload.len(),
            }],
            "totalSize": payload.len(),
        });
        std::fs::write(base.join(format!("{name}.meta.json")), meta.to_string()).expect("meta");
        std::fs::write(base.join(format!("{name}.data.gz")), gzip(payload.as_bytes()))
            .expect("data");
    }
}

/// Publish one package under the proxy's `api/fetch/` namespace.
pub fn publish_proxy_package(base: &Path, name: &str) {
    let canonical = format!("/texlive/texmf-dist/tex/latex/{name}/{name}.sty");
    let mut files = serde_json::Map::new();
    files.insert(
        canonical.clone(),
        json!({"path": canonical, "content": format!("%% {name}")}),
    );
    let body = json!({"name": name, "files": files, "dependencies": [], "totalFiles": 1});
    let path = base.join("api").join("fetch").join(name);
    std::fs::create_dir_all(path.parent().expect("parent")).expect("proxy dirs");
    std::fs::write(path, body.to_string()).expect("proxy package");
}

/// Write an executable shell script standing in for a TeX engine binary.
///
/// # Panics
/// Panics if the script cannot be written or marked executable.
pub fn write_engine_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).expect("script");
    let mut perms = std::fs::metadata(&path).expect("script metadata").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("script permissions");
    path
}

/// A fake engine that always produces a PDF next to the main file.
pub fn succeeding_engine(dir: &Path) -> PathBuf {
    write_engine_script(
        dir,
        "fake-engine",
        r#"main=""
for arg in "$@"; do main="$arg"; done
stem="${main%.tex}"
printf '%%PDF-1.5 fake\n' > "$stem.pdf"
echo "Output written on $stem.pdf (1 page)."
exit 0
"#,
    )
}

/// A fake engine that fails until `needed` exists under the mounted tree,
/// then succeeds.
pub fn engine_requiring_file(dir: &Path, needed: &str, missing_name: &str) -> PathBuf {
    write_engine_script(
        dir,
        "fake-engine",
        &format!(
            r#"main=""
for arg in "$@"; do main="$arg"; done
stem="${{main%.tex}}"
if [ -f "../{needed}" ]; then
  printf '%%PDF-1.5 fake\n' > "$stem.pdf"
  exit 0
fi
echo "! LaTeX Error: File \`{missing_name}' not found."
exit 1
"#
        ),
    )
}

/// A fake engine that always reports the same missing file and never
/// produces output.
pub fn engine_always_missing(dir: &Path, missing_name: &str) -> PathBuf {
    write_engine_script(
        dir,
        "fake-engine",
        &format!(
            r#"echo "! LaTeX Error: File \`{missing_name}' not found."
exit 1
"#
        ),
    )
}
