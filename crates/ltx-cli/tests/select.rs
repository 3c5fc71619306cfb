use assert_cmd::cargo::cargo_bin_cmd;

mod common;

use common::{parse_json, publish_distribution, PDFLATEX_CLOSURE};

#[test]
fn plain_document_selects_pdflatex() {
    let temp = tempfile::tempdir().expect("tempdir");
    let doc = temp.path().join("hello.tex");
    std::fs::write(&doc, "\\documentclass{article}\\begin{document}Hi\\end{document}")
        .expect("doc");

    let assert = cargo_bin_cmd!("ltx")
        .env("LTX_CACHE_PATH", temp.path().join("cache"))
        .env("LTX_ONLINE", "0")
        .args(["--json", "engine"])
        .arg(&doc)
        .assert()
        .success();
    let payload = parse_json(&assert);
    assert_eq!(payload["details"]["engine"], "pdflatex");
    assert_eq!(payload["details"]["confidence"], "low");
    assert!(payload["details"]["fingerprint"]
        .as_str()
        .expect("fingerprint")
        .starts_with("p_"));
}

#[test]
fn fontspec_document_selects_xelatex() {
    let temp = tempfile::tempdir().expect("tempdir");
    let doc = temp.path().join("unicode.tex");
    std::fs::write(
        &doc,
        "\\documentclass{article}\\usepackage{fontspec}\\begin{document}Hi\\end{document}",
    )
    .expect("doc");

    let assert = cargo_bin_cmd!("ltx")
        .env("LTX_CACHE_PATH", temp.path().join("cache"))
        .env("LTX_ONLINE", "0")
        .args(["--json", "engine"])
        .arg(&doc)
        .assert()
        .success();
    let payload = parse_json(&assert);
    assert_eq!(payload["details"]["engine"], "xelatex");
    assert_eq!(payload["details"]["confidence"], "high");
    assert!(payload["details"]["reason"]
        .as_str()
        .expect("reason")
        .contains("fontspec"));
}

#[test]
fn resolve_lists_the_pdflatex_core_closure() {
    let temp = tempfile::tempdir().expect("tempdir");
    let bundles = temp.path().join("bundles");
    publish_distribution(&bundles);
    let doc = temp.path().join("hello.tex");
    std::fs::write(&doc, "\\documentclass{article}\\begin{document}Hi\\end{document}")
        .expect("doc");

    let assert = cargo_bin_cmd!("ltx")
        .env("LTX_CACHE_PATH", temp.path().join("cache"))
        .env("LTX_BUNDLE_URL", &bundles)
        .args(["--json", "resolve"])
        .arg(&doc)
        .assert()
        .success();
    let payload = parse_json(&assert);
    let closure: Vec<String> = payload["details"]["bundles"]
        .as_array()
        .expect("bundles array")
        .iter()
        .map(|v| v.as_str().expect("bundle name").to_string())
        .collect();
    assert_eq!(closure, PDFLATEX_CLOSURE);
}

#[test]
fn resolve_for_xelatex_includes_unicode_bundles() {
    let temp = tempfile::tempdir().expect("tempdir");
    let bundles = temp.path().join("bundles");
    publish_distribution(&bundles);
    let doc = temp.path().join("unicode.tex");
    std::fs::write(
        &doc,
        "\\documentclass{article}\\usepackage{fontspec}\\begin{document}Hi\\end{document}",
    )
    .expect("doc");

    let assert = cargo_bin_cmd!("ltx")
        .env("LTX_CACHE_PATH", temp.path().join("cache"))
        .env("LTX_BUNDLE_URL", &bundles)
        .args(["--json", "resolve"])
        .arg(&doc)
        .assert()
        .success();
    let payload = parse_json(&assert);
    assert_eq!(payload["details"]["engine"], "xelatex");
    let closure: Vec<String> = payload["details"]["bundles"]
        .as_array()
        .expect("bundles array")
        .iter()
        .map(|v| v.as_str().expect("bundle name").to_string())
        .collect();
    assert!(closure.contains(&"fmt-xelatex".to_string()));
    assert!(closure.contains(&"fontspec".to_string()));
    assert!(closure.contains(&"unicode-math".to_string()));
    assert!(!closure.contains(&"fmt-pdflatex".to_string()));
}

#[test]
fn unknown_engine_is_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let bundles = temp.path().join("bundles");
    publish_distribution(&bundles);
    let doc = temp.path().join("hello.tex");
    std::fs::write(&doc, "\\documentclass{article}").expect("doc");

    cargo_bin_cmd!("ltx")
        .env("LTX_CACHE_PATH", temp.path().join("cache"))
        .env("LTX_BUNDLE_URL", &bundles)
        .args(["resolve", "--engine", "tex4ht"])
        .arg(&doc)
        .assert()
        .failure();
}
