use assert_cmd::cargo::cargo_bin_cmd;

mod common;

use common::{
    engine_always_missing, engine_requiring_file, parse_json, publish_distribution,
    publish_proxy_package, succeeding_engine,
};

#[test]
fn hello_world_compiles_cold_with_no_package_fetches() {
    let temp = tempfile::tempdir().expect("tempdir");
    let bundles = temp.path().join("bundles");
    let proxy = temp.path().join("proxy");
    publish_distribution(&bundles);
    std::fs::create_dir_all(&proxy).expect("proxy");
    let engine = succeeding_engine(temp.path());
    let doc = temp.path().join("hello.tex");
    std::fs::write(&doc, "\\documentclass{article}\\begin{document}Hi\\end{document}")
        .expect("doc");

    let assert = cargo_bin_cmd!("ltx")
        .env("LTX_CACHE_PATH", temp.path().join("cache"))
        .env("LTX_BUNDLE_URL", &bundles)
        .env("LTX_PROXY_URL", &proxy)
        .args(["--json", "compile"])
        .arg(&doc)
        .arg("--engine-bin")
        .arg(&engine)
        .assert()
        .success();
    let payload = parse_json(&assert);
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["details"]["engine"], "pdflatex");
    assert_eq!(payload["details"]["bundles_loaded"], 8);
    assert_eq!(payload["details"]["packages_fetched"], 0);
    assert_eq!(payload["details"]["retries"], 0);

    let pdf = temp.path().join("hello.pdf");
    let bytes = std::fs::read(&pdf).expect("pdf written");
    assert!(bytes.starts_with(b"%PDF"));
}

#[test]
fn missing_package_is_recovered_in_one_retry() {
    let temp = tempfile::tempdir().expect("tempdir");
    let bundles = temp.path().join("bundles");
    let proxy = temp.path().join("proxy");
    publish_distribution(&bundles);
    publish_proxy_package(&proxy, "lingmacros");
    let engine = engine_requiring_file(
        temp.path(),
        "texlive/texmf-dist/tex/latex/lingmacros/lingmacros.sty",
        "lingmacros.sty",
    );
    let doc = temp.path().join("paper.tex");
    std::fs::write(
        &doc,
        "\\documentclass{article}\\usepackage{lingmacros}\\begin{document}x\\end{document}",
    )
    .expect("doc");

    let assert = cargo_bin_cmd!("ltx")
        .env("LTX_CACHE_PATH", temp.path().join("cache"))
        .env("LTX_BUNDLE_URL", &bundles)
        .env("LTX_PROXY_URL", &proxy)
        .args(["--json", "compile"])
        .arg(&doc)
        .arg("--engine-bin")
        .arg(&engine)
        .assert()
        .success();
    let payload = parse_json(&assert);
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["details"]["retries"], 1);
    assert_eq!(payload["details"]["packages_fetched"], 1);
    assert!(temp.path().join("paper.pdf").exists());
}

#[test]
fn unresolvable_package_fails_and_negative_cache_spares_the_network() {
    let temp = tempfile::tempdir().expect("tempdir");
    let bundles = temp.path().join("bundles");
    let proxy = temp.path().join("proxy");
    publish_distribution(&bundles);
    std::fs::create_dir_all(&proxy).expect("proxy");
    let engine = engine_always_missing(temp.path(), "definitely-not-a-package.sty");
    let doc = temp.path().join("broken.tex");
    std::fs::write(
        &doc,
        "\\documentclass{article}\\usepackage{definitely-not-a-package}\\begin{document}x\\end{document}",
    )
    .expect("doc");

    let first = cargo_bin_cmd!("ltx")
        .env("LTX_CACHE_PATH", temp.path().join("cache"))
        .env("LTX_BUNDLE_URL", &bundles)
        .env("LTX_PROXY_URL", &proxy)
        .args(["--json", "compile"])
        .arg(&doc)
        .arg("--engine-bin")
        .arg(&engine)
        .assert()
        .failure();
    let payload = parse_json(&first);
    assert_eq!(payload["status"], "failed");
    assert!(payload["details"]["bytes_downloaded"].as_u64().expect("bytes") > 0);

    // Same document again: bundles come from the blob store and the missing
    // package from the negative cache, so nothing is downloaded.
    let second = cargo_bin_cmd!("ltx")
        .env("LTX_CACHE_PATH", temp.path().join("cache"))
        .env("LTX_BUNDLE_URL", &bundles)
        .env("LTX_PROXY_URL", &proxy)
        .args(["--json", "compile"])
        .arg(&doc)
        .arg("--engine-bin")
        .arg(&engine)
        .assert()
        .failure();
    let payload = parse_json(&second);
    assert_eq!(payload["status"], "failed");
    assert_eq!(payload["details"]["bytes_downloaded"], 0);
}

#[test]
fn forced_engine_overrides_selection() {
    let temp = tempfile::tempdir().expect("tempdir");
    let bundles = temp.path().join("bundles");
    let proxy = temp.path().join("proxy");
    publish_distribution(&bundles);
    std::fs::create_dir_all(&proxy).expect("proxy");
    let engine = succeeding_engine(temp.path());
    let doc = temp.path().join("hello.tex");
    std::fs::write(&doc, "\\documentclass{article}\\begin{document}Hi\\end{document}")
        .expect("doc");

    let assert = cargo_bin_cmd!("ltx")
        .env("LTX_CACHE_PATH", temp.path().join("cache"))
        .env("LTX_BUNDLE_URL", &bundles)
        .env("LTX_PROXY_URL", &proxy)
        .args(["--json", "compile", "--engine", "xelatex"])
        .arg(&doc)
        .arg("--engine-bin")
        .arg(&engine)
        .assert()
        .success();
    let payload = parse_json(&assert);
    assert_eq!(payload["details"]["engine"], "xelatex");
}
