use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::engine::Engine;

/// Bundles every compile mounts regardless of document content.
pub const CORE_BUNDLES: [&str; 5] = ["core", "latex-base", "l3", "graphics", "tools"];

// Until the runtime registry is loaded, a handful of well-known packages map
// to the bundles the build tooling always publishes. The runtime-loaded
// package-map.json is authoritative and replaces this table entirely.
const BOOTSTRAP_PACKAGE_MAP: [(&str, &str); 12] = [
    ("article", "latex-base"),
    ("report", "latex-base"),
    ("book", "latex-base"),
    ("letter", "latex-base"),
    ("amsmath", "amsmath"),
    ("amssymb", "amsfonts"),
    ("amsfonts", "amsfonts"),
    ("graphicx", "graphics"),
    ("xcolor", "graphics"),
    ("expl3", "l3"),
    ("fontspec", "fontspec"),
    ("unicode-math", "unicode-math"),
];

/// Where a canonical path lives inside the published bundle set.
#[derive(Clone, Debug, Deserialize)]
pub struct FileLocation {
    pub bundle: String,
    pub start: u64,
    pub end: u64,
}

// package-deps.json is written by the bundle tooling either as a bare object
// or wrapped as {"packages": {...}} next to a $comment key.
#[derive(Deserialize)]
#[serde(untagged)]
enum PackageDepsFile {
    Wrapped {
        packages: BTreeMap<String, Vec<String>>,
    },
    Bare(BTreeMap<String, Vec<String>>),
}

/// The loaded bundle registry: read-only once constructed.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    bundle_order: Vec<String>,
    bundles: HashSet<String>,
    package_map: HashMap<String, String>,
    file_map: HashMap<String, FileLocation>,
    bundle_deps: HashMap<String, Vec<String>>,
    package_deps: HashMap<String, Vec<String>>,
}

impl Registry {
    pub fn from_manifests(
        registry_json: &[u8],
        package_map_json: &[u8],
        file_manifest_json: &[u8],
        bundle_deps_json: Option<&[u8]>,
        package_deps_json: Option<&[u8]>,
    ) -> Result<Self> {
        let bundle_order: Vec<String> =
            serde_json::from_slice(registry_json).context("invalid registry.json")?;
        let package_map: HashMap<String, String> =
            serde_json::from_slice(package_map_json).context("invalid package-map.json")?;
        let file_map: HashMap<String, FileLocation> =
            serde_json::from_slice(file_manifest_json).context("invalid file-manifest.json")?;
        let bundle_deps: HashMap<String, Vec<String>> = match bundle_deps_json {
            Some(bytes) => serde_json::from_slice(bytes).context("invalid bundle-deps.json")?,
            None => HashMap::new(),
        };
        let package_deps = match package_deps_json {
            Some(bytes) => {
                let parsed: PackageDepsFile =
                    serde_json::from_slice(bytes).context("invalid package-deps.json")?;
                match parsed {
                    PackageDepsFile::Wrapped { packages } | PackageDepsFile::Bare(packages) => {
                        packages.into_iter().collect()
                    }
                }
            }
            None => HashMap::new(),
        };
        let bundles = bundle_order.iter().cloned().collect();
        Ok(Self {
            bundle_order,
            bundles,
            package_map,
            file_map,
            bundle_deps,
            package_deps,
        })
    }

    /// The compiled-in bootstrap registry, used before `load_registry`
    /// completes.
    #[must_use]
    pub fn bootstrap() -> Self {
        let mut bundle_order: Vec<String> =
            CORE_BUNDLES.iter().map(|name| (*name).to_string()).collect();
        for engine in [Engine::Pdflatex, Engine::Xelatex, Engine::Lualatex] {
            bundle_order.push(engine.format_bundle());
        }
        for name in ["fonts-cm", "amsfonts", "fontspec", "unicode-math", "amsmath"] {
            bundle_order.push(name.to_string());
        }
        let bundles = bundle_order.iter().cloned().collect();
        let package_map = BOOTSTRAP_PACKAGE_MAP
            .iter()
            .map(|(pkg, bundle)| ((*pkg).to_string(), (*bundle).to_string()))
            .collect();
        Self {
            bundle_order,
            bundles,
            package_map,
            file_map: HashMap::new(),
            bundle_deps: HashMap::new(),
            package_deps: HashMap::new(),
        }
    }

    #[must_use]
    pub fn contains_bundle(&self, name: &str) -> bool {
        self.bundles.contains(name)
    }

    #[must_use]
    pub fn bundle_names(&self) -> &[String] {
        &self.bundle_order
    }

    #[must_use]
    pub fn bundle_for_package(&self, package: &str) -> Option<&str> {
        self.package_map.get(package).map(String::as_str)
    }

    #[must_use]
    pub fn bundle_for_path(&self, canonical_path: &str) -> Option<&FileLocation> {
        self.file_map.get(canonical_path)
    }

    /// Compute the ordered bundle closure for a compile.
    ///
    /// Seeds the fixed core set, adds the engine's format and font bundles,
    /// then follows package-to-bundle mappings, bundle dependencies and
    /// package dependencies. Cycle-safe, idempotent, and dependency-before-
    /// dependent in the returned order; packages with no mapping are left for
    /// the fetcher at compile time.
    #[must_use]
    pub fn resolve_bundles(&self, packages: &[String], engine: Engine) -> Vec<String> {
        let mut closure = Closure {
            registry: self,
            ordered: Vec::new(),
            seen_bundles: HashSet::new(),
            seen_packages: HashSet::new(),
        };

        for name in CORE_BUNDLES {
            closure.add_bundle(name);
        }
        for name in engine_bundles(engine) {
            closure.add_bundle(&name);
        }
        for package in packages {
            closure.add_package(package);
        }
        closure.ordered
    }
}

fn engine_bundles(engine: Engine) -> [String; 3] {
    match engine {
        Engine::Pdflatex => [
            engine.format_bundle(),
            "fonts-cm".to_string(),
            "amsfonts".to_string(),
        ],
        Engine::Xelatex | Engine::Lualatex => [
            engine.format_bundle(),
            "fontspec".to_string(),
            "unicode-math".to_string(),
        ],
    }
}

struct Closure<'a> {
    registry: &'a Registry,
    ordered: Vec<String>,
    seen_bundles: HashSet<String>,
    seen_packages: HashSet<String>,
}

impl Closure<'_> {
    fn add_bundle(&mut self, name: &str) {
        if !self.registry.contains_bundle(name) || !self.seen_bundles.insert(name.to_string()) {
            return;
        }
        if let Some(deps) = self.registry.bundle_deps.get(name) {
            for dep in deps.clone() {
                self.add_bundle(&dep);
            }
        }
        self.ordered.push(name.to_string());
    }

    fn add_package(&mut self, package: &str) {
        if !self.seen_packages.insert(package.to_string()) {
            return;
        }
        if let Some(bundle) = self.registry.package_map.get(package) {
            self.add_bundle(&bundle.clone());
        }
        if let Some(deps) = self.registry.package_deps.get(package) {
            for dep in deps.clone() {
                self.add_package(&dep);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registry() -> Registry {
        let registry_json = br#"["core","latex-base","l3","graphics","tools",
            "fmt-pdflatex","fmt-xelatex","fonts-cm","amsfonts","fontspec","unicode-math",
            "amsmath","listings-bundle"]"#;
        let package_map = br#"{
            "article": "latex-base",
            "amsmath": "amsmath",
            "listings": "listings-bundle",
            "fontspec": "fontspec",
            "unicode-math": "unicode-math"
        }"#;
        let file_manifest = br#"{
            "/texlive/texmf-dist/tex/latex/amsmath/amsmath.sty":
                {"bundle": "amsmath", "start": 0, "end": 10}
        }"#;
        let bundle_deps: &[u8] = br#"{"listings-bundle": ["tools", "amsmath"]}"#;
        let package_deps: &[u8] = br#"{
            "$comment": "extracted from bundle contents",
            "packages": {"listings": ["keyval"], "keyval": ["listings"]}
        }"#;
        Registry::from_manifests(
            registry_json,
            package_map,
            file_manifest,
            Some(bundle_deps),
            Some(package_deps),
        )
        .expect("registry")
    }

    fn names(packages: &[&str], engine: Engine) -> Vec<String> {
        let packages: Vec<String> = packages.iter().map(|p| (*p).to_string()).collect();
        test_registry().resolve_bundles(&packages, engine)
    }

    #[test]
    fn hello_world_closure_matches_the_pdflatex_core() {
        let closure = names(&["article"], Engine::Pdflatex);
        assert_eq!(
            closure,
            [
                "core",
                "latex-base",
                "l3",
                "graphics",
                "tools",
                "fmt-pdflatex",
                "fonts-cm",
                "amsfonts"
            ]
        );
    }

    #[test]
    fn xelatex_closure_brings_fontspec_and_unicode_math() {
        let closure = names(&["article", "fontspec"], Engine::Xelatex);
        assert!(closure.contains(&"fmt-xelatex".to_string()));
        assert!(closure.contains(&"fontspec".to_string()));
        assert!(closure.contains(&"unicode-math".to_string()));
        assert!(!closure.contains(&"fmt-pdflatex".to_string()));
    }

    #[test]
    fn bundle_dependencies_precede_dependents() {
        let closure = names(&["listings"], Engine::Pdflatex);
        let listings = closure.iter().position(|n| n == "listings-bundle").unwrap();
        let tools = closure.iter().position(|n| n == "tools").unwrap();
        let amsmath = closure.iter().position(|n| n == "amsmath").unwrap();
        assert!(tools < listings);
        assert!(amsmath < listings);
    }

    #[test]
    fn closure_is_idempotent_and_monotone() {
        let once = names(&["amsmath"], Engine::Pdflatex);
        let twice = names(&["amsmath", "amsmath"], Engine::Pdflatex);
        assert_eq!(once, twice);

        let with_more = names(&["amsmath", "article"], Engine::Pdflatex);
        for bundle in &once {
            assert!(with_more.contains(bundle), "{bundle} dropped");
        }
    }

    #[test]
    fn package_dependency_cycles_terminate() {
        // listings -> keyval -> listings in package-deps.
        let closure = names(&["listings"], Engine::Pdflatex);
        assert!(closure.contains(&"listings-bundle".to_string()));
    }

    #[test]
    fn unmapped_packages_are_left_to_the_fetcher() {
        let base = names(&["article"], Engine::Pdflatex);
        let with_unknown = names(&["article", "lingmacros"], Engine::Pdflatex);
        assert_eq!(base, with_unknown);
    }

    #[test]
    fn bare_package_deps_shape_is_accepted() {
        let deps: &[u8] = br#"{"a": ["b"]}"#;
        let registry = Registry::from_manifests(
            br#"["core","latex-base","l3","graphics","tools"]"#,
            br#"{}"#,
            br#"{}"#,
            None,
            Some(deps),
        )
        .expect("registry");
        assert_eq!(registry.package_deps.get("a"), Some(&vec!["b".to_string()]));
    }

    #[test]
    fn bootstrap_registry_maps_the_usual_suspects() {
        let registry = Registry::bootstrap();
        assert_eq!(registry.bundle_for_package("article"), Some("latex-base"));
        assert_eq!(registry.bundle_for_package("amsmath"), Some("amsmath"));
        assert!(registry.contains_bundle("fmt-xelatex"));
    }

    #[test]
    fn file_manifest_lookups_resolve_to_bundles() {
        let registry = test_registry();
        let loc = registry
            .bundle_for_path("/texlive/texmf-dist/tex/latex/amsmath/amsmath.sty")
            .expect("location");
        assert_eq!(loc.bundle, "amsmath");
        assert_eq!(loc.end, 10);
    }
}
