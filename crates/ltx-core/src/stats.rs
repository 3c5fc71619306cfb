use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

use ltx_domain::{Engine, EngineStats};

use crate::store::Store;

/// Flag recorded when a pdflatex run trips font expansion on bitmap fonts;
/// the selector reroutes the fingerprint to xelatex afterwards.
pub const LEGACY_FONT_EXPANSION_FLAG: &str = "triggers-legacy-font-expansion";

/// What one finished compile reports back into the learning store.
#[derive(Debug, Clone)]
pub struct CompileReport {
    pub engine: Engine,
    pub success: bool,
    pub time_ms: f64,
    pub triggered_legacy_font_expansion: bool,
}

/// Persistence for learned engine statistics, keyed by preamble fingerprint.
///
/// Statistics live at `stats:<fingerprint>` as a JSON array with one entry
/// per engine; boolean flags at `flag:<fingerprint>:<name>`.
pub struct StatsStore {
    store: Arc<Store>,
}

impl StatsStore {
    #[must_use]
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn load(&self, fingerprint: &str) -> Vec<EngineStats> {
        self.store
            .records()
            .get_record(&format!("stats:{fingerprint}"))
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn legacy_font_expansion(&self, fingerprint: &str) -> bool {
        self.store
            .records()
            .get_record(&format!("flag:{fingerprint}:{LEGACY_FONT_EXPANSION_FLAG}"))
            .and_then(|value| value.as_bool())
            .unwrap_or(false)
    }

    /// Fold one compile outcome into the fingerprint's statistics.
    pub fn record_result(&self, fingerprint: &str, report: &CompileReport) {
        let mut entries = self.load(fingerprint);
        let idx = match entries.iter().position(|e| e.engine == report.engine) {
            Some(idx) => idx,
            None => {
                entries.push(EngineStats::new(report.engine));
                entries.len() - 1
            }
        };
        entries[idx].record(report.success, report.time_ms, now_ms());

        match serde_json::to_value(&entries) {
            Ok(value) => {
                let key = format!("stats:{fingerprint}");
                if let Err(err) = self.store.records().put_record(&key, &value) {
                    warn!(fingerprint, %err, "engine statistics not persisted");
                }
            }
            Err(err) => warn!(fingerprint, %err, "engine statistics not serializable"),
        }

        if report.triggered_legacy_font_expansion && report.engine == Engine::Pdflatex {
            let key = format!("flag:{fingerprint}:{LEGACY_FONT_EXPANSION_FLAG}");
            if let Err(err) = self
                .store
                .records()
                .put_record(&key, &serde_json::Value::Bool(true))
            {
                warn!(fingerprint, %err, "legacy font flag not persisted");
            }
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats_store() -> (tempfile::TempDir, StatsStore) {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(Store::open(temp.path()).expect("store"));
        (temp, StatsStore::new(store))
    }

    fn report(engine: Engine, success: bool, time_ms: f64) -> CompileReport {
        CompileReport {
            engine,
            success,
            time_ms,
            triggered_legacy_font_expansion: false,
        }
    }

    #[test]
    fn results_accumulate_per_engine() {
        let (_temp, stats) = stats_store();
        stats.record_result("p_1", &report(Engine::Pdflatex, true, 100.0));
        stats.record_result("p_1", &report(Engine::Pdflatex, true, 300.0));
        stats.record_result("p_1", &report(Engine::Xelatex, false, 50.0));

        let loaded = stats.load("p_1");
        assert_eq!(loaded.len(), 2);
        let pdf = loaded.iter().find(|e| e.engine == Engine::Pdflatex).unwrap();
        assert_eq!(pdf.compile_count, 2);
        assert!((pdf.running_avg_ms - 200.0).abs() < 1e-9);
    }

    #[test]
    fn fingerprints_are_isolated() {
        let (_temp, stats) = stats_store();
        stats.record_result("p_1", &report(Engine::Pdflatex, true, 100.0));
        assert!(stats.load("p_2").is_empty());
    }

    #[test]
    fn legacy_flag_is_set_only_for_pdflatex() {
        let (_temp, stats) = stats_store();
        let mut xe = report(Engine::Xelatex, false, 10.0);
        xe.triggered_legacy_font_expansion = true;
        stats.record_result("p_1", &xe);
        assert!(!stats.legacy_font_expansion("p_1"));

        let mut pdf = report(Engine::Pdflatex, false, 10.0);
        pdf.triggered_legacy_font_expansion = true;
        stats.record_result("p_1", &pdf);
        assert!(stats.legacy_font_expansion("p_1"));
    }
}
