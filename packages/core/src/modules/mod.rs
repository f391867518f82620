//! Analysis Modules
//!
//! Every analysis unit implements [`AnalysisModule`]: static metadata, a
//! compiled default configuration, a deterministic cache key and the
//! `run` computation itself. The engine never looks inside a module; it
//! only resolves, caches, records and forwards what `run` returns.

pub mod conversion_drop;
pub mod roi_summary;
pub mod spend_spike;
pub mod types;
pub mod zone_quality;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::registry::ModuleRegistry;
use crate::source::MetricsSource;

pub use conversion_drop::ConversionDropModule;
pub use roi_summary::RoiSummaryModule;
pub use spend_spike::SpendSpikeModule;
pub use types::*;
pub use zone_quality::ZoneQualityModule;

/// Modules whose alerts are forwarded unless the operator overrides the list.
pub const CRITICAL_MODULES: &[&str] = &[
    spend_spike::MODULE_ID,
    conversion_drop::MODULE_ID,
    zone_quality::MODULE_ID,
];

/// A pluggable analysis unit.
#[async_trait]
pub trait AnalysisModule: Send + Sync {
    fn metadata(&self) -> ModuleMetadata;

    /// Configuration used when the store holds none for this module.
    fn default_config(&self) -> ModuleConfig {
        let metadata = self.metadata();
        let mut config = ModuleConfig::new(metadata.id);
        for parameter in metadata.parameters {
            if !parameter.default.is_null() {
                config.params.insert(parameter.name, parameter.default);
            }
        }
        config
    }

    /// Must be a pure function of `config`: equal configs give equal keys.
    fn cache_key(&self, config: &ModuleConfig) -> String {
        fingerprint(&config.params)
    }

    async fn run(&self, config: &ModuleConfig) -> Result<AnalysisOutput, ModuleError>;
}

/// SHA-256 of the canonical JSON encoding of `params`.
///
/// `BTreeMap` and `serde_json::Map` both serialise keys in sorted order, so
/// the encoding does not depend on insertion order.
pub fn fingerprint(params: &BTreeMap<String, Value>) -> String {
    let canonical = serde_json::to_vec(params).unwrap_or_default();
    hex::encode(Sha256::digest(&canonical))
}

/// Register every built-in module, each reading from `source`.
pub fn register_builtin(registry: &ModuleRegistry, source: Arc<dyn MetricsSource>) {
    let s = source.clone();
    registry.register(move || Box::new(SpendSpikeModule::new(s.clone())));
    let s = source.clone();
    registry.register(move || Box::new(ConversionDropModule::new(s.clone())));
    let s = source.clone();
    registry.register(move || Box::new(ZoneQualityModule::new(s.clone())));
    registry.register(move || Box::new(RoiSummaryModule::new(source.clone())));
}

/// The day being analysed: the `as_of` parameter, or yesterday (UTC).
pub(crate) fn resolve_as_of(config: &ModuleConfig) -> Result<NaiveDate, ModuleError> {
    match config.params.get("as_of") {
        None | Some(Value::Null) => Ok(Utc::now().date_naive() - Duration::days(1)),
        Some(Value::String(raw)) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|_| ModuleError::invalid_params(format!("as_of must be YYYY-MM-DD, got '{}'", raw))),
        Some(_) => Err(ModuleError::invalid_params("as_of must be a date string")),
    }
}

/// Cache key for date-relative modules: the params with `as_of` pinned to
/// the day that would actually be analysed, so a default config keys to a
/// different entry once the UTC date rolls over.
pub(crate) fn dated_cache_key(config: &ModuleConfig) -> String {
    let mut params = config.params.clone();
    if let Ok(as_of) = resolve_as_of(config) {
        params.insert("as_of".to_string(), Value::String(as_of.format("%Y-%m-%d").to_string()));
    }
    fingerprint(&params)
}

/// Schema entry shared by modules that accept an explicit analysis date.
pub(crate) fn as_of_parameter() -> ParameterSpec {
    ParameterSpec::new(
        "as_of",
        ParameterKind::String,
        "Day to analyse (YYYY-MM-DD); defaults to yesterday",
        Value::Null,
    )
}

/// Schema entry for an optional campaign filter.
pub(crate) fn campaign_filter_parameter() -> ParameterSpec {
    ParameterSpec::new(
        "campaign_ids",
        ParameterKind::List,
        "Restrict analysis to these campaigns; empty means all",
        Value::Array(Vec::new()),
    )
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::mock_source::MockMetricsSource;
    use proptest::prelude::*;
    use serde_json::json;

    fn params_strategy() -> impl Strategy<Value = BTreeMap<String, Value>> {
        prop::collection::btree_map(
            "[a-z_]{1,12}",
            prop_oneof![
                any::<i64>().prop_map(Value::from),
                any::<bool>().prop_map(Value::from),
                "[a-zA-Z0-9 ]{0,16}".prop_map(Value::from),
                prop::collection::vec("[a-z0-9]{1,6}", 0..4).prop_map(|v| json!(v)),
            ],
            0..8,
        )
    }

    proptest! {
        #[test]
        fn equal_params_give_equal_fingerprints(params in params_strategy()) {
            let copy = params.clone();
            prop_assert_eq!(fingerprint(&params), fingerprint(&copy));
        }

        #[test]
        fn insertion_order_does_not_change_fingerprint(params in params_strategy()) {
            let mut reversed = BTreeMap::new();
            for (k, v) in params.iter().rev() {
                reversed.insert(k.clone(), v.clone());
            }
            prop_assert_eq!(fingerprint(&params), fingerprint(&reversed));
        }

        #[test]
        fn module_cache_key_is_deterministic(params in params_strategy()) {
            let module = SpendSpikeModule::new(Arc::new(MockMetricsSource::new()));
            let mut c1 = ModuleConfig::new("spend_spike");
            c1.params = params.clone();
            let mut c2 = ModuleConfig::new("spend_spike");
            c2.params = params;
            prop_assert_eq!(module.cache_key(&c1), module.cache_key(&c2));
        }
    }

    #[test]
    fn different_params_give_different_fingerprints() {
        let a = ModuleConfig::new("x").with_param("a", 1);
        let b = ModuleConfig::new("x").with_param("a", 2);
        assert_ne!(fingerprint(&a.params), fingerprint(&b.params));
    }

    #[test]
    fn nested_object_key_order_is_canonical() {
        let a: BTreeMap<String, Value> =
            serde_json::from_str(r#"{"f": {"x": 1, "y": 2}}"#).unwrap();
        let b: BTreeMap<String, Value> =
            serde_json::from_str(r#"{"f": {"y": 2, "x": 1}}"#).unwrap();
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn default_config_includes_non_null_parameter_defaults() {
        let module = SpendSpikeModule::new(Arc::new(MockMetricsSource::new()));
        let config = module.default_config();

        assert_eq!(config.module_id, "spend_spike");
        assert!(config.params.contains_key("spike_ratio"));
        assert!(!config.params.contains_key("as_of"));
    }

    #[test]
    fn resolve_as_of_parses_explicit_date() {
        let config = ModuleConfig::new("x").with_param("as_of", "2024-03-05");
        assert_eq!(
            resolve_as_of(&config).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
        );
    }

    #[test]
    fn resolve_as_of_rejects_garbage() {
        let config = ModuleConfig::new("x").with_param("as_of", "yesterday");
        assert!(resolve_as_of(&config).is_err());
    }

    #[test]
    fn dated_cache_key_separates_analysis_days() {
        let monday = ModuleConfig::new("x").with_param("as_of", "2024-03-04");
        let tuesday = ModuleConfig::new("x").with_param("as_of", "2024-03-05");
        assert_ne!(dated_cache_key(&monday), dated_cache_key(&tuesday));
    }

    #[test]
    fn dated_cache_key_pins_missing_as_of_to_yesterday() {
        let yesterday = (Utc::now().date_naive() - Duration::days(1))
            .format("%Y-%m-%d")
            .to_string();
        let implicit = ModuleConfig::new("x").with_param("lookback_days", 7);
        let explicit = implicit.clone().with_param("as_of", yesterday);

        assert_eq!(dated_cache_key(&implicit), dated_cache_key(&explicit));
        assert_ne!(dated_cache_key(&implicit), fingerprint(&implicit.params));
    }

    #[test]
    fn register_builtin_registers_every_module() {
        let registry = ModuleRegistry::new();
        register_builtin(&registry, Arc::new(MockMetricsSource::new()));

        assert_eq!(registry.len(), 4);
        for id in CRITICAL_MODULES {
            assert!(registry.contains(id));
        }
        assert!(registry.contains(roi_summary::MODULE_ID));
    }
}
