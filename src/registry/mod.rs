use dashmap::DashMap;
use tracing::{debug, info};

use crate::payload::ParameterHint;
use crate::store::{ParameterCategory, ParameterDefinition, StoreError, TelemetryTxn};

/// Vendor classes whose parameters surface on the dashboard by default.
const DASHBOARD_CLASSES: &[&str] = &["speed", "frequency", "temperature", "voltage", "battery"];

/// Maps a vendor-supplied class hint to a display category.
pub fn classify(class_hint: Option<&str>) -> ParameterCategory {
    match class_hint {
        Some("temperature") => ParameterCategory::Temperature,
        Some("speed" | "distance" | "frequency" | "pressure" | "vacuum" | "power_factor") => {
            ParameterCategory::Engine
        }
        Some("voltage" | "battery") => ParameterCategory::Electrical,
        _ => ParameterCategory::Other,
    }
}

/// Derives a human display name from a sensor key: underscores become
/// spaces, letters are title-cased per word segment.
///
/// `"ENGINE_RPM"` -> `"Engine Rpm"`, `"A6-Odometer"` -> `"A6-Odometer"`.
pub fn display_name(param_key: &str) -> String {
    let mut out = String::with_capacity(param_key.len());
    let mut at_word_start = true;

    for ch in param_key.chars() {
        if ch == '_' {
            out.push(' ');
            at_word_start = true;
        } else if ch.is_alphabetic() {
            if at_word_start {
                out.extend(ch.to_uppercase());
            } else {
                out.extend(ch.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(ch);
            at_word_start = true;
        }
    }

    out
}

/// Lazily-populated registry of parameter definitions.
///
/// All mutation funnels through [`get_or_register`](Self::get_or_register):
/// unknown keys are created with classified defaults, known keys may have
/// unit/class metadata back-filled once. Definitions are never deleted here;
/// curation is manual.
///
/// A read-through cache fronts the store. The cache may briefly run ahead of
/// durable state if a payload transaction aborts after registering a new key,
/// so the pipeline clears it on any storage error.
pub struct ParameterRegistry {
    cache: DashMap<String, ParameterDefinition>,
}

impl ParameterRegistry {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }

    /// Looks up a parameter definition, creating it on first sighting.
    ///
    /// An existing definition is returned unchanged unless the hint carries
    /// metadata for a field that is still unset, in which case that field is
    /// back-filled (set fields are never overwritten).
    pub fn get_or_register<T: TelemetryTxn>(
        &self,
        txn: &T,
        param_key: &str,
        hint: Option<&ParameterHint>,
    ) -> Result<ParameterDefinition, StoreError> {
        if let Some(cached) = self.cache.get(param_key) {
            let def = cached.clone();
            drop(cached);
            return self.backfill_if_needed(txn, def, hint);
        }

        if let Some(def) = txn.parameter(param_key)? {
            let def = self.backfill_if_needed(txn, def, hint)?;
            self.cache.insert(param_key.to_string(), def.clone());
            return Ok(def);
        }

        let def = Self::new_definition(param_key, hint);
        txn.insert_parameter(&def)?;
        self.cache.insert(param_key.to_string(), def.clone());
        info!(
            param_key,
            category = def.category.as_str(),
            dashboard = def.show_on_dashboard,
            "registered new parameter",
        );
        Ok(def)
    }

    /// Drops all cached definitions. Called after a failed payload
    /// transaction so the cache cannot disagree with durable state.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    fn backfill_if_needed<T: TelemetryTxn>(
        &self,
        txn: &T,
        mut def: ParameterDefinition,
        hint: Option<&ParameterHint>,
    ) -> Result<ParameterDefinition, StoreError> {
        let Some(hint) = hint else {
            return Ok(def);
        };

        let fill_unit = def.unit.is_none() && hint.unit.is_some();
        let fill_class = def.param_class.is_none() && hint.class.is_some();

        if !fill_unit && !fill_class {
            return Ok(def);
        }

        let unit = if fill_unit { hint.unit.as_deref() } else { None };
        let class = if fill_class { hint.class.as_deref() } else { None };
        let category = classify(class);
        txn.backfill_parameter(&def.param_key, unit, class, category)?;

        if fill_unit {
            def.unit = hint.unit.clone();
        }
        if fill_class {
            def.param_class = hint.class.clone();
            if def.category == ParameterCategory::Other {
                def.category = category;
            }
        }

        debug!(param_key = %def.param_key, "back-filled parameter metadata");
        self.cache.insert(def.param_key.clone(), def.clone());
        Ok(def)
    }

    fn new_definition(param_key: &str, hint: Option<&ParameterHint>) -> ParameterDefinition {
        let unit = hint.and_then(|h| h.unit.clone());
        let class = hint.and_then(|h| h.class.clone());
        let category = classify(class.as_deref());
        let show_on_dashboard = class
            .as_deref()
            .is_some_and(|c| DASHBOARD_CLASSES.contains(&c));

        ParameterDefinition {
            param_key: param_key.to_string(),
            display_name: display_name(param_key),
            unit,
            param_class: class,
            category,
            warning_min: None,
            warning_max: None,
            show_on_dashboard,
            archive_only: !show_on_dashboard,
            // Store every admitted sample until operators tune this.
            storage_interval_secs: 0,
        }
    }
}

impl Default for ParameterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
