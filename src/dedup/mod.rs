use std::collections::BTreeMap;
use std::fmt::Write;

use sha2::{Digest, Sha256};

use crate::store::{StoreError, TelemetryTxn};

/// Width of a payload fingerprint in hex characters. Collisions are a dedup
/// heuristic concern, not a security property, so a truncated digest is
/// plenty.
pub const FINGERPRINT_HEX_LEN: usize = 16;

/// Fingerprints an entire payload value map.
///
/// Keys are taken in lexicographic order, values rounded to two decimal
/// places to absorb transport-level float noise, serialized as compact
/// key-sorted JSON, hashed with SHA-256, and truncated.
pub fn fingerprint(values: &BTreeMap<String, Option<f64>>) -> String {
    let mut canonical = String::with_capacity(2 + values.len() * 16);
    canonical.push('{');

    for (idx, (key, value)) in values.iter().enumerate() {
        if idx > 0 {
            canonical.push(',');
        }
        // Value's Display renders a JSON-escaped quoted string.
        let _ = write!(canonical, "{}:", serde_json::Value::String(key.clone()));
        match value {
            Some(v) => {
                let _ = write!(canonical, "{v:.2}");
            }
            None => canonical.push_str("null"),
        }
    }

    canonical.push('}');

    let digest = Sha256::digest(canonical.as_bytes());
    let mut out = String::with_capacity(FINGERPRINT_HEX_LEN);
    for byte in digest.iter().take(FINGERPRINT_HEX_LEN / 2) {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Whether this fingerprint matches the device's most recently accepted
/// payload. Runs once per payload, before any per-parameter processing.
pub fn is_duplicate<T: TelemetryTxn>(
    txn: &T,
    device_id: &str,
    fingerprint: &str,
) -> Result<bool, StoreError> {
    Ok(txn.last_payload_hash(device_id)?.as_deref() == Some(fingerprint))
}

/// Records the fingerprint of an accepted payload.
pub fn record_fingerprint<T: TelemetryTxn>(
    txn: &T,
    device_id: &str,
    fingerprint: &str,
) -> Result<(), StoreError> {
    txn.record_payload_hash(device_id, fingerprint)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, Option<f64>)]) -> BTreeMap<String, Option<f64>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect()
    }

    #[test]
    fn test_fingerprint_shape() {
        let fp = fingerprint(&values(&[("ENGINE_RPM", Some(1500.0))]));
        assert_eq!(fp.len(), FINGERPRINT_HEX_LEN);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_ignores_insertion_order() {
        let a = fingerprint(&values(&[("B", Some(2.0)), ("A", Some(1.0))]));
        let b = fingerprint(&values(&[("A", Some(1.0)), ("B", Some(2.0))]));
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_absorbs_float_noise() {
        let a = fingerprint(&values(&[("SPEED", Some(64.2500001))]));
        let b = fingerprint(&values(&[("SPEED", Some(64.2499998))]));
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_distinguishes_values_and_keys() {
        let base = fingerprint(&values(&[("SPEED", Some(64.25))]));
        assert_ne!(base, fingerprint(&values(&[("SPEED", Some(64.26))])));
        assert_ne!(base, fingerprint(&values(&[("RPM", Some(64.25))])));
        assert_ne!(base, fingerprint(&values(&[("SPEED", None)])));
    }

    #[test]
    fn test_fingerprint_of_empty_map_is_stable() {
        assert_eq!(
            fingerprint(&BTreeMap::new()),
            fingerprint(&BTreeMap::new())
        );
    }

    #[test]
    fn test_duplicate_round_trip() {
        use crate::store::sqlite::SqliteStore;
        use crate::store::TelemetryStore;

        let store = SqliteStore::open_in_memory().expect("open");
        let txn = store.begin().expect("begin");

        let fp = fingerprint(&values(&[("ENGINE_RPM", Some(1500.0))]));
        assert!(!is_duplicate(&txn, "dev-1", &fp).expect("first check"));

        record_fingerprint(&txn, "dev-1", &fp).expect("record");
        assert!(is_duplicate(&txn, "dev-1", &fp).expect("second check"));

        // A different device is unaffected.
        assert!(!is_duplicate(&txn, "dev-2", &fp).expect("other device"));
        txn.commit().expect("commit");
    }
}
