//! Series key derivation
//!
//! A series key is the CRC-64 hash of a canonical encoding of the metric
//! name and its sorted label set. The encoding is exposed as a pure
//! function so key derivation is unit-testable in isolation, and the sort
//! guarantees that label insertion order never affects the key.

use crc::{Crc, CRC_64_ECMA_182};

use crate::types::{Labels, SeriesKey};

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// Canonical text form of a series identity: `name{k1=v1,k2=v2}`
///
/// Labels come out sorted by key (the `Labels` map is ordered), so any
/// permutation of the same pairs produces the same encoding. A metric
/// without labels encodes as the bare name.
pub fn canonical_encoding(name: &str, labels: &Labels) -> String {
    if labels.is_empty() {
        return name.to_string();
    }

    let mut out = String::with_capacity(name.len() + labels.len() * 16);
    out.push_str(name);
    out.push('{');
    let mut first = true;
    for (k, v) in labels {
        if !first {
            out.push(',');
        }
        first = false;
        out.push_str(k);
        out.push('=');
        out.push_str(v);
    }
    out.push('}');
    out
}

/// Derive the deterministic series key for a (name, labels) pair
pub fn series_key(name: &str, labels: &Labels) -> SeriesKey {
    SeriesKey(CRC64.checksum(canonical_encoding(name, labels).as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels_of(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_key_ignores_label_order() {
        // BTreeMap sorts on insert, so build the two sets in opposite order
        let mut l1 = Labels::new();
        l1.insert("host".to_string(), "server1".to_string());
        l1.insert("dc".to_string(), "us-east".to_string());

        let mut l2 = Labels::new();
        l2.insert("dc".to_string(), "us-east".to_string());
        l2.insert("host".to_string(), "server1".to_string());

        assert_eq!(series_key("cpu_usage", &l1), series_key("cpu_usage", &l2));
    }

    #[test]
    fn test_key_differs_by_name_and_labels() {
        let labels = labels_of(&[("host", "a")]);

        assert_ne!(
            series_key("cpu_usage", &labels),
            series_key("mem_usage", &labels)
        );
        assert_ne!(
            series_key("cpu_usage", &labels),
            series_key("cpu_usage", &labels_of(&[("host", "b")]))
        );
        assert_ne!(
            series_key("cpu_usage", &labels),
            series_key("cpu_usage", &Labels::new())
        );
    }

    #[test]
    fn test_key_is_stable_across_calls() {
        let labels = labels_of(&[("a", "1"), ("b", "2")]);
        let first = series_key("metric", &labels);
        for _ in 0..10 {
            assert_eq!(series_key("metric", &labels), first);
        }
    }

    #[test]
    fn test_canonical_encoding_shape() {
        assert_eq!(canonical_encoding("up", &Labels::new()), "up");
        assert_eq!(
            canonical_encoding("up", &labels_of(&[("job", "node"), ("dc", "icn")])),
            "up{dc=icn,job=node}"
        );
    }

    #[test]
    fn test_unicode_labels() {
        let labels = labels_of(&[("city", "東京")]);
        // Just has to be deterministic and non-panicking
        assert_eq!(series_key("weather", &labels), series_key("weather", &labels));
    }
}
