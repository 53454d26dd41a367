//! Content fingerprints of run inputs

use chrono::NaiveDateTime;
use sha2::{Digest, Sha256};

use crate::config::ReconciliationConfig;
use crate::types::*;

/// SHA-256 over the configuration, snapshot time and both ledger snapshots
///
/// Records and configuration maps are ordered, so the JSON encoding, and
/// therefore the digest, is stable for unchanged inputs.
pub fn input_fingerprint(
    config: &ReconciliationConfig,
    as_of: &NaiveDateTime,
    source: &[RawRecord],
    target: &[RawRecord],
) -> ReconResult<String> {
    let encoded = serde_json::to_vec(&(config, as_of, source, target))
        .map_err(|e| ReconError::Configuration(format!("Cannot encode run inputs: {e}")))?;
    Ok(sha256_hex(&encoded))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use chrono::NaiveDate;

    #[test]
    fn test_fingerprint_is_stable_and_sensitive() {
        let config = ConfigBuilder::new(["id"]).build().unwrap();
        let as_of = NaiveDate::from_ymd_opt(2024, 6, 30)
            .unwrap()
            .and_hms_opt(23, 59, 59)
            .unwrap();
        let source = vec![RawRecord::new().with("id", 1).with("amt", "10.00")];
        let target = vec![RawRecord::new().with("amt", "10.00").with("id", 1)];

        let first = input_fingerprint(&config, &as_of, &source, &target).unwrap();
        let second = input_fingerprint(&config, &as_of, &source, &target).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);

        // field insertion order does not matter
        assert_eq!(
            input_fingerprint(&config, &as_of, &source, &source).unwrap(),
            input_fingerprint(&config, &as_of, &target, &target).unwrap()
        );

        let changed = vec![RawRecord::new().with("id", 1).with("amt", "10.01")];
        assert_ne!(first, input_fingerprint(&config, &as_of, &changed, &target).unwrap());

        let later = as_of + chrono::Duration::seconds(1);
        assert_ne!(first, input_fingerprint(&config, &later, &source, &target).unwrap());
    }
}
