use super::*;
use std::collections::HashMap;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

// -------------------- Defaults --------------------

#[test]
fn defaults_are_valid() {
    let config = EngineConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.memtable_size_threshold, 4 * 1024 * 1024);
    assert_eq!(config.wal_segment_max_size, 16 * 1024 * 1024);
    assert!(config.wal_sync);
    assert_eq!(config.l0_compaction_trigger, 4);
    assert_eq!(config.max_levels, 7);
    assert_eq!(config.sparse_index_interval, 100);
    assert!(config.background_work);
}

#[test]
fn level_sizes_grow_geometrically() {
    let config = EngineConfig::default();
    let base = 10 * 1024 * 1024;
    assert_eq!(config.level_max_bytes(1), base);
    assert_eq!(config.level_max_bytes(2), base * 10);
    assert_eq!(config.level_max_bytes(3), base * 100);
}

#[test]
fn level_sizes_saturate() {
    let config = EngineConfig {
        level_size_multiplier: 1_000_000,
        ..EngineConfig::default()
    };
    assert_eq!(config.level_max_bytes(10), u64::MAX);
}

#[test]
fn compaction_interval_zero_disables() {
    let config = EngineConfig {
        compaction_interval_ms: 0,
        ..EngineConfig::default()
    };
    assert!(config.compaction_interval().is_none());
    assert_eq!(
        EngineConfig::default().compaction_interval(),
        Some(Duration::from_secs(10))
    );
}

// -------------------- Overrides --------------------

#[test]
fn overrides_apply() {
    let config = EngineConfig::default().with_overrides(lookup_from(&[
        ("STRATA_FLUSH_KB", "64"),
        ("STRATA_WAL_SEGMENT_KB", "128"),
        ("STRATA_WAL_SYNC", "false"),
        ("STRATA_L0_TRIGGER", "0"),
        ("STRATA_COMPACTION_INTERVAL_MS", "250"),
        ("STRATA_BACKGROUND", "false"),
    ]));

    assert_eq!(config.memtable_size_threshold, 64 * 1024);
    assert_eq!(config.wal_segment_max_size, 128 * 1024);
    assert!(!config.wal_sync);
    assert_eq!(config.l0_compaction_trigger, 0);
    assert_eq!(config.compaction_interval_ms, 250);
    assert!(!config.background_work);
}

#[test]
fn unparseable_overrides_keep_defaults() {
    let config = EngineConfig::default().with_overrides(lookup_from(&[
        ("STRATA_FLUSH_KB", "lots"),
        ("STRATA_WAL_SYNC", "maybe"),
        ("STRATA_L0_TRIGGER", "-1"),
    ]));
    assert_eq!(config, EngineConfig::default());
}

#[test]
fn overrides_tolerate_whitespace() {
    let config = EngineConfig::default().with_overrides(lookup_from(&[("STRATA_L0_TRIGGER", " 8 ")]));
    assert_eq!(config.l0_compaction_trigger, 8);
}

// -------------------- Validation --------------------

#[test]
fn validate_rejects_bad_fields() {
    let cases: Vec<(EngineConfig, &str)> = vec![
        (
            EngineConfig {
                memtable_size_threshold: 0,
                ..EngineConfig::default()
            },
            "memtable_size_threshold",
        ),
        (
            EngineConfig {
                sparse_index_interval: 0,
                ..EngineConfig::default()
            },
            "sparse_index_interval",
        ),
        (
            EngineConfig {
                bloom_false_positive_rate: 1.0,
                ..EngineConfig::default()
            },
            "bloom_false_positive_rate",
        ),
        (
            EngineConfig {
                max_levels: 1,
                ..EngineConfig::default()
            },
            "max_levels",
        ),
        (
            EngineConfig {
                level_size_multiplier: 1,
                ..EngineConfig::default()
            },
            "level_size_multiplier",
        ),
        (
            EngineConfig {
                target_file_size: 0,
                ..EngineConfig::default()
            },
            "target_file_size",
        ),
    ];

    for (config, expected) in cases {
        match config.validate() {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, expected),
            Ok(()) => panic!("{} should have been rejected", expected),
        }
    }
}

#[test]
fn error_message_names_field() {
    let err = EngineConfig {
        max_levels: 0,
        ..EngineConfig::default()
    }
    .validate()
    .unwrap_err();
    assert!(err.to_string().contains("max_levels"));
}
