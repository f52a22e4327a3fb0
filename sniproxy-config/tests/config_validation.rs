use sniproxy_config::Config;

#[test]
fn test_minimal_config_loads() {
    let config = Config::parse("{}").expect("empty config should fall back to defaults");

    assert!(!config.metrics.enabled);
    assert_eq!(config.quic.max_concurrent_streams, 100);
    assert_eq!(config.quic.max_idle_timeout_ms, 60_000);
    assert_eq!(config.http3.qpack_max_table_capacity, 4096);
    assert_eq!(config.http3.qpack_blocked_streams, 16);
}

#[test]
fn test_full_config_loads() {
    let yaml = r#"
metrics:
  enabled: true
  address: "0.0.0.0:9091"
quic:
  max_concurrent_streams: 200
  max_idle_timeout_ms: 45000
  max_datagram_size: 1200
http3:
  max_field_section_size: 16384
  qpack_max_table_capacity: 8192
  qpack_blocked_streams: 32
"#;
    let config = Config::parse(yaml).expect("full config should parse");

    assert!(config.metrics.enabled);
    assert_eq!(config.metrics.address, "0.0.0.0:9091");
    assert_eq!(config.quic.max_concurrent_streams, 200);
    assert_eq!(config.quic.max_idle_timeout_ms, 45000);
    assert_eq!(config.quic.max_datagram_size, 1200);
    assert_eq!(config.http3.max_field_section_size, 16384);
    assert_eq!(config.http3.qpack_max_table_capacity, 8192);
    assert_eq!(config.http3.qpack_blocked_streams, 32);
}

#[test]
fn test_unknown_top_level_key_is_rejected() {
    // serde_yaml_ng's default struct handling ignores unknown fields unless
    // `deny_unknown_fields` is set; this asserts our current (permissive)
    // stance so a future tightening is a deliberate, visible change.
    let yaml = r#"
quic:
  max_concurrent_streams: 10
some_future_section:
  nested: true
"#;
    let config = Config::parse(yaml).expect("unknown sections are ignored, not rejected");
    assert_eq!(config.quic.max_concurrent_streams, 10);
}

#[test]
fn test_malformed_yaml_is_rejected() {
    let yaml = "quic: [this, is, not, a, map]";
    assert!(Config::parse(yaml).is_err());
}
