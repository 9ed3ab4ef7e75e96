//! Sample configuration integration tests

const SAMPLE: &str = include_str!("../qrchain.toml");

/// The shipped sample parses and carries every section.
#[test]
fn test_sample_config_sections() {
    let config: toml::Value = toml::from_str(SAMPLE).expect("valid TOML");

    let state = config.get("state").expect("state section");
    assert_eq!(
        state.get("path").unwrap().as_str().unwrap(),
        "qrchain-state.json"
    );

    let ledger = config.get("ledger").expect("ledger section");
    assert_eq!(ledger.get("event_capacity").unwrap().as_integer().unwrap(), 256);
    assert_eq!(
        ledger.get("owner_seed_role").unwrap().as_str().unwrap(),
        "producer"
    );
}

#[test]
fn test_sample_actor_aliases() {
    let config: toml::Value = toml::from_str(SAMPLE).expect("valid TOML");
    let actors = config
        .get("actors")
        .and_then(|a| a.as_table())
        .expect("actors table");

    for alias in ["owner", "farmer", "transporter", "retailer"] {
        let address = actors.get(alias).unwrap().as_str().unwrap();
        assert!(address.starts_with("0x"), "{alias} -> {address}");
        assert_eq!(address.len(), 42);
    }
}

/// Minimal config: every section is optional.
#[test]
fn test_minimal_config() {
    let config: toml::Value = toml::from_str(
        r#"
[actors]
farmer = "0xFarmer"
"#,
    )
    .expect("valid TOML");

    assert!(config.get("state").is_none());
    assert!(config.get("ledger").is_none());
    assert_eq!(
        config["actors"]["farmer"].as_str().unwrap(),
        "0xFarmer"
    );
}
