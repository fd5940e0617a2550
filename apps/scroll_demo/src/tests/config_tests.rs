use super::*;

use std::{
    collections::HashMap,
    env,
    time::{SystemTime, UNIX_EPOCH},
};

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars = pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect::<HashMap<_, _>>();
    move |key| vars.get(key).cloned()
}

#[test]
fn partial_file_keeps_defaults_for_missing_keys() {
    let settings = parse_settings(
        r#"
page_size = 25
threshold = 0.5

[params]
q = "delta"
archived = false
"#,
    )
    .expect("parse");

    assert_eq!(settings.page_size, 25);
    assert_eq!(settings.threshold, 0.5);
    assert_eq!(settings.total_items, Settings::default().total_items);
    assert_eq!(settings.params.get_str("q"), Some("delta"));
    assert_eq!(
        settings.params.get("archived"),
        Some(&serde_json::Value::Bool(false))
    );
}

#[test]
fn env_overrides_file_values() {
    let mut settings = Settings {
        page_size: 25,
        ..Settings::default()
    };

    apply_env_overrides(
        &mut settings,
        env_from(&[
            ("APP__PAGE_SIZE", "5"),
            ("APP__INITIAL_PAGE", "1"),
            ("APP__LOG_LEVEL", "debug"),
        ]),
    )
    .expect("overrides");

    assert_eq!(settings.page_size, 5);
    assert_eq!(settings.initial_page, 1);
    assert_eq!(settings.log_level, "debug");
    assert_eq!(
        settings.controller_config().initial_page,
        PageIndex(1)
    );
}

#[test]
fn invalid_env_value_is_reported() {
    let mut settings = Settings::default();
    let err = apply_env_overrides(&mut settings, env_from(&[("APP__THRESHOLD", "lots")]))
        .expect_err("invalid threshold");

    assert!(matches!(
        err,
        SettingsError::InvalidEnv {
            key: "APP__THRESHOLD",
            ..
        }
    ));
}

#[test]
fn non_finite_threshold_is_rejected() {
    for raw in ["NaN", "inf"] {
        let mut settings = Settings::default();
        let err = apply_env_overrides(&mut settings, env_from(&[("APP__THRESHOLD", raw)]))
            .expect_err("non-finite threshold");

        assert!(matches!(
            err,
            SettingsError::InvalidEnv {
                key: "APP__THRESHOLD",
                ..
            }
        ));
        assert_eq!(settings.threshold, Settings::default().threshold);
    }
}

#[test]
fn controller_config_clamps_threshold() {
    let settings = Settings {
        threshold: 3.0,
        root_margin_px: 40,
        ..Settings::default()
    };

    let config = settings.controller_config();
    assert_eq!(config.observe.threshold, 1.0);
    assert_eq!(config.observe.root_margin_px, 40);
}

#[test]
fn nan_threshold_from_file_falls_back_to_default() {
    let settings = parse_settings("threshold = nan").expect("parse");
    assert!(settings.threshold.is_nan());

    assert_eq!(
        settings.controller_config().observe.threshold,
        ObserveOptions::default().threshold
    );
}

#[test]
fn explicit_missing_file_is_an_error() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let path = env::temp_dir().join(format!("scroll_demo_missing_{suffix}.toml"));

    assert!(matches!(
        load_settings(Some(&path)),
        Err(SettingsError::Read { .. })
    ));
}

#[test]
fn malformed_file_reports_parse_error() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let path = env::temp_dir().join(format!("scroll_demo_bad_{suffix}.toml"));
    fs::write(&path, "page_size = \"many\"").expect("write");

    let result = load_settings(Some(&path));
    fs::remove_file(&path).expect("cleanup");

    assert!(matches!(result, Err(SettingsError::Parse { .. })));
}
