use std::collections::HashMap;

use super::types::PipelineConfig;
use crate::error::PipelineError;
use crate::queue::InsertionPolicy;
use crate::topics;

#[test]
fn parse_empty_toml_uses_defaults() {
    let cfg = PipelineConfig::from_toml("").unwrap();
    assert_eq!(cfg, PipelineConfig::default());
    assert_eq!(cfg.insertion, InsertionPolicy::Fifo);
    assert_eq!(cfg.default_topic, topics::DEFAULT);
}

#[test]
fn parse_full_toml() {
    let toml = r#"
name = "orders"
insertion = "random"
default_topic = "orders.raw"
"#;
    let cfg: PipelineConfig = toml::from_str(toml).unwrap();
    cfg.validate().unwrap();
    assert_eq!(cfg.name, "orders");
    assert_eq!(cfg.insertion, InsertionPolicy::Random);
    assert_eq!(cfg.default_topic, "orders.raw");
}

#[test]
fn unknown_insertion_policy_fails_to_parse() {
    let err = PipelineConfig::from_toml(r#"insertion = "lifo""#).unwrap_err();
    assert!(matches!(err, PipelineError::ConfigParse(_)));
}

#[test]
fn reserved_default_topic_is_rejected() {
    let cfg = PipelineConfig::default().with_default_topic(topics::FINISHED);
    let err = cfg.validate().unwrap_err();
    assert!(err.to_string().contains("reserved"));
}

#[test]
fn empty_values_are_rejected() {
    assert!(PipelineConfig::named("  ").validate().is_err());
    assert!(PipelineConfig::default()
        .with_default_topic("")
        .validate()
        .is_err());
}

#[test]
fn overrides_replace_values() {
    let env: HashMap<&str, &str> = HashMap::from([
        ("REDPIPE_NAME", "from-env"),
        ("REDPIPE_INSERTION", "RANDOM"),
        ("REDPIPE_DEFAULT_TOPIC", "env.topic"),
    ]);
    let mut cfg = PipelineConfig::default();
    cfg.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

    assert_eq!(cfg.name, "from-env");
    assert_eq!(cfg.insertion, InsertionPolicy::Random);
    assert_eq!(cfg.default_topic, "env.topic");
}

#[test]
fn invalid_insertion_override_is_ignored() {
    let mut cfg = PipelineConfig::default().with_insertion(InsertionPolicy::Random);
    cfg.apply_overrides(|key| (key == "REDPIPE_INSERTION").then(|| "sideways".to_string()));
    assert_eq!(cfg.insertion, InsertionPolicy::Random);
}

#[test]
fn from_file_reports_missing_file() {
    let err = PipelineConfig::from_file("/nonexistent/redpipe.toml").unwrap_err();
    assert!(matches!(err, PipelineError::ConfigIo(_)));
}
