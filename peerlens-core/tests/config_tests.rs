//! Integration tests for configuration system

use peerlens_core::config::{
    sample_config, BundlePolicy, CaptureProfile, ConfigFile, ConnectionConfig, GatheringPolicy,
    KeyType, RtcpMuxPolicy, SessionSettings, TcpCandidatePolicy, DEFAULT_STUN_SERVER,
};
use peerlens_core::types::Facing;
use tempfile::TempDir;

#[test]
fn test_connection_policy_constants() {
    let config = ConnectionConfig::default();
    assert_eq!(config.ice_servers(), [DEFAULT_STUN_SERVER.to_string()]);
    assert_eq!(config.tcp_candidates(), TcpCandidatePolicy::Disabled);
    assert_eq!(config.bundle(), BundlePolicy::MaxBundle);
    assert_eq!(config.rtcp_mux(), RtcpMuxPolicy::Require);
    assert_eq!(config.gathering(), GatheringPolicy::Continual);
    assert_eq!(config.key_type(), KeyType::Ecdsa);
}

#[test]
fn test_empty_ice_list_falls_back_to_default() {
    let config = ConnectionConfig::new(Vec::new());
    assert_eq!(config.ice_servers(), [DEFAULT_STUN_SERVER.to_string()]);
}

#[test]
fn test_standard_profile() {
    let profile = CaptureProfile::STANDARD;
    assert_eq!((profile.width, profile.height, profile.fps), (640, 480, 30));
    assert_eq!(format!("{}", profile), "640x480 @ 30fps");
}

#[test]
fn test_endpoint_hint() {
    let settings = SessionSettings::default().with_endpoint_base("https://host/connect");
    assert_eq!(
        settings.endpoint_hint("sess_abc123"),
        "https://host/connect?id=sess_abc123"
    );

    let settings = settings.with_endpoint_base("https://host/connect?room=1");
    assert_eq!(
        settings.endpoint_hint("sess_abc123"),
        "https://host/connect?room=1&id=sess_abc123"
    );
}

#[test]
fn test_config_file_sample_parses() {
    let sample = sample_config();
    let config: ConfigFile = toml::from_str(&sample).expect("Sample config should parse");
    assert_eq!(config.session.facing, Facing::Front);
    assert_eq!(config.ice.servers, vec![DEFAULT_STUN_SERVER.to_string()]);
}

#[test]
fn test_config_file_save_load() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = temp_dir.path().join("nested").join("config.toml");

    let mut config = ConfigFile::default();
    config.ice.servers = vec!["stun:stun.example.org:3478".to_string()];
    config.session.endpoint_base = "https://lens.example.org/connect".to_string();
    config.session.facing = Facing::Back;
    config.save_to(&config_path).expect("Failed to save config");

    let loaded = ConfigFile::load_from(&config_path).expect("Failed to load config");
    assert_eq!(loaded.ice.servers, config.ice.servers);
    assert_eq!(loaded.session.facing, Facing::Back);

    let settings = loaded.session_settings();
    assert_eq!(settings.default_facing, Some(Facing::Back));
    assert_eq!(
        settings.endpoint_hint("sess_1"),
        "https://lens.example.org/connect?id=sess_1"
    );
    assert_eq!(
        loaded.connection_config().ice_servers(),
        ["stun:stun.example.org:3478".to_string()]
    );
}

#[test]
fn test_config_file_load_nonexistent() {
    let result = ConfigFile::load_from("/nonexistent/path/config.toml");
    // Should return default config, not error
    assert!(result.is_ok());
}

#[test]
fn test_config_file_invalid_toml() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = temp_dir.path().join("config.toml");
    std::fs::write(&config_path, "[session\nfacing = ").expect("Failed to write");

    let err = ConfigFile::load_from(&config_path).expect_err("Should not parse");
    assert!(err.to_string().contains("parse"));
}
