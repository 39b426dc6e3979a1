//! Scenario: config hash is stable and excludes secrets
//!
//! `Config::hashed()` feeds `ConfigView`, not `Config`, into the hasher —
//! `ConfigView` has no `exchange_api_key`/`exchange_api_secret` fields at
//! all. Two configs differing only in those secrets must hash identically,
//! and the canonical JSON emitted alongside the hash must not contain the
//! secret values anywhere.

use std::sync::Mutex;

use vgx_config::Config;

// `Config::from_env()` reads process-wide env vars; serialize the tests in
// this file so they don't race each other's env mutations.
static ENV_LOCK: Mutex<()> = Mutex::new(());

fn base_env() {
    std::env::set_var("VGX_DATABASE_URL", "postgres://localhost/vgx_test");
    std::env::set_var("VGX_EXECUTION_MODE", "PAPER");
    std::env::remove_var("VGX_EXCHANGE_API_KEY");
    std::env::remove_var("VGX_EXCHANGE_API_SECRET");
}

#[test]
fn hash_unaffected_by_differing_secrets() {
    let _g = ENV_LOCK.lock().unwrap();
    base_env();

    std::env::set_var("VGX_EXCHANGE_API_KEY", "key-one");
    std::env::set_var("VGX_EXCHANGE_API_SECRET", "secret-one");
    let a = Config::from_env().unwrap().hashed().unwrap();

    std::env::set_var("VGX_EXCHANGE_API_KEY", "key-two-totally-different");
    std::env::set_var("VGX_EXCHANGE_API_SECRET", "secret-two-totally-different");
    let b = Config::from_env().unwrap().hashed().unwrap();

    assert_eq!(
        a.config_hash, b.config_hash,
        "config_hash must not depend on secret values"
    );
    assert_eq!(a.canonical_json, b.canonical_json);
}

#[test]
fn canonical_json_never_contains_secret_values() {
    let _g = ENV_LOCK.lock().unwrap();
    base_env();
    std::env::set_var("VGX_EXCHANGE_API_KEY", "sekrit-key-marker");
    std::env::set_var("VGX_EXCHANGE_API_SECRET", "sekrit-secret-marker");

    let hashed = Config::from_env().unwrap().hashed().unwrap();

    assert!(!hashed.canonical_json.contains("sekrit-key-marker"));
    assert!(!hashed.canonical_json.contains("sekrit-secret-marker"));
}

#[test]
fn hash_is_stable_across_equal_configs() {
    let _g = ENV_LOCK.lock().unwrap();
    base_env();
    let a = Config::from_env().unwrap();
    let b = Config::from_env().unwrap();
    assert_eq!(a.hashed().unwrap().config_hash, b.hashed().unwrap().config_hash);
}

#[test]
fn hash_changes_when_a_hashed_field_changes() {
    let _g = ENV_LOCK.lock().unwrap();
    base_env();
    std::env::set_var("VGX_SYMBOLS", "BTCUSDT");
    let a = Config::from_env().unwrap().hashed().unwrap();

    std::env::set_var("VGX_SYMBOLS", "BTCUSDT,ETHUSDT");
    let b = Config::from_env().unwrap().hashed().unwrap();

    std::env::remove_var("VGX_SYMBOLS");
    assert_ne!(a.config_hash, b.config_hash);
}
