//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use base64::Engine;
use opends4::KeyMaterial;

/// 2048-bit test identity, serial 000000000000000000010001deadbeef.
pub const TEST_KEY_B64: &str = include_str!("../fixtures/test_key.b64");

pub fn test_key_bytes() -> Vec<u8> {
    base64::engine::general_purpose::STANDARD
        .decode(TEST_KEY_B64.split_whitespace().collect::<String>())
        .unwrap()
}

pub fn test_key() -> KeyMaterial {
    KeyMaterial::from_bytes(&test_key_bytes()).unwrap()
}
