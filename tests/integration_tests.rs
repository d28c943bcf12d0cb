// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Integration tests for the campusgate proxy server
//!
//! These tests verify the full request flow by hitting a live server.
//! They are marked with #[ignore] so they don't run in CI without a server running.
//!
//! To run these tests:
//! 1. Start the server without provider keys: campusgate serve
//! 2. Run tests with: cargo test --test integration_tests -- --ignored

use reqwest::Client;
use serde_json::{json, Value};

const BASE_URL: &str = "http://localhost:8787";

// =============================================================================
// Health Endpoint Tests
// =============================================================================

#[tokio::test]
#[ignore]
async fn test_health_endpoint() -> Result<(), Box<dyn std::error::Error>> {
    let response = Client::new().get(format!("{}/health", BASE_URL)).send().await?;

    assert_eq!(response.status(), 200);

    let json: Value = response.json().await?;
    assert_eq!(json["status"].as_str(), Some("ok"));
    assert!(json.get("version").is_some());
    assert!(json["providers"].is_object());

    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_preflight_allows_any_origin() -> Result<(), Box<dyn std::error::Error>> {
    let response = Client::new()
        .request(reqwest::Method::OPTIONS, format!("{}/send-email", BASE_URL))
        .header("Origin", "https://campus.example")
        .header("Access-Control-Request-Method", "POST")
        .header("Access-Control-Request-Headers", "authorization, x-client-info, apikey, content-type")
        .send()
        .await?;

    assert_eq!(response.status(), 200);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );

    Ok(())
}

// =============================================================================
// Proxy Endpoint Tests
// =============================================================================

#[tokio::test]
#[ignore]
async fn test_send_email_validation() -> Result<(), Box<dyn std::error::Error>> {
    let response = Client::new()
        .post(format!("{}/send-email", BASE_URL))
        .json(&json!({ "to": "ada@campus.edu" }))
        .send()
        .await?;

    assert_eq!(response.status(), 400);
    let json: Value = response.json().await?;
    assert_eq!(json["error"]["error_type"], "invalid_request");
    assert!(json["error"]["reference"].as_str().unwrap_or("").starts_with("ERR-"));

    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_translate_english_passthrough() -> Result<(), Box<dyn std::error::Error>> {
    let response = Client::new()
        .post(format!("{}/translate", BASE_URL))
        .json(&json!({ "text": "Photosynthesis", "targetLanguage": "en" }))
        .send()
        .await?;

    assert_eq!(response.status(), 200);
    let json: Value = response.json().await?;
    assert_eq!(json["translatedText"], "Photosynthesis");

    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_unknown_code_is_not_valid() -> Result<(), Box<dyn std::error::Error>> {
    let response = Client::new()
        .post(format!("{}/verify-email", BASE_URL))
        .json(&json!({ "email": "nobody@campus.edu", "code": "123456" }))
        .send()
        .await?;

    assert_eq!(response.status(), 200);
    let json: Value = response.json().await?;
    assert_eq!(json["valid"], false);

    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_passkey_challenges_are_unique() -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::new();
    let mut challenges = Vec::new();

    for _ in 0..3 {
        let response = client
            .post(format!("{}/passkey/authenticate-challenge", BASE_URL))
            .json(&json!({}))
            .send()
            .await?;
        assert_eq!(response.status(), 200);
        let json: Value = response.json().await?;
        challenges.push(json["challenge"].as_str().unwrap_or_default().to_string());
    }

    challenges.sort();
    challenges.dedup();
    assert_eq!(challenges.len(), 3);

    Ok(())
}
