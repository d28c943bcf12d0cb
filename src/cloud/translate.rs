// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Text translation through the Google Translate v2 API.

use serde::Deserialize;
use serde_json::json;

use super::{http_client, send_with_retry, ProviderError};

const DEFAULT_TRANSLATE_URL: &str = "https://translation.googleapis.com/language/translate/v2";

/// Language the platform content is authored in. Requests for it pass through.
pub const SOURCE_LANGUAGE: &str = "en";

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    data: TranslateData,
}

#[derive(Debug, Deserialize)]
struct TranslateData {
    translations: Vec<Translation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Translation {
    translated_text: String,
}

/// Google Translate client.
#[derive(Debug, Clone)]
pub struct TranslateClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl TranslateClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ProviderError::NotConfigured("Google Translate"));
        }
        Ok(Self {
            api_key,
            base_url: DEFAULT_TRANSLATE_URL.to_string(),
            client: http_client()?,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Translate `text` into `target_language`.
    pub async fn translate(&self, text: &str, target_language: &str) -> Result<String, ProviderError> {
        let body = json!({
            "q": text,
            "target": target_language,
            "format": "text",
        });

        let response = send_with_retry("Google Translate", || {
            self.client
                .post(&self.base_url)
                .query(&[("key", self.api_key.as_str())])
                .json(&body)
        })
        .await?;

        let parsed: TranslateResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    provider: "Google Translate",
                    message: e.to_string(),
                })?;

        parsed
            .data
            .translations
            .into_iter()
            .next()
            .map(|t| t.translated_text)
            .ok_or_else(|| ProviderError::InvalidResponse {
                provider: "Google Translate",
                message: "no translations in response".to_string(),
            })
    }
}

/// Whether a request for `target_language` needs no translation.
pub fn is_passthrough(target_language: &str) -> bool {
    let primary = target_language
        .split(['-', '_'])
        .next()
        .unwrap_or(target_language);
    primary.trim().eq_ignore_ascii_case(SOURCE_LANGUAGE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_languages() {
        assert!(is_passthrough("en"));
        assert!(is_passthrough("EN-us"));
        assert!(!is_passthrough("es"));
        assert!(!is_passthrough("eng"));
    }

    #[test]
    fn test_response_shape() {
        let parsed: TranslateResponse = serde_json::from_str(
            r#"{"data":{"translations":[{"translatedText":"Hola","detectedSourceLanguage":"en"}]}}"#,
        )
        .unwrap();
        assert_eq!(parsed.data.translations[0].translated_text, "Hola");
    }
}
