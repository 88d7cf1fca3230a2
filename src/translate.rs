//! query translation
//!
//! implements the `Translator` trait over the public gtx endpoint of google
//! translate. queries may arrive in any language but the embedding model and
//! the caption corpora are english, so the orchestrator routes every vector
//! query through here first. the endpoint answers with a nested json array
//! whose first element holds the translated fragments.

use crate::providers::{TranslateError, Translator};
use reqwest::Client;

const TRANSLATE_URL: &str = "https://translate.googleapis.com/translate_a/single";

/// google translate client (auto-detected source → english)
#[derive(Clone)]
pub struct GoogleTranslator {
    client: Client,
}

impl GoogleTranslator {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Translator for GoogleTranslator {
    async fn translate(&self, text: &str) -> Result<String, TranslateError> {
        // the embedding model was trained on lower-cased captions
        let text = text.to_lowercase();

        let response = self
            .client
            .get(TRANSLATE_URL)
            .query(&[
                ("client", "gtx"),
                ("sl", "auto"),
                ("tl", "en"),
                ("dt", "t"),
                ("q", text.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TranslateError::Api { status, body });
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TranslateError::Parse(e.to_string()))?;

        let fragments = body
            .get(0)
            .and_then(|v| v.as_array())
            .ok_or_else(|| TranslateError::Parse("missing fragment array".into()))?;

        let mut out = String::new();
        for fragment in fragments {
            if let Some(piece) = fragment.get(0).and_then(|v| v.as_str()) {
                out.push_str(piece);
            }
        }

        if out.is_empty() {
            return Err(TranslateError::Parse("empty translation".into()));
        }
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "google-translate"
    }
}
