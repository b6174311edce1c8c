//! Ollama-backed refinement.

use super::Refiner;
use crate::models::Survivor;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Refines guidance through a local Ollama server.
pub struct OllamaRefiner {
    endpoint: String,
    model: String,
    client: reqwest::blocking::Client,
}

impl OllamaRefiner {
    /// Default API endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "http://localhost:11434";

    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "llama3.2";

    /// Creates a refiner.
    ///
    /// `timeout` bounds each HTTP request; the router applies its own,
    /// usually shorter, deadline on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        endpoint: Option<String>,
        model: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| Error::failed("build_http_client", e))?;
        Ok(Self {
            endpoint: endpoint.unwrap_or_else(|| Self::DEFAULT_ENDPOINT.to_string()),
            model: model.unwrap_or_else(|| Self::DEFAULT_MODEL.to_string()),
            client,
        })
    }

    fn prompt(draft: &str, max_chars: usize) -> String {
        format!(
            "Rewrite the following guidance for a developer as plain text under \
             {max_chars} characters. Keep every bracketed tag and every warning. \
             Do not add advice that is not present.\n\n{draft}"
        )
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl Refiner for OllamaRefiner {
    fn refine(&self, draft: &str, _survivors: &[Survivor], max_chars: usize) -> Result<String> {
        let request = GenerateRequest {
            model: &self.model,
            prompt: Self::prompt(draft, max_chars),
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.endpoint))
            .json(&request)
            .send()
            .map_err(|e| {
                let error_kind = if e.is_timeout() {
                    "timeout"
                } else if e.is_connect() {
                    "connect"
                } else {
                    "request"
                };
                tracing::debug!(
                    provider = "ollama",
                    model = %self.model,
                    error = %e,
                    error_kind,
                    "Refinement request failed"
                );
                Error::GenerationFailure(format!("{error_kind} error: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::GenerationFailure(format!(
                "ollama returned status {status}"
            )));
        }

        let body: GenerateResponse = response
            .json()
            .map_err(|e| Error::GenerationFailure(format!("invalid response: {e}")))?;
        Ok(body.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let refiner = OllamaRefiner::new(None, None, Duration::from_millis(100)).unwrap();
        assert_eq!(refiner.endpoint, OllamaRefiner::DEFAULT_ENDPOINT);
        assert_eq!(refiner.model, OllamaRefiner::DEFAULT_MODEL);
    }

    #[test]
    fn test_unreachable_endpoint_is_generation_failure() {
        let refiner = OllamaRefiner::new(
            Some("http://127.0.0.1:9".to_string()),
            None,
            Duration::from_millis(200),
        )
        .unwrap();
        let err = refiner.refine("[NOTE] x", &[], 100).unwrap_err();
        assert!(matches!(err, Error::GenerationFailure(_)));
    }

    #[test]
    fn test_prompt_carries_cap_and_draft() {
        let prompt = OllamaRefiner::prompt("[ADVISORY] rotate keys", 300);
        assert!(prompt.contains("300"));
        assert!(prompt.ends_with("[ADVISORY] rotate keys"));
    }
}
