use crate::config::Config;
use crate::error::GenerateError;
use async_stream::try_stream;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;

/// Deadline for the `/api/tags` liveness probe — much tighter than a
/// generate call, a healthy server answers this instantly.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Sampling options sent with every generate request. The stop sequences
/// keep the model from writing the next user turn itself.
const SAMPLING: SamplingOptions = SamplingOptions {
    temperature: 0.7,
    top_p: 0.9,
    num_predict: 500,
    stop: &["User:", "Human:"],
};

pub struct OllamaClient {
    base_url: String,
    model: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: SamplingOptions,
}

#[derive(Debug, Clone, Serialize)]
struct SamplingOptions {
    temperature: f64,
    top_p: f64,
    num_predict: u32,
    stop: &'static [&'static str],
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// One line of the chunked streaming body.
#[derive(Debug, Deserialize)]
struct GenerateLine {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

/// Incremental piece of a streamed generation.
#[derive(Debug, Clone)]
pub struct StreamFragment {
    pub text: String,
    pub done: bool,
}

pub type GenerateStream =
    Pin<Box<dyn Stream<Item = Result<StreamFragment, GenerateError>> + Send>>;

impl OllamaClient {
    pub fn new(config: &Config) -> Self {
        Self {
            base_url: config.ollama_base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            client: Client::builder()
                .timeout(Duration::from_secs(config.request_timeout_secs))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Single-shot generation. Returns the full response text, or a
    /// classified error; no retries either way.
    pub async fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: SAMPLING,
        };
        let url = format!("{}/api/generate", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(code = status.as_u16(), "generate returned non-success status");
            return Err(GenerateError::Status {
                code: status.as_u16(),
            });
        }

        let body: GenerateResponse = response.json().await.map_err(classify)?;
        if body.response.trim().is_empty() {
            tracing::warn!("generate returned an empty response body");
            return Err(GenerateError::EmptyResponse);
        }
        Ok(body.response)
    }

    /// Streamed generation. Each line of the chunked body is one JSON
    /// object; malformed lines are skipped without aborting the stream.
    /// The connection is owned by the returned stream and released
    /// whenever it is dropped, completed or not.
    pub async fn generate_stream(&self, prompt: &str) -> Result<GenerateStream, GenerateError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: true,
            options: SAMPLING,
        };
        let url = format!("{}/api/generate", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(code = status.as_u16(), "generate stream returned non-success status");
            return Err(GenerateError::Status {
                code: status.as_u16(),
            });
        }

        let mut byte_stream = response.bytes_stream();

        let stream = try_stream! {
            let mut buffer: Vec<u8> = Vec::new();
            let mut finished = false;

            while !finished {
                let Some(chunk) = byte_stream.next().await else { break };
                let chunk = chunk.map_err(classify)?;
                buffer.extend_from_slice(&chunk);

                while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
                    let line_bytes: Vec<u8> = buffer.drain(..=newline).collect();
                    let line = String::from_utf8_lossy(&line_bytes);
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }

                    match serde_json::from_str::<GenerateLine>(line) {
                        Ok(parsed) => {
                            if parsed.done {
                                finished = true;
                            }
                            yield StreamFragment {
                                text: parsed.response,
                                done: parsed.done,
                            };
                            if finished {
                                break;
                            }
                        }
                        Err(error) => {
                            tracing::warn!(%error, "skipping malformed stream line");
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    /// Live check against the server's tag listing.
    pub async fn check_alive(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(error) => {
                tracing::debug!(%error, "liveness probe failed");
                false
            }
        }
    }
}

fn classify(error: reqwest::Error) -> GenerateError {
    if error.is_timeout() {
        GenerateError::Timeout
    } else if error.is_connect() {
        GenerateError::Connection(error.to_string())
    } else {
        GenerateError::Transport(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str, timeout_secs: u64) -> Config {
        Config {
            ollama_base_url: base_url.to_string(),
            request_timeout_secs: timeout_secs,
            ..Config::default()
        }
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = OllamaClient::new(&test_config("http://myserver:11434/", 600));
        assert_eq!(client.base_url, "http://myserver:11434");
    }

    #[test]
    fn request_serializes_with_sampling_options() {
        let request = GenerateRequest {
            model: "phi3:mini",
            prompt: "User: hi\nAssistant:",
            stream: false,
            options: SAMPLING,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"stream\":false"));
        assert!(json.contains("phi3:mini"));
        assert!(json.contains("\"temperature\":0.7"));
        assert!(json.contains("\"top_p\":0.9"));
        assert!(json.contains("\"num_predict\":500"));
        assert!(json.contains("\"stop\":[\"User:\",\"Human:\"]"));
    }

    #[test]
    fn response_with_missing_field_deserializes_empty() {
        let response: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert!(response.response.is_empty());
    }

    #[test]
    fn stream_line_deserializes() {
        let line: GenerateLine =
            serde_json::from_str(r#"{"response":"Hel","done":false}"#).unwrap();
        assert_eq!(line.response, "Hel");
        assert!(!line.done);
    }

    #[tokio::test]
    async fn generate_returns_text_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({
                "model": "phi3:mini",
                "stream": false,
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"response": "Hello!", "done": true})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = OllamaClient::new(&test_config(&server.uri(), 600));
        let text = client.generate("User: hi\nAssistant:").await.unwrap();
        assert_eq!(text, "Hello!");
    }

    #[tokio::test]
    async fn generate_classifies_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = OllamaClient::new(&test_config(&server.uri(), 600));
        let error = client.generate("prompt").await.unwrap_err();
        assert!(matches!(error, GenerateError::Status { code: 500 }));
    }

    #[tokio::test]
    async fn generate_classifies_empty_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"response": "", "done": true})),
            )
            .mount(&server)
            .await;

        let client = OllamaClient::new(&test_config(&server.uri(), 600));
        let error = client.generate("prompt").await.unwrap_err();
        assert!(matches!(error, GenerateError::EmptyResponse));
    }

    #[tokio::test]
    async fn generate_classifies_timeout_distinctly() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"response": "late"}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let client = OllamaClient::new(&test_config(&server.uri(), 1));
        let error = client.generate("prompt").await.unwrap_err();
        assert!(matches!(error, GenerateError::Timeout));
        assert_ne!(
            error.user_message(),
            GenerateError::Connection("refused".into()).user_message()
        );
    }

    #[tokio::test]
    async fn generate_classifies_refused_connection() {
        // Nothing listens on this port.
        let client = OllamaClient::new(&test_config("http://127.0.0.1:9", 1));
        let error = client.generate("prompt").await.unwrap_err();
        assert!(matches!(error, GenerateError::Connection(_)));
    }

    #[tokio::test]
    async fn generate_stream_yields_fragments_in_order() {
        let server = MockServer::start().await;
        let body = concat!(
            "{\"response\":\"Hel\",\"done\":false}\n",
            "{\"response\":\"lo\",\"done\":false}\n",
            "{\"response\":\"\",\"done\":true}\n",
        );
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"),
            )
            .mount(&server)
            .await;

        let client = OllamaClient::new(&test_config(&server.uri(), 600));
        let mut stream = client.generate_stream("prompt").await.unwrap();

        let mut fragments = Vec::new();
        while let Some(item) = stream.next().await {
            fragments.push(item.unwrap());
        }

        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0].text, "Hel");
        assert_eq!(fragments[1].text, "lo");
        assert!(fragments[2].done);
    }

    #[tokio::test]
    async fn generate_stream_skips_malformed_lines() {
        let server = MockServer::start().await;
        let body = concat!(
            "{\"response\":\"good\",\"done\":false}\n",
            "this is not json\n",
            "{\"response\":\" end\",\"done\":true}\n",
        );
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"),
            )
            .mount(&server)
            .await;

        let client = OllamaClient::new(&test_config(&server.uri(), 600));
        let mut stream = client.generate_stream("prompt").await.unwrap();

        let mut text = String::new();
        while let Some(item) = stream.next().await {
            text.push_str(&item.unwrap().text);
        }
        assert_eq!(text, "good end");
    }

    #[tokio::test]
    async fn generate_stream_rejects_non_success_status_up_front() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = OllamaClient::new(&test_config(&server.uri(), 600));
        let error = match client.generate_stream("prompt").await {
            Ok(_) => panic!("expected generate_stream to reject non-success status"),
            Err(e) => e,
        };
        assert!(matches!(error, GenerateError::Status { code: 404 }));
    }

    #[tokio::test]
    async fn check_alive_reflects_tag_listing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [{"name": "phi3:mini"}]
            })))
            .mount(&server)
            .await;

        let client = OllamaClient::new(&test_config(&server.uri(), 600));
        assert!(client.check_alive().await);

        let dead = OllamaClient::new(&test_config("http://127.0.0.1:9", 600));
        assert!(!dead.check_alive().await);
    }
}
