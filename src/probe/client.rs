use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::io::Write;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{AttemptFailure, ProbeError, Result};
use crate::gemini::types::*;
use crate::gemini::{consume_stream, models, StreamSummary};
use crate::probe::config::ProbeConfig;

/// Deadline for listing and token counting.
pub const SIMPLE_TIMEOUT: Duration = Duration::from_secs(30);

const MODELS_SHOWN: usize = 3;

pub struct ApiProbe {
    http_client: Client,
    config: ProbeConfig,
}

impl ApiProbe {
    pub fn new(config: ProbeConfig) -> Result<Self> {
        let http_client = Client::builder()
            .default_headers(config.headers()?)
            .connect_timeout(SIMPLE_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(ProbeError::HttpClient)?;

        info!("API probe initialized");
        debug!("Base URL: {}", config.base_url());
        debug!("Route prefixes: {:?}", config.prefixes());

        Ok(Self {
            http_client,
            config,
        })
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    pub async fn list_models(&self) -> Result<ModelList> {
        let list: ModelList = self
            .attempt_candidates("/v1beta/models", |url| self.get_json(url, SIMPLE_TIMEOUT))
            .await?;

        println!("Model list received");
        println!("Model count: {}", list.models.len());
        for (i, model) in list.models.iter().take(MODELS_SHOWN).enumerate() {
            println!(
                "  {}. {} - {}",
                i + 1,
                model.name_or_na(),
                model.display_name_or_na()
            );
        }
        if list.models.len() > MODELS_SHOWN {
            println!("  ... and {} more", list.models.len() - MODELS_SHOWN);
        }

        Ok(list)
    }

    pub async fn generate_content(&self, model: &str) -> Result<GenerateContentResponse> {
        let request = models::generate_request();
        let resp = self.generate(model, &request).await?;

        println!("Content generated");
        print_first_text(&resp);
        Ok(resp)
    }

    pub async fn generate_with_image(
        &self,
        model: &str,
        image: Option<Part>,
    ) -> Result<GenerateContentResponse> {
        let request = models::image_request(image);
        let resp = self.generate(model, &request).await?;

        println!("Image content processed");
        print_first_text(&resp);
        Ok(resp)
    }

    pub async fn count_tokens(&self, model: &str) -> Result<CountTokensResponse> {
        let request = &models::count_tokens_request();
        let route = format!("/v1beta/models/{}:countTokens", model);

        let resp: CountTokensResponse = self
            .attempt_candidates(&route, |url| {
                println!("Model: {}", model);
                self.post_json(url, request, SIMPLE_TIMEOUT)
            })
            .await?;

        println!("Tokens counted");
        println!("Total tokens: {}", resp.total_tokens);
        Ok(resp)
    }

    pub async fn stream_generate_content(&self, model: &str) -> Result<StreamSummary> {
        let request = &models::stream_request();
        let route = format!("/v1beta/models/{}:streamGenerateContent", model);

        let summary = self
            .attempt_candidates(&route, |url| {
                println!("Model: {}", model);
                self.stream_once(url, request)
            })
            .await?;

        println!("Stream complete, total length: {} characters", summary.char_len());
        if summary.skipped > 0 {
            println!("Skipped {} malformed lines", summary.skipped);
        }
        Ok(summary)
    }

    async fn generate(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse> {
        let route = format!("/v1beta/models/{}:generateContent", model);

        let resp: GenerateContentResponse = self
            .attempt_candidates(&route, |url| {
                println!("Model: {}", model);
                self.post_json(url, request, self.config.generation_timeout())
            })
            .await?;

        if let Some(usage) = &resp.usage_metadata {
            debug!(
                "Tokens - prompt: {}, response: {}, total: {}",
                usage.prompt_token_count, usage.candidates_token_count, usage.total_token_count
            );
        }
        if let Some(reason) = resp.candidates.first().and_then(|c| c.finish_reason.as_deref()) {
            debug!("Finish reason: {}", reason);
        }
        Ok(resp)
    }

    /// Try `route` under every configured prefix, in order, and return the
    /// first success. Failures are logged and collected.
    async fn attempt_candidates<T, F, Fut>(&self, route: &str, mut call: F) -> Result<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = Vec::new();

        for path in self.config.candidate_paths(route) {
            println!("\nEndpoint: {}", path);
            match call(self.config.url(&path)).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    warn!("Request to {} failed: {}", path, error);
                    attempts.push(AttemptFailure { path, error });
                }
            }
        }

        Err(ProbeError::AllCandidatesFailed { attempts })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String, limit: Duration) -> Result<T> {
        debug!("GET {}", url);
        let response = self.http_client.get(&url).timeout(limit).send().await?;
        read_json(response, limit).await
    }

    async fn post_json<B, T>(&self, url: String, body: &B, limit: Duration) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!("POST {}", url);
        let response = self
            .http_client
            .post(&url)
            .json(body)
            .timeout(limit)
            .send()
            .await?;
        read_json(response, limit).await
    }

    /// One streaming attempt. No overall deadline: the body may legitimately
    /// take minutes, so only the wait for headers and each chunk is bounded.
    async fn stream_once(
        &self,
        url: String,
        request: &GenerateContentRequest,
    ) -> Result<StreamSummary> {
        let url = if self.config.alt_sse() {
            format!("{}?alt=sse", url)
        } else {
            url
        };
        debug!("POST {} (stream)", url);

        let limit = self.config.generation_timeout();
        let response = timeout(limit, self.http_client.post(&url).json(request).send())
            .await
            .map_err(|_| ProbeError::Timeout {
                operation: "response headers",
                secs: limit.as_secs(),
            })??;

        let response = check_status(response, limit).await?;

        println!("Receiving stream:");
        println!("{}", "-".repeat(30));

        let summary = consume_stream(response.bytes_stream(), limit, |text| {
            print!("{}", text);
            std::io::stdout().flush().ok();
        })
        .await;

        println!("\n{}", "-".repeat(30));
        summary
    }
}

/// Pass 200 responses through; turn anything else into `ApiError` with the
/// response body as the message. Reading the body is bounded by `limit`.
async fn check_status(response: Response, limit: Duration) -> Result<Response> {
    let status = response.status();
    println!("Status: {}", status.as_u16());

    match status {
        StatusCode::OK => Ok(response),
        status => {
            let error_body = match timeout(limit, response.text()).await {
                Ok(Ok(body)) => body,
                Ok(Err(_)) => "Unknown error".to_string(),
                Err(_) => format!(
                    "Unknown error (body not received within {}s)",
                    limit.as_secs()
                ),
            };
            Err(ProbeError::ApiError {
                status: status.as_u16(),
                message: error_body,
            })
        }
    }
}

async fn read_json<T: DeserializeOwned>(response: Response, limit: Duration) -> Result<T> {
    let response = check_status(response, limit).await?;
    let body = response.text().await?;
    Ok(serde_json::from_str(&body)?)
}

fn print_first_text(resp: &GenerateContentResponse) {
    if let Some(text) = resp.first_text() {
        println!("Generated content:\n{}", text);
    }
}
