use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::logging::{LogEntry, RequestLogger, SharedLogger};
use crate::translate::request::enrich_request;
use crate::translate::response::translate_response;
use crate::translate::streaming::{OutboundFrame, StreamTranslator};
use crate::translate::types::{
    ChatCompletionResponse, ChatMessage, ChatTemplateKwargs, ErrorResponse, InboundRequest, Role,
    UpstreamRequest, UpstreamResponse, Usage,
};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::Stream;
use futures::StreamExt;
use serde::Serialize;
use std::pin::Pin;
use std::time::{Duration, Instant};

/// Outbound SSE frames for a streaming request.
pub type SseStream = Pin<Box<dyn Stream<Item = OutboundFrame> + Send>>;

/// A successful upstream call and the candidate that answered it.
#[derive(Debug)]
pub struct CallSuccess {
    pub model: String,
    pub response: UpstreamResponse,
}

/// Forward a non-streaming request through the candidate list.
pub async fn proxy_non_streaming(
    req: &InboundRequest,
    config: &ProxyConfig,
    client: &reqwest::Client,
    log: &RequestLogger,
) -> Result<ChatCompletionResponse> {
    let upstream_req = enrich_request(req, config);
    let success = call_with_fallback(&upstream_req, config, client, log).await?;

    let resp = translate_response(
        &success.response,
        &config.models.advertised,
        config.features.reasoning_display,
    );

    log.info(
        "proxy",
        format!(
            "Completed via {}: in={} out={} tokens",
            success.model, resp.usage.prompt_tokens, resp.usage.completion_tokens
        ),
    );

    Ok(resp)
}

/// Forward a streaming request, returning the translated SSE frames.
///
/// Fallback covers opening the stream only; once a candidate has answered
/// with 2xx, a failure mid-stream just ends the outbound stream.
pub async fn proxy_streaming(
    req: &InboundRequest,
    config: &ProxyConfig,
    client: &reqwest::Client,
    log: &RequestLogger,
) -> Result<SseStream> {
    let upstream_req = enrich_request(req, config);
    let (model, response) = open_stream_with_fallback(&upstream_req, config, client, log).await?;

    log.info("proxy", format!("Streaming from {model}"));

    let translator = StreamTranslator::new(
        &config.models.advertised,
        config.features.reasoning_display,
    );

    Ok(Box::pin(sse_translate_stream(
        response.bytes_stream(),
        translator,
        log.clone(),
    )))
}

/// Try each candidate in order; the first 2xx with a parseable body wins.
pub async fn call_with_fallback(
    req: &UpstreamRequest,
    config: &ProxyConfig,
    client: &reqwest::Client,
    log: &RequestLogger,
) -> Result<CallSuccess> {
    let url = completions_url(&config.effective_base_url()?);
    let api_key = config.api_key()?;

    let mut attempts = 0;
    let mut last_error = None;

    for model in &config.models.candidates {
        attempts += 1;
        let started = Instant::now();
        log.info("proxy", format!("POST {url} model={model}"));

        match call_once(client, &url, api_key, &req.for_model(model), config.timeout()).await {
            Ok((_, response)) => {
                log.info(
                    "proxy",
                    format!("model={model} succeeded in {}ms", started.elapsed().as_millis()),
                );
                return Ok(CallSuccess {
                    model: model.clone(),
                    response,
                });
            }
            Err(e) => {
                log.warn(
                    "proxy",
                    format!("model={model} failed after {}ms: {e}", started.elapsed().as_millis()),
                );
                last_error = Some(e);
            }
        }
    }

    Err(exhausted(attempts, last_error, log))
}

/// Same ordering rules as [`call_with_fallback`], but success is decided on
/// the response status alone since the body is still streaming.
pub async fn open_stream_with_fallback(
    req: &UpstreamRequest,
    config: &ProxyConfig,
    client: &reqwest::Client,
    log: &RequestLogger,
) -> Result<(String, reqwest::Response)> {
    let url = completions_url(&config.effective_base_url()?);
    let api_key = config.api_key()?;

    let mut attempts = 0;
    let mut last_error = None;

    for model in &config.models.candidates {
        attempts += 1;
        log.info("proxy", format!("POST {url} model={model} (streaming)"));

        let body = req.for_model(model);
        let attempt = open_stream_once(client, &url, api_key, &body);
        let outcome = match tokio::time::timeout(config.timeout(), attempt).await {
            Ok(outcome) => outcome,
            Err(_) => Err(timed_out(config.timeout())),
        };

        match outcome {
            Ok(response) => return Ok((model.clone(), response)),
            Err(e) => {
                log.warn("proxy", format!("model={model} failed to open stream: {e}"));
                last_error = Some(e);
            }
        }
    }

    Err(exhausted(attempts, last_error, log))
}

/// Send a streaming request and read the error body on non-2xx.
///
/// The caller bounds the whole future, error body included, by the
/// per-attempt timeout. A 2xx response is returned with its body unread.
async fn open_stream_once(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    req: &UpstreamRequest,
) -> Result<reqwest::Response> {
    let response = client
        .post(url)
        .header("Authorization", format!("Bearer {api_key}"))
        .json(req)
        .send()
        .await
        .map_err(|e| transport_error(&e))?;

    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(upstream_error(status, &body))
}

/// One POST to the upstream with a per-attempt timeout.
pub async fn call_once(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    req: &UpstreamRequest,
    timeout: Duration,
) -> Result<(u16, UpstreamResponse)> {
    let response = client
        .post(url)
        .header("Authorization", format!("Bearer {api_key}"))
        .json(req)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| transport_error(&e))?;

    let status = response.status().as_u16();
    let body = response.text().await.map_err(|e| transport_error(&e))?;

    if !(200..300).contains(&status) {
        return Err(upstream_error(status, &body));
    }

    let parsed = serde_json::from_str(&body).map_err(|e| {
        ProxyError::translation(format!("{e}. Body: {}", truncate(&body, 300)))
    })?;

    Ok((status, parsed))
}

/// Parse an upstream SSE byte stream and translate it frame by frame.
fn sse_translate_stream(
    byte_stream: impl Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + 'static,
    mut translator: StreamTranslator,
    log: RequestLogger,
) -> impl Stream<Item = OutboundFrame> + Send + 'static {
    async_stream::stream! {
        let mut failed = false;
        let mut frames = 0usize;

        tokio::pin!(byte_stream);

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = match chunk_result {
                Ok(c) => c,
                Err(e) => {
                    log.error("stream", format!("Upstream stream error: {e}"));
                    failed = true;
                    break;
                }
            };

            for frame in translator.push(&chunk) {
                frames += 1;
                yield frame;
            }
            if translator.is_done() {
                break;
            }
        }

        if !failed {
            for frame in translator.finish() {
                frames += 1;
                yield frame;
            }
            log.info("stream", format!("Stream completed ({frames} frames)"));
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SmokeTestReport {
    pub success: bool,
    pub model: String,
    pub content: String,
    pub reasoning: Option<String>,
    pub usage: Usage,
}

/// Fixed request through the normal fallback path; reports raw upstream fields.
pub async fn smoke_test(
    config: &ProxyConfig,
    client: &reqwest::Client,
    log: &RequestLogger,
) -> Result<SmokeTestReport> {
    let req = UpstreamRequest {
        model: config.models.candidates.first().cloned().unwrap_or_default(),
        messages: vec![ChatMessage::new(
            Role::User,
            "Hello! Introduce yourself in one short sentence.",
        )],
        temperature: 0.7,
        max_tokens: 100,
        top_p: None,
        stream: false,
        chat_template_kwargs: config
            .features
            .thinking_mode
            .then_some(ChatTemplateKwargs { thinking: true }),
    };

    let success = call_with_fallback(&req, config, client, log).await?;
    let message = success
        .response
        .choices
        .first()
        .map(|c| c.message.clone())
        .unwrap_or_default();

    Ok(SmokeTestReport {
        success: true,
        model: success.model,
        content: message.content.unwrap_or_default(),
        reasoning: message.reasoning_content,
        usage: success.response.usage.unwrap_or_default(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub base_url: String,
    pub model: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    pub timestamp: DateTime<Utc>,
    pub api_key_prefix: String,
    pub results: Vec<ProbeResult>,
    pub summary: DiagnosticSummary,
    pub recent_errors: Vec<LogEntry>,
}

/// Probe every base URL × candidate model combination, sequentially.
pub async fn diagnose(
    config: &ProxyConfig,
    client: &reqwest::Client,
    logger: &SharedLogger,
) -> DiagnosticReport {
    let api_key = config.api_key.as_deref().unwrap_or_default();
    let mut results = Vec::new();

    for base_url in config.diagnostic_base_urls() {
        let url = completions_url(&base_url);
        for model in &config.models.candidates {
            let req = UpstreamRequest {
                model: model.clone(),
                messages: vec![ChatMessage::new(Role::User, "ping")],
                temperature: 0.7,
                max_tokens: 10,
                top_p: None,
                stream: false,
                chat_template_kwargs: None,
            };

            let started = Instant::now();
            let outcome = call_once(client, &url, api_key, &req, config.timeout()).await;
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            let result = match outcome {
                Ok((status, _)) => ProbeResult {
                    base_url: base_url.clone(),
                    model: model.clone(),
                    success: true,
                    status: Some(status),
                    error: None,
                    elapsed_ms,
                },
                Err(e) => ProbeResult {
                    base_url: base_url.clone(),
                    model: model.clone(),
                    success: false,
                    status: e.upstream_status_code(),
                    error: Some(e.to_string()),
                    elapsed_ms,
                },
            };

            logger.info(
                "diagnose",
                format!(
                    "{} model={} success={}",
                    result.base_url, result.model, result.success
                ),
            );
            results.push(result);
        }
    }

    let succeeded = results.iter().filter(|r| r.success).count();
    DiagnosticReport {
        timestamp: Utc::now(),
        api_key_prefix: mask_key(config.api_key.as_deref()),
        summary: DiagnosticSummary {
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
        },
        results,
        recent_errors: logger.recent_errors(10),
    }
}

/// First eight characters of the credential, never the whole thing.
pub fn mask_key(key: Option<&str>) -> String {
    match key {
        Some(k) if !k.is_empty() => format!("{}...", k.chars().take(8).collect::<String>()),
        _ => "<unset>".to_string(),
    }
}

pub fn completions_url(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

fn exhausted(attempts: usize, last: Option<ProxyError>, log: &RequestLogger) -> ProxyError {
    let last = last.unwrap_or_else(|| ProxyError::config("No candidate models configured"));
    log.error("proxy", format!("All {attempts} candidate(s) failed; last: {last}"));
    ProxyError::AllCandidatesFailed {
        attempts,
        last: Box::new(last),
    }
}

fn upstream_error(status: u16, body: &str) -> ProxyError {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(err) if !err.error.message.is_empty() => ProxyError::upstream(status, err.error.message),
        _ => ProxyError::upstream_status(status),
    }
}

fn transport_error(e: &reqwest::Error) -> ProxyError {
    if e.is_timeout() {
        ProxyError::transport("request timed out")
    } else {
        ProxyError::transport(e.to_string())
    }
}

fn timed_out(timeout: Duration) -> ProxyError {
    ProxyError::transport(format!("no response within {}s", timeout.as_secs()))
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_key() {
        assert_eq!(mask_key(Some("nvapi-1234567890")), "nvapi-12...");
        assert_eq!(mask_key(Some("abc")), "abc...");
        assert_eq!(mask_key(Some("")), "<unset>");
        assert_eq!(mask_key(None), "<unset>");
    }

    #[test]
    fn test_completions_url() {
        assert_eq!(
            completions_url("https://integrate.api.nvidia.com/v1/"),
            "https://integrate.api.nvidia.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_upstream_error_extracts_message() {
        let err = upstream_error(404, r#"{"error":{"message":"Model not found","type":"invalid_request_error"}}"#);
        assert_eq!(err.upstream_status_code(), Some(404));
        assert_eq!(err.status_and_body().1.error.message, "Model not found");

        let err = upstream_error(502, "<html>Bad Gateway</html>");
        assert_eq!(err.status_and_body().0, 500);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("short", 300), "short");
    }
}
