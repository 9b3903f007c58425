//! Turn a consumer request into the request we send upstream.
//!
//! Sampling parameters are clamped into ranges every upstream accepts, the
//! advisory `model` is replaced by the first candidate, and multi-turn
//! conversations without a system message get the roleplay prompt.

use super::types::{ChatMessage, ChatTemplateKwargs, InboundRequest, Role, UpstreamRequest};
use crate::config::ProxyConfig;

pub const MIN_TEMPERATURE: f64 = 0.1;
pub const MAX_TEMPERATURE: f64 = 2.0;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

pub const MIN_MAX_TOKENS: i64 = 100;
pub const MAX_MAX_TOKENS: i64 = 4000;
pub const DEFAULT_MAX_TOKENS: i64 = 2048;

/// Build the upstream request. Pure: the inbound request is only read.
pub fn enrich_request(req: &InboundRequest, config: &ProxyConfig) -> UpstreamRequest {
    let mut messages: Vec<ChatMessage> = req.messages.iter().map(ChatMessage::from).collect();

    if config.features.system_prompt_injection && needs_system_prompt(&messages) {
        messages.insert(0, ChatMessage::new(Role::System, config.system_prompt()));
    }

    let model = config
        .models
        .candidates
        .first()
        .cloned()
        .unwrap_or_default();

    let chat_template_kwargs = config
        .features
        .thinking_mode
        .then_some(ChatTemplateKwargs { thinking: true });

    UpstreamRequest {
        model,
        messages,
        temperature: clamp_temperature(req.temperature),
        max_tokens: clamp_max_tokens(req.max_tokens),
        top_p: req.top_p,
        stream: req.is_streaming(),
        chat_template_kwargs,
    }
}

/// A conversation is "in progress" when it has history, ends on a user turn,
/// and nobody set a system message yet.
fn needs_system_prompt(messages: &[ChatMessage]) -> bool {
    messages.len() > 1
        && messages.last().map(|m| m.role) == Some(Role::User)
        && !messages.iter().any(|m| m.role == Role::System)
}

pub fn clamp_temperature(temperature: Option<f64>) -> f64 {
    temperature
        .filter(|t| t.is_finite())
        .unwrap_or(DEFAULT_TEMPERATURE)
        .clamp(MIN_TEMPERATURE, MAX_TEMPERATURE)
}

pub fn clamp_max_tokens(max_tokens: Option<i64>) -> u32 {
    let clamped = max_tokens
        .unwrap_or(DEFAULT_MAX_TOKENS)
        .clamp(MIN_MAX_TOKENS, MAX_MAX_TOKENS);
    // Bounded above by MAX_MAX_TOKENS, so this never truncates.
    clamped as u32
}
