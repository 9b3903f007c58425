use super::types::{ChatCompletionResponse, ChatMessage, Choice, Role, UpstreamResponse};

pub const THINK_OPEN: &str = "<think>\n";
pub const THINK_CLOSE: &str = "\n</think>";

/// Fold reasoning into the visible text: `<think>\n{reasoning}\n</think>\n\n{content}`.
///
/// Empty or missing reasoning leaves `content` as is, so an empty tag pair is
/// never produced.
pub fn fold_reasoning(reasoning: Option<&str>, content: &str, show_reasoning: bool) -> String {
    match reasoning.filter(|r| show_reasoning && !r.is_empty()) {
        Some(reasoning) => format!("{THINK_OPEN}{reasoning}{THINK_CLOSE}\n\n{content}"),
        None => content.to_string(),
    }
}

/// Translate an upstream completion into the response the consumer sees.
/// Pure function: `advertised_model` always replaces the upstream model id.
pub fn translate_response(
    resp: &UpstreamResponse,
    advertised_model: &str,
    show_reasoning: bool,
) -> ChatCompletionResponse {
    let choice = resp.choices.first();
    let message = choice.map(|c| &c.message);

    let content = fold_reasoning(
        message.and_then(|m| m.reasoning_content.as_deref()),
        message.and_then(|m| m.content.as_deref()).unwrap_or_default(),
        show_reasoning,
    );

    let finish_reason = choice
        .and_then(|c| c.finish_reason.clone())
        .unwrap_or_else(|| "stop".to_string());

    ChatCompletionResponse {
        id: resp.id.clone().unwrap_or_else(new_completion_id),
        object: "chat.completion".to_string(),
        created: resp.created.unwrap_or_else(|| chrono::Utc::now().timestamp()),
        model: advertised_model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: ChatMessage::new(Role::Assistant, content),
            finish_reason,
        }],
        usage: resp.usage.clone().unwrap_or_default(),
    }
}

pub fn new_completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}
