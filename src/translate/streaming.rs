//! Incremental translation of an upstream SSE byte stream.
//!
//! The [`StreamTranslator`] owns the partial-line buffer: bytes are appended
//! as they arrive, only complete `\n`-terminated lines are parsed, and the
//! trailing fragment waits for the next read. The buffer holds raw bytes, so a
//! multi-byte character split across reads is reassembled before decoding.

use super::response::fold_reasoning;
use super::types::{ChatCompletionChunk, ChunkChoice, ChunkDelta};

/// One outbound SSE record, sent as `data: <payload>\n\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// A translated chunk, or an upstream record we could not parse (verbatim).
    Data(String),
    /// The terminal `[DONE]` marker.
    Done,
}

impl OutboundFrame {
    pub fn payload(&self) -> &str {
        match self {
            Self::Data(data) => data,
            Self::Done => "[DONE]",
        }
    }
}

/// Translates upstream chunks into consumer chunks.
///
/// Usage:
///   let mut translator = StreamTranslator::new("gpt-4", true);
///   for bytes in upstream {
///       for frame in translator.push(&bytes) { /* send */ }
///   }
///   for frame in translator.finish() { /* send */ }
#[derive(Debug)]
pub struct StreamTranslator {
    advertised_model: String,
    show_reasoning: bool,
    buffer: Vec<u8>,
    done: bool,
}

impl StreamTranslator {
    pub fn new(advertised_model: &str, show_reasoning: bool) -> Self {
        Self {
            advertised_model: advertised_model.to_string(),
            show_reasoning,
            buffer: Vec::new(),
            done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed one network read; returns the frames for every line it completed.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        if self.done {
            return frames;
        }

        self.buffer.extend_from_slice(bytes);

        let Some(last_newline) = self.buffer.iter().rposition(|&b| b == b'\n') else {
            return frames;
        };
        let remainder = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, remainder);

        for line in complete.split(|&b| b == b'\n') {
            self.process_line(line, &mut frames);
            if self.done {
                self.buffer.clear();
                break;
            }
        }

        frames
    }

    /// Upstream closed. Flushes a final unterminated line and guarantees
    /// exactly one `[DONE]` over the life of the translator.
    pub fn finish(&mut self) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        if self.done {
            return frames;
        }

        let residual = std::mem::take(&mut self.buffer);
        self.process_line(&residual, &mut frames);

        if !self.done {
            frames.push(OutboundFrame::Done);
            self.done = true;
        }
        frames
    }

    fn process_line(&mut self, raw: &[u8], frames: &mut Vec<OutboundFrame>) {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim();

        // Blank separators, `: keep-alive` comments and `event:`/`id:` fields
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim_start();

        if data == "[DONE]" {
            frames.push(OutboundFrame::Done);
            self.done = true;
            return;
        }

        match serde_json::from_str::<ChatCompletionChunk>(data) {
            Ok(chunk) => {
                if let Some(json) = self.translate_chunk(&chunk) {
                    frames.push(OutboundFrame::Data(json));
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "Forwarding unparseable stream record verbatim");
                // SSE field values cannot carry a bare carriage return
                frames.push(OutboundFrame::Data(data.replace('\r', "")));
            }
        }
    }

    /// `None` when the delta has nothing visible to show.
    fn translate_chunk(&self, chunk: &ChatCompletionChunk) -> Option<String> {
        let choice = chunk.choices.first()?;
        let content = choice.delta.content.as_deref().unwrap_or_default();
        let reasoning = choice
            .delta
            .reasoning_content
            .as_deref()
            .filter(|r| self.show_reasoning && !r.is_empty());

        let text = match reasoning {
            Some(_) => fold_reasoning(reasoning, content, true),
            None if !content.is_empty() => content.to_string(),
            None => return None,
        };

        let outbound = ChatCompletionChunk {
            id: chunk.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: chunk.created,
            model: Some(self.advertised_model.clone()),
            choices: vec![ChunkChoice {
                index: choice.index,
                delta: ChunkDelta {
                    role: choice.delta.role.clone(),
                    content: Some(text),
                    reasoning_content: None,
                },
                finish_reason: choice.finish_reason.clone(),
            }],
            usage: chunk.usage.clone(),
        };

        match serde_json::to_string(&outbound) {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping stream delta that failed to serialize");
                None
            }
        }
    }
}
