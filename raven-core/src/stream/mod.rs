//! Stream Decoder: turns `stream-json` subprocess stdout into typed
//! observability events.
//!
//! No direct analog exists upstream of this — agents elsewhere talk
//! to providers through `rig-core`'s typed completion API and never
//! parses a coding-CLI's line-oriented JSON transcript. This module is
//! built fresh from the spec's event-shape description, using the same
//! tolerant-parsing posture applied elsewhere (`harness`'s
//! "malformed input never crashes the session" rule): a bad line is
//! skipped and counted, never fatal.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::RavenResult;

/// One decoded line of `stream-json` output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    SystemInit {
        #[serde(default)]
        tools: Vec<String>,
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    #[serde(rename = "assistant")]
    AssistantMessage { content: Vec<ContentBlock> },
    #[serde(rename = "user")]
    UserMessage { content: Vec<ContentBlock> },
    Result {
        #[serde(default)]
        cost_usd: Option<f64>,
        #[serde(default)]
        duration_ms: Option<u64>,
        #[serde(default)]
        num_turns: Option<u32>,
        #[serde(default)]
        usage: Option<Value>,
        #[serde(default)]
        is_error: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        #[serde(default)]
        tool_use_id: String,
        #[serde(default)]
        content: Value,
    },
}

impl StreamEvent {
    /// Short human-facing preview, used for `agent_thinking`-class
    /// observability events. Never panics on a structurally absent field.
    pub fn preview(&self) -> String {
        match self {
            StreamEvent::SystemInit { model, .. } => {
                format!("session started (model={})", model.as_deref().unwrap_or("?"))
            }
            StreamEvent::AssistantMessage { content } => content
                .iter()
                .find_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.chars().take(160).collect()),
                    ContentBlock::ToolUse { name, .. } => Some(format!("tool_use: {name}")),
                    _ => None,
                })
                .unwrap_or_default(),
            StreamEvent::UserMessage { .. } => "tool result received".to_string(),
            StreamEvent::Result { is_error, .. } => {
                if *is_error {
                    "agent run finished with error".to_string()
                } else {
                    "agent run finished".to_string()
                }
            }
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, StreamEvent::AssistantMessage { content } if content.iter().any(|b| matches!(b, ContentBlock::Text { .. })))
    }

    pub fn is_tool_use(&self) -> bool {
        matches!(self, StreamEvent::AssistantMessage { content } if content.iter().any(|b| matches!(b, ContentBlock::ToolUse { .. })))
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, StreamEvent::UserMessage { content } if content.iter().any(|b| matches!(b, ContentBlock::ToolResult { .. })))
    }

    pub fn text_content(&self) -> String {
        match self {
            StreamEvent::AssistantMessage { content } => content
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
            _ => String::new(),
        }
    }

    pub fn tool_use_blocks(&self) -> Vec<(&str, &Value)> {
        match self {
            StreamEvent::AssistantMessage { content } => content
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolUse { name, input, .. } => Some((name.as_str(), input)),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn input_string(&self) -> String {
        self.tool_use_blocks()
            .first()
            .map(|(_, v)| v.to_string())
            .unwrap_or_default()
    }

    pub fn content_string(&self) -> String {
        match self {
            StreamEvent::UserMessage { content } => content
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolResult { content, .. } => Some(content.to_string()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
            _ => String::new(),
        }
    }
}

/// Scanner buffer floor (§4.3: "≥1 MiB per line").
pub const MIN_LINE_BUFFER: usize = 1024 * 1024;

#[derive(Debug, Default)]
pub struct StreamDecoder {
    malformed_lines: u64,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn malformed_line_count(&self) -> u64 {
        self.malformed_lines
    }

    /// Decode a single line. Blank lines and parse failures are not fatal:
    /// they are counted and `None` is returned so the caller continues.
    pub fn feed_line(&mut self, line: &str) -> Option<StreamEvent> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        match serde_json::from_str::<StreamEvent>(trimmed) {
            Ok(event) => Some(event),
            Err(_) => {
                self.malformed_lines += 1;
                None
            }
        }
    }

    /// Push-style decode: reads lines from `reader` until EOF or
    /// cancellation, forwarding decoded events to `events_out`. Closes
    /// the channel (by dropping the sender) on return, per the
    /// ownership contract in the spec's design notes.
    pub async fn decode<R>(
        &mut self,
        cancel: CancellationToken,
        mut reader: R,
        events_out: mpsc::Sender<StreamEvent>,
    ) -> RavenResult<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut line = String::with_capacity(MIN_LINE_BUFFER.min(64 * 1024));
        loop {
            line.clear();
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                read = reader.read_line(&mut line) => {
                    match read {
                        Ok(0) => return Ok(()),
                        Ok(_) => {
                            if let Some(event) = self.feed_line(&line) {
                                if events_out.send(event).await.is_err() {
                                    return Ok(());
                                }
                            }
                        }
                        Err(_) => {
                            self.malformed_lines += 1;
                            continue;
                        }
                    }
                }
            }
        }
    }
}
