//! Fire-and-forget conversation titling.
//!
//! After the first completed turn an untitled conversation gets a short
//! model-generated title. The task runs detached; any failure is logged and
//! swallowed so titling can never affect a turn's outcome.

use std::sync::Arc;
use tracing::{debug, info};

use crate::bus::{Event, EventBus, Topic};
use crate::conversation::{ConversationStore, Message};
use crate::providers::{ChatOptions, ModelProvider, TokenSink};

pub const TITLE_MAX_TOKENS: u32 = 20;

const TITLE_PROMPT: &str = "Generate a short title (3 to 6 words) for a conversation that \
starts with the following user message. Reply with only the title, no quotes.\n\n";

fn clean_title(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '\u{201c}' || c == '\u{201d}')
        .trim()
        .to_string()
}

pub(super) fn spawn_title_task(
    provider: Arc<dyn ModelProvider>,
    store: Arc<dyn ConversationStore>,
    bus: Arc<EventBus>,
    database: String,
    conversation_id: String,
    first_input: String,
) {
    tokio::spawn(async move {
        let prompt = format!("{TITLE_PROMPT}{first_input}");
        let response = provider
            .chat_stream(
                vec![Message::user(&prompt)],
                Vec::new(),
                None,
                ChatOptions::new().with_max_tokens(TITLE_MAX_TOKENS),
                TokenSink::disabled(),
            )
            .await;

        let title = match response {
            Ok(r) => clean_title(&r.content),
            Err(e) => {
                debug!(%conversation_id, error = %e, "title generation failed");
                return;
            }
        };
        if title.is_empty() {
            debug!(%conversation_id, "title generation produced empty output");
            return;
        }

        if let Err(e) = store.set_title(&conversation_id, &title).await {
            debug!(%conversation_id, error = %e, "failed to persist title");
            return;
        }
        info!(%conversation_id, %title, "conversation titled");
        bus.publish(
            &Topic::conversation(&database, &conversation_id),
            "engine",
            Event::TitleChanged { title },
        );
    });
}
