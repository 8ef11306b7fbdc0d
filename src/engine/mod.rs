//! The agent execution core.
//!
//! `AgentEngine` owns the tool-calling loop: it accepts a user turn, streams
//! model output onto the event bus, dispatches tool calls through the safety
//! gate and approval coordinator, and keeps iterating until the model stops
//! asking for tools or a bound is hit. One turn per conversation at a time;
//! a second submission while a turn runs is rejected immediately.

use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::approval::{ApprovalCoordinator, ApprovalVerdict};
use crate::bus::{Event, EventBus, Topic};
use crate::compact::{compact_conversation, CompactionReport};
use crate::config::Config;
use crate::conversation::{
    CancelFlag, Conversation, ConversationControl, ConversationStore, Message, ToolCall,
    ToolCallRecord, ToolCallStatus,
};
use crate::error::{Result, SalonError};
use crate::providers::{ChatOptions, ModelProvider, ProviderResponse, TokenSink};
use crate::safety::{self, SafetyDecision};
use crate::tokens::TokenAccountant;
use crate::tools::{ToolContext, ToolRegistry, ToolResult, ToolStatus};

mod title;

pub use title::TITLE_MAX_TOKENS;

/// How often the background sweep denies approvals nobody answered.
const APPROVAL_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

/// How a locally attached surface (a terminal prompt) answers approval
/// requests in-process instead of round-tripping through the bus.
#[async_trait::async_trait]
pub trait ConfirmPrompt: Send + Sync {
    async fn confirm(&self, description: &str) -> bool;
}

/// Text content attached to a turn (a pasted file, a log excerpt). Folded
/// into the user message rather than carried as a separate modality.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: String,
    pub text: String,
}

/// One turn submission.
pub struct TurnRequest {
    pub conversation_id: String,
    pub input: String,
    pub attachments: Vec<Attachment>,
    /// Client identifier stamped on every event this turn produces.
    pub origin: String,
    /// Per-turn override of the configured iteration bound.
    pub max_iterations: Option<usize>,
    /// When set, approvals resolve through this prompt instead of the
    /// coordinator.
    pub confirm: Option<Arc<dyn ConfirmPrompt>>,
}

impl TurnRequest {
    pub fn new(conversation_id: &str, input: &str, origin: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            input: input.to_string(),
            attachments: Vec::new(),
            origin: origin.to_string(),
            max_iterations: None,
            confirm: None,
        }
    }

    pub fn with_confirm(mut self, confirm: Arc<dyn ConfirmPrompt>) -> Self {
        self.confirm = Some(confirm);
        self
    }

    pub fn with_attachment(mut self, name: &str, text: &str) -> Self {
        self.attachments.push(Attachment {
            name: name.to_string(),
            text: text.to_string(),
        });
        self
    }

    /// The user message as the model sees it, attachments appended.
    fn folded_input(&self) -> String {
        let mut input = self.input.clone();
        for attachment in &self.attachments {
            input.push_str(&format!(
                "\n\n[Attached file: {}]\n{}",
                attachment.name, attachment.text
            ));
        }
        input
    }
}

/// Terminal state of a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Cancelled,
    IterationLimitReached,
    Failed { reason: String },
}

/// What a finished turn reports back to the submitter.
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub outcome: TurnOutcome,
    /// Model invocations this turn used.
    pub iterations: usize,
    /// Present when a pre-turn compaction ran.
    pub compaction: Option<CompactionReport>,
}

/// Mutable per-turn state threaded through the loop. Never global; a turn
/// carries its own counters and its own cancellation flag.
struct TurnContext {
    iteration: usize,
    response_chars: usize,
    started_at: std::time::Instant,
    cancel: CancelFlag,
}

impl TurnContext {
    fn new(cancel: CancelFlag) -> Self {
        Self {
            iteration: 0,
            response_chars: 0,
            started_at: std::time::Instant::now(),
            cancel,
        }
    }

    fn finish(&self, conversation_id: &str, outcome: &TurnOutcome) {
        info!(
            conversation_id,
            iterations = self.iteration,
            response_chars = self.response_chars,
            elapsed_ms = self.started_at.elapsed().as_millis() as u64,
            outcome = ?outcome,
            "turn finished"
        );
    }
}

pub struct AgentEngine {
    config: Config,
    workspace: PathBuf,
    database: String,
    store: Arc<dyn ConversationStore>,
    tools: Arc<ToolRegistry>,
    provider: Arc<dyn ModelProvider>,
    bus: Arc<EventBus>,
    approvals: Arc<ApprovalCoordinator>,
    control: ConversationControl,
    accountant: TokenAccountant,
    /// Periodic stale-approval sweep; aborted when the engine drops.
    sweeper: Option<tokio::task::JoinHandle<()>>,
}

impl AgentEngine {
    pub fn new(
        config: Config,
        store: Arc<dyn ConversationStore>,
        tools: Arc<ToolRegistry>,
        provider: Arc<dyn ModelProvider>,
        bus: Arc<EventBus>,
    ) -> Self {
        let workspace = config
            .workspace
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let approvals = Arc::new(ApprovalCoordinator::new(
            config.agent.approval_timeout_secs,
            config.agent.approval_expire_secs,
        ));
        // Outside a runtime there is nothing to spawn on; embedding callers
        // in that position drive `ApprovalCoordinator::expire_stale` themselves.
        let sweeper = tokio::runtime::Handle::try_current().ok().map(|handle| {
            let approvals = Arc::clone(&approvals);
            handle.spawn(async move {
                let mut tick = tokio::time::interval(APPROVAL_SWEEP_INTERVAL);
                loop {
                    tick.tick().await;
                    approvals.expire_stale().await;
                }
            })
        });
        Self {
            database: config.database.clone(),
            workspace,
            config,
            store,
            tools,
            provider,
            bus,
            approvals,
            control: ConversationControl::new(),
            accountant: TokenAccountant::new(),
            sweeper,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn approvals(&self) -> &Arc<ApprovalCoordinator> {
        &self.approvals
    }

    pub async fn create_conversation(&self) -> Result<Conversation> {
        let conversation = self.store.create().await?;
        self.bus.publish(
            &Topic::database(&self.database),
            "engine",
            Event::ConversationCreated {
                conversation_id: conversation.id.clone(),
            },
        );
        Ok(conversation)
    }

    pub async fn delete_conversation(&self, id: &str) -> Result<bool> {
        let deleted = self.store.delete(id).await?;
        if deleted {
            self.control.forget(id).await;
            self.bus.publish(
                &Topic::database(&self.database),
                "engine",
                Event::ConversationDeleted {
                    conversation_id: id.to_string(),
                },
            );
        }
        Ok(deleted)
    }

    /// Request cancellation of the running turn. Returns whether a turn was
    /// actually running. Cancellation is cooperative: the turn stops at its
    /// next suspension point and everything already persisted stays.
    pub async fn cancel(&self, conversation_id: &str) -> bool {
        self.control.request_cancel(conversation_id).await
    }

    /// Resolve a pending approval. Returns false for an unknown or already
    /// resolved id, so a second responder is a harmless no-op.
    pub async fn respond_approval(&self, approval_id: &str, approved: bool) -> bool {
        self.approvals.resolve(approval_id, approved).await
    }

    /// Change the model used for subsequent turns in this conversation. The
    /// running turn, if any, finishes on the model it started with.
    pub async fn switch_model(&self, conversation_id: &str, model: &str) -> Result<()> {
        self.store.set_model(conversation_id, model).await
    }

    /// Explicitly compact a conversation's history.
    pub async fn compact(&self, conversation_id: &str) -> Result<CompactionReport> {
        let model = self
            .store
            .get(conversation_id)
            .await?
            .and_then(|c| c.model);
        compact_conversation(
            self.provider.as_ref(),
            self.store.as_ref(),
            &self.accountant,
            conversation_id,
            model.as_deref(),
            self.config.context.min_compact_messages,
        )
        .await
    }

    /// Run one user turn to completion.
    pub async fn submit_turn(&self, request: TurnRequest) -> Result<TurnReport> {
        let guard = self.control.try_begin(&request.conversation_id).await?;
        let cancel = guard.cancel_flag();

        let conversation = self
            .store
            .get(&request.conversation_id)
            .await?
            .ok_or_else(|| SalonError::ConversationNotFound(request.conversation_id.clone()))?;
        let model = conversation.model.clone();
        let topic = Topic::conversation(&self.database, &request.conversation_id);
        let input = request.folded_input();

        let compaction = self.enforce_budget(&conversation, &input).await?;
        if let Some(reason) = self.over_hard_limit(&request, &input).await? {
            return Ok(TurnReport {
                outcome: TurnOutcome::Failed { reason },
                iterations: 0,
                compaction,
            });
        }

        self.store
            .append_message(&request.conversation_id, Message::user(&input))
            .await?;
        self.bus.publish(
            &topic,
            &request.origin,
            Event::NewMessage {
                role: crate::conversation::Role::User,
                content: input.clone(),
            },
        );

        let mut turn = TurnContext::new(cancel);
        let report = self
            .run_loop(&request, model.as_deref(), &topic, &mut turn)
            .await?;
        turn.finish(&request.conversation_id, &report.outcome);
        drop(guard);

        if report.outcome == TurnOutcome::Completed && conversation.title.is_none() {
            title::spawn_title_task(
                Arc::clone(&self.provider),
                Arc::clone(&self.store),
                Arc::clone(&self.bus),
                self.database.clone(),
                request.conversation_id.clone(),
                request.input.clone(),
            );
        }

        Ok(TurnReport {
            compaction,
            ..report
        })
    }

    /// Pre-turn budget check. Compacts when the history plus incoming input
    /// crosses the auto-compact threshold; a refusal (history too short) is
    /// logged and ignored.
    async fn enforce_budget(
        &self,
        conversation: &Conversation,
        input: &str,
    ) -> Result<Option<CompactionReport>> {
        let estimate = self.accountant.estimate_messages(&conversation.messages)
            + self.accountant.estimate_text(input);
        let ctx = &self.config.context;

        if estimate >= ctx.auto_compact_tokens {
            info!(
                conversation_id = %conversation.id,
                estimate, threshold = ctx.auto_compact_tokens, "auto-compacting before turn"
            );
            match compact_conversation(
                self.provider.as_ref(),
                self.store.as_ref(),
                &self.accountant,
                &conversation.id,
                conversation.model.as_deref(),
                ctx.min_compact_messages,
            )
            .await
            {
                Ok(report) => return Ok(Some(report)),
                Err(SalonError::Compaction(reason)) => {
                    debug!(conversation_id = %conversation.id, %reason, "compaction skipped");
                }
                Err(e) => return Err(e),
            }
        } else if estimate >= ctx.soft_warn_tokens {
            warn!(
                conversation_id = %conversation.id,
                estimate, threshold = ctx.soft_warn_tokens, "context approaching compaction threshold"
            );
        }
        Ok(None)
    }

    /// After any compaction has run, a history still over the hard ceiling
    /// refuses the turn instead of sending a doomed request.
    async fn over_hard_limit(&self, request: &TurnRequest, input: &str) -> Result<Option<String>> {
        let conversation = self
            .store
            .get(&request.conversation_id)
            .await?
            .ok_or_else(|| SalonError::ConversationNotFound(request.conversation_id.clone()))?;
        let estimate = self.accountant.estimate_messages(&conversation.messages)
            + self.accountant.estimate_text(input);
        if estimate >= self.config.context.hard_limit_tokens {
            error!(
                conversation_id = %request.conversation_id,
                estimate, limit = self.config.context.hard_limit_tokens,
                "turn refused: context over hard limit"
            );
            return Ok(Some(format!(
                "context window exhausted (~{estimate} tokens, limit {})",
                self.config.context.hard_limit_tokens
            )));
        }
        Ok(None)
    }

    async fn run_loop(
        &self,
        request: &TurnRequest,
        model: Option<&str>,
        topic: &Topic,
        turn: &mut TurnContext,
    ) -> Result<TurnReport> {
        let max_iterations = request
            .max_iterations
            .unwrap_or(self.config.agent.max_iterations);
        let tool_definitions = self.tools.definitions();
        let ctx = ToolContext::new(&request.conversation_id, &self.workspace, &request.origin);

        for iteration in 1..=max_iterations {
            turn.iteration = iteration;
            let messages = self
                .store
                .get(&request.conversation_id)
                .await?
                .ok_or_else(|| SalonError::ConversationNotFound(request.conversation_id.clone()))?
                .messages;

            let response = match self
                .stream_completion(messages, tool_definitions.clone(), model, topic, request, turn)
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    error!(conversation_id = %request.conversation_id, error = %e, "model invocation failed");
                    return Ok(TurnReport {
                        outcome: TurnOutcome::Failed {
                            reason: e.to_string(),
                        },
                        iterations: iteration,
                        compaction: None,
                    });
                }
            };

            turn.response_chars += response.content.chars().count();
            if turn.cancel.is_set() {
                if !response.content.is_empty() {
                    self.store
                        .append_message(
                            &request.conversation_id,
                            Message::assistant(&response.content),
                        )
                        .await?;
                }
                info!(conversation_id = %request.conversation_id, iteration, "turn cancelled");
                return Ok(TurnReport {
                    outcome: TurnOutcome::Cancelled,
                    iterations: iteration,
                    compaction: None,
                });
            }

            if !response.has_tool_calls() {
                self.store
                    .append_message(
                        &request.conversation_id,
                        Message::assistant(&response.content),
                    )
                    .await?;
                self.bus.publish(
                    topic,
                    &request.origin,
                    Event::NewMessage {
                        role: crate::conversation::Role::Assistant,
                        content: response.content.clone(),
                    },
                );
                return Ok(TurnReport {
                    outcome: TurnOutcome::Completed,
                    iterations: iteration,
                    compaction: None,
                });
            }

            let calls: Vec<ToolCall> = response
                .tool_calls
                .iter()
                .map(|c| ToolCall {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    arguments: c.arguments.clone(),
                })
                .collect();
            self.store
                .append_message(
                    &request.conversation_id,
                    Message::assistant_with_tools(&response.content, calls.clone()),
                )
                .await?;

            let mut cancelled = false;
            for call in &calls {
                if turn.cancel.is_set() {
                    cancelled = true;
                }
                let result = self
                    .run_tool_call(request, call, &ctx, topic, cancelled)
                    .await?;
                self.store
                    .append_message(
                        &request.conversation_id,
                        Message::tool_result(&call.id, &result.for_model()),
                    )
                    .await?;
            }
            if cancelled || turn.cancel.is_set() {
                info!(conversation_id = %request.conversation_id, iteration, "turn cancelled");
                return Ok(TurnReport {
                    outcome: TurnOutcome::Cancelled,
                    iterations: iteration,
                    compaction: None,
                });
            }
        }

        // the model never yielded; leave a marker so the stall is visible in
        // the transcript
        self.store
            .append_message(
                &request.conversation_id,
                Message::system(&format!(
                    "Stopped after reaching the tool iteration limit ({max_iterations}) for this turn."
                )),
            )
            .await?;
        warn!(
            conversation_id = %request.conversation_id,
            max_iterations, "iteration limit reached"
        );
        Ok(TurnReport {
            outcome: TurnOutcome::IterationLimitReached,
            iterations: max_iterations,
            compaction: None,
        })
    }

    /// One model invocation with deltas forwarded onto the bus. The sink
    /// carries the turn's cancel flag, so the provider stops generating
    /// between chunks and returns the partial accumulation.
    async fn stream_completion(
        &self,
        messages: Vec<Message>,
        tools: Vec<crate::providers::ToolDefinition>,
        model: Option<&str>,
        topic: &Topic,
        request: &TurnRequest,
        turn: &TurnContext,
    ) -> Result<ProviderResponse> {
        self.bus
            .publish(topic, &request.origin, Event::StreamStart);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        let bus = Arc::clone(&self.bus);
        let forward_topic = topic.clone();
        let origin = request.origin.clone();
        let cancel = turn.cancel.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(content) = rx.recv().await {
                if cancel.is_set() {
                    continue;
                }
                bus.publish(&forward_topic, &origin, Event::StreamToken { content });
            }
        });

        let result = self
            .provider
            .chat_stream(
                messages,
                tools,
                model,
                ChatOptions::new(),
                TokenSink::new(tx).with_cancel(turn.cancel.clone()),
            )
            .await;

        // provider dropped its sink clone; drain the forwarder before the
        // done marker so token events never trail it
        let _ = forwarder.await;
        self.bus.publish(topic, &request.origin, Event::StreamDone);
        result
    }

    /// Gate and execute a single tool call, driving its status record from
    /// Pending through to a terminal state.
    async fn run_tool_call(
        &self,
        request: &TurnRequest,
        call: &ToolCall,
        ctx: &ToolContext,
        topic: &Topic,
        cancelled: bool,
    ) -> Result<ToolResult> {
        let conversation_id = &request.conversation_id;
        let args: Value = match serde_json::from_str(&call.arguments) {
            Ok(v) => v,
            Err(e) => {
                let result = ToolResult::failed(format!("invalid tool arguments: {e}"));
                self.store
                    .record_tool_call(
                        conversation_id,
                        ToolCallRecord::new(&call.id, &call.name, Value::Null),
                    )
                    .await?;
                self.finish_tool_call(request, call, topic, &result).await?;
                return Ok(result);
            }
        };

        self.store
            .record_tool_call(
                conversation_id,
                ToolCallRecord::new(&call.id, &call.name, args.clone()),
            )
            .await?;

        if cancelled {
            let result = ToolResult::failed("cancelled before execution");
            self.finish_tool_call(request, call, topic, &result).await?;
            return Ok(result);
        }

        match safety::evaluate(&call.name, &args) {
            SafetyDecision::Forbid { reason } => {
                warn!(conversation_id = %conversation_id, tool = %call.name, %reason, "tool call forbidden");
                let result = ToolResult::denied(format!("forbidden: {reason}"));
                self.finish_tool_call(request, call, topic, &result).await?;
                return Ok(result);
            }
            SafetyDecision::RequireApproval { description } => {
                self.store
                    .update_tool_call(
                        conversation_id,
                        &call.id,
                        ToolCallStatus::AwaitingApproval,
                        None,
                    )
                    .await?;
                let verdict = self.seek_approval(request, topic, &description).await;
                match verdict {
                    ApprovalVerdict::Approved => {
                        info!(conversation_id = %conversation_id, tool = %call.name, "tool call approved");
                    }
                    ApprovalVerdict::Denied => {
                        let result = ToolResult::denied("denied by user");
                        self.finish_tool_call(request, call, topic, &result).await?;
                        return Ok(result);
                    }
                    ApprovalVerdict::TimedOut => {
                        let result = ToolResult::failed(format!(
                            "approval timed out after {}s",
                            self.approvals.timeout_secs()
                        ));
                        self.finish_tool_call(request, call, topic, &result).await?;
                        return Ok(result);
                    }
                }
            }
            SafetyDecision::Allow => {}
        }

        self.store
            .update_tool_call(conversation_id, &call.id, ToolCallStatus::Running, None)
            .await?;
        self.bus.publish(
            topic,
            &request.origin,
            Event::ToolCallStart {
                id: call.id.clone(),
                tool_name: call.name.clone(),
                input: args.clone(),
            },
        );

        let result = self.tools.dispatch(&call.name, args, ctx).await;
        self.finish_tool_call(request, call, topic, &result).await?;
        Ok(result)
    }

    async fn seek_approval(
        &self,
        request: &TurnRequest,
        topic: &Topic,
        description: &str,
    ) -> ApprovalVerdict {
        if let Some(confirm) = &request.confirm {
            return if confirm.confirm(description).await {
                ApprovalVerdict::Approved
            } else {
                ApprovalVerdict::Denied
            };
        }

        let (approval_id, waiter) = self
            .approvals
            .request(&request.conversation_id, description)
            .await;
        self.bus.publish(
            topic,
            &request.origin,
            Event::ApprovalRequested {
                approval_id,
                message: description.to_string(),
                deadline_secs: self.approvals.timeout_secs(),
            },
        );
        self.approvals.wait(waiter).await
    }

    async fn finish_tool_call(
        &self,
        request: &TurnRequest,
        call: &ToolCall,
        topic: &Topic,
        result: &ToolResult,
    ) -> Result<()> {
        let status = match result.status {
            ToolStatus::Success => ToolCallStatus::Succeeded,
            ToolStatus::Failed => ToolCallStatus::Failed,
            ToolStatus::Denied => ToolCallStatus::Denied,
        };
        self.store
            .update_tool_call(
                &request.conversation_id,
                &call.id,
                status,
                Some(result.to_value()),
            )
            .await?;
        self.bus.publish(
            topic,
            &request.origin,
            Event::ToolCallEnd {
                id: call.id.clone(),
                status,
                output: result.to_value(),
            },
        );
        Ok(())
    }
}

impl Drop for AgentEngine {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}
