//! End-to-end turns against a scripted provider.

use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

use salon::approval::ApprovalVerdict;
use salon::bus::{Event, EventBus, Topic};
use salon::config::Config;
use salon::conversation::MemoryStore;
use salon::engine::{AgentEngine, ConfirmPrompt, TurnOutcome, TurnRequest};
use salon::providers::testing::ScriptedProvider;
use salon::tools::ToolRegistry;

struct Fixture {
    engine: AgentEngine,
    workspace: TempDir,
}

fn fixture(provider: ScriptedProvider) -> Fixture {
    let workspace = TempDir::new().unwrap();
    let mut config = Config::default();
    config.database = "default".to_string();
    config.workspace = Some(workspace.path().to_path_buf());
    let tools = Arc::new(ToolRegistry::with_defaults(&config));
    let engine = AgentEngine::new(
        config,
        Arc::new(MemoryStore::new()),
        tools,
        Arc::new(provider),
        Arc::new(EventBus::new()),
    );
    Fixture { engine, workspace }
}

struct AlwaysDeny;

#[async_trait::async_trait]
impl ConfirmPrompt for AlwaysDeny {
    async fn confirm(&self, _description: &str) -> bool {
        false
    }
}

struct AlwaysApprove;

#[async_trait::async_trait]
impl ConfirmPrompt for AlwaysApprove {
    async fn confirm(&self, _description: &str) -> bool {
        true
    }
}

#[tokio::test]
async fn test_plain_text_turn_completes() {
    let fx = fixture(ScriptedProvider::with_text(&["Hello there."]));
    let conv = fx.engine.create_conversation().await.unwrap();

    let report = fx
        .engine
        .submit_turn(TurnRequest::new(&conv.id, "hi", "client-a"))
        .await
        .unwrap();

    assert_eq!(report.outcome, TurnOutcome::Completed);
    assert_eq!(report.iterations, 1);
    let conv = fx.engine.store().get(&conv.id).await.unwrap().unwrap();
    assert_eq!(conv.messages.len(), 2);
    assert_eq!(conv.messages[1].content, "Hello there.");
}

#[tokio::test]
async fn test_tool_call_round_trip() {
    let provider = ScriptedProvider::new();
    provider.push_tool_call(
        "call-1",
        "write_file",
        &json!({"path": "out.txt", "content": "written by tool"}).to_string(),
    );
    provider.push_text("Done, the file is written.");

    let fx = fixture(provider);
    let conv = fx.engine.create_conversation().await.unwrap();
    let report = fx
        .engine
        .submit_turn(TurnRequest::new(&conv.id, "write out.txt", "client-a"))
        .await
        .unwrap();

    assert_eq!(report.outcome, TurnOutcome::Completed);
    assert_eq!(report.iterations, 2);
    let content = std::fs::read_to_string(fx.workspace.path().join("out.txt")).unwrap();
    assert_eq!(content, "written by tool");

    // user, assistant(tool_calls), tool result, final assistant
    let conv = fx.engine.store().get(&conv.id).await.unwrap().unwrap();
    assert_eq!(conv.messages.len(), 4);
    assert!(conv.messages[2].content.contains("success"));
}

#[tokio::test]
async fn test_concurrent_submission_rejected() {
    let provider = ScriptedProvider::new();
    provider.push_tool_call("call-1", "shell", &json!({"command": "sleep 2"}).to_string());
    provider.push_text("done");

    let fx = fixture(provider);
    let engine = Arc::new(fx.engine);
    let conv = engine.create_conversation().await.unwrap();

    let first = {
        let engine = Arc::clone(&engine);
        let id = conv.id.clone();
        tokio::spawn(async move {
            engine
                .submit_turn(TurnRequest::new(&id, "slow", "client-a"))
                .await
        })
    };
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let second = engine
        .submit_turn(TurnRequest::new(&conv.id, "again", "client-b"))
        .await;
    assert!(matches!(
        second,
        Err(salon::SalonError::ConversationBusy(_))
    ));

    let report = first.await.unwrap().unwrap();
    assert_eq!(report.outcome, TurnOutcome::Completed);
}

#[tokio::test]
async fn test_denied_destructive_command_does_not_run() {
    let victim_dir = TempDir::new().unwrap();
    let victim = victim_dir.path().join("precious.txt");
    std::fs::write(&victim, "keep me").unwrap();

    let provider = ScriptedProvider::new();
    provider.push_tool_call(
        "call-1",
        "shell",
        &json!({"command": format!("rm {}", victim.display())}).to_string(),
    );
    provider.push_text("Understood, leaving the file alone.");

    let fx = fixture(provider);
    let conv = fx.engine.create_conversation().await.unwrap();
    let report = fx
        .engine
        .submit_turn(
            TurnRequest::new(&conv.id, "delete that file", "client-a")
                .with_confirm(Arc::new(AlwaysDeny)),
        )
        .await
        .unwrap();

    assert_eq!(report.outcome, TurnOutcome::Completed);
    assert!(victim.exists(), "denied command must not execute");

    // the denial reason flows back to the model as a tool result
    let conv = fx.engine.store().get(&conv.id).await.unwrap().unwrap();
    assert!(conv.messages[2].content.contains("denied"));
    assert_eq!(
        conv.tool_calls[0].status,
        salon::conversation::ToolCallStatus::Denied
    );
}

#[tokio::test]
async fn test_approved_destructive_command_runs() {
    let provider = ScriptedProvider::new();
    provider.push_tool_call(
        "call-1",
        "shell",
        &json!({"command": "rm scratch.txt"}).to_string(),
    );
    provider.push_text("Removed it.");

    let fx = fixture(provider);
    std::fs::write(fx.workspace.path().join("scratch.txt"), "bye").unwrap();
    let conv = fx.engine.create_conversation().await.unwrap();
    let report = fx
        .engine
        .submit_turn(
            TurnRequest::new(&conv.id, "remove scratch.txt", "client-a")
                .with_confirm(Arc::new(AlwaysApprove)),
        )
        .await
        .unwrap();

    assert_eq!(report.outcome, TurnOutcome::Completed);
    assert!(!fx.workspace.path().join("scratch.txt").exists());
}

#[tokio::test]
async fn test_forbidden_command_skips_approval_entirely() {
    let provider = ScriptedProvider::new();
    provider.push_tool_call(
        "call-1",
        "shell",
        &json!({"command": "rm -rf /"}).to_string(),
    );
    provider.push_text("I won't do that.");

    let fx = fixture(provider);
    let conv = fx.engine.create_conversation().await.unwrap();
    // no confirm prompt attached; a forbidden call must never reach the
    // approval coordinator, so the turn cannot hang on a pending approval
    let report = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        fx.engine
            .submit_turn(TurnRequest::new(&conv.id, "wipe the disk", "client-a")),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(report.outcome, TurnOutcome::Completed);
    assert_eq!(fx.engine.approvals().pending_count().await, 0);
}

#[tokio::test]
async fn test_iteration_limit_appends_marker() {
    let provider = ScriptedProvider::looping_tool_call("glob", &json!({"pattern": "*.rs"}).to_string());

    let fx = fixture(provider);
    let conv = fx.engine.create_conversation().await.unwrap();
    let mut request = TurnRequest::new(&conv.id, "loop forever", "client-a");
    request.max_iterations = Some(3);
    let report = fx.engine.submit_turn(request).await.unwrap();

    assert_eq!(report.outcome, TurnOutcome::IterationLimitReached);
    assert_eq!(report.iterations, 3);
    let conv = fx.engine.store().get(&conv.id).await.unwrap().unwrap();
    let last = conv.messages.last().unwrap();
    assert_eq!(last.role, salon::conversation::Role::System);
    assert!(last.content.contains("iteration limit"));
}

#[tokio::test]
async fn test_provider_failure_fails_turn() {
    let fx = fixture(ScriptedProvider::failing("upstream 500"));
    let conv = fx.engine.create_conversation().await.unwrap();
    let report = fx
        .engine
        .submit_turn(TurnRequest::new(&conv.id, "hi", "client-a"))
        .await
        .unwrap();

    match report.outcome {
        TurnOutcome::Failed { reason } => assert!(reason.contains("upstream 500")),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_stream_events_fan_out_with_echo_suppression() {
    let fx = fixture(ScriptedProvider::with_text(&["abcdef"]));
    let conv = fx.engine.create_conversation().await.unwrap();
    let topic = Topic::conversation("default", &conv.id);
    let mut originator = fx.engine.bus().subscribe(&topic, "client-a");
    let mut observer = fx.engine.bus().subscribe(&topic, "client-b");

    fx.engine
        .submit_turn(TurnRequest::new(&conv.id, "hi", "client-a"))
        .await
        .unwrap();

    // the originator sees nothing it caused itself
    assert!(originator.try_recv().is_none());

    let mut events = Vec::new();
    while let Some(envelope) = observer.try_recv() {
        assert_eq!(envelope.origin, "client-a");
        events.push(envelope.event);
    }
    assert_eq!(events[0], Event::NewMessage {
        role: salon::conversation::Role::User,
        content: "hi".to_string(),
    });
    assert_eq!(events[1], Event::StreamStart);

    // deltas arrive in order and reassemble the full text
    let streamed: String = events
        .iter()
        .filter_map(|e| match e {
            Event::StreamToken { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, "abcdef");
    let done_pos = events.iter().position(|e| *e == Event::StreamDone).unwrap();
    let last_token = events
        .iter()
        .rposition(|e| matches!(e, Event::StreamToken { .. }))
        .unwrap();
    assert!(last_token < done_pos);
}

#[tokio::test]
async fn test_auto_compaction_before_turn() {
    let provider = ScriptedProvider::new();
    provider.push_text("A compact summary of the earlier work.");
    provider.push_text("Continuing from the summary.");

    let workspace = TempDir::new().unwrap();
    let mut config = Config::default();
    config.workspace = Some(workspace.path().to_path_buf());
    config.context.auto_compact_tokens = 200;
    config.context.hard_limit_tokens = 100_000;
    let tools = Arc::new(ToolRegistry::with_defaults(&config));
    let engine = AgentEngine::new(
        config,
        Arc::new(MemoryStore::new()),
        tools,
        Arc::new(provider),
        Arc::new(EventBus::new()),
    );

    let conv = engine.create_conversation().await.unwrap();
    for i in 0..6 {
        engine
            .store()
            .append_message(
                &conv.id,
                salon::conversation::Message::user(&format!("padding message {i}: {}", "x".repeat(200))),
            )
            .await
            .unwrap();
    }

    let report = engine
        .submit_turn(TurnRequest::new(&conv.id, "continue", "client-a"))
        .await
        .unwrap();

    assert_eq!(report.outcome, TurnOutcome::Completed);
    let compaction = report.compaction.expect("compaction should have run");
    assert_eq!(compaction.messages_before, 6);
    assert_eq!(compaction.messages_after, 1);
    assert!(compaction.tokens_after < compaction.tokens_before);

    // summary system message, new user message, assistant reply
    let conv = engine.store().get(&conv.id).await.unwrap().unwrap();
    assert_eq!(conv.messages.len(), 3);
    assert!(conv.messages[0]
        .content
        .contains("Previous conversation summary"));
}

#[tokio::test]
async fn test_hard_limit_refuses_turn() {
    let provider = ScriptedProvider::with_text(&["never reached"]);
    let workspace = TempDir::new().unwrap();
    let mut config = Config::default();
    config.workspace = Some(workspace.path().to_path_buf());
    // compaction threshold above the estimate so only the hard ceiling trips
    config.context.auto_compact_tokens = 1_000_000;
    config.context.hard_limit_tokens = 50;
    let tools = Arc::new(ToolRegistry::with_defaults(&config));
    let engine = AgentEngine::new(
        config,
        Arc::new(MemoryStore::new()),
        tools,
        Arc::new(provider),
        Arc::new(EventBus::new()),
    );

    let conv = engine.create_conversation().await.unwrap();
    let report = engine
        .submit_turn(TurnRequest::new(&conv.id, &"y".repeat(400), "client-a"))
        .await
        .unwrap();

    match report.outcome {
        TurnOutcome::Failed { reason } => assert!(reason.contains("context window exhausted")),
        other => panic!("expected refusal, got {other:?}"),
    }
    // nothing was appended
    let conv = engine.store().get(&conv.id).await.unwrap().unwrap();
    assert!(conv.messages.is_empty());
}

#[tokio::test]
async fn test_cancellation_preserves_partial_history() {
    let provider = ScriptedProvider::new();
    provider.push_tool_call("call-1", "shell", &json!({"command": "sleep 3"}).to_string());
    provider.push_text("never reached");

    let fx = fixture(provider);
    let engine = Arc::new(fx.engine);
    let conv = engine.create_conversation().await.unwrap();

    let turn = {
        let engine = Arc::clone(&engine);
        let id = conv.id.clone();
        tokio::spawn(async move {
            engine
                .submit_turn(TurnRequest::new(&id, "slow work", "client-a"))
                .await
        })
    };
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    assert!(engine.cancel(&conv.id).await);

    let report = turn.await.unwrap().unwrap();
    assert_eq!(report.outcome, TurnOutcome::Cancelled);

    // user message and the assistant's tool-call message survive
    let conv = engine.store().get(&conv.id).await.unwrap().unwrap();
    assert!(conv.messages.len() >= 2);
    assert_eq!(conv.messages[0].content, "slow work");
}

#[tokio::test]
async fn test_cancel_stops_generation_mid_stream() {
    // ten 3-byte chunks at 100ms apiece; a full stream takes about a second
    let full = "abcdefghijklmnopqrstuvwxyz1234";
    let provider = ScriptedProvider::with_text(&[full])
        .with_chunk_delay(std::time::Duration::from_millis(100));

    let fx = fixture(provider);
    let engine = Arc::new(fx.engine);
    let conv = engine.create_conversation().await.unwrap();

    let started = std::time::Instant::now();
    let turn = {
        let engine = Arc::clone(&engine);
        let id = conv.id.clone();
        tokio::spawn(async move {
            engine
                .submit_turn(TurnRequest::new(&id, "tell me a story", "client-a"))
                .await
        })
    };
    tokio::time::sleep(std::time::Duration::from_millis(250)).await;
    assert!(engine.cancel(&conv.id).await);

    let report = turn.await.unwrap().unwrap();
    assert_eq!(report.outcome, TurnOutcome::Cancelled);
    // the provider breaks off at the next chunk instead of finishing
    assert!(started.elapsed() < std::time::Duration::from_millis(800));

    // whatever streamed before the cancel is kept as the assistant message
    let conv = engine.store().get(&conv.id).await.unwrap().unwrap();
    assert_eq!(conv.messages.len(), 2);
    let partial = &conv.messages[1].content;
    assert!(!partial.is_empty());
    assert!(partial.len() < full.len());
    assert!(full.starts_with(partial.as_str()));
}

#[tokio::test]
async fn test_unknown_tool_reported_to_model_not_fatal() {
    let provider = ScriptedProvider::new();
    provider.push_tool_call("call-1", "teleport", &json!({"to": "mars"}).to_string());
    provider.push_text("That tool does not exist, sorry.");

    let fx = fixture(provider);
    let conv = fx.engine.create_conversation().await.unwrap();
    let report = fx
        .engine
        .submit_turn(TurnRequest::new(&conv.id, "teleport me", "client-a"))
        .await
        .unwrap();

    assert_eq!(report.outcome, TurnOutcome::Completed);
    let conv = fx.engine.store().get(&conv.id).await.unwrap().unwrap();
    assert!(conv.messages[2].content.contains("unknown tool: teleport"));
}

#[tokio::test]
async fn test_title_set_after_first_completed_turn() {
    let provider = ScriptedProvider::new();
    provider.push_text("Sure, the answer is 42.");
    provider.push_text("\"Meaning Of Life\"");

    let fx = fixture(provider);
    let conv = fx.engine.create_conversation().await.unwrap();
    fx.engine
        .submit_turn(TurnRequest::new(&conv.id, "what is the answer", "client-a"))
        .await
        .unwrap();

    // titling is detached; poll briefly for it to land
    let mut title = None;
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        title = fx.engine.store().get(&conv.id).await.unwrap().unwrap().title;
        if title.is_some() {
            break;
        }
    }
    assert_eq!(title.as_deref(), Some("Meaning Of Life"));
}

#[tokio::test]
async fn test_switch_model_applies_to_next_turn() {
    let fx = fixture(ScriptedProvider::with_text(&["ok"]));
    let conv = fx.engine.create_conversation().await.unwrap();
    fx.engine
        .switch_model(&conv.id, "gpt-4o-mini")
        .await
        .unwrap();
    let conv = fx.engine.store().get(&conv.id).await.unwrap().unwrap();
    assert_eq!(conv.model.as_deref(), Some("gpt-4o-mini"));
}

#[tokio::test]
async fn test_respond_approval_is_idempotent() {
    let fx = fixture(ScriptedProvider::new());
    assert!(!fx.engine.respond_approval("nonexistent", true).await);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_approvals_swept_in_background() {
    let workspace = TempDir::new().unwrap();
    let mut config = Config::default();
    config.database = "default".to_string();
    config.workspace = Some(workspace.path().to_path_buf());
    config.agent.approval_expire_secs = 0;
    let tools = Arc::new(ToolRegistry::with_defaults(&config));
    let engine = AgentEngine::new(
        config,
        Arc::new(MemoryStore::new()),
        tools,
        Arc::new(ScriptedProvider::new()),
        Arc::new(EventBus::new()),
    );

    let approvals = Arc::clone(engine.approvals());
    let (_id, waiter) = approvals.request("conv-1", "rm -rf build").await;

    // nobody responds; the engine's periodic sweep denies it
    let verdict = tokio::time::timeout(
        std::time::Duration::from_secs(90),
        approvals.wait(waiter),
    )
    .await
    .unwrap();
    assert_eq!(verdict, ApprovalVerdict::Denied);
    assert_eq!(approvals.pending_count().await, 0);
}

#[tokio::test]
async fn test_attachments_fold_into_user_message() {
    let fx = fixture(ScriptedProvider::with_text(&["Looks like a config issue."]));
    let conv = fx.engine.create_conversation().await.unwrap();

    fx.engine
        .submit_turn(
            TurnRequest::new(&conv.id, "why does this fail?", "client-a")
                .with_attachment("error.log", "panic: index out of bounds"),
        )
        .await
        .unwrap();

    let conv = fx.engine.store().get(&conv.id).await.unwrap().unwrap();
    let user = &conv.messages[0].content;
    assert!(user.starts_with("why does this fail?"));
    assert!(user.contains("[Attached file: error.log]"));
    assert!(user.contains("panic: index out of bounds"));
}
