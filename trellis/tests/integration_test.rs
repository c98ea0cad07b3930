//! End-to-end scenarios exercising steps, sessions, guardrails, and the
//! tool pipeline together.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use trellis::prelude::*;
use trellis::session::mock::MockDelegate;

fn upper() -> impl Step<Input = String, Output = String> {
    Transform::new(|text: String| async move { Ok(text.to_uppercase()) })
}

fn trim() -> impl Step<Input = String, Output = String> {
    Transform::new(|text: String| async move { Ok(text.trim().to_string()) })
}

#[tokio::test]
async fn pipeline_of_transforms_sequences() {
    let pipeline = Pipeline::builder(trim()).then(upper()).build();
    assert_eq!(pipeline.run("  hi  ".into()).await.expect("run"), "HI");
}

#[tokio::test]
async fn race_with_timeout_and_parallel_resilience() {
    let sleepy = |ms: u64, tag: &'static str| {
        Transform::new(move |_: ()| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(tag)
        })
        .boxed()
    };
    let failing = Transform::new(|_: ()| async move {
        Err::<&'static str, _>(Error::generation_failed("no luck"))
    })
    .boxed();

    let race = Race::new(vec![sleepy(100, "A"), sleepy(30, "B"), failing]);
    assert_eq!(race.run(()).await.expect("race"), "B");

    let race = race.with_timeout(Duration::from_millis(5));
    assert!(matches!(race.run(()).await, Err(Error::Timeout { .. })));
}

#[tokio::test]
async fn generate_uses_the_ambient_session() {
    let session = Arc::new(AgentSession::new(Arc::new(MockDelegate::uppercase())));
    let pipeline = Pipeline::builder(trim()).then(Generate::new()).build();

    let output = with_value::<AgentSessionKey, _>(
        Some(Arc::clone(&session)),
        pipeline.run("  hello there  ".into()),
    )
    .await
    .expect("run");

    assert_eq!(output, "HELLO THERE");
    assert_eq!(session.transcript().len(), 2);
}

#[tokio::test]
async fn steering_lands_in_the_next_prompt() {
    // An echoing backing makes the submitted prompt observable.
    let session = Arc::new(AgentSession::new(Arc::new(MockDelegate::new(
        |prompt: &str| prompt.to_string(),
    ))));

    session.steer("use tabs");
    let response = session.send("write Y").await.expect("send");
    assert_eq!(response.content, "write Y\n\nuse tabs");
}

#[tokio::test]
async fn steering_added_mid_turn_waits_for_the_next_turn() {
    let session = Arc::new(AgentSession::new(Arc::new(
        MockDelegate::new(|prompt: &str| prompt.to_string())
            .with_latency(Duration::from_millis(40)),
    )));

    let runner = Arc::clone(&session);
    let in_flight = tokio::spawn(async move { runner.send("write X").await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    session.steer("use tabs");

    let first = in_flight.await.expect("join").expect("send");
    assert_eq!(first.content, "write X");

    let second = session.send("write Y").await.expect("send");
    assert_eq!(second.content, "write Y\n\nuse tabs");
}

#[tokio::test]
async fn session_events_fire_in_order() {
    let session = AgentSession::new(Arc::new(MockDelegate::uppercase()));
    let seen = Arc::new(Mutex::new(Vec::new()));

    for name in ["promptSubmitted", "responseCompleted"] {
        let seen = Arc::clone(&seen);
        session.events().on(name, move |event: Event| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().expect("lock").push(event.name);
            }
        });
    }

    session.send("hello").await.expect("send");
    assert_eq!(
        *seen.lock().expect("lock"),
        vec!["promptSubmitted", "responseCompleted"]
    );
}

#[tokio::test]
async fn snapshots_persist_and_resume_through_a_file_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileSessionStore::new(dir.path());
    let delegate: Arc<dyn SessionDelegate> = Arc::new(MockDelegate::uppercase());

    let session = AgentSession::new(Arc::clone(&delegate));
    session.send("remember me").await.expect("send");
    session.persist(&store).await.expect("persist");

    let resumed = AgentSession::resume(&store, session.id(), delegate)
        .await
        .expect("resume");
    assert_eq!(resumed.transcript(), session.transcript());
}

// ---------------------------------------------------------------------------
// Permission pipeline scenarios
// ---------------------------------------------------------------------------

struct ScriptedHandler {
    decision: PermissionDecision,
    invocations: AtomicUsize,
}

impl ScriptedHandler {
    fn new(decision: PermissionDecision) -> Arc<Self> {
        Arc::new(Self {
            decision,
            invocations: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl PermissionHandler for ScriptedHandler {
    async fn decide(&self, _ctx: &ToolContext) -> PermissionDecision {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.decision
    }
}

fn shell_tool() -> FnTool {
    FnTool::new("Bash", "Runs a command", |_arguments| {
        std::future::ready(Ok(json!("ran")))
    })
}

#[tokio::test]
async fn permission_memory_short_circuits_after_always_allow() {
    let handler = ScriptedHandler::new(PermissionDecision::AlwaysAllow);
    let configuration = PermissionConfiguration::new()
        .allow_rule("Bash(git status:*)")
        .expect("rule")
        .final_deny_rule("Bash(rm -rf:*)")
        .expect("rule")
        .with_default_action(DefaultAction::Ask)
        .with_shared_handler(Arc::clone(&handler) as Arc<dyn PermissionHandler>);

    let pipeline = ToolPipeline::new(Arc::new(shell_tool()))
        .with(PermissionMiddleware::new(configuration));

    // Matches the allow rule: the handler is never consulted.
    pipeline
        .call(json!({ "command": "git status" }))
        .await
        .expect("allowed by rule");
    assert_eq!(handler.invocations.load(Ordering::SeqCst), 0);

    // No rule matches: asks once, and the decision is remembered.
    pipeline
        .call(json!({ "command": "git push" }))
        .await
        .expect("allowed by handler");
    assert_eq!(handler.invocations.load(Ordering::SeqCst), 1);

    // Same memory key: short-circuits without asking again.
    pipeline
        .call(json!({ "command": "git push origin" }))
        .await
        .expect("allowed by session memory");
    assert_eq!(handler.invocations.load(Ordering::SeqCst), 1);

    // The final deny still applies.
    match pipeline.call(json!({ "command": "rm -rf /" })).await {
        Err(Error::PermissionDenied { matched_rule, .. }) => {
            assert_eq!(matched_rule.as_deref(), Some("Bash(rm -rf:*)"));
        }
        other => panic!("expected permission denial, got {other:?}"),
    }
}

#[tokio::test]
async fn deny_and_block_is_remembered_despite_allow_rules() {
    let handler = ScriptedHandler::new(PermissionDecision::DenyAndBlock);
    // The allow rule matches only the second command, so the block recorded
    // for the shared memory key must beat it.
    let configuration = PermissionConfiguration::new()
        .allow_rule("Bash(cargo build:*)")
        .expect("rule")
        .with_default_action(DefaultAction::Ask)
        .with_shared_handler(Arc::clone(&handler) as Arc<dyn PermissionHandler>);

    let middleware = Arc::new(PermissionMiddleware::new(configuration));
    let chain: Vec<Arc<dyn ToolMiddleware>> = vec![middleware];
    let tools = ToolSet::new().with(shell_tool()).wrapped(&chain);

    // First call asks and gets blocked.
    assert!(tools.call("Bash", json!({ "command": "cargo run" })).await.is_err());
    assert_eq!(handler.invocations.load(Ordering::SeqCst), 1);

    // Same memory key: refused from memory, handler not consulted again.
    match tools.call("Bash", json!({ "command": "cargo build" })).await {
        Err(Error::PermissionDenied { reason, .. }) => {
            assert_eq!(reason, "Pattern blocked earlier in session");
        }
        other => panic!("expected permission denial, got {other:?}"),
    }
    assert_eq!(handler.invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn asking_without_a_handler_fails_fast() {
    let configuration = PermissionConfiguration::new().with_default_action(DefaultAction::Ask);
    let pipeline = ToolPipeline::new(Arc::new(shell_tool()))
        .with(PermissionMiddleware::new(configuration));

    match pipeline.call(json!({ "command": "ls" })).await {
        Err(Error::PermissionDenied { reason, .. }) => {
            assert_eq!(reason, "No permission handler configured and default is 'ask'");
        }
        other => panic!("expected permission denial, got {other:?}"),
    }
}

#[tokio::test]
async fn first_matching_allow_wins_over_later_denies() {
    let configuration = PermissionConfiguration::new()
        .allow_rule("Bash(git:*)")
        .expect("rule")
        .deny_rule("Bash(*)")
        .expect("rule")
        .with_default_action(DefaultAction::Deny);

    let pipeline = ToolPipeline::new(Arc::new(shell_tool()))
        .with(PermissionMiddleware::new(configuration));

    pipeline
        .call(json!({ "command": "git log" }))
        .await
        .expect("allow beats deny");
    assert!(pipeline.call(json!({ "command": "curl x" })).await.is_err());
}

#[tokio::test]
async fn guardrail_layers_apply_to_tool_calls_in_scope() {
    let configuration = PermissionConfiguration::new().with_default_action(DefaultAction::Deny);
    let pipeline = Arc::new(
        ToolPipeline::new(Arc::new(shell_tool()))
            .with(PermissionMiddleware::new(configuration)),
    );

    // Outside any guardrail: denied by default action.
    assert!(pipeline.call(json!({ "command": "git st" })).await.is_err());

    // Inside a guardrail that allows git: permitted.
    let guard = Guardrail::new().allow("Bash(git:*)").build().expect("build");
    let caller = Arc::clone(&pipeline);
    let step = GuardedStep::new(
        guard,
        Transform::new(move |_: ()| {
            let caller = Arc::clone(&caller);
            async move { caller.call(json!({ "command": "git st" })).await }
        }),
    );
    step.run(()).await.expect("allowed inside the guardrail");
}

#[tokio::test]
async fn outer_final_deny_survives_inner_override() {
    let configuration = PermissionConfiguration::new().with_default_action(DefaultAction::Allow);
    let pipeline = Arc::new(
        ToolPipeline::new(Arc::new(shell_tool()))
            .with(PermissionMiddleware::new(configuration)),
    );

    let outer = Guardrail::new()
        .final_deny("Bash(rm -rf:*)")
        .build()
        .expect("build");
    let inner = Guardrail::new()
        .override_rule("Bash(rm -rf:*)")
        .allow("Bash(rm -rf:*)")
        .build()
        .expect("build");

    let caller = Arc::clone(&pipeline);
    let step = GuardedStep::new(
        outer,
        GuardedStep::new(
            inner,
            Transform::new(move |_: ()| {
                let caller = Arc::clone(&caller);
                async move { caller.call(json!({ "command": "rm -rf /" })).await }
            }),
        ),
    );

    assert!(matches!(
        step.run(()).await,
        Err(Error::PermissionDenied { .. })
    ));
}

// ---------------------------------------------------------------------------
// Loops, memory, and erased steps working together
// ---------------------------------------------------------------------------

#[tokio::test]
async fn loop_accumulates_through_a_relay() {
    let log = Memory::new(Vec::<i32>::new());
    let relay = log.relay();

    let body = Transform::new(move |value: i32| {
        let relay = relay.clone();
        async move {
            relay.append(value);
            Ok(value + 1)
        }
    });
    let done = Transform::new(|value: i32| async move { Ok(value >= 3) });

    let finished = Loop::bounded(10, body).until(done).run(0).await.expect("run");
    assert_eq!(finished, 3);
    assert_eq!(log.get(), vec![0, 1, 2]);
}

#[tokio::test]
async fn map_runs_elements_through_built_steps() {
    let map = Map::uniform(upper().boxed());
    assert_eq!(
        map.run(vec!["a".into(), "b".into()]).await.expect("run"),
        vec!["A".to_string(), "B".to_string()]
    );
}

#[tokio::test]
async fn reduce_folds_responses() {
    let join = Transform::new(|(acc, item): (String, String)| async move {
        if acc.is_empty() {
            Ok(item)
        } else {
            Ok(format!("{acc}, {item}"))
        }
    });
    let reduce = Reduce::new(String::new(), join);
    assert_eq!(
        reduce
            .run(vec!["one".into(), "two".into()])
            .await
            .expect("run"),
        "one, two"
    );
}
