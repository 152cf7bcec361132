//! End-to-end channel flows against the in-memory store and a scripted
//! model.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;

use bk_domain::config::Config;
use bk_domain::record::{Brand, CreditType, MessageRole, User};
use bk_gateway::channel::ChannelSession;
use bk_gateway::state::AppState;
use bk_providers::{ProviderRegistry, ScriptedProvider, ScriptedTurn};
use bk_store::{Brands, Chat, InMemoryJobQueue, InMemoryStore, JobQueue, Store};

struct Harness {
    state: AppState,
    store: Arc<InMemoryStore>,
    jobs: Arc<InMemoryJobQueue>,
    provider: Arc<ScriptedProvider>,
}

fn user(id: &str, tenant: &str, org: Option<(&str, &str)>) -> User {
    User {
        id: id.into(),
        tenant_id: tenant.into(),
        email: format!("{id}@{tenant}.test"),
        display_name: Some(id.to_uppercase()),
        platform_role: None,
        org_id: org.map(|(o, _)| o.to_owned()),
        org_role: org.map(|(_, r)| r.to_owned()),
    }
}

fn harness(turns: Vec<ScriptedTurn>) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    store.insert_user(user("u-base", "t1", None));
    store.insert_user(user("u-other", "t1", None));
    store.insert_brand(Brand {
        id: "b-lumen".into(),
        tenant_id: "t1".into(),
        owner_id: "u-base".into(),
        org_id: None,
        name: "Lumen".into(),
        tagline: None,
        industry: Some("coffee".into()),
        description: None,
        primary_color: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    });

    let jobs = Arc::new(InMemoryJobQueue::new());
    let provider = Arc::new(ScriptedProvider::new("scripted", turns));
    let state = AppState::new(
        Arc::new(Config::default()),
        store.clone() as Arc<dyn Store>,
        Some(jobs.clone() as Arc<dyn JobQueue>),
        Arc::new(ProviderRegistry::single(provider.clone())),
        None,
    );
    Harness { state, store, jobs, provider }
}

fn send_frame(session_id: &str, content: &str, active: Option<&str>) -> String {
    json!({
        "event": "chat:send",
        "data": { "sessionId": session_id, "content": content, "activeRecordId": active },
    })
    .to_string()
}

async fn next_frame(rx: &mut UnboundedReceiver<String>) -> Value {
    let raw = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("outbox closed");
    serde_json::from_str(&raw).unwrap()
}

/// Frames up to and including the first `event`.
async fn frames_until(rx: &mut UnboundedReceiver<String>, event: &str) -> Vec<Value> {
    let mut out = Vec::new();
    loop {
        let f = next_frame(rx).await;
        let done = f["event"] == event;
        out.push(f);
        if done {
            return out;
        }
    }
}

/// Whatever arrives within a short grace period.
async fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(Some(raw)) = tokio::time::timeout(Duration::from_millis(150), rx.recv()).await {
        out.push(serde_json::from_str(&raw).unwrap());
    }
    out
}

async fn wait_idle(state: &AppState, session_id: &str) {
    for _ in 0..200 {
        if !state.runs.is_running(session_id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run for {session_id} never finished");
}

fn events(frames: &[Value]) -> Vec<&str> {
    frames.iter().filter_map(|f| f["event"].as_str()).collect()
}

#[tokio::test]
async fn rename_needs_confirmation_then_applies_once() {
    let h = harness(vec![
        ScriptedTurn::tool_call("c1", "update_brand", json!({"name": "Solstice"})),
        ScriptedTurn::text("Rename Lumen to Solstice? Please confirm."),
        ScriptedTurn::tool_call("c2", "update_brand", json!({"name": "Solstice", "confirmed": true})),
        ScriptedTurn::text("Your brand is now called Solstice."),
    ]);
    let (session, mut rx) = ChannelSession::open(h.state.clone(), "u-base");

    session.handle_text(&send_frame("s1", "rename my brand to Solstice", Some("b-lumen"))).await;
    let first = frames_until(&mut rx, "chat:message-end").await;
    let names = events(&first);
    assert_eq!(names[0], "chat:session-start");
    assert_eq!(names[1], "chat:message-start");
    assert!(names.contains(&"chat:tool-start"));
    assert!(names.contains(&"chat:tool-complete"));
    assert!(!names.contains(&"chat:record-updated"));
    assert_eq!(h.store.get_brand("b-lumen").await.unwrap().unwrap().name, "Lumen");
    wait_idle(&h.state, "s1").await;

    let transcript = h.store.recent_messages("s1", 50, None).await.unwrap();
    let pending = transcript.iter().find(|m| m.role == MessageRole::Tool).unwrap();
    assert_eq!(pending.tool_result.as_ref().unwrap()["requiresConfirmation"], true);

    session.handle_text(&send_frame("s1", "yes, do it", None)).await;
    let mut second = frames_until(&mut rx, "chat:message-end").await;
    second.extend(drain(&mut rx).await);

    let updates: Vec<&Value> = second.iter().filter(|f| f["event"] == "chat:record-updated").collect();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["data"]["recordId"], "b-lumen");
    assert_eq!(updates[0]["data"]["fields"], json!(["name"]));

    let end = second.iter().find(|f| f["event"] == "chat:message-end").unwrap();
    assert_eq!(end["data"]["content"], "Your brand is now called Solstice.");
    assert_eq!(end["data"]["stopReason"], "completed");
    assert_eq!(h.store.get_brand("b-lumen").await.unwrap().unwrap().name, "Solstice");

    // The pinned brand carried over from the first message.
    let second_request = &h.provider.requests()[2];
    let system = second_request.messages[0].content.extract_all_text();
    assert!(system.contains("Lumen"));
}

#[tokio::test]
async fn zero_credits_never_reach_the_queue() {
    let h = harness(vec![
        ScriptedTurn::tool_call("c1", "generate_images", json!({"prompt": "sunrise", "confirmed": true})),
        ScriptedTurn::text("You need 1 more image credit to do that."),
    ]);
    h.store.set_balance("u-base", CreditType::Image, 0);
    let (session, mut rx) = ChannelSession::open(h.state.clone(), "u-base");

    session.handle_text(&send_frame("s1", "make me a logo image", Some("b-lumen"))).await;
    let frames = frames_until(&mut rx, "chat:message-end").await;
    assert!(events(&frames).contains(&"chat:tool-complete"));
    assert!(h.jobs.is_empty());
    wait_idle(&h.state, "s1").await;

    let transcript = h.store.recent_messages("s1", 50, None).await.unwrap();
    let tool = transcript.iter().find(|m| m.role == MessageRole::Tool).unwrap();
    let result = tool.tool_result.as_ref().unwrap();
    assert_eq!(result["code"], "insufficient_balance");
    assert_eq!(result["shortfall"], 1);
    let last = transcript.last().unwrap();
    assert_eq!(last.role, MessageRole::Assistant);
    assert!(last.content.contains("1 more image credit"));
}

#[tokio::test]
async fn disconnect_mid_stream_persists_no_partial_reply() {
    let h = harness(vec![ScriptedTurn::text(
        "this is a long answer that streams in slowly word by word",
    )
    .with_delay(Duration::from_millis(40))]);
    let (session, mut rx) = ChannelSession::open(h.state.clone(), "u-base");

    session.handle_text(&send_frame("s1", "tell me a story", None)).await;
    frames_until(&mut rx, "chat:message-delta").await;
    session.disconnect();
    wait_idle(&h.state, "s1").await;

    let late = drain(&mut rx).await;
    assert!(!events(&late).contains(&"chat:message-end"));

    let transcript = h.store.recent_messages("s1", 50, None).await.unwrap();
    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript[0].role, MessageRole::User);
}

#[tokio::test]
async fn cancel_stops_relay_but_keeps_history() {
    let h = harness(vec![ScriptedTurn::text("one two three four five six seven eight")
        .with_delay(Duration::from_millis(40))]);
    let (session, mut rx) = ChannelSession::open(h.state.clone(), "u-base");

    session.handle_text(&send_frame("s1", "count", None)).await;
    frames_until(&mut rx, "chat:message-delta").await;
    session
        .handle_text(&json!({"event": "chat:cancel", "data": {"sessionId": "s1"}}).to_string())
        .await;
    wait_idle(&h.state, "s1").await;

    let late = drain(&mut rx).await;
    assert!(!events(&late).contains(&"chat:message-end"));
    let transcript = h.store.recent_messages("s1", 50, None).await.unwrap();
    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript[0].content, "count");
}

#[tokio::test]
async fn second_send_while_running_is_busy() {
    let h = harness(vec![
        ScriptedTurn::text("slow reply here").with_delay(Duration::from_millis(50)),
    ]);
    let (session, mut rx) = ChannelSession::open(h.state.clone(), "u-base");

    session.handle_text(&send_frame("s1", "first", None)).await;
    session.handle_text(&send_frame("s1", "second", None)).await;

    let frames = frames_until(&mut rx, "chat:session-end").await;
    let busy = frames.iter().find(|f| f["event"] == "chat:error").unwrap();
    assert_eq!(busy["data"]["code"], "busy");
    wait_idle(&h.state, "s1").await;

    let transcript = h.store.recent_messages("s1", 50, None).await.unwrap();
    let users: Vec<&str> = transcript
        .iter()
        .filter(|m| m.role == MessageRole::User)
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(users, vec!["first"]);
}

#[tokio::test]
async fn invalid_frames_are_rejected_without_side_effects() {
    let h = harness(vec![]);
    let (session, mut rx) = ChannelSession::open(h.state.clone(), "u-base");

    session.handle_text(&send_frame("s1", "   ", None)).await;
    session.handle_text(&send_frame("", "hello", None)).await;
    session.handle_text(&json!({"event": "chat:dance", "data": {}}).to_string()).await;
    session.handle_text("not json").await;
    let oversized_page = json!({
        "event": "chat:send",
        "data": { "sessionId": "s1", "content": "hello", "pageContext": "p".repeat(8001) },
    });
    session.handle_text(&oversized_page.to_string()).await;

    for _ in 0..5 {
        let f = next_frame(&mut rx).await;
        assert_eq!(f["event"], "chat:error");
        assert_eq!(f["data"]["code"], "invalid_request");
    }
    assert!(h.store.recent_messages("s1", 50, None).await.unwrap().is_empty());
    assert!(h.provider.requests().is_empty());
}

#[tokio::test]
async fn new_session_then_history_in_order() {
    let h = harness(vec![ScriptedTurn::text("Hello!")]);
    let (session, mut rx) = ChannelSession::open(h.state.clone(), "u-base");

    session
        .handle_text(&json!({"event": "chat:new-session", "data": {"activeRecordId": "b-lumen"}, "ack": 1}).to_string())
        .await;
    let ack = next_frame(&mut rx).await;
    assert_eq!(ack["event"], "ack");
    assert_eq!(ack["ack"], 1);
    let sid = ack["data"]["sessionId"].as_str().unwrap().to_owned();

    session.handle_text(&send_frame(&sid, "hi", None)).await;
    frames_until(&mut rx, "chat:message-end").await;
    wait_idle(&h.state, &sid).await;

    session
        .handle_text(&json!({"event": "chat:history", "data": {"sessionId": sid}, "ack": 2}).to_string())
        .await;
    let ack = frames_until(&mut rx, "ack").await.pop().unwrap();
    assert_eq!(ack["ack"], 2);
    let messages = ack["data"]["messages"].as_array().unwrap();
    let roles: Vec<&str> = messages.iter().map(|m| m["role"].as_str().unwrap()).collect();
    assert_eq!(roles, vec!["user", "assistant"]);
    assert_eq!(messages[1]["content"], "Hello!");

    // The pinned brand reached the prompt.
    let system = h.provider.requests()[0].messages[0].content.extract_all_text();
    assert!(system.contains("Lumen"));
}

#[tokio::test]
async fn other_users_sessions_are_not_found() {
    let h = harness(vec![ScriptedTurn::text("Hello!")]);
    let (owner, mut owner_rx) = ChannelSession::open(h.state.clone(), "u-base");
    owner.handle_text(&send_frame("s1", "hi", None)).await;
    frames_until(&mut owner_rx, "chat:session-end").await;
    wait_idle(&h.state, "s1").await;

    let (intruder, mut rx) = ChannelSession::open(h.state.clone(), "u-other");
    intruder.handle_text(&send_frame("s1", "let me in", None)).await;
    let f = next_frame(&mut rx).await;
    assert_eq!(f["data"]["code"], "session_not_found");
    // The rejected send never held the owner's session.
    assert!(!h.state.runs.is_running("s1"));

    intruder
        .handle_text(&json!({"event": "chat:history", "data": {"sessionId": "s1"}, "ack": 9}).to_string())
        .await;
    let ack = next_frame(&mut rx).await;
    assert_eq!(ack["data"]["code"], "session_not_found");

    // Nothing leaked into the owner's room either.
    assert!(drain(&mut owner_rx).await.is_empty());

    owner.handle_text(&send_frame("s1", "still mine", None)).await;
    let frames = frames_until(&mut owner_rx, "chat:message-end").await;
    assert!(!events(&frames).contains(&"chat:error"));
}

#[tokio::test]
async fn failed_run_still_announces_changed_records() {
    let h = harness(vec![
        ScriptedTurn::tool_call("c1", "update_brand", json!({"name": "Solstice", "confirmed": true})),
        ScriptedTurn::failure("503 upstream"),
    ]);
    let (session, mut rx) = ChannelSession::open(h.state.clone(), "u-base");

    session.handle_text(&send_frame("s1", "rename it, I confirm", Some("b-lumen"))).await;
    let frames = frames_until(&mut rx, "chat:error").await;
    let names = events(&frames);
    assert!(!names.contains(&"chat:message-end"));

    let updates: Vec<&Value> = frames.iter().filter(|f| f["event"] == "chat:record-updated").collect();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["data"]["recordId"], "b-lumen");
    assert_eq!(frames.last().unwrap()["data"]["code"], "internal");
    assert_eq!(h.store.get_brand("b-lumen").await.unwrap().unwrap().name, "Solstice");
}

#[tokio::test]
async fn hidden_brand_is_not_pinned_to_the_session() {
    let h = harness(vec![ScriptedTurn::text("Which brand do you mean?")]);
    h.store.insert_brand(Brand {
        id: "b-private".into(),
        tenant_id: "t1".into(),
        owner_id: "u-other".into(),
        org_id: None,
        name: "Private".into(),
        tagline: None,
        industry: None,
        description: None,
        primary_color: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    });
    let (session, mut rx) = ChannelSession::open(h.state.clone(), "u-base");

    session.handle_text(&send_frame("s1", "rename it", Some("b-private"))).await;
    frames_until(&mut rx, "chat:message-end").await;
    wait_idle(&h.state, "s1").await;

    let stored = h.store.get_session("s1").await.unwrap().unwrap();
    assert!(stored.active_record_id.is_none());
    let system = h.provider.requests()[0].messages[0].content.extract_all_text();
    assert!(!system.contains("Private"));
}

#[tokio::test]
async fn ended_session_refuses_new_messages() {
    let h = harness(vec![]);
    let (session, mut rx) = ChannelSession::open(h.state.clone(), "u-base");
    session
        .handle_text(&json!({"event": "chat:new-session", "data": {}, "ack": 1}).to_string())
        .await;
    let sid = next_frame(&mut rx).await["data"]["sessionId"].as_str().unwrap().to_owned();

    session
        .handle_text(&json!({"event": "chat:end-session", "data": {"sessionId": sid}, "ack": 2}).to_string())
        .await;
    let frames = frames_until(&mut rx, "ack").await;
    assert_eq!(frames.last().unwrap()["data"]["ended"], true);

    session.handle_text(&send_frame(&sid, "still there?", None)).await;
    let f = next_frame(&mut rx).await;
    assert_eq!(f["data"]["code"], "session_ended");
}

#[tokio::test]
async fn base_role_never_sees_admin_tools() {
    let h = harness(vec![ScriptedTurn::text("ok")]);
    let (session, mut rx) = ChannelSession::open(h.state.clone(), "u-base");
    session.handle_text(&send_frame("s1", "what can you do?", None)).await;
    frames_until(&mut rx, "chat:message-end").await;

    let tools: Vec<String> = h.provider.requests()[0].tools.iter().map(|t| t.name.clone()).collect();
    assert!(tools.contains(&"update_brand".to_string()));
    assert!(!tools.iter().any(|t| t == "grant_credits" || t == "lookup_user" || t == "invite_member"));
}
