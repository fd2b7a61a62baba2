// End-to-end session tests against a fake peer and mocked HTTP endpoints.
//
// The token, signaling and persistence endpoints are served by mockito; the
// data channel is played by `common::PeerProbe`.

mod common;

use common::*;
use loqa_voice_intake::error::ConnectionError;
use loqa_voice_intake::extract::SymptomType;
use loqa_voice_intake::realtime::{PrimingConfig, Role};
use loqa_voice_intake::session::{SessionConfig, SessionState, SessionUpdate};
use loqa_voice_intake::summary::{KEY_STATEMENTS, SEVERITY_SIGNALS};
use loqa_voice_intake::{DiagnosticKind, SaveOutcome, SendOutcome};
use mockito::Matcher;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Drain updates until one matches, or give up after a second
async fn next_matching(
    updates: &mut broadcast::Receiver<SessionUpdate>,
    matches: impl Fn(&SessionUpdate) -> bool,
) -> Option<SessionUpdate> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    loop {
        match tokio::time::timeout_at(deadline, updates.recv()).await {
            Ok(Ok(update)) if matches(&update) => return Some(update),
            Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            _ => return None,
        }
    }
}

#[tokio::test]
async fn test_full_intake_fills_slots_and_saves_once() {
    let mut server = mockito::Server::new_async().await;
    let (token, sdp) = mock_agent_endpoints(&mut server).await;
    let save = server
        .mock("POST", "/conversations")
        .match_body(Matcher::PartialJson(json!({ "reason": "ended-by-user" })))
        .with_status(201)
        .expect(1)
        .create_async()
        .await;

    let mut h = harness(&server.url(), quiet_session_config());
    connect(&h).await;

    for (agent, patient) in [
        ("What symptom are you experiencing?", "I have a headache"),
        ("How severe is it from 1 to 10?", "about an 8 out of 10"),
        ("Can you describe it?", "started this morning, throbbing pain"),
        ("Anything else?", "nothing else"),
    ] {
        h.probe.agent_said(agent);
        h.probe.patient_said(patient);
    }

    let session = Arc::clone(&h.session);
    eventually(|| {
        let session = Arc::clone(&session);
        async move { session.slots().await.complete }
    })
    .await;

    let slots = h.session.slots().await;
    assert_eq!(slots.symptom_type, SymptomType::Physical);
    assert_eq!(slots.symptom_name, "I have a headache");
    assert_eq!(slots.severity, 8);
    assert_eq!(slots.description, "started this morning, throbbing pain");
    assert_eq!(slots.notes, "nothing else");
    assert_eq!(slots.turns, 4);

    let stats = h.session.stop().await;
    assert_eq!(stats.state, SessionState::Ended);
    assert!(stats.has_saved);
    assert_eq!(stats.turns, 8);

    // A second stop changes nothing
    h.session.stop().await;

    token.assert_async().await;
    sdp.assert_async().await;
    save.assert_async().await;

    let summary = h.session.summary().await.expect("summary");
    assert!(summary.group(SEVERITY_SIGNALS).is_some());
    assert!(summary.group(KEY_STATEMENTS).is_some());

    let saved = next_matching(&mut h.updates, |u| matches!(u, SessionUpdate::Saved { .. })).await;
    match saved {
        Some(SessionUpdate::Saved { outcome, reason }) => {
            assert_eq!(outcome, SaveOutcome::Saved);
            assert_eq!(reason, "ended-by-user");
        }
        other => panic!("expected a save update, got {:?}", other),
    }
}

#[tokio::test]
async fn test_concurrent_end_triggers_save_once() {
    let mut server = mockito::Server::new_async().await;
    mock_agent_endpoints(&mut server).await;
    let save = server
        .mock("POST", "/conversations")
        .with_status(201)
        .expect(1)
        .create_async()
        .await;

    let h = harness(&server.url(), quiet_session_config());
    connect(&h).await;

    h.probe.patient_said("my back hurts");
    let session = Arc::clone(&h.session);
    eventually(|| {
        let session = Arc::clone(&session);
        async move { !session.transcript().await.is_empty() }
    })
    .await;

    h.probe.remote_close();
    let (a, b) = tokio::join!(h.session.stop(), h.session.stop());
    assert_eq!(a.state, SessionState::Ended);
    assert_eq!(b.state, SessionState::Ended);

    save.assert_async().await;
}

#[tokio::test]
async fn test_remote_close_saves_with_reason() {
    let mut server = mockito::Server::new_async().await;
    mock_agent_endpoints(&mut server).await;
    let save = server
        .mock("POST", "/conversations")
        .match_body(Matcher::PartialJson(json!({
            "reason": "channel-closed",
            "messages": [{ "role": "patient", "text": "I feel dizzy" }],
        })))
        .with_status(201)
        .expect(1)
        .create_async()
        .await;

    let h = harness(&server.url(), quiet_session_config());
    connect(&h).await;

    h.probe.patient_said("I feel dizzy");
    h.probe.remote_close();
    wait_for_state(&h.session, SessionState::Ended).await;

    let session = Arc::clone(&h.session);
    eventually(|| {
        let session = Arc::clone(&session);
        async move { session.summary().await.is_some() && session.stats().await.has_saved }
    })
    .await;

    save.assert_async().await;
    assert!(h.probe.channel().is_closed());
    assert!(h.probe.closes.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_channel_error_ends_in_error_state() {
    let mut server = mockito::Server::new_async().await;
    mock_agent_endpoints(&mut server).await;
    let save = server
        .mock("POST", "/conversations")
        .match_body(Matcher::PartialJson(json!({ "reason": "channel-error" })))
        .with_status(201)
        .expect(1)
        .create_async()
        .await;

    let h = harness(&server.url(), quiet_session_config());
    connect(&h).await;

    h.probe.patient_said("chest pain");
    h.probe.remote_error("ice connection failed");
    wait_for_state(&h.session, SessionState::Error).await;

    let session = Arc::clone(&h.session);
    eventually(|| {
        let session = Arc::clone(&session);
        async move { session.stats().await.has_saved }
    })
    .await;

    let stats = h.session.stats().await;
    assert_eq!(stats.last_error.as_deref(), Some("ice connection failed"));
    save.assert_async().await;
}

#[tokio::test]
async fn test_empty_session_is_not_saved() {
    let mut server = mockito::Server::new_async().await;
    mock_agent_endpoints(&mut server).await;
    let save = server
        .mock("POST", "/conversations")
        .expect(0)
        .create_async()
        .await;

    let mut h = harness(&server.url(), quiet_session_config());
    connect(&h).await;

    let stats = h.session.stop().await;
    assert!(stats.has_saved);
    assert!(h.session.summary().await.is_none());

    let saved = next_matching(&mut h.updates, |u| matches!(u, SessionUpdate::Saved { .. })).await;
    assert!(matches!(
        saved,
        Some(SessionUpdate::Saved {
            outcome: SaveOutcome::Empty,
            ..
        })
    ));
    save.assert_async().await;
}

#[tokio::test]
async fn test_rate_limited_transcription_pauses_sends() {
    let mut server = mockito::Server::new_async().await;
    mock_agent_endpoints(&mut server).await;

    let mut h = harness(&server.url(), quiet_session_config());
    connect(&h).await;

    h.probe.server_event(json!({
        "type": "conversation.item.input_audio_transcription.failed",
        "error": { "message": "429 Too Many Requests" },
    }));

    let limited = next_matching(&mut h.updates, |u| matches!(u, SessionUpdate::RateLimited { .. })).await;
    let until = match limited {
        Some(SessionUpdate::RateLimited { until }) => until,
        other => panic!("expected rate limit, got {:?}", other),
    };
    let remaining = until - chrono::Utc::now();
    assert!(remaining > chrono::Duration::seconds(14));

    let sent_before = h.probe.channel().sent().len();
    match h.session.send_text("hello?").await {
        SendOutcome::RateLimited { until: reported } => assert_eq!(reported, until),
        other => panic!("expected rate limited send, got {:?}", other),
    }
    assert_eq!(h.probe.channel().sent().len(), sent_before);
    assert_eq!(h.session.stats().await.rate_limited_until, Some(until));
}

#[tokio::test]
async fn test_generic_transcription_failure_is_reported() {
    let mut server = mockito::Server::new_async().await;
    mock_agent_endpoints(&mut server).await;

    let mut h = harness(&server.url(), quiet_session_config());
    connect(&h).await;

    h.probe.server_event(json!({
        "type": "conversation.item.input_audio_transcription.failed",
        "error": {},
    }));

    let error = next_matching(&mut h.updates, |u| matches!(u, SessionUpdate::Error { .. })).await;
    match error {
        Some(SessionUpdate::Error { message }) => assert!(message.contains("Audio transcription failed")),
        other => panic!("expected error update, got {:?}", other),
    }
    assert!(h.session.send_text("still here").await.is_sent());
}

#[tokio::test]
async fn test_greeting_sent_after_open() {
    let mut server = mockito::Server::new_async().await;
    mock_agent_endpoints(&mut server).await;

    let config = SessionConfig {
        greeting: "Hi, let's start.".to_string(),
        greeting_delay: Duration::from_millis(20),
        ..quiet_session_config()
    };
    let h = harness(&server.url(), config);
    connect(&h).await;

    let probe = Arc::clone(&h.probe);
    eventually(|| {
        let probe = Arc::clone(&probe);
        async move { probe.channel().sent().len() >= 2 }
    })
    .await;

    let sent = h.probe.channel().sent();
    assert_eq!(sent[0]["type"], "conversation.item.create");
    assert_eq!(sent[0]["item"]["role"], "user");
    assert_eq!(sent[0]["item"]["content"][0]["text"], "Hi, let's start.");
    assert!(sent[0]["event_id"].as_str().unwrap().starts_with("evt_"));
    assert_eq!(sent[1]["type"], "response.create");

    // Outbound user text is part of the transcript
    let transcript = h.session.transcript().await;
    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript[0].role, Role::Patient);
}

#[tokio::test]
async fn test_priming_replaces_greeting_and_stays_out_of_transcript() {
    let mut server = mockito::Server::new_async().await;
    mock_agent_endpoints(&mut server).await;
    let context = server
        .mock("GET", "/patient-data")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("patientId".into(), "p-1".into()),
            Matcher::UrlEncoded("windowDays".into(), "7".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"symptoms":[{"name":"migraine"}]}"#)
        .create_async()
        .await;

    let config = SessionConfig {
        priming: Some(PrimingConfig {
            url: format!("{}/patient-data", server.url()),
            patient_id: "p-1".to_string(),
            window_days: 7,
        }),
        ..quiet_session_config()
    };
    let h = harness(&server.url(), config);
    connect(&h).await;

    let probe = Arc::clone(&h.probe);
    eventually(|| {
        let probe = Arc::clone(&probe);
        async move { !probe.channel().sent().is_empty() }
    })
    .await;

    let sent = h.probe.channel().sent();
    let text = sent[0]["item"]["content"][0]["text"].as_str().unwrap();
    assert!(text.starts_with("PATIENT_CONTEXT\n"));
    assert!(text.contains("migraine"));
    assert!(h.session.transcript().await.is_empty());
    context.assert_async().await;
}

#[tokio::test]
async fn test_role_attribution_in_transcript() {
    let mut server = mockito::Server::new_async().await;
    mock_agent_endpoints(&mut server).await;

    let h = harness(&server.url(), quiet_session_config());
    connect(&h).await;

    h.probe.server_event(json!({
        "type": "conversation.item.created",
        "item": { "role": "assistant", "content": [{ "type": "text", "text": "Hello there" }] },
    }));
    h.probe.patient_said("my stomach hurts");
    h.probe.patient_said("   ");
    h.probe.agent_said("I'm sorry to hear that.");

    let session = Arc::clone(&h.session);
    eventually(|| {
        let session = Arc::clone(&session);
        async move { session.transcript().await.len() == 3 }
    })
    .await;

    let transcript = h.session.transcript().await;
    let roles: Vec<Role> = transcript.iter().map(|t| t.role).collect();
    assert_eq!(roles, vec![Role::Assistant, Role::Patient, Role::Assistant]);
    assert_eq!(transcript[1].text, "my stomach hurts");
    assert_eq!(
        transcript[2].source_event_type,
        "response.audio_transcript.done"
    );

    // The blank utterance did not advance the cursor
    assert_eq!(h.session.slots().await.current_step, 1);
    assert_eq!(h.session.stats().await.current_message.as_deref(), Some("Hello there"));
}

#[tokio::test]
async fn test_malformed_message_is_dropped() {
    let mut server = mockito::Server::new_async().await;
    mock_agent_endpoints(&mut server).await;

    let h = harness(&server.url(), quiet_session_config());
    connect(&h).await;

    h.probe.raw("{not json");
    h.probe.patient_said("a rash on my arm");

    let session = Arc::clone(&h.session);
    eventually(|| {
        let session = Arc::clone(&session);
        async move { session.stats().await.raw_events == 1 }
    })
    .await;

    assert_eq!(h.diagnostics.count(DiagnosticKind::Malformed), 1);
    assert_eq!(h.session.state().await, SessionState::Active);
}

#[tokio::test]
async fn test_credential_failure_fails_start() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/token")
        .with_status(500)
        .create_async()
        .await;
    let sdp = server
        .mock("POST", "/realtime")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let h = harness(&server.url(), quiet_session_config());
    let err = h.session.start().await.unwrap_err();

    assert_eq!(err, ConnectionError::Credential("Token endpoint returned 500".to_string()));
    assert_eq!(h.session.state().await, SessionState::Error);
    assert!(h.session.stats().await.last_error.is_some());
    sdp.assert_async().await;
}

#[tokio::test]
async fn test_signaling_failure_releases_peer() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/token")
        .with_status(200)
        .with_body(r#"{"client_secret":{"value":"ek_test"}}"#)
        .create_async()
        .await;
    server
        .mock("POST", "/realtime")
        .match_query(Matcher::Any)
        .with_status(400)
        .with_body("bad offer")
        .create_async()
        .await;

    let h = harness(&server.url(), quiet_session_config());
    let err = h.session.start().await.unwrap_err();

    assert_eq!(
        err,
        ConnectionError::Signaling("SDP exchange failed: 400 - bad offer".to_string())
    );
    assert_eq!(h.session.state().await, SessionState::Error);
    assert!(h.probe.channel().is_closed());
    assert_eq!(h.probe.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stop_while_connecting_cancels_start() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/token")
        .with_status(200)
        .with_body(r#"{"client_secret":{"value":"ek_test"}}"#)
        .create_async()
        .await;
    let sdp = server
        .mock("POST", "/realtime")
        .match_query(Matcher::Any)
        .with_status(201)
        .with_body(SDP_ANSWER)
        .expect(0)
        .create_async()
        .await;

    let h = harness(&server.url(), quiet_session_config());
    h.probe.hold_offer.store(true, Ordering::SeqCst);

    let session = Arc::clone(&h.session);
    let start = tokio::spawn(async move { session.start().await });

    h.probe.offer_reached.notified().await;
    assert_eq!(h.session.state().await, SessionState::Connecting);

    let stats = h.session.stop().await;
    assert_eq!(stats.state, SessionState::Ended);
    assert!(stats.has_saved);
    h.probe.release.notify_one();

    let result = start.await.unwrap();
    assert_eq!(result, Err(ConnectionError::Cancelled));
    assert_eq!(h.session.state().await, SessionState::Ended);
    assert!(h.session.stats().await.has_saved, "cancelled start re-armed the save latch");
    assert!(h.probe.closes.load(Ordering::SeqCst) >= 1);
    sdp.assert_async().await;
}

#[tokio::test]
async fn test_start_while_running_is_noop() {
    let mut server = mockito::Server::new_async().await;
    let (token, _) = mock_agent_endpoints(&mut server).await;

    let h = harness(&server.url(), quiet_session_config());
    connect(&h).await;

    h.session.start().await.unwrap();
    assert_eq!(h.session.state().await, SessionState::Active);
    token.assert_async().await;
}

#[tokio::test]
async fn test_restart_resets_session_state() {
    let mut server = mockito::Server::new_async().await;
    mock_agent_endpoints(&mut server).await;
    let save = server
        .mock("POST", "/conversations")
        .with_status(201)
        .expect(2)
        .create_async()
        .await;

    let h = harness(&server.url(), quiet_session_config());
    connect(&h).await;
    h.probe.patient_said("sore throat");
    let session = Arc::clone(&h.session);
    eventually(|| {
        let session = Arc::clone(&session);
        async move { session.slots().await.turns == 1 }
    })
    .await;
    h.session.stop().await;

    connect(&h).await;
    let stats = h.session.stats().await;
    assert!(!stats.has_saved);
    assert_eq!(stats.turns, 0);
    assert_eq!(h.session.slots().await.turns, 0);
    assert!(h.session.summary().await.is_none());

    h.probe.patient_said("still sore");
    let session = Arc::clone(&h.session);
    eventually(|| {
        let session = Arc::clone(&session);
        async move { session.slots().await.turns == 1 }
    })
    .await;
    assert!(h.session.stop().await.has_saved);
    save.assert_async().await;
}
