//! Integration tests for the built-in tools behind the turn orchestrator.
//!
//! Generated responses are scripted with the mock backend, so these cover
//! decode → dispatch → format → memory for real tool executors.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use voxturn_core::brain::MockGenerationBackend;
use voxturn_core::config::AssistantConfig;
use voxturn_core::gating::MockClassifier;
use voxturn_core::orchestrator::TurnOrchestrator;
use voxturn_core::types::{Degradation, TurnKind};
use voxturn_core::voice::MockSttProvider;
use voxturn_tools::register_builtin_tools;

fn assistant() -> (TurnOrchestrator, Arc<MockGenerationBackend>) {
    let backend = Arc::new(MockGenerationBackend::with_response("Okay."));
    let mut orchestrator = TurnOrchestrator::new(
        &AssistantConfig::default(),
        Arc::new(MockSttProvider::new()),
        backend.clone(),
    )
    .unwrap()
    .with_actionable(Arc::new(MockClassifier::fixed("actionable", true)))
    .with_contextable(Arc::new(MockClassifier::fixed("contextable", false)));
    register_builtin_tools(&mut orchestrator);
    (orchestrator, backend)
}

// ── Calculator ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_calculator_call_is_spoken_as_calculation() {
    let (mut orchestrator, backend) = assistant();
    backend.queue_response(
        "<tool_call>\n{\"tool_name\": \"calculator\", \"parameters\": {\"expression\": \"15 + 27\"}}\n</tool_call>",
    );

    let outcome = orchestrator.handle_text("What's 15 plus 27?").await.unwrap();
    assert_eq!(outcome.response, "15 + 27 = 42");
    assert!(outcome.degradations.is_empty());
    let Some(result) = outcome.tool_result() else {
        panic!("expected a tool result");
    };
    assert!(result.success());

    let request = backend.last_request().unwrap();
    assert!(request.system_prompt().contains("calculator:"));
}

#[tokio::test]
async fn test_bare_expression_is_repaired_to_calculator() {
    let (mut orchestrator, backend) = assistant();
    backend.queue_response(
        "Let me compute that.\n<tool_call>{\"expression\": \"sqrt(144) + 2^3\"}</tool_call>",
    );

    let outcome = orchestrator.handle_text("square root of 144 plus two cubed").await.unwrap();
    assert_eq!(
        outcome.response,
        "Let me compute that.\n\nsqrt(144) + 2^3 = 20"
    );
    assert!(matches!(outcome.kind, TurnKind::ToolInvoked(_)));
}

#[tokio::test]
async fn test_invalid_expression_degrades_gracefully() {
    let (mut orchestrator, backend) = assistant();
    backend.queue_response(
        "<tool_call>{\"tool_name\": \"calculator\", \"parameters\": {\"expression\": \"1 / 0\"}}</tool_call>",
    );

    let outcome = orchestrator.handle_text("divide one by zero").await.unwrap();
    assert_eq!(
        outcome.response,
        "Tool error: tool 'calculator' failed: invalid expression: division by zero"
    );
    assert!(matches!(
        outcome.degradations.as_slice(),
        [Degradation::ToolExecutionError { name, .. }] if name == "calculator"
    ));
    assert_eq!(orchestrator.memory().len(), 1);
}

#[tokio::test]
async fn test_missing_expression_is_rejected_before_execution() {
    let (mut orchestrator, backend) = assistant();
    backend.queue_response(
        "<tool_call>{\"tool_name\": \"calculator\", \"parameters\": {}}</tool_call>",
    );

    let outcome = orchestrator.handle_text("calculate").await.unwrap();
    assert!(outcome.response.starts_with("Tool error: invalid arguments for tool 'calculator'"));
}

// ── Weather ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_weather_summary_is_spoken() {
    let (mut orchestrator, backend) = assistant();
    backend.queue_response(
        r#"<tool_call>{"tool_name": "weather_checker", "parameters": {"location": "Oslo"}}</tool_call>"#,
    );
    backend.queue_response(
        r#"<tool_call>{"tool_name": "weather_checker", "parameters": {"location": "Oslo", "action": "forecast", "days": 2}}</tool_call>"#,
    );

    let current = orchestrator.handle_text("How's the weather in Oslo?").await.unwrap();
    assert!(current.response.starts_with("Current weather in Oslo: "));
    assert!(current.degradations.is_empty());
    let Some(result) = current.tool_result() else {
        panic!("expected a tool result");
    };
    assert!(result.success());
    assert_eq!(result.parameters["action"], "current");

    let forecast = orchestrator.handle_text("And the next two days?").await.unwrap();
    assert!(forecast.response.starts_with("2-day forecast for Oslo: "));
    assert_eq!(orchestrator.memory().len(), 2);
}

#[tokio::test]
async fn test_weather_without_location_is_rejected() {
    let (mut orchestrator, backend) = assistant();
    backend.queue_response(
        r#"<tool_call>{"tool_name": "weather_checker", "parameters": {"action": "hourly"}}</tool_call>"#,
    );

    let outcome = orchestrator.handle_text("Will it rain?").await.unwrap();
    assert!(outcome.response.starts_with("Tool error: invalid arguments for tool 'weather_checker'"));
}

// ── Calendar ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_calendar_state_persists_across_turns() {
    let (mut orchestrator, backend) = assistant();
    backend.queue_response(
        r#"<tool_call>{"tool_name": "calendar_scheduler", "parameters": {"action": "create_event", "title": "Team sync", "date": "2030-06-03", "time": "10:00", "duration": 30}}</tool_call>"#,
    );
    backend.queue_response(
        r#"<tool_call>{"tool_name": "calendar_scheduler", "parameters": {"action": "list_events", "start_date": "2030-06-01", "end_date": "2030-06-07"}}</tool_call>"#,
    );
    backend.queue_response(
        r#"<tool_call>{"tool_name": "calendar_scheduler", "parameters": {"action": "find_free_time", "date": "2030-06-03", "duration": 60}}</tool_call>"#,
    );

    let created = orchestrator.handle_text("Schedule a team sync").await.unwrap();
    assert_eq!(
        created.response,
        "Event 'Team sync' scheduled for 2030-06-03 at 10:00 (Duration: 30 minutes)"
    );

    let listed = orchestrator.handle_text("What's on my calendar?").await.unwrap();
    assert_eq!(
        listed.response,
        "1 event(s) from 2030-06-01 to 2030-06-07: Team sync on 2030-06-03 at 10:00"
    );

    let free = orchestrator.handle_text("When am I free that day?").await.unwrap();
    assert_eq!(
        free.response,
        "Found 2 free time slots on 2030-06-03: 09:00 to 10:00, 10:30 to 17:00"
    );
    assert_eq!(orchestrator.memory().len(), 3);
}

#[tokio::test]
async fn test_calendar_reported_error_is_spoken() {
    let (mut orchestrator, backend) = assistant();
    backend.queue_response(
        r#"Sure.
<tool_call>{"tool_name": "calendar_scheduler", "parameters": {"action": "create_event", "date": "2030-06-03", "time": "10:00"}}</tool_call>"#,
    );

    let outcome = orchestrator.handle_text("Schedule something").await.unwrap();
    assert_eq!(outcome.response, "Sure.\n\nTool error: Event title is required");
    assert!(matches!(
        outcome.degradations.as_slice(),
        [Degradation::ToolExecutionError { name, message }]
            if name == "calendar_scheduler" && message == "Event title is required"
    ));
}

#[tokio::test]
async fn test_calendar_rejects_unknown_action_value() {
    let (mut orchestrator, backend) = assistant();
    backend.queue_response(
        r#"<tool_call>{"tool_name": "calendar_scheduler", "parameters": {"action": "reschedule"}}</tool_call>"#,
    );

    let outcome = orchestrator.handle_text("Move my meeting").await.unwrap();
    assert!(outcome.response.contains("parameter 'action' must be one of"));
}
