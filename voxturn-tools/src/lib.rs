//! # Voxturn Tools
//!
//! Built-in tools for the Voxturn assistant: an arithmetic calculator, a
//! placeholder weather checker and an in-memory calendar scheduler.

pub mod calculator;
pub mod calendar;
pub mod weather;

use std::sync::Arc;

use voxturn_core::TurnOrchestrator;
use voxturn_core::tools::ToolExecutor;
use voxturn_core::types::ToolDescriptor;

/// Descriptor and executor of every built-in tool, in registration order.
pub fn builtin_tools() -> Vec<(ToolDescriptor, Arc<dyn ToolExecutor>)> {
    vec![
        (
            calculator::CalculatorTool::descriptor(),
            Arc::new(calculator::CalculatorTool),
        ),
        (
            weather::WeatherChecker::descriptor(),
            Arc::new(weather::WeatherChecker::new()),
        ),
        (
            calendar::CalendarScheduler::descriptor(),
            Arc::new(calendar::CalendarScheduler::new()),
        ),
    ]
}

/// Register all built-in tools with the orchestrator.
pub fn register_builtin_tools(orchestrator: &mut TurnOrchestrator) {
    for (descriptor, executor) in builtin_tools() {
        if let Some(previous) = orchestrator.register_tool(descriptor, executor) {
            tracing::warn!(tool = %previous.name, "Built-in tool replaced an existing one");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxturn_core::brain::MockGenerationBackend;
    use voxturn_core::config::AssistantConfig;
    use voxturn_core::voice::MockSttProvider;

    fn orchestrator() -> TurnOrchestrator {
        TurnOrchestrator::new(
            &AssistantConfig::default(),
            Arc::new(MockSttProvider::new()),
            Arc::new(MockGenerationBackend::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_register_all_builtin_tools() {
        let mut orchestrator = orchestrator();
        register_builtin_tools(&mut orchestrator);

        assert_eq!(orchestrator.registry().len(), 3);
        assert_eq!(
            orchestrator.registry().list_names(),
            vec![
                calculator::NAME.to_string(),
                weather::NAME.to_string(),
                calendar::NAME.to_string(),
            ]
        );
    }

    #[test]
    fn test_descriptors_are_valid_schemas() {
        for (descriptor, _) in builtin_tools() {
            assert!(!descriptor.name.is_empty());
            assert!(!descriptor.description.is_empty());
            let schema = descriptor.to_json_schema();
            assert!(schema.is_object(), "schema for '{}'", descriptor.name);
        }
    }

    #[test]
    fn test_protocol_fragment_mentions_builtins() {
        let mut orchestrator = orchestrator();
        register_builtin_tools(&mut orchestrator);
        let fragment = orchestrator.protocol_fragment().unwrap();
        assert!(fragment.contains("calculator:"));
        assert!(fragment.contains("calendar_scheduler:"));
        assert!(fragment.contains("weather_checker:"));
        assert!(fragment.contains("Options: current, forecast, hourly"));
        assert!(fragment.contains("Options: create_event, list_events"));
    }
}
