//! Text chat: typed lines go straight into the turn pipeline.

use std::io::Write;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};
use voxturn_core::TurnOrchestrator;
use voxturn_core::voice::SpeechOutput;

/// Run turns on lines from `input` until it ends or the user types
/// `exit` or `quit`. Returns the number of turns completed.
pub async fn run_chat<R>(
    orchestrator: &mut TurnOrchestrator,
    speech: &dyn SpeechOutput,
    input: R,
    interactive: bool,
) -> anyhow::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    if interactive {
        println!("Voxturn chat. Type 'exit' to quit.\n");
    }
    let mut lines = input.lines();
    let mut turns = 0;

    loop {
        if interactive {
            print!("You: ");
            std::io::stdout().flush()?;
        }
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        let outcome = match orchestrator.handle_text(line).await {
            Ok(outcome) => outcome,
            Err(aborted) => {
                debug!(reason = %aborted, "Turn aborted");
                continue;
            }
        };
        turns += 1;
        for degradation in &outcome.degradations {
            debug!(%degradation, "Turn degraded");
        }
        if let Err(e) = speech.speak(&outcome.response).await {
            warn!(error = %e, "Failed to speak response");
        }
    }

    Ok(turns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use voxturn_core::MockClassifier;
    use voxturn_core::brain::MockGenerationBackend;
    use voxturn_core::config::AssistantConfig;
    use voxturn_core::voice::{MockSpeech, MockSttProvider};

    fn orchestrator(backend: Arc<MockGenerationBackend>) -> TurnOrchestrator {
        TurnOrchestrator::new(
            &AssistantConfig::default(),
            Arc::new(MockSttProvider::new()),
            backend,
        )
        .unwrap()
        .with_actionable(Arc::new(MockClassifier::fixed("actionable", true)))
        .with_contextable(Arc::new(MockClassifier::fixed("contextable", false)))
    }

    #[tokio::test]
    async fn test_each_line_is_a_turn() {
        let backend = Arc::new(MockGenerationBackend::with_response("Hello!"));
        let mut orchestrator = orchestrator(backend.clone());
        let speech = MockSpeech::new();

        let input: &[u8] = b"hi there\n\nhow are you\n";
        let turns = run_chat(&mut orchestrator, &speech, input, false)
            .await
            .unwrap();

        assert_eq!(turns, 2);
        assert_eq!(backend.call_count(), 2);
        assert_eq!(speech.spoken(), vec!["Hello!".to_string(), "Hello!".to_string()]);
        assert_eq!(orchestrator.memory().len(), 2);
    }

    #[tokio::test]
    async fn test_exit_stops_the_chat() {
        let backend = Arc::new(MockGenerationBackend::with_response("Sure."));
        let mut orchestrator = orchestrator(backend.clone());
        let speech = MockSpeech::new();

        let input: &[u8] = b"first\nquit\nnever seen\n";
        let turns = run_chat(&mut orchestrator, &speech, input, false)
            .await
            .unwrap();

        assert_eq!(turns, 1);
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_reset_phrase_clears_memory() {
        let backend = Arc::new(MockGenerationBackend::with_response("Noted."));
        let mut orchestrator = orchestrator(backend);
        let speech = MockSpeech::new();

        let input: &[u8] = b"remember this\nreset memory\n";
        run_chat(&mut orchestrator, &speech, input, false)
            .await
            .unwrap();

        assert!(orchestrator.memory().is_empty());
        assert_eq!(speech.spoken().len(), 2);
    }
}
