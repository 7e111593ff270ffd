use crate::env::messages::CANCELLED_PROMPT;
use crate::prompt::terminal;
use crate::prompt::types::*;
use crate::task::error::TaskError;
use crate::task::types::PromptState;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Name given to the question when only one is asked
pub const SINGLE_QUESTION_NAME: &str = "default";

/// Ask `questions` through the configured engine.
///
/// With a `host`, the host's prompt flag is set to pending while waiting and
/// to failed if the user cancels, so the owning task can turn the cancellation
/// into its failure message.
pub async fn create_prompt(
    mut questions: Vec<PromptQuestion>,
    settings: PromptSettings,
    host: Option<&dyn PromptHost>,
) -> Result<PromptAnswer, TaskError> {
    if questions.is_empty() {
        return Ok(PromptAnswer::Map(HashMap::new()));
    }

    let single = questions.len() == 1;
    if single {
        questions[0].name = SINGLE_QUESTION_NAME.to_string();
    }

    let engine = settings.engine.clone().unwrap_or_else(terminal::shared_stdin);
    let output = settings.output.clone().unwrap_or_else(stderr_writer);

    set_state(host, PromptState::Pending);
    debug!("Prompting {} question(s)", questions.len());

    match engine.prompt(PromptRequest { questions, output }).await {
        Ok(mut answers) => {
            set_state(host, PromptState::Idle);
            if single {
                let answer = answers.remove(SINGLE_QUESTION_NAME).unwrap_or(Value::Null);
                Ok(PromptAnswer::Single(answer))
            } else {
                Ok(PromptAnswer::Map(answers))
            }
        }
        Err(PromptEngineError::Cancelled) => Err(cancelled(&settings, host)),
        Err(failure) => {
            let message = failure.to_string();
            set_state(host, PromptState::Failed(message.clone()));
            Err(PromptError::new(message).into())
        }
    }
}

fn cancelled(settings: &PromptSettings, host: Option<&dyn PromptHost>) -> TaskError {
    debug!("Prompt cancelled");

    if let Some(callback) = &settings.cancel_callback {
        set_state(host, PromptState::Idle);
        return callback();
    }

    if settings.error {
        set_state(host, PromptState::Idle);
        return TaskError::msg(CANCELLED_PROMPT);
    }

    set_state(host, PromptState::Failed(CANCELLED_PROMPT.to_string()));
    PromptError::new(CANCELLED_PROMPT).into()
}

fn set_state(host: Option<&dyn PromptHost>, state: PromptState) {
    if let Some(host) = host {
        host.set_prompt_state(state);
    }
}

fn stderr_writer() -> PromptWriter {
    Arc::new(Mutex::new(std::io::stderr()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct Scripted(Result<Vec<(&'static str, Value)>, ()>);

    #[async_trait]
    impl PromptEngine for Scripted {
        async fn prompt(
            &self,
            request: PromptRequest,
        ) -> Result<HashMap<String, Value>, PromptEngineError> {
            match &self.0 {
                Ok(answers) => {
                    let names: Vec<_> = request.questions.iter().map(|q| q.name.as_str()).collect();
                    Ok(answers
                        .iter()
                        .filter(|(name, _)| names.contains(name))
                        .map(|(name, value)| (name.to_string(), value.clone()))
                        .collect())
                }
                Err(()) => Err(PromptEngineError::Cancelled),
            }
        }
    }

    #[derive(Default)]
    struct RecordingHost(Mutex<Vec<PromptState>>);

    impl PromptHost for RecordingHost {
        fn set_prompt_state(&self, state: PromptState) {
            self.0.lock().unwrap().push(state);
        }
    }

    fn settings(engine: Scripted) -> PromptSettings {
        PromptSettings::default().with_engine(Arc::new(engine))
    }

    #[tokio::test]
    async fn test_single_question_is_renamed_and_unwrapped() {
        let engine = Scripted(Ok(vec![("default", json!("prod"))]));
        let answer = create_prompt(
            vec![PromptQuestion::input("target", "Where?")],
            settings(engine),
            None,
        )
        .await
        .unwrap();

        assert_eq!(answer, PromptAnswer::Single(json!("prod")));
    }

    #[tokio::test]
    async fn test_cancel_marks_host_failed() {
        let host = RecordingHost::default();
        let error = create_prompt(
            vec![PromptQuestion::confirm("go", "Continue?")],
            settings(Scripted(Err(()))),
            Some(&host),
        )
        .await
        .unwrap_err();

        assert!(error.is_prompt());
        assert_eq!(error.to_string(), CANCELLED_PROMPT);
        assert_eq!(
            *host.0.lock().unwrap(),
            vec![
                PromptState::Pending,
                PromptState::Failed(CANCELLED_PROMPT.to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_cancel_with_error_setting_returns_plain_error() {
        let host = RecordingHost::default();
        let error = create_prompt(
            vec![PromptQuestion::confirm("go", "Continue?")],
            settings(Scripted(Err(()))).throw_on_cancel(),
            Some(&host),
        )
        .await
        .unwrap_err();

        assert!(!error.is_prompt());
        assert_eq!(host.0.lock().unwrap().last(), Some(&PromptState::Idle));
    }

    #[tokio::test]
    async fn test_empty_question_list() {
        let answer = create_prompt(Vec::new(), settings(Scripted(Err(()))), None)
            .await
            .unwrap();
        assert_eq!(answer, PromptAnswer::Map(HashMap::new()));
    }
}
