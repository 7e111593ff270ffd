//! Integration tests for prompts, with an injected engine and with the
//! terminal engine reading from an in-memory input

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use taskflow::prompt::{
    PromptAnswer, PromptEngine, PromptEngineError, PromptQuestion, PromptRequest, PromptSettings,
    TerminalPrompt, create_prompt,
};
use taskflow::task::PromptState;
use taskflow::{Context, ListOptions, TaskError, TaskList, TaskOutcome, TaskSpec};

struct Cancelling;

#[async_trait]
impl PromptEngine for Cancelling {
    async fn prompt(&self, _request: PromptRequest) -> Result<HashMap<String, Value>, PromptEngineError> {
        Err(PromptEngineError::Cancelled)
    }
}

fn terminal(input: &'static str) -> Arc<dyn PromptEngine> {
    Arc::new(TerminalPrompt::new(input.as_bytes()))
}

fn sink() -> Arc<Mutex<Vec<u8>>> {
    Arc::new(Mutex::new(Vec::new()))
}

#[tokio::test]
async fn test_terminal_prompt_answers_several_questions() {
    let output = sink();
    let settings = PromptSettings::default()
        .with_engine(terminal("alice\ny\n2\n"))
        .with_output(output.clone());

    let answer = create_prompt(
        vec![
            PromptQuestion::input("user", "Name?"),
            PromptQuestion::confirm("admin", "Admin?"),
            PromptQuestion::select("region", "Region?", ["eu", "us"]),
        ],
        settings,
        None,
    )
    .await
    .unwrap();

    assert_eq!(answer.get("user"), Some(&json!("alice")));
    assert_eq!(answer.get("admin"), Some(&json!(true)));
    assert_eq!(answer.get("region"), Some(&json!("us")));

    let written = String::from_utf8(output.lock().unwrap().clone()).unwrap();
    assert!(written.contains("? Name?"));
    assert!(written.contains("  2) us"));
}

#[tokio::test]
async fn test_terminal_prompt_end_of_input_cancels() {
    let error = create_prompt(
        vec![PromptQuestion::input("user", "Name?")],
        PromptSettings::default()
            .with_engine(terminal(""))
            .with_output(sink()),
        None,
    )
    .await
    .unwrap_err();

    assert!(error.is_prompt());
    assert_eq!(error.to_string(), "Cancelled prompt.");
}

#[tokio::test]
async fn test_task_prompt_stores_answer() {
    let list = TaskList::new(
        vec![TaskSpec::from_async("Choose", |ctx: Arc<Context>, task| async move {
            let settings = PromptSettings::default()
                .with_engine(terminal("\n"))
                .with_output(sink());
            let question = PromptQuestion::number("replicas", "How many?").with_initial(3);
            let answer = task.prompt(question, settings).await?;
            ctx.set("replicas", answer.into_value());
            Ok(TaskOutcome::Done)
        })],
        ListOptions::new().quiet(),
    );

    let ctx = list.run().await.unwrap();

    assert_eq!(ctx.get("replicas"), Some(json!(3)));
}

#[tokio::test]
async fn test_cancel_callback_error_fails_task() {
    let list = TaskList::new(
        vec![TaskSpec::from_async("Confirm", |_ctx: Arc<Context>, task| async move {
            let settings = PromptSettings::default()
                .with_engine(Arc::new(Cancelling))
                .with_cancel_callback(Arc::new(|| TaskError::msg("deployment aborted by user")));
            let answer: PromptAnswer = task
                .prompt(PromptQuestion::confirm("go", "Deploy now?"), settings)
                .await?;
            Ok(TaskOutcome::Value(answer.into_value()))
        })],
        ListOptions::new().quiet(),
    );

    let error = list.run().await.unwrap_err();

    assert_eq!(error.to_string(), "deployment aborted by user");
    let task = list.tasks()[0].clone();
    assert_eq!(task.prompt_state(), PromptState::Idle);
    assert_eq!(task.title().as_deref(), Some("deployment aborted by user"));
}

#[tokio::test]
async fn test_cancelled_prompt_in_collect_mode() {
    let list = TaskList::new(
        vec![
            TaskSpec::from_async("Ask", |_ctx: Arc<Context>, task| async move {
                let settings = PromptSettings::default().with_engine(Arc::new(Cancelling));
                task.prompt(PromptQuestion::input("name", "Name?"), settings)
                    .await?;
                Ok(TaskOutcome::Prompt)
            }),
            TaskSpec::new("Next", |_ctx: Arc<Context>, _task| Ok(TaskOutcome::Done)),
        ],
        ListOptions::new().quiet().exit_on_error(false),
    );

    list.run().await.unwrap();

    let tasks = list.tasks();
    assert!(tasks[0].has_failed());
    assert_eq!(tasks[0].title().as_deref(), Some("Cancelled prompt."));
    assert!(tasks[1].is_completed());

    let errors = list.errors();
    assert_eq!(errors.len(), 1);
    assert!(!errors[0].errors[0].is_prompt());
}
