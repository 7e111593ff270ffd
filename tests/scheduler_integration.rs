//! Integration tests for the task list scheduler through the public API

use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskflow::{
    Context, ListOptions, Skip, TaskError, TaskEvent, TaskList, TaskOutcome, TaskSpec, TaskState,
    TaskWrapper,
};

/// Context type owned by the caller rather than the built-in JSON map
#[derive(Default)]
struct BuildContext {
    artifacts: Mutex<Vec<String>>,
    attempts: AtomicUsize,
}

fn quiet<Ctx>() -> ListOptions<Ctx> {
    ListOptions::new().quiet()
}

#[tokio::test]
async fn test_custom_context_is_shared_by_all_tasks() {
    let tasks = ["api", "web", "worker"].into_iter().map(|name| {
        TaskSpec::from_async(format!("Build {name}"), move |ctx: Arc<BuildContext>, _task| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            ctx.artifacts.lock().unwrap().push(name.to_string());
            Ok(TaskOutcome::Done)
        })
    });
    let list = TaskList::new(tasks, quiet().concurrent(true));

    let ctx = list.run().await.unwrap();

    let mut artifacts = ctx.artifacts.lock().unwrap().clone();
    artifacts.sort();
    assert_eq!(artifacts, vec!["api", "web", "worker"]);
}

#[tokio::test]
async fn test_run_with_explicit_context() {
    let ctx = Arc::new(BuildContext::default());
    let list = TaskList::new(
        vec![TaskSpec::new("Count", |ctx: Arc<BuildContext>, _task| {
            ctx.attempts.fetch_add(1, Ordering::SeqCst);
            Ok(TaskOutcome::Done)
        })],
        quiet(),
    );

    let returned = list.run_with(Arc::clone(&ctx)).await.unwrap();

    assert!(Arc::ptr_eq(&ctx, &returned));
    assert_eq!(ctx.attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_nested_lists_inherit_collect_mode() {
    let group = TaskSpec::new("Group", |_ctx: Arc<Context>, task: TaskWrapper<Context>| {
        Ok(TaskOutcome::Subtasks(task.new_list(
            vec![
                TaskSpec::new("fails", |_ctx, _task| Err(TaskError::msg("inner failure"))),
                TaskSpec::new("still runs", |_ctx, _task| Ok(TaskOutcome::Done)),
            ],
            ListOptions::new(),
        )))
    });
    let after = TaskSpec::new("After", |_ctx: Arc<Context>, _task| Ok(TaskOutcome::Done));
    let list = TaskList::new(vec![group, after], quiet().exit_on_error(false));

    list.run().await.unwrap();

    let tasks = list.tasks();
    let children = tasks[0].subtasks();
    assert!(children[0].has_failed());
    assert!(children[1].is_completed());
    assert!(tasks[0].is_completed());
    assert!(tasks[1].is_completed());

    let errors = list.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].errors.len(), 1);
    assert_eq!(errors[0].errors[0].to_string(), "inner failure");
}

#[tokio::test]
async fn test_skip_predicate_reads_context() {
    let ctx = Arc::new(Context::new());
    ctx.set("cache_hit", true);

    let list = TaskList::new(
        vec![
            TaskSpec::new("Compile", |_ctx: Arc<Context>, _task| Ok(TaskOutcome::Done)).skip(
                |ctx: &Context| {
                    if ctx.is_truthy("cache_hit") {
                        Skip::Reason("restored from cache".to_string())
                    } else {
                        Skip::No
                    }
                },
            ),
        ],
        quiet().ctx(Arc::clone(&ctx)),
    );

    list.run().await.unwrap();

    let task = list.tasks()[0].clone();
    assert_eq!(task.state(), Some(TaskState::Skipped));
    assert_eq!(task.output().as_deref(), Some("restored from cache"));
}

#[tokio::test]
async fn test_title_and_output_changes_are_observable() {
    let list = TaskList::new(
        vec![TaskSpec::new("Download", |_ctx: Arc<Context>, task| {
            task.set_title("Downloading 3 files");
            task.set_output("file 1 of 3");
            Ok(TaskOutcome::stream(futures::stream::iter(vec![
                Ok::<_, TaskError>("file 2 of 3"),
                Ok("file 3 of 3"),
            ])))
        })],
        quiet(),
    );
    let node = list.tasks()[0].clone();
    let mut events = node.subscribe();

    list.run().await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            TaskEvent::Title(title) => seen.push(format!("title: {title}")),
            TaskEvent::Data(output) => seen.push(format!("data: {output}")),
            TaskEvent::State(state) => seen.push(format!("state: {state}")),
            TaskEvent::Enabled(_) | TaskEvent::Subtasks(_) => {}
        }
    }
    assert_eq!(
        seen,
        vec![
            "state: pending",
            "title: Downloading 3 files",
            "data: file 1 of 3",
            "data: file 2 of 3",
            "data: file 3 of 3",
            "state: completed",
        ]
    );
    assert!(node.snapshot().elapsed().is_some());
}

#[tokio::test]
async fn test_errors_accumulate_across_runs() {
    let list = TaskList::new(
        vec![TaskSpec::new("Fail", |_ctx: Arc<Context>, _task| {
            Err(TaskError::msg("still broken"))
        })],
        quiet().exit_on_error(false),
    );

    list.run().await.unwrap();
    list.run().await.unwrap();

    let errors = list.errors();
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|error| error.errors.len() == 1));
    assert_eq!(errors[1].context.len(), 0);
}

#[tokio::test]
async fn test_value_outcome_completes_task() {
    let list = TaskList::new(
        vec![TaskSpec::new("Compute", |ctx: Arc<Context>, _task| {
            ctx.set("answer", 42);
            Ok(TaskOutcome::Value(json!({ "answer": 42 })))
        })],
        quiet(),
    );

    let ctx = list.run().await.unwrap();

    assert!(list.tasks()[0].is_completed());
    assert_eq!(ctx.get("answer"), Some(json!(42)));
}
