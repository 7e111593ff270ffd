use crate::env::{INTERRUPT_EXIT_CODE, messages};
use crate::render::{self, RenderContext, Renderer, RendererFactory, RendererKind, RendererOptions};
use crate::task::bus::NotificationBus;
use crate::task::error::{ListError, TaskError};
use crate::task::node::TaskNode;
use crate::task::types::{TaskSnapshot, TaskSpec};
use crate::task::wrapper::{ErrorSink, TaskWrapper};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How many task bodies of one list may be in flight at once
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(from = "ConcurrencyValue", into = "ConcurrencyValue")]
pub enum Concurrency {
    #[default]
    Serial,
    Unbounded,
    Limit(usize),
}

#[derive(Serialize, Deserialize, Clone, Copy)]
#[serde(untagged)]
enum ConcurrencyValue {
    Flag(bool),
    Limit(usize),
}

impl From<ConcurrencyValue> for Concurrency {
    fn from(value: ConcurrencyValue) -> Self {
        match value {
            ConcurrencyValue::Flag(flag) => flag.into(),
            ConcurrencyValue::Limit(limit) => limit.into(),
        }
    }
}

impl From<Concurrency> for ConcurrencyValue {
    fn from(value: Concurrency) -> Self {
        match value {
            Concurrency::Serial => ConcurrencyValue::Flag(false),
            Concurrency::Unbounded => ConcurrencyValue::Flag(true),
            Concurrency::Limit(limit) => ConcurrencyValue::Limit(limit),
        }
    }
}

impl From<bool> for Concurrency {
    fn from(concurrent: bool) -> Self {
        if concurrent {
            Concurrency::Unbounded
        } else {
            Concurrency::Serial
        }
    }
}

impl From<usize> for Concurrency {
    fn from(limit: usize) -> Self {
        Concurrency::Limit(limit)
    }
}

impl Concurrency {
    /// Pool size, `None` meaning unbounded. A zero limit is treated as serial.
    pub fn limit(&self) -> Option<usize> {
        match self {
            Concurrency::Serial => Some(1),
            Concurrency::Unbounded => None,
            Concurrency::Limit(limit) => Some((*limit).max(1)),
        }
    }
}

impl FromStr for Concurrency {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "true" | "unbounded" => Ok(Concurrency::Unbounded),
            "false" | "serial" => Ok(Concurrency::Serial),
            other => other
                .parse::<usize>()
                .map(Concurrency::Limit)
                .map_err(|_| format!("invalid concurrency '{value}', expected true, false or a number")),
        }
    }
}

impl fmt::Display for Concurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Concurrency::Serial => f.write_str("serial"),
            Concurrency::Unbounded => f.write_str("unbounded"),
            Concurrency::Limit(limit) => write!(f, "{limit}"),
        }
    }
}

/// Configuration for a task list.
///
/// Unset fields fall back to their defaults, or, for a nested list, to the
/// options of the list that runs it.
pub struct ListOptions<Ctx> {
    /// Defaults to serial
    pub concurrent: Option<Concurrency>,
    /// Defaults to true: the first failure aborts the run
    pub exit_on_error: Option<bool>,
    /// Defaults to true: install the interrupt handler for top-level runs
    pub register_signal_listeners: Option<bool>,
    /// Context used when `run` is called without one
    pub ctx: Option<Arc<Ctx>>,
    pub renderer: Option<RendererKind>,
    pub non_tty_renderer: Option<RendererKind>,
    /// Force the silent renderer
    pub renderer_silent: Option<bool>,
    /// Force the non-TTY renderer even on a terminal
    pub renderer_fallback: Option<bool>,
    pub renderer_options: RendererOptions,
    pub non_tty_renderer_options: RendererOptions,
    /// Custom renderer, used instead of the built-in ones unless silenced
    pub renderer_factory: Option<RendererFactory>,
}

impl<Ctx> Default for ListOptions<Ctx> {
    fn default() -> Self {
        Self {
            concurrent: None,
            exit_on_error: None,
            register_signal_listeners: None,
            ctx: None,
            renderer: None,
            non_tty_renderer: None,
            renderer_silent: None,
            renderer_fallback: None,
            renderer_options: RendererOptions::default(),
            non_tty_renderer_options: RendererOptions::default(),
            renderer_factory: None,
        }
    }
}

impl<Ctx> Clone for ListOptions<Ctx> {
    fn clone(&self) -> Self {
        Self {
            concurrent: self.concurrent,
            exit_on_error: self.exit_on_error,
            register_signal_listeners: self.register_signal_listeners,
            ctx: self.ctx.clone(),
            renderer: self.renderer,
            non_tty_renderer: self.non_tty_renderer,
            renderer_silent: self.renderer_silent,
            renderer_fallback: self.renderer_fallback,
            renderer_options: self.renderer_options.clone(),
            non_tty_renderer_options: self.non_tty_renderer_options.clone(),
            renderer_factory: self.renderer_factory.clone(),
        }
    }
}

impl<Ctx> fmt::Debug for ListOptions<Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListOptions")
            .field("concurrent", &self.concurrent)
            .field("exit_on_error", &self.exit_on_error)
            .field("register_signal_listeners", &self.register_signal_listeners)
            .field("ctx", &self.ctx.is_some())
            .field("renderer", &self.renderer)
            .field("non_tty_renderer", &self.non_tty_renderer)
            .field("renderer_silent", &self.renderer_silent)
            .field("renderer_fallback", &self.renderer_fallback)
            .field("renderer_factory", &self.renderer_factory.is_some())
            .finish_non_exhaustive()
    }
}

impl<Ctx> ListOptions<Ctx> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn concurrent(mut self, concurrent: impl Into<Concurrency>) -> Self {
        self.concurrent = Some(concurrent.into());
        self
    }

    pub fn exit_on_error(mut self, exit_on_error: bool) -> Self {
        self.exit_on_error = Some(exit_on_error);
        self
    }

    pub fn register_signal_listeners(mut self, register: bool) -> Self {
        self.register_signal_listeners = Some(register);
        self
    }

    pub fn ctx(mut self, ctx: Arc<Ctx>) -> Self {
        self.ctx = Some(ctx);
        self
    }

    pub fn renderer(mut self, renderer: RendererKind) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn renderer_factory(mut self, factory: RendererFactory) -> Self {
        self.renderer_factory = Some(factory);
        self
    }

    /// Silent renderer and no interrupt handler; convenient for embedding.
    pub fn quiet(mut self) -> Self {
        self.renderer_silent = Some(true);
        self.register_signal_listeners = Some(false);
        self
    }

    pub fn concurrency(&self) -> Concurrency {
        self.concurrent.unwrap_or_default()
    }

    pub fn exits_on_error(&self) -> bool {
        self.exit_on_error != Some(false)
    }

    pub fn registers_signal_listeners(&self) -> bool {
        self.register_signal_listeners != Some(false)
    }

    /// Fill unset fields from `parent`. The context is never inherited.
    ///
    /// Renderer options are inherited as a whole when the child never changed
    /// them from their defaults.
    pub fn merged_over(&self, parent: &ListOptions<Ctx>) -> ListOptions<Ctx> {
        ListOptions {
            concurrent: self.concurrent.or(parent.concurrent),
            exit_on_error: self.exit_on_error.or(parent.exit_on_error),
            register_signal_listeners: self
                .register_signal_listeners
                .or(parent.register_signal_listeners),
            ctx: self.ctx.clone(),
            renderer: self.renderer.or(parent.renderer),
            non_tty_renderer: self.non_tty_renderer.or(parent.non_tty_renderer),
            renderer_silent: self.renderer_silent.or(parent.renderer_silent),
            renderer_fallback: self.renderer_fallback.or(parent.renderer_fallback),
            renderer_options: inherit_options(&self.renderer_options, &parent.renderer_options),
            non_tty_renderer_options: inherit_options(
                &self.non_tty_renderer_options,
                &parent.non_tty_renderer_options,
            ),
            renderer_factory: self
                .renderer_factory
                .clone()
                .or_else(|| parent.renderer_factory.clone()),
        }
    }
}

/// Ordered list of tasks run with bounded concurrency over one shared context.
///
/// A list is a cheap handle; clones share the same nodes, options and error
/// accumulator. A list returned from a task body runs as that task's subtasks.
///
/// The shared context is handed to every body as the same `Arc<Ctx>` with no
/// isolation. Bodies run cooperatively inside the future awaiting `run`, so
/// mutation is only interleaved at await points; bodies that hand the context to
/// spawned tasks must bring their own synchronization.
pub struct TaskList<Ctx> {
    inner: Arc<ListInner<Ctx>>,
}

struct ListInner<Ctx> {
    tasks: RwLock<Vec<Arc<TaskNode<Ctx>>>>,
    options: RwLock<ListOptions<Ctx>>,
    errors: Mutex<Vec<ListError<Ctx>>>,
    bus: NotificationBus,
    renderer_kind: Mutex<RendererKind>,
    renderer_options: RendererOptions,
    renderer: Mutex<Option<Box<dyn Renderer>>>,
    nested: AtomicBool,
}

impl<Ctx> Clone for TaskList<Ctx> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Ctx> fmt::Debug for TaskList<Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskList")
            .field("tasks", &read_lock(&self.inner.tasks).len())
            .field("options", &*read_lock(&self.inner.options))
            .finish_non_exhaustive()
    }
}

/// Renderer options left at their defaults are taken from the parent.
fn inherit_options(own: &RendererOptions, parent: &RendererOptions) -> RendererOptions {
    if *own == RendererOptions::default() {
        parent.clone()
    } else {
        own.clone()
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Aborts the interrupt listener when a run finishes
struct SignalGuard(JoinHandle<()>);

impl Drop for SignalGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl<Ctx: Send + Sync + 'static> TaskList<Ctx> {
    /// Create a list from task declarations.
    pub fn new(tasks: impl IntoIterator<Item = TaskSpec<Ctx>>, options: ListOptions<Ctx>) -> Self {
        let selection = render::select(
            options.renderer.unwrap_or_default(),
            options.non_tty_renderer.unwrap_or(RendererKind::Verbose),
            options.renderer_fallback.unwrap_or(false),
            options.renderer_silent.unwrap_or(false),
        );
        let renderer_options = if selection.non_tty {
            options.non_tty_renderer_options.clone()
        } else {
            options.renderer_options.clone()
        };

        let list = Self {
            inner: Arc::new(ListInner {
                tasks: RwLock::new(Vec::new()),
                options: RwLock::new(options),
                errors: Mutex::new(Vec::new()),
                bus: NotificationBus::new(),
                renderer_kind: Mutex::new(selection.kind),
                renderer_options,
                renderer: Mutex::new(None),
                nested: AtomicBool::new(false),
            }),
        };
        list.add(tasks);
        list
    }

    /// Append tasks. Should be called before `run` starts.
    pub fn add(&self, tasks: impl IntoIterator<Item = TaskSpec<Ctx>>) {
        let defaults = &self.inner.renderer_options.task;
        let mut nodes = write_lock(&self.inner.tasks);
        for spec in tasks {
            nodes.push(Arc::new(TaskNode::new(spec, defaults, self.inner.bus.clone())));
        }
    }

    pub fn tasks(&self) -> Vec<Arc<TaskNode<Ctx>>> {
        read_lock(&self.inner.tasks).clone()
    }

    pub fn len(&self) -> usize {
        read_lock(&self.inner.tasks).len()
    }

    pub fn is_empty(&self) -> bool {
        read_lock(&self.inner.tasks).is_empty()
    }

    pub fn options(&self) -> ListOptions<Ctx> {
        read_lock(&self.inner.options).clone()
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.inner.bus
    }

    pub fn renderer_kind(&self) -> RendererKind {
        *lock(&self.inner.renderer_kind)
    }

    /// Aggregated failures recorded by every run of this list, oldest first.
    pub fn errors(&self) -> Vec<ListError<Ctx>> {
        lock(&self.inner.errors).clone()
    }

    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        snapshot_nodes(&self.tasks())
    }

    /// Run with the configured context, or a fresh default one.
    pub async fn run(&self) -> Result<Arc<Ctx>, TaskError>
    where
        Ctx: Default,
    {
        let ctx = read_lock(&self.inner.options).ctx.clone();
        self.run_with(ctx.unwrap_or_default()).await
    }

    /// Run every enabled task against `ctx` and return it.
    ///
    /// In fail-fast mode the first failure stops further dispatch, lets tasks
    /// already in flight settle, and is returned. In collect mode the run always
    /// succeeds. Either way, every failure and every error a body reported is
    /// recorded in [`TaskList::errors`] under one aggregated entry per run.
    pub async fn run_with(&self, ctx: Arc<Ctx>) -> Result<Arc<Ctx>, TaskError> {
        self.start_renderer();
        let _signal_guard = self.install_signal_listener();

        let options = Arc::new(self.options());
        let errors: ErrorSink = Arc::default();
        let tasks = self.tasks();

        info!(
            "Running {} tasks with {} concurrency",
            tasks.len(),
            options.concurrency()
        );

        self.check_all(&ctx);

        let aborted = AtomicBool::new(false);
        let first_error: Mutex<Option<TaskError>> = Mutex::new(None);
        let (aborted, first_error) = (&aborted, &first_error);

        futures::stream::iter(tasks)
            .for_each_concurrent(options.concurrency().limit(), |task| {
                let ctx = Arc::clone(&ctx);
                let wrapper = TaskWrapper::new(Arc::clone(&task), Arc::clone(&errors), Arc::clone(&options));
                async move {
                    if aborted.load(Ordering::Acquire) {
                        debug!("Run aborted, not dispatching task {}", task.id());
                        return;
                    }

                    self.check_all(&ctx);
                    if !task.is_enabled() {
                        debug!("Task {} is disabled", task.id());
                        return;
                    }

                    if let Err(error) = task.run(ctx, wrapper).await {
                        aborted.store(true, Ordering::Release);
                        lock(first_error).get_or_insert(error);
                    }
                }
            })
            .await;

        let first_error = lock(first_error).take();
        let collected = std::mem::take(&mut *lock(&errors));

        let result = match first_error {
            Some(failure) => {
                error!("Task list aborted: {}", failure);
                self.push_error(ListError::new(
                    failure.to_string(),
                    vec![failure.clone()],
                    Arc::clone(&ctx),
                ));
                self.end_renderer(Some(&failure));
                Err(failure)
            }
            None => {
                self.end_renderer(None);
                Ok(Arc::clone(&ctx))
            }
        };

        if !collected.is_empty() {
            warn!("{} task error(s) reported during the run", collected.len());
            self.push_error(ListError::new(
                messages::FAILED_WITHOUT_CRASHING,
                collected,
                Arc::clone(&ctx),
            ));
        }

        result
    }

    /// Force every pending task into `Failed` and finalize the renderer.
    pub fn interrupt(&self) {
        warn!("Interrupting task list");
        for task in self.tasks() {
            task.interrupt();
        }
        self.end_renderer(Some(&TaskError::Interrupted));
    }

    fn check_all(&self, ctx: &Ctx) {
        for task in read_lock(&self.inner.tasks).iter() {
            task.check(ctx);
        }
    }

    fn push_error(&self, error: ListError<Ctx>) {
        lock(&self.inner.errors).push(error);
    }

    /// Prepare this list to run as the subtasks of a task in another list.
    pub(crate) fn adopt(&self, parent: &ListOptions<Ctx>, parent_bus: &NotificationBus) {
        {
            let mut options = write_lock(&self.inner.options);
            *options = options.merged_over(parent);
        }
        *lock(&self.inner.renderer_kind) = RendererKind::Silent;
        self.inner.nested.store(true, Ordering::Release);
        self.inner.bus.forward_to(parent_bus);
    }

    fn start_renderer(&self) {
        let mut renderer = lock(&self.inner.renderer);
        let renderer = renderer.get_or_insert_with(|| {
            let kind = self.renderer_kind();
            debug!("Creating {:?} renderer", kind);
            let context = RenderContext {
                snapshot: snapshot_source(Arc::downgrade(&self.inner)),
                options: self.inner.renderer_options.clone(),
                bus: self.inner.bus.clone(),
            };
            let factory = read_lock(&self.inner.options).renderer_factory.clone();
            match factory {
                Some(factory) if kind != RendererKind::Silent => factory(context),
                _ => render::create(kind, context),
            }
        });
        renderer.render();
    }

    fn end_renderer(&self, error: Option<&TaskError>) {
        if let Some(renderer) = lock(&self.inner.renderer).as_mut() {
            renderer.end(error);
        }
    }

    fn install_signal_listener(&self) -> Option<SignalGuard> {
        if self.inner.nested.load(Ordering::Acquire)
            || !read_lock(&self.inner.options).registers_signal_listeners()
        {
            return None;
        }

        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let list = self.clone();
        Some(SignalGuard(runtime.spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                list.interrupt();
                std::process::exit(INTERRUPT_EXIT_CODE);
            }
        })))
    }
}

fn snapshot_nodes<Ctx: Send + Sync + 'static>(tasks: &[Arc<TaskNode<Ctx>>]) -> Vec<TaskSnapshot> {
    tasks.iter().map(|task| task.snapshot()).collect()
}

fn snapshot_source<Ctx: Send + Sync + 'static>(inner: Weak<ListInner<Ctx>>) -> render::SnapshotSource {
    Arc::new(move || match inner.upgrade() {
        Some(inner) => snapshot_nodes(&read_lock(&inner.tasks)),
        None => Vec::new(),
    })
}
