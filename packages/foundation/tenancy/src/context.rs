//! Storage and propagation primitives for [`crate::TenantContext`].
//!
//! Two storage layers cooperate:
//! - a `tokio::task_local!` scope, used by [`with_context`] and [`spawn_with_tenant`]
//!   for cooperatively-scheduled tasks. `tokio::spawn` never inherits a parent's
//!   task-local scope, which is exactly the background-task boundary spec §4.B
//!   requires: a spawned task sees nothing until it is explicitly given a context.
//! - a thread-local stack, used by the imperative [`set`]/[`reset`] pair for
//!   blocking worker threads and for library code that cannot be rewritten to
//!   thread a future through `with_context`.
//!
//! [`current`] consults the task-local scope first, falling back to the
//! thread-local stack, so both storage layers present one ambient context.
//!
//! Bypass depth (see [`with_bypass`]) mirrors the same two-layer shape: a
//! `tokio::task_local!` cell nested inside the same scope [`with_context`]
//! installs, so a task suspended mid-bypass and resumed on a different
//! tokio worker thread still sees its own depth, plus a thread-local
//! fallback for sync call sites with no task-local scope installed at all.

use crate::error::TenantError;
use crate::TenantContext;
use std::cell::{Cell, RefCell};
use std::future::Future;

tokio::task_local! {
    static TASK_CONTEXT: TenantContext;
    static TASK_BYPASS_DEPTH: Cell<u32>;
}

thread_local! {
    static THREAD_STACK: RefCell<Vec<TenantContext>> = const { RefCell::new(Vec::new()) };
    static THREAD_BYPASS_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Read the current bypass depth: task-local scope first, thread-local
/// fallback second, mirroring [`current`].
fn bypass_depth() -> u32 {
    TASK_BYPASS_DEPTH
        .try_with(Cell::get)
        .unwrap_or_else(|_| THREAD_BYPASS_DEPTH.with(Cell::get))
}

fn bypass_depth_increment() {
    if TASK_BYPASS_DEPTH
        .try_with(|depth| depth.set(depth.get() + 1))
        .is_err()
    {
        THREAD_BYPASS_DEPTH.with(|depth| depth.set(depth.get() + 1));
    }
}

fn bypass_depth_decrement() {
    if TASK_BYPASS_DEPTH
        .try_with(|depth| depth.set(depth.get().saturating_sub(1)))
        .is_err()
    {
        THREAD_BYPASS_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Opaque handle returned by [`set`]. [`reset`] must be called with the handle it
/// was paired with; using a mismatched handle is undefined behavior per spec §4.B
/// (this implementation pops unconditionally and trusts the caller).
#[derive(Debug)]
pub struct Token {
    depth: usize,
}

/// Push a new context onto the thread-local stack, returning a handle to unwind it.
pub fn set(context: TenantContext) -> Token {
    THREAD_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        stack.push(context);
        Token { depth: stack.len() }
    })
}

/// Pop exactly the context associated with `token`.
pub fn reset(token: Token) {
    THREAD_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        debug_assert_eq!(
            stack.len(),
            token.depth,
            "tenancy Token used out of order; reset() must unwind LIFO"
        );
        stack.pop();
    });
}

/// Read the current context: task-local scope first, thread-local stack second.
pub fn current() -> Option<TenantContext> {
    if let Ok(ctx) = TASK_CONTEXT.try_with(|ctx| ctx.clone()) {
        return Some(ctx);
    }
    THREAD_STACK.with(|stack| stack.borrow().last().cloned())
}

pub fn current_tenant_id() -> Option<String> {
    current().map(|ctx| ctx.tenant_id)
}

pub fn has_context() -> bool {
    current().is_some()
}

/// Read the current context, failing with [`TenantError::ContextRequired`] if none
/// is installed. The narrow entry point for code that must not silently proceed
/// without a tenant.
pub fn require_context() -> Result<TenantContext, TenantError> {
    current().ok_or(TenantError::ContextRequired)
}

/// Run `fut` with `context` installed as the task-local ambient context for the
/// duration of the future. Does not affect the thread-local stack. Also installs
/// a fresh task-local bypass-depth cell, so `with_bypass` scopes entered inside
/// `fut` track correctly across a `.await` that resumes on a different worker
/// thread.
pub async fn with_context<F>(context: TenantContext, fut: F) -> F::Output
where
    F: Future,
{
    TASK_CONTEXT
        .scope(context, TASK_BYPASS_DEPTH.scope(Cell::new(0), fut))
        .await
}

/// Spawn a detached task with a freshly-installed context built from `tenant_id`.
///
/// This is the sanctioned way to launch deferred/background work: the spawned
/// task never sees the spawner's ambient context, only the one built here from an
/// explicit, required parameter.
pub fn spawn_with_tenant<F, Fut>(
    tenant_id: impl Into<String>,
    actor_id: impl Into<String>,
    body: F,
) -> tokio::task::JoinHandle<Fut::Output>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    let ctx = TenantContext::new(tenant_id, actor_id);
    tokio::spawn(TASK_CONTEXT.scope(
        ctx,
        TASK_BYPASS_DEPTH.scope(Cell::new(0), async move { body().await }),
    ))
}

/// A non-empty bypass justification, required by [`crate::TenantError`]'s
/// `EmptyBypassReason` variant when violated.
#[derive(Debug, Clone)]
pub struct NonEmptyReason(String);

impl NonEmptyReason {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for NonEmptyReason {
    type Error = TenantError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if value.trim().is_empty() {
            Err(TenantError::EmptyBypassReason)
        } else {
            Ok(Self(value.to_string()))
        }
    }
}

/// RAII scope that flips a query-filter-skip flag for its lifetime. Entry and exit
/// are each logged; callers that also carry an audit sink (the admission pipeline)
/// are expected to emit `bypass_entered`/`bypass_exited` audit events around the
/// same scope.
pub struct BypassGuard {
    reason: NonEmptyReason,
}

impl BypassGuard {
    pub fn reason(&self) -> &str {
        self.reason.as_str()
    }
}

impl Drop for BypassGuard {
    fn drop(&mut self) {
        bypass_depth_decrement();
        tracing::info!(reason = self.reason.as_str(), "bypass_exited");
    }
}

/// Enter an explicitly-audited bypass scope in which tenant filtering is disabled
/// for the duration of the returned guard. Depth is tracked task-locally when
/// called from inside a [`with_context`] (or [`spawn_with_tenant`]) future, so it
/// survives the task migrating across tokio worker threads; outside of such a
/// scope it falls back to a plain thread-local, matching [`current`]'s fallback.
pub fn with_bypass(reason: &str) -> Result<BypassGuard, TenantError> {
    let reason = NonEmptyReason::try_from(reason)?;
    bypass_depth_increment();
    tracing::info!(reason = reason.as_str(), "bypass_entered");
    Ok(BypassGuard { reason })
}

pub fn is_bypassed() -> bool {
    bypass_depth() > 0
}
