//! Category-agnostic hook execution engine.
//!
//! Hooks are stored type-erased per `(category, hook name)` in registration
//! order. Every dispatch snapshots the matching list under a read lock and
//! releases it before any hook runs, so a concurrent register/unregister
//! never changes the set mid-iteration.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use futures::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};

use super::context::{returns_value, HookCategory, HookContext, HookFn, HookOptions, HookResult};
use super::error::HookError;

type ErasedHook = Arc<dyn Any + Send + Sync>;

#[derive(Clone)]
struct RegisteredHook {
    plugin: String,
    hook: ErasedHook,
}

/// A hook resolved for one dispatch.
pub(crate) struct HookEntry<A, R> {
    pub plugin: String,
    pub hook: Result<HookFn<A, R>, HookError>,
}

/// Aggregate invocation counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HookStats {
    pub invocations: u64,
    pub failures: u64,
    pub timeouts: u64,
}

#[derive(Default)]
struct StatCounters {
    invocations: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
}

/// Executes named hooks across every plugin that registered them.
#[derive(Default)]
pub struct HookExecutor {
    hooks: RwLock<HashMap<HookCategory, HashMap<String, Vec<RegisteredHook>>>>,
    stats: StatCounters,
}

impl HookExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `plugin`'s implementation of `hook` in `category`.
    ///
    /// Duplicate plugin names are the manager's concern; the executor
    /// appends unconditionally.
    pub fn register<A, R>(&self, category: HookCategory, hook: &str, plugin: &str, f: HookFn<A, R>)
    where
        A: 'static,
        R: 'static,
    {
        let mut hooks = self.hooks.write();
        hooks
            .entry(category)
            .or_default()
            .entry(hook.to_string())
            .or_default()
            .push(RegisteredHook {
                plugin: plugin.to_string(),
                hook: Arc::new(f),
            });
    }

    /// Remove every hook registered by `plugin`.
    pub fn unregister_plugin(&self, plugin: &str) {
        let mut hooks = self.hooks.write();
        for by_name in hooks.values_mut() {
            for entries in by_name.values_mut() {
                entries.retain(|e| e.plugin != plugin);
            }
            by_name.retain(|_, entries| !entries.is_empty());
        }
        hooks.retain(|_, by_name| !by_name.is_empty());
    }

    pub fn clear(&self) {
        self.hooks.write().clear();
    }

    /// Number of implementations registered for a hook.
    pub fn hook_count(&self, category: HookCategory, hook: &str) -> usize {
        self.hooks
            .read()
            .get(&category)
            .and_then(|by_name| by_name.get(hook))
            .map_or(0, Vec::len)
    }

    pub fn stats(&self) -> HookStats {
        HookStats {
            invocations: self.stats.invocations.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
            timeouts: self.stats.timeouts.load(Ordering::Relaxed),
        }
    }

    /// Snapshot the registered implementations of a hook, in registration
    /// order, minus `skip`.
    pub(crate) fn snapshot<A, R>(
        &self,
        category: HookCategory,
        hook: &str,
        skip: &[String],
    ) -> Vec<HookEntry<A, R>>
    where
        A: 'static,
        R: 'static,
    {
        let registered: Vec<RegisteredHook> = {
            let hooks = self.hooks.read();
            match hooks.get(&category).and_then(|by_name| by_name.get(hook)) {
                Some(entries) => entries.clone(),
                None => return Vec::new(),
            }
        };

        registered
            .into_iter()
            .filter(|e| !skip.contains(&e.plugin))
            .map(|e| {
                let typed = e
                    .hook
                    .downcast_ref::<HookFn<A, R>>()
                    .cloned()
                    .ok_or_else(|| HookError::SignatureMismatch {
                        plugin: e.plugin.clone(),
                        hook: hook.to_string(),
                    });
                HookEntry {
                    plugin: e.plugin,
                    hook: typed,
                }
            })
            .collect()
    }

    /// Run one hook implementation against its deadline.
    ///
    /// A timed-out invocation is dropped, which cancels it at its next
    /// suspension point. Panics inside the hook are reported as failures.
    pub(crate) async fn invoke<A, R>(
        &self,
        entry: HookEntry<A, R>,
        args: A,
        ctx: &HookContext,
        timeout: Duration,
    ) -> HookResult<R>
    where
        A: Send + 'static,
        R: Send + 'static,
    {
        let start = Instant::now();
        let plugin = entry.plugin;
        let hook_name = ctx.hook.clone();

        let outcome = match entry.hook {
            Err(e) => Err(e),
            Ok(f) => {
                let call_ctx = ctx.for_plugin(&plugin);
                match std::panic::catch_unwind(AssertUnwindSafe(|| f(args, call_ctx))) {
                    Err(_) => Err(HookError::Panicked {
                        plugin: plugin.clone(),
                        hook: hook_name.clone(),
                    }),
                    Ok(fut) => {
                        match tokio::time::timeout(timeout, AssertUnwindSafe(fut).catch_unwind())
                            .await
                        {
                            Ok(Ok(Ok(value))) => Ok(value),
                            Ok(Ok(Err(e))) => Err(HookError::Failed {
                                plugin: plugin.clone(),
                                hook: hook_name.clone(),
                                message: e.to_string(),
                            }),
                            Ok(Err(_)) => Err(HookError::Panicked {
                                plugin: plugin.clone(),
                                hook: hook_name.clone(),
                            }),
                            Err(_) => Err(HookError::Timeout {
                                plugin: plugin.clone(),
                                hook: hook_name.clone(),
                                timeout_ms: timeout.as_millis() as u64,
                            }),
                        }
                    }
                }
            }
        };

        let result = HookResult {
            plugin,
            hook: hook_name,
            duration: start.elapsed(),
            outcome,
        };
        self.record(ctx.category, &result);
        result
    }

    /// Execute `hook` across all registered plugins with the same `args`.
    ///
    /// For value-returning hook names the result of the last successful
    /// invocation (in registration order) is returned; observer hooks
    /// always yield `None`. With `continue_on_error` disabled the first
    /// failure is returned as an error: immediately in sequential mode,
    /// after every invocation settled in parallel mode.
    pub async fn execute_hooks<A, R>(
        &self,
        category: HookCategory,
        hook: &str,
        args: A,
        metadata: Map<String, Value>,
        options: &HookOptions,
    ) -> Result<Option<R>, HookError>
    where
        A: Clone + Send + 'static,
        R: Send + 'static,
    {
        let entries = self.snapshot::<A, R>(category, hook, &options.skip_plugins);
        if entries.is_empty() {
            return Ok(None);
        }
        let ctx = HookContext::new(category, hook, metadata);

        let results = if options.parallel {
            let results = join_all(
                entries
                    .into_iter()
                    .map(|entry| self.invoke(entry, args.clone(), &ctx, options.timeout)),
            )
            .await;
            if !options.continue_on_error {
                if let Some(err) = first_failure(&results) {
                    return Err(err);
                }
            }
            results
        } else {
            let mut results = Vec::with_capacity(entries.len());
            for entry in entries {
                let result = self.invoke(entry, args.clone(), &ctx, options.timeout).await;
                if !options.continue_on_error {
                    if let Err(e) = &result.outcome {
                        return Err(e.clone());
                    }
                }
                results.push(result);
            }
            results
        };

        if !returns_value(hook) {
            return Ok(None);
        }
        Ok(results.into_iter().filter_map(|r| r.outcome.ok()).last())
    }

    /// Execute a transforming hook whose input and output share a type.
    ///
    /// Sequentially, each plugin receives the previous plugin's successful
    /// output and a failure leaves the value untouched. In parallel every
    /// plugin receives `value` and the last successful output wins.
    pub async fn execute_chain<T>(
        &self,
        category: HookCategory,
        hook: &str,
        value: T,
        metadata: Map<String, Value>,
        options: &HookOptions,
    ) -> Result<T, HookError>
    where
        T: Clone + Send + 'static,
    {
        if options.parallel {
            let out = self
                .execute_hooks::<T, T>(category, hook, value.clone(), metadata, options)
                .await?;
            return Ok(out.unwrap_or(value));
        }

        let entries = self.snapshot::<T, T>(category, hook, &options.skip_plugins);
        if entries.is_empty() {
            return Ok(value);
        }
        let ctx = HookContext::new(category, hook, metadata);

        let mut current = value;
        for entry in entries {
            let result = self.invoke(entry, current.clone(), &ctx, options.timeout).await;
            match result.outcome {
                Ok(next) => current = next,
                Err(e) if !options.continue_on_error => return Err(e),
                Err(_) => {}
            }
        }
        Ok(current)
    }

    fn record<R>(&self, category: HookCategory, result: &HookResult<R>) {
        self.stats.invocations.fetch_add(1, Ordering::Relaxed);
        let status = match &result.outcome {
            Ok(_) => {
                tracing::debug!(
                    category = %category,
                    hook = %result.hook,
                    plugin = %result.plugin,
                    duration_ms = result.duration.as_millis() as u64,
                    "hook completed"
                );
                "ok"
            }
            Err(e) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                if e.is_timeout() {
                    self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                }
                tracing::warn!(
                    category = %category,
                    hook = %result.hook,
                    plugin = %result.plugin,
                    error = %e,
                    "hook failed"
                );
                if e.is_timeout() {
                    "timeout"
                } else {
                    "error"
                }
            }
        };
        metrics::counter!(
            "gg_telemetry_hook_invocations_total",
            "category" => category.as_str(),
            "status" => status
        )
        .increment(1);
        metrics::histogram!("gg_telemetry_hook_duration_ms", "category" => category.as_str())
            .record(result.duration.as_secs_f64() * 1000.0);
    }
}

fn first_failure<R>(results: &[HookResult<R>]) -> Option<HookError> {
    results.iter().find_map(|r| r.outcome.as_ref().err().cloned())
}
