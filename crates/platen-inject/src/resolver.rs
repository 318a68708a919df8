//! Dependency-graph execution of injectors.
//!
//! Given the set of codes a template references, the resolver closes it
//! under declared dependencies, orders the closure topologically, and runs
//! it wave by wave: every injector in a wave is independent of the others
//! and runs on its own worker thread, while dependents wait for the next
//! wave. Within a wave, results are applied in declared (registration)
//! order, so outcomes are reproducible.
//!
//! Each execution is bounded by the injector's declared deadline (or the
//! process default). Failures follow the critical/default policy: a default
//! value masks the failure (recorded as a non-fatal error), a critical
//! injector without a default aborts the whole resolution, and anything
//! else records a typed zero value.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use serde_json::Value;
use tracing::debug;

use platen_cancel::CancelToken;
use platen_types::{Error, Result, TypedValue};

use crate::{Registry, ResolveContext};

/// Upper bound on one wait slice, so cancellation is observed promptly.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Request-wide inputs shared by every injector execution.
#[derive(Clone)]
pub struct ResolveRequest {
    pub init_data: Arc<Value>,
    pub supplied: Arc<BTreeMap<String, TypedValue>>,
    pub headers: Arc<BTreeMap<String, String>>,
    pub payload: Arc<Value>,
    pub locale: String,
    pub tenant_code: String,
    pub workspace_code: String,
    pub cancel: CancelToken,
}

impl ResolveRequest {
    /// A bare request for tests and non-HTTP callers.
    pub fn bare(cancel: CancelToken) -> ResolveRequest {
        ResolveRequest {
            init_data: Arc::new(Value::Null),
            supplied: Arc::new(BTreeMap::new()),
            headers: Arc::new(BTreeMap::new()),
            payload: Arc::new(Value::Null),
            locale: "en".to_string(),
            tenant_code: String::new(),
            workspace_code: String::new(),
            cancel,
        }
    }
}

/// Outcome of a resolution: one value per requested code, plus non-fatal
/// errors for codes that fell back to a default or zero value. An absent
/// entry in `errors` means the code resolved cleanly.
#[derive(Debug, Default)]
pub struct Resolution {
    pub values: BTreeMap<String, TypedValue>,
    pub errors: BTreeMap<String, String>,
}

/// Resolve `required` and everything it transitively depends on.
pub fn resolve_all(
    registry: &Registry,
    required: &BTreeSet<String>,
    request: &ResolveRequest,
) -> Result<Resolution> {
    if request.cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let closure = close_over_dependencies(registry, required)?;
    let waves = topological_waves(registry, &closure)?;

    let mut resolution = Resolution::default();
    for wave in waves {
        if request.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut raw = run_wave(registry, &wave, &resolution.values, request)?;
        for code in &wave {
            let injector = registry
                .get(code)
                .ok_or_else(|| Error::internal(format!("injector {code:?} vanished")))?;
            let outcome = raw
                .remove(code)
                .unwrap_or_else(|| Err(anyhow!("no result produced")));

            match outcome {
                Ok(value) => {
                    resolution.values.insert(code.clone(), value);
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    if let Some(default) = injector.default_value() {
                        debug!(code = %code, error = %message, "injector failed; using default value");
                        resolution.values.insert(code.clone(), default);
                        resolution.errors.insert(code.clone(), message);
                    } else if injector.is_critical() {
                        return Err(Error::Internal(anyhow!(
                            "critical injector {code:?} failed: {message}"
                        )));
                    } else {
                        debug!(code = %code, error = %message, "injector failed; using zero value");
                        resolution
                            .values
                            .insert(code.clone(), TypedValue::zero(injector.data_type()));
                        resolution.errors.insert(code.clone(), message);
                    }
                }
            }
        }
    }

    Ok(resolution)
}

/// Transitive closure of `required` under declared dependencies.
fn close_over_dependencies(
    registry: &Registry,
    required: &BTreeSet<String>,
) -> Result<BTreeSet<String>> {
    let mut closure = BTreeSet::new();
    let mut queue: Vec<String> = required.iter().cloned().collect();

    while let Some(code) = queue.pop() {
        if closure.contains(&code) {
            continue;
        }
        let injector = registry
            .get(&code)
            .ok_or_else(|| Error::internal(format!("unknown injector code {code:?}")))?;
        let deps = injector.dependencies();
        closure.insert(code);
        for dep in deps {
            if !closure.contains(&dep) {
                queue.push(dep);
            }
        }
    }

    Ok(closure)
}

/// Kahn's algorithm, batched into waves. Each wave is sorted by declared
/// order; a cycle leaves nodes unscheduled and fails naming them.
fn topological_waves(registry: &Registry, closure: &BTreeSet<String>) -> Result<Vec<Vec<String>>> {
    let mut indegree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for code in closure {
        let injector = registry
            .get(code)
            .ok_or_else(|| Error::internal(format!("unknown injector code {code:?}")))?;
        let deps: Vec<String> = injector
            .dependencies()
            .into_iter()
            .filter(|d| closure.contains(d))
            .collect();
        indegree.insert(code.as_str(), deps.len());
        for dep in deps {
            let dep = closure.get(&dep).expect("dep filtered to closure").as_str();
            dependents.entry(dep).or_default().push(code.as_str());
        }
    }

    let mut ready: Vec<&str> = indegree
        .iter()
        .filter(|&(_, &n)| n == 0)
        .map(|(&c, _)| c)
        .collect();
    sort_by_declared_order(registry, &mut ready);

    let mut waves = Vec::new();
    let mut scheduled = 0usize;
    while !ready.is_empty() {
        waves.push(ready.iter().map(|c| c.to_string()).collect());
        scheduled += ready.len();

        let mut next = Vec::new();
        for code in ready {
            for &dependent in dependents.get(code).map(Vec::as_slice).unwrap_or(&[]) {
                let n = indegree
                    .get_mut(dependent)
                    .expect("dependent tracked in indegree");
                *n -= 1;
                if *n == 0 {
                    next.push(dependent);
                }
            }
        }
        sort_by_declared_order(registry, &mut next);
        ready = next;
    }

    if scheduled < closure.len() {
        let mut stuck: Vec<&str> = indegree
            .iter()
            .filter(|&(_, &n)| n > 0)
            .map(|(&c, _)| c)
            .collect();
        sort_by_declared_order(registry, &mut stuck);
        return Err(Error::Internal(anyhow!(
            "dependency cycle among injectors: {}",
            stuck.join(", ")
        )));
    }

    Ok(waves)
}

fn sort_by_declared_order(registry: &Registry, codes: &mut [&str]) {
    codes.sort_by_key(|c| registry.declared_index(c).unwrap_or(usize::MAX));
}

/// Run one wave of independent injectors, each on its own worker thread
/// with its own deadline. Late results from abandoned workers are dropped.
fn run_wave(
    registry: &Registry,
    wave: &[String],
    resolved: &BTreeMap<String, TypedValue>,
    request: &ResolveRequest,
) -> Result<HashMap<String, anyhow::Result<TypedValue>>> {
    let (tx, rx) = mpsc::channel::<(String, anyhow::Result<TypedValue>)>();
    let mut pending: HashMap<String, (Instant, CancelToken, Duration)> = HashMap::new();

    for code in wave {
        let injector = Arc::clone(
            registry
                .get(code)
                .ok_or_else(|| Error::internal(format!("injector {code:?} vanished")))?,
        );
        let timeout = registry.timeout_for(injector.as_ref());
        let child = request.cancel.child();

        let deps: BTreeSet<String> = injector.dependencies().into_iter().collect();
        let ctx = ResolveContext {
            init_data: Arc::clone(&request.init_data),
            supplied: Arc::clone(&request.supplied),
            headers: Arc::clone(&request.headers),
            payload: Arc::clone(&request.payload),
            locale: request.locale.clone(),
            tenant_code: request.tenant_code.clone(),
            workspace_code: request.workspace_code.clone(),
            resolved: resolved
                .iter()
                .filter(|(k, _)| deps.contains(*k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            cancel: child.clone(),
        };

        pending.insert(code.clone(), (Instant::now() + timeout, child, timeout));

        let tx = tx.clone();
        let code = code.clone();
        thread::spawn(move || {
            let result = injector.resolve(&ctx);
            let _ = tx.send((code, result));
        });
    }
    drop(tx);

    let mut out = HashMap::new();
    while !pending.is_empty() {
        if request.cancel.is_cancelled() {
            for (_, child, _) in pending.values() {
                child.cancel();
            }
            return Err(Error::Cancelled);
        }

        let now = Instant::now();
        let expired: Vec<String> = pending
            .iter()
            .filter(|(_, (deadline, _, _))| *deadline <= now)
            .map(|(code, _)| code.clone())
            .collect();
        for code in expired {
            let (_, child, timeout) = pending.remove(&code).expect("expired code is pending");
            child.cancel();
            out.insert(code, Err(anyhow!("timed out after {timeout:?}")));
        }
        if pending.is_empty() {
            break;
        }

        let next_deadline = pending
            .values()
            .map(|(deadline, _, _)| *deadline)
            .min()
            .expect("pending is non-empty");
        let wait = next_deadline
            .saturating_duration_since(Instant::now())
            .min(WAIT_SLICE)
            .max(Duration::from_millis(1));

        match rx.recv_timeout(wait) {
            Ok((code, result)) => {
                if pending.remove(&code).is_some() {
                    out.insert(code, result);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                for (code, (_, child, _)) in pending.drain() {
                    child.cancel();
                    out.insert(code, Err(anyhow!("injector worker terminated unexpectedly")));
                }
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Injector, RegistryBuilder};
    use platen_types::ValueType;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Behavior = dyn Fn(&ResolveContext) -> anyhow::Result<TypedValue> + Send + Sync;

    struct TestInjector {
        code: String,
        data_type: ValueType,
        deps: Vec<String>,
        critical: bool,
        timeout: Option<Duration>,
        default: Option<TypedValue>,
        behavior: Arc<Behavior>,
    }

    impl TestInjector {
        fn new(
            code: &str,
            behavior: impl Fn(&ResolveContext) -> anyhow::Result<TypedValue>
            + Send
            + Sync
            + 'static,
        ) -> TestInjector {
            TestInjector {
                code: code.to_string(),
                data_type: ValueType::Number,
                deps: Vec::new(),
                critical: false,
                timeout: None,
                default: None,
                behavior: Arc::new(behavior),
            }
        }

        fn deps(mut self, deps: &[&str]) -> TestInjector {
            self.deps = deps.iter().map(|d| d.to_string()).collect();
            self
        }

        fn critical(mut self) -> TestInjector {
            self.critical = true;
            self
        }

        fn timeout(mut self, timeout: Duration) -> TestInjector {
            self.timeout = Some(timeout);
            self
        }

        fn default(mut self, value: TypedValue) -> TestInjector {
            self.default = Some(value);
            self
        }

        fn string_type(mut self) -> TestInjector {
            self.data_type = ValueType::String;
            self
        }
    }

    impl Injector for TestInjector {
        fn code(&self) -> &str {
            &self.code
        }
        fn data_type(&self) -> ValueType {
            self.data_type
        }
        fn resolve(&self, ctx: &ResolveContext) -> anyhow::Result<TypedValue> {
            (self.behavior)(ctx)
        }
        fn dependencies(&self) -> Vec<String> {
            self.deps.clone()
        }
        fn is_critical(&self) -> bool {
            self.critical
        }
        fn timeout(&self) -> Option<Duration> {
            self.timeout
        }
        fn default_value(&self) -> Option<TypedValue> {
            self.default.clone()
        }
    }

    fn required(codes: &[&str]) -> BTreeSet<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    fn number(resolution: &Resolution, code: &str) -> f64 {
        match resolution.values.get(code) {
            Some(TypedValue::Number(n)) => *n,
            other => panic!("expected number for {code}, got {other:?}"),
        }
    }

    #[test]
    fn dependency_fan_in_resolves_in_order() {
        let mut builder = RegistryBuilder::new();
        builder
            .register(Arc::new(TestInjector::new("a", |_| {
                Ok(TypedValue::Number(2.0))
            })))
            .expect("register");
        builder
            .register(Arc::new(
                TestInjector::new("b", |ctx| {
                    let a = ctx.dependency("a").expect("a resolved").as_number();
                    Ok(TypedValue::Number(a + 3.0))
                })
                .deps(&["a"]),
            ))
            .expect("register");
        builder
            .register(Arc::new(
                TestInjector::new("c", |ctx| {
                    let a = ctx.dependency("a").expect("a resolved").as_number();
                    let b = ctx.dependency("b").expect("b resolved").as_number();
                    Ok(TypedValue::Number(a + b))
                })
                .deps(&["a", "b"]),
            ))
            .expect("register");
        let registry = builder.freeze().expect("freeze");

        let request = ResolveRequest::bare(CancelToken::new());
        let resolution =
            resolve_all(&registry, &required(&["c"]), &request).expect("resolve");

        assert_eq!(number(&resolution, "a"), 2.0);
        assert_eq!(number(&resolution, "b"), 5.0);
        assert_eq!(number(&resolution, "c"), 7.0);
        assert!(resolution.errors.is_empty());
    }

    #[test]
    fn failure_with_default_records_value_and_error() {
        let mut builder = RegistryBuilder::new();
        builder
            .register(Arc::new(
                TestInjector::new("x", |_| Err(anyhow!("upstream down")))
                    .string_type()
                    .default(TypedValue::String("N/A".into())),
            ))
            .expect("register");
        let registry = builder.freeze().expect("freeze");

        let request = ResolveRequest::bare(CancelToken::new());
        let resolution =
            resolve_all(&registry, &required(&["x"]), &request).expect("resolve");

        assert_eq!(
            resolution.values.get("x"),
            Some(&TypedValue::String("N/A".into()))
        );
        assert!(resolution.errors["x"].contains("upstream down"));
    }

    #[test]
    fn non_critical_failure_records_zero_value() {
        let mut builder = RegistryBuilder::new();
        builder
            .register(Arc::new(TestInjector::new("x", |_| {
                Err(anyhow!("boom"))
            })))
            .expect("register");
        let registry = builder.freeze().expect("freeze");

        let request = ResolveRequest::bare(CancelToken::new());
        let resolution =
            resolve_all(&registry, &required(&["x"]), &request).expect("resolve");

        assert_eq!(resolution.values.get("x"), Some(&TypedValue::Number(0.0)));
        assert!(resolution.errors.contains_key("x"));
    }

    #[test]
    fn critical_failure_aborts_resolution() {
        let mut builder = RegistryBuilder::new();
        builder
            .register(Arc::new(
                TestInjector::new("x", |_| Err(anyhow!("boom"))).critical(),
            ))
            .expect("register");
        let registry = builder.freeze().expect("freeze");

        let request = ResolveRequest::bare(CancelToken::new());
        let err = resolve_all(&registry, &required(&["x"]), &request)
            .expect_err("must abort");
        assert!(err.to_string().contains("critical injector"));
    }

    #[test]
    fn dependents_of_defaulted_code_still_run() {
        let mut builder = RegistryBuilder::new();
        builder
            .register(Arc::new(
                TestInjector::new("a", |_| Err(anyhow!("boom")))
                    .default(TypedValue::Number(2.0)),
            ))
            .expect("register");
        builder
            .register(Arc::new(
                TestInjector::new("b", |ctx| {
                    let a = ctx.dependency("a").expect("a has a value").as_number();
                    Ok(TypedValue::Number(a + 3.0))
                })
                .deps(&["a"]),
            ))
            .expect("register");
        let registry = builder.freeze().expect("freeze");

        let request = ResolveRequest::bare(CancelToken::new());
        let resolution =
            resolve_all(&registry, &required(&["b"]), &request).expect("resolve");

        assert_eq!(number(&resolution, "b"), 5.0);
        assert!(resolution.errors.contains_key("a"));
        assert!(!resolution.errors.contains_key("b"));
    }

    #[test]
    fn cycle_fails_without_executing_anything() {
        let executed = Arc::new(AtomicUsize::new(0));

        let mut builder = RegistryBuilder::new();
        for (code, dep) in [("a", "b"), ("b", "a")] {
            let executed = Arc::clone(&executed);
            builder
                .register(Arc::new(
                    TestInjector::new(code, move |_| {
                        executed.fetch_add(1, Ordering::SeqCst);
                        Ok(TypedValue::Number(1.0))
                    })
                    .deps(&[dep]),
                ))
                .expect("register");
        }
        let registry = builder.freeze().expect("freeze");

        let request = ResolveRequest::bare(CancelToken::new());
        let err = resolve_all(&registry, &required(&["a"]), &request)
            .expect_err("cycle must fail");

        let message = err.to_string();
        assert!(message.contains("cycle"));
        assert!(message.contains("a, b"));
        assert_eq!(executed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn timeout_counts_as_failure() {
        let mut builder = RegistryBuilder::new();
        builder
            .register(Arc::new(
                TestInjector::new("slow", |ctx| {
                    ctx.cancel.sleep(Duration::from_secs(5));
                    Ok(TypedValue::Number(1.0))
                })
                .timeout(Duration::from_millis(40))
                .default(TypedValue::Number(-1.0)),
            ))
            .expect("register");
        let registry = builder.freeze().expect("freeze");

        let request = ResolveRequest::bare(CancelToken::new());
        let start = Instant::now();
        let resolution =
            resolve_all(&registry, &required(&["slow"]), &request).expect("resolve");

        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(number(&resolution, "slow"), -1.0);
        assert!(resolution.errors["slow"].contains("timed out"));
    }

    #[test]
    fn cancellation_while_waiting_propagates() {
        let mut builder = RegistryBuilder::new();
        builder
            .register(Arc::new(TestInjector::new("slow", |ctx| {
                ctx.cancel.sleep(Duration::from_secs(10));
                Ok(TypedValue::Number(1.0))
            })))
            .expect("register");
        let registry = builder.freeze().expect("freeze");

        let cancel = CancelToken::new();
        let canceller = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            canceller.cancel();
        });

        let request = ResolveRequest::bare(cancel);
        let start = Instant::now();
        let err = resolve_all(&registry, &required(&["slow"]), &request)
            .expect_err("must cancel");
        assert!(matches!(err, Error::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn pre_cancelled_request_resolves_nothing() {
        let executed = Arc::new(AtomicUsize::new(0));
        let mut builder = RegistryBuilder::new();
        let counter = Arc::clone(&executed);
        builder
            .register(Arc::new(TestInjector::new("a", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(TypedValue::Number(1.0))
            })))
            .expect("register");
        let registry = builder.freeze().expect("freeze");

        let cancel = CancelToken::new();
        cancel.cancel();
        let request = ResolveRequest::bare(cancel);
        let err = resolve_all(&registry, &required(&["a"]), &request)
            .expect_err("must cancel");
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(executed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unknown_required_code_fails() {
        let registry = RegistryBuilder::new().freeze().expect("freeze");
        let request = ResolveRequest::bare(CancelToken::new());
        let err = resolve_all(&registry, &required(&["ghost"]), &request)
            .expect_err("must fail");
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn chain_executes_in_declared_order() {
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut builder = RegistryBuilder::new();
        for (code, deps) in [("first", vec![]), ("second", vec!["first"]), ("third", vec!["second"])] {
            let order = Arc::clone(&order);
            let deps: Vec<&str> = deps;
            builder
                .register(Arc::new(
                    TestInjector::new(code, move |_| {
                        order.lock().unwrap().push(code.to_string());
                        Ok(TypedValue::Number(0.0))
                    })
                    .deps(&deps),
                ))
                .expect("register");
        }
        let registry = builder.freeze().expect("freeze");

        let request = ResolveRequest::bare(CancelToken::new());
        resolve_all(&registry, &required(&["third"]), &request).expect("resolve");

        assert_eq!(
            order.lock().unwrap().as_slice(),
            ["first", "second", "third"]
        );
    }
}
