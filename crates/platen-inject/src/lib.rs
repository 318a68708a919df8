//! Injector plugins and the process-wide registry.
//!
//! An *injectable* is a named variable whose value is computed at render
//! time. User code supplies [`Injector`] implementations; the service
//! registers them once at startup through a [`RegistryBuilder`] and freezes
//! the result into an immutable [`Registry`] before the first render
//! request. Renders then ask the [`resolver`] to execute the injectors a
//! template references, in dependency order.
//!
//! # Example
//!
//! ```
//! use platen_inject::{Injector, RegistryBuilder, ResolveContext};
//! use platen_types::{TypedValue, ValueType};
//! use std::sync::Arc;
//!
//! struct CustomerName;
//!
//! impl Injector for CustomerName {
//!     fn code(&self) -> &str {
//!         "customer_name"
//!     }
//!     fn data_type(&self) -> ValueType {
//!         ValueType::String
//!     }
//!     fn resolve(&self, _ctx: &ResolveContext) -> anyhow::Result<TypedValue> {
//!         Ok(TypedValue::String("Ada".into()))
//!     }
//! }
//!
//! let mut builder = RegistryBuilder::new();
//! builder.register(Arc::new(CustomerName)).expect("register");
//! let registry = builder.freeze().expect("freeze");
//! assert!(registry.contains("customer_name"));
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde_json::Value;

use platen_cancel::CancelToken;
use platen_types::{ColumnSpec, TypedValue, ValueType};

pub mod resolver;

pub use resolver::{Resolution, ResolveRequest, resolve_all};

/// Process default for injectors that do not declare their own deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// The format tokens an injector accepts, and its default choice.
#[derive(Debug, Clone)]
pub struct FormatSet {
    pub tokens: Vec<String>,
    pub default: String,
}

/// Default presentation for LIST values produced by an injector.
#[derive(Debug, Clone, Default)]
pub struct ListSchema {
    /// Bullet symbol; `None` means the typesetter default.
    pub symbol: Option<String>,
    /// Optional header line emitted before the list.
    pub header: Option<String>,
}

/// An injectable contributed dynamically by a workspace provider.
#[derive(Debug, Clone)]
pub struct DiscoveredInjectable {
    pub key: String,
    pub label: String,
    pub data_type: ValueType,
    pub default_value: Option<TypedValue>,
}

/// Request-scoped inputs visible to an injector while it resolves.
///
/// `resolved` carries the values of this injector's declared dependencies;
/// everything else is shared across the whole render request.
#[derive(Clone)]
pub struct ResolveContext {
    /// Result of the global initializer closure, run once per render.
    pub init_data: Arc<Value>,
    /// Caller-supplied injectable values from the render request.
    pub supplied: Arc<BTreeMap<String, TypedValue>>,
    /// Request headers forwarded by the HTTP collaborator.
    pub headers: Arc<BTreeMap<String, String>>,
    /// Opaque request payload.
    pub payload: Arc<Value>,
    pub locale: String,
    pub tenant_code: String,
    pub workspace_code: String,
    /// Values produced by this injector's dependencies.
    pub resolved: BTreeMap<String, TypedValue>,
    /// Cancellation for this specific execution; implementors are expected
    /// to observe it in long-running work.
    pub cancel: CancelToken,
}

impl ResolveContext {
    /// The value a declared dependency produced.
    pub fn dependency(&self, code: &str) -> Option<&TypedValue> {
        self.resolved.get(code)
    }
}

/// A user-supplied resolver for one injectable.
///
/// Implementations must be cheap to construct and thread-safe: `resolve`
/// is called from worker threads, potentially concurrently with other
/// injectors of the same render.
pub trait Injector: Send + Sync {
    /// Stable identifier, unique within the registry.
    fn code(&self) -> &str;

    /// The value shape this injector produces.
    fn data_type(&self) -> ValueType;

    /// Compute the value. Runs inside the deadline from [`Injector::timeout`].
    fn resolve(&self, ctx: &ResolveContext) -> Result<TypedValue>;

    /// Codes this injector depends on; they resolve first.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Critical injectors abort the whole resolution when they fail
    /// without a default value.
    fn is_critical(&self) -> bool {
        false
    }

    /// Per-injector deadline; `None` selects [`DEFAULT_TIMEOUT`].
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Fallback recorded when resolution fails.
    fn default_value(&self) -> Option<TypedValue> {
        None
    }

    /// Accepted format tokens, for NUMBER and TIME injectors.
    fn formats(&self) -> Option<FormatSet> {
        None
    }

    /// Ordered column descriptors, for TABLE injectors.
    fn column_schema(&self) -> Option<Vec<ColumnSpec>> {
        None
    }

    /// Default symbol and header, for LIST injectors.
    fn list_schema(&self) -> Option<ListSchema> {
        None
    }
}

/// Contributes dynamically-discovered injectable definitions per workspace.
///
/// Provider codes and injector codes occupy the same namespace; collisions
/// fail at registration.
pub trait WorkspaceInjectableProvider: Send + Sync {
    fn code(&self) -> &str;

    fn discover(
        &self,
        cancel: &CancelToken,
        workspace_code: &str,
    ) -> Result<Vec<DiscoveredInjectable>>;
}

/// Inputs to the global initializer closure.
#[derive(Clone)]
pub struct InitContext {
    pub tenant_code: String,
    pub workspace_code: String,
    pub locale: String,
    pub headers: Arc<BTreeMap<String, String>>,
    pub payload: Arc<Value>,
}

/// Global initializer: invoked once per render request; its result is
/// threaded to every injector as init data.
pub type InitFn = Arc<dyn Fn(&InitContext) -> Result<Value> + Send + Sync>;

/// Accumulates registrations before the process starts serving.
#[derive(Default)]
pub struct RegistryBuilder {
    injectors: Vec<Arc<dyn Injector>>,
    by_code: HashMap<String, usize>,
    providers: Vec<Arc<dyn WorkspaceInjectableProvider>>,
    translations: HashMap<(String, String), String>,
    groups: HashMap<String, String>,
    initializer: Option<InitFn>,
}

impl RegistryBuilder {
    pub fn new() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Register an injector. Duplicate and empty codes fail loudly.
    pub fn register(&mut self, injector: Arc<dyn Injector>) -> Result<()> {
        let code = injector.code().to_string();
        if code.trim().is_empty() {
            bail!("injector with an empty code");
        }
        if self.by_code.contains_key(&code) || self.provider_code_taken(&code) {
            bail!("duplicate injector code {code:?}");
        }
        self.by_code.insert(code, self.injectors.len());
        self.injectors.push(injector);
        Ok(())
    }

    /// Register a workspace injectable provider. Its code shares the
    /// injector namespace.
    pub fn register_provider(
        &mut self,
        provider: Arc<dyn WorkspaceInjectableProvider>,
    ) -> Result<()> {
        let code = provider.code().to_string();
        if code.trim().is_empty() {
            bail!("provider with an empty code");
        }
        if self.by_code.contains_key(&code) || self.provider_code_taken(&code) {
            bail!("duplicate provider code {code:?}");
        }
        self.providers.push(provider);
        Ok(())
    }

    fn provider_code_taken(&self, code: &str) -> bool {
        self.providers.iter().any(|p| p.code() == code)
    }

    /// Translation for an injector label, keyed by (code, locale).
    pub fn add_translation(&mut self, code: &str, locale: &str, label: &str) {
        self.translations
            .insert((code.to_string(), locale.to_string()), label.to_string());
    }

    /// Group metadata for UI-facing catalogues.
    pub fn set_group(&mut self, code: &str, group: &str) {
        self.groups.insert(code.to_string(), group.to_string());
    }

    pub fn set_initializer(&mut self, init: InitFn) {
        self.initializer = Some(init);
    }

    /// Freeze into an immutable [`Registry`].
    ///
    /// Every declared dependency must name a registered injector; unknown
    /// dependencies fail here, before the process starts serving.
    pub fn freeze(self) -> Result<Registry> {
        for injector in &self.injectors {
            for dep in injector.dependencies() {
                if !self.by_code.contains_key(&dep) {
                    bail!(
                        "injector {:?} depends on unknown code {dep:?}",
                        injector.code()
                    );
                }
            }
        }

        Ok(Registry {
            injectors: self.injectors,
            by_code: self.by_code,
            providers: self.providers,
            translations: self.translations,
            groups: self.groups,
            initializer: self.initializer,
        })
    }
}

/// The frozen, process-wide injector index.
///
/// Write-once-before-start is enforced by construction: the builder is
/// consumed by [`RegistryBuilder::freeze`] and the registry has no mutating
/// methods.
pub struct Registry {
    injectors: Vec<Arc<dyn Injector>>,
    by_code: HashMap<String, usize>,
    providers: Vec<Arc<dyn WorkspaceInjectableProvider>>,
    translations: HashMap<(String, String), String>,
    groups: HashMap<String, String>,
    initializer: Option<InitFn>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("by_code", &self.by_code)
            .field("translations", &self.translations)
            .field("groups", &self.groups)
            .finish_non_exhaustive()
    }
}

impl Registry {
    pub fn get(&self, code: &str) -> Option<&Arc<dyn Injector>> {
        self.by_code.get(code).map(|&i| &self.injectors[i])
    }

    pub fn contains(&self, code: &str) -> bool {
        self.by_code.contains_key(code)
    }

    /// Injectors in declared (registration) order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Injector>> {
        self.injectors.iter()
    }

    pub fn len(&self) -> usize {
        self.injectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.injectors.is_empty()
    }

    /// Declared position of a code; used for stable scheduling tie-breaks.
    pub fn declared_index(&self, code: &str) -> Option<usize> {
        self.by_code.get(code).copied()
    }

    pub fn providers(&self) -> &[Arc<dyn WorkspaceInjectableProvider>] {
        &self.providers
    }

    pub fn translation(&self, code: &str, locale: &str) -> Option<&str> {
        self.translations
            .get(&(code.to_string(), locale.to_string()))
            .map(String::as_str)
    }

    pub fn group(&self, code: &str) -> Option<&str> {
        self.groups.get(code).map(String::as_str)
    }

    /// Run the global initializer, once per render request. Returns
    /// `Value::Null` when none is installed.
    pub fn run_initializer(&self, ctx: &InitContext) -> Result<Value> {
        match &self.initializer {
            Some(init) => init(ctx),
            None => Ok(Value::Null),
        }
    }

    /// Effective deadline for one injector.
    pub fn timeout_for(&self, injector: &dyn Injector) -> Duration {
        injector.timeout().unwrap_or(DEFAULT_TIMEOUT)
    }
}

/// Collect every injectable the registered providers contribute for a
/// workspace. A failing provider fails the whole discovery.
pub fn discover_workspace_injectables(
    registry: &Registry,
    cancel: &CancelToken,
    workspace_code: &str,
) -> Result<Vec<DiscoveredInjectable>> {
    let mut discovered = Vec::new();
    for provider in registry.providers() {
        let mut batch = provider
            .discover(cancel, workspace_code)
            .with_context(|| format!("provider {:?} failed discovery", provider.code()))?;
        discovered.append(&mut batch);
    }
    Ok(discovered)
}
