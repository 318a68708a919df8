//! The render pipeline.
//!
//! One call to [`Renderer::render`] takes a request triple plus
//! caller-supplied values and produces PDF bytes. Steps, in order:
//! admission, template resolution through the fallback chain, the global
//! initializer, dependency resolution of referenced injectors, tree
//! lowering, image materialization, the typesetter subprocess, and access
//! recording. The admission permit and the scratch directory are released
//! on every exit path.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use platen_cancel::CancelToken;
use platen_config::Config;
use platen_images::{ImageCache, ImageSession, materialize};
use platen_inject::{
    InitContext, Registry, ResolveRequest, discover_workspace_injectables, resolve_all,
};
use platen_lower::{LowerInput, lower};
use platen_types::{
    AccessRecord, DisplayConfig, Error, InjectableSource, Result, SYSTEM_KEYS, TypedValue,
};
use platen_typst::{CompileRequest, compile, page_count};

use crate::admission::RenderGate;
use crate::cache::ResolvedTemplate;
use crate::fallback::TemplateResolver;
use crate::ports::{AccessHistoryRepo, DefinitionRepo, VersionInjectableRepo};

/// One render request, as mapped by the HTTP collaborator.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub tenant_code: String,
    pub workspace_code: String,
    pub document_type_code: String,
    /// Caller-supplied injectable values.
    pub values: BTreeMap<String, TypedValue>,
    pub headers: BTreeMap<String, String>,
    /// Opaque payload forwarded to injectors.
    pub payload: Value,
    pub locale: String,
}

impl RenderRequest {
    pub fn new(tenant_code: &str, workspace_code: &str, document_type_code: &str) -> RenderRequest {
        RenderRequest {
            tenant_code: tenant_code.to_string(),
            workspace_code: workspace_code.to_string(),
            document_type_code: document_type_code.to_string(),
            values: BTreeMap::new(),
            headers: BTreeMap::new(),
            payload: Value::Null,
            locale: "en".to_string(),
        }
    }
}

/// A finished render.
#[derive(Debug)]
pub struct RenderOutput {
    pub pdf: Vec<u8>,
    pub file_name: String,
    pub page_count: u32,
    /// Non-fatal notes: injector fallbacks, image placeholders, dropped
    /// marks.
    pub diagnostics: Vec<String>,
}

pub struct Renderer {
    registry: Arc<Registry>,
    resolver: Arc<TemplateResolver>,
    version_injectables: Arc<dyn VersionInjectableRepo>,
    definitions: Arc<dyn DefinitionRepo>,
    access: Arc<dyn AccessHistoryRepo>,
    images: ImageCache,
    gate: RenderGate,
    bin_path: String,
    font_dirs: Vec<PathBuf>,
    render_timeout: Duration,
    admission_timeout: Duration,
    source_date_epoch: Option<i64>,
}

impl Renderer {
    pub fn new(
        config: &Config,
        registry: Arc<Registry>,
        resolver: Arc<TemplateResolver>,
        version_injectables: Arc<dyn VersionInjectableRepo>,
        definitions: Arc<dyn DefinitionRepo>,
        access: Arc<dyn AccessHistoryRepo>,
    ) -> anyhow::Result<Renderer> {
        let images = ImageCache::open(
            &config.typst.image_cache_dir,
            config.image_cache_max_age(),
            config.image_download_timeout(),
        )
        .context("failed to open image cache")?;

        Ok(Renderer {
            registry,
            resolver,
            version_injectables,
            definitions,
            access,
            images,
            gate: RenderGate::new(config.typst.max_concurrent),
            bin_path: config.typst.bin_path.clone(),
            font_dirs: config.typst.font_dirs.clone(),
            render_timeout: config.render_timeout(),
            admission_timeout: config.admission_timeout(),
            source_date_epoch: config.typst.source_date_epoch,
        })
    }

    /// Override the admission acquisition deadline.
    pub fn with_admission_timeout(mut self, timeout: Duration) -> Renderer {
        self.admission_timeout = timeout;
        self
    }

    pub fn gate(&self) -> &RenderGate {
        &self.gate
    }

    /// Render one document.
    pub fn render(&self, cancel: &CancelToken, request: &RenderRequest) -> Result<RenderOutput> {
        let _permit = self.gate.acquire(self.admission_timeout, cancel)?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let resolved = self.resolver.resolve(
            cancel,
            &request.tenant_code,
            &request.workspace_code,
            &request.document_type_code,
        )?;
        debug!(
            template = %resolved.template.id,
            version = resolved.version.version_number,
            "template resolved"
        );

        let headers = Arc::new(request.headers.clone());
        let payload = Arc::new(request.payload.clone());
        let init_data = self
            .registry
            .run_initializer(&InitContext {
                tenant_code: request.tenant_code.clone(),
                workspace_code: request.workspace_code.clone(),
                locale: request.locale.clone(),
                headers: Arc::clone(&headers),
                payload: Arc::clone(&payload),
            })
            .context("global initializer failed")?;

        let referenced = platen_content::referenced_variables(&resolved.version.content);
        let registry_codes: BTreeSet<String> = referenced
            .iter()
            .filter(|code| self.registry.contains(code))
            .cloned()
            .collect();

        let resolution = resolve_all(
            &self.registry,
            &registry_codes,
            &ResolveRequest {
                init_data: Arc::new(init_data),
                supplied: Arc::new(request.values.clone()),
                headers,
                payload,
                locale: request.locale.clone(),
                tenant_code: request.tenant_code.clone(),
                workspace_code: request.workspace_code.clone(),
                cancel: cancel.clone(),
            },
        )?;

        let mut diagnostics: Vec<String> = resolution
            .errors
            .iter()
            .map(|(code, error)| format!("injectable {code}: {error}"))
            .collect();
        let mut values = resolution.values;

        let now = Utc::now();
        for key in &referenced {
            if let Some(value) = system_value(key, &resolved, &request.locale, now) {
                values.insert(key.clone(), value);
            }
        }
        for (code, value) in &request.values {
            values.entry(code.clone()).or_insert_with(|| value.clone());
        }

        let (version_defaults, display) = self.version_overrides(cancel, &resolved)?;
        let (mut definition_defaults, mut labels) = self.definition_defaults(cancel, &resolved)?;
        for injectable in
            discover_workspace_injectables(&self.registry, cancel, &resolved.workspace.code)?
        {
            if let Some(value) = injectable.default_value {
                definition_defaults.entry(injectable.key.clone()).or_insert(value);
            }
            labels.entry(injectable.key).or_insert(injectable.label);
        }

        let mut session = ImageSession::new();
        let lowered = lower(
            &LowerInput {
                tree: &resolved.version.content,
                resolved: &values,
                version_defaults: &version_defaults,
                definition_defaults: &definition_defaults,
                display: &display,
                labels: &labels,
                registry: &self.registry,
                locale: &request.locale,
            },
            &mut session,
        );
        diagnostics.extend(lowered.diagnostics.iter().cloned());
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let scratch = tempfile::tempdir().context("failed to create scratch directory")?;
        let image_diagnostics = materialize(&self.images, &session, scratch.path(), cancel)
            .context("failed to materialize images")?;
        diagnostics.extend(image_diagnostics);
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let input = scratch.path().join("main.typ");
        let output = scratch.path().join("out.pdf");
        fs::write(&input, &lowered.source).context("failed to write typesetter source")?;

        let compiled = compile(
            &CompileRequest {
                bin_path: self.bin_path.clone(),
                input: input.clone(),
                output: output.clone(),
                font_dirs: self.font_dirs.clone(),
                working_dir: scratch.path().to_path_buf(),
                timeout: self.render_timeout,
                source_date_epoch: self.source_date_epoch,
            },
            cancel,
        )?;

        if compiled.cancelled {
            return Err(Error::Cancelled);
        }
        if !compiled.success() {
            return Err(Error::RenderFailed {
                stderr_tail: compiled.stderr_tail,
            });
        }

        let pdf = fs::read(&output).context("typesetter produced no output file")?;
        let mut pages = page_count(&pdf);
        if pages == 0 {
            pages = lowered.page_breaks + 1;
        }

        let record = AccessRecord {
            id: String::new(),
            template_id: resolved.template.id.clone(),
            version_id: resolved.version.id.clone(),
            document_type_code: request.document_type_code.clone(),
            tenant_code: request.tenant_code.clone(),
            workspace_code: request.workspace_code.clone(),
            rendered_at: now,
        };
        if let Err(err) = self.access.record(cancel, record) {
            warn!(error = %err, "failed to record access history");
        }

        Ok(RenderOutput {
            pdf,
            file_name: format!(
                "{}-v{}-{}.pdf",
                request.document_type_code,
                resolved.version.version_number,
                now.format("%Y%m%d%H%M%S"),
            ),
            page_count: pages,
            diagnostics,
        })
    }

    /// Defaults and display overrides recorded on the version.
    fn version_overrides(
        &self,
        cancel: &CancelToken,
        resolved: &ResolvedTemplate,
    ) -> Result<(BTreeMap<String, TypedValue>, BTreeMap<String, DisplayConfig>)> {
        let mut defaults = BTreeMap::new();
        let mut display = BTreeMap::new();

        for vi in self
            .version_injectables
            .for_version(cancel, &resolved.version.id)?
        {
            let code = match &vi.source {
                InjectableSource::SystemKey(key) => key.clone(),
                InjectableSource::Definition(id) => {
                    match self.definitions.by_id(cancel, id)? {
                        Some(definition) => definition.key,
                        None => continue,
                    }
                }
            };
            if let Some(value) = vi.default_value {
                defaults.insert(code.clone(), value);
            }
            display.insert(code, vi.display);
        }
        Ok((defaults, display))
    }

    /// Defaults and labels from the workspace's (non-deleted) definitions.
    fn definition_defaults(
        &self,
        cancel: &CancelToken,
        resolved: &ResolvedTemplate,
    ) -> Result<(BTreeMap<String, TypedValue>, BTreeMap<String, String>)> {
        let mut defaults = BTreeMap::new();
        let mut labels = BTreeMap::new();

        for definition in self
            .definitions
            .for_workspace(cancel, &resolved.template.workspace_id)?
        {
            if let Some(value) = definition.default_value {
                defaults.insert(definition.key.clone(), value);
            }
            labels.insert(definition.key, definition.label);
        }
        Ok((defaults, labels))
    }
}

fn system_value(
    key: &str,
    resolved: &ResolvedTemplate,
    locale: &str,
    now: DateTime<Utc>,
) -> Option<TypedValue> {
    if !SYSTEM_KEYS.contains(&key) {
        return None;
    }
    Some(match key {
        "current_date" => TypedValue::Time(now),
        "current_time" => TypedValue::String(now.format("%H:%M").to_string()),
        "tenant_name" => TypedValue::String(resolved.tenant.name.clone()),
        "workspace_name" => TypedValue::String(resolved.workspace.name.clone()),
        "document_type_name" => {
            TypedValue::String(resolved.doc_type.display_name(locale).to_string())
        }
        _ => return None,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::cache::TemplateCache;
    use crate::ports::{AccessHistoryRepo, VersionRepo};
    use crate::testkit::Fixture;
    use platen_content::{Node, kinds};
    use platen_inject::{Injector, RegistryBuilder, ResolveContext};
    use platen_types::ValueType;
    use serde_json::json;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Instant;

    /// A stand-in typesetter that copies the source into the output, so
    /// assertions can read the lowered markup out of the "PDF".
    fn fake_typst(dir: &Path, script_body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("typst");
        fs::write(&path, format!("#!/bin/sh\n{script_body}\n")).expect("write script");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
        path.to_string_lossy().into_owned()
    }

    struct Behavior {
        code: &'static str,
        data_type: ValueType,
        critical: bool,
        default: Option<TypedValue>,
        result: std::result::Result<TypedValue, &'static str>,
    }

    impl Injector for Behavior {
        fn code(&self) -> &str {
            self.code
        }
        fn data_type(&self) -> ValueType {
            self.data_type
        }
        fn resolve(&self, _ctx: &ResolveContext) -> anyhow::Result<TypedValue> {
            self.result.clone().map_err(|msg| anyhow::anyhow!(msg))
        }
        fn is_critical(&self) -> bool {
            self.critical
        }
        fn default_value(&self) -> Option<TypedValue> {
            self.default.clone()
        }
    }

    fn ok_injector(code: &'static str, value: &str) -> Arc<dyn Injector> {
        Arc::new(Behavior {
            code,
            data_type: ValueType::String,
            critical: false,
            default: None,
            result: Ok(TypedValue::String(value.to_string())),
        })
    }

    struct Rig {
        fixture: Fixture,
        renderer: Renderer,
        _bin_dir: tempfile::TempDir,
        _cache_dir: tempfile::TempDir,
    }

    fn rig(registry: Registry, script_body: &str, max_concurrent: usize) -> Rig {
        let fixture = Fixture::seeded();
        let bin_dir = tempfile::tempdir().expect("tempdir");
        let cache_dir = tempfile::tempdir().expect("tempdir");

        let mut config = Config::new();
        config.typst.bin_path = fake_typst(bin_dir.path(), script_body);
        config.typst.max_concurrent = max_concurrent;
        config.typst.image_cache_dir = cache_dir.path().join("images");

        let registry = Arc::new(registry);
        let resolver = Arc::new(TemplateResolver::new(
            fixture.store.clone(),
            fixture.store.clone(),
            fixture.store.clone(),
            fixture.store.clone(),
            fixture.store.clone(),
            Arc::new(TemplateCache::new()),
        ));
        let renderer = Renderer::new(
            &config,
            registry,
            resolver,
            fixture.store.clone(),
            fixture.store.clone(),
            fixture.store.clone(),
        )
        .expect("build renderer");

        Rig {
            fixture,
            renderer,
            _bin_dir: bin_dir,
            _cache_dir: cache_dir,
        }
    }

    /// Replace the published acme invoice content with `tree`.
    fn set_invoice_content(fixture: &Fixture, tree: Node) {
        let c = &fixture.cancel;
        let mut version = fixture
            .store
            .published_for_template(c, &fixture.acme_template.id)
            .expect("lookup")
            .expect("published version");
        version.content = tree;
        VersionRepo::update(fixture.store.as_ref(), c, version).expect("update");
    }

    fn hello_tree() -> Node {
        Node::with_children(
            kinds::DOC,
            vec![Node::with_children(
                kinds::PARAGRAPH,
                vec![
                    Node::text("Hello "),
                    Node::block(kinds::INJECTABLE).with_attr("variable", json!("customer_name")),
                ],
            )],
        )
    }

    #[test]
    fn simple_render_substitutes_resolved_value() {
        let mut builder = RegistryBuilder::new();
        builder
            .register(ok_injector("customer_name", "Ada"))
            .expect("register");
        let rig = rig(builder.freeze().expect("freeze"), r#"cp "$2" "$3""#, 4);
        set_invoice_content(&rig.fixture, hello_tree());

        let request = RenderRequest::new("acme", "eu", "invoice");
        let output = rig
            .renderer
            .render(&rig.fixture.cancel, &request)
            .expect("render");

        let source = String::from_utf8(output.pdf).expect("utf8");
        assert!(source.contains("Hello Ada\n\n"), "source was: {source:?}");
        assert_eq!(output.page_count, 1);
        assert!(output.file_name.starts_with("invoice-v1-"));
        assert!(output.file_name.ends_with(".pdf"));
        assert!(output.diagnostics.is_empty());

        // Access history recorded the render.
        let history = AccessHistoryRepo::for_template(
            rig.fixture.store.as_ref(),
            &rig.fixture.cancel,
            &rig.fixture.acme_template.id,
        )
        .expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].tenant_code, "acme");
    }

    #[test]
    fn non_critical_failure_renders_default_with_diagnostic() {
        let mut builder = RegistryBuilder::new();
        builder
            .register(Arc::new(Behavior {
                code: "customer_name",
                data_type: ValueType::String,
                critical: false,
                default: Some(TypedValue::String("N/A".into())),
                result: Err("crm unreachable"),
            }))
            .expect("register");
        let rig = rig(builder.freeze().expect("freeze"), r#"cp "$2" "$3""#, 4);
        set_invoice_content(&rig.fixture, hello_tree());

        let request = RenderRequest::new("acme", "eu", "invoice");
        let output = rig
            .renderer
            .render(&rig.fixture.cancel, &request)
            .expect("render");

        let source = String::from_utf8(output.pdf).expect("utf8");
        assert!(source.contains("Hello N/A"));
        assert!(
            output
                .diagnostics
                .iter()
                .any(|d| d.contains("customer_name") && d.contains("crm unreachable"))
        );
    }

    #[test]
    fn critical_failure_aborts_the_render() {
        let mut builder = RegistryBuilder::new();
        builder
            .register(Arc::new(Behavior {
                code: "customer_name",
                data_type: ValueType::String,
                critical: true,
                default: None,
                result: Err("crm unreachable"),
            }))
            .expect("register");
        let rig = rig(builder.freeze().expect("freeze"), r#"cp "$2" "$3""#, 4);
        set_invoice_content(&rig.fixture, hello_tree());

        let request = RenderRequest::new("acme", "eu", "invoice");
        let err = rig
            .renderer
            .render(&rig.fixture.cancel, &request)
            .expect_err("must abort");
        assert!(err.to_string().contains("critical injector"));
    }

    #[test]
    fn fallback_reaches_the_global_system_template() {
        let rig = rig(
            RegistryBuilder::new().freeze().expect("freeze"),
            r#"cp "$2" "$3""#,
            4,
        );

        // (acme, eu, contract): no contract template anywhere in acme, so
        // the global SYSTEM workspace serves it.
        let request = RenderRequest::new("acme", "eu", "contract");
        let output = rig
            .renderer
            .render(&rig.fixture.cancel, &request)
            .expect("render");
        let source = String::from_utf8(output.pdf).expect("utf8");
        assert!(source.contains("global contract"));
    }

    #[test]
    fn exhausted_fallback_is_template_not_resolved() {
        let rig = rig(
            RegistryBuilder::new().freeze().expect("freeze"),
            r#"cp "$2" "$3""#,
            4,
        );

        let request = RenderRequest::new("acme", "eu", "no-such-type");
        let err = rig
            .renderer
            .render(&rig.fixture.cancel, &request)
            .expect_err("must miss");
        assert!(matches!(err, Error::TemplateNotResolved));
    }

    #[test]
    fn typesetter_failure_surfaces_stderr_tail() {
        let rig = rig(
            RegistryBuilder::new().freeze().expect("freeze"),
            "echo 'error: font not found' >&2; exit 2",
            4,
        );

        let request = RenderRequest::new("acme", "eu", "invoice");
        let err = rig
            .renderer
            .render(&rig.fixture.cancel, &request)
            .expect_err("must fail");
        match err {
            Error::RenderFailed { stderr_tail } => {
                assert!(stderr_tail.contains("font not found"));
            }
            other => panic!("expected RenderFailed, got {other:?}"),
        }
    }

    #[test]
    fn caller_supplied_values_cover_definition_variables() {
        let rig = rig(
            RegistryBuilder::new().freeze().expect("freeze"),
            r#"cp "$2" "$3""#,
            4,
        );
        set_invoice_content(
            &rig.fixture,
            Node::with_children(
                kinds::DOC,
                vec![Node::with_children(
                    kinds::PARAGRAPH,
                    vec![
                        Node::block(kinds::INJECTABLE)
                            .with_attr("variable", json!("reference_number")),
                    ],
                )],
            ),
        );

        let mut request = RenderRequest::new("acme", "eu", "invoice");
        request.values.insert(
            "reference_number".to_string(),
            TypedValue::String("RE-2025-017".to_string()),
        );
        let output = rig
            .renderer
            .render(&rig.fixture.cancel, &request)
            .expect("render");
        let source = String::from_utf8(output.pdf).expect("utf8");
        assert!(source.contains("RE-2025-017"));
    }

    #[test]
    fn admission_overflow_returns_busy_within_the_deadline() {
        let Rig {
            fixture: _fixture,
            renderer,
            _bin_dir,
            _cache_dir,
        } = rig(
            RegistryBuilder::new().freeze().expect("freeze"),
            r#"sleep 1; cp "$2" "$3""#,
            2,
        );
        let renderer = Arc::new(renderer.with_admission_timeout(Duration::from_millis(100)));

        let ok = Arc::new(AtomicUsize::new(0));
        let busy = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..3 {
            let renderer = Arc::clone(&renderer);
            let ok = Arc::clone(&ok);
            let busy = Arc::clone(&busy);
            handles.push(thread::spawn(move || {
                let cancel = CancelToken::new();
                let request = RenderRequest::new("acme", "eu", "invoice");
                let started = Instant::now();
                match renderer.render(&cancel, &request) {
                    Ok(_) => {
                        ok.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(Error::RendererBusy) => {
                        assert!(started.elapsed() < Duration::from_millis(600));
                        busy.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(other) => panic!("unexpected error: {other:?}"),
                }
            }));
        }
        for handle in handles {
            handle.join().expect("join");
        }

        assert_eq!(ok.load(Ordering::SeqCst), 2);
        assert_eq!(busy.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancellation_before_admission_returns_cancelled() {
        let rig = rig(
            RegistryBuilder::new().freeze().expect("freeze"),
            r#"cp "$2" "$3""#,
            4,
        );

        let cancel = CancelToken::new();
        cancel.cancel();
        let request = RenderRequest::new("acme", "eu", "invoice");
        let err = rig.renderer.render(&cancel, &request).expect_err("cancelled");
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn system_keys_resolve_without_plugins() {
        let rig = rig(
            RegistryBuilder::new().freeze().expect("freeze"),
            r#"cp "$2" "$3""#,
            4,
        );
        set_invoice_content(
            &rig.fixture,
            Node::with_children(
                kinds::DOC,
                vec![Node::with_children(
                    kinds::PARAGRAPH,
                    vec![
                        Node::text("For "),
                        Node::block(kinds::INJECTABLE).with_attr("variable", json!("tenant_name")),
                    ],
                )],
            ),
        );

        let request = RenderRequest::new("acme", "eu", "invoice");
        let output = rig
            .renderer
            .render(&rig.fixture.cancel, &request)
            .expect("render");
        let source = String::from_utf8(output.pdf).expect("utf8");
        assert!(source.contains("For Acme Corp"));
    }

    #[test]
    fn provider_defaults_fill_discovered_variables() {
        struct CrmProvider;

        impl platen_inject::WorkspaceInjectableProvider for CrmProvider {
            fn code(&self) -> &str {
                "crm"
            }
            fn discover(
                &self,
                _cancel: &CancelToken,
                _workspace_code: &str,
            ) -> anyhow::Result<Vec<platen_inject::DiscoveredInjectable>> {
                Ok(vec![platen_inject::DiscoveredInjectable {
                    key: "crm_owner".to_string(),
                    label: "Account owner".to_string(),
                    data_type: ValueType::String,
                    default_value: Some(TypedValue::String("unassigned".to_string())),
                }])
            }
        }

        let mut builder = RegistryBuilder::new();
        builder
            .register_provider(Arc::new(CrmProvider))
            .expect("register provider");
        let rig = rig(builder.freeze().expect("freeze"), r#"cp "$2" "$3""#, 4);
        set_invoice_content(
            &rig.fixture,
            Node::with_children(
                kinds::DOC,
                vec![Node::with_children(
                    kinds::PARAGRAPH,
                    vec![
                        Node::block(kinds::INJECTABLE).with_attr("variable", json!("crm_owner")),
                    ],
                )],
            ),
        );

        let request = RenderRequest::new("acme", "eu", "invoice");
        let output = rig
            .renderer
            .render(&rig.fixture.cancel, &request)
            .expect("render");
        let source = String::from_utf8(output.pdf).expect("utf8");
        assert!(source.contains("unassigned"));
    }

    #[test]
    fn version_defaults_apply_when_value_is_missing() {
        let rig = rig(
            RegistryBuilder::new().freeze().expect("freeze"),
            r#"cp "$2" "$3""#,
            4,
        );
        let fixture = &rig.fixture;
        let c = &fixture.cancel;

        set_invoice_content(
            fixture,
            Node::with_children(
                kinds::DOC,
                vec![Node::with_children(
                    kinds::PARAGRAPH,
                    vec![
                        Node::block(kinds::INJECTABLE).with_attr("variable", json!("vat_note")),
                    ],
                )],
            ),
        );
        let version = fixture
            .store
            .published_for_template(c, &fixture.acme_template.id)
            .expect("lookup")
            .expect("published");
        fixture
            .store
            .replace_for_version(
                c,
                &version.id,
                vec![platen_types::VersionInjectable {
                    id: String::new(),
                    version_id: version.id.clone(),
                    source: InjectableSource::SystemKey("vat_note".to_string()),
                    default_value: Some(TypedValue::String("VAT included".to_string())),
                    display: DisplayConfig::default(),
                }],
            )
            .expect("seed injectable");

        let request = RenderRequest::new("acme", "eu", "invoice");
        let output = rig.renderer.render(c, &request).expect("render");
        let source = String::from_utf8(output.pdf).expect("utf8");
        assert!(source.contains("VAT included"));
    }
}
