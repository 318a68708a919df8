//! Version lifecycle.
//!
//! Versions move through DRAFT → SCHEDULED → PUBLISHED → ARCHIVED under
//! the rules enforced here. The single cross-version invariant — at most
//! one PUBLISHED version per template — is guaranteed by the version
//! port's transactional [`publish_swap`](crate::ports::VersionRepo::publish_swap),
//! which archives the displaced version in the same step.
//!
//! Draft saves run structural checks only; publish and schedule run full
//! content validation. Publishing also records the version's injectables
//! (system keys and workspace definitions referenced by the tree) so the
//! version keeps rendering with its recorded defaults even if a
//! definition is later soft-deleted.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use platen_cancel::CancelToken;
use platen_content::{Node, referenced_variables, validate_structure};
use platen_inject::{Registry, discover_workspace_injectables};
use platen_types::{
    DisplayConfig, Error, InjectableSource, Result, TemplateVersion, VersionInjectable,
    VersionStatus, is_system_key,
};

use crate::cache::TemplateCache;
use crate::ports::{
    DefinitionRepo, DocumentTypeRepo, TemplateRepo, VersionInjectableRepo, VersionRepo,
    WorkspaceRepo,
};
use crate::validate::validate_full;

pub struct VersionLifecycle {
    templates: Arc<dyn TemplateRepo>,
    versions: Arc<dyn VersionRepo>,
    version_injectables: Arc<dyn VersionInjectableRepo>,
    definitions: Arc<dyn DefinitionRepo>,
    doc_types: Arc<dyn DocumentTypeRepo>,
    workspaces: Arc<dyn WorkspaceRepo>,
    registry: Arc<Registry>,
    cache: Arc<TemplateCache>,
}

impl VersionLifecycle {
    pub fn new(
        templates: Arc<dyn TemplateRepo>,
        versions: Arc<dyn VersionRepo>,
        version_injectables: Arc<dyn VersionInjectableRepo>,
        definitions: Arc<dyn DefinitionRepo>,
        doc_types: Arc<dyn DocumentTypeRepo>,
        workspaces: Arc<dyn WorkspaceRepo>,
        registry: Arc<Registry>,
        cache: Arc<TemplateCache>,
    ) -> VersionLifecycle {
        VersionLifecycle {
            templates,
            versions,
            version_injectables,
            definitions,
            doc_types,
            workspaces,
            registry,
            cache,
        }
    }

    /// Create a new DRAFT version. Runs structural validation only.
    pub fn create_draft(
        &self,
        cancel: &CancelToken,
        template_id: &str,
        name: &str,
        description: Option<&str>,
        content: Node,
        created_by: &str,
    ) -> Result<TemplateVersion> {
        self.templates
            .by_id(cancel, template_id)?
            .ok_or_else(|| Error::NotFound(format!("template {template_id}")))?;
        check_structure(&content)?;

        let now = Utc::now();
        self.versions.insert(
            cancel,
            TemplateVersion {
                id: String::new(),
                template_id: template_id.to_string(),
                version_number: 0,
                name: name.to_string(),
                description: description.map(String::from),
                content,
                status: VersionStatus::Draft,
                scheduled_publish_at: None,
                published_at: None,
                archived_at: None,
                created_at: now,
                updated_at: now,
                created_by: created_by.to_string(),
            },
        )
    }

    /// Mutate a DRAFT version. PUBLISHED versions are soft-immutable;
    /// mutating any non-draft is rejected.
    pub fn update_draft(
        &self,
        cancel: &CancelToken,
        version_id: &str,
        name: Option<&str>,
        description: Option<&str>,
        content: Option<Node>,
    ) -> Result<TemplateVersion> {
        let mut version = self.load(cancel, version_id)?;
        if version.status != VersionStatus::Draft {
            return Err(Error::InvalidInput(format!(
                "version {version_id} is not a draft"
            )));
        }

        if let Some(name) = name {
            version.name = name.to_string();
        }
        if let Some(description) = description {
            version.description = Some(description.to_string());
        }
        if let Some(content) = content {
            check_structure(&content)?;
            version.content = content;
        }
        version.updated_at = Utc::now();
        self.versions.update(cancel, version)
    }

    /// Publish a version, atomically archiving whichever version of the
    /// template was published before. Re-publishing a PUBLISHED version is
    /// a no-op.
    pub fn publish(&self, cancel: &CancelToken, version_id: &str) -> Result<TemplateVersion> {
        let version = self.load(cancel, version_id)?;
        match version.status {
            VersionStatus::Published => return Ok(version),
            VersionStatus::Archived => {
                return Err(Error::InvalidInput(format!(
                    "version {version_id} is archived and cannot be published"
                )));
            }
            VersionStatus::Draft | VersionStatus::Scheduled => {}
        }

        self.validate_and_record(cancel, &version)?;
        let swap = self.versions.publish_swap(cancel, version_id, Utc::now())?;
        self.invalidate_for_template(cancel, &swap.published.template_id)?;
        Ok(swap.published)
    }

    /// Schedule a DRAFT version for automatic publication at `at`.
    pub fn schedule(
        &self,
        cancel: &CancelToken,
        version_id: &str,
        at: DateTime<Utc>,
    ) -> Result<TemplateVersion> {
        let mut version = self.load(cancel, version_id)?;
        if version.status != VersionStatus::Draft {
            return Err(Error::InvalidInput(format!(
                "only drafts can be scheduled; version {version_id} is {:?}",
                version.status
            )));
        }
        if at <= Utc::now() {
            return Err(Error::InvalidInput(
                "scheduled publish time must be in the future".to_string(),
            ));
        }

        let siblings = self.versions.list_for_template(cancel, &version.template_id)?;
        if let Some(clash) = siblings.iter().find(|v| {
            v.id != version.id
                && v.status == VersionStatus::Scheduled
                && v.scheduled_publish_at == Some(at)
        }) {
            return Err(Error::Conflict {
                id: clash.id.clone(),
                title: clash.name.clone(),
            });
        }

        self.validate_and_record(cancel, &version)?;

        version.status = VersionStatus::Scheduled;
        version.scheduled_publish_at = Some(at);
        version.updated_at = Utc::now();
        self.versions.update(cancel, version)
    }

    /// Return a SCHEDULED version to DRAFT.
    pub fn cancel_schedule(
        &self,
        cancel: &CancelToken,
        version_id: &str,
    ) -> Result<TemplateVersion> {
        let mut version = self.load(cancel, version_id)?;
        if version.status != VersionStatus::Scheduled {
            return Err(Error::InvalidInput(format!(
                "version {version_id} is not scheduled"
            )));
        }
        version.status = VersionStatus::Draft;
        version.scheduled_publish_at = None;
        version.updated_at = Utc::now();
        self.versions.update(cancel, version)
    }

    /// Promote a due SCHEDULED version; called by the scheduler. Content
    /// was validated at schedule time, so only the due check runs here.
    pub fn promote_scheduled(
        &self,
        cancel: &CancelToken,
        version_id: &str,
    ) -> Result<TemplateVersion> {
        let version = self.load(cancel, version_id)?;
        if version.status != VersionStatus::Scheduled {
            return Err(Error::InvalidInput(format!(
                "version {version_id} is not scheduled"
            )));
        }
        let due = version
            .scheduled_publish_at
            .is_some_and(|at| at <= Utc::now());
        if !due {
            return Err(Error::InvalidInput(format!(
                "version {version_id} is not due yet"
            )));
        }

        let swap = self.versions.publish_swap(cancel, version_id, Utc::now())?;
        self.invalidate_for_template(cancel, &swap.published.template_id)?;
        Ok(swap.published)
    }

    /// Archive a version from any state. Archiving an ARCHIVED version is
    /// a no-op.
    pub fn archive(&self, cancel: &CancelToken, version_id: &str) -> Result<TemplateVersion> {
        let mut version = self.load(cancel, version_id)?;
        if version.status == VersionStatus::Archived {
            return Ok(version);
        }

        let was_published = version.status == VersionStatus::Published;
        let now = Utc::now();
        version.status = VersionStatus::Archived;
        version.archived_at = Some(now);
        version.scheduled_publish_at = None;
        version.updated_at = now;
        let version = self.versions.update(cancel, version)?;

        if was_published {
            self.invalidate_for_template(cancel, &version.template_id)?;
        }
        Ok(version)
    }

    /// Hard-delete a DRAFT version.
    pub fn delete_draft(&self, cancel: &CancelToken, version_id: &str) -> Result<()> {
        let version = self.load(cancel, version_id)?;
        if version.status != VersionStatus::Draft {
            return Err(Error::InvalidInput(format!(
                "only drafts can be deleted; version {version_id} is {:?}",
                version.status
            )));
        }
        self.versions.delete(cancel, version_id)
    }

    /// Clone any version into a fresh DRAFT with the next version number,
    /// a derived unique name, and copies of its recorded injectables.
    pub fn clone_version(
        &self,
        cancel: &CancelToken,
        version_id: &str,
        created_by: &str,
    ) -> Result<TemplateVersion> {
        let source = self.load(cancel, version_id)?;
        let siblings = self.versions.list_for_template(cancel, &source.template_id)?;
        let name = derive_clone_name(&siblings, &source.name);

        let now = Utc::now();
        let clone = self.versions.insert(
            cancel,
            TemplateVersion {
                id: String::new(),
                template_id: source.template_id.clone(),
                version_number: 0,
                name,
                description: source.description.clone(),
                content: source.content.clone(),
                status: VersionStatus::Draft,
                scheduled_publish_at: None,
                published_at: None,
                archived_at: None,
                created_at: now,
                updated_at: now,
                created_by: created_by.to_string(),
            },
        )?;

        let mut copies = self.version_injectables.for_version(cancel, version_id)?;
        for copy in &mut copies {
            copy.id = String::new();
            copy.version_id = clone.id.clone();
        }
        self.version_injectables
            .replace_for_version(cancel, &clone.id, copies)?;

        Ok(clone)
    }

    fn load(&self, cancel: &CancelToken, version_id: &str) -> Result<TemplateVersion> {
        self.versions
            .by_id(cancel, version_id)?
            .ok_or_else(|| Error::NotFound(format!("version {version_id}")))
    }

    fn validate_and_record(&self, cancel: &CancelToken, version: &TemplateVersion) -> Result<()> {
        let template = self
            .templates
            .by_id(cancel, &version.template_id)?
            .ok_or_else(|| Error::NotFound(format!("template {}", version.template_id)))?;

        let workspace = self
            .workspaces
            .by_id(cancel, &template.workspace_id)?
            .ok_or_else(|| Error::NotFound(format!("workspace {}", template.workspace_id)))?;
        let discovered =
            discover_workspace_injectables(&self.registry, cancel, &workspace.code)?;
        validate_full(
            cancel,
            &version.content,
            &template.workspace_id,
            &self.registry,
            self.definitions.as_ref(),
            &discovered,
        )?;

        let mut records = Vec::new();
        for variable in referenced_variables(&version.content) {
            if self.registry.contains(&variable) {
                continue;
            }
            if is_system_key(&variable) {
                records.push(VersionInjectable {
                    id: String::new(),
                    version_id: version.id.clone(),
                    source: InjectableSource::SystemKey(variable),
                    default_value: None,
                    display: DisplayConfig::default(),
                });
            } else if let Some(definition) =
                self.definitions
                    .by_key(cancel, &template.workspace_id, &variable)?
            {
                records.push(VersionInjectable {
                    id: String::new(),
                    version_id: version.id.clone(),
                    source: InjectableSource::Definition(definition.id),
                    default_value: definition.default_value,
                    display: DisplayConfig {
                        label: Some(definition.label),
                        ..DisplayConfig::default()
                    },
                });
            }
        }
        self.version_injectables
            .replace_for_version(cancel, &version.id, records)?;
        Ok(())
    }

    /// Conservative invalidation: drop every cache key reaching the
    /// template's document type, across all tenants that may fall back to
    /// it.
    fn invalidate_for_template(&self, cancel: &CancelToken, template_id: &str) -> Result<()> {
        if let Some(template) = self.templates.by_id(cancel, template_id)?
            && let Some(doc_type_id) = &template.document_type_id
            && let Some(doc_type) = self.doc_types.by_id(cancel, doc_type_id)?
        {
            self.cache.invalidate_doc_type(&doc_type.code);
        }
        Ok(())
    }
}

fn check_structure(content: &Node) -> Result<()> {
    let problems = validate_structure(content);
    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::InvalidInput(problems.join("; ")))
    }
}

fn derive_clone_name(siblings: &[TemplateVersion], base: &str) -> String {
    let mut candidate = format!("{base} (copy)");
    let mut n = 2;
    while siblings.iter().any(|v| v.name == candidate) {
        candidate = format!("{base} (copy {n})");
        n += 1;
    }
    candidate
}
