//! In-memory repository implementations.
//!
//! A single [`MemoryStore`] implements every port behind one mutex, which
//! makes the transactional operations ([`VersionRepo::publish_swap`],
//! [`TemplateRepo::reassign_doc_type`]) atomic by construction. The store
//! backs the test suite and doubles as the reference semantics for SQL
//! implementations living outside the core.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

use platen_cancel::CancelToken;
use platen_types::{
    AccessRecord, DocumentType, Error, Folder, InjectableDefinition, Membership, Result, Tag,
    Template, TemplateVersion, Tenant, User, VersionInjectable, VersionStatus, Workspace,
};

use crate::ports::{
    AccessHistoryRepo, DefinitionRepo, DocumentTypeRepo, FolderRepo, MembershipRepo, PublishSwap,
    TagRepo, TemplateRepo, TenantRepo, UserRepo, VersionInjectableRepo, VersionRepo, WorkspaceRepo,
};

#[derive(Default)]
struct Inner {
    seq: u64,
    tenants: Vec<Tenant>,
    workspaces: Vec<Workspace>,
    doc_types: Vec<DocumentType>,
    templates: Vec<Template>,
    versions: Vec<TemplateVersion>,
    version_injectables: Vec<VersionInjectable>,
    definitions: Vec<InjectableDefinition>,
    tags: Vec<Tag>,
    tag_links: Vec<(String, String)>,
    folders: Vec<Folder>,
    users: Vec<User>,
    memberships: Vec<Membership>,
    access: Vec<AccessRecord>,
}

impl Inner {
    fn next_id(&mut self, prefix: &str) -> String {
        self.seq += 1;
        format!("{prefix}-{}", self.seq)
    }
}

/// All repositories in one process-local store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }
}

fn check(cancel: &CancelToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}

impl TenantRepo for MemoryStore {
    fn by_code(&self, cancel: &CancelToken, code: &str) -> Result<Option<Tenant>> {
        check(cancel)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner.tenants.iter().find(|t| t.code == code).cloned())
    }

    fn system_tenant(&self, cancel: &CancelToken) -> Result<Option<Tenant>> {
        check(cancel)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner.tenants.iter().find(|t| t.is_system).cloned())
    }

    fn insert(&self, cancel: &CancelToken, mut tenant: Tenant) -> Result<Tenant> {
        check(cancel)?;
        let mut inner = self.inner.lock().unwrap();
        if tenant.id.is_empty() {
            tenant.id = inner.next_id("tenant");
        }
        inner.tenants.push(tenant.clone());
        Ok(tenant)
    }
}

impl WorkspaceRepo for MemoryStore {
    fn by_id(&self, cancel: &CancelToken, id: &str) -> Result<Option<Workspace>> {
        check(cancel)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner.workspaces.iter().find(|w| w.id == id).cloned())
    }

    fn by_tenant_and_code(
        &self,
        cancel: &CancelToken,
        tenant_id: &str,
        code: &str,
    ) -> Result<Option<Workspace>> {
        check(cancel)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .workspaces
            .iter()
            .find(|w| w.tenant_id == tenant_id && w.code == code)
            .cloned())
    }

    fn system_workspace(
        &self,
        cancel: &CancelToken,
        tenant_id: &str,
    ) -> Result<Option<Workspace>> {
        check(cancel)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .workspaces
            .iter()
            .find(|w| {
                w.tenant_id == tenant_id && w.kind == platen_types::WorkspaceKind::System
            })
            .cloned())
    }

    fn insert(&self, cancel: &CancelToken, mut workspace: Workspace) -> Result<Workspace> {
        check(cancel)?;
        let mut inner = self.inner.lock().unwrap();
        if workspace.id.is_empty() {
            workspace.id = inner.next_id("ws");
        }
        inner.workspaces.push(workspace.clone());
        Ok(workspace)
    }
}

impl DocumentTypeRepo for MemoryStore {
    fn by_id(&self, cancel: &CancelToken, id: &str) -> Result<Option<DocumentType>> {
        check(cancel)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner.doc_types.iter().find(|d| d.id == id).cloned())
    }

    fn visible_by_code(
        &self,
        cancel: &CancelToken,
        tenant_id: &str,
        code: &str,
    ) -> Result<Option<DocumentType>> {
        check(cancel)?;
        let inner = self.inner.lock().unwrap();
        let system_tenant = inner.tenants.iter().find(|t| t.is_system).map(|t| t.id.clone());

        // Own types shadow system-owned ones with the same code.
        let own = inner
            .doc_types
            .iter()
            .find(|d| d.tenant_id == tenant_id && d.code == code);
        let visible = own.or_else(|| {
            system_tenant.as_deref().and_then(|sys| {
                inner
                    .doc_types
                    .iter()
                    .find(|d| d.tenant_id == sys && d.code == code)
            })
        });
        Ok(visible.cloned())
    }

    fn insert(&self, cancel: &CancelToken, mut doc_type: DocumentType) -> Result<DocumentType> {
        check(cancel)?;
        let mut inner = self.inner.lock().unwrap();
        if inner
            .doc_types
            .iter()
            .any(|d| d.tenant_id == doc_type.tenant_id && d.code == doc_type.code)
        {
            return Err(Error::Conflict {
                id: doc_type.id,
                title: doc_type.code,
            });
        }
        if doc_type.id.is_empty() {
            doc_type.id = inner.next_id("dt");
        }
        inner.doc_types.push(doc_type.clone());
        Ok(doc_type)
    }
}

impl TemplateRepo for MemoryStore {
    fn by_id(&self, cancel: &CancelToken, id: &str) -> Result<Option<Template>> {
        check(cancel)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner.templates.iter().find(|t| t.id == id).cloned())
    }

    fn by_workspace_and_doc_type(
        &self,
        cancel: &CancelToken,
        workspace_id: &str,
        doc_type_id: &str,
    ) -> Result<Option<Template>> {
        check(cancel)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .templates
            .iter()
            .find(|t| {
                t.workspace_id == workspace_id
                    && t.document_type_id.as_deref() == Some(doc_type_id)
            })
            .cloned())
    }

    fn by_workspace_and_title(
        &self,
        cancel: &CancelToken,
        workspace_id: &str,
        title: &str,
    ) -> Result<Option<Template>> {
        check(cancel)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .templates
            .iter()
            .find(|t| t.workspace_id == workspace_id && t.title == title)
            .cloned())
    }

    fn insert(&self, cancel: &CancelToken, mut template: Template) -> Result<Template> {
        check(cancel)?;
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner
            .templates
            .iter()
            .find(|t| t.workspace_id == template.workspace_id && t.title == template.title)
        {
            return Err(Error::Conflict {
                id: existing.id.clone(),
                title: existing.title.clone(),
            });
        }
        if template.id.is_empty() {
            template.id = inner.next_id("tpl");
        }
        inner.templates.push(template.clone());
        Ok(template)
    }

    fn update(&self, cancel: &CancelToken, template: Template) -> Result<Template> {
        check(cancel)?;
        let mut inner = self.inner.lock().unwrap();
        let slot = inner
            .templates
            .iter_mut()
            .find(|t| t.id == template.id)
            .ok_or_else(|| Error::NotFound(format!("template {}", template.id)))?;
        *slot = template.clone();
        Ok(template)
    }

    fn delete(&self, cancel: &CancelToken, id: &str) -> Result<()> {
        check(cancel)?;
        let mut inner = self.inner.lock().unwrap();
        inner.templates.retain(|t| t.id != id);
        inner.versions.retain(|v| v.template_id != id);
        inner.tag_links.retain(|(template_id, _)| template_id != id);
        Ok(())
    }

    fn reassign_doc_type(
        &self,
        cancel: &CancelToken,
        template_id: &str,
        doc_type_id: &str,
    ) -> Result<(Template, Option<Template>)> {
        check(cancel)?;
        let mut inner = self.inner.lock().unwrap();

        let workspace_id = inner
            .templates
            .iter()
            .find(|t| t.id == template_id)
            .map(|t| t.workspace_id.clone())
            .ok_or_else(|| Error::NotFound(format!("template {template_id}")))?;

        let now = Utc::now();
        let mut cleared = None;
        for template in inner.templates.iter_mut() {
            if template.workspace_id == workspace_id
                && template.id != template_id
                && template.document_type_id.as_deref() == Some(doc_type_id)
            {
                template.document_type_id = None;
                template.updated_at = now;
                cleared = Some(template.clone());
            }
        }

        let slot = inner
            .templates
            .iter_mut()
            .find(|t| t.id == template_id)
            .expect("template checked above");
        slot.document_type_id = Some(doc_type_id.to_string());
        slot.updated_at = now;
        let updated = slot.clone();

        Ok((updated, cleared))
    }
}

impl VersionRepo for MemoryStore {
    fn by_id(&self, cancel: &CancelToken, id: &str) -> Result<Option<TemplateVersion>> {
        check(cancel)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner.versions.iter().find(|v| v.id == id).cloned())
    }

    fn list_for_template(
        &self,
        cancel: &CancelToken,
        template_id: &str,
    ) -> Result<Vec<TemplateVersion>> {
        check(cancel)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .versions
            .iter()
            .filter(|v| v.template_id == template_id)
            .cloned()
            .collect())
    }

    fn published_for_template(
        &self,
        cancel: &CancelToken,
        template_id: &str,
    ) -> Result<Option<TemplateVersion>> {
        check(cancel)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .versions
            .iter()
            .find(|v| v.template_id == template_id && v.status == VersionStatus::Published)
            .cloned())
    }

    fn insert(&self, cancel: &CancelToken, mut version: TemplateVersion) -> Result<TemplateVersion> {
        check(cancel)?;
        let mut inner = self.inner.lock().unwrap();

        if let Some(existing) = inner
            .versions
            .iter()
            .find(|v| v.template_id == version.template_id && v.name == version.name)
        {
            return Err(Error::Conflict {
                id: existing.id.clone(),
                title: existing.name.clone(),
            });
        }
        if version.version_number == 0 {
            version.version_number = inner
                .versions
                .iter()
                .filter(|v| v.template_id == version.template_id)
                .map(|v| v.version_number)
                .max()
                .unwrap_or(0)
                + 1;
        }
        if version.id.is_empty() {
            version.id = inner.next_id("ver");
        }
        inner.versions.push(version.clone());
        Ok(version)
    }

    fn update(&self, cancel: &CancelToken, version: TemplateVersion) -> Result<TemplateVersion> {
        check(cancel)?;
        let mut inner = self.inner.lock().unwrap();
        let slot = inner
            .versions
            .iter_mut()
            .find(|v| v.id == version.id)
            .ok_or_else(|| Error::NotFound(format!("version {}", version.id)))?;
        *slot = version.clone();
        Ok(version)
    }

    fn delete(&self, cancel: &CancelToken, id: &str) -> Result<()> {
        check(cancel)?;
        let mut inner = self.inner.lock().unwrap();
        inner.versions.retain(|v| v.id != id);
        inner.version_injectables.retain(|vi| vi.version_id != id);
        Ok(())
    }

    fn due_scheduled(
        &self,
        cancel: &CancelToken,
        now: DateTime<Utc>,
    ) -> Result<Vec<TemplateVersion>> {
        check(cancel)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .versions
            .iter()
            .filter(|v| {
                v.status == VersionStatus::Scheduled
                    && v.scheduled_publish_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect())
    }

    fn publish_swap(
        &self,
        cancel: &CancelToken,
        version_id: &str,
        now: DateTime<Utc>,
    ) -> Result<PublishSwap> {
        check(cancel)?;
        let mut inner = self.inner.lock().unwrap();

        let version = inner
            .versions
            .iter()
            .find(|v| v.id == version_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("version {version_id}")))?;

        match version.status {
            VersionStatus::Published => {
                // Re-publishing is a no-op on state.
                return Ok(PublishSwap {
                    published: version,
                    displaced: None,
                });
            }
            VersionStatus::Draft | VersionStatus::Scheduled => {}
            VersionStatus::Archived => {
                return Err(Error::InvalidInput(format!(
                    "version {version_id} is archived and cannot be published"
                )));
            }
        }

        let mut displaced = None;
        for v in inner.versions.iter_mut() {
            if v.template_id == version.template_id
                && v.id != version_id
                && v.status == VersionStatus::Published
            {
                v.status = VersionStatus::Archived;
                v.archived_at = Some(now);
                v.updated_at = now;
                displaced = Some(v.clone());
            }
        }

        let slot = inner
            .versions
            .iter_mut()
            .find(|v| v.id == version_id)
            .expect("version checked above");
        slot.status = VersionStatus::Published;
        slot.published_at = Some(now);
        slot.scheduled_publish_at = None;
        slot.updated_at = now;
        let published = slot.clone();

        Ok(PublishSwap {
            published,
            displaced,
        })
    }
}

impl VersionInjectableRepo for MemoryStore {
    fn for_version(
        &self,
        cancel: &CancelToken,
        version_id: &str,
    ) -> Result<Vec<VersionInjectable>> {
        check(cancel)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .version_injectables
            .iter()
            .filter(|vi| vi.version_id == version_id)
            .cloned()
            .collect())
    }

    fn replace_for_version(
        &self,
        cancel: &CancelToken,
        version_id: &str,
        injectables: Vec<VersionInjectable>,
    ) -> Result<Vec<VersionInjectable>> {
        check(cancel)?;
        let mut inner = self.inner.lock().unwrap();
        inner
            .version_injectables
            .retain(|vi| vi.version_id != version_id);

        let mut stored = Vec::with_capacity(injectables.len());
        for mut vi in injectables {
            vi.version_id = version_id.to_string();
            if vi.id.is_empty() {
                vi.id = inner.next_id("vinj");
            }
            inner.version_injectables.push(vi.clone());
            stored.push(vi);
        }
        Ok(stored)
    }
}

impl DefinitionRepo for MemoryStore {
    fn by_id(&self, cancel: &CancelToken, id: &str) -> Result<Option<InjectableDefinition>> {
        check(cancel)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner.definitions.iter().find(|d| d.id == id).cloned())
    }

    fn by_key(
        &self,
        cancel: &CancelToken,
        workspace_id: &str,
        key: &str,
    ) -> Result<Option<InjectableDefinition>> {
        check(cancel)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .definitions
            .iter()
            .find(|d| d.workspace_id == workspace_id && d.key == key && !d.is_deleted)
            .cloned())
    }

    fn for_workspace(
        &self,
        cancel: &CancelToken,
        workspace_id: &str,
    ) -> Result<Vec<InjectableDefinition>> {
        check(cancel)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .definitions
            .iter()
            .filter(|d| d.workspace_id == workspace_id && !d.is_deleted)
            .cloned()
            .collect())
    }

    fn insert(
        &self,
        cancel: &CancelToken,
        mut definition: InjectableDefinition,
    ) -> Result<InjectableDefinition> {
        check(cancel)?;
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.definitions.iter().find(|d| {
            d.workspace_id == definition.workspace_id && d.key == definition.key && !d.is_deleted
        }) {
            return Err(Error::Conflict {
                id: existing.id.clone(),
                title: existing.key.clone(),
            });
        }
        if definition.id.is_empty() {
            definition.id = inner.next_id("def");
        }
        inner.definitions.push(definition.clone());
        Ok(definition)
    }

    fn soft_delete(&self, cancel: &CancelToken, id: &str) -> Result<()> {
        check(cancel)?;
        let mut inner = self.inner.lock().unwrap();
        if let Some(definition) = inner.definitions.iter_mut().find(|d| d.id == id) {
            definition.is_deleted = true;
            definition.is_active = false;
        }
        Ok(())
    }
}

impl TagRepo for MemoryStore {
    fn insert(&self, cancel: &CancelToken, mut tag: Tag) -> Result<Tag> {
        check(cancel)?;
        let mut inner = self.inner.lock().unwrap();
        if tag.id.is_empty() {
            tag.id = inner.next_id("tag");
        }
        inner.tags.push(tag.clone());
        Ok(tag)
    }

    fn attach(&self, cancel: &CancelToken, template_id: &str, tag_id: &str) -> Result<()> {
        check(cancel)?;
        let mut inner = self.inner.lock().unwrap();
        let link = (template_id.to_string(), tag_id.to_string());
        if !inner.tag_links.contains(&link) {
            inner.tag_links.push(link);
        }
        Ok(())
    }

    fn detach(&self, cancel: &CancelToken, template_id: &str, tag_id: &str) -> Result<()> {
        check(cancel)?;
        let mut inner = self.inner.lock().unwrap();
        inner
            .tag_links
            .retain(|(t, g)| !(t == template_id && g == tag_id));
        Ok(())
    }

    fn for_template(&self, cancel: &CancelToken, template_id: &str) -> Result<Vec<Tag>> {
        check(cancel)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .tag_links
            .iter()
            .filter(|(t, _)| t == template_id)
            .filter_map(|(_, tag_id)| inner.tags.iter().find(|tag| &tag.id == tag_id))
            .cloned()
            .collect())
    }
}

impl FolderRepo for MemoryStore {
    fn by_id(&self, cancel: &CancelToken, id: &str) -> Result<Option<Folder>> {
        check(cancel)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner.folders.iter().find(|f| f.id == id).cloned())
    }

    fn insert(&self, cancel: &CancelToken, mut folder: Folder) -> Result<Folder> {
        check(cancel)?;
        let mut inner = self.inner.lock().unwrap();
        if folder.id.is_empty() {
            folder.id = inner.next_id("folder");
        }
        inner.folders.push(folder.clone());
        Ok(folder)
    }
}

impl UserRepo for MemoryStore {
    fn by_id(&self, cancel: &CancelToken, id: &str) -> Result<Option<User>> {
        check(cancel)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner.users.iter().find(|u| u.id == id).cloned())
    }

    fn insert(&self, cancel: &CancelToken, mut user: User) -> Result<User> {
        check(cancel)?;
        let mut inner = self.inner.lock().unwrap();
        if user.id.is_empty() {
            user.id = inner.next_id("user");
        }
        inner.users.push(user.clone());
        Ok(user)
    }
}

impl MembershipRepo for MemoryStore {
    fn for_user(&self, cancel: &CancelToken, user_id: &str) -> Result<Vec<Membership>> {
        check(cancel)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .memberships
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect())
    }

    fn insert(&self, cancel: &CancelToken, mut membership: Membership) -> Result<Membership> {
        check(cancel)?;
        let mut inner = self.inner.lock().unwrap();
        if membership.id.is_empty() {
            membership.id = inner.next_id("member");
        }
        inner.memberships.push(membership.clone());
        Ok(membership)
    }
}

impl AccessHistoryRepo for MemoryStore {
    fn record(&self, cancel: &CancelToken, mut record: AccessRecord) -> Result<AccessRecord> {
        check(cancel)?;
        let mut inner = self.inner.lock().unwrap();
        if record.id.is_empty() {
            record.id = inner.next_id("access");
        }
        inner.access.push(record.clone());
        Ok(record)
    }

    fn for_template(&self, cancel: &CancelToken, template_id: &str) -> Result<Vec<AccessRecord>> {
        check(cancel)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .access
            .iter()
            .filter(|a| a.template_id == template_id)
            .cloned()
            .collect())
    }
}
