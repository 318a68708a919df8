//! Repository ports.
//!
//! The core never talks to storage directly; it goes through one port per
//! entity family. Every method takes a cancellation context as its first
//! parameter, mirroring the threading model: repository calls are
//! suspension points.
//!
//! The version port carries the one transactional helper the core relies
//! on, [`VersionRepo::publish_swap`], which archives the currently
//! published version and promotes the new one in a single atomic step.

use chrono::{DateTime, Utc};

use platen_cancel::CancelToken;
use platen_types::{
    AccessRecord, DocumentType, Folder, InjectableDefinition, Membership, Result, Tag, Template,
    TemplateVersion, Tenant, User, VersionInjectable, Workspace,
};

pub trait TenantRepo: Send + Sync {
    fn by_code(&self, cancel: &CancelToken, code: &str) -> Result<Option<Tenant>>;
    /// The single tenant carrying `is_system`.
    fn system_tenant(&self, cancel: &CancelToken) -> Result<Option<Tenant>>;
    fn insert(&self, cancel: &CancelToken, tenant: Tenant) -> Result<Tenant>;
}

pub trait WorkspaceRepo: Send + Sync {
    fn by_id(&self, cancel: &CancelToken, id: &str) -> Result<Option<Workspace>>;
    fn by_tenant_and_code(
        &self,
        cancel: &CancelToken,
        tenant_id: &str,
        code: &str,
    ) -> Result<Option<Workspace>>;
    /// The tenant's single SYSTEM workspace.
    fn system_workspace(&self, cancel: &CancelToken, tenant_id: &str)
    -> Result<Option<Workspace>>;
    fn insert(&self, cancel: &CancelToken, workspace: Workspace) -> Result<Workspace>;
}

pub trait DocumentTypeRepo: Send + Sync {
    fn by_id(&self, cancel: &CancelToken, id: &str) -> Result<Option<DocumentType>>;
    /// A document type visible in `tenant_id` by code: owned by that tenant
    /// or by the system tenant (system-owned types are readable by all).
    fn visible_by_code(
        &self,
        cancel: &CancelToken,
        tenant_id: &str,
        code: &str,
    ) -> Result<Option<DocumentType>>;
    fn insert(&self, cancel: &CancelToken, doc_type: DocumentType) -> Result<DocumentType>;
}

pub trait TemplateRepo: Send + Sync {
    fn by_id(&self, cancel: &CancelToken, id: &str) -> Result<Option<Template>>;
    fn by_workspace_and_doc_type(
        &self,
        cancel: &CancelToken,
        workspace_id: &str,
        doc_type_id: &str,
    ) -> Result<Option<Template>>;
    fn by_workspace_and_title(
        &self,
        cancel: &CancelToken,
        workspace_id: &str,
        title: &str,
    ) -> Result<Option<Template>>;
    fn insert(&self, cancel: &CancelToken, template: Template) -> Result<Template>;
    fn update(&self, cancel: &CancelToken, template: Template) -> Result<Template>;
    fn delete(&self, cancel: &CancelToken, id: &str) -> Result<()>;
    /// Atomically clear the document-type assignment from whichever
    /// template in the workspace currently holds it, then assign it to
    /// `template_id`. Returns the updated template and the cleared prior
    /// holder, if any.
    fn reassign_doc_type(
        &self,
        cancel: &CancelToken,
        template_id: &str,
        doc_type_id: &str,
    ) -> Result<(Template, Option<Template>)>;
}

/// Result of the atomic publish swap.
#[derive(Debug, Clone)]
pub struct PublishSwap {
    pub published: TemplateVersion,
    /// The previously published version that was archived to make room.
    pub displaced: Option<TemplateVersion>,
}

pub trait VersionRepo: Send + Sync {
    fn by_id(&self, cancel: &CancelToken, id: &str) -> Result<Option<TemplateVersion>>;
    /// All versions of a template in insertion order.
    fn list_for_template(
        &self,
        cancel: &CancelToken,
        template_id: &str,
    ) -> Result<Vec<TemplateVersion>>;
    fn published_for_template(
        &self,
        cancel: &CancelToken,
        template_id: &str,
    ) -> Result<Option<TemplateVersion>>;
    fn insert(&self, cancel: &CancelToken, version: TemplateVersion) -> Result<TemplateVersion>;
    fn update(&self, cancel: &CancelToken, version: TemplateVersion) -> Result<TemplateVersion>;
    fn delete(&self, cancel: &CancelToken, id: &str) -> Result<()>;
    /// SCHEDULED versions whose publish time has passed, in insertion
    /// order.
    fn due_scheduled(
        &self,
        cancel: &CancelToken,
        now: DateTime<Utc>,
    ) -> Result<Vec<TemplateVersion>>;
    /// Transactionally archive the currently published version of the same
    /// template (if any) and promote `version_id` to PUBLISHED.
    fn publish_swap(
        &self,
        cancel: &CancelToken,
        version_id: &str,
        now: DateTime<Utc>,
    ) -> Result<PublishSwap>;
}

pub trait VersionInjectableRepo: Send + Sync {
    fn for_version(
        &self,
        cancel: &CancelToken,
        version_id: &str,
    ) -> Result<Vec<VersionInjectable>>;
    /// Replace the recorded injectables of a version wholesale, as done on
    /// publish validation and on clone.
    fn replace_for_version(
        &self,
        cancel: &CancelToken,
        version_id: &str,
        injectables: Vec<VersionInjectable>,
    ) -> Result<Vec<VersionInjectable>>;
}

pub trait DefinitionRepo: Send + Sync {
    /// Resolves soft-deleted definitions too; versions may still reference
    /// them.
    fn by_id(&self, cancel: &CancelToken, id: &str) -> Result<Option<InjectableDefinition>>;
    fn by_key(
        &self,
        cancel: &CancelToken,
        workspace_id: &str,
        key: &str,
    ) -> Result<Option<InjectableDefinition>>;
    /// Non-deleted definitions of a workspace.
    fn for_workspace(
        &self,
        cancel: &CancelToken,
        workspace_id: &str,
    ) -> Result<Vec<InjectableDefinition>>;
    fn insert(
        &self,
        cancel: &CancelToken,
        definition: InjectableDefinition,
    ) -> Result<InjectableDefinition>;
    fn soft_delete(&self, cancel: &CancelToken, id: &str) -> Result<()>;
}

pub trait TagRepo: Send + Sync {
    fn insert(&self, cancel: &CancelToken, tag: Tag) -> Result<Tag>;
    /// Idempotent: attaching an already-attached tag is a no-op.
    fn attach(&self, cancel: &CancelToken, template_id: &str, tag_id: &str) -> Result<()>;
    /// Idempotent: detaching an absent tag is a no-op.
    fn detach(&self, cancel: &CancelToken, template_id: &str, tag_id: &str) -> Result<()>;
    fn for_template(&self, cancel: &CancelToken, template_id: &str) -> Result<Vec<Tag>>;
}

pub trait FolderRepo: Send + Sync {
    fn by_id(&self, cancel: &CancelToken, id: &str) -> Result<Option<Folder>>;
    fn insert(&self, cancel: &CancelToken, folder: Folder) -> Result<Folder>;
}

pub trait UserRepo: Send + Sync {
    fn by_id(&self, cancel: &CancelToken, id: &str) -> Result<Option<User>>;
    fn insert(&self, cancel: &CancelToken, user: User) -> Result<User>;
}

pub trait MembershipRepo: Send + Sync {
    fn for_user(&self, cancel: &CancelToken, user_id: &str) -> Result<Vec<Membership>>;
    fn insert(&self, cancel: &CancelToken, membership: Membership) -> Result<Membership>;
}

pub trait AccessHistoryRepo: Send + Sync {
    fn record(&self, cancel: &CancelToken, record: AccessRecord) -> Result<AccessRecord>;
    fn for_template(&self, cancel: &CancelToken, template_id: &str) -> Result<Vec<AccessRecord>>;
}
