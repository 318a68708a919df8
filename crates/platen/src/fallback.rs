//! Three-tier template resolution.
//!
//! "Which published version should I render for (tenant-code,
//! workspace-code, document-type-code)?" is answered by trying, in order:
//!
//! 1. **Exact** — the addressed workspace in the addressed tenant.
//! 2. **Tenant system** — the tenant's SYSTEM workspace.
//! 3. **Global system** — the system tenant's SYSTEM workspace.
//!
//! At every tier, a missing workspace, document type, assigned template, or
//! published version silently advances to the next tier; only a published
//! version terminates the search. Results go through the
//! [`TemplateCache`]; misses are never cached.

use std::sync::Arc;

use platen_cancel::CancelToken;
use platen_types::{DocumentType, Error, Result, Tenant, Workspace};

use crate::cache::{ResolvedTemplate, TemplateCache, TriadKey};
use crate::ports::{DocumentTypeRepo, TemplateRepo, TenantRepo, VersionRepo, WorkspaceRepo};

pub struct TemplateResolver {
    tenants: Arc<dyn TenantRepo>,
    workspaces: Arc<dyn WorkspaceRepo>,
    doc_types: Arc<dyn DocumentTypeRepo>,
    templates: Arc<dyn TemplateRepo>,
    versions: Arc<dyn VersionRepo>,
    cache: Arc<TemplateCache>,
}

impl TemplateResolver {
    pub fn new(
        tenants: Arc<dyn TenantRepo>,
        workspaces: Arc<dyn WorkspaceRepo>,
        doc_types: Arc<dyn DocumentTypeRepo>,
        templates: Arc<dyn TemplateRepo>,
        versions: Arc<dyn VersionRepo>,
        cache: Arc<TemplateCache>,
    ) -> TemplateResolver {
        TemplateResolver {
            tenants,
            workspaces,
            doc_types,
            templates,
            versions,
            cache,
        }
    }

    pub fn cache(&self) -> &TemplateCache {
        &self.cache
    }

    /// Resolve the published version to render for the request triple.
    pub fn resolve(
        &self,
        cancel: &CancelToken,
        tenant_code: &str,
        workspace_code: &str,
        doc_type_code: &str,
    ) -> Result<ResolvedTemplate> {
        let key: TriadKey = (
            tenant_code.to_string(),
            workspace_code.to_string(),
            doc_type_code.to_string(),
        );
        self.cache
            .get_or_resolve(&key, || {
                self.lookup(cancel, tenant_code, workspace_code, doc_type_code)
            })?
            .ok_or(Error::TemplateNotResolved)
    }

    fn lookup(
        &self,
        cancel: &CancelToken,
        tenant_code: &str,
        workspace_code: &str,
        doc_type_code: &str,
    ) -> Result<Option<ResolvedTemplate>> {
        if let Some(tenant) = self.tenants.by_code(cancel, tenant_code)?
            && let Some(doc_type) =
                self.doc_types.visible_by_code(cancel, &tenant.id, doc_type_code)?
        {
            // Tier 1: exact workspace.
            if let Some(workspace) =
                self.workspaces
                    .by_tenant_and_code(cancel, &tenant.id, workspace_code)?
                && let Some(hit) = self.published_in(cancel, &tenant, &workspace, &doc_type)?
            {
                return Ok(Some(hit));
            }

            // Tier 2: the tenant's SYSTEM workspace.
            if let Some(workspace) = self.workspaces.system_workspace(cancel, &tenant.id)?
                && let Some(hit) = self.published_in(cancel, &tenant, &workspace, &doc_type)?
            {
                return Ok(Some(hit));
            }
        }

        // Tier 3: the system tenant's SYSTEM workspace.
        let Some(system_tenant) = self.tenants.system_tenant(cancel)? else {
            return Ok(None);
        };
        let Some(doc_type) =
            self.doc_types
                .visible_by_code(cancel, &system_tenant.id, doc_type_code)?
        else {
            return Ok(None);
        };
        let Some(workspace) = self.workspaces.system_workspace(cancel, &system_tenant.id)? else {
            return Ok(None);
        };
        self.published_in(cancel, &system_tenant, &workspace, &doc_type)
    }

    fn published_in(
        &self,
        cancel: &CancelToken,
        tenant: &Tenant,
        workspace: &Workspace,
        doc_type: &DocumentType,
    ) -> Result<Option<ResolvedTemplate>> {
        let Some(template) =
            self.templates
                .by_workspace_and_doc_type(cancel, &workspace.id, &doc_type.id)?
        else {
            return Ok(None);
        };
        let Some(version) = self.versions.published_for_template(cancel, &template.id)? else {
            return Ok(None);
        };
        Ok(Some(ResolvedTemplate {
            tenant: tenant.clone(),
            workspace: workspace.clone(),
            doc_type: doc_type.clone(),
            template,
            version,
        }))
    }
}
