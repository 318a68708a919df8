//! Shared fixtures for the crate's unit tests.

use std::sync::Arc;

use chrono::Utc;

use platen_cancel::CancelToken;
use platen_content::{Node, kinds};
use platen_types::{
    DocumentType, Template, TemplateVersion, Tenant, VersionStatus, Workspace, WorkspaceKind,
    WorkspaceStatus,
};

use crate::memory::MemoryStore;
use crate::ports::{
    DocumentTypeRepo, TemplateRepo, TenantRepo, VersionRepo, WorkspaceRepo,
};

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub cancel: CancelToken,
    pub system_tenant: Tenant,
    pub system_workspace: Workspace,
    pub acme: Tenant,
    pub acme_eu: Workspace,
    pub acme_system_workspace: Workspace,
    pub invoice_type: DocumentType,
    pub report_type: DocumentType,
    pub contract_type: DocumentType,
    pub acme_template: Template,
    pub acme_version: TemplateVersion,
    pub acme_system_template: Template,
    pub global_template: Template,
    pub global_version: TemplateVersion,
}

pub fn simple_doc(text: &str) -> Node {
    Node::with_children(
        kinds::DOC,
        vec![Node::with_children(
            kinds::PARAGRAPH,
            vec![Node::text(text)],
        )],
    )
}

pub fn draft(template_id: &str, name: &str, content: Node) -> TemplateVersion {
    let now = Utc::now();
    TemplateVersion {
        id: String::new(),
        template_id: template_id.to_string(),
        version_number: 0,
        name: name.to_string(),
        description: None,
        content,
        status: VersionStatus::Draft,
        scheduled_publish_at: None,
        published_at: None,
        archived_at: None,
        created_at: now,
        updated_at: now,
        created_by: "user-1".to_string(),
    }
}

pub fn template(workspace_id: &str, title: &str, doc_type_id: Option<&str>) -> Template {
    let now = Utc::now();
    Template {
        id: String::new(),
        workspace_id: workspace_id.to_string(),
        folder_id: None,
        title: title.to_string(),
        document_type_id: doc_type_id.map(String::from),
        is_public_library: false,
        created_at: now,
        updated_at: now,
    }
}

fn doc_type(tenant_id: &str, code: &str) -> DocumentType {
    let now = Utc::now();
    DocumentType {
        id: String::new(),
        tenant_id: tenant_id.to_string(),
        code: code.to_string(),
        name: [("en".to_string(), code.to_string())].into_iter().collect(),
        description: None,
        created_at: now,
        updated_at: now,
    }
}

fn workspace(tenant_id: &str, code: &str, kind: WorkspaceKind) -> Workspace {
    Workspace {
        id: String::new(),
        tenant_id: tenant_id.to_string(),
        code: code.to_string(),
        name: code.to_string(),
        kind,
        status: WorkspaceStatus::Active,
    }
}

impl Fixture {
    /// A two-tenant world:
    ///
    /// - system tenant with a SYSTEM workspace holding a published
    ///   `contract` template
    /// - tenant `acme` with workspace `eu` (published `invoice` template)
    ///   and a SYSTEM workspace (published `report` template)
    /// - `invoice` and `contract` types owned by the system tenant,
    ///   `report` owned by acme
    pub fn seeded() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let cancel = CancelToken::new();
        let c = &cancel;

        let system_tenant = TenantRepo::insert(
            store.as_ref(),
            c,
            Tenant {
                id: String::new(),
                code: "system".to_string(),
                name: "System".to_string(),
                is_system: true,
            },
        )
        .expect("seed tenant");
        let acme = TenantRepo::insert(
            store.as_ref(),
            c,
            Tenant {
                id: String::new(),
                code: "acme".to_string(),
                name: "Acme Corp".to_string(),
                is_system: false,
            },
        )
        .expect("seed tenant");

        let system_workspace = WorkspaceRepo::insert(
            store.as_ref(),
            c,
            workspace(&system_tenant.id, "system", WorkspaceKind::System),
        )
        .expect("seed workspace");
        let acme_eu = WorkspaceRepo::insert(
            store.as_ref(),
            c,
            workspace(&acme.id, "eu", WorkspaceKind::Client),
        )
        .expect("seed workspace");
        let acme_system_workspace = WorkspaceRepo::insert(
            store.as_ref(),
            c,
            workspace(&acme.id, "system", WorkspaceKind::System),
        )
        .expect("seed workspace");

        let invoice_type =
            DocumentTypeRepo::insert(store.as_ref(), c, doc_type(&system_tenant.id, "invoice"))
                .expect("seed doc type");
        let contract_type =
            DocumentTypeRepo::insert(store.as_ref(), c, doc_type(&system_tenant.id, "contract"))
                .expect("seed doc type");
        let report_type =
            DocumentTypeRepo::insert(store.as_ref(), c, doc_type(&acme.id, "report"))
                .expect("seed doc type");

        let acme_template = TemplateRepo::insert(
            store.as_ref(),
            c,
            template(&acme_eu.id, "EU Invoice", Some(&invoice_type.id)),
        )
        .expect("seed template");
        let acme_system_template = TemplateRepo::insert(
            store.as_ref(),
            c,
            template(
                &acme_system_workspace.id,
                "Acme Report",
                Some(&report_type.id),
            ),
        )
        .expect("seed template");
        let global_template = TemplateRepo::insert(
            store.as_ref(),
            c,
            template(&system_workspace.id, "Contract", Some(&contract_type.id)),
        )
        .expect("seed template");

        let acme_version = publish_new(
            &store,
            c,
            draft(&acme_template.id, "v1", simple_doc("acme invoice")),
        );
        publish_new(
            &store,
            c,
            draft(&acme_system_template.id, "v1", simple_doc("acme report")),
        );
        let global_version = publish_new(
            &store,
            c,
            draft(&global_template.id, "v1", simple_doc("global contract")),
        );

        Fixture {
            store,
            cancel,
            system_tenant,
            system_workspace,
            acme,
            acme_eu,
            acme_system_workspace,
            invoice_type,
            report_type,
            contract_type,
            acme_template,
            acme_version,
            acme_system_template,
            global_template,
            global_version,
        }
    }
}

/// Insert a draft and immediately publish it.
pub fn publish_new(
    store: &Arc<MemoryStore>,
    cancel: &CancelToken,
    version: TemplateVersion,
) -> TemplateVersion {
    let inserted = VersionRepo::insert(store.as_ref(), cancel, version).expect("insert version");
    store
        .publish_swap(cancel, &inserted.id, Utc::now())
        .expect("publish")
        .published
}

/// Archive whatever version of `template_id` is currently published.
pub fn archive_published(store: &Arc<MemoryStore>, cancel: &CancelToken, template_id: &str) {
    let mut published = store
        .published_for_template(cancel, template_id)
        .expect("lookup")
        .expect("a published version");
    published.status = VersionStatus::Archived;
    published.archived_at = Some(Utc::now());
    VersionRepo::update(store.as_ref(), cancel, published).expect("update");
}

/// Give the global SYSTEM workspace its own published invoice template.
pub fn assign_global_invoice(fixture: &Fixture) {
    let c = &fixture.cancel;
    let template = TemplateRepo::insert(
        fixture.store.as_ref(),
        c,
        template(
            &fixture.system_workspace.id,
            "Global Invoice",
            Some(&fixture.invoice_type.id),
        ),
    )
    .expect("seed template");
    publish_new(
        &fixture.store,
        c,
        draft(&template.id, "v1", simple_doc("global invoice")),
    );
}
