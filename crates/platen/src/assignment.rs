//! Document-type assignment.
//!
//! A template is assigned to at most one document type; within a
//! workspace, a document type is assigned to at most one template. The
//! assignment operation probes by default — reporting the conflicting
//! holder without mutating anything — and only force mode atomically
//! moves the assignment, through the template port's transactional
//! [`reassign_doc_type`](crate::ports::TemplateRepo::reassign_doc_type).

use std::sync::Arc;

use platen_cancel::CancelToken;
use platen_types::{Error, Result, Template};

use crate::cache::TemplateCache;
use crate::ports::{DocumentTypeRepo, TemplateRepo};

pub struct AssignmentService {
    templates: Arc<dyn TemplateRepo>,
    doc_types: Arc<dyn DocumentTypeRepo>,
    cache: Arc<TemplateCache>,
}

impl AssignmentService {
    pub fn new(
        templates: Arc<dyn TemplateRepo>,
        doc_types: Arc<dyn DocumentTypeRepo>,
        cache: Arc<TemplateCache>,
    ) -> AssignmentService {
        AssignmentService {
            templates,
            doc_types,
            cache,
        }
    }

    /// Assign `doc_type_id` to `template_id`.
    ///
    /// Probe mode (`force == false`) returns [`Error::Conflict`] carrying
    /// the current holder's id and title, without mutating state. Force
    /// mode atomically clears the prior holder and assigns the type,
    /// then invalidates every cache key the affected document type can
    /// reach — including the new template's previous assignment.
    pub fn assign(
        &self,
        cancel: &CancelToken,
        template_id: &str,
        doc_type_id: &str,
        force: bool,
    ) -> Result<Template> {
        let template = self
            .templates
            .by_id(cancel, template_id)?
            .ok_or_else(|| Error::NotFound(format!("template {template_id}")))?;
        let doc_type = self
            .doc_types
            .by_id(cancel, doc_type_id)?
            .ok_or_else(|| Error::NotFound(format!("document type {doc_type_id}")))?;

        if template.document_type_id.as_deref() == Some(doc_type_id) {
            return Ok(template);
        }

        if !force
            && let Some(holder) = self.templates.by_workspace_and_doc_type(
                cancel,
                &template.workspace_id,
                doc_type_id,
            )?
            && holder.id != template.id
        {
            return Err(Error::Conflict {
                id: holder.id,
                title: holder.title,
            });
        }

        let previous = template.document_type_id.clone();
        let (updated, _cleared) =
            self.templates
                .reassign_doc_type(cancel, template_id, doc_type_id)?;

        self.cache.invalidate_doc_type(&doc_type.code);
        self.invalidate_previous(cancel, previous.as_deref())?;

        Ok(updated)
    }

    /// Clear a template's assignment and invalidate the affected keys.
    pub fn unassign(&self, cancel: &CancelToken, template_id: &str) -> Result<Template> {
        let mut template = self
            .templates
            .by_id(cancel, template_id)?
            .ok_or_else(|| Error::NotFound(format!("template {template_id}")))?;

        let previous = template.document_type_id.take();
        if previous.is_none() {
            return Ok(template);
        }
        template.updated_at = chrono::Utc::now();
        let updated = self.templates.update(cancel, template)?;
        self.invalidate_previous(cancel, previous.as_deref())?;
        Ok(updated)
    }

    fn invalidate_previous(
        &self,
        cancel: &CancelToken,
        previous_doc_type_id: Option<&str>,
    ) -> Result<()> {
        if let Some(id) = previous_doc_type_id
            && let Some(doc_type) = self.doc_types.by_id(cancel, id)?
        {
            self.cache.invalidate_doc_type(&doc_type.code);
        }
        Ok(())
    }
}
