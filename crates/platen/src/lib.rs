//! # Platen
//!
//! The rendering core of a multi-tenant document template service.
//! Templates are stored as structured document trees with placeholders
//! ("injectables"); rendering resolves dynamic values through a
//! user-extensible plugin system, lowers the tree into Typst source, and
//! shells out to the typesetter to produce a PDF.
//!
//! ## Pipeline
//!
//! One render request flows **admission → template resolution →
//! injectable resolution → lowering → image materialization → typesetter
//! → PDF**:
//!
//! 1. [`admission::RenderGate`] bounds concurrent renders and fails fast
//!    with `RendererBusy` under sustained load.
//! 2. [`fallback::TemplateResolver`] walks the three-tier chain (exact
//!    workspace → tenant system workspace → global system workspace) to a
//!    published version, caching hits in [`cache::TemplateCache`].
//! 3. `platen_inject` executes the template's injectors in dependency
//!    order with per-plugin deadlines and the critical/default policy.
//! 4. `platen_lower` emits Typst markup; `platen_images` materializes
//!    remote images through the content-addressed disk cache.
//! 5. `platen_typst` runs the typesetter subprocess with a bounded
//!    timeout; [`renderer::Renderer`] returns the PDF bytes, a suggested
//!    filename, and the page count.
//!
//! Alongside the pipeline, [`lifecycle::VersionLifecycle`] enforces the
//! DRAFT / SCHEDULED / PUBLISHED / ARCHIVED state machine (at most one
//! published version per template, enforced transactionally) and
//! [`scheduler::Scheduler`] promotes due scheduled versions in the
//! background.
//!
//! ## Storage
//!
//! The core talks to storage through the [`ports`] traits only; every
//! method takes a cancellation context first. [`memory::MemoryStore`]
//! implements all ports in-process and backs the test suite.
//!
//! ## Modules
//!
//! - [`renderer`] — the per-request pipeline
//! - [`admission`] — the counting-semaphore render gate
//! - [`fallback`] / [`cache`] — template resolution and its cache
//! - [`lifecycle`] / [`validate`] — version state machine and publish
//!   validation
//! - [`scheduler`] — the scheduled-publish worker
//! - [`assignment`] — document-type assignment with probe/force modes
//! - [`ports`] / [`memory`] — repository contracts and the in-memory
//!   reference implementation

pub mod admission;
pub mod assignment;
pub mod cache;
pub mod fallback;
pub mod lifecycle;
pub mod memory;
pub mod ports;
pub mod renderer;
pub mod scheduler;
pub mod validate;

#[cfg(test)]
mod testkit;

pub use admission::{RenderGate, RenderPermit};
pub use assignment::AssignmentService;
pub use cache::{ResolvedTemplate, TemplateCache};
pub use fallback::TemplateResolver;
pub use lifecycle::VersionLifecycle;
pub use memory::MemoryStore;
pub use renderer::{RenderOutput, RenderRequest, Renderer};
pub use scheduler::Scheduler;
