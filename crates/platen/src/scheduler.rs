//! Scheduled-publish worker.
//!
//! A single background thread ticks at a fixed interval, asks the version
//! port for every SCHEDULED version whose publish time has passed, and
//! promotes them one at a time in insertion order. A failed promotion is
//! logged and the worker moves on to the next candidate. The first tick
//! runs immediately, so versions that came due while the process was down
//! are caught up on startup.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use platen_cancel::CancelToken;

use crate::lifecycle::VersionLifecycle;
use crate::ports::VersionRepo;

pub struct Scheduler {
    cancel: CancelToken,
    handle: Option<JoinHandle<()>>,
    grace: Duration,
}

impl Scheduler {
    /// Start the worker thread. It ticks immediately, then every
    /// `interval`.
    pub fn start(
        interval: Duration,
        grace: Duration,
        lifecycle: Arc<VersionLifecycle>,
        versions: Arc<dyn VersionRepo>,
    ) -> Scheduler {
        let cancel = CancelToken::new();
        let worker_cancel = cancel.clone();

        let handle = std::thread::spawn(move || {
            loop {
                tick(&worker_cancel, &lifecycle, versions.as_ref());
                if worker_cancel.sleep(interval) {
                    break;
                }
            }
            debug!("scheduler drained");
        });

        Scheduler {
            cancel,
            handle: Some(handle),
            grace,
        }
    }

    /// Request shutdown and wait up to the grace period for the worker to
    /// drain. A worker still busy after the grace period is detached.
    pub fn shutdown(mut self) {
        self.cancel.cancel();
        let Some(handle) = self.handle.take() else {
            return;
        };

        let deadline = Instant::now() + self.grace;
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        if handle.is_finished() {
            let _ = handle.join();
        } else {
            warn!("scheduler did not drain within the grace period; detaching");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn tick(cancel: &CancelToken, lifecycle: &VersionLifecycle, versions: &dyn VersionRepo) {
    let due = match versions.due_scheduled(cancel, chrono::Utc::now()) {
        Ok(due) => due,
        Err(err) => {
            warn!(error = %err, "scheduler failed to list due versions");
            return;
        }
    };

    for version in due {
        if cancel.is_cancelled() {
            return;
        }
        match lifecycle.promote_scheduled(cancel, &version.id) {
            Ok(published) => {
                info!(
                    version = %published.id,
                    template = %published.template_id,
                    "scheduled version published"
                );
            }
            Err(err) => {
                warn!(version = %version.id, error = %err, "scheduled publish failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TemplateCache;
    use crate::testkit::{Fixture, simple_doc};
    use chrono::Utc;
    use platen_inject::RegistryBuilder;
    use platen_types::VersionStatus;

    fn lifecycle(fixture: &Fixture) -> Arc<VersionLifecycle> {
        Arc::new(VersionLifecycle::new(
            fixture.store.clone(),
            fixture.store.clone(),
            fixture.store.clone(),
            fixture.store.clone(),
            fixture.store.clone(),
            fixture.store.clone(),
            Arc::new(RegistryBuilder::new().freeze().expect("freeze")),
            Arc::new(TemplateCache::new()),
        ))
    }

    fn schedule_in_the_past(fixture: &Fixture, lifecycle: &VersionLifecycle, name: &str) -> String {
        let c = &fixture.cancel;
        let draft = lifecycle
            .create_draft(
                c,
                &fixture.acme_template.id,
                name,
                None,
                simple_doc(name),
                "user-1",
            )
            .expect("draft");
        let mut scheduled = lifecycle
            .schedule(c, &draft.id, Utc::now() + chrono::Duration::hours(1))
            .expect("schedule");
        scheduled.scheduled_publish_at = Some(Utc::now() - chrono::Duration::minutes(1));
        crate::ports::VersionRepo::update(fixture.store.as_ref(), c, scheduled).expect("update");
        draft.id
    }

    #[test]
    fn first_tick_promotes_overdue_versions() {
        let fixture = Fixture::seeded();
        let lifecycle = lifecycle(&fixture);
        let version_id = schedule_in_the_past(&fixture, &lifecycle, "v2");

        let scheduler = Scheduler::start(
            Duration::from_secs(3600),
            Duration::from_millis(500),
            lifecycle,
            fixture.store.clone(),
        );

        // The immediate first tick picks the version up.
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let version = crate::ports::VersionRepo::by_id(
                fixture.store.as_ref(),
                &fixture.cancel,
                &version_id,
            )
            .expect("lookup")
            .expect("found");
            if version.status == VersionStatus::Published {
                break;
            }
            assert!(Instant::now() < deadline, "scheduler never promoted");
            std::thread::sleep(Duration::from_millis(10));
        }

        scheduler.shutdown();
    }

    /// Delegates to the store but refuses to swap one poisoned version.
    struct FlakySwap {
        inner: Arc<crate::memory::MemoryStore>,
        fail_id: String,
    }

    impl VersionRepo for FlakySwap {
        fn by_id(
            &self,
            cancel: &CancelToken,
            id: &str,
        ) -> platen_types::Result<Option<platen_types::TemplateVersion>> {
            VersionRepo::by_id(self.inner.as_ref(), cancel, id)
        }
        fn list_for_template(
            &self,
            cancel: &CancelToken,
            template_id: &str,
        ) -> platen_types::Result<Vec<platen_types::TemplateVersion>> {
            self.inner.list_for_template(cancel, template_id)
        }
        fn published_for_template(
            &self,
            cancel: &CancelToken,
            template_id: &str,
        ) -> platen_types::Result<Option<platen_types::TemplateVersion>> {
            self.inner.published_for_template(cancel, template_id)
        }
        fn insert(
            &self,
            cancel: &CancelToken,
            version: platen_types::TemplateVersion,
        ) -> platen_types::Result<platen_types::TemplateVersion> {
            VersionRepo::insert(self.inner.as_ref(), cancel, version)
        }
        fn update(
            &self,
            cancel: &CancelToken,
            version: platen_types::TemplateVersion,
        ) -> platen_types::Result<platen_types::TemplateVersion> {
            VersionRepo::update(self.inner.as_ref(), cancel, version)
        }
        fn delete(&self, cancel: &CancelToken, id: &str) -> platen_types::Result<()> {
            VersionRepo::delete(self.inner.as_ref(), cancel, id)
        }
        fn due_scheduled(
            &self,
            cancel: &CancelToken,
            now: chrono::DateTime<Utc>,
        ) -> platen_types::Result<Vec<platen_types::TemplateVersion>> {
            self.inner.due_scheduled(cancel, now)
        }
        fn publish_swap(
            &self,
            cancel: &CancelToken,
            version_id: &str,
            now: chrono::DateTime<Utc>,
        ) -> platen_types::Result<crate::ports::PublishSwap> {
            if self.fail_id == version_id {
                return Err(platen_types::Error::internal("storage hiccup"));
            }
            self.inner.publish_swap(cancel, version_id, now)
        }
    }

    #[test]
    fn failed_promotion_does_not_stop_the_batch() {
        let fixture = Fixture::seeded();
        let c = &fixture.cancel;

        let seed_lifecycle = lifecycle(&fixture);
        let broken_id = schedule_in_the_past(&fixture, &seed_lifecycle, "broken");
        let good_id = schedule_in_the_past(&fixture, &seed_lifecycle, "good");

        let versions: Arc<FlakySwap> = Arc::new(FlakySwap {
            inner: fixture.store.clone(),
            fail_id: broken_id.clone(),
        });
        let flaky_lifecycle = Arc::new(VersionLifecycle::new(
            fixture.store.clone(),
            versions.clone(),
            fixture.store.clone(),
            fixture.store.clone(),
            fixture.store.clone(),
            fixture.store.clone(),
            Arc::new(RegistryBuilder::new().freeze().expect("freeze")),
            Arc::new(TemplateCache::new()),
        ));

        let scheduler = Scheduler::start(
            Duration::from_secs(3600),
            Duration::from_millis(500),
            flaky_lifecycle,
            versions,
        );

        // The broken candidate fails; the good one behind it is still
        // promoted in the same tick.
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let version = crate::ports::VersionRepo::by_id(fixture.store.as_ref(), c, &good_id)
                .expect("lookup")
                .expect("found");
            if version.status == VersionStatus::Published {
                break;
            }
            assert!(Instant::now() < deadline, "good candidate never promoted");
            std::thread::sleep(Duration::from_millis(10));
        }
        let broken = crate::ports::VersionRepo::by_id(fixture.store.as_ref(), c, &broken_id)
            .expect("lookup")
            .expect("found");
        assert_eq!(broken.status, VersionStatus::Scheduled);

        scheduler.shutdown();
    }

    #[test]
    fn shutdown_drains_promptly() {
        let fixture = Fixture::seeded();
        let lifecycle = lifecycle(&fixture);

        let scheduler = Scheduler::start(
            Duration::from_secs(3600),
            Duration::from_secs(2),
            lifecycle,
            fixture.store.clone(),
        );

        let start = Instant::now();
        scheduler.shutdown();
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
