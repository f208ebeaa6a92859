//! Registry of the recurring intervals and their lifecycle
//!
//! Three kinds of recurring work exist:
//! - the local warm-up interval (one, site-wide)
//! - the external warmer interval (one per domain derived from entry points)
//! - the self-healing sweep, a native fixed-period job that re-creates any of
//!   the above that went missing
//!
//! All methods take `now` explicitly so callers decide the clock.

use std::sync::Arc;

use serde_json::json;

use super::error::{SchedulerError, SchedulerResult};
use super::interval::{IntervalScheduler, ScheduleKey, ScheduleOutcome};
use crate::config::settings::INTERVAL_KEY;
use crate::config::{DomainSettings, WarmerSettings};
use crate::queue::{Hook, Job, JobQueue};
use crate::storage::{ConfigStore, ConfigStoreExt};
use crate::utils::unique_domains;

/// Period of the self-healing sweep
pub const SWEEP_PERIOD_SECS: i64 = 4 * 3600;

/// One-shot marker set on activation and consumed by the first worker start
pub const POST_ACTIVATION_KEY: &str = "intervals-post-activation-handled";

/// Hooks canceled on deactivation
const MANAGED_HOOKS: [Hook; 4] = [
    Hook::LocalWarmInterval,
    Hook::ProcessExternalWarmer,
    Hook::WarmUrlsChunk,
    Hook::FixMissingIntervals,
];

/// Result of scheduling one domain's external interval
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainSchedule {
    pub domain: String,
    pub outcome: ScheduleOutcome,
}

/// Owns the interval definitions and their activation lifecycle
pub struct IntervalRegistry {
    scheduler: IntervalScheduler,
}

impl IntervalRegistry {
    pub fn new(queue: Arc<dyn JobQueue>, store: Arc<dyn ConfigStore>) -> Self {
        Self {
            scheduler: IntervalScheduler::new(queue, store),
        }
    }

    pub fn scheduler(&self) -> &IntervalScheduler {
        &self.scheduler
    }

    fn queue(&self) -> &dyn JobQueue {
        self.scheduler.queue().as_ref()
    }

    fn store(&self) -> &dyn ConfigStore {
        self.scheduler.store().as_ref()
    }

    /// Ensure the local interval is scheduled.
    ///
    /// `minutes_override` replaces the stored cadence when positive. A cadence
    /// too large to express in seconds counts as disabled.
    pub fn schedule_local(
        &self,
        minutes_override: Option<i64>,
        now: i64,
    ) -> SchedulerResult<ScheduleOutcome> {
        let minutes = match minutes_override.filter(|m| *m > 0) {
            Some(minutes) => minutes,
            None => WarmerSettings::load(self.store())?.interval_minutes,
        };
        let Some(interval) = minutes.checked_mul(60) else {
            tracing::warn!(minutes, "Local interval out of range, treating as disabled");
            return Ok(ScheduleOutcome::Disabled);
        };
        let key = ScheduleKey::for_job(Job::LocalInterval)?;
        self.scheduler.ensure_scheduled_at(interval, &key, now)
    }

    /// Ensure the external interval of one domain is scheduled, if the domain
    /// has a validated license, servers and a positive interval.
    pub fn schedule_external(&self, domain: &str, now: i64) -> SchedulerResult<ScheduleOutcome> {
        let settings = DomainSettings::load(self.store(), domain)?;
        let Some(interval) = settings.external_interval_secs() else {
            tracing::debug!(domain, "External warmer not configured for domain");
            return Ok(ScheduleOutcome::Disabled);
        };
        let key = ScheduleKey::new(Hook::ProcessExternalWarmer, vec![json!(domain)]);
        self.scheduler.ensure_scheduled_at(interval, &key, now)
    }

    /// Domains the external warmer can run for, from the entry points
    pub fn domains(&self) -> SchedulerResult<Vec<String>> {
        let settings = WarmerSettings::load(self.store())?;
        Ok(unique_domains(&settings.home_url, settings.entry_point_urls()))
    }

    pub fn schedule_external_for_all_domains(
        &self,
        now: i64,
    ) -> SchedulerResult<Vec<DomainSchedule>> {
        self.domains()?
            .into_iter()
            .map(|domain| {
                let outcome = self.schedule_external(&domain, now)?;
                Ok(DomainSchedule { domain, outcome })
            })
            .collect()
    }

    /// Ensure the native recurring sweep exists, first run at `now`.
    /// Returns whether a new sweep job was created.
    pub fn schedule_sweep(&self, now: i64) -> SchedulerResult<bool> {
        let created = self
            .queue()
            .schedule_recurring(now, SWEEP_PERIOD_SECS, Hook::FixMissingIntervals, &[], true)?;
        if created.is_some() {
            tracing::info!(period_secs = SWEEP_PERIOD_SECS, "Self-healing sweep scheduled");
        }
        Ok(created.is_some())
    }

    /// Re-create any missing local or external interval
    pub fn fix_missing_intervals(&self, now: i64) -> SchedulerResult<()> {
        let local = self.schedule_local(None, now)?;
        let external = self.schedule_external_for_all_domains(now)?;
        tracing::info!(
            local = ?local,
            domains = external.len(),
            "Missing intervals fixed"
        );
        Ok(())
    }

    /// Mark the intervals for scheduling on the next worker start
    pub fn activate(&self) -> SchedulerResult<bool> {
        if self.store().get(POST_ACTIVATION_KEY)?.is_some() {
            return Ok(false);
        }
        self.store().set_as(POST_ACTIVATION_KEY, "no")?;
        Ok(true)
    }

    /// Consume the activation marker and fix intervals once
    pub fn post_activation(&self, now: i64) -> SchedulerResult<bool> {
        let marker: Option<String> = self.store().get_as(POST_ACTIVATION_KEY)?;
        if marker.as_deref() != Some("no") {
            return Ok(false);
        }
        self.store().delete(POST_ACTIVATION_KEY)?;
        self.fix_missing_intervals(now)?;
        Ok(true)
    }

    /// Cancel every pending interval, chunk and sweep job
    pub fn deactivate(&self) -> SchedulerResult<usize> {
        let mut canceled = 0;
        for hook in MANAGED_HOOKS {
            canceled += self.queue().cancel_all(hook)?;
        }
        tracing::info!(canceled, "Intervals deactivated");
        Ok(canceled)
    }

    /// Persist a new local cadence and reschedule with it. Zero disables.
    pub fn handle_interval_change(
        &self,
        minutes: i64,
        now: i64,
    ) -> SchedulerResult<ScheduleOutcome> {
        if minutes < 0 {
            return Err(SchedulerError::invalid_interval(minutes.saturating_mul(60)));
        }
        self.queue().cancel_all(Hook::LocalWarmInterval)?;
        self.store().set_as(INTERVAL_KEY, &minutes)?;
        self.schedule_local(Some(minutes), now)
    }

    /// Drop every external interval and schedule them again from settings
    pub fn reschedule_external(&self, now: i64) -> SchedulerResult<Vec<DomainSchedule>> {
        self.queue().cancel_all(Hook::ProcessExternalWarmer)?;
        self.schedule_external_for_all_domains(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EntryPoint;
    use crate::queue::MemoryJobQueue;
    use crate::storage::MemoryConfigStore;

    fn setup() -> (IntervalRegistry, Arc<MemoryJobQueue>, Arc<MemoryConfigStore>) {
        let queue = Arc::new(MemoryJobQueue::new());
        let store = Arc::new(MemoryConfigStore::new());
        (
            IntervalRegistry::new(queue.clone(), store.clone()),
            queue,
            store,
        )
    }

    fn configure_site(store: &MemoryConfigStore) {
        WarmerSettings {
            interval_minutes: 60,
            home_url: "https://example.com".to_string(),
            entry_points: vec![
                EntryPoint { url: "/".to_string() },
                EntryPoint { url: "https://shop.example.com/".to_string() },
            ],
            ..Default::default()
        }
        .save(store)
        .unwrap();

        DomainSettings {
            domain: "example.com".to_string(),
            license_key: Some("key".to_string()),
            last_validation_code: Some(200),
            servers: vec!["https://us1.warm.example/".to_string()],
            interval_hours: 2,
        }
        .save(store)
        .unwrap();
    }

    #[test]
    fn test_schedule_local_uses_settings() {
        let (registry, queue, store) = setup();
        assert_eq!(
            registry.schedule_local(None, 1000).unwrap(),
            ScheduleOutcome::Disabled
        );

        configure_site(&store);
        assert_eq!(
            registry.schedule_local(None, 1000).unwrap(),
            ScheduleOutcome::Scheduled { run_at: 4600 }
        );
        assert_eq!(queue.pending_for(Hook::LocalWarmInterval).len(), 1);
    }

    #[test]
    fn test_schedule_local_out_of_range_is_disabled() {
        let (registry, queue, store) = setup();
        store.set_as(INTERVAL_KEY, &i64::MAX).unwrap();
        assert_eq!(
            registry.schedule_local(None, 1000).unwrap(),
            ScheduleOutcome::Disabled
        );
        assert_eq!(
            registry.handle_interval_change(i64::MAX, 1000).unwrap(),
            ScheduleOutcome::Disabled
        );
        assert!(queue.pending_for(Hook::LocalWarmInterval).is_empty());
    }

    #[test]
    fn test_domains_without_home_url() {
        let (registry, _, store) = setup();
        WarmerSettings {
            home_url: String::new(),
            entry_points: vec![
                EntryPoint { url: "https://example.com/".to_string() },
                EntryPoint { url: "/relative".to_string() },
            ],
            ..Default::default()
        }
        .save(store.as_ref())
        .unwrap();

        assert_eq!(registry.domains().unwrap(), vec!["example.com"]);
    }

    #[test]
    fn test_external_only_for_configured_domains() {
        let (registry, queue, store) = setup();
        configure_site(&store);

        let results = registry.schedule_external_for_all_domains(1000).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].domain, "example.com");
        assert_eq!(results[0].outcome, ScheduleOutcome::Scheduled { run_at: 8200 });
        assert_eq!(results[1].domain, "shop.example.com");
        assert_eq!(results[1].outcome, ScheduleOutcome::Disabled);

        let pending = queue.pending_for(Hook::ProcessExternalWarmer);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].args, vec![json!("example.com")]);
    }

    #[test]
    fn test_sweep_is_unique() {
        let (registry, queue, _) = setup();
        assert!(registry.schedule_sweep(1000).unwrap());
        assert!(!registry.schedule_sweep(1001).unwrap());
        let pending = queue.pending_for(Hook::FixMissingIntervals);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].period_secs, Some(SWEEP_PERIOD_SECS));
    }

    #[test]
    fn test_activation_lifecycle() {
        let (registry, queue, store) = setup();
        configure_site(&store);

        assert!(!registry.post_activation(1000).unwrap());
        assert!(registry.activate().unwrap());
        assert!(!registry.activate().unwrap());

        assert!(registry.post_activation(1000).unwrap());
        assert!(!registry.post_activation(1000).unwrap());
        assert_eq!(queue.pending_for(Hook::LocalWarmInterval).len(), 1);
        assert_eq!(queue.pending_for(Hook::ProcessExternalWarmer).len(), 1);

        registry.schedule_sweep(1000).unwrap();
        assert_eq!(registry.deactivate().unwrap(), 3);
        assert!(queue.pending_jobs().unwrap().is_empty());
    }

    #[test]
    fn test_handle_interval_change() {
        let (registry, queue, store) = setup();
        configure_site(&store);
        registry.schedule_local(None, 1000).unwrap();

        let outcome = registry.handle_interval_change(30, 2000).unwrap();
        assert_eq!(outcome, ScheduleOutcome::Scheduled { run_at: 3800 });

        let pending = queue.pending_for(Hook::LocalWarmInterval);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].run_at, 3800);
        assert_eq!(WarmerSettings::load(store.as_ref()).unwrap().interval_minutes, 30);

        assert!(matches!(
            registry.handle_interval_change(-5, 2000),
            Err(SchedulerError::InvalidInterval { seconds: -300 })
        ));
        assert_eq!(queue.pending_for(Hook::LocalWarmInterval).len(), 1);
    }
}
