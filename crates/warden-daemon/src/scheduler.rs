//! Cron-triggered plan scheduling.
//!
//! At startup every plan in the plans directory is parsed; those with a
//! `cron` trigger are scheduled in the configured timezone (default UTC).
//! The scheduler fires `(plan, trigger)` into the dispatch callback and
//! serializes runs per plan name so two firings of the same plan never
//! overlap. Shutdown is a broadcast: cancel jobs, stop cleanly.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use cron::Schedule;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use warden_engine::{Plan, Trigger};
use warden_types::WardenConfig;

/// One schedulable cron job.
#[derive(Clone)]
struct CronEntry {
    plan: Plan,
    schedule: Schedule,
}

/// Parses plans and fires their cron triggers.
pub struct Scheduler {
    entries: Vec<CronEntry>,
    /// All parsed plans, cron-triggered or not (the watcher reuses them).
    plans: Vec<Plan>,
    timezone: Tz,
    shutdown: broadcast::Sender<()>,
    locks: PlanLocks,
}

/// Per-plan-name mutexes serializing concurrent firings.
#[derive(Clone, Default)]
pub struct PlanLocks {
    inner: Arc<std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl PlanLocks {
    /// The lock for `plan_name`, created on first use.
    pub fn for_plan(&self, plan_name: &str) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().expect("plan locks poisoned");
        Arc::clone(
            map.entry(plan_name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

impl Scheduler {
    /// Parse every plan under `plans_dir` and prepare cron entries.
    ///
    /// Unparseable plan files and invalid cron expressions are logged and
    /// skipped, never treated as fatal. An unrecognized timezone falls
    /// back to UTC with a warning.
    pub fn from_dir(plans_dir: &Path, config: &WardenConfig) -> Self {
        let timezone = Tz::from_str(&config.daemon.timezone).unwrap_or_else(|_| {
            tracing::warn!(
                timezone = config.daemon.timezone,
                "unrecognized timezone, falling back to UTC"
            );
            Tz::UTC
        });

        let mut plans = Vec::new();
        let mut entries = Vec::new();
        for path in warden_engine::plan::discover_plan_files(plans_dir) {
            let plan = match Plan::from_file(&path) {
                Ok(plan) => plan,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unparseable plan");
                    continue;
                }
            };
            if let Trigger::Cron { schedule } = &plan.trigger {
                match Schedule::from_str(schedule) {
                    Ok(parsed) => entries.push(CronEntry {
                        plan: plan.clone(),
                        schedule: parsed,
                    }),
                    Err(e) => {
                        tracing::warn!(
                            plan = plan.name,
                            schedule,
                            error = %e,
                            "invalid cron expression, job not scheduled"
                        );
                    }
                }
            }
            plans.push(plan);
        }

        let (shutdown, _) = broadcast::channel(4);
        Self {
            entries,
            plans,
            timezone,
            shutdown,
            locks: PlanLocks::default(),
        }
    }

    /// Every parsed plan (used to register filesystem watchers).
    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }

    /// Number of scheduled cron jobs.
    pub fn job_count(&self) -> usize {
        self.entries.len()
    }

    /// The per-plan serialization locks (shared with the watcher path).
    pub fn locks(&self) -> PlanLocks {
        self.locks.clone()
    }

    /// A sender that stops the scheduler when fired.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown.clone()
    }

    /// Start the cron loop. `on_fire(plan, trigger)` runs each firing;
    /// firings of the same plan are serialized via the plan locks.
    pub fn start<F, Fut>(self, on_fire: F) -> JoinHandle<()>
    where
        F: Fn(Plan, String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut shutdown = self.shutdown.subscribe();
        let on_fire = Arc::new(on_fire);
        tokio::spawn(async move {
            if self.entries.is_empty() {
                tracing::info!("scheduler started with no cron jobs");
                let _ = shutdown.recv().await;
                return;
            }
            tracing::info!(
                jobs = self.entries.len(),
                timezone = %self.timezone,
                "scheduler started"
            );

            loop {
                let now = Utc::now();
                // Pick the jobs due at the soonest upcoming instant.
                let mut due: Vec<usize> = Vec::new();
                let mut soonest: Option<chrono::DateTime<Utc>> = None;
                for (i, entry) in self.entries.iter().enumerate() {
                    let Some(next) = entry
                        .schedule
                        .upcoming(self.timezone)
                        .next()
                        .map(|t| t.with_timezone(&Utc))
                    else {
                        continue;
                    };
                    match soonest {
                        None => {
                            soonest = Some(next);
                            due.push(i);
                        }
                        Some(s) if next < s => {
                            soonest = Some(next);
                            due.clear();
                            due.push(i);
                        }
                        Some(s) if next == s => due.push(i),
                        _ => {}
                    }
                }
                let Some(soonest) = soonest else {
                    tracing::warn!("no upcoming cron fires, scheduler idle");
                    let _ = shutdown.recv().await;
                    return;
                };

                let wait = (soonest - now).to_std().unwrap_or_default();
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {
                        for &i in &due {
                            let entry = self.entries[i].clone();
                            let lock = self.locks.for_plan(&entry.plan.name);
                            let on_fire = Arc::clone(&on_fire);
                            tracing::info!(plan = entry.plan.name, "cron trigger fired");
                            tokio::spawn(async move {
                                let _guard = lock.lock().await;
                                on_fire(entry.plan, "cron".to_string()).await;
                            });
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::info!("scheduler shutting down");
                        return;
                    }
                }
            }
        })
    }
}
