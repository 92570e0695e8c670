use std::collections::HashSet;
use std::time::Duration;

use chrono::{Local, NaiveDate, NaiveDateTime};
use tokio::time::MissedTickBehavior;

use crate::settings::{RunConfig, ScheduledTask};
use crate::state::AppState;

/// Tracks which schedule minutes already fired today.
#[derive(Debug, Clone)]
pub struct Scheduler {
    fired: HashSet<String>,
    date: NaiveDate,
}

impl Scheduler {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            fired: HashSet::new(),
            date: today,
        }
    }

    /// Run config of the first enabled task due at `now` that has not fired
    /// today. Each minute key fires at most once per calendar day.
    pub fn tick(&mut self, now: NaiveDateTime, tasks: &[ScheduledTask]) -> Option<RunConfig> {
        let today = now.date();
        if today != self.date {
            tracing::info!("date changed {} -> {today}, schedule reset", self.date);
            self.fired.clear();
            self.date = today;
        }

        let key = now.format("%H:%M").to_string();
        if self.fired.contains(&key) {
            return None;
        }

        let task = tasks.iter().find(|t| t.enabled && t.key() == key)?;
        self.fired.insert(key.clone());
        tracing::info!("scheduled run due at {key}: {}", task.run.describe());
        Some(task.run)
    }
}

/// Check the schedule every `every` and start a run when one is due.
/// Ticks are skipped while the timer is off or a run is active.
pub async fn run_scheduler(state: AppState, every: Duration) {
    let mut scheduler = Scheduler::new(Local::now().date_naive());
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!("scheduler started, checking every {}s", every.as_secs());
    loop {
        interval.tick().await;

        let mut inner = state.lock().await;
        if !inner.settings.timer_enabled || inner.run.is_active() {
            continue;
        }

        let Some(config) = scheduler.tick(Local::now().naive_local(), &inner.settings.scheduled_tasks) else {
            continue;
        };

        inner.reap().await;
        if let Err(e) = inner.start(config) {
            tracing::warn!("scheduled run not started: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn task(hh: u32, mm: u32, enabled: bool, run: RunConfig) -> ScheduledTask {
        ScheduledTask {
            time: NaiveTime::from_hms_opt(hh, mm, 0).unwrap(),
            enabled,
            run,
        }
    }

    fn at(day: u32, hh: u32, mm: u32, ss: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, day)
            .unwrap()
            .and_hms_opt(hh, mm, ss)
            .unwrap()
    }

    #[test]
    fn test_fires_once_per_day() {
        let tasks = vec![task(4, 5, true, RunConfig::manual())];
        let mut scheduler = Scheduler::new(at(1, 0, 0, 0).date());

        assert_eq!(scheduler.tick(at(1, 4, 4, 59), &tasks), None);
        assert_eq!(scheduler.tick(at(1, 4, 5, 0), &tasks), Some(RunConfig::manual()));
        assert_eq!(scheduler.tick(at(1, 4, 5, 30), &tasks), None);
        assert_eq!(scheduler.tick(at(1, 4, 6, 0), &tasks), None);

        assert_eq!(scheduler.tick(at(2, 4, 5, 10), &tasks), Some(RunConfig::manual()));
        assert_eq!(scheduler.tick(at(2, 4, 5, 40), &tasks), None);
    }

    #[test]
    fn test_disabled_tasks_never_fire() {
        let tasks = vec![task(12, 0, false, RunConfig::manual())];
        let mut scheduler = Scheduler::new(at(1, 0, 0, 0).date());
        assert_eq!(scheduler.tick(at(1, 12, 0, 0), &tasks), None);
    }

    #[test]
    fn test_first_enabled_task_wins_the_minute() {
        let sweep = RunConfig {
            sweep: true,
            ..RunConfig::default()
        };
        let tasks = vec![
            task(8, 0, false, RunConfig::manual()),
            task(8, 0, true, sweep),
            task(8, 0, true, RunConfig::manual()),
        ];
        let mut scheduler = Scheduler::new(at(1, 0, 0, 0).date());

        assert_eq!(scheduler.tick(at(1, 8, 0, 0), &tasks), Some(sweep));
        assert_eq!(scheduler.tick(at(1, 8, 0, 30), &tasks), None);
    }

    #[test]
    fn test_missed_minute_is_not_replayed() {
        let tasks = vec![task(9, 0, true, RunConfig::manual())];
        let mut scheduler = Scheduler::new(at(1, 0, 0, 0).date());
        assert_eq!(scheduler.tick(at(1, 9, 1, 0), &tasks), None);
    }
}
