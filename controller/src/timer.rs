//! Daily on/off timer for the lamp.
//!
//! One background worker owns the compute-sleep-fire cycle:
//!
//! ```text
//!   ┌──────────── reschedule (set_times) ────────────┐
//!   ▼                                                 │
//! compute next on/off ──► wait ──► event due ──► relay.set_on(..)
//!   ▲                      │                          │
//!   └──────────────────────┼──────────────────────────┘
//!                          └──► shutdown ──► stopped
//! ```
//!
//! The schedule lives behind its own lock; `get_times` never waits on the
//! worker and the worker never does I/O while holding the lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use lamp_common::{LampAction, NextEvents, TimerSchedule};
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, info, warn};

use crate::{
    clock::Clock,
    relay::RelayController,
    store::{ScheduleStore, StoreError},
    worker::{shutdown_requested, Worker},
};

struct Shared {
    schedule: Mutex<TimerSchedule>,
    // notify_one keeps at most one permit, which coalesces reschedule
    // requests that arrive while the worker is busy.
    reschedule: Notify,
    timezone: Tz,
    clock: Arc<dyn Clock>,
}

pub struct Timer {
    shared: Arc<Shared>,
    store: ScheduleStore,
    // Held across the in-memory swap and the file write so the file always
    // matches the last writer.
    update: Mutex<()>,
    worker: Worker,
}

impl Timer {
    /// Loads the persisted schedule and starts the timer. Fails only when
    /// the schedule file exists but cannot be read.
    pub async fn open(
        store: ScheduleStore,
        relay: Arc<RelayController>,
        timezone: Tz,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let schedule = store.load().await?;
        info!(
            on = schedule.turn_on_times.len(),
            off = schedule.turn_off_times.len(),
            path = %store.path().display(),
            "timer schedule loaded"
        );
        Ok(Self::start(schedule, store, relay, timezone, clock))
    }

    pub fn start(
        schedule: TimerSchedule,
        store: ScheduleStore,
        relay: Arc<RelayController>,
        timezone: Tz,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let shared = Arc::new(Shared {
            schedule: Mutex::new(schedule),
            reschedule: Notify::new(),
            timezone,
            clock,
        });
        let worker = {
            let shared = shared.clone();
            Worker::spawn("timer", move |shutdown| run(shared, relay, shutdown))
        };
        Self {
            shared,
            store,
            update: Mutex::new(()),
            worker,
        }
    }

    pub async fn get_times(&self) -> TimerSchedule {
        self.shared.schedule.lock().await.clone()
    }

    /// Replaces the schedule, persists it and wakes the worker so it
    /// recomputes straight away. A persistence failure is logged; the new
    /// schedule stays in effect either way.
    pub async fn set_times(&self, schedule: TimerSchedule) {
        let _update = self.update.lock().await;
        {
            let mut active = self.shared.schedule.lock().await;
            *active = schedule.clone();
        }
        if let Err(err) = self.store.save(&schedule).await {
            warn!("failed to persist timer schedule: {err}");
        }
        self.shared.reschedule.notify_one();
    }

    /// The upcoming on and off instants for the current schedule.
    pub async fn next_events(&self) -> NextEvents {
        let schedule = self.get_times().await;
        schedule
            .plan(self.shared.clock.now(), &self.shared.timezone)
            .events
    }

    pub fn timezone(&self) -> Tz {
        self.shared.timezone
    }

    /// Stops the worker. Once this returns the timer will not touch the
    /// relay again.
    pub async fn close(&self) {
        self.worker.close().await;
    }
}

async fn run(shared: Arc<Shared>, relay: Arc<RelayController>, mut shutdown: watch::Receiver<bool>) {
    info!("timer started");
    let mut last_fired: Option<DateTime<Utc>> = None;

    loop {
        // Never compute from before the last firing, or a clock that lags
        // the sleep could fire the same event twice.
        let now = match last_fired {
            Some(fired) => shared.clock.now().max(fired),
            None => shared.clock.now(),
        };
        let schedule = shared.schedule.lock().await.clone();
        let plan = schedule.plan(now, &shared.timezone);
        for invalid in &plan.invalid {
            warn!(entry = %invalid.entry, "skipping schedule entry: {}", invalid.error);
        }

        let next = plan.events.earliest(now);
        match next {
            Some((action, at)) => info!(
                action = action.as_str(),
                at = %at.with_timezone(&shared.timezone),
                "next timer event"
            ),
            None => debug!("no timer events scheduled"),
        }

        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            _ = shared.reschedule.notified() => {
                debug!("schedule changed, recomputing");
            }
            (action, at) = wait_for(next, now) => {
                info!(action = action.as_str(), "timer fired");
                relay.set_on(action.target_state()).await;
                last_fired = Some(at);
            }
        }
    }

    info!("timer shut down");
}

async fn wait_for(
    next: Option<(LampAction, DateTime<Utc>)>,
    now: DateTime<Utc>,
) -> (LampAction, DateTime<Utc>) {
    let Some((action, at)) = next else {
        return std::future::pending().await;
    };
    let delay = (at - now).to_std().unwrap_or_default();
    tokio::time::sleep(delay).await;
    (action, at)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;
    use chrono_tz::America::Vancouver;

    use super::*;
    use crate::{clock::TokioClock, gpio::MemoryPin};

    struct Fixture {
        timer: Timer,
        relay: Arc<RelayController>,
        pin: MemoryPin,
        _tmp: tempfile::TempDir,
    }

    fn at(day: u32, hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
        Vancouver
            .with_ymd_and_hms(2026, 6, day, hour, minute, second)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn entries(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn fixture(lamp_on: bool, start: DateTime<Utc>, on: &[&str], off: &[&str]) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let pin = MemoryPin::new(17, lamp_on);
        let relay = Arc::new(RelayController::open(Box::new(pin.clone())).unwrap());
        let timer = Timer::start(
            TimerSchedule::new(entries(on), entries(off)),
            ScheduleStore::new(tmp.path()),
            relay.clone(),
            Vancouver,
            Arc::new(TokioClock::starting_at(start)),
        );
        Fixture {
            timer,
            relay,
            pin,
            _tmp: tmp,
        }
    }

    async fn wait_until_on(relay: &RelayController, on: bool, limit: Duration) -> bool {
        tokio::time::timeout(limit, async {
            while relay.is_on().await != on {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .is_ok()
    }

    #[tokio::test(start_paused = true)]
    async fn fires_off_before_tomorrows_on() {
        let f = fixture(true, at(15, 10, 0, 0), &["09:00"], &["11:00"]);

        tokio::time::sleep(Duration::from_secs(59 * 60)).await;
        assert!(f.relay.is_on().await);

        tokio::time::sleep(Duration::from_secs(2 * 60)).await;
        assert!(!f.relay.is_on().await);
        assert_eq!(f.pin.writes(), 1);

        // 09:00 the next morning.
        tokio::time::sleep(Duration::from_secs(22 * 3600)).await;
        assert!(f.relay.is_on().await);
        assert_eq!(f.pin.writes(), 2);

        f.timer.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn fires_soonest_entry_of_list() {
        let f = fixture(false, at(15, 19, 0, 0), &["08:00", "20:00"], &[]);

        tokio::time::sleep(Duration::from_secs(3600 + 1)).await;
        assert!(f.relay.is_on().await);
        assert_eq!(f.pin.writes(), 1);

        f.timer.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn off_wins_when_both_due_together() {
        let f = fixture(true, at(15, 11, 59, 0), &["12:00"], &["12:00"]);

        tokio::time::sleep(Duration::from_secs(2 * 60)).await;
        assert!(!f.relay.is_on().await);
        assert_eq!(f.pin.writes(), 1);

        f.timer.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn empty_schedule_never_fires() {
        let f = fixture(false, at(15, 12, 0, 0), &[], &[]);

        tokio::time::sleep(Duration::from_secs(3 * 24 * 3600)).await;
        assert_eq!(f.pin.writes(), 0);

        f.timer.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_entry_is_skipped() {
        let f = fixture(false, at(15, 9, 59, 0), &["25:99", "10:00"], &["bogus"]);

        tokio::time::sleep(Duration::from_secs(2 * 60)).await;
        assert!(f.relay.is_on().await);
        assert_eq!(f.pin.writes(), 1);

        f.timer.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_fire_twice_for_one_event() {
        let f = fixture(false, at(15, 9, 59, 0), &["10:00"], &[]);

        tokio::time::sleep(Duration::from_secs(2 * 60)).await;
        f.relay.set_on(false).await;

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(!f.relay.is_on().await);
        assert_eq!(f.pin.writes(), 2);

        f.timer.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn no_relay_writes_after_close() {
        let f = fixture(false, at(15, 9, 59, 30), &["10:00"], &[]);

        f.timer.close().await;
        tokio::time::sleep(Duration::from_secs(10 * 60)).await;

        assert!(!f.relay.is_on().await);
        assert_eq!(f.pin.writes(), 0);

        f.timer.close().await;
    }

    // Runs on the real clock: the old event is an hour out, the new one a
    // second out, so only a recompute can turn the lamp on in time.
    #[tokio::test]
    async fn set_times_reschedules_a_sleeping_timer() {
        let f = fixture(false, at(15, 9, 59, 59), &["11:00"], &[]);
        tokio::time::sleep(Duration::from_millis(50)).await;

        f.timer
            .set_times(TimerSchedule::new(entries(&["10:00"]), Vec::new()))
            .await;

        assert!(wait_until_on(&f.relay, true, Duration::from_secs(5)).await);
        assert_eq!(f.pin.writes(), 1);

        f.timer.close().await;
    }

    #[tokio::test]
    async fn set_times_arms_an_empty_timer() {
        let f = fixture(true, at(15, 21, 59, 59), &[], &[]);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.pin.writes(), 0);

        f.timer
            .set_times(TimerSchedule::new(Vec::new(), entries(&["22:00"])))
            .await;

        assert!(wait_until_on(&f.relay, false, Duration::from_secs(5)).await);

        f.timer.close().await;
    }

    #[tokio::test]
    async fn repeated_set_times_keeps_last_writer() {
        let f = fixture(false, at(15, 12, 0, 0), &[], &[]);

        for hour in ["13:00", "14:00", "15:00"] {
            f.timer
                .set_times(TimerSchedule::new(entries(&[hour]), entries(&["23:00"])))
                .await;
        }

        let expected = TimerSchedule::new(entries(&["15:00"]), entries(&["23:00"]));
        assert_eq!(f.timer.get_times().await, expected);
        assert_eq!(f.timer.next_events().await.turn_on, Some(at(15, 15, 0, 0)));

        f.timer.close().await;
    }

    #[tokio::test]
    async fn schedule_survives_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let pin = MemoryPin::new(17, false);
        let relay = Arc::new(RelayController::open(Box::new(pin)).unwrap());
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(at(15, 12, 0, 0)));
        let expected = TimerSchedule::new(entries(&["06:45", "18:00"]), entries(&["23:30"]));

        let first = Timer::open(
            ScheduleStore::new(tmp.path()),
            relay.clone(),
            Vancouver,
            clock.clone(),
        )
        .await
        .unwrap();
        assert_eq!(first.get_times().await, TimerSchedule::default());
        first.set_times(expected.clone()).await;
        first.close().await;

        let second = Timer::open(ScheduleStore::new(tmp.path()), relay, Vancouver, clock)
            .await
            .unwrap();
        assert_eq!(second.get_times().await, expected);
        second.close().await;
    }

    #[tokio::test]
    async fn persistence_failure_keeps_new_schedule() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let relay = Arc::new(RelayController::open(Box::new(MemoryPin::new(17, false))).unwrap());
        let timer = Timer::start(
            TimerSchedule::default(),
            ScheduleStore::new(blocker.join("data")),
            relay,
            Vancouver,
            Arc::new(TokioClock::starting_at(at(15, 12, 0, 0))),
        );
        let schedule = TimerSchedule::new(entries(&["07:00"]), Vec::new());

        timer.set_times(schedule.clone()).await;

        assert_eq!(timer.get_times().await, schedule);
        timer.close().await;
    }
}
