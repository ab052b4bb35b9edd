//! Sleep-timer task scheduler.
//!
//! The scheduler is the only source of time. Four fixed tasks count down in
//! 24-bit sleep-timer ticks; every compare interrupt subtracts the elapsed
//! time, fires whatever is due and re-arms the compare for the nearest
//! remaining countdown.
//!
//! ```text
//!   ST compare ──▶ advance countdowns ──▶ ADV timing refinement
//!                        │                      │
//!                        ▼                      ▼
//!               calibration gating ──▶ next compare (coalesced onto ADV)
//!                                               │
//!                                               ▼
//!                 run due tasks: ADV ─▶ DAQ ─▶ CAL ─▶ WAIT
//! ```
//!
//! A task that comes due within the scheduling margin before the advertise
//! task is moved onto the advertise tick, so the two share one wakeup.

use log::{debug, trace, warn};

use crate::config::{MiniBleConfig, PacketSpacing};
use crate::error::{Error, Fault, Result};
use crate::events::{EventMask, Signals, TaskId};
use crate::phy::Phy;
use crate::ports::{ClockPort, RadioPort, SleepTimerPort};
use crate::ticks::{self, TICK_MAX};

/// Calibration is skipped when an advertising event is this close.
const CALIBRATION_HORIZON: u32 = ticks::INTERVAL_4_MS;

/// An overshoot this large means the timer had not reached the target yet.
const OVERSHOOT_LIMIT: u32 = TICK_MAX / 2;

// ═══════════════════════════════════════════════════════════════
//  Task table
// ═══════════════════════════════════════════════════════════════

/// One scheduler slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Task {
    pub enabled: bool,
    /// Set by the timer interrupt, cleared once serviced.
    pub due: bool,
    /// Ticks until the next firing; meaningful only while enabled.
    pub countdown: u32,
    /// Ticks between firings.
    pub interval: u32,
}

impl Task {
    const fn new(interval: u32) -> Self {
        Self {
            enabled: false,
            due: false,
            countdown: interval,
            interval,
        }
    }
}

/// Counters kept by the timer interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerStats {
    pub wakeups: u32,
    pub calibrations: u32,
    pub deferred_calibrations: u32,
    pub skipped_advertisements: u32,
}

/// Check `interval` against the absolute bound and, for the advertise task,
/// the BLE advertising-interval range. `INTERVAL_MAX` itself is excluded:
/// a countdown that long cannot be armed.
pub fn validate_interval(task: TaskId, interval: u32) -> Result<()> {
    let (min, max) = match task {
        TaskId::Advertise => (ticks::ADV_INTERVAL_MIN, ticks::ADV_INTERVAL_MAX),
        _ => (ticks::INTERVAL_MIN, ticks::INTERVAL_MAX - 1),
    };
    if (min..=max).contains(&interval) {
        Ok(())
    } else {
        Err(Error::InvalidArgument)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Scheduler engine
// ═══════════════════════════════════════════════════════════════

/// Task table, clock state and the owning sleep-timer handle.
pub struct Scheduler<T> {
    timer: T,
    tasks: [Task; TaskId::COUNT],
    /// Counter value at the previous interrupt.
    last_wakeup: u32,
    /// Value armed into the compare register.
    next_wakeup: u32,
    running: bool,
    pending: EventMask,
    /// Hops left in the current advertising event (interval spacing).
    hops_left: u8,
    /// RC calibration was enabled for the last PM2 wake.
    lf_cal_armed: bool,
    stats: SchedulerStats,
}

impl<T: SleepTimerPort> Scheduler<T> {
    pub fn new(timer: T, default_interval: u32) -> Self {
        Self {
            timer,
            tasks: [Task::new(default_interval); TaskId::COUNT],
            last_wakeup: 0,
            next_wakeup: 0,
            running: false,
            pending: EventMask::EMPTY,
            hops_left: 0,
            lf_cal_armed: false,
            stats: SchedulerStats::default(),
        }
    }

    /// Disable everything and restore the default interval on every task.
    pub fn init(&mut self, default_interval: u32) {
        self.disarm();
        self.tasks = [Task::new(default_interval); TaskId::COUNT];
        self.pending = EventMask::EMPTY;
        self.hops_left = 0;
        self.lf_cal_armed = false;
    }

    pub fn task(&self, id: TaskId) -> Task {
        self.tasks[id.index()]
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn any_enabled(&self) -> bool {
        self.tasks.iter().any(|t| t.enabled)
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Returns `false` if the task was already enabled.
    pub fn enable(&mut self, id: TaskId) -> bool {
        let task = &mut self.tasks[id.index()];
        if task.enabled {
            return false;
        }
        task.enabled = true;
        true
    }

    /// Returns `false` if the task was already disabled.
    pub fn disable(&mut self, id: TaskId) -> bool {
        let task = &mut self.tasks[id.index()];
        if !task.enabled {
            return false;
        }
        task.enabled = false;
        true
    }

    pub fn set_interval(&mut self, id: TaskId, interval: u32) -> Result<()> {
        validate_interval(id, interval)?;
        self.tasks[id.index()].interval = interval;
        Ok(())
    }

    /// Override the next firing of one task without touching its interval.
    pub fn set_countdown(&mut self, id: TaskId, countdown: u32) {
        self.tasks[id.index()].countdown = countdown;
    }

    /// Arm the compare for the smallest enabled countdown and enable the
    /// timer interrupt. The compare never leads the counter by less than
    /// `margin`.
    pub fn arm(&mut self, margin: u32) -> Result<()> {
        let smallest = self
            .tasks
            .iter()
            .filter(|t| t.enabled)
            .map(|t| t.countdown)
            .min()
            .ok_or(Error::AllEventsDisabled)?
            .max(margin);

        let now = self.timer.count();
        self.last_wakeup = now;
        self.next_wakeup = ticks::add(now, smallest);
        self.timer.set_compare(self.next_wakeup);
        self.running = true;
        self.timer.clear_interrupt();
        self.timer.set_interrupt_enabled(true);
        debug!("Scheduler: armed, first wakeup in {} ticks", smallest);
        Ok(())
    }

    /// Stop the timer interrupt and rewind every countdown to its interval.
    pub fn disarm(&mut self) {
        self.running = false;
        self.timer.set_interrupt_enabled(false);
        self.timer.clear_interrupt();
        for task in &mut self.tasks {
            task.countdown = task.interval;
        }
    }

    /// Fold a newly enabled task into a running schedule: its countdown is
    /// measured from the previous interrupt, and an immediate interrupt
    /// recomputes the compare.
    pub fn schedule_task(&mut self, id: TaskId) {
        let since = self.time_since_previous_event();
        let task = &mut self.tasks[id.index()];
        task.countdown = task.interval.saturating_add(since);
        self.next_wakeup = self.timer.count_instant();
        self.timer.trigger_interrupt();
    }

    /// Arm the one-shot WAIT task for `duration` ticks from now.
    pub fn schedule_wait(&mut self, duration: u32) {
        let countdown = if self.running {
            duration.saturating_add(self.time_since_previous_event())
        } else {
            duration
        };
        let wait = &mut self.tasks[TaskId::Wait.index()];
        wait.enabled = true;
        wait.due = false;
        wait.countdown = countdown;
        if self.running {
            self.next_wakeup = self.timer.count_instant();
            self.timer.trigger_interrupt();
        }
    }

    /// Ticks until the armed compare; zero once the interrupt is pending.
    pub fn time_until_next_event(&self) -> u32 {
        if self.timer.interrupt_pending() {
            return 0;
        }
        ticks::remaining(self.timer.count_instant(), self.next_wakeup)
    }

    pub fn time_since_previous_event(&mut self) -> u32 {
        ticks::elapsed(self.last_wakeup, self.timer.count())
    }

    /// Unsynchronised counter read for spin-loop bounds.
    pub fn now(&self) -> u32 {
        self.timer.count_instant()
    }

    /// Hand the fired tasks to the main loop and clear them.
    pub fn take_pending(&mut self) -> EventMask {
        core::mem::take(&mut self.pending)
    }

    /// Put events back for the next [`take_pending`](Self::take_pending).
    pub fn restore_pending(&mut self, events: EventMask) {
        self.pending = self.pending.union(events);
    }

    // ═══════════════════════════════════════════════════════════════
    //  Timer interrupt
    // ═══════════════════════════════════════════════════════════════

    pub fn on_interrupt<R, C>(
        &mut self,
        phy: &mut Phy<R>,
        clock: &mut C,
        signals: &Signals,
        config: &MiniBleConfig,
    ) -> core::result::Result<(), Fault>
    where
        R: RadioPort,
        C: ClockPort,
    {
        self.timer.clear_interrupt();
        let now = self.timer.count();
        let margin = config.schedule_margin();
        self.stats.wakeups = self.stats.wakeups.wrapping_add(1);

        let overshoot = self.advance(now, margin);

        if self.tasks[TaskId::Advertise.index()].due {
            let delay = if config.pseudo_random_delay {
                u32::from(clock.random_byte()) + config.adv_delay_margin
            } else {
                0
            };
            self.refine_advertising(phy.channels().count(), overshoot, delay, signals, config);
        }

        let wait = &mut self.tasks[TaskId::Wait.index()];
        let wait_fired = wait.due;
        if wait_fired {
            wait.enabled = false;
        }

        if !config.power_saving && self.tasks[TaskId::Calibration.index()].due {
            self.gate_calibration(signals);
        }

        match self.next_countdown(margin) {
            Some(countdown) if countdown >= TICK_MAX => return Err(Fault::NoWakeupScheduled),
            Some(countdown) => {
                self.next_wakeup = ticks::add(now, countdown);
                self.timer.set_compare(self.next_wakeup);
            }
            // The one-shot wait was the last enabled task.
            None if wait_fired => {
                self.running = false;
                self.timer.set_interrupt_enabled(false);
                debug!("Scheduler: idle after wait");
            }
            None => return Err(Fault::NoTaskEnabled),
        }

        self.run_due_tasks(phy, clock, signals, config);

        signals.disarm_sleep();
        Ok(())
    }

    /// Subtract elapsed time from every enabled countdown and mark due
    /// tasks. Returns how far past the armed target this interrupt ran.
    fn advance(&mut self, now: u32, margin: u32) -> u32 {
        let delta = ticks::elapsed(self.last_wakeup, now);
        let overshoot = match ticks::elapsed(self.next_wakeup, now) {
            late if late < OVERSHOOT_LIMIT => late,
            _ => 0,
        };
        self.last_wakeup = now;

        for task in self.tasks.iter_mut().filter(|t| t.enabled) {
            if delta.saturating_add(margin) < task.countdown {
                task.countdown -= delta;
            } else {
                task.due = true;
                // Measured from the ideal tick, so the cadence does not drift.
                task.countdown = task.interval.saturating_sub(overshoot).max(margin);
            }
        }
        trace!("Scheduler: delta {} overshoot {}", delta, overshoot);
        overshoot
    }

    /// Spread the hops of an event (interval spacing) and add the
    /// pseudo-random advertising delay after the last one.
    fn refine_advertising(
        &mut self,
        channels: u8,
        overshoot: u32,
        delay: u32,
        signals: &Signals,
        config: &MiniBleConfig,
    ) {
        let adv = &mut self.tasks[TaskId::Advertise.index()];

        if config.packet_spacing == PacketSpacing::Interval && channels > 1 {
            if signals.adv_event_done() {
                self.hops_left = channels;
            }
            self.hops_left = self.hops_left.saturating_sub(1);

            adv.countdown = if self.hops_left > 0 {
                config.packet_interval.saturating_sub(overshoot)
            } else {
                let event_span = config.packet_interval * u32::from(channels - 1);
                adv.interval
                    .saturating_sub(event_span)
                    .saturating_sub(overshoot)
                    .saturating_add(delay)
            };
        } else {
            adv.countdown = adv.countdown.saturating_add(delay);
        }
    }

    /// Keep the RC calibration clear of radio activity: skip it while a
    /// transmission is in flight or an advertising event is imminent.
    fn gate_calibration(&mut self, signals: &Signals) {
        let adv = self.tasks[TaskId::Advertise.index()];
        let adv_imminent = adv.enabled && !adv.due && adv.countdown <= CALIBRATION_HORIZON;
        let radio_busy = adv.due || !signals.tx_done();

        if !adv_imminent && !radio_busy {
            return;
        }

        let cal = &mut self.tasks[TaskId::Calibration.index()];
        cal.due = false;
        cal.countdown = if adv_imminent { adv.countdown } else { CALIBRATION_HORIZON };
        self.stats.deferred_calibrations = self.stats.deferred_calibrations.wrapping_add(1);
        debug!("Scheduler: calibration deferred {} ticks", cal.countdown);
    }

    /// Smallest enabled countdown. A task landing within `margin` of the
    /// advertise countdown is snapped onto it. `None` if nothing is enabled.
    fn next_countdown(&mut self, margin: u32) -> Option<u32> {
        let adv = self.tasks[TaskId::Advertise.index()];
        let mut smallest: Option<u32> = None;

        for task in self.tasks.iter_mut().filter(|t| t.enabled) {
            if smallest.is_none_or(|s| s > task.countdown) {
                if adv.enabled && task.countdown.abs_diff(adv.countdown) < margin {
                    task.countdown = adv.countdown;
                }
                smallest = Some(task.countdown);
            }
        }
        smallest
    }

    fn run_due_tasks<R, C>(&mut self, phy: &mut Phy<R>, clock: &mut C, signals: &Signals, config: &MiniBleConfig)
    where
        R: RadioPort,
        C: ClockPort,
    {
        let adv = &mut self.tasks[TaskId::Advertise.index()];
        if adv.due {
            adv.due = false;
            if signals.tx_done() {
                if signals.adv_event_done() {
                    signals.set_adv_event_done(false);
                    self.pending.insert(TaskId::Advertise);
                }
                signals.set_tx_done(false);
                clock.wait_clock_stable();
                phy.start_tx();
            } else {
                self.stats.skipped_advertisements = self.stats.skipped_advertisements.wrapping_add(1);
                warn!("Scheduler: advertising tick while radio busy");
            }
        }

        let daq = &mut self.tasks[TaskId::DataAcquisition.index()];
        if daq.due {
            daq.due = false;
            self.pending.insert(TaskId::DataAcquisition);
        }

        if config.power_saving && self.lf_cal_armed {
            clock.wait_clock_stable();
            clock.set_lf_calibration(false);
            self.lf_cal_armed = false;
        }

        let cal = &mut self.tasks[TaskId::Calibration.index()];
        if cal.due {
            cal.due = false;
            if config.power_saving {
                clock.set_lf_calibration(true);
                self.lf_cal_armed = true;
            } else {
                clock.start_lf_calibration();
            }
            self.stats.calibrations = self.stats.calibrations.wrapping_add(1);
            self.pending.insert(TaskId::Calibration);
        }

        let wait = &mut self.tasks[TaskId::Wait.index()];
        if wait.due {
            wait.due = false;
            signals.set_wait_complete(true);
            self.pending.insert(TaskId::Wait);
        }
    }
}
