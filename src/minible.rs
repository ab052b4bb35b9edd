//! Public API and the bridge between the main loop and the two interrupts.
//!
//! Each peripheral handle and each piece of shared state sits in its own
//! `critical_section::Mutex<RefCell<_>>`. Main-loop calls take a critical
//! section for every read-modify-write; interrupt handlers do the same, so
//! the code is correct whether or not the platform masks interrupts on
//! entry. Busy-waits never hold a critical section.
//!
//! ```text
//!   main loop                          interrupts
//!   ─────────                          ──────────
//!   enable_task ─┐                 ┌── on_interrupt(SleepTimer)
//!   wait ────────┼─▶ Scheduler ◀───┤
//!   wait_for_next_event ─▶ CpuPort │
//!   set_advertising_data ─▶ Phy ◀──┴── on_interrupt(Radio)
//! ```

use core::cell::RefCell;

use critical_section::Mutex;
use log::{debug, error, info, warn};

use crate::address::DeviceAddress;
use crate::config::{AddressSource, MiniBleConfig, PacketSpacing};
use crate::diagnostics::Diagnostics;
use crate::error::{Error, Fault, Result};
use crate::events::{EventMask, Signals, TaskId};
use crate::phy::pdu::FifoFrame;
use crate::phy::{ChannelMap, Phy, PhyMode};
use crate::ports::{ClockPort, CpuPort, Interrupt, PowerMode, RadioPort, SleepTimerPort};
use crate::scheduler::{Scheduler, Task};
use crate::ticks;

/// Longest an advertising event may keep a busy-wait spinning.
const ADV_EVENT_TIMEOUT: u32 = ticks::INTERVAL_100_MS;

/// Below this many ticks the crystal is kept running (PM0 only).
const DEEP_SLEEP_MIN_TICKS: u32 = 100;

/// The miniBLE broadcaster: scheduler, radio PHY and their shared flags.
pub struct MiniBle<R, T, C, P> {
    phy: Mutex<RefCell<Phy<R>>>,
    scheduler: Mutex<RefCell<Scheduler<T>>>,
    clock: Mutex<RefCell<C>>,
    cpu: Mutex<RefCell<P>>,
    signals: Signals,
    config: MiniBleConfig,
}

impl<R, T, C, P> MiniBle<R, T, C, P>
where
    R: RadioPort,
    T: SleepTimerPort,
    C: ClockPort,
    P: CpuPort,
{
    /// Take ownership of the peripherals. Nothing is touched until
    /// [`init`](Self::init).
    pub fn new(radio: R, timer: T, clock: C, cpu: P, config: MiniBleConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            phy: Mutex::new(RefCell::new(Phy::new(radio, config.advertise_flags))),
            scheduler: Mutex::new(RefCell::new(Scheduler::new(timer, config.default_interval))),
            clock: Mutex::new(RefCell::new(clock)),
            cpu: Mutex::new(RefCell::new(cpu)),
            signals: Signals::new(),
            config,
        })
    }

    pub fn config(&self) -> &MiniBleConfig {
        &self.config
    }

    // ═══════════════════════════════════════════════════════════════
    //  Initialisation
    // ═══════════════════════════════════════════════════════════════

    /// Reset the task table, bring up the radio, derive the device address
    /// and seed the random generator from it.
    pub fn init(&self) -> Result<()> {
        let address = critical_section::with(|cs| {
            let mut scheduler = self.scheduler.borrow_ref_mut(cs);
            let mut phy = self.phy.borrow_ref_mut(cs);
            let mut clock = self.clock.borrow_ref_mut(cs);

            scheduler.init(self.config.default_interval);
            phy.init(self.config.tx_power);
            self.cpu.borrow_ref_mut(cs).configure_interrupt_priorities();

            let address = match self.config.address {
                AddressSource::StaticRandom => DeviceAddress::static_random(clock.unique_id()),
                AddressSource::Public(bytes) => DeviceAddress::public(bytes),
            }?;
            phy.set_address(address);
            clock.seed_random(address.random_seed());
            clock.set_lf_calibration(false);

            self.signals.set_tx_done(true);
            self.signals.set_adv_event_done(true);
            self.signals.set_wait_complete(false);
            Ok::<_, Error>(address)
        })?;
        info!("miniBLE: initialised, address {}", address);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════
    //  Scheduler control
    // ═══════════════════════════════════════════════════════════════

    /// Arm the sleep timer for the nearest enabled task.
    pub fn start_scheduler(&self) -> Result<()> {
        let any_enabled = critical_section::with(|cs| self.scheduler.borrow_ref(cs).any_enabled());
        if !any_enabled {
            return Err(Error::AllEventsDisabled);
        }
        self.spin_until(Signals::adv_event_done);
        let margin = self.config.schedule_margin();
        critical_section::with(|cs| self.scheduler.borrow_ref_mut(cs).arm(margin))?;
        info!("miniBLE: scheduler started");
        self.service_interrupts();
        Ok(())
    }

    /// Stop the sleep timer once the current advertising event is over and
    /// rewind every countdown.
    pub fn reset_scheduler(&self) {
        self.spin_until(Signals::adv_event_done);
        critical_section::with(|cs| self.scheduler.borrow_ref_mut(cs).disarm());
        debug!("miniBLE: scheduler reset");
    }

    pub fn is_running(&self) -> bool {
        critical_section::with(|cs| self.scheduler.borrow_ref(cs).is_running())
    }

    pub fn enable_task(&self, task: TaskId) -> Result<()> {
        let restart = critical_section::with(|cs| {
            let mut scheduler = self.scheduler.borrow_ref_mut(cs);
            if !scheduler.enable(task) {
                return None;
            }
            if scheduler.is_running() {
                scheduler.schedule_task(task);
                Some(false)
            } else {
                Some(true)
            }
        });

        match restart {
            None => Ok(()),
            Some(false) => {
                debug!("miniBLE: {:?} folded into running schedule", task);
                self.service_interrupts();
                Ok(())
            }
            Some(true) => {
                self.reset_scheduler();
                self.start_scheduler()
            }
        }
    }

    /// Stop future firings of `task`. Disabling the last enabled task stops
    /// the sleep timer.
    pub fn disable_task(&self, task: TaskId) {
        let abandon_event = task == TaskId::Advertise && self.config.packet_spacing == PacketSpacing::Interval;
        if abandon_event {
            self.spin_until(Signals::tx_done);
        }

        critical_section::with(|cs| {
            let mut scheduler = self.scheduler.borrow_ref_mut(cs);
            if !scheduler.disable(task) {
                return;
            }
            // Remaining hops will never be issued; close the event here.
            if abandon_event && !self.signals.adv_event_done() {
                let mut phy = self.phy.borrow_ref_mut(cs);
                let first = phy.channels().first();
                if let Err(e) = phy.set_channel(first) {
                    warn!("miniBLE: could not park radio on {:?}: {}", first, e);
                }
                self.signals.set_adv_event_done(true);
            }
            if !scheduler.any_enabled() {
                scheduler.disarm();
                info!("miniBLE: last task disabled, scheduler stopped");
            }
        });
    }

    /// Change a task's repeat period. With `apply_now` the schedule is
    /// restarted so the new cadence begins immediately.
    pub fn set_task_interval(&self, task: TaskId, interval: u32, apply_now: bool) -> Result<()> {
        critical_section::with(|cs| self.scheduler.borrow_ref_mut(cs).set_interval(task, interval))?;
        debug!("miniBLE: {:?} interval {} ticks", task, interval);
        if apply_now {
            self.reset_scheduler();
            if critical_section::with(|cs| self.scheduler.borrow_ref(cs).any_enabled()) {
                self.start_scheduler()?;
            }
        }
        Ok(())
    }

    /// Snapshot of one scheduler slot.
    pub fn task(&self, task: TaskId) -> Task {
        critical_section::with(|cs| self.scheduler.borrow_ref(cs).task(task))
    }

    pub fn time_until_next_event(&self) -> u32 {
        critical_section::with(|cs| self.scheduler.borrow_ref(cs).time_until_next_event())
    }

    pub fn time_since_previous_event(&self) -> u32 {
        critical_section::with(|cs| self.scheduler.borrow_ref_mut(cs).time_since_previous_event())
    }

    // ═══════════════════════════════════════════════════════════════
    //  Main-loop blocking primitives
    // ═══════════════════════════════════════════════════════════════

    /// Sleep until the next interrupt and return the tasks that fired.
    ///
    /// Too little time left for a power mode means spinning at full power;
    /// otherwise PM2 is used when power saving is on, no transmission is in
    /// flight and at least [`DEEP_SLEEP_MIN_TICKS`] remain, and PM0 if not.
    pub fn wait_for_next_event(&self) -> EventMask {
        let (time_left, carried) = critical_section::with(|cs| {
            let mut scheduler = self.scheduler.borrow_ref_mut(cs);
            let carried = scheduler.take_pending();
            if carried.is_empty() {
                self.signals.arm_sleep();
            }
            (scheduler.time_until_next_event(), carried)
        });
        // Events raised during a blocking call are reported without sleeping.
        if !carried.is_empty() {
            return carried;
        }

        if time_left < self.config.schedule_margin() {
            self.spin_while_armed(time_left);
        } else {
            let mode = if self.config.power_saving && self.signals.tx_done() && time_left >= DEEP_SLEEP_MIN_TICKS {
                PowerMode::Sleep
            } else {
                PowerMode::Idle
            };

            if mode == PowerMode::Sleep {
                self.spin_until(|_| critical_section::with(|cs| self.phy.borrow_ref(cs).is_idle()));
                critical_section::with(|cs| self.phy.borrow_ref_mut(cs).set_lle_enabled(false));
            }

            critical_section::with(|cs| {
                self.cpu.borrow_ref_mut(cs).enter(mode, self.signals.sleep_flag());
            });

            if mode == PowerMode::Sleep {
                critical_section::with(|cs| self.phy.borrow_ref_mut(cs).set_lle_enabled(true));
            }
        }

        self.service_interrupts();
        critical_section::with(|cs| self.scheduler.borrow_ref_mut(cs).take_pending())
    }

    /// Count out the rest of `duration` on the counter, still taking
    /// interrupts.
    fn spin_for(&self, started: u32, duration: u32) {
        while ticks::elapsed(started, self.now()) < duration {
            self.relax();
            self.service_interrupts();
        }
    }

    fn spin_while_armed(&self, time_left: u32) {
        let started = self.now();
        let bound = time_left + self.config.schedule_margin();
        while self.signals.sleep_flag().load(core::sync::atomic::Ordering::Acquire) {
            if ticks::elapsed(started, self.now()) > bound {
                self.signals.disarm_sleep();
                break;
            }
            self.relax();
            self.service_interrupts();
        }
    }

    /// Block for at least `duration` ticks using the one-shot WAIT task.
    /// Other tasks keep their cadence; events they raise meanwhile stay
    /// pending.
    pub fn wait(&self, duration: u32) -> Result<()> {
        if !(1..ticks::INTERVAL_MAX).contains(&duration) {
            return Err(Error::InvalidArgument);
        }
        let started = self.now();
        // A compare this close to the counter would be missed.
        if duration < self.config.schedule_margin() {
            self.spin_for(started, duration);
            return Ok(());
        }
        self.signals.set_wait_complete(false);

        let running = critical_section::with(|cs| {
            let mut scheduler = self.scheduler.borrow_ref_mut(cs);
            scheduler.schedule_wait(duration);
            scheduler.is_running()
        });
        if running {
            self.service_interrupts();
        } else {
            self.start_scheduler()?;
        }

        let mut carried = EventMask::EMPTY;
        while !self.signals.wait_complete() {
            carried = carried.union(self.wait_for_next_event());
        }
        carried.remove(TaskId::Wait);

        if !carried.is_empty() {
            critical_section::with(|cs| self.scheduler.borrow_ref_mut(cs).restore_pending(carried));
        }
        // WAIT can be coalesced up to one margin early.
        self.spin_for(started, duration);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════
    //  Advertising
    // ═══════════════════════════════════════════════════════════════

    /// Load a new payload (≤27 bytes). Refused while an event is on air.
    pub fn set_advertising_data(&self, payload: &[u8]) -> Result<()> {
        critical_section::with(|cs| {
            if !self.signals.tx_done() || !self.signals.adv_event_done() {
                return Err(Error::RadioBusy);
            }
            self.phy.borrow_ref_mut(cs).load_packet(payload)
        })
    }

    /// Copy of the payload last loaded.
    pub fn advertising_data(&self) -> heapless::Vec<u8, 27> {
        critical_section::with(|cs| {
            let mut data = heapless::Vec::new();
            let _ = data.extend_from_slice(self.phy.borrow_ref(cs).payload());
            data
        })
    }

    /// Block until the advertising event in flight, if any, has finished.
    pub fn wait_for_advertising_event(&self) {
        self.spin_until(Signals::adv_event_done);
    }

    /// Start an advertising event now, outside the schedule.
    pub fn send_advertising_data(&self) -> Result<()> {
        critical_section::with(|cs| {
            if !self.signals.tx_done() || !self.signals.adv_event_done() {
                return Err(Error::RadioBusy);
            }
            self.signals.set_adv_event_done(false);
            self.signals.set_tx_done(false);
            self.clock.borrow_ref_mut(cs).wait_clock_stable();
            self.phy.borrow_ref_mut(cs).start_tx();
            Ok(())
        })?;
        debug!("miniBLE: immediate advertising event");
        self.service_interrupts();
        Ok(())
    }

    /// Select the channels every event walks through.
    pub fn set_advertising_channels(&self, mask: u8) -> Result<()> {
        let channels = ChannelMap::from_bits(mask)?;
        self.spin_until(Signals::adv_event_done);
        critical_section::with(|cs| self.phy.borrow_ref_mut(cs).set_channels(channels))?;
        debug!("miniBLE: {} advertising channel(s)", channels.count());
        Ok(())
    }

    pub fn advertising_channels(&self) -> ChannelMap {
        critical_section::with(|cs| self.phy.borrow_ref(cs).channels())
    }

    pub fn set_output_power(&self, level: u8) -> Result<()> {
        critical_section::with(|cs| self.phy.borrow_ref_mut(cs).set_output_power(level, &self.signals))
    }

    pub fn output_power(&self) -> u8 {
        critical_section::with(|cs| self.phy.borrow_ref(cs).output_power())
    }

    /// Address derived at init; `None` before [`init`](Self::init).
    pub fn device_address(&self) -> Option<DeviceAddress> {
        critical_section::with(|cs| self.phy.borrow_ref(cs).address())
    }

    pub fn stats(&self) -> Diagnostics {
        critical_section::with(|cs| {
            let phy = self.phy.borrow_ref(cs);
            let scheduler = self.scheduler.borrow_ref(cs).stats();
            Diagnostics {
                packets_sent: phy.packets_sent(),
                adv_events: phy.adv_events(),
                wakeups: scheduler.wakeups,
                calibrations: scheduler.calibrations,
                deferred_calibrations: scheduler.deferred_calibrations,
                skipped_advertisements: scheduler.skipped_advertisements,
            }
        })
    }

    // ═══════════════════════════════════════════════════════════════
    //  Direct test mode
    // ═══════════════════════════════════════════════════════════════

    /// Stop the schedule and start repeating an LE test packet.
    pub(crate) fn start_test_transmitter(&self, freq: u8, frame: &FifoFrame) {
        self.reset_scheduler();
        self.spin_until(Signals::tx_done);
        critical_section::with(|cs| self.phy.borrow_ref_mut(cs).enter_test_mode(freq, frame));
        info!("miniBLE: transmitter test on register {}", freq);
    }

    /// Leave test mode and return to the broadcast configuration.
    pub(crate) fn end_test(&self) -> Result<()> {
        critical_section::with(|cs| {
            let mut phy = self.phy.borrow_ref_mut(cs);
            if phy.mode() != PhyMode::DirectTest {
                return Ok(());
            }
            let power = phy.output_power();
            phy.exit_test_mode(power)
        })?;
        info!("miniBLE: test ended");
        Ok(())
    }

    pub(crate) fn test_packets_sent(&self) -> u32 {
        critical_section::with(|cs| self.phy.borrow_ref(cs).packets_sent())
    }

    // ═══════════════════════════════════════════════════════════════
    //  Interrupt dispatch
    // ═══════════════════════════════════════════════════════════════

    /// Run the handler bound to `irq`. Board crates call this from the
    /// vector table; a fatal fault never returns.
    pub fn on_interrupt(&self, irq: Interrupt) {
        let outcome = match irq {
            Interrupt::SleepTimer => critical_section::with(|cs| {
                let mut scheduler = self.scheduler.borrow_ref_mut(cs);
                let mut phy = self.phy.borrow_ref_mut(cs);
                let mut clock = self.clock.borrow_ref_mut(cs);
                scheduler.on_interrupt(&mut *phy, &mut *clock, &self.signals, &self.config)
            }),
            Interrupt::Radio => critical_section::with(|cs| {
                // With the timer stopped nobody would issue the remaining hops.
                let spacing = if self.scheduler.borrow_ref(cs).is_running() {
                    self.config.packet_spacing
                } else {
                    PacketSpacing::BackToBack
                };
                self.phy.borrow_ref_mut(cs).on_interrupt(&self.signals, spacing)
            }),
        };
        if let Err(fault) = outcome {
            self.halt(fault);
        }
    }

    /// Dispatch interrupts the CPU port is holding (polled platforms and
    /// the simulator). A no-op on vectored hardware.
    pub fn service_interrupts(&self) {
        while let Some(irq) = critical_section::with(|cs| self.cpu.borrow_ref_mut(cs).take_interrupt()) {
            self.on_interrupt(irq);
        }
    }

    fn halt(&self, fault: Fault) -> ! {
        error!("miniBLE: fatal fault: {}", fault);
        critical_section::with(|cs| self.cpu.borrow_ref_mut(cs).halt(fault));
        loop {
            core::hint::spin_loop();
        }
    }

    // ── Bounded busy-waits ────────────────────────────────────

    /// Spin until `done` holds. Worst case is one advertising event; going
    /// past [`ADV_EVENT_TIMEOUT`] means the radio has stalled.
    fn spin_until(&self, done: impl Fn(&Signals) -> bool) {
        let started = self.now();
        while !done(&self.signals) {
            if ticks::elapsed(started, self.now()) > ADV_EVENT_TIMEOUT {
                self.halt(Fault::AdvertisingStalled);
            }
            self.relax();
            self.service_interrupts();
        }
    }

    fn relax(&self) {
        critical_section::with(|cs| self.cpu.borrow_ref_mut(cs).relax());
    }

    fn now(&self) -> u32 {
        critical_section::with(|cs| self.scheduler.borrow_ref(cs).now())
    }
}
