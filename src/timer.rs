//! Timer scheduler: six per-call timers, decremented in audio-sample
//! units on every tick, firing a handler when they reach zero.
//!
//! T0 and T1 share one storage slot (`t0_t1`), since T0 always becomes
//! T1 the moment the far end is first detected and never runs
//! concurrently with it — matching the original engine's
//! `timer_t0_t1`/`far_end_detected` pair. T2 (command-wait) and T4
//! (response-wait) share a slot too, but per spec.md §9's redesign
//! note this is modelled as a tagged `TimerSlot` rather than a raw
//! integer plus a `timer_is_t4` boolean.

pub const SAMPLE_RATE: u32 = 8000;

/// Convert a millisecond duration to a sample count at the engine's
/// fixed 8 kHz sample rate.
pub fn ms_to_samples(ms: u32) -> i64 {
    (ms as i64 * SAMPLE_RATE as i64) / 1000
}

/// The shared T2/T4 slot: idle, counting down a command-wait (T2), or
/// counting down a response-wait (T4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerSlot {
    Idle,
    Command(i64),
    Response(i64),
}

impl TimerSlot {
    fn tick(self, samples: i64) -> (Self, bool) {
        match self {
            TimerSlot::Idle => (self, false),
            TimerSlot::Command(n) => {
                let n = n - samples;
                if n <= 0 {
                    (TimerSlot::Idle, true)
                } else {
                    (TimerSlot::Command(n), false)
                }
            }
            TimerSlot::Response(n) => {
                let n = n - samples;
                if n <= 0 {
                    (TimerSlot::Idle, true)
                } else {
                    (TimerSlot::Response(n), false)
                }
            }
        }
    }

    pub fn is_active(self) -> bool {
        !matches!(self, TimerSlot::Idle)
    }
}

/// Which timer fired on a given `tick` call. At most one of each kind
/// can fire per call, but several independent timers may expire in the
/// same audio tick if the caller passes a large enough sample count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    T0Expired,
    T1Expired,
    T2Expired,
    T4Expired,
    T3Expired,
    T5Expired,
}

/// The six-timer bank for one call.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timers {
    /// Active when > 0; represents T0 until `far_end_detected`, T1 after.
    t0_t1: i64,
    far_end_detected: bool,
    cmd_resp: TimerSlotOpt,
    t3: i64,
    t5: i64,
}

/// `TimerSlot` does not implement `Default`; this newtype gives
/// `Timers` a zero-cost `#[derive(Default)]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TimerSlotOpt(TimerSlot);

impl Default for TimerSlotOpt {
    fn default() -> Self {
        TimerSlotOpt(TimerSlot::Idle)
    }
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start T0 (pre-contact). Resets `far_end_detected`.
    pub fn start_t0(&mut self, t0_ms: u32) {
        self.t0_t1 = ms_to_samples(t0_ms);
        self.far_end_detected = false;
    }

    /// Promote T0 to T1 on first valid far-end signal, per §4.7.
    pub fn promote_to_t1(&mut self, t1_ms: u32) {
        if !self.far_end_detected && self.t0_t1 > 0 {
            self.t0_t1 = ms_to_samples(t1_ms);
            self.far_end_detected = true;
        }
    }

    pub fn cancel_t0_t1(&mut self) {
        self.t0_t1 = 0;
    }

    pub fn start_command(&mut self, t2_ms: u32) {
        self.cmd_resp = TimerSlotOpt(TimerSlot::Command(ms_to_samples(t2_ms)));
    }

    pub fn start_response(&mut self, t4_ms: u32) {
        self.cmd_resp = TimerSlotOpt(TimerSlot::Response(ms_to_samples(t4_ms)));
    }

    /// Cancel T2/T4 if it is currently counting T2 (command-wait); used
    /// when an HDLC flag is received mid-command, per §4.7.
    pub fn cancel_command(&mut self) {
        if matches!(self.cmd_resp.0, TimerSlot::Command(_)) {
            self.cmd_resp = TimerSlotOpt(TimerSlot::Idle);
        }
    }

    pub fn cancel_cmd_resp(&mut self) {
        self.cmd_resp = TimerSlotOpt(TimerSlot::Idle);
    }

    pub fn cmd_resp(&self) -> TimerSlot {
        self.cmd_resp.0
    }

    pub fn start_t3(&mut self, t3_ms: u32) {
        self.t3 = ms_to_samples(t3_ms);
    }

    pub fn cancel_t3(&mut self) {
        self.t3 = 0;
    }

    /// Arm T5 only if it is not already running — repeated RNR/RR
    /// exchanges must not keep resetting the ceiling, per §4.5's
    /// receiver-not-ready handling.
    pub fn start_t5_if_idle(&mut self, t5_ms: u32) {
        if self.t5 <= 0 {
            self.t5 = ms_to_samples(t5_ms);
        }
    }

    pub fn cancel_t5(&mut self) {
        self.t5 = 0;
    }

    pub fn cancel_all(&mut self) {
        self.t0_t1 = 0;
        self.cmd_resp = TimerSlotOpt(TimerSlot::Idle);
        self.t3 = 0;
        self.t5 = 0;
    }

    /// Advance every active timer by `samples` and report every timer
    /// that fired this tick, in T0/T1, T3, T2/T4, T5 order (matching
    /// the original's `t30_timer_update` sequence).
    pub fn tick(&mut self, samples: i64) -> Vec<TimerEvent> {
        let mut fired = Vec::new();
        if self.t0_t1 > 0 {
            self.t0_t1 -= samples;
            if self.t0_t1 <= 0 {
                fired.push(if self.far_end_detected {
                    TimerEvent::T1Expired
                } else {
                    TimerEvent::T0Expired
                });
            }
        }
        if self.t3 > 0 {
            self.t3 -= samples;
            if self.t3 <= 0 {
                fired.push(TimerEvent::T3Expired);
            }
        }
        let was_command = matches!(self.cmd_resp.0, TimerSlot::Command(_));
        let (next, cmd_resp_fired) = self.cmd_resp.0.tick(samples);
        self.cmd_resp = TimerSlotOpt(next);
        if cmd_resp_fired {
            fired.push(if was_command {
                TimerEvent::T2Expired
            } else {
                TimerEvent::T4Expired
            });
        }
        if self.t5 > 0 {
            self.t5 -= samples;
            if self.t5 <= 0 {
                fired.push(TimerEvent::T5Expired);
            }
        }
        fired
    }
}
