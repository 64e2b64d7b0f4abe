//! Automatable control values.
//!
//! An [`AudioParam`] holds a current value plus a time-ordered list of scheduled
//! changes. The render side calls [`AudioParam::advance`] once per frame with the
//! frame's time; the value follows whichever curve is active at that moment.

const MAX_EVENTS: usize = 32;
// exponential curves can't reach or cross zero
const EXP_FLOOR: f32 = 1e-4;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ParamEvent {
    /// jump now, dropping anything scheduled
    SetValue(f32),
    SetValueAtTime { value: f32, time: f64 },
    LinearRampTo { value: f32, end_time: f64 },
    ExponentialRampTo { value: f32, end_time: f64 },
    /// exponential approach to `target` with time constant `time_constant` seconds
    SetTarget { target: f32, start_time: f64, time_constant: f64 },
    CancelScheduled { from: f64 },
}

impl ParamEvent {
    /// Same curve and timing, value mirrored to `1 - v`.
    pub fn complement(self) -> Self {
        match self {
            ParamEvent::SetValue(v) => ParamEvent::SetValue(1.0 - v),
            ParamEvent::SetValueAtTime { value, time } => ParamEvent::SetValueAtTime { value: 1.0 - value, time },
            ParamEvent::LinearRampTo { value, end_time } => ParamEvent::LinearRampTo { value: 1.0 - value, end_time },
            ParamEvent::ExponentialRampTo { value, end_time } => {
                ParamEvent::ExponentialRampTo { value: 1.0 - value, end_time }
            }
            ParamEvent::SetTarget { target, start_time, time_constant } => {
                ParamEvent::SetTarget { target: 1.0 - target, start_time, time_constant }
            }
            ParamEvent::CancelScheduled { from } => ParamEvent::CancelScheduled { from },
        }
    }

    /// Same event with its value(s) clamped into `[min, max]`.
    pub fn clamped(self, min: f32, max: f32) -> Self {
        let c = |v: f32| v.clamp(min, max);
        match self {
            ParamEvent::SetValue(v) => ParamEvent::SetValue(c(v)),
            ParamEvent::SetValueAtTime { value, time } => ParamEvent::SetValueAtTime { value: c(value), time },
            ParamEvent::LinearRampTo { value, end_time } => ParamEvent::LinearRampTo { value: c(value), end_time },
            ParamEvent::ExponentialRampTo { value, end_time } => {
                ParamEvent::ExponentialRampTo { value: c(value), end_time }
            }
            ParamEvent::SetTarget { target, start_time, time_constant } => {
                ParamEvent::SetTarget { target: c(target), start_time, time_constant }
            }
            cancel @ ParamEvent::CancelScheduled { .. } => cancel,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Scheduled {
    Set { value: f32, time: f64 },
    Linear { value: f32, end_time: f64 },
    Exponential { value: f32, end_time: f64 },
    Target { target: f32, start_time: f64, time_constant: f64 },
}

impl Scheduled {
    fn time(&self) -> f64 {
        match *self {
            Scheduled::Set { time, .. } => time,
            Scheduled::Linear { end_time, .. } | Scheduled::Exponential { end_time, .. } => end_time,
            Scheduled::Target { start_time, .. } => start_time,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AudioParam {
    value: f32,
    min: f32,
    max: f32,
    // time and value the next curve starts from
    anchor: (f64, f32),
    events: Vec<Scheduled>,
}

impl AudioParam {
    pub fn new(value: f32, min: f32, max: f32) -> Self {
        let value = value.clamp(min, max);
        Self {
            value,
            min,
            max,
            anchor: (0.0, value),
            events: Vec::with_capacity(MAX_EVENTS),
        }
    }

    pub fn gain(value: f32) -> Self {
        Self::new(value, 0.0, f32::MAX)
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn has_automation(&self) -> bool {
        !self.events.is_empty()
    }

    /// Applies a control event received at render time `now`.
    pub fn apply(&mut self, event: ParamEvent, now: f64) {
        match event.clamped(self.min, self.max) {
            ParamEvent::SetValue(v) => {
                self.events.clear();
                self.value = v;
                self.anchor = (now, v);
            }
            ParamEvent::SetValueAtTime { value, time } => self.insert(Scheduled::Set { value, time }),
            ParamEvent::LinearRampTo { value, end_time } => self.insert(Scheduled::Linear { value, end_time }),
            ParamEvent::ExponentialRampTo { value, end_time } => {
                self.insert(Scheduled::Exponential { value, end_time })
            }
            ParamEvent::SetTarget { target, start_time, time_constant } => self.insert(Scheduled::Target {
                target,
                start_time,
                time_constant: time_constant.max(1e-6),
            }),
            ParamEvent::CancelScheduled { from } => {
                self.events.retain(|e| e.time() < from);
                if self.anchor.0 < now {
                    self.anchor = (now, self.value);
                }
            }
        }
    }

    fn insert(&mut self, event: Scheduled) {
        if self.events.len() >= MAX_EVENTS {
            // full: drop the furthest-out event rather than grow on the render thread
            self.events.pop();
        }
        let at = self.events.partition_point(|e| e.time() <= event.time());
        self.events.insert(at, event);
    }

    /// Moves the parameter to time `t` and returns its value there.
    pub fn advance(&mut self, t: f64) -> f32 {
        while let Some(&head) = self.events.first() {
            match head {
                Scheduled::Set { value, time } => {
                    if time > t {
                        break;
                    }
                    self.finish(time, value);
                }
                Scheduled::Linear { value, end_time } => {
                    if end_time <= t {
                        self.finish(end_time, value);
                        continue;
                    }
                    let (t0, v0) = self.anchor;
                    if t > t0 {
                        let frac = ((t - t0) / (end_time - t0)) as f32;
                        self.value = v0 + (value - v0) * frac;
                    }
                    break;
                }
                Scheduled::Exponential { value, end_time } => {
                    if end_time <= t {
                        self.finish(end_time, value);
                        continue;
                    }
                    let (t0, v0) = self.anchor;
                    if t > t0 {
                        let frac = ((t - t0) / (end_time - t0)) as f32;
                        let from = floor_magnitude(v0);
                        let to = floor_magnitude(value);
                        self.value = if from.signum() == to.signum() {
                            from * (to / from).powf(frac)
                        } else {
                            v0
                        };
                    }
                    break;
                }
                Scheduled::Target { target, start_time, time_constant } => {
                    if start_time > t {
                        break;
                    }
                    if self.anchor.0 < start_time {
                        self.anchor = (start_time, self.value);
                    }
                    // a following event takes over once its own time comes
                    let handover = self.events.get(1).map(|next| match next {
                        Scheduled::Linear { .. } | Scheduled::Exponential { .. } => start_time,
                        other => other.time(),
                    });
                    match handover {
                        Some(at) if at <= t => {
                            let v = self.target_value(target, time_constant, at);
                            self.value = v;
                            self.events.remove(0);
                            self.anchor = (at.max(start_time), v);
                        }
                        _ => {
                            self.value = self.target_value(target, time_constant, t);
                            break;
                        }
                    }
                }
            }
        }
        self.value
    }

    fn target_value(&self, target: f32, time_constant: f64, t: f64) -> f32 {
        let (t0, v0) = self.anchor;
        let decay = (-(t - t0).max(0.0) / time_constant).exp() as f32;
        target + (v0 - target) * decay
    }

    fn finish(&mut self, time: f64, value: f32) {
        self.value = value;
        self.anchor = (time, value);
        self.events.remove(0);
    }
}

fn floor_magnitude(v: f32) -> f32 {
    if v.abs() < EXP_FLOOR {
        if v.is_sign_negative() { -EXP_FLOOR } else { EXP_FLOOR }
    } else {
        v
    }
}
