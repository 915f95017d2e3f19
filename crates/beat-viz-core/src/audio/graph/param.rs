//! Parameter automation timeline (set-value and linear-ramp events).

use super::ParamEvent;

#[derive(Clone, Copy, Debug)]
enum Automation {
    Set { value: f32, time: f64 },
    Ramp { value: f32, time: f64 },
}

impl Automation {
    fn time(&self) -> f64 {
        match *self {
            Automation::Set { time, .. } | Automation::Ramp { time, .. } => time,
        }
    }

    fn value(&self) -> f32 {
        match *self {
            Automation::Set { value, .. } | Automation::Ramp { value, .. } => value,
        }
    }
}

/// An automatable value.
///
/// Events are kept sorted by time. A ramp interpolates from the value and time
/// of the event before it (or the anchor once older events are compacted away).
#[derive(Clone, Debug)]
pub(crate) struct Param {
    anchor_value: f32,
    anchor_time: f64,
    events: Vec<Automation>,
}

impl Param {
    pub fn new(value: f32) -> Self {
        Self {
            anchor_value: value,
            anchor_time: 0.0,
            events: Vec::new(),
        }
    }

    pub fn apply(&mut self, event: ParamEvent) {
        match event {
            ParamEvent::SetValue { value, at } => self.insert(Automation::Set { value, time: at }),
            ParamEvent::LinearRamp { value, end } => {
                self.insert(Automation::Ramp { value, time: end })
            }
            ParamEvent::CancelFrom { at } => self.events.retain(|e| e.time() < at),
        }
    }

    fn insert(&mut self, event: Automation) {
        // Equal times keep insertion order
        let idx = self.events.partition_point(|e| e.time() <= event.time());
        self.events.insert(idx, event);
    }

    pub fn value_at(&self, t: f64) -> f32 {
        let mut value = self.anchor_value;
        let mut time = self.anchor_time;

        for event in &self.events {
            match *event {
                Automation::Set { value: v, time: at } => {
                    if at > t {
                        break;
                    }
                    value = v;
                    time = at;
                }
                Automation::Ramp { value: v, time: end } => {
                    if end <= t {
                        value = v;
                        time = end;
                    } else {
                        let span = end - time;
                        if span <= 0.0 {
                            return v;
                        }
                        let frac = ((t - time) / span).clamp(0.0, 1.0) as f32;
                        return value + (v - value) * frac;
                    }
                }
            }
        }

        value
    }

    /// Fold events that are entirely in the past into the anchor
    pub fn compact(&mut self, now: f64) {
        let settled = self
            .events
            .iter()
            .take_while(|e| e.time() <= now)
            .count();
        if settled == 0 {
            return;
        }
        let last = self.events[settled - 1];
        self.anchor_value = last.value();
        self.anchor_time = last.time();
        self.events.drain(..settled);
    }
}
