use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::TimeInfo;
use crate::math;
use crate::port::connections::PortConnection;
use crate::port::identifier::{PortFlag, PortFlow, PortIdentifier, PortUuid};
use crate::port::Port;

/// Real values above this count as "on" for toggle ports.
pub const TOGGLE_THRESHOLD: f32 = 1e-4;

const LOG_RANGE_EPSILON: f32 = 1e-20;

/// Real value range of a control port, plus the value that renders as the
/// visual zero line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortRange {
    pub min: f32,
    pub max: f32,
    pub zero: f32,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 1.0,
            zero: 0.0,
        }
    }
}

impl PortRange {
    pub fn new(min: f32, max: f32, zero: f32) -> Self {
        Self { min, max, zero }
    }

    pub fn size(&self) -> f32 {
        self.max - self.min
    }

    pub fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.min, self.max)
    }
}

/// Pulls the current normalized automation value for a global frame, or
/// `None` when no automation applies. Must be O(1)-ish, it runs per block
/// on the realtime thread.
pub type AutomationReader = Box<dyn FnMut(u64) -> Option<f32> + Send>;

/// Called after the snapped control value actually changed and the caller
/// asked for owner notification.
pub type ChangeHook = Arc<dyn Fn(&PortIdentifier, f32) + Send + Sync>;

/// One resolved incoming CV edge: the connection settings plus the source
/// port's buffer for the current block. The schedule compiler rebuilds
/// these between blocks so `process_block` never touches the manager.
pub struct CvInput<'a> {
    pub conn: &'a PortConnection,
    pub buf: &'a [f32],
}

/// Scalar port with normalized/real mapping, snapping, automation and CV
/// modulation.
pub struct ControlPort {
    pub port: Port,
    pub range: PortRange,
    pub default_value: f32,
    control: f32,
    unsnapped_control: f32,
    base_value: f32,
    last_change: Option<Instant>,
    value_changed_from_reading: bool,
    automation_reader: Option<AutomationReader>,
    change_hook: Option<ChangeHook>,
}

impl fmt::Debug for ControlPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlPort")
            .field("id", &self.port.id.sym)
            .field("range", &self.range)
            .field("control", &self.control)
            .field("base_value", &self.base_value)
            .finish_non_exhaustive()
    }
}

impl ControlPort {
    pub fn new(id: PortIdentifier, range: PortRange, default_value: f32) -> Self {
        let mut this = Self {
            port: Port::new(id, 0),
            range,
            default_value,
            control: default_value,
            unsnapped_control: default_value,
            base_value: default_value,
            last_change: None,
            value_changed_from_reading: false,
            automation_reader: None,
            change_hook: None,
        };
        this.set_control_value(default_value, false, false);
        this
    }

    pub fn uuid(&self) -> PortUuid {
        self.port.uuid()
    }

    pub fn id(&self) -> &PortIdentifier {
        &self.port.id
    }

    /// Current snapped, clamped real value.
    pub fn control(&self) -> f32 {
        self.control
    }

    pub fn unsnapped_control(&self) -> f32 {
        self.unsnapped_control
    }

    pub fn base_value(&self) -> f32 {
        self.base_value
    }

    pub fn last_change(&self) -> Option<Instant> {
        self.last_change
    }

    /// Whether the most recent change came from automation rather than a
    /// user gesture.
    pub fn value_changed_from_reading(&self) -> bool {
        self.value_changed_from_reading
    }

    pub fn is_toggled(&self) -> bool {
        self.control > TOGGLE_THRESHOLD
    }

    pub fn set_change_hook(&mut self, hook: ChangeHook) {
        self.change_hook = Some(hook);
    }

    pub fn set_automation_reader(&mut self, reader: AutomationReader) {
        self.automation_reader = Some(reader);
    }

    pub fn normalized_val_to_real(&self, normalized: f32) -> f32 {
        let flags = &self.port.id.flags;
        if flags.test(PortFlag::Toggle) {
            if normalized >= TOGGLE_THRESHOLD { 1.0 } else { 0.0 }
        } else if flags.test(PortFlag::Logarithmic) {
            let min = self.range.min.max(LOG_RANGE_EPSILON);
            let max = self.range.max.max(LOG_RANGE_EPSILON);
            min * (max / min).powf(normalized)
        } else if flags.test(PortFlag::ChannelFader) {
            math::amp_from_fader(normalized)
        } else {
            self.range.min + normalized * self.range.size()
        }
    }

    pub fn real_val_to_normalized(&self, real: f32) -> f32 {
        let flags = &self.port.id.flags;
        if flags.test(PortFlag::Toggle) {
            real
        } else if flags.test(PortFlag::Logarithmic) {
            let min = self.range.min.max(LOG_RANGE_EPSILON);
            let max = self.range.max.max(LOG_RANGE_EPSILON);
            let real = real.max(LOG_RANGE_EPSILON);
            (real / min).ln() / (max / min).ln()
        } else if flags.test(PortFlag::ChannelFader) {
            math::fader_from_amp(real)
        } else if self.range.size() == 0.0 {
            0.0
        } else {
            (real - self.range.min) / self.range.size()
        }
    }

    fn snapped_val_from_val(&self, val: f32) -> f32 {
        let flags = &self.port.id.flags;
        if flags.test(PortFlag::Toggle) {
            if val > TOGGLE_THRESHOLD { 1.0 } else { 0.0 }
        } else if flags.test(PortFlag::Integer) {
            val.round()
        } else {
            val
        }
    }

    pub fn get_control_value(&self, normalized: bool) -> f32 {
        if normalized {
            self.real_val_to_normalized(self.control)
        } else {
            self.control
        }
    }

    /// Stores a new value. The unsnapped value is kept verbatim, the live
    /// value is snapped and clamped. The change hook only fires when the
    /// snapped value actually moved and `notify_owner` is set.
    pub fn set_control_value(&mut self, value: f32, is_normalized: bool, notify_owner: bool) {
        let base = if is_normalized {
            self.range.min + value * self.range.size()
        } else {
            value
        };
        self.unsnapped_control = base;
        let snapped = self.range.clamp(self.snapped_val_from_val(base));
        self.base_value = snapped;
        if !math::floats_equal(self.control, snapped) {
            self.control = snapped;
            self.last_change = Some(Instant::now());
            self.value_changed_from_reading = false;
            if notify_owner {
                if let Some(hook) = &self.change_hook {
                    hook(&self.port.id, self.control);
                }
            }
        }
    }

    /// Like [`set_control_value`](Self::set_control_value) but takes a
    /// normalized value and maps it through the port's curve first.
    pub fn set_val_from_normalized(&mut self, normalized: f32, from_automation: bool) {
        let real = self.normalized_val_to_real(normalized);
        self.set_control_value(real, false, true);
        if from_automation {
            self.value_changed_from_reading = true;
        }
    }

    /// Per-block update for automatable input control ports: apply the
    /// automation reading, then sum enabled incoming CV edges in stable
    /// connection order.
    pub fn process_block(&mut self, time_nfo: &TimeInfo, cv_in: &[CvInput<'_>]) {
        if self.port.id.flow != PortFlow::Input || !self.port.id.flags.test(PortFlag::Automatable)
        {
            return;
        }

        if let Some(mut reader) = self.automation_reader.take() {
            if let Some(normalized) = reader(time_nfo.g_start_frame_w_offset) {
                self.set_val_from_normalized(normalized, true);
            }
            self.automation_reader = Some(reader);
        }

        let depth_range = self.range.size() / 2.0;
        let mut first_cv = true;
        for input in cv_in {
            if !input.conn.enabled {
                continue;
            }
            let Some(&sample) = input.buf.first() else {
                continue;
            };
            let val_to_use = if first_cv {
                first_cv = false;
                self.base_value
            } else {
                self.control
            };
            self.control = self.range.clamp(
                val_to_use + input.conn.base_value + depth_range * sample * input.conn.multiplier,
            );
        }
    }
}
