use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Canonical musical resolution.
pub const TICKS_PER_QUARTER_NOTE: i32 = 960;

const TICKS_PER_SIXTEENTH: i32 = TICKS_PER_QUARTER_NOTE / 4;

/// Musical meter used to decompose positions into bars/beats/sixteenths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub beats_per_bar: i32,
    /// Denominator: 4 for quarter-note beats, 8 for eighths, ...
    pub beat_unit: i32,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            beats_per_bar: 4,
            beat_unit: 4,
        }
    }
}

impl TimeSignature {
    pub fn ticks_per_beat(&self) -> i32 {
        TICKS_PER_QUARTER_NOTE * 4 / self.beat_unit
    }

    pub fn ticks_per_bar(&self) -> i32 {
        self.ticks_per_beat() * self.beats_per_bar
    }

    pub fn sixteenths_per_beat(&self) -> i32 {
        16 / self.beat_unit
    }
}

/// Snap grid settings. `ticks` is the grid line spacing; with
/// `keep_offset`, snapping preserves the offset a position had from its
/// own previous grid line instead of landing exactly on a line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SnapGrid {
    pub ticks: f64,
    pub keep_offset: bool,
}

/// A point in time kept in two units at once: floating ticks are the
/// canonical musical value, integer frames are derived through the
/// current frames-per-tick factor. Both always agree on direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Position {
    ticks: f64,
    frames: i64,
}

impl Position {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ticks(ticks: f64, frames_per_tick: f64) -> Self {
        let frames = (ticks * frames_per_tick).round() as i64;
        debug_assert!(
            frames == 0 || ticks == 0.0 || (frames > 0) == (ticks > 0.0),
            "frames {frames} disagree with ticks {ticks} on direction"
        );
        Self { ticks, frames }
    }

    pub fn from_frames(frames: i64, frames_per_tick: f64) -> Self {
        Self {
            ticks: frames as f64 / frames_per_tick,
            frames,
        }
    }

    pub fn ticks(&self) -> f64 {
        self.ticks
    }

    pub fn frames(&self) -> i64 {
        self.frames
    }

    /// Start of musical bar `bar`. Bars are 1-based; bar 1 is tick 0.
    pub fn set_to_bar(
        &mut self,
        bar: i32,
        sig: &TimeSignature,
        frames_per_tick: f64,
    ) -> Result<(), Error> {
        if bar < 1 {
            return Err(Error::InvalidBar(bar));
        }
        *self = Self::from_ticks(((bar - 1) * sig.ticks_per_bar()) as f64, frames_per_tick);
        Ok(())
    }

    pub fn add_ticks(&mut self, ticks: f64, frames_per_tick: f64) {
        *self = Self::from_ticks(self.ticks + ticks, frames_per_tick);
    }

    pub fn add_frames(&mut self, frames: i64, frames_per_tick: f64) {
        *self = Self::from_frames(self.frames + frames, frames_per_tick);
    }

    /// `[start, end)` containment on frames.
    pub fn is_between_frames_excl_end(&self, start: i64, end: i64) -> bool {
        self.frames >= start && self.frames < end
    }

    // Sign-symmetric decomposition: negative positions round toward zero
    // one unit further than positive ones so ranges stay end-exclusive.
    fn whole_units(value: f64) -> i32 {
        if value >= 0.0 {
            value.floor() as i32
        } else {
            value.ceil() as i32
        }
    }

    pub fn get_bars(&self, start_at_one: bool, sig: &TimeSignature) -> i32 {
        let total = self.ticks / sig.ticks_per_bar() as f64;
        let mut bars = Self::whole_units(total);
        if start_at_one {
            if total >= 0.0 {
                bars += 1;
            } else {
                bars -= 1;
            }
        }
        bars
    }

    pub fn get_beats(&self, start_at_one: bool, sig: &TimeSignature) -> i32 {
        let total = self.ticks / sig.ticks_per_beat() as f64;
        let mut beats = Self::whole_units(total) - self.get_bars(false, sig) * sig.beats_per_bar;
        if start_at_one {
            if total >= 0.0 {
                beats += 1;
            } else {
                beats -= 1;
            }
        }
        beats
    }

    pub fn get_sixteenths(&self, start_at_one: bool, sig: &TimeSignature) -> i32 {
        let total = self.ticks / TICKS_PER_SIXTEENTH as f64;
        let whole_beats =
            Self::whole_units(self.ticks / sig.ticks_per_beat() as f64) * sig.sixteenths_per_beat();
        let mut sixteenths = Self::whole_units(total) - whole_beats;
        if start_at_one {
            if total >= 0.0 {
                sixteenths += 1;
            } else {
                sixteenths -= 1;
            }
        }
        sixteenths
    }

    /// Ticks left over after removing whole sixteenths.
    pub fn get_remaining_ticks(&self) -> f64 {
        let total = self.ticks / TICKS_PER_SIXTEENTH as f64;
        self.ticks - Self::whole_units(total) as f64 * TICKS_PER_SIXTEENTH as f64
    }

    /// Rounds to the nearest grid line. With `keep_offset`, `start_pos`'s
    /// offset from its own previous grid line is carried over.
    pub fn snap(&mut self, start_pos: Option<&Position>, grid: &SnapGrid, frames_per_tick: f64) {
        let spacing = grid.ticks;
        if spacing <= 0.0 {
            return;
        }
        let snapped = match start_pos {
            Some(sp) if grid.keep_offset => {
                let offset = sp.ticks - (sp.ticks / spacing).floor() * spacing;
                ((self.ticks - offset) / spacing).round() * spacing + offset
            }
            _ => (self.ticks / spacing).round() * spacing,
        };
        *self = Self::from_ticks(snapped, frames_per_tick);
    }

    /// "bars.beats.sixteenths.ticks", all 1-based except ticks.
    pub fn stringize(&self, sig: &TimeSignature) -> String {
        let rem = self.get_remaining_ticks();
        if (rem - rem.round()).abs() < 1e-9 {
            format!(
                "{}.{}.{}.{}",
                self.get_bars(true, sig),
                self.get_beats(true, sig),
                self.get_sixteenths(true, sig),
                rem.round() as i64
            )
        } else {
            format!(
                "{}.{}.{}.{:.3}",
                self.get_bars(true, sig),
                self.get_beats(true, sig),
                self.get_sixteenths(true, sig),
                rem
            )
        }
    }

    /// Parses the canonical "bars.beats.sixteenths.ticks" form.
    pub fn parse(input: &str, sig: &TimeSignature, frames_per_tick: f64) -> Result<Self, Error> {
        let malformed = || Error::PositionParse(input.to_string());
        let parts: Vec<&str> = input.split('.').collect();
        if parts.len() != 4 {
            return Err(malformed());
        }
        let bars: i32 = parts[0].trim().parse().map_err(|_| malformed())?;
        let beats: i32 = parts[1].trim().parse().map_err(|_| malformed())?;
        let sixteenths: i32 = parts[2].trim().parse().map_err(|_| malformed())?;
        let ticks: f64 = parts[3].trim().parse().map_err(|_| malformed())?;
        if bars < 1 || beats < 1 || sixteenths < 1 {
            return Err(malformed());
        }
        let total = (bars - 1) as f64 * sig.ticks_per_bar() as f64
            + (beats - 1) as f64 * sig.ticks_per_beat() as f64
            + (sixteenths - 1) as f64 * TICKS_PER_SIXTEENTH as f64
            + ticks;
        Ok(Self::from_ticks(total, frames_per_tick))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stringize(&TimeSignature::default()))
    }
}
