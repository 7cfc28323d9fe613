//! Timeline index of trace arrivals
//!
//! For the zoomable timeline view, every trace line is bucketed into a
//! per-channel sequence of marks at horizontal pixel positions. Arrivals
//! closer than half a display unit collapse into a single mark with a
//! count, so dense bursts stay readable; the global maximum count scales
//! the mark heights.
//!
//! The time axis is controlled by three coupled values: `mark_spacing`
//! (pixels between major ticks), `mark_scale` (the tick unit in
//! microseconds) and `mark_delta` (time units per tick). Zooming adjusts
//! the spacing by 1.5× and carries into delta and scale so the spacing
//! stays in a readable band.

use serde::{Deserialize, Serialize};

use crate::channels::{ChannelRegistry, CHANNEL_COUNT};
use crate::store::TraceStore;

/// Microseconds per second; the base unit of `mark_scale`
pub const MARK_SECOND: u64 = 1_000_000;

/// Initial mark capacity per channel
const MARKS_INITIAL_SIZE: usize = 32;

/// Minimum distance between two marks, in display units
const MARK_COLLAPSE_DISTANCE: f32 = 0.5;

/// One bucketed mark on a channel's timeline row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelineMark {
    /// Horizontal position in display units
    pub pos: f32,
    /// Number of trace lines collapsed into this mark
    pub count: u32,
}

/// Tick configuration of the timeline axis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimelineConfig {
    /// Pixels between two major ticks
    pub spacing: f64,
    /// Tick unit in microseconds (1, 1000, 1000000 or 60000000)
    pub scale: u64,
    /// Time units per major tick (1..=100)
    pub delta: u64,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            spacing: 100.0,
            scale: MARK_SECOND,
            delta: 1,
        }
    }
}

/// The per-channel mark index
#[derive(Debug)]
pub struct Timeline {
    marks: Vec<Vec<TimelineMark>>,
    config: TimelineConfig,
    max_pos: f32,
    max_count: u32,
    time_origin: f64,
    skip_lines: usize,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Timeline {
    /// Create an empty timeline with default tick configuration
    pub fn new() -> Self {
        Self {
            marks: (0..CHANNEL_COUNT).map(|_| Vec::new()).collect(),
            config: TimelineConfig::default(),
            max_pos: 0.0,
            max_count: 1,
            time_origin: 0.0,
            skip_lines: 0,
        }
    }

    /// Current tick configuration
    pub fn config(&self) -> TimelineConfig {
        self.config
    }

    /// Replace the tick configuration.
    ///
    /// Invalid combinations (spacing ≤ 10, delta outside 1..=100, a scale
    /// that is not a whole microsecond/millisecond/second/minute unit) are
    /// ignored and the previous configuration stays in effect.
    pub fn set_config(&mut self, config: TimelineConfig) {
        let scale_valid = [1, 1_000, MARK_SECOND, 60 * MARK_SECOND].contains(&config.scale);
        if config.spacing > 10.0 && scale_valid && (1..=100).contains(&config.delta) {
            self.config = config;
        }
    }

    /// Marks for one channel, in non-decreasing position order
    pub fn channel_marks(&self, channel: usize) -> &[TimelineMark] {
        &self.marks[channel]
    }

    /// Rightmost mark position over all channels (the canvas width)
    pub fn max_pos(&self) -> f32 {
        self.max_pos
    }

    /// Largest collapse count over all marks (scales mark heights)
    pub fn max_count(&self) -> u32 {
        self.max_count
    }

    /// Timestamp that maps to position 0
    pub fn time_origin(&self) -> f64 {
        self.time_origin
    }

    /// Convert a display position back to an absolute timestamp.
    ///
    /// Used to jump the trace view to the line nearest a timeline click.
    pub fn position_to_timestamp(&self, pos: f32) -> f64 {
        pos as f64 * (self.config.scale * self.config.delta) as f64
            / (self.config.spacing * MARK_SECOND as f64)
            + self.time_origin
    }

    /// Rebuild all channel marks from the trace store.
    ///
    /// Disabled channels are skipped entirely. With `limit_marks` set, the
    /// oldest lines are skipped on the next rebuild so the total mark count
    /// stays bounded; passing `None` resets that and indexes everything.
    pub fn rebuild(
        &mut self,
        store: &TraceStore,
        registry: &ChannelRegistry,
        limit_marks: Option<usize>,
    ) {
        if limit_marks.is_none() {
            self.skip_lines = 0;
        }
        self.max_pos = 0.0;
        self.max_count = 1;
        self.time_origin = 0.0;

        if store.is_empty() {
            for marks in &mut self.marks {
                *marks = Vec::new();
            }
            self.skip_lines = 0;
            return;
        }

        self.time_origin = store.time_origin().unwrap_or(0.0);
        for marks in &mut self.marks {
            marks.clear();
        }

        let position_scale = self.config.spacing * MARK_SECOND as f64
            / (self.config.scale * self.config.delta) as f64;
        let mut skip = self.skip_lines;
        for line in store.lines() {
            let channel = line.channel as usize;
            if channel >= CHANNEL_COUNT || !registry.is_enabled(channel) {
                continue;
            }
            if skip > 0 {
                skip -= 1;
                continue;
            }
            let marks = &mut self.marks[channel];
            let pos = ((line.timestamp - self.time_origin) * position_scale) as f32;
            match marks.last_mut() {
                Some(last) if pos - last.pos < MARK_COLLAPSE_DISTANCE => {
                    last.count += 1;
                    if last.count > self.max_count {
                        self.max_count = last.count;
                    }
                }
                _ => {
                    // on allocation failure the mark is dropped, the view
                    // just thins out
                    let wanted = if marks.is_empty() {
                        MARKS_INITIAL_SIZE
                    } else {
                        marks.len()
                    };
                    if marks.len() == marks.capacity() && marks.try_reserve(wanted).is_err() {
                        continue;
                    }
                    marks.push(TimelineMark { pos, count: 1 });
                }
            }
            if pos > self.max_pos {
                self.max_pos = pos;
            }
        }

        if let Some(limit) = limit_marks {
            let total: usize = self.marks.iter().map(Vec::len).sum();
            self.skip_lines = total.saturating_sub(limit);
        }
    }

    /// Zoom in: widen the tick spacing by 1.5×, carrying into delta and
    /// scale when the spacing leaves the readable band.
    pub fn zoom_in(&mut self) {
        let cfg = &mut self.config;
        cfg.spacing *= 1.5;
        if cfg.spacing > 700.0 && (cfg.delta > 1 || cfg.scale > 1) {
            cfg.delta /= 10;
            cfg.spacing /= 10.0;
            if cfg.delta == 0 {
                if cfg.scale >= 1000 {
                    cfg.scale /= 1000;
                    cfg.delta = 100;
                } else {
                    cfg.delta = 1;
                }
            }
        }
    }

    /// Zoom out: the inverse of [`zoom_in`](Self::zoom_in); stops once the
    /// coarsest readable combination is reached.
    pub fn zoom_out(&mut self) {
        let cfg = &mut self.config;
        if cfg.spacing > 45.0 || cfg.scale < 60 * MARK_SECOND || cfg.delta == 1 {
            cfg.spacing /= 1.5;
        }
        if cfg.spacing < 70.0 {
            cfg.delta *= 10;
            cfg.spacing *= 10.0;
            if cfg.scale < MARK_SECOND && cfg.delta >= 1000 {
                cfg.scale *= 1000;
                cfg.delta /= 1000;
            }
        }
    }
}
