use crate::report::input::TOUCH_FRAMES_PER_REPORT;
use crate::report::{InputReport, TouchFrame, TouchPoint};

use super::TrackerError;

/// Continuous touchpad state.
///
/// The report only carries frames queued during the current cycle, so the
/// last frame lives here and is re-emitted when nothing new was queued.
#[derive(Debug, Clone)]
pub struct TouchTracker {
    next_id: u8,
    last_frame: TouchFrame,
}

impl Default for TouchTracker {
    fn default() -> Self {
        Self {
            next_id: 0,
            last_frame: TouchFrame::default(),
        }
    }
}

impl TouchTracker {
    pub fn last_frame(&self) -> &TouchFrame {
        &self.last_frame
    }

    // 7-bit wrapping id handed to each new contact
    fn allocate_id(&mut self) -> u8 {
        let id = self.next_id;
        self.next_id = (self.next_id + 1) & 0x7f;
        id
    }

    /// Append a frame to `report`.
    ///
    /// A supplied position moves the point, starting a new contact if it was
    /// lifted. Without a position the point is lifted when its release flag is
    /// set and held where it was otherwise.
    pub fn queue(
        &mut self,
        report: &mut InputReport,
        positions: [Option<TouchPoint>; 2],
        release: [bool; 2],
    ) -> Result<(), TrackerError> {
        let slot = report.touch_frames_available as usize;
        if slot >= TOUCH_FRAMES_PER_REPORT {
            return Err(TrackerError::TouchQueueFull);
        }

        self.last_frame.seq = self.last_frame.seq.wrapping_add(1);
        for point in 0..2 {
            match positions[point] {
                Some(pos) => {
                    self.last_frame.set_pos(point, pos);
                    if self.last_frame.is_invalid(point) {
                        let id = self.allocate_id();
                        self.last_frame.set_touch_id(point, id);
                        self.last_frame.set_invalid(point, false);
                    }
                }
                None if release[point] => self.last_frame.set_invalid(point, true),
                None => {}
            }
        }

        report.touch_frames[slot] = self.last_frame;
        report.touch_frames_available += 1;
        Ok(())
    }

    /// Re-emit the last frame if nothing was queued this cycle.
    pub fn sustain(&mut self, report: &mut InputReport) {
        if report.touch_frames_available != 0 {
            return;
        }
        // A fully lifted pad keeps its sequence so the host sees no new samples
        if !self.last_frame.both_invalid() {
            self.last_frame.seq = self.last_frame.seq.wrapping_add(1);
        }
        report.touch_frames[0] = self.last_frame;
        report.touch_frames_available = 1;
    }
}
