//! Lock-free double buffer between the audio thread and the display.
//!
//! Two fixed slots of `channels * points` samples and one atomic state byte:
//!
//! - bit 0: index of the slot the producer writes; the reader reads the other
//! - bit 1: a completed window is waiting in the write slot
//! - bit 2: the producer is writing right now
//!
//! The producer never waits and never allocates. The reader flips both
//! indices and clears the pending flag with a single compare-exchange, and
//! only when no write is in progress, so it never observes a half-written
//! window. Samples are stored as `f32` bits in `AtomicU32`s.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

const WRITE_INDEX: u8 = 0b001;
const NEW_DATA: u8 = 0b010;
const WRITING: u8 = 0b100;

/// Fixed-length per-channel magnitude values, stored planar
#[derive(Debug, Clone, PartialEq)]
pub struct SampleWindow {
    channels: usize,
    points: usize,
    data: Vec<f32>,
}

impl SampleWindow {
    /// A silent window
    pub fn new(channels: usize, points: usize) -> Self {
        Self {
            channels,
            points,
            data: vec![0.0; channels * points],
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn points(&self) -> usize {
        self.points
    }

    /// Values of one channel; out-of-range channels read the last one
    pub fn channel(&self, channel: usize) -> &[f32] {
        if self.channels == 0 {
            return &[];
        }
        let channel = channel.min(self.channels - 1);
        &self.data[channel * self.points..(channel + 1) * self.points]
    }

    pub(crate) fn set(&mut self, channel: usize, point: usize, value: f32) {
        if channel < self.channels && point < self.points {
            self.data[channel * self.points + point] = value;
        }
    }

    /// True when every value is zero
    pub fn is_silent(&self) -> bool {
        self.data.iter().all(|&v| v == 0.0)
    }
}

struct Shared {
    channels: usize,
    points: usize,
    slots: [Box<[AtomicU32]>; 2],
    state: AtomicU8,
}

impl Shared {
    fn slot_len(&self) -> usize {
        self.channels * self.points
    }
}

fn zeroed_slot(len: usize) -> Box<[AtomicU32]> {
    (0..len).map(|_| AtomicU32::new(0f32.to_bits())).collect()
}

/// Create a double buffer and split it into its two halves
pub fn double_buffer(channels: usize, points: usize) -> (WriteHalf, ReadHalf) {
    let channels = channels.max(1);
    let shared = Arc::new(Shared {
        channels,
        points,
        slots: [
            zeroed_slot(channels * points),
            zeroed_slot(channels * points),
        ],
        state: AtomicU8::new(0),
    });

    (
        WriteHalf {
            shared: shared.clone(),
        },
        ReadHalf {
            window: SampleWindow::new(channels, points),
            shared,
        },
    )
}

/// Producer side; owned by the audio thread
pub struct WriteHalf {
    shared: Arc<Shared>,
}

impl WriteHalf {
    pub fn channels(&self) -> usize {
        self.shared.channels
    }

    pub fn points(&self) -> usize {
        self.shared.points
    }

    /// Fill the write slot and mark it as the newest window.
    ///
    /// Values the closure does not set keep whatever the slot held before.
    pub fn write<F>(&mut self, fill: F)
    where
        F: FnOnce(&mut SlotWriter<'_>),
    {
        let shared = &*self.shared;
        let before = shared.state.fetch_or(WRITING, Ordering::Acquire);
        let index = before & WRITE_INDEX;

        let mut writer = SlotWriter {
            slot: &shared.slots[index as usize],
            points: shared.points,
        };
        fill(&mut writer);

        // Nobody else touches the state while WRITING is set
        shared.state.store(index | NEW_DATA, Ordering::Release);
    }
}

/// Write access to the producer's current slot
pub struct SlotWriter<'a> {
    slot: &'a [AtomicU32],
    points: usize,
}

impl SlotWriter<'_> {
    /// Store one value; out-of-range positions are ignored
    #[inline]
    pub fn set(&mut self, channel: usize, point: usize, value: f32) {
        if point >= self.points {
            return;
        }
        if let Some(cell) = self.slot.get(channel * self.points + point) {
            cell.store(value.to_bits(), Ordering::Relaxed);
        }
    }
}

/// Consumer side; owned by the display
pub struct ReadHalf {
    shared: Arc<Shared>,
    window: SampleWindow,
}

impl ReadHalf {
    pub fn channels(&self) -> usize {
        self.shared.channels
    }

    pub fn points(&self) -> usize {
        self.shared.points
    }

    /// Whether a window newer than the last consumed one is waiting
    pub fn has_pending(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) & NEW_DATA != 0
    }

    /// Latest complete window.
    ///
    /// Flips to the newest window when one is waiting and no write is in
    /// flight; otherwise returns the same window as the previous call.
    pub fn consume(&mut self) -> &SampleWindow {
        let shared = &*self.shared;
        let mut state = shared.state.load(Ordering::Acquire);

        while state & NEW_DATA != 0 && state & WRITING == 0 {
            let flipped = (state ^ WRITE_INDEX) & !NEW_DATA;
            match shared.state.compare_exchange_weak(
                state,
                flipped,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    state = flipped;
                    break;
                }
                Err(actual) => state = actual,
            }
        }

        let read_index = ((state & WRITE_INDEX) ^ 1) as usize;
        let slot = &shared.slots[read_index];
        for (value, cell) in self.window.data.iter_mut().zip(slot.iter()) {
            *value = f32::from_bits(cell.load(Ordering::Relaxed));
        }
        debug_assert_eq!(self.window.data.len(), shared.slot_len());

        &self.window
    }
}
