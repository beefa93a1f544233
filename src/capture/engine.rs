//! Push-driven engine
//!
//! For embedders whose own DSP engine owns the audio thread: the engine calls
//! [`PushEngine::deliver`] from its render callback and every installed tap
//! sees the block.
//!
//! The tap list is an immutable snapshot swapped in whole by
//! `install_tap`/`remove_tap`, so delivery never contends with tap changes.
//! Each handler has its own lock, held only by the delivering thread and by
//! `remove_tap` while it retires that handler.

use super::traits::{AudioBlock, AudioEngine, AudioFormat, CaptureError, TapHandler, TapId};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct TapSlot {
    id: TapId,
    retired: AtomicBool,
    handler: Mutex<TapHandler>,
}

/// Tap fan-out for an externally driven audio thread
pub struct PushEngine {
    format: AudioFormat,
    taps: ArcSwap<Vec<Arc<TapSlot>>>,
    // Serializes snapshot updates
    changes: Mutex<()>,
}

impl PushEngine {
    /// Create an engine that delivers blocks in the given format
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            taps: ArcSwap::from_pointee(Vec::new()),
            changes: Mutex::new(()),
        }
    }

    /// Hand one block to every installed tap. Returns whether any tap saw it.
    pub fn deliver(&self, block: AudioBlock<'_>) -> bool {
        let taps = self.taps.load();
        let mut delivered = false;
        for slot in taps.iter() {
            let mut handler = slot.handler.lock();
            if !slot.retired.load(Ordering::Acquire) {
                (*handler)(block);
                delivered = true;
            }
        }
        delivered
    }

    /// Number of installed taps
    pub fn tap_count(&self) -> usize {
        self.taps.load().len()
    }
}

impl Default for PushEngine {
    fn default() -> Self {
        Self::new(AudioFormat::default())
    }
}

impl AudioEngine for PushEngine {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn install_tap(&self, handler: TapHandler) -> Result<TapId, CaptureError> {
        let id = TapId::next();
        let slot = Arc::new(TapSlot {
            id,
            retired: AtomicBool::new(false),
            handler: Mutex::new(handler),
        });

        let _changes = self.changes.lock();
        let mut taps = Vec::clone(&self.taps.load());
        taps.push(slot);
        self.taps.store(Arc::new(taps));
        tracing::debug!("Installed tap {:?}", id);
        Ok(id)
    }

    fn remove_tap(&self, tap: TapId) {
        let _changes = self.changes.lock();
        let current = self.taps.load_full();
        let Some(slot) = current.iter().find(|slot| slot.id == tap).cloned() else {
            return;
        };
        let remaining: Vec<_> = current.iter().filter(|s| s.id != tap).cloned().collect();
        self.taps.store(Arc::new(remaining));

        // A delivery still holding the old snapshot finishes its call first
        let _handler = slot.handler.lock();
        slot.retired.store(true, Ordering::Release);
        tracing::debug!("Removed tap {:?}", tap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_deliver_reaches_every_tap() {
        let engine = PushEngine::default();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let hits = hits.clone();
            engine
                .install_tap(Box::new(move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }

        let samples = [0.0f32; 8];
        assert!(engine.deliver(AudioBlock::Interleaved {
            samples: &samples,
            channels: 2,
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_tap_churn_never_drops_recorded_blocks() {
        let engine = Arc::new(PushEngine::default());
        let frames = Arc::new(AtomicUsize::new(0));
        let counter = frames.clone();
        engine
            .install_tap(Box::new(move |block| {
                counter.fetch_add(block.frames(), Ordering::Relaxed);
            }))
            .unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let churn = {
            let engine = engine.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                let mut cycles = 0usize;
                loop {
                    let id = engine.install_tap(Box::new(|_| {})).unwrap();
                    engine.remove_tap(id);
                    cycles += 1;
                    if stop.load(Ordering::Relaxed) {
                        break cycles;
                    }
                }
            })
        };

        let samples = [0.1f32; 256];
        let blocks = 20_000;
        for _ in 0..blocks {
            assert!(engine.deliver(AudioBlock::Interleaved {
                samples: &samples,
                channels: 2,
            }));
        }
        stop.store(true, Ordering::Relaxed);
        assert!(churn.join().unwrap() > 0);

        assert_eq!(frames.load(Ordering::Relaxed), blocks * 128);
        assert_eq!(engine.tap_count(), 1);
    }

    #[test]
    fn test_removed_tap_is_not_called() {
        let engine = PushEngine::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let id = engine
            .install_tap(Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        engine.remove_tap(id);
        assert_eq!(engine.tap_count(), 0);

        let samples = [0.0f32; 4];
        engine.deliver(AudioBlock::Interleaved {
            samples: &samples,
            channels: 2,
        });
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
