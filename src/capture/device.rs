//! Device capture using cpal
//!
//! Each tap owns one input stream on the default input device. cpal streams
//! are not `Send` on every backend, so the stream lives on its own thread for
//! as long as the tap is installed.

use super::traits::{
    AudioBlock, AudioDeviceInfo, AudioEngine, AudioFormat, CaptureError, CaptureResult,
    TapHandler, TapId,
};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig, SupportedBufferSize};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

/// Get the list of available input devices
pub fn get_audio_input_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host
        .default_input_device()
        .and_then(|d| d.name().ok())
        .unwrap_or_default();

    match host.input_devices() {
        Ok(devices) => devices
            .filter_map(|d| d.name().ok())
            .map(|name| AudioDeviceInfo {
                is_default: name == default_name,
                name,
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate input devices: {}", e);
            Vec::new()
        }
    }
}

struct StreamThread {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Engine backed by the default cpal input device
pub struct CpalEngine {
    format: AudioFormat,
    sample_format: SampleFormat,
    taps: Mutex<HashMap<TapId, StreamThread>>,
}

impl CpalEngine {
    /// Open the default input device and read its preferred format
    pub fn open_default() -> CaptureResult<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| CaptureError::DeviceNotFound("No default input device".to_string()))?;

        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let config = device.default_input_config().map_err(|e| {
            CaptureError::Configuration(format!("Failed to get audio config: {}", e))
        })?;

        let format = AudioFormat::new(config.sample_rate().0, config.channels());
        tracing::info!(
            "Input device ready: {} ({}Hz, {}ch, {:?})",
            device_name,
            format.sample_rate,
            format.channels,
            config.sample_format()
        );

        Ok(Self {
            format,
            sample_format: config.sample_format(),
            taps: Mutex::new(HashMap::new()),
        })
    }
}

impl AudioEngine for CpalEngine {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn install_tap(&self, handler: TapHandler) -> Result<TapId, CaptureError> {
        let id = TapId::next();
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();

        let format = self.format;
        let sample_format = self.sample_format;
        let is_running = running.clone();

        let handle = std::thread::Builder::new()
            .name(format!("scopecast-tap-{:?}", id))
            .spawn(move || {
                let stream = match build_stream(format, sample_format, handler) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(format!("Failed to start audio stream: {}", e)));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while is_running.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(10));
                }

                drop(stream);
                tracing::debug!("Input stream for tap {:?} closed", id);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.taps.lock().insert(id, StreamThread { running, handle });
                tracing::info!("Installed device tap {:?}", id);
                Ok(id)
            }
            Ok(Err(message)) => {
                let _ = handle.join();
                Err(CaptureError::Configuration(message))
            }
            Err(_) => {
                let _ = handle.join();
                Err(CaptureError::Configuration(
                    "Input stream thread exited before starting".to_string(),
                ))
            }
        }
    }

    fn remove_tap(&self, tap: TapId) {
        let Some(thread) = self.taps.lock().remove(&tap) else {
            return;
        };
        thread.running.store(false, Ordering::SeqCst);
        // The stream is dropped before the thread exits
        if thread.handle.join().is_err() {
            tracing::error!("Input stream thread for tap {:?} panicked", tap);
        }
        tracing::info!("Removed device tap {:?}", tap);
    }
}

impl Drop for CpalEngine {
    fn drop(&mut self) {
        let ids: Vec<TapId> = self.taps.lock().keys().copied().collect();
        for id in ids {
            self.remove_tap(id);
        }
    }
}

const FALLBACK_BUFFER_FRAMES: usize = 8192;
const MAX_BUFFER_FRAMES: usize = 1 << 16;

/// Samples needed to convert the largest block the device reports
fn scratch_len(device: &cpal::Device, channels: usize) -> usize {
    let frames = match device.default_input_config().map(|c| c.buffer_size().clone()) {
        Ok(SupportedBufferSize::Range { max, .. }) => max as usize,
        _ => FALLBACK_BUFFER_FRAMES,
    };
    frames.clamp(256, MAX_BUFFER_FRAMES) * channels.max(1)
}

/// Convert `data` into the fixed `scratch` slice, handing out frame-aligned
/// chunks. Never allocates; blocks larger than `scratch` arrive in pieces.
fn convert_i16_chunks<F>(data: &[i16], scratch: &mut [f32], channels: usize, mut emit: F)
where
    F: FnMut(&[f32]),
{
    let chunk = (scratch.len() / channels.max(1)) * channels.max(1);
    if chunk == 0 {
        return;
    }
    for piece in data.chunks(chunk) {
        let out = &mut scratch[..piece.len()];
        for (dst, &src) in out.iter_mut().zip(piece) {
            *dst = f32::from(src) / f32::from(i16::MAX);
        }
        emit(out);
    }
}

fn build_stream(
    format: AudioFormat,
    sample_format: SampleFormat,
    mut handler: TapHandler,
) -> Result<cpal::Stream, String> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| "No default input device".to_string())?;

    let config = StreamConfig {
        channels: format.channels,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let channels = format.channels as usize;
    let err_fn = |err: cpal::StreamError| tracing::error!("Input stream error: {}", err);

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                handler(AudioBlock::Interleaved {
                    samples: data,
                    channels,
                });
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => {
            let mut scratch = vec![0.0f32; scratch_len(&device, channels)].into_boxed_slice();
            device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    convert_i16_chunks(data, &mut scratch, channels, |samples| {
                        handler(AudioBlock::Interleaved { samples, channels });
                    });
                },
                err_fn,
                None,
            )
        }
        other => return Err(format!("Unsupported sample format: {:?}", other)),
    };

    stream.map_err(|e| format!("Failed to build input stream: {}", e))
}
