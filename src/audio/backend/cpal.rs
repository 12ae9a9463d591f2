//! cpal-backed microphones and output graphs
//!
//! Each graph runs its cpal stream on a dedicated thread named after the
//! processor it renders; the stream lives until the graph is disconnected.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{AudioBackend, Microphone, RenderGraph};
use crate::audio::capture::CaptureProcessor;
use crate::audio::device::{
    get_default_input_device, get_default_output_device, get_device_by_id, AudioDevice,
};
use crate::audio::playback::PlaybackProcessor;
use crate::config::{AudioStreamConfig, PlaybackConfig};
use crate::constants::{BROADCAST_PROCESSOR, PLAYBACK_PROCESSOR};
use crate::error::{AudioError, Error, Result};

/// Backend using the platform's default cpal host
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for CpalBackend {
    fn open_microphone(&self, config: &AudioStreamConfig) -> Result<Box<dyn Microphone>> {
        let device = match &config.device_id {
            Some(id) => get_device_by_id(id),
            None => get_default_input_device(),
        }
        .map_err(|e| Error::Permission(e.to_string()))?;

        // Querying the config is what fails when the OS refuses access.
        let default_config = device
            .default_input_config()
            .map_err(|e| Error::Permission(e.to_string()))?;

        let channels = if device.supports(config.sample_rate, config.channel_count) {
            config.channel_count
        } else {
            default_config.channels()
        };

        if config.echo_cancellation || config.noise_suppression || config.auto_gain_control {
            tracing::debug!(
                "Capture processing requested (echo_cancellation={}, noise_suppression={}, auto_gain_control={}); cpal exposes no such controls",
                config.echo_cancellation,
                config.noise_suppression,
                config.auto_gain_control
            );
        }

        let stream_config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        tracing::info!(
            "Microphone acquired: {} ({} Hz, {} ch)",
            device.name,
            config.sample_rate,
            channels
        );

        Ok(Box::new(CpalMicrophone {
            device: Some(device),
            config: stream_config,
        }))
    }

    fn open_output(
        &self,
        config: &PlaybackConfig,
        processor: PlaybackProcessor,
    ) -> Result<Box<dyn RenderGraph>> {
        let device = match &config.device_id {
            Some(id) => get_device_by_id(id)?,
            None => get_default_output_device()?,
        };
        let default_config = device.default_output_config()?;
        if default_config.sample_format() != cpal::SampleFormat::F32 {
            return Err(AudioError::UnsupportedFormat(format!(
                "{} renders {:?}, f32 required",
                device.name,
                default_config.sample_format()
            ))
            .into());
        }

        let channels = if device.supports(config.sample_rate, config.channel_count) {
            config.channel_count
        } else {
            default_config.channels()
        };
        let stream_config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        tracing::info!(
            "Output opened: {} ({} Hz, {} ch)",
            device.name,
            config.sample_rate,
            channels
        );

        let mut processor = processor;
        let out_channels = channels as usize;
        CpalGraph::spawn(PLAYBACK_PROCESSOR, device, move |device, running| {
            device.build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if running.load(Ordering::Relaxed) {
                        processor.process_interleaved(data, out_channels);
                    } else {
                        data.fill(0.0);
                    }
                },
                |err| tracing::error!("Playback stream error: {}", err),
                None,
            )
        })
        .map(|graph| Box::new(graph) as Box<dyn RenderGraph>)
    }
}

/// Microphone handle holding the capture device
pub struct CpalMicrophone {
    device: Option<AudioDevice>,
    config: StreamConfig,
}

impl Microphone for CpalMicrophone {
    fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    fn connect(&mut self, processor: CaptureProcessor) -> Result<Box<dyn RenderGraph>> {
        let device = self
            .device
            .as_ref()
            .map(|d| d.name.clone())
            .ok_or(Error::NotInitialized("microphone already stopped"))?;
        let device = get_device_by_id(&format!("input:{}", device))
            .map_err(|e| Error::Permission(e.to_string()))?;

        let config = self.config.clone();
        let in_channels = config.channels as usize;
        let mut processor = processor;
        let graph = CpalGraph::spawn(BROADCAST_PROCESSOR, device, move |device, running| {
            device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if running.load(Ordering::Relaxed) {
                        processor.process_interleaved(data, in_channels);
                    }
                },
                |err| tracing::error!("Capture stream error: {}", err),
                None,
            )
        })?;
        Ok(Box::new(graph))
    }

    fn stop(&mut self) {
        if let Some(device) = self.device.take() {
            tracing::info!("Microphone released: {}", device.name);
        }
    }
}

/// A cpal stream parked on its own thread
pub struct CpalGraph {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalGraph {
    /// Build and play a stream on a thread named `name`
    ///
    /// Returns once the stream is playing or failed to start.
    fn spawn<F>(name: &str, device: AudioDevice, build: F) -> Result<Self>
    where
        F: FnOnce(&cpal::Device, Arc<AtomicBool>) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
            + Send
            + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let running_for_stream = running.clone();
        let running_for_loop = running.clone();
        let (ready_tx, ready_rx) = bounded::<std::result::Result<(), AudioError>>(1);

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();
                let stream = match build(&cpal_device, running_for_stream) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep the stream alive while connected
                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let mut graph = Self {
            running,
            thread_handle: Some(handle),
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(graph),
            Ok(Err(e)) => {
                graph.disconnect();
                Err(e.into())
            }
            Err(_) => {
                graph.disconnect();
                Err(AudioError::StreamError(format!("{} thread exited before starting", name)).into())
            }
        }
    }
}

impl RenderGraph for CpalGraph {
    fn disconnect(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CpalGraph {
    fn drop(&mut self) {
        self.disconnect();
    }
}
