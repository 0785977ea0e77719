use crate::bus::EventBus;
use crate::channel::Side;
use crate::device::AudioDevice;
use crate::effects::{Effect, Equalizer, Gain, Mute};
use crate::error::AppError;
use crate::meter::Meter;
use crate::mixer::Mixer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Frames read/written per device I/O call. Not part of the spec's
/// contract, just this implementation's I/O batch size.
const FRAMES_PER_BATCH: usize = 256;

/// One channel's `equalizer -> gain -> mute` chain, applied identically on
/// both the input and output side.
struct ChannelChain {
    equalizer: Equalizer,
    gain: Gain,
    mute: Mute,
}

impl ChannelChain {
    fn new(side: Side, index: u16, sample_rate: u32, bus: &Arc<EventBus>) -> Self {
        Self {
            equalizer: Equalizer::new(side, index, sample_rate, Arc::clone(bus)),
            gain: Gain::new(side, index, Arc::clone(bus)),
            mute: Mute::new(side, index, Arc::clone(bus)),
        }
    }

    #[inline]
    fn process(&mut self, sample: i16) -> i16 {
        let sample = self.equalizer.process(sample);
        let sample = self.gain.process(sample);
        self.mute.process(sample)
    }
}

/// The assembled pipeline: one device, one meter per side, one chain per
/// channel per side, one mixer.
pub struct AudioProcessor {
    device: Option<AudioDevice>,
    input_channels: u16,
    output_channels: u16,
    input_chains: Vec<ChannelChain>,
    output_chains: Vec<ChannelChain>,
    input_meter: Arc<Meter>,
    output_meter: Arc<Meter>,
    mixer: Arc<Mixer>,
    stop: Arc<AtomicBool>,
}

impl AudioProcessor {
    pub fn new(
        device: Option<AudioDevice>,
        input_channels: u16,
        output_channels: u16,
        sample_rate: u32,
        bus: Arc<EventBus>,
    ) -> Self {
        let window = (sample_rate as f64 * 0.1).floor() as usize;

        let input_chains = (1..=input_channels)
            .map(|index| ChannelChain::new(Side::Input, index, sample_rate, &bus))
            .collect();
        let output_chains = (1..=output_channels)
            .map(|index| ChannelChain::new(Side::Output, index, sample_rate, &bus))
            .collect();

        let input_meter = Meter::new(Side::Input, input_channels, window, Arc::clone(&bus));
        let output_meter = Meter::new(Side::Output, output_channels, window, Arc::clone(&bus));
        let mixer = Mixer::new(input_channels, output_channels, bus);

        Self {
            device,
            input_channels,
            output_channels,
            input_chains,
            output_chains,
            input_meter,
            output_meter,
            mixer,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Pure per-batch transform: input is `frame_count` interleaved frames
    /// of `input_channels` samples; output is `frame_count` interleaved
    /// frames of `output_channels` samples. No device I/O — this is the
    /// seam the processing loop and tests both call through.
    pub fn process_frames(&mut self, input: &[i16], frame_count: usize) -> Vec<i16> {
        let i = self.input_channels as usize;
        let o = self.output_channels as usize;
        let mut output = vec![0i16; frame_count * o];
        let mut input_frame = vec![0i16; i];

        for f in 0..frame_count {
            input_frame.copy_from_slice(&input[f * i..(f + 1) * i]);
            self.input_meter.store(&input_frame);

            for (c, chain) in self.input_chains.iter_mut().enumerate() {
                input_frame[c] = chain.process(input_frame[c]);
            }

            let mut out_frame = self.mixer.process(&input_frame);

            for (c, chain) in self.output_chains.iter_mut().enumerate() {
                out_frame[c] = chain.process(out_frame[c]);
            }

            self.output_meter.store(&out_frame);
            output[f * o..(f + 1) * o].copy_from_slice(&out_frame);
        }

        output
    }

    /// Run the hot loop until `stop()` is called or the device reports a
    /// persistent read/write error. The only blocking calls here are
    /// `device.read`/`device.write`.
    pub fn run(&mut self) -> Result<(), AppError> {
        let i = self.input_channels as usize;
        let mut input_buf = vec![0i16; FRAMES_PER_BATCH * i];

        while !self.stop.load(Ordering::SeqCst) {
            let device = self
                .device
                .as_ref()
                .ok_or_else(|| AppError::Device("no device attached".to_string()))?;

            let frames_read = device.read(&mut input_buf, FRAMES_PER_BATCH)?;
            if frames_read == 0 {
                continue;
            }

            let output = self.process_frames(&input_buf, frames_read);

            let device = self.device.as_ref().expect("checked above");
            device.write(&output, frames_read)?;
        }

        if let Some(device) = &self.device {
            device.close()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silent_processor(i: u16, o: u16, rate: u32) -> AudioProcessor {
        let bus = EventBus::new();
        AudioProcessor::new(None, i, o, rate, bus)
    }

    #[test]
    fn unrouted_processor_is_silent_at_the_output() {
        let mut processor = silent_processor(1, 1, 48_000);
        let input = vec![10_000i16; 4];
        let output = processor.process_frames(&input, 4);
        assert_eq!(output, vec![0i16; 4]);
    }

    #[test]
    fn routed_passthrough_preserves_samples() {
        let bus = EventBus::new();
        let mut processor = AudioProcessor::new(None, 1, 1, 48_000, Arc::clone(&bus));

        bus.emit(
            "set_mixer",
            crate::events::SetMixer {
                input_channel: 1,
                output_channel: 1,
                mix: true,
            },
        );

        let input = vec![1000i16, -2000, 3000];
        let output = processor.process_frames(&input, 3);
        assert_eq!(output, input);
    }

    #[test]
    fn input_meter_sees_raw_samples_before_effects() {
        let bus = EventBus::new();
        let mut processor = AudioProcessor::new(None, 1, 1, 48_000, Arc::clone(&bus));

        bus.emit(
            "set_gain",
            crate::events::SetGain {
                side: Side::Input,
                channel_number: 1,
                gain_db: -20.0,
            },
        );

        let input = vec![14_000i16; 8];
        processor.process_frames(&input, 8);

        let db = processor.input_meter.get_channel_amplitude_db(0);
        assert!((db - 0.0).abs() < 0.1, "db={db}");
    }
}
