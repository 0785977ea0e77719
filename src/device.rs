use crate::error::AppError;
use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use log::warn;

/// Capture+playback handles on one ALSA-class interface.
///
/// Every operation blocks: `read`/`write` are the only suspension points on
/// the audio thread (§5 of the processor design), and a negative return
/// from either is given exactly one recovery attempt before being treated
/// as a persistent error.
pub struct AudioDevice {
    capture: PCM,
    playback: PCM,
    input_channels: u16,
    output_channels: u16,
}

impl AudioDevice {
    pub fn open(
        interface_name: &str,
        input_channels: u16,
        output_channels: u16,
        sample_rate: u32,
    ) -> Result<Self, AppError> {
        let capture = PCM::new(interface_name, Direction::Capture, false)
            .map_err(|e| AppError::Device(format!("open capture {interface_name}: {e}")))?;
        configure(&capture, input_channels, sample_rate)?;

        let playback = PCM::new(interface_name, Direction::Playback, false)
            .map_err(|e| AppError::Device(format!("open playback {interface_name}: {e}")))?;
        configure(&playback, output_channels, sample_rate)?;

        Ok(Self {
            capture,
            playback,
            input_channels,
            output_channels,
        })
    }

    /// Read `frames` interleaved frames (`frames * input_channels` samples)
    /// into `buf`. Returns the number of frames actually transferred.
    pub fn read(&self, buf: &mut [i16], frames: usize) -> Result<usize, AppError> {
        let io = self
            .capture
            .io_i16()
            .map_err(|e| AppError::Device(e.to_string()))?;
        let want = frames * self.input_channels as usize;
        match io.readi(&mut buf[..want]) {
            Ok(n) => Ok(n),
            Err(e) => {
                warn!("capture underrun/error: {e}, attempting recovery");
                self.capture
                    .recover(e.errno() as i32, true)
                    .map_err(|e| AppError::Device(format!("capture recovery failed: {e}")))?;
                io.readi(&mut buf[..want])
                    .map_err(|e| AppError::Device(format!("capture read after recovery: {e}")))
            }
        }
    }

    /// Write `frames` interleaved frames from `buf`.
    pub fn write(&self, buf: &[i16], frames: usize) -> Result<usize, AppError> {
        let io = self
            .playback
            .io_i16()
            .map_err(|e| AppError::Device(e.to_string()))?;
        let want = frames * self.output_channels as usize;
        match io.writei(&buf[..want]) {
            Ok(n) => Ok(n),
            Err(e) => {
                warn!("playback underrun/error: {e}, attempting recovery");
                self.playback
                    .recover(e.errno() as i32, true)
                    .map_err(|e| AppError::Device(format!("playback recovery failed: {e}")))?;
                io.writei(&buf[..want])
                    .map_err(|e| AppError::Device(format!("playback write after recovery: {e}")))
            }
        }
    }

    pub fn close(&self) -> Result<(), AppError> {
        self.playback
            .drain()
            .map_err(|e| AppError::Device(format!("drain playback: {e}")))?;
        Ok(())
    }
}

fn configure(pcm: &PCM, channels: u16, sample_rate: u32) -> Result<(), AppError> {
    let hwp = HwParams::any(pcm).map_err(|e| AppError::Device(e.to_string()))?;
    hwp.set_access(Access::RWInterleaved)
        .map_err(|e| AppError::Device(e.to_string()))?;
    hwp.set_format(Format::s16())
        .map_err(|e| AppError::Device(e.to_string()))?;
    hwp.set_rate_near(sample_rate, ValueOr::Nearest)
        .map_err(|e| AppError::Device(e.to_string()))?;
    hwp.set_channels(channels as u32)
        .map_err(|e| AppError::Device(e.to_string()))?;
    pcm.hw_params(&hwp)
        .map_err(|e| AppError::Device(e.to_string()))?;
    pcm.prepare().map_err(|e| AppError::Device(e.to_string()))?;
    Ok(())
}
