use crate::bus::{EventBus, Token};
use crate::channel::Side;
use crate::events::{GetMeter, NotifyMeter};
use std::sync::{Arc, Mutex};

/// Reference amplitude treated as full scale when computing dBFS.
const FULL_SCALE: f64 = 14_000.0;

struct State {
    /// One ring per channel, all sharing `cursor`.
    rings: Vec<Vec<i16>>,
    cursor: usize,
}

/// Per-channel rolling RMS window producing dBFS readings on demand.
///
/// All channels on a side share a single write cursor: `store` advances it
/// once per frame, not once per channel, so every channel's ring stays
/// aligned to the same span of time.
pub struct Meter {
    side: Side,
    state: Mutex<State>,
    bus: Arc<EventBus>,
    get_token: Mutex<Token>,
}

impl Meter {
    /// `window` is `floor(sample_rate * 0.1)`, the 100ms window in samples.
    pub fn new(side: Side, channels: u16, window: usize, bus: Arc<EventBus>) -> Arc<Self> {
        let state = Mutex::new(State {
            rings: vec![vec![0i16; window.max(1)]; channels as usize],
            cursor: 0,
        });

        let meter = Arc::new(Self {
            side,
            state,
            bus: Arc::clone(&bus),
            get_token: Mutex::new(0),
        });

        let meter_for_handler = Arc::clone(&meter);
        let get_token = bus.on::<GetMeter, _>("get_meter", move |evt: GetMeter| {
            if evt.side != side {
                return;
            }
            let amplitudes_db = meter_for_handler.amplitudes_db();
            meter_for_handler
                .bus
                .emit("notify_meter", NotifyMeter { side, amplitudes_db });
        });
        *meter.get_token.lock().unwrap() = get_token;

        meter
    }

    /// Write one frame (one sample per channel) into the rings and advance
    /// the shared cursor.
    pub fn store(&self, frame: &[i16]) {
        let mut state = self.state.lock().unwrap();
        let cursor = state.cursor;
        let window = state.rings.first().map(Vec::len).unwrap_or(1);
        for (channel, ring) in state.rings.iter_mut().enumerate() {
            if let Some(sample) = frame.get(channel) {
                ring[cursor] = *sample;
            }
        }
        state.cursor = (cursor + 1) % window;
    }

    pub fn get_channel_amplitude_db(&self, channel: usize) -> f64 {
        let state = self.state.lock().unwrap();
        let Some(ring) = state.rings.get(channel) else {
            return f64::NEG_INFINITY;
        };
        amplitude_db(ring)
    }

    fn amplitudes_db(&self) -> Vec<f64> {
        let state = self.state.lock().unwrap();
        state.rings.iter().map(|ring| amplitude_db(ring)).collect()
    }

    pub fn address(&self) -> Side {
        self.side
    }
}

impl Drop for Meter {
    fn drop(&mut self) {
        self.bus.off("get_meter", *self.get_token.lock().unwrap());
    }
}

fn amplitude_db(ring: &[i16]) -> f64 {
    let sum_sq: f64 = ring
        .iter()
        .map(|s| (*s as f64 / FULL_SCALE).powi(2))
        .sum();
    let rms = (sum_sq / ring.len() as f64).sqrt();
    (20.0 * rms.clamp(0.0, 1.0).log10()).max(f64::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_reads_as_negative_infinity_floor() {
        let bus = EventBus::new();
        let meter = Meter::new(Side::Input, 2, 4800, bus);
        assert!(meter.get_channel_amplitude_db(0) < -100.0);
    }

    #[test]
    fn full_scale_tone_reads_near_zero_dbfs() {
        let bus = EventBus::new();
        let meter = Meter::new(Side::Input, 1, 8, bus);
        for _ in 0..8 {
            meter.store(&[14_000]);
        }
        let db = meter.get_channel_amplitude_db(0);
        assert!((db - 0.0).abs() < 0.01, "db={db}");
    }

    #[test]
    fn cursor_wraps_and_replaces_oldest_sample() {
        let bus = EventBus::new();
        let meter = Meter::new(Side::Input, 1, 2, bus);
        meter.store(&[14_000]);
        meter.store(&[14_000]);
        // window full of full-scale samples
        assert!((meter.get_channel_amplitude_db(0) - 0.0).abs() < 0.01);
        meter.store(&[0]);
        // one sample replaced, average energy drops
        assert!(meter.get_channel_amplitude_db(0) < -2.0);
    }

    #[test]
    fn get_meter_replies_with_all_channels_in_order() {
        let bus = EventBus::new();
        let meter = Meter::new(Side::Output, 2, 4, bus.clone());
        meter.store(&[14_000, 0]);

        let captured = Arc::new(Mutex::new(None));
        let captured_write = Arc::clone(&captured);
        bus.on::<NotifyMeter, _>("notify_meter", move |evt: NotifyMeter| {
            *captured_write.lock().unwrap() = Some(evt.amplitudes_db);
        });

        bus.emit("get_meter", GetMeter { side: Side::Output });

        let amps = captured.lock().unwrap().take().expect("notify_meter fired");
        assert_eq!(amps.len(), 2);
        assert!(amps[0] > amps[1]);
    }
}
