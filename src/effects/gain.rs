use super::Effect;
use crate::bus::{EventBus, Token};
use crate::channel::Side;
use crate::dsp::biquad::truncate_i16;
use crate::events::{self, GetDatabaseGain, GetGain, NotifyGain, SetGain};
use std::sync::{Arc, Mutex};

struct State {
    g: f64,
}

/// Scalar per-sample attenuator holding a linear multiplier
/// `g = clamp(10^(gain_db/20), 0, 1)`. The clamp ceiling at 1 is
/// intentional: this stage is an attenuator, never a boost.
///
/// Guards its state with its own mutex and ignores `set_gain`/`get_gain`
/// events addressed to a different `(side, channel_number)` — this is how
/// one bus event fans out to every `Gain` instance without per-subscriber
/// filtering.
pub struct Gain {
    side: Side,
    channel_number: u16,
    state: Arc<Mutex<State>>,
    bus: Arc<EventBus>,
    set_token: Token,
    get_token: Token,
}

impl Gain {
    pub fn new(side: Side, channel_number: u16, bus: Arc<EventBus>) -> Self {
        let state = Arc::new(Mutex::new(State { g: 1.0 }));

        if let Some(gain_db) = events::hydrate(&bus, "get_database_gain", |reply| GetDatabaseGain {
            side,
            channel_number,
            reply,
        }) {
            state.lock().unwrap().g = db_to_linear(gain_db).clamp(0.0, 1.0);
        } else {
            // No persisted row: fail safe to -60 dB rather than unity gain.
            state.lock().unwrap().g = db_to_linear(-60.0).clamp(0.0, 1.0);
        }

        let set_token = {
            let state = Arc::clone(&state);
            let bus_for_notify = Arc::clone(&bus);
            bus.on::<SetGain, _>("set_gain", move |evt: SetGain| {
                if evt.side != side || evt.channel_number != channel_number {
                    return;
                }
                state.lock().unwrap().g = db_to_linear(evt.gain_db).clamp(0.0, 1.0);
                bus_for_notify.emit(
                    "notify_gain",
                    NotifyGain {
                        side,
                        channel_number,
                        gain_db: evt.gain_db,
                    },
                );
            })
        };

        let get_token = {
            let state = Arc::clone(&state);
            let bus_for_notify = Arc::clone(&bus);
            bus.on::<GetGain, _>("get_gain", move |evt: GetGain| {
                if evt.side != side || evt.channel_number != channel_number {
                    return;
                }
                let g = state.lock().unwrap().g;
                bus_for_notify.emit(
                    "notify_gain",
                    NotifyGain {
                        side,
                        channel_number,
                        gain_db: linear_to_db(g),
                    },
                );
            })
        };

        Self {
            side,
            channel_number,
            state,
            bus,
            set_token,
            get_token,
        }
    }

    pub fn address(&self) -> (Side, u16) {
        (self.side, self.channel_number)
    }
}

impl Effect for Gain {
    #[inline]
    fn process(&mut self, sample: i16) -> i16 {
        let g = self.state.lock().unwrap().g;
        truncate_i16(sample as f64 * g)
    }
}

impl Drop for Gain {
    fn drop(&mut self) {
        self.bus.off("set_gain", self.set_token);
        self.bus.off("get_gain", self.get_token);
    }
}

#[inline]
fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// Lossy: reconstructs dB from the clamped linear value, not the original
/// input — the spec calls this out explicitly as the price of the clamp.
#[inline]
fn linear_to_db(g: f64) -> f64 {
    20.0 * g.max(f64::MIN_POSITIVE).log10()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NotifyGain as NotifyGainEvt;

    #[test]
    fn set_gain_clamps_to_unit_interval() {
        let bus = EventBus::new();
        let gain = Gain::new(Side::Input, 1, Arc::clone(&bus));
        bus.emit(
            "set_gain",
            SetGain {
                side: Side::Input,
                channel_number: 1,
                gain_db: 20.0,
            },
        );
        assert!(gain.state.lock().unwrap().g <= 1.0);

        bus.emit(
            "set_gain",
            SetGain {
                side: Side::Input,
                channel_number: 1,
                gain_db: -200.0,
            },
        );
        assert!(gain.state.lock().unwrap().g >= 0.0);
    }

    #[test]
    fn hydration_miss_defaults_to_minus_60db_not_unity() {
        let bus = EventBus::new();
        let gain = Gain::new(Side::Input, 1, Arc::clone(&bus));
        let g = gain.state.lock().unwrap().g;
        assert!((g - db_to_linear(-60.0)).abs() < 1e-9, "g={g}");
    }

    #[test]
    fn set_gain_minus_6db_matches_reference_multiplier() {
        let bus = EventBus::new();
        let gain = Gain::new(Side::Input, 1, Arc::clone(&bus));
        bus.emit(
            "set_gain",
            SetGain {
                side: Side::Input,
                channel_number: 1,
                gain_db: -6.0,
            },
        );
        let g = gain.state.lock().unwrap().g;
        assert!((g - 0.5011872).abs() < 1e-6, "g={g}");
    }

    #[test]
    fn address_guard_ignores_other_channels() {
        let bus = EventBus::new();
        let gain = Gain::new(Side::Input, 1, Arc::clone(&bus));
        bus.emit(
            "set_gain",
            SetGain {
                side: Side::Input,
                channel_number: 2,
                gain_db: -6.0,
            },
        );
        assert_eq!(gain.state.lock().unwrap().g, 1.0);

        bus.emit(
            "set_gain",
            SetGain {
                side: Side::Output,
                channel_number: 1,
                gain_db: -6.0,
            },
        );
        assert_eq!(gain.state.lock().unwrap().g, 1.0);
    }

    #[test]
    fn set_gain_broadcasts_original_db_not_clamped_db() {
        let bus = EventBus::new();
        let _gain = Gain::new(Side::Input, 1, Arc::clone(&bus));
        let captured = Arc::new(Mutex::new(None));
        let captured_write = Arc::clone(&captured);
        bus.on::<NotifyGainEvt, _>("notify_gain", move |evt: NotifyGainEvt| {
            *captured_write.lock().unwrap() = Some(evt.gain_db);
        });

        bus.emit(
            "set_gain",
            SetGain {
                side: Side::Input,
                channel_number: 1,
                gain_db: -6.0,
            },
        );

        assert_eq!(*captured.lock().unwrap(), Some(-6.0));
    }
}
