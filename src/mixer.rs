use crate::bus::{EventBus, Token};
use crate::dsp::biquad::truncate_i16;
use crate::events::{self, GetDatabaseMixer, GetMixer, NotifyMixer, SetMixer};
use std::sync::{Arc, Mutex};

struct State {
    /// Row-major `I x O`, `routes[i][o] == 1.0` iff input `i+1` is routed
    /// into output `o+1`.
    routes: Vec<Vec<f64>>,
}

/// Dense `I x O` boolean routing matrix, summed as multiplies per frame.
/// Every entry starts at zero and is hydrated from the store at
/// construction, so a fresh crate with no persisted routing is silent
/// until `set_mixer` (or a restored row) routes something.
pub struct Mixer {
    inputs: u16,
    outputs: u16,
    state: Mutex<State>,
    bus: Arc<EventBus>,
    set_token: Mutex<Token>,
    get_token: Mutex<Token>,
}

impl Mixer {
    pub fn new(inputs: u16, outputs: u16, bus: Arc<EventBus>) -> Arc<Self> {
        let mut routes = vec![vec![0.0; outputs as usize]; inputs as usize];
        for input_channel in 1..=inputs {
            for output_channel in 1..=outputs {
                if let Some(routed) =
                    events::hydrate(&bus, "get_database_mixer", |reply| GetDatabaseMixer {
                        input_channel,
                        output_channel,
                        reply,
                    })
                {
                    routes[(input_channel - 1) as usize][(output_channel - 1) as usize] =
                        if routed { 1.0 } else { 0.0 };
                }
            }
        }
        let state = Mutex::new(State { routes });

        let mixer = Arc::new(Self {
            inputs,
            outputs,
            state,
            bus: Arc::clone(&bus),
            set_token: Mutex::new(0),
            get_token: Mutex::new(0),
        });

        let mixer_for_set = Arc::clone(&mixer);
        let set_token = bus.on::<SetMixer, _>("set_mixer", move |evt: SetMixer| {
            if !mixer_for_set.in_bounds(evt.input_channel, evt.output_channel) {
                return;
            }
            {
                let mut state = mixer_for_set.state.lock().unwrap();
                state.routes[(evt.input_channel - 1) as usize][(evt.output_channel - 1) as usize] =
                    if evt.mix { 1.0 } else { 0.0 };
            }
            mixer_for_set.bus.emit(
                "notify_mixer",
                NotifyMixer {
                    input_channel: evt.input_channel,
                    output_channel: evt.output_channel,
                    mix: evt.mix,
                },
            );
        });
        *mixer.set_token.lock().unwrap() = set_token;

        let mixer_for_get = Arc::clone(&mixer);
        let get_token = bus.on::<GetMixer, _>("get_mixer", move |evt: GetMixer| {
            if !mixer_for_get.in_bounds(evt.input_channel, evt.output_channel) {
                return;
            }
            let routed = {
                let state = mixer_for_get.state.lock().unwrap();
                state.routes[(evt.input_channel - 1) as usize][(evt.output_channel - 1) as usize] != 0.0
            };
            mixer_for_get.bus.emit(
                "notify_mixer",
                NotifyMixer {
                    input_channel: evt.input_channel,
                    output_channel: evt.output_channel,
                    mix: routed,
                },
            );
        });
        *mixer.get_token.lock().unwrap() = get_token;

        mixer
    }

    fn in_bounds(&self, input_channel: u16, output_channel: u16) -> bool {
        input_channel >= 1
            && input_channel <= self.inputs
            && output_channel >= 1
            && output_channel <= self.outputs
    }

    /// Fold one input frame through the routing matrix into an output
    /// frame, accumulating in 16-bit (overflow wraps, matching the rest of
    /// the signal path).
    pub fn process(&self, input: &[i16]) -> Vec<i16> {
        let state = self.state.lock().unwrap();
        let mut out = vec![0i16; self.outputs as usize];
        for (i, row) in state.routes.iter().enumerate() {
            let Some(sample) = input.get(i) else { continue };
            for (o, coefficient) in row.iter().enumerate() {
                out[o] = truncate_i16(out[o] as f64 + (*sample as f64 * coefficient));
            }
        }
        out
    }
}

impl Drop for Mixer {
    fn drop(&mut self) {
        self.bus.off("set_mixer", *self.set_token.lock().unwrap());
        self.bus.off("get_mixer", *self.get_token.lock().unwrap());
    }
}
