use super::Effect;
use crate::bus::{EventBus, Token};
use crate::channel::Side;
use crate::dsp::biquad::truncate_i16;
use crate::events::{self, GetDatabaseMute, GetMute, NotifyMute, SetMute};
use std::sync::{Arc, Mutex};

struct State {
    /// `1.0` = audible, `0.0` = silenced. The wire boolean `mute` is the
    /// logical inverse of this.
    m: f64,
}

/// Scalar per-sample mute gate. `m ∈ {0.0, 1.0}`.
pub struct Mute {
    side: Side,
    channel_number: u16,
    state: Arc<Mutex<State>>,
    bus: Arc<EventBus>,
    set_token: Token,
    get_token: Token,
}

impl Mute {
    pub fn new(side: Side, channel_number: u16, bus: Arc<EventBus>) -> Self {
        let state = Arc::new(Mutex::new(State { m: 1.0 }));

        if let Some(muted) = events::hydrate(&bus, "get_database_mute", |reply| GetDatabaseMute {
            side,
            channel_number,
            reply,
        }) {
            state.lock().unwrap().m = if muted { 0.0 } else { 1.0 };
        } else {
            // No persisted row: fail safe to muted, matching the original's
            // default-true behavior on a database miss.
            state.lock().unwrap().m = 0.0;
        }

        let set_token = {
            let state = Arc::clone(&state);
            let bus_for_notify = Arc::clone(&bus);
            bus.on::<SetMute, _>("set_mute", move |evt: SetMute| {
                if evt.side != side || evt.channel_number != channel_number {
                    return;
                }
                state.lock().unwrap().m = if evt.mute { 0.0 } else { 1.0 };
                bus_for_notify.emit(
                    "notify_mute",
                    NotifyMute {
                        side,
                        channel_number,
                        mute: evt.mute,
                    },
                );
            })
        };

        let get_token = {
            let state = Arc::clone(&state);
            let bus_for_notify = Arc::clone(&bus);
            bus.on::<GetMute, _>("get_mute", move |evt: GetMute| {
                if evt.side != side || evt.channel_number != channel_number {
                    return;
                }
                let m = state.lock().unwrap().m;
                bus_for_notify.emit(
                    "notify_mute",
                    NotifyMute {
                        side,
                        channel_number,
                        mute: m == 0.0,
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

impl Effect for Mute {
    #[inline]
    fn process(&mut self, sample: i16) -> i16 {
        let m = self.state.lock().unwrap().m;
        truncate_i16(sample as f64 * m)
    }
}

impl Drop for Mute {
    fn drop(&mut self) {
        self.bus.off("set_mute", self.set_token);
        self.bus.off("get_mute", self.get_token);
    }
}
