use super::Effect;
use crate::bus::{EventBus, Token};
use crate::channel::Side;
use crate::dsp::biquad::{Biquad, FilterParams};
use crate::dsp::FilterKind;
use crate::events::{self, GetDatabaseFilter, GetFilter, NotifyFilter, SetFilter};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// The synthetic answer `get_filter` gives for an id that doesn't exist.
const DEFAULT_PARAMS: FilterParams = FilterParams {
    kind: FilterKind::Peaking,
    center_frequency_hz: 1000.0,
    q_factor: 0.707,
    gain_db: 0.0,
};

struct FilterSlot {
    biquad: Biquad,
    params: FilterParams,
    enabled: bool,
}

struct State {
    slots: BTreeMap<u8, FilterSlot>,
}

/// Ordered bank of up to 16 biquads per channel, each independently
/// enabled/disabled and addressable by id.
///
/// The spec describes two disjoint maps (enabled/disabled); this keeps a
/// single `BTreeMap<id, FilterSlot>` with an `enabled` flag per slot instead.
/// Disjointness then holds automatically (an id is in exactly one map slot),
/// and `BTreeMap`'s key order gives the required ascending-id iteration for
/// free, both for `process` and for presenting the enabled/disabled views.
pub struct Equalizer {
    side: Side,
    channel_number: u16,
    sample_rate: u32,
    state: Arc<Mutex<State>>,
    bus: Arc<EventBus>,
    set_token: Token,
    get_token: Token,
}

impl Equalizer {
    pub fn new(side: Side, channel_number: u16, sample_rate: u32, bus: Arc<EventBus>) -> Self {
        let state = Arc::new(Mutex::new(State {
            slots: BTreeMap::new(),
        }));

        for filter_id in 1u8..=16 {
            if let Some((enabled, kind, center_frequency, q_factor, gain_db)) =
                events::hydrate(&bus, "get_database_filter", |reply| GetDatabaseFilter {
                    side,
                    channel_number,
                    filter_id,
                    reply,
                })
            {
                let params = FilterParams {
                    kind,
                    center_frequency_hz: center_frequency,
                    q_factor,
                    gain_db,
                };
                state.lock().unwrap().slots.insert(
                    filter_id,
                    FilterSlot {
                        biquad: Biquad::new(params, sample_rate),
                        params,
                        enabled,
                    },
                );
            }
        }

        let set_token = {
            let state = Arc::clone(&state);
            let bus_for_notify = Arc::clone(&bus);
            bus.on::<SetFilter, _>("set_filter", move |evt: SetFilter| {
                if evt.side != side || evt.channel_number != channel_number {
                    return;
                }
                let params = FilterParams {
                    kind: evt.filter_type,
                    center_frequency_hz: evt.center_frequency,
                    q_factor: evt.q_factor,
                    gain_db: evt.gain_db,
                };

                let mut guard = state.lock().unwrap();
                match guard.slots.get_mut(&evt.filter_id) {
                    Some(slot) => {
                        slot.biquad.set_params(params, sample_rate);
                        slot.params = params;
                        slot.enabled = evt.filter_enabled;
                    }
                    None => {
                        guard.slots.insert(
                            evt.filter_id,
                            FilterSlot {
                                biquad: Biquad::new(params, sample_rate),
                                params,
                                enabled: evt.filter_enabled,
                            },
                        );
                    }
                }
                drop(guard);

                bus_for_notify.emit(
                    "notify_filter",
                    NotifyFilter {
                        side,
                        channel_number,
                        filter_id: evt.filter_id,
                        ok: true,
                        filter_enabled: evt.filter_enabled,
                        filter_type: evt.filter_type,
                        center_frequency: evt.center_frequency,
                        q_factor: evt.q_factor,
                        gain_db: evt.gain_db,
                    },
                );
            })
        };

        let get_token = {
            let state = Arc::clone(&state);
            let bus_for_notify = Arc::clone(&bus);
            bus.on::<GetFilter, _>("get_filter", move |evt: GetFilter| {
                if evt.side != side || evt.channel_number != channel_number {
                    return;
                }
                let guard = state.lock().unwrap();
                let (enabled, params) = match guard.slots.get(&evt.filter_id) {
                    Some(slot) => (slot.enabled, slot.params),
                    None => (false, DEFAULT_PARAMS),
                };
                drop(guard);

                bus_for_notify.emit(
                    "notify_filter",
                    NotifyFilter {
                        side,
                        channel_number,
                        filter_id: evt.filter_id,
                        ok: true,
                        filter_enabled: enabled,
                        filter_type: params.kind,
                        center_frequency: params.center_frequency_hz,
                        q_factor: params.q_factor,
                        gain_db: params.gain_db,
                    },
                );
            })
        };

        Self {
            side,
            channel_number,
            sample_rate,
            state,
            bus,
            set_token,
            get_token,
        }
    }

    pub fn address(&self) -> (Side, u16) {
        (self.side, self.channel_number)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Effect for Equalizer {
    #[inline]
    fn process(&mut self, sample: i16) -> i16 {
        let mut guard = self.state.lock().unwrap();
        let mut out = sample;
        for slot in guard.slots.values_mut() {
            if slot.enabled {
                out = slot.biquad.process(out);
            }
        }
        out
    }
}

impl Drop for Equalizer {
    fn drop(&mut self) {
        self.bus.off("set_filter", self.set_token);
        self.bus.off("get_filter", self.get_token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_filter_on_unknown_id_replies_with_synthetic_default() {
        let bus = EventBus::new();
        let eq = Equalizer::new(Side::Input, 1, 48_000, Arc::clone(&bus));
        let captured = Arc::new(Mutex::new(None));
        let captured_write = Arc::clone(&captured);
        bus.on::<NotifyFilter, _>("notify_filter", move |evt: NotifyFilter| {
            *captured_write.lock().unwrap() = Some(evt);
        });

        bus.emit(
            "get_filter",
            GetFilter {
                side: Side::Input,
                channel_number: 1,
                filter_id: 9,
            },
        );

        let evt = captured.lock().unwrap().take().expect("notify_filter fired");
        assert!(!evt.filter_enabled);
        assert_eq!(evt.filter_type, FilterKind::Peaking);
        assert_eq!(evt.center_frequency, 1000.0);
        assert_eq!(evt.q_factor, 0.707);
        assert_eq!(evt.gain_db, 0.0);
        drop(eq);
    }

    #[test]
    fn set_filter_then_get_filter_round_trips() {
        let bus = EventBus::new();
        let eq = Equalizer::new(Side::Input, 1, 48_000, Arc::clone(&bus));

        bus.emit(
            "set_filter",
            SetFilter {
                side: Side::Input,
                channel_number: 1,
                filter_id: 3,
                filter_enabled: true,
                filter_type: FilterKind::Lowpass,
                center_frequency: 500.0,
                q_factor: 0.9,
                gain_db: 0.0,
            },
        );

        let captured = Arc::new(Mutex::new(None));
        let captured_write = Arc::clone(&captured);
        bus.on::<NotifyFilter, _>("notify_filter", move |evt: NotifyFilter| {
            *captured_write.lock().unwrap() = Some(evt);
        });
        bus.emit(
            "get_filter",
            GetFilter {
                side: Side::Input,
                channel_number: 1,
                filter_id: 3,
            },
        );

        let evt = captured.lock().unwrap().take().expect("notify_filter fired");
        assert!(evt.filter_enabled);
        assert_eq!(evt.filter_type, FilterKind::Lowpass);
        assert_eq!(evt.center_frequency, 500.0);
        drop(eq);
    }

    #[test]
    fn disabled_filter_is_skipped_in_process() {
        let bus = EventBus::new();
        let mut eq = Equalizer::new(Side::Input, 1, 48_000, Arc::clone(&bus));

        bus.emit(
            "set_filter",
            SetFilter {
                side: Side::Input,
                channel_number: 1,
                filter_id: 1,
                filter_enabled: false,
                filter_type: FilterKind::Lowpass,
                center_frequency: 200.0,
                q_factor: 0.707,
                gain_db: 0.0,
            },
        );

        assert_eq!(eq.process(1234), 1234);
    }

    #[test]
    fn address_guard_ignores_other_channels() {
        let bus = EventBus::new();
        let mut eq = Equalizer::new(Side::Input, 1, 48_000, Arc::clone(&bus));

        bus.emit(
            "set_filter",
            SetFilter {
                side: Side::Input,
                channel_number: 2,
                filter_id: 1,
                filter_enabled: true,
                filter_type: FilterKind::Lowpass,
                center_frequency: 200.0,
                q_factor: 0.707,
                gain_db: 0.0,
            },
        );

        assert_eq!(eq.process(1234), 1234);
        assert_eq!(eq.sample_rate(), 48_000);
    }
}
