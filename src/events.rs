//! Typed payloads exchanged over the [`crate::bus::EventBus`].
//!
//! Mutation/query events (`set_gain`, `get_gain`, ...) and their `notify_*`
//! counterparts are plain, `Clone`-able data: the effect that owns the
//! authoritative state answers a query by computing its current value and
//! emitting the matching `notify_*` event itself: anyone interested
//! (the control transport) subscribes to `notify_*` directly.
//!
//! The four `get_database_*` hydration events are the one place the bus
//! carries a genuine synchronous request/response: an effect's constructor
//! needs the persisted value back *before* it returns. Since `emit` is
//! synchronous on the caller's thread, a hydration payload carries a
//! [`Reply`] closure that the parameter store invokes inline; by the time
//! `emit` returns, the closure has already run.

use crate::bus::EventBus;
use crate::channel::Side;
use crate::dsp::FilterKind;
use std::sync::{Arc, Mutex};

/// Invoked synchronously, inline, by the sole subscriber of a
/// `get_database_*` event. `None` signals a miss (no persisted row).
pub type Reply<T> = Arc<dyn Fn(Option<T>) + Send + Sync>;

#[derive(Clone)]
pub struct SetGain {
    pub side: Side,
    pub channel_number: u16,
    pub gain_db: f64,
}

#[derive(Clone)]
pub struct GetGain {
    pub side: Side,
    pub channel_number: u16,
}

#[derive(Clone)]
pub struct NotifyGain {
    pub side: Side,
    pub channel_number: u16,
    pub gain_db: f64,
}

#[derive(Clone)]
pub struct SetMute {
    pub side: Side,
    pub channel_number: u16,
    pub mute: bool,
}

#[derive(Clone)]
pub struct GetMute {
    pub side: Side,
    pub channel_number: u16,
}

#[derive(Clone)]
pub struct NotifyMute {
    pub side: Side,
    pub channel_number: u16,
    pub mute: bool,
}

#[derive(Clone)]
pub struct SetMixer {
    pub input_channel: u16,
    pub output_channel: u16,
    pub mix: bool,
}

#[derive(Clone)]
pub struct GetMixer {
    pub input_channel: u16,
    pub output_channel: u16,
}

#[derive(Clone)]
pub struct NotifyMixer {
    pub input_channel: u16,
    pub output_channel: u16,
    pub mix: bool,
}

#[derive(Clone)]
pub struct SetFilter {
    pub side: Side,
    pub channel_number: u16,
    pub filter_id: u8,
    pub filter_enabled: bool,
    pub filter_type: FilterKind,
    pub center_frequency: f64,
    pub q_factor: f64,
    pub gain_db: f64,
}

#[derive(Clone)]
pub struct GetFilter {
    pub side: Side,
    pub channel_number: u16,
    pub filter_id: u8,
}

#[derive(Clone)]
pub struct NotifyFilter {
    pub side: Side,
    pub channel_number: u16,
    pub filter_id: u8,
    /// Downgraded to `false` (transport reports `get_filter_failed`) when
    /// this reply is answering a hydration miss.
    pub ok: bool,
    pub filter_enabled: bool,
    pub filter_type: FilterKind,
    pub center_frequency: f64,
    pub q_factor: f64,
    pub gain_db: f64,
}

#[derive(Clone)]
pub struct GetMeter {
    pub side: Side,
}

#[derive(Clone)]
pub struct NotifyMeter {
    pub side: Side,
    pub amplitudes_db: Vec<f64>,
}

#[derive(Clone)]
pub struct GetDatabaseGain {
    pub side: Side,
    pub channel_number: u16,
    pub reply: Reply<f64>,
}

#[derive(Clone)]
pub struct GetDatabaseMute {
    pub side: Side,
    pub channel_number: u16,
    pub reply: Reply<bool>,
}

#[derive(Clone)]
pub struct GetDatabaseMixer {
    pub input_channel: u16,
    pub output_channel: u16,
    pub reply: Reply<bool>,
}

/// `(enabled, filter_type, center_frequency, q_factor, gain_db)` — the five
/// attribute columns persisted per filter id.
pub type FilterRow = (bool, FilterKind, f64, f64, f64);

#[derive(Clone)]
pub struct GetDatabaseFilter {
    pub side: Side,
    pub channel_number: u16,
    pub filter_id: u8,
    pub reply: Reply<FilterRow>,
}

/// Emit a hydration event and collect its synchronous reply.
///
/// `emit` runs every subscriber on the calling thread before returning, so
/// by the time this function's `bus.emit` call comes back the store's
/// reply closure (if a store is subscribed at all) has already written its
/// answer into `result`.
pub fn hydrate<T, Ev>(bus: &EventBus, name: &str, build: impl FnOnce(Reply<T>) -> Ev) -> Option<T>
where
    T: Clone + Send + Sync + 'static,
    Ev: Clone + 'static,
{
    let result = Arc::new(Mutex::new(None));
    let result_write = Arc::clone(&result);
    let reply: Reply<T> = Arc::new(move |value| {
        *result_write.lock().unwrap() = value;
    });
    bus.emit(name, build(reply));
    result.lock().unwrap().take()
}
