use crate::bus::{EventBus, Token};
use crate::channel::Side;
use crate::dsp::FilterKind;
use crate::error::AppError;
use crate::events::{
    GetDatabaseFilter, GetDatabaseGain, GetDatabaseMixer, GetDatabaseMute, SetFilter, SetGain,
    SetMixer, SetMute,
};
use log::warn;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Key/value persistence of gain/mute/mixer/filter parameters. Hydrates
/// effects at startup via the `get_database_*` events and records every
/// mutation as it happens on the control plane.
///
/// Keys follow the schema `"<side>_volume_<n>"`, `"<side>_mute_<n>"`,
/// `"routing_<i>_<o>"`, `"<side>_filter_<n>_<fid>_<attr>"`.
pub struct ParameterStore {
    conn: Mutex<Connection>,
    bus: Arc<EventBus>,
    tokens: Mutex<Vec<(&'static str, Token)>>,
}

impl ParameterStore {
    pub fn open(path: &Path, bus: Arc<EventBus>) -> Result<Arc<Self>, AppError> {
        let conn = Connection::open(path).map_err(|e| AppError::Database(e.to_string()))?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(|e| AppError::Database(e.to_string()))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS audio_parameters (
                parameter_name TEXT PRIMARY KEY,
                parameter_int_value INTEGER,
                parameter_double_value REAL,
                parameter_str_value TEXT
            )",
            [],
        )
        .map_err(|e| AppError::Database(e.to_string()))?;

        let store = Arc::new(Self {
            conn: Mutex::new(conn),
            bus: Arc::clone(&bus),
            tokens: Mutex::new(Vec::new()),
        });

        store.subscribe_mutations();
        store.subscribe_hydration();
        Ok(store)
    }

    fn subscribe_mutations(self: &Arc<Self>) {
        let store = Arc::clone(self);
        let t1 = self.bus.on::<SetGain, _>("set_gain", move |evt: SetGain| {
            store.put_double(&gain_key(evt.side, evt.channel_number), evt.gain_db);
        });

        let store = Arc::clone(self);
        let t2 = self.bus.on::<SetMute, _>("set_mute", move |evt: SetMute| {
            store.put_int(
                &mute_key(evt.side, evt.channel_number),
                if evt.mute { 1 } else { 0 },
            );
        });

        let store = Arc::clone(self);
        let t3 = self.bus.on::<SetMixer, _>("set_mixer", move |evt: SetMixer| {
            store.put_int(
                &routing_key(evt.input_channel, evt.output_channel),
                if evt.mix { 1 } else { 0 },
            );
        });

        // `set_filter` is also handled by each Equalizer instance, which
        // owns the reply broadcast; the store must persist and stay silent.
        let store = Arc::clone(self);
        let t4 = self.bus.on::<SetFilter, _>("set_filter", move |evt: SetFilter| {
            let prefix = filter_prefix(evt.side, evt.channel_number, evt.filter_id);
            store.put_int(&format!("{prefix}_enabled"), if evt.filter_enabled { 1 } else { 0 });
            store.put_str(&format!("{prefix}_filter_type"), filter_kind_name(evt.filter_type));
            store.put_double(&format!("{prefix}_center_frequency"), evt.center_frequency);
            store.put_double(&format!("{prefix}_q_factor"), evt.q_factor);
            store.put_double(&format!("{prefix}_gain_db"), evt.gain_db);
        });

        let mut tokens = self.tokens.lock().unwrap();
        tokens.push(("set_gain", t1));
        tokens.push(("set_mute", t2));
        tokens.push(("set_mixer", t3));
        tokens.push(("set_filter", t4));
    }

    fn subscribe_hydration(self: &Arc<Self>) {
        let store = Arc::clone(self);
        let t1 = self.bus.on::<GetDatabaseGain, _>("get_database_gain", move |evt: GetDatabaseGain| {
            let value = store.get_double(&gain_key(evt.side, evt.channel_number));
            (evt.reply)(value);
        });

        let store = Arc::clone(self);
        let t2 = self.bus.on::<GetDatabaseMute, _>("get_database_mute", move |evt: GetDatabaseMute| {
            let value = store.get_int(&mute_key(evt.side, evt.channel_number)).map(|v| v != 0);
            (evt.reply)(value);
        });

        let store = Arc::clone(self);
        let t3 = self.bus.on::<GetDatabaseMixer, _>("get_database_mixer", move |evt: GetDatabaseMixer| {
            let value = store
                .get_int(&routing_key(evt.input_channel, evt.output_channel))
                .map(|v| v != 0);
            (evt.reply)(value);
        });

        let store = Arc::clone(self);
        let t4 = self.bus.on::<GetDatabaseFilter, _>("get_database_filter", move |evt: GetDatabaseFilter| {
            let prefix = filter_prefix(evt.side, evt.channel_number, evt.filter_id);
            let enabled = store.get_int(&format!("{prefix}_enabled"));
            let kind = store
                .get_str(&format!("{prefix}_filter_type"))
                .and_then(|s| parse_filter_kind(&s));
            let center_frequency = store.get_double(&format!("{prefix}_center_frequency"));
            let q_factor = store.get_double(&format!("{prefix}_q_factor"));
            let gain_db = store.get_double(&format!("{prefix}_gain_db"));

            let value = match (enabled, kind, center_frequency, q_factor, gain_db) {
                (Some(enabled), Some(kind), Some(cf), Some(q), Some(gain)) => {
                    Some((enabled != 0, kind, cf, q, gain))
                }
                _ => None,
            };
            (evt.reply)(value);
        });

        let mut tokens = self.tokens.lock().unwrap();
        tokens.push(("get_database_gain", t1));
        tokens.push(("get_database_mute", t2));
        tokens.push(("get_database_mixer", t3));
        tokens.push(("get_database_filter", t4));
    }

    /// Locks the connection, translating a poisoned mutex into `AppError`
    /// instead of panicking the calling thread (a bus subscriber callback).
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, AppError> {
        self.conn
            .lock()
            .map_err(|e| AppError::LockPoisoned(e.to_string()))
    }

    fn put_double(&self, key: &str, value: f64) {
        let conn = match self.lock_conn() {
            Ok(conn) => conn,
            Err(e) => {
                warn!("parameter store lock poisoned while writing {key}: {e}");
                return;
            }
        };
        if let Err(e) = conn.execute("DELETE FROM audio_parameters WHERE parameter_name = ?1", params![key]) {
            warn!("parameter store delete failed for {key}: {e}");
            return;
        }
        if let Err(e) = conn.execute(
            "INSERT INTO audio_parameters (parameter_name, parameter_double_value) VALUES (?1, ?2)",
            params![key, value],
        ) {
            warn!("parameter store insert failed for {key}: {e}");
        }
    }

    fn put_int(&self, key: &str, value: i64) {
        let conn = match self.lock_conn() {
            Ok(conn) => conn,
            Err(e) => {
                warn!("parameter store lock poisoned while writing {key}: {e}");
                return;
            }
        };
        if let Err(e) = conn.execute("DELETE FROM audio_parameters WHERE parameter_name = ?1", params![key]) {
            warn!("parameter store delete failed for {key}: {e}");
            return;
        }
        if let Err(e) = conn.execute(
            "INSERT INTO audio_parameters (parameter_name, parameter_int_value) VALUES (?1, ?2)",
            params![key, value],
        ) {
            warn!("parameter store insert failed for {key}: {e}");
        }
    }

    fn put_str(&self, key: &str, value: &str) {
        let conn = match self.lock_conn() {
            Ok(conn) => conn,
            Err(e) => {
                warn!("parameter store lock poisoned while writing {key}: {e}");
                return;
            }
        };
        if let Err(e) = conn.execute("DELETE FROM audio_parameters WHERE parameter_name = ?1", params![key]) {
            warn!("parameter store delete failed for {key}: {e}");
            return;
        }
        if let Err(e) = conn.execute(
            "INSERT INTO audio_parameters (parameter_name, parameter_str_value) VALUES (?1, ?2)",
            params![key, value],
        ) {
            warn!("parameter store insert failed for {key}: {e}");
        }
    }

    fn get_double(&self, key: &str) -> Option<f64> {
        let conn = match self.lock_conn() {
            Ok(conn) => conn,
            Err(e) => {
                warn!("parameter store lock poisoned while reading {key}: {e}");
                return None;
            }
        };
        conn.query_row(
            "SELECT parameter_double_value FROM audio_parameters WHERE parameter_name = ?1",
            params![key],
            |row| row.get(0),
        )
        .ok()
        .flatten()
    }

    fn get_int(&self, key: &str) -> Option<i64> {
        let conn = match self.lock_conn() {
            Ok(conn) => conn,
            Err(e) => {
                warn!("parameter store lock poisoned while reading {key}: {e}");
                return None;
            }
        };
        conn.query_row(
            "SELECT parameter_int_value FROM audio_parameters WHERE parameter_name = ?1",
            params![key],
            |row| row.get(0),
        )
        .ok()
        .flatten()
    }

    fn get_str(&self, key: &str) -> Option<String> {
        let conn = match self.lock_conn() {
            Ok(conn) => conn,
            Err(e) => {
                warn!("parameter store lock poisoned while reading {key}: {e}");
                return None;
            }
        };
        conn.query_row(
            "SELECT parameter_str_value FROM audio_parameters WHERE parameter_name = ?1",
            params![key],
            |row| row.get(0),
        )
        .ok()
        .flatten()
    }
}

impl Drop for ParameterStore {
    fn drop(&mut self) {
        for (name, token) in self.tokens.lock().unwrap().drain(..) {
            self.bus.off(name, token);
        }
    }
}

fn gain_key(side: Side, channel_number: u16) -> String {
    format!("{side}_volume_{channel_number}")
}

fn mute_key(side: Side, channel_number: u16) -> String {
    format!("{side}_mute_{channel_number}")
}

fn routing_key(input_channel: u16, output_channel: u16) -> String {
    format!("routing_{input_channel}_{output_channel}")
}

fn filter_prefix(side: Side, channel_number: u16, filter_id: u8) -> String {
    format!("{side}_filter_{channel_number}_{filter_id}")
}

fn filter_kind_name(kind: FilterKind) -> &'static str {
    match kind {
        FilterKind::Lowpass => "lowpass",
        FilterKind::Highpass => "highpass",
        FilterKind::Notch => "notch",
        FilterKind::Peaking => "peaking",
    }
}

fn parse_filter_kind(name: &str) -> Option<FilterKind> {
    match name {
        "lowpass" => Some(FilterKind::Lowpass),
        "highpass" => Some(FilterKind::Highpass),
        "notch" => Some(FilterKind::Notch),
        "peaking" => Some(FilterKind::Peaking),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{self, GetDatabaseGain as GetDatabaseGainEvt};
    use tempfile::NamedTempFile;

    fn temp_store(bus: Arc<EventBus>) -> Arc<ParameterStore> {
        let file = NamedTempFile::new().unwrap();
        ParameterStore::open(file.path(), bus).unwrap()
    }

    #[test]
    fn set_gain_then_hydrate_round_trips() {
        let bus = EventBus::new();
        let _store = temp_store(Arc::clone(&bus));

        bus.emit(
            "set_gain",
            SetGain {
                side: Side::Input,
                channel_number: 1,
                gain_db: -6.0,
            },
        );

        let value = events::hydrate(&bus, "get_database_gain", |reply| GetDatabaseGainEvt {
            side: Side::Input,
            channel_number: 1,
            reply,
        });
        assert_eq!(value, Some(-6.0));
    }

    #[test]
    fn hydration_miss_returns_none() {
        let bus = EventBus::new();
        let _store = temp_store(Arc::clone(&bus));

        let value = events::hydrate(&bus, "get_database_gain", |reply| GetDatabaseGainEvt {
            side: Side::Output,
            channel_number: 9,
            reply,
        });
        assert_eq!(value, None);
    }

    #[test]
    fn set_filter_persists_all_five_attributes() {
        let bus = EventBus::new();
        let _store = temp_store(Arc::clone(&bus));

        bus.emit(
            "set_filter",
            SetFilter {
                side: Side::Output,
                channel_number: 2,
                filter_id: 5,
                filter_enabled: true,
                filter_type: FilterKind::Notch,
                center_frequency: 250.0,
                q_factor: 1.2,
                gain_db: 0.0,
            },
        );

        let value = events::hydrate(&bus, "get_database_filter", |reply| GetDatabaseFilter {
            side: Side::Output,
            channel_number: 2,
            filter_id: 5,
            reply,
        });
        let (enabled, kind, cf, q, gain) = value.expect("row persisted");
        assert!(enabled);
        assert_eq!(kind, FilterKind::Notch);
        assert_eq!(cf, 250.0);
        assert_eq!(q, 1.2);
        assert_eq!(gain, 0.0);
    }

    #[test]
    fn set_filter_does_not_broadcast_notify_filter() {
        let bus = EventBus::new();
        let _store = temp_store(Arc::clone(&bus));

        let fired = Arc::new(Mutex::new(false));
        let fired_write = Arc::clone(&fired);
        bus.on::<crate::events::NotifyFilter, _>("notify_filter", move |_evt| {
            *fired_write.lock().unwrap() = true;
        });

        bus.emit(
            "set_filter",
            SetFilter {
                side: Side::Input,
                channel_number: 1,
                filter_id: 1,
                filter_enabled: true,
                filter_type: FilterKind::Peaking,
                center_frequency: 1000.0,
                q_factor: 0.707,
                gain_db: 0.0,
            },
        );

        assert!(!*fired.lock().unwrap());
    }
}
