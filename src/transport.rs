use crate::channel::Side;
use crate::dsp::biquad::FilterParams;
use crate::dsp::FilterKind;
use crate::error::AppError;
use crate::events::{
    GetFilter, GetGain, GetMeter, GetMixer, GetMute, NotifyFilter, NotifyGain, NotifyMeter,
    NotifyMixer, NotifyMute, SetFilter, SetGain, SetMixer, SetMute,
};
use crate::bus::EventBus;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;

/// `±20 dB`, the transport-enforced gain bound (DESIGN.md, Open Question c).
const MAX_GAIN_DB: f64 = 20.0;

/// Message server: parses inbound JSON commands into bus events and
/// broadcasts every `notify_*`/error reply to every connected peer.
///
/// Replies are broadcast, not replied-to-sender, intentionally: the spec
/// wants every connected UI to stay in sync, not just the one that issued
/// the command.
pub struct ControlTransport {
    outbound: broadcast::Sender<String>,
    sample_rate: u32,
}

impl ControlTransport {
    pub fn new(bus: Arc<EventBus>, sample_rate: u32) -> Arc<Self> {
        let (outbound, _rx) = broadcast::channel(256);
        let transport = Arc::new(Self { outbound, sample_rate });
        transport.subscribe_notifications(&bus);
        transport
    }

    /// Tee the outbound reply/broadcast stream: every JSON payload this
    /// transport sends to connected peers is also delivered here. Useful
    /// for tests and for out-of-band observers (logging, metrics) that
    /// want the same stream without opening a WebSocket connection.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.outbound.subscribe()
    }

    fn subscribe_notifications(self: &Arc<Self>, bus: &Arc<EventBus>) {
        let out = self.outbound.clone();
        bus.on::<NotifyGain, _>("notify_gain", move |evt: NotifyGain| {
            broadcast_json(
                &out,
                json!({
                    "command_type": "notify_gain",
                    "channel_type": evt.side,
                    "channel_number": evt.channel_number,
                    "gain_db": evt.gain_db,
                }),
            );
        });

        let out = self.outbound.clone();
        bus.on::<NotifyMute, _>("notify_mute", move |evt: NotifyMute| {
            broadcast_json(
                &out,
                json!({
                    "command_type": "notify_mute",
                    "channel_type": evt.side,
                    "channel_number": evt.channel_number,
                    "mute": evt.mute,
                }),
            );
        });

        let out = self.outbound.clone();
        bus.on::<NotifyMixer, _>("notify_mixer", move |evt: NotifyMixer| {
            broadcast_json(
                &out,
                json!({
                    "command_type": "notify_mixer",
                    "input_channel": evt.input_channel,
                    "output_channel": evt.output_channel,
                    "mix": evt.mix,
                }),
            );
        });

        let out = self.outbound.clone();
        bus.on::<NotifyFilter, _>("notify_filter", move |evt: NotifyFilter| {
            broadcast_json(
                &out,
                json!({
                    "command_type": if evt.ok { "notify_filter" } else { "get_filter_failed" },
                    "channel_type": evt.side,
                    "channel_number": evt.channel_number,
                    "filter_id": evt.filter_id,
                    "filter_enabled": evt.filter_enabled,
                    "filter_type": evt.filter_type,
                    "center_frequency": evt.center_frequency,
                    "q_factor": evt.q_factor,
                    "gain_db": evt.gain_db,
                }),
            );
        });

        let out = self.outbound.clone();
        bus.on::<NotifyMeter, _>("notify_meter", move |evt: NotifyMeter| {
            broadcast_json(
                &out,
                json!({
                    "command_type": "notify_meter",
                    "channel_type": evt.side,
                    "amplitudes_db": evt.amplitudes_db,
                }),
            );
        });
    }

    /// Bind and serve forever. Each accepted TCP connection is upgraded to
    /// a WebSocket and handled on its own task: one task reads inbound
    /// commands, another drains this transport's broadcast channel into
    /// the socket. A peer that can't keep up with the broadcast channel
    /// (`Lagged`) just skips ahead; a peer whose socket is gone drops its
    /// task and is silently excluded from future broadcasts.
    pub async fn serve(self: Arc<Self>, bind_addr: SocketAddr, bus: Arc<EventBus>) -> Result<(), AppError> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(AppError::Io)?;
        info!("control transport listening on {bind_addr}");
        self.serve_listener(listener, bus).await
    }

    /// Accept loop over an already-bound listener. Split out from `serve`
    /// so tests can bind an ephemeral port and hand the listener over
    /// without a bind/connect race.
    pub async fn serve_listener(self: Arc<Self>, listener: TcpListener, bus: Arc<EventBus>) -> Result<(), AppError> {
        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept failed: {e}");
                    continue;
                }
            };
            let transport = Arc::clone(&self);
            let bus = Arc::clone(&bus);
            tokio::spawn(async move {
                if let Err(e) = transport.handle_connection(stream, peer_addr, bus).await {
                    debug!("connection {peer_addr} closed: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        bus: Arc<EventBus>,
    ) -> Result<(), AppError> {
        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(|e| AppError::Device(e.to_string()))?;
        let (mut sink, mut source) = ws.split();
        let mut rx = self.outbound.subscribe();

        loop {
            tokio::select! {
                incoming = source.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            self.dispatch(&text, &bus);
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!("read error from {peer_addr}: {e}");
                            break;
                        }
                    }
                }
                outgoing = rx.recv() => {
                    match outgoing {
                        Ok(text) => {
                            if sink.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
        Ok(())
    }

    fn dispatch(&self, text: &str, bus: &Arc<EventBus>) {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                self.broadcast_error("parse_error", Some(e.to_string()));
                return;
            }
        };

        let Some(command_type) = value.get("command_type").and_then(Value::as_str) else {
            self.broadcast_error("missing_command", None);
            return;
        };

        match command_type {
            "set_gain" | "get_gain" => self.dispatch_gain(command_type, &value, bus),
            "set_mute" | "get_mute" => self.dispatch_mute(command_type, &value, bus),
            "set_mixer" | "get_mixer" => self.dispatch_mixer(command_type, &value, bus),
            "set_filter" | "get_filter" => self.dispatch_filter(command_type, &value, bus),
            "get_meter" => self.dispatch_meter(&value, bus),
            _ => self.broadcast_error("unknown_command", Some("fail".to_string())),
        }
    }

    fn dispatch_gain(&self, command_type: &str, value: &Value, bus: &Arc<EventBus>) {
        let Some((side, channel_number)) = parse_address(value) else {
            self.broadcast_error("missing_command", None);
            return;
        };
        if command_type == "get_gain" {
            bus.emit("get_gain", GetGain { side, channel_number });
            return;
        }
        let Some(gain_db) = value.get("gain_db").and_then(Value::as_f64) else {
            self.broadcast_error("missing_command", None);
            return;
        };
        if gain_db.abs() > MAX_GAIN_DB {
            self.broadcast_error("validation_error", Some("gain_db out of range".to_string()));
            return;
        }
        bus.emit(
            "set_gain",
            SetGain {
                side,
                channel_number,
                gain_db,
            },
        );
    }

    fn dispatch_mute(&self, command_type: &str, value: &Value, bus: &Arc<EventBus>) {
        let Some((side, channel_number)) = parse_address(value) else {
            self.broadcast_error("missing_command", None);
            return;
        };
        if command_type == "get_mute" {
            bus.emit("get_mute", GetMute { side, channel_number });
            return;
        }
        let Some(mute) = value.get("mute").and_then(Value::as_bool) else {
            self.broadcast_error("missing_command", None);
            return;
        };
        bus.emit(
            "set_mute",
            SetMute {
                side,
                channel_number,
                mute,
            },
        );
    }

    fn dispatch_mixer(&self, command_type: &str, value: &Value, bus: &Arc<EventBus>) {
        let (Some(input_channel), Some(output_channel)) = (
            value.get("input_channel").and_then(Value::as_u64),
            value.get("output_channel").and_then(Value::as_u64),
        ) else {
            self.broadcast_error("missing_command", None);
            return;
        };
        let input_channel = input_channel as u16;
        let output_channel = output_channel as u16;

        if command_type == "get_mixer" {
            bus.emit(
                "get_mixer",
                GetMixer {
                    input_channel,
                    output_channel,
                },
            );
            return;
        }
        let Some(mix) = value.get("mix").and_then(Value::as_bool) else {
            self.broadcast_error("missing_command", None);
            return;
        };
        bus.emit(
            "set_mixer",
            SetMixer {
                input_channel,
                output_channel,
                mix,
            },
        );
    }

    fn dispatch_filter(&self, command_type: &str, value: &Value, bus: &Arc<EventBus>) {
        let Some((side, channel_number)) = parse_address(value) else {
            self.broadcast_error("missing_command", None);
            return;
        };
        let Some(filter_id) = value.get("filter_id").and_then(Value::as_u64) else {
            self.broadcast_error("missing_command", None);
            return;
        };
        let filter_id = filter_id as u8;

        if command_type == "get_filter" {
            bus.emit(
                "get_filter",
                GetFilter {
                    side,
                    channel_number,
                    filter_id,
                },
            );
            return;
        }

        let (Some(filter_enabled), Some(filter_type), Some(center_frequency), Some(q_factor), Some(gain_db)) = (
            value.get("filter_enabled").and_then(Value::as_bool),
            value
                .get("filter_type")
                .and_then(Value::as_str)
                .and_then(parse_filter_kind),
            value.get("center_frequency").and_then(Value::as_f64),
            value.get("q_factor").and_then(Value::as_f64),
            value.get("gain_db").and_then(Value::as_f64),
        ) else {
            self.broadcast_error("missing_command", None);
            return;
        };

        let params = FilterParams {
            kind: filter_type,
            center_frequency_hz: center_frequency,
            q_factor,
            gain_db,
        };
        if gain_db.abs() > MAX_GAIN_DB || !params.is_valid(self.sample_rate) {
            self.broadcast_error("validation_error", Some("filter parameters out of range".to_string()));
            return;
        }

        bus.emit(
            "set_filter",
            SetFilter {
                side,
                channel_number,
                filter_id,
                filter_enabled,
                filter_type,
                center_frequency,
                q_factor,
                gain_db,
            },
        );
    }

    fn dispatch_meter(&self, value: &Value, bus: &Arc<EventBus>) {
        let Some(side) = value
            .get("channel_type")
            .and_then(Value::as_str)
            .and_then(parse_side)
        else {
            self.broadcast_error("missing_command", None);
            return;
        };
        bus.emit("get_meter", GetMeter { side });
    }

    fn broadcast_error(&self, error_type: &str, error_message: Option<String>) {
        let mut payload = json!({ "error_type": error_type });
        if let Some(message) = error_message {
            payload["error_message"] = Value::String(message);
        }
        broadcast_json(&self.outbound, payload);
    }
}

fn broadcast_json(out: &broadcast::Sender<String>, payload: Value) {
    let _ = out.send(payload.to_string());
}

fn parse_address(value: &Value) -> Option<(Side, u16)> {
    let side = value.get("channel_type").and_then(Value::as_str).and_then(parse_side)?;
    let channel_number = value.get("channel_number").and_then(Value::as_u64)? as u16;
    Some((side, channel_number))
}

fn parse_side(s: &str) -> Option<Side> {
    match s {
        "input" => Some(Side::Input),
        "output" => Some(Side::Output),
        _ => None,
    }
}

fn parse_filter_kind(s: &str) -> Option<FilterKind> {
    match s {
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
    use crate::events::NotifyGain;

    #[test]
    fn unknown_command_type_broadcasts_error() {
        let bus = EventBus::new();
        let transport = ControlTransport::new(Arc::clone(&bus), 48_000);
        let mut rx = transport.outbound.subscribe();

        transport.dispatch(r#"{"command_type":"frobnicate"}"#, &bus);

        let msg = rx.try_recv().expect("error broadcast");
        let value: Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(value["error_type"], "unknown_command");
    }

    #[test]
    fn missing_command_type_broadcasts_error() {
        let bus = EventBus::new();
        let transport = ControlTransport::new(Arc::clone(&bus), 48_000);
        let mut rx = transport.outbound.subscribe();

        transport.dispatch(r#"{"channel_number":1}"#, &bus);

        let msg = rx.try_recv().expect("error broadcast");
        let value: Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(value["error_type"], "missing_command");
    }

    #[test]
    fn malformed_json_broadcasts_parse_error() {
        let bus = EventBus::new();
        let transport = ControlTransport::new(Arc::clone(&bus), 48_000);
        let mut rx = transport.outbound.subscribe();

        transport.dispatch("{not json", &bus);

        let msg = rx.try_recv().expect("error broadcast");
        let value: Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(value["error_type"], "parse_error");
    }

    #[test]
    fn set_gain_emits_bus_event_and_broadcasts_notify() {
        let bus = EventBus::new();
        let transport = ControlTransport::new(Arc::clone(&bus), 48_000);
        let mut rx = transport.outbound.subscribe();

        bus.on::<NotifyGain, _>("notify_gain", move |_| {});
        transport.dispatch(
            r#"{"command_type":"set_gain","channel_type":"input","channel_number":1,"gain_db":-6.0}"#,
            &bus,
        );
        bus.emit(
            "notify_gain",
            NotifyGain {
                side: Side::Input,
                channel_number: 1,
                gain_db: -6.0,
            },
        );

        let msg = rx.try_recv().expect("notify broadcast");
        let value: Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(value["command_type"], "notify_gain");
        assert_eq!(value["gain_db"], -6.0);
    }

    #[test]
    fn out_of_range_gain_is_rejected_before_reaching_the_bus() {
        let bus = EventBus::new();
        let transport = ControlTransport::new(Arc::clone(&bus), 48_000);
        let mut rx = transport.outbound.subscribe();

        transport.dispatch(
            r#"{"command_type":"set_gain","channel_type":"input","channel_number":1,"gain_db":40.0}"#,
            &bus,
        );

        let msg = rx.try_recv().expect("error broadcast");
        let value: Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(value["error_type"], "validation_error");
    }

    #[test]
    fn filter_above_nyquist_is_rejected_before_reaching_the_bus() {
        let bus = EventBus::new();
        let transport = ControlTransport::new(Arc::clone(&bus), 48_000);
        let mut rx = transport.outbound.subscribe();

        transport.dispatch(
            r#"{"command_type":"set_filter","channel_type":"input","channel_number":1,
                "filter_id":1,"filter_enabled":true,"filter_type":"lowpass",
                "center_frequency":30000.0,"q_factor":0.707,"gain_db":0.0}"#,
            &bus,
        );

        let msg = rx.try_recv().expect("error broadcast");
        let value: Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(value["error_type"], "validation_error");
    }
}
