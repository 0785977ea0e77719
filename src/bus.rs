use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Opaque handle returned by [`EventBus::on`]; pass it to [`EventBus::off`]
/// to remove exactly that subscription.
pub type Token = u64;

type ErasedHandler = Arc<dyn Any + Send + Sync>;

struct Subscription {
    token: Token,
    handler: ErasedHandler,
}

#[derive(Default)]
struct Registry {
    subs: HashMap<String, Vec<Subscription>>,
}

/// A name → subscribers registry delivering typed payloads synchronously to
/// handlers. Held as an explicit `Arc<EventBus>` collaborator passed into
/// every component's constructor, rather than reached through a process
/// global (see DESIGN.md, REDESIGN FLAG "singleton event bus").
///
/// `emit` is polymorphic over the argument type per event name: subscribers
/// for `"set_gain"` all expect the same payload type. Mixing payload types
/// under one event name is a programmer error; `emit` simply skips any
/// subscriber whose stored handler doesn't downcast to the call's type
/// rather than panicking, since a hot audio-adjacent path should never
/// panic on a control-plane bug.
pub struct EventBus {
    registry: Mutex<Registry>,
    next_token: AtomicU64,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            registry: Mutex::new(Registry::default()),
            next_token: AtomicU64::new(1),
        })
    }

    /// Register `handler` under `name`. Returns an id unique within `name`.
    pub fn on<Args, F>(&self, name: &str, handler: F) -> Token
    where
        Args: 'static,
        F: Fn(Args) + Send + Sync + 'static,
    {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let boxed: Box<dyn Fn(Args) + Send + Sync> = Box::new(handler);
        let erased: ErasedHandler = Arc::new(boxed);

        let mut registry = self.registry.lock().unwrap();
        registry
            .subs
            .entry(name.to_string())
            .or_default()
            .push(Subscription { token, handler: erased });
        token
    }

    /// Remove a subscription previously returned by `on`. No-op if absent.
    pub fn off(&self, name: &str, token: Token) {
        let mut registry = self.registry.lock().unwrap();
        if let Some(subs) = registry.subs.get_mut(name) {
            subs.retain(|s| s.token != token);
        }
    }

    /// Invoke every live subscriber for `name`, synchronously, in
    /// registration order. The subscriber list is snapshotted under the
    /// lock and dispatched after releasing it, so handlers may freely
    /// re-enter the bus (subscribe, unsubscribe, or emit further events)
    /// without deadlocking.
    pub fn emit<Args>(&self, name: &str, args: Args)
    where
        Args: Clone + 'static,
    {
        let handlers: Vec<ErasedHandler> = {
            let registry = self.registry.lock().unwrap();
            match registry.subs.get(name) {
                Some(subs) => subs.iter().map(|s| s.handler.clone()).collect(),
                None => return,
            }
        };

        for handler in handlers {
            if let Some(f) = handler.downcast_ref::<Box<dyn Fn(Args) + Send + Sync>>() {
                f(args.clone());
            }
        }
    }

    /// Number of live subscribers for `name` — used by tests and by
    /// diagnostics logging, never on the audio thread.
    pub fn subscriber_count(&self, name: &str) -> usize {
        let registry = self.registry.lock().unwrap();
        registry.subs.get(name).map(Vec::len).unwrap_or(0)
    }
}
