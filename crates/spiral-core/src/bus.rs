//! Internal event bus (spec §4.G) — an ordered, in-process topic bus with bounded
//! history and optional per-subscription HMAC-SHA256 signature verification.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Topics used by the core (spec §4.G table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    StoreMemoryRequest,
    MemoryStored,
    RetrieveMemoryRequest,
    MemoryRetrieved,
    SearchMemoriesRequest,
    MemoriesSearched,
    SystemTick,
    GcTick,
    RebuildStats,
    SigilCollision,
    EventInvalidSignature,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::StoreMemoryRequest => "store_memory_request",
            Topic::MemoryStored => "memory_stored",
            Topic::RetrieveMemoryRequest => "retrieve_memory_request",
            Topic::MemoryRetrieved => "memory_retrieved",
            Topic::SearchMemoriesRequest => "search_memories_request",
            Topic::MemoriesSearched => "memories_searched",
            Topic::SystemTick => "system_tick",
            Topic::GcTick => "gc_tick",
            Topic::RebuildStats => "rebuild_stats",
            Topic::SigilCollision => "sigil:collision",
            Topic::EventInvalidSignature => "event:invalid_signature",
        }
    }
}

/// An event carried on the bus. `signature` is only present on signed payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub topic: Topic,
    pub request_id: Option<String>,
    pub payload: serde_json::Value,
    pub signature: Option<String>,
}

impl Event {
    pub fn new(topic: Topic, payload: serde_json::Value) -> Self {
        Self { topic, request_id: None, payload, signature: None }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

struct Subscription {
    module: String,
    handler: Handler,
    verify_signature: bool,
}

/// Ordered, in-process pub/sub bus (spec §4.G). Handlers run synchronously, in
/// subscription order, on the emitting call's continuation.
pub struct EventBus {
    subscribers: Mutex<HashMap<Topic, Vec<Subscription>>>,
    history: Mutex<VecDeque<Event>>,
    history_capacity: usize,
    signing_key: Option<Vec<u8>>,
}

impl EventBus {
    pub fn new(history_capacity: usize, signing_key: Option<Vec<u8>>) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity: history_capacity.max(1),
            signing_key,
        }
    }

    /// Subscribe `module` to `topic`. At-most-once per `(module, topic)`: a repeat
    /// subscription replaces the previous handler in place, preserving its original
    /// position in dispatch order.
    pub fn subscribe(
        &self,
        topic: Topic,
        module: impl Into<String>,
        verify_signature: bool,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) {
        let module = module.into();
        let mut subs = self.subscribers.lock().expect("bus subscribers mutex poisoned");
        let list = subs.entry(topic).or_default();
        let sub = Subscription { module: module.clone(), handler: Arc::new(handler), verify_signature };
        if let Some(slot) = list.iter_mut().find(|s| s.module == module) {
            *slot = sub;
        } else {
            list.push(sub);
        }
    }

    pub fn unsubscribe(&self, topic: Topic, module: &str) {
        let mut subs = self.subscribers.lock().expect("bus subscribers mutex poisoned");
        if let Some(list) = subs.get_mut(&topic) {
            list.retain(|s| s.module != module);
        }
    }

    /// Emit `event`. Handlers that opted into signature verification are skipped (and
    /// `event:invalid_signature` is emitted once) if the signature does not verify.
    pub fn emit(&self, event: Event) {
        self.record_history(event.clone());

        let handlers: Vec<(Handler, bool)> = {
            let subs = self.subscribers.lock().expect("bus subscribers mutex poisoned");
            subs.get(&event.topic)
                .map(|list| list.iter().map(|s| (s.handler.clone(), s.verify_signature)).collect())
                .unwrap_or_default()
        };

        let mut signature_failed = false;
        for (handler, verify_signature) in handlers {
            if verify_signature && !self.verify(&event) {
                signature_failed = true;
                continue;
            }
            handler(&event);
        }

        if signature_failed && event.topic != Topic::EventInvalidSignature {
            self.emit(Event::new(
                Topic::EventInvalidSignature,
                serde_json::json!({ "topic": event.topic.as_str() }),
            ));
        }
    }

    fn verify(&self, event: &Event) -> bool {
        let (Some(key), Some(signature)) = (&self.signing_key, &event.signature) else {
            return false;
        };
        let mut mac = match HmacSha256::new_from_slice(key) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(event.payload.to_string().as_bytes());
        let expected = hex_encode(&mac.finalize().into_bytes());
        expected == *signature
    }

    fn record_history(&self, event: Event) {
        let mut history = self.history.lock().expect("bus history mutex poisoned");
        if history.len() >= self.history_capacity {
            history.pop_front();
        }
        history.push_back(event);
    }

    pub fn history(&self) -> Vec<Event> {
        self.history.lock().expect("bus history mutex poisoned").iter().cloned().collect()
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(s, "{b:02x}").expect("writing to String never fails");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn dispatches_in_subscription_order() {
        let bus = EventBus::new(100, None);
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        bus.subscribe(Topic::SystemTick, "first", false, move |_| o1.lock().unwrap().push(1));
        let o2 = order.clone();
        bus.subscribe(Topic::SystemTick, "second", false, move |_| o2.lock().unwrap().push(2));

        bus.emit(Event::new(Topic::SystemTick, serde_json::json!({})));
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn resubscribe_same_module_replaces_handler() {
        let bus = EventBus::new(100, None);
        let calls = Arc::new(AtomicUsize::new(0));

        let c1 = calls.clone();
        bus.subscribe(Topic::SystemTick, "m", false, move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = calls.clone();
        bus.subscribe(Topic::SystemTick, "m", false, move |_| {
            c2.fetch_add(10, Ordering::SeqCst);
        });

        bus.emit(Event::new(Topic::SystemTick, serde_json::json!({})));
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn bounded_history_drops_oldest() {
        let bus = EventBus::new(2, None);
        bus.emit(Event::new(Topic::SystemTick, serde_json::json!(1)));
        bus.emit(Event::new(Topic::SystemTick, serde_json::json!(2)));
        bus.emit(Event::new(Topic::SystemTick, serde_json::json!(3)));
        let history = bus.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].payload, serde_json::json!(2));
    }

    #[test]
    fn invalid_signature_skips_handler_and_emits_notice() {
        let bus = EventBus::new(100, Some(b"secret".to_vec()));
        let called = Arc::new(AtomicUsize::new(0));
        let c = called.clone();
        bus.subscribe(Topic::MemoryStored, "secure", true, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let mut event = Event::new(Topic::MemoryStored, serde_json::json!({ "id": "x" }));
        event.signature = Some("not-a-real-signature".to_string());
        bus.emit(event);

        assert_eq!(called.load(Ordering::SeqCst), 0);
        let history = bus.history();
        assert!(history.iter().any(|e| e.topic == Topic::EventInvalidSignature));
    }
}
