//! End-to-end scenarios from spec.md §8, driven against
//! `MemoryCoordinationStore` plus small in-process fake service instances
//! built on `tokio::io::duplex`, matching the teacher's
//! `#[tokio::test]`-based integration-test convention
//! (`agentgateway/crates/agentgateway/tests/integration.rs`).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::SinkExt;
use mesh_client::error::DispatchError;
use mesh_client::receptacle::ValueReceptacle;
use mesh_client::store::{MemoryCoordinationStore, ServiceRecord, ServiceRecordConfig};
use mesh_client::transport::RpcTransport;
use mesh_client::wire::{BincodeCodec, Codec, RequestEnvelope, ResponseEnvelope, ServiceHandshake};
use mesh_client::{ClientConfig, Query, ServiceClient};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Reply {
    y: i32,
}

#[derive(Clone, Debug)]
enum Behavior {
    RespondAfter(Duration, i32),
    /// Fails the RPC call itself (handshake succeeds, the forward call errors).
    FailRpc,
    /// Reports `registered: false` on the first N handshakes, then succeeds.
    DeregisteredThenOkay { remaining_false: u32, y: i32 },
}

#[derive(Clone, Default)]
struct ScriptedTransport {
    behaviors: Arc<Mutex<HashMap<String, Behavior>>>,
    calls: Arc<Mutex<Vec<String>>>,
    /// `request_info.request_id` observed on each served call, in call
    /// order, regardless of which instance served it.
    request_ids: Arc<Mutex<Vec<String>>>,
}

impl ScriptedTransport {
    fn new() -> Self {
        Self::default()
    }

    fn set(&self, addr: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(addr.to_string(), behavior);
    }

    fn call_count(&self, addr: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.as_str() == addr)
            .count()
    }

    fn request_ids(&self) -> Vec<String> {
        self.request_ids.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl RpcTransport for ScriptedTransport {
    type Stream = tokio::io::DuplexStream;

    async fn connect(&self, address: &str) -> Result<Self::Stream, DispatchError> {
        let (client_side, server_side) = tokio::io::duplex(16384);
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .unwrap_or(Behavior::RespondAfter(Duration::ZERO, 0));
        let calls = self.calls.clone();
        let address = address.to_string();
        let behaviors = self.behaviors.clone();
        let request_ids = self.request_ids.clone();
        tokio::spawn(async move {
            serve(server_side, address, behavior, calls, behaviors, request_ids).await;
        });
        Ok(client_side)
    }
}

async fn serve(
    stream: tokio::io::DuplexStream,
    address: String,
    behavior: Behavior,
    calls: Arc<Mutex<Vec<String>>>,
    behaviors: Arc<Mutex<HashMap<String, Behavior>>>,
    request_ids: Arc<Mutex<Vec<String>>>,
) {
    let mut frames = Framed::new(stream, LengthDelimitedCodec::new());

    let registered = match behavior.clone() {
        Behavior::DeregisteredThenOkay { remaining_false, y } if remaining_false > 0 => {
            behaviors.lock().unwrap().insert(
                address.clone(),
                Behavior::DeregisteredThenOkay {
                    remaining_false: remaining_false - 1,
                    y,
                },
            );
            false
        },
        _ => true,
    };

    let hs = BincodeCodec::encode(&ServiceHandshake { registered }).unwrap();
    if frames.send(hs.into()).await.is_err() {
        return;
    }
    let Some(Ok(_client_hs)) = frames.next().await else {
        return;
    };
    if !registered {
        // Client is expected to close and retry with a fresh connection.
        return;
    }

    let Some(Ok(req)) = frames.next().await else {
        return;
    };
    let envelope: RequestEnvelope = BincodeCodec::decode(&req).unwrap();
    calls.lock().unwrap().push(address.clone());
    request_ids
        .lock()
        .unwrap()
        .push(envelope.request_info.request_id.clone());

    match behavior {
        Behavior::RespondAfter(delay, y) => {
            if delay > Duration::ZERO {
                tokio::time::sleep(delay).await;
            }
            let out = BincodeCodec::encode(&Reply { y }).unwrap();
            let resp = BincodeCodec::encode(&ResponseEnvelope { output: out }).unwrap();
            let _ = frames.send(resp.into()).await;
        },
        Behavior::FailRpc => {
            // Drop the connection without responding: the client observes a
            // transport error (unexpected EOF) and treats it as this
            // attempt's error.
        },
        Behavior::DeregisteredThenOkay { y, .. } => {
            let out = BincodeCodec::encode(&Reply { y }).unwrap();
            let resp = BincodeCodec::encode(&ResponseEnvelope { output: out }).unwrap();
            let _ = frames.send(resp.into()).await;
        },
    }
}

fn put_instance(store: &MemoryCoordinationStore, path: &str, addr: &str, name: &str) {
    store.put(
        path,
        ServiceRecord {
            config: ServiceRecordConfig {
                service_addr: addr.to_string(),
                name: name.to_string(),
            },
            registered: true,
        }
        .encode(),
    );
}

fn remove_instance(store: &MemoryCoordinationStore, path: &str, addr: &str, name: &str) {
    store.put(
        path,
        ServiceRecord {
            config: ServiceRecordConfig {
                service_addr: addr.to_string(),
                name: name.to_string(),
            },
            registered: false,
        }
        .encode(),
    );
}

/// Scenario 2: hedge races to the faster instance; the slower one's result
/// is discarded.
#[tokio::test]
async fn hedge_races_to_faster_instance() {
    let store = Arc::new(MemoryCoordinationStore::new());
    put_instance(&store, "/services/a", "A", "svc");
    put_instance(&store, "/services/b", "B", "svc");

    let transport = ScriptedTransport::new();
    transport.set("A", Behavior::RespondAfter(Duration::from_millis(90), 1));
    transport.set("B", Behavior::RespondAfter(Duration::from_millis(10), 2));

    let client = ServiceClient::new(
        store,
        Query::new("/services"),
        ClientConfig {
            retry_interval: Duration::from_millis(20),
            giveup_deadline: Duration::from_millis(500),
            connection_pool_size: 2,
        },
        transport,
        None,
    );
    tokio::time::sleep(Duration::from_millis(30)).await;

    let mut out = Reply::default();
    let mut receptacle = ValueReceptacle::new(&mut out);
    let started = tokio::time::Instant::now();
    client
        .send(None, "svc.M", &serde_json::json!({}), &mut receptacle)
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(out, Reply { y: 2 });
}

/// Scenario 3: every instance fails; `Send` returns the last attempt error,
/// not the timeout sentinel.
#[tokio::test]
async fn all_instances_fail_returns_last_error_not_timeout() {
    let store = Arc::new(MemoryCoordinationStore::new());
    put_instance(&store, "/services/a", "A", "svc");
    put_instance(&store, "/services/b", "B", "svc");

    let transport = ScriptedTransport::new();
    transport.set("A", Behavior::FailRpc);
    transport.set("B", Behavior::FailRpc);

    let client = ServiceClient::new(
        store,
        Query::new("/services"),
        ClientConfig {
            retry_interval: Duration::from_millis(20),
            giveup_deadline: Duration::from_millis(150),
            connection_pool_size: 2,
        },
        transport,
        None,
    );
    tokio::time::sleep(Duration::from_millis(30)).await;

    let mut out = Reply::default();
    let mut receptacle = ValueReceptacle::new(&mut out);
    let result = client
        .send(None, "svc.M", &serde_json::json!({}), &mut receptacle)
        .await;
    assert!(matches!(result, Err(DispatchError::Transport(_))));
}

/// Scenario 4: registry starts empty; `Send` blocks until the watcher
/// publishes an instance, then returns its result.
#[tokio::test]
async fn empty_then_populated_registry_unblocks_send() {
    let store = Arc::new(MemoryCoordinationStore::new());
    let transport = ScriptedTransport::new();
    transport.set("A", Behavior::RespondAfter(Duration::ZERO, 42));

    let client = ServiceClient::new(
        store.clone(),
        Query::new("/services"),
        ClientConfig {
            retry_interval: Duration::ZERO,
            giveup_deadline: Duration::from_millis(500),
            connection_pool_size: 1,
        },
        transport,
        None,
    );

    let send_fut = {
        let mut out = Reply::default();
        async move {
            let mut receptacle = ValueReceptacle::new(&mut out);
            client
                .send(None, "svc.M", &serde_json::json!({}), &mut receptacle)
                .await
                .unwrap();
            out
        }
    };
    let handle = tokio::spawn(send_fut);

    tokio::time::sleep(Duration::from_millis(30)).await;
    put_instance(&store, "/services/a", "A", "svc");

    let out = tokio::time::timeout(Duration::from_millis(200), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(out, Reply { y: 42 });
}

/// Scenario 5: the first attempt picks an instance that is removed from the
/// registry mid-call; a later tick picks a still-live instance instead.
#[tokio::test]
async fn mid_call_removal_redirects_to_surviving_instance() {
    let store = Arc::new(MemoryCoordinationStore::new());
    put_instance(&store, "/services/a", "A", "svc");

    let transport = ScriptedTransport::new();
    // A never responds (simulates a hang); it gets removed mid-call.
    transport.set("A", Behavior::RespondAfter(Duration::from_secs(10), 1));
    transport.set("B", Behavior::RespondAfter(Duration::ZERO, 9));

    let client = ServiceClient::new(
        store.clone(),
        Query::new("/services"),
        ClientConfig {
            retry_interval: Duration::from_millis(20),
            giveup_deadline: Duration::from_millis(500),
            connection_pool_size: 2,
        },
        transport,
        None,
    );
    tokio::time::sleep(Duration::from_millis(20)).await;

    let send_handle = tokio::spawn({
        let mut out = Reply::default();
        async move {
            let mut receptacle = ValueReceptacle::new(&mut out);
            client
                .send(None, "svc.M", &serde_json::json!({}), &mut receptacle)
                .await
                .unwrap();
            out
        }
    });

    tokio::time::sleep(Duration::from_millis(5)).await;
    remove_instance(&store, "/services/a", "A", "svc");
    put_instance(&store, "/services/b", "B", "svc");

    let out = tokio::time::timeout(Duration::from_millis(300), send_handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(out, Reply { y: 9 });
}

/// Scenario 6: a handshake reporting `registered: false` is retried by the
/// factory until the peer reports itself registered.
#[tokio::test]
async fn handshake_re_registration_loop_eventually_succeeds() {
    let store = Arc::new(MemoryCoordinationStore::new());
    put_instance(&store, "/services/a", "A", "svc");

    let transport = ScriptedTransport::new();
    transport.set(
        "A",
        Behavior::DeregisteredThenOkay {
            remaining_false: 2,
            y: 7,
        },
    );

    let client = ServiceClient::new(
        store,
        Query::new("/services"),
        ClientConfig {
            retry_interval: Duration::from_millis(20),
            giveup_deadline: Duration::from_millis(500),
            connection_pool_size: 1,
        },
        transport.clone(),
        None,
    );
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut out = Reply::default();
    let mut receptacle = ValueReceptacle::new(&mut out);
    client
        .send(None, "svc.M", &serde_json::json!({}), &mut receptacle)
        .await
        .unwrap();
    assert_eq!(out, Reply { y: 7 });
    assert_eq!(transport.call_count("A"), 1);
}

/// `Send` generates one `RequestInfo` per call and shares it across every
/// hedge attempt (spec.md §4.5): two instances that both hang long enough
/// for the retry ticker to fire a second attempt must both observe the same
/// `request_id`, even though each attempt opens its own connection.
#[tokio::test]
async fn hedged_attempts_share_one_request_id() {
    let store = Arc::new(MemoryCoordinationStore::new());
    put_instance(&store, "/services/a", "A", "svc");
    put_instance(&store, "/services/b", "B", "svc");

    let transport = ScriptedTransport::new();
    transport.set("A", Behavior::RespondAfter(Duration::from_millis(150), 1));
    transport.set("B", Behavior::RespondAfter(Duration::from_millis(150), 2));

    let client = ServiceClient::new(
        store,
        Query::new("/services"),
        ClientConfig {
            retry_interval: Duration::from_millis(20),
            giveup_deadline: Duration::from_millis(500),
            connection_pool_size: 2,
        },
        transport.clone(),
        None,
    );
    tokio::time::sleep(Duration::from_millis(30)).await;

    let mut out = Reply::default();
    let mut receptacle = ValueReceptacle::new(&mut out);
    client
        .send(None, "svc.M", &serde_json::json!({}), &mut receptacle)
        .await
        .unwrap();

    let request_ids = transport.request_ids();
    assert_eq!(request_ids.len(), 2, "both instances should have been hedged to");
    assert_eq!(
        request_ids[0], request_ids[1],
        "every hedge attempt for one Send call must carry the same request_id"
    );
}
