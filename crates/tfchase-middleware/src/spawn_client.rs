//! Spawn service capability and a bus-backed client.
//!
//! A spawn service creates a new agent at a requested pose.  Calls are
//! asynchronous: [`SpawnService::call_async`] returns a [`SpawnHandle`]
//! immediately and the caller checks back with [`SpawnService::poll`] on its
//! own schedule.  Nothing blocks and nothing calls back.
//!
//! [`BusSpawnClient`] reaches a spawn server over the [`EventBus`]: requests
//! go out on [`Topic::SpawnRequests`], answers come back on
//! [`Topic::SpawnResponses`] and are matched by request id.  The client
//! subscribes to responses when it is created, so an answer that arrives
//! between two polls is buffered until the next poll.
//!
//! The buffer is the bus channel and has a fixed capacity.  If the client
//! falls so far behind that responses are evicted, every outstanding call
//! is answered [`SpawnPoll::Failed`]: the answer may have been among the
//! evicted events, and waiting for it could take forever.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tfchase_types::{ChaseError, Event, EventPayload, SpawnRequest, SpawnResult};
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::{EventBus, Topic, TopicReceiver};

/// Opaque token for one in-flight spawn call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpawnHandle(Uuid);

impl SpawnHandle {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn id(&self) -> Uuid {
        self.0
    }
}

/// Status of a spawn call at the time of polling.
#[derive(Debug, Clone, PartialEq)]
pub enum SpawnPoll {
    Pending,
    Completed { name: String },
    Failed { reason: String },
}

/// Anything that can create agents.
///
/// # Contract
///
/// * `is_ready` – `true` once a call would reach a live service.
/// * `call_async` – send `request` and return without waiting for the result.
/// * `poll` – report the current status of the call identified by `handle`.
///   Polling a completed call again returns the same answer.
pub trait SpawnService: Send + Sync {
    fn is_ready(&self) -> bool;

    fn call_async(&self, request: SpawnRequest) -> Result<SpawnHandle, ChaseError>;

    fn poll(&self, handle: &SpawnHandle) -> Result<SpawnPoll, ChaseError>;
}

// ────────────────────────────────────────────────────────────────────────────
// BusSpawnClient
// ────────────────────────────────────────────────────────────────────────────

struct ClientState {
    responses: TopicReceiver,
    issued: HashSet<Uuid>,
    answered: HashMap<Uuid, SpawnResult>,
}

/// [`SpawnService`] client that talks to a spawn server on the event bus.
///
/// The service counts as ready while at least one server is subscribed to
/// [`Topic::SpawnRequests`].
pub struct BusSpawnClient {
    bus: Arc<EventBus>,
    state: Mutex<ClientState>,
}

impl BusSpawnClient {
    pub fn new(bus: Arc<EventBus>) -> Self {
        let responses = bus.subscribe_to(Topic::SpawnResponses);
        Self {
            bus,
            state: Mutex::new(ClientState {
                responses,
                issued: HashSet::new(),
                answered: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ClientState>, ChaseError> {
        self.state
            .lock()
            .map_err(|e| ChaseError::Channel(format!("spawn client state poisoned: {e}")))
    }
}

impl ClientState {
    /// Move every buffered response for one of our requests into `answered`.
    ///
    /// After a lag, outstanding requests without an answer are failed.
    fn drain(&mut self) {
        let mut lagged_by = 0;
        loop {
            match self.responses.try_recv() {
                Ok(Event {
                    payload: EventPayload::SpawnCompleted { request_id, result },
                    ..
                }) if self.issued.contains(&request_id) => {
                    debug!(%request_id, ?result, "spawn response received");
                    self.answered.entry(request_id).or_insert(result);
                }
                Ok(_) => continue,
                Err(TryRecvError::Lagged(n)) => {
                    warn!(lagged_by = n, "spawn response subscriber lagged");
                    lagged_by += n;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        if lagged_by == 0 {
            return;
        }
        for request_id in &self.issued {
            self.answered.entry(*request_id).or_insert_with(|| {
                warn!(%request_id, "spawn response may have been evicted");
                SpawnResult::Failed {
                    reason: format!("spawn response lost: {lagged_by} responses evicted before polling"),
                }
            });
        }
    }
}

impl SpawnService for BusSpawnClient {
    fn is_ready(&self) -> bool {
        self.bus.receiver_count(Topic::SpawnRequests) > 0
    }

    fn call_async(&self, request: SpawnRequest) -> Result<SpawnHandle, ChaseError> {
        let request_id = Uuid::new_v4();
        let name = request.name.clone();
        let mut state = self.lock()?;
        // Register before sending so a fast answer is never discarded.
        state.issued.insert(request_id);
        let delivered = self.bus.publish_to(
            Topic::SpawnRequests,
            Event::new("tfchase::spawn", EventPayload::SpawnRequested { request_id, request }),
        )?;
        if delivered == 0 {
            state.issued.remove(&request_id);
            return Err(ChaseError::ServiceNotReady(format!(
                "no spawn server received the request for {name}"
            )));
        }
        debug!(%request_id, %name, "spawn request sent");
        Ok(SpawnHandle(request_id))
    }

    fn poll(&self, handle: &SpawnHandle) -> Result<SpawnPoll, ChaseError> {
        let mut state = self.lock()?;
        if !state.issued.contains(&handle.0) {
            return Err(ChaseError::Channel(format!("unknown spawn handle {}", handle.0)));
        }
        state.drain();
        Ok(match state.answered.get(&handle.0) {
            None => SpawnPoll::Pending,
            Some(SpawnResult::Spawned { name }) => SpawnPoll::Completed { name: name.clone() },
            Some(SpawnResult::Failed { reason }) => SpawnPoll::Failed {
                reason: reason.clone(),
            },
        })
    }
}

impl std::fmt::Debug for BusSpawnClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusSpawnClient")
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}
