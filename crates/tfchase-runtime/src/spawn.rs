//! [`SpawnStateMachine`] – one-shot spawn handshake.
//!
//! Drives a [`SpawnService`] from "is anybody there?" to "the agent exists",
//! one step per [`advance`][SpawnStateMachine::advance] call:
//!
//! | State | Observation | Next state |
//! |---|---|---|
//! | `ServiceUnavailable` | service not reachable | `ServiceUnavailable` |
//! | `ServiceUnavailable` | service reachable | `ServiceReady`, then at once `RequestIssued` |
//! | `RequestIssued` | call still pending | `RequestIssued` |
//! | `RequestIssued` | call completed | `Spawned` |
//! | `RequestIssued` | call failed | `Failed` |
//! | `Spawned` / `Failed` | anything | unchanged |
//!
//! The request is sent at most once over the lifetime of the machine and
//! the state never moves backwards.  There is no timeout: an unreachable or
//! slow service is simply polled again on the next call.

use std::sync::Arc;

use tfchase_middleware::{SpawnHandle, SpawnPoll, SpawnService};
use tfchase_types::{ChaseError, SpawnRequest};
use tracing::{error, info};

/// Where the handshake currently stands.  Ordered by progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SpawnState {
    ServiceUnavailable,
    ServiceReady,
    RequestIssued,
    Spawned,
    /// The service answered the request with a failure.  Terminal.
    Failed,
}

/// What a single [`SpawnStateMachine::advance`] call observed.
#[derive(Debug, Clone, PartialEq)]
pub enum SpawnProgress {
    /// The spawn service cannot be reached yet.
    ServiceNotReady,
    /// The request was sent during this call.
    RequestIssued,
    /// The request is out; no answer yet.
    InProgress,
    /// The answer arrived during this call.
    JustSpawned { name: String },
    /// The agent was already spawned before this call.
    Spawned,
}

pub struct SpawnStateMachine {
    service: Arc<dyn SpawnService>,
    request: SpawnRequest,
    state: SpawnState,
    handle: Option<SpawnHandle>,
    spawned_name: Option<String>,
    failure: Option<String>,
    requests_issued: u32,
}

impl SpawnStateMachine {
    pub fn new(service: Arc<dyn SpawnService>, request: SpawnRequest) -> Self {
        Self {
            service,
            request,
            state: SpawnState::ServiceUnavailable,
            handle: None,
            spawned_name: None,
            failure: None,
            requests_issued: 0,
        }
    }

    pub fn state(&self) -> SpawnState {
        self.state
    }

    pub fn is_spawned(&self) -> bool {
        self.state == SpawnState::Spawned
    }

    /// Name the spawn service reported for the new agent.
    pub fn spawned_name(&self) -> Option<&str> {
        self.spawned_name.as_deref()
    }

    /// How many spawn calls have been sent.  Never exceeds one.
    pub fn requests_issued(&self) -> u32 {
        self.requests_issued
    }

    /// Take one step through the handshake.
    ///
    /// # Errors
    ///
    /// * [`ChaseError::SpawnFailed`] once the service has rejected the
    ///   request, on this and every later call.
    /// * Any error the service raises other than
    ///   [`ChaseError::ServiceNotReady`], which is reported as
    ///   [`SpawnProgress::ServiceNotReady`] instead.
    pub fn advance(&mut self) -> Result<SpawnProgress, ChaseError> {
        match self.state {
            SpawnState::ServiceUnavailable => {
                if !self.service.is_ready() {
                    info!("Service is not ready");
                    return Ok(SpawnProgress::ServiceNotReady);
                }
                self.state = SpawnState::ServiceReady;
                self.issue()
            }
            SpawnState::ServiceReady | SpawnState::RequestIssued => match self.handle {
                Some(handle) => self.check_result(handle),
                None => self.issue(),
            },
            SpawnState::Spawned => Ok(SpawnProgress::Spawned),
            SpawnState::Failed => Err(self.failed_error()),
        }
    }

    fn issue(&mut self) -> Result<SpawnProgress, ChaseError> {
        match self.service.call_async(self.request.clone()) {
            Ok(handle) => {
                self.handle = Some(handle);
                self.requests_issued += 1;
                self.state = SpawnState::RequestIssued;
                info!(
                    name = %self.request.name,
                    x = self.request.x,
                    y = self.request.y,
                    theta = self.request.theta,
                    "spawn requested"
                );
                Ok(SpawnProgress::RequestIssued)
            }
            Err(ChaseError::ServiceNotReady(reason)) => {
                info!(%reason, "Service is not ready");
                Ok(SpawnProgress::ServiceNotReady)
            }
            Err(e) => Err(e),
        }
    }

    fn check_result(&mut self, handle: SpawnHandle) -> Result<SpawnProgress, ChaseError> {
        match self.service.poll(&handle)? {
            SpawnPoll::Pending => {
                info!("Spawn is not finished");
                Ok(SpawnProgress::InProgress)
            }
            SpawnPoll::Completed { name } => {
                info!("Successfully spawned {name}");
                self.spawned_name = Some(name.clone());
                self.state = SpawnState::Spawned;
                Ok(SpawnProgress::JustSpawned { name })
            }
            SpawnPoll::Failed { reason } => {
                error!(name = %self.request.name, %reason, "spawn failed");
                self.failure = Some(reason);
                self.state = SpawnState::Failed;
                Err(self.failed_error())
            }
        }
    }

    fn failed_error(&self) -> ChaseError {
        ChaseError::SpawnFailed {
            name: self.request.name.clone(),
            reason: self.failure.clone().unwrap_or_default(),
        }
    }
}

impl std::fmt::Debug for SpawnStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnStateMachine")
            .field("request", &self.request)
            .field("state", &self.state)
            .field("spawned_name", &self.spawned_name)
            .field("requests_issued", &self.requests_issued)
            .finish_non_exhaustive()
    }
}
