//! [`PursuitNode`] – the runnable pursuit process.
//!
//! Wires everything together on one [`EventBus`]:
//!
//! * one [`PoseToFrameBroadcaster`] task per configured agent, feeding the
//!   shared frame store from [`Topic::Pose`];
//! * a [`PursuitController`] ticked by a `tokio::time::interval`, spawning the
//!   pursuer through a [`BusSpawnClient`] and steering it through a
//!   [`BusMotionSink`];
//! * a status line on [`Topic::Diagnostics`] for every tick that produced no
//!   command.
//!
//! The node runs until the shutdown signal flips to `true` or a fatal error
//! occurs.  A failed spawn stops the ticks but leaves the broadcasters
//! running until shutdown; the failure is then returned.

use std::sync::Arc;

use chrono::Utc;
use tfchase_middleware::{
    BusMotionSink, BusSpawnClient, EventBus, MotionSink, PoseToFrameBroadcaster, SpawnService, Topic,
};
use tfchase_perception::FrameStore;
use tfchase_types::{ChaseError, Event, EventPayload};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::NodeConfig;
use crate::pursuit::{PursuitController, TickOutcome};

const DIAGNOSTIC_SOURCE: &str = "tfchase::pursuit";

pub struct PursuitNode {
    config: NodeConfig,
    bus: Arc<EventBus>,
    store: Arc<dyn FrameStore>,
}

impl PursuitNode {
    /// Build a node with a fresh frame buffer from `config`.
    ///
    /// # Errors
    ///
    /// [`ChaseError::Config`] if `config` does not validate.
    pub fn new(config: NodeConfig, bus: Arc<EventBus>) -> Result<Self, ChaseError> {
        let store: Arc<dyn FrameStore> = Arc::new(config.frame_buffer());
        Self::with_store(config, bus, store)
    }

    /// Build a node around an existing frame store.
    pub fn with_store(
        config: NodeConfig,
        bus: Arc<EventBus>,
        store: Arc<dyn FrameStore>,
    ) -> Result<Self, ChaseError> {
        config.validate()?;
        Ok(Self { config, bus, store })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn FrameStore> {
        Arc::clone(&self.store)
    }

    /// Run with the bus-backed spawn client and motion sink.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), ChaseError> {
        let spawner: Arc<dyn SpawnService> = Arc::new(BusSpawnClient::new(Arc::clone(&self.bus)));
        let sink: Arc<dyn MotionSink> =
            Arc::new(BusMotionSink::new(Arc::clone(&self.bus), &self.config.pursuer_frame));
        self.run_with(spawner, sink, shutdown).await
    }

    /// Run with caller-supplied spawn service and motion sink.
    pub async fn run_with(
        &self,
        spawner: Arc<dyn SpawnService>,
        sink: Arc<dyn MotionSink>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ChaseError> {
        if *shutdown.borrow() {
            return Ok(());
        }

        let mut broadcasters = JoinSet::new();
        for b in &self.config.broadcasters {
            let broadcaster = PoseToFrameBroadcaster::new(b.agent_name.clone(), Arc::clone(&self.store))?
                .with_world_frame(self.config.world_frame.clone());
            // Subscribe here so no sample published after `run_with` starts is missed.
            let rx = self.bus.subscribe_to(Topic::Pose);
            broadcasters.spawn(async move { broadcaster.run(rx).await });
        }

        let mut controller =
            PursuitController::new(self.config.pursuit_config(), Arc::clone(&self.store), spawner, sink);
        let mut ticker = tokio::time::interval(self.config.tick_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            target_frame = %self.config.source_frame,
            pursuer_frame = %self.config.pursuer_frame,
            period_ms = self.config.tick_period_ms,
            broadcasters = self.config.broadcasters.len(),
            "pursuit node started"
        );

        let mut pursuing = true;
        let mut result = Ok(());
        loop {
            tokio::select! {
                _ = ticker.tick(), if pursuing => {
                    match controller.on_tick(Utc::now()) {
                        Ok(outcome) => self.report(&outcome),
                        Err(e @ ChaseError::SpawnFailed { .. }) => {
                            error!(error = %e, "giving up on pursuit");
                            self.publish_diagnostic(format!("Spawn failed: {e}"));
                            pursuing = false;
                            result = Err(e);
                        }
                        Err(e) => {
                            error!(error = %e, "pursuit tick failed");
                            result = Err(e);
                            break;
                        }
                    }
                }
                Some(joined) = broadcasters.join_next(), if !broadcasters.is_empty() => {
                    match joined {
                        Ok(Ok(())) => debug!("pose broadcaster finished"),
                        Ok(Err(e)) => {
                            error!(error = %e, "pose broadcaster failed");
                            result = Err(e);
                            break;
                        }
                        Err(e) => {
                            result = Err(ChaseError::Channel(format!("pose broadcaster task failed: {e}")));
                            break;
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("pursuit node shutting down");
                        break;
                    }
                }
            }
        }

        broadcasters.shutdown().await;
        result
    }

    fn report(&self, outcome: &TickOutcome) {
        if let Some(message) = outcome.diagnostic() {
            self.publish_diagnostic(message);
        }
    }

    fn publish_diagnostic(&self, message: String) {
        let event = Event::new(
            DIAGNOSTIC_SOURCE,
            EventPayload::Diagnostic {
                component: "pursuit".to_string(),
                message,
            },
        );
        if let Err(e) = self.bus.publish_to(Topic::Diagnostics, event) {
            warn!(error = %e, "failed to publish diagnostic");
        }
    }
}

impl std::fmt::Debug for PursuitNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PursuitNode")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spawn::tests::ScriptedSpawnService;
    use std::time::Duration;
    use tfchase_middleware::{SpawnPoll, TopicReceiver};
    use tfchase_perception::StampedTransform;
    use tfchase_types::{PlanarPose, PoseSample, SpawnResult, VelocityCommand};
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn fast_config() -> NodeConfig {
        NodeConfig {
            tick_period_ms: 10,
            ..NodeConfig::default()
        }
    }

    /// Answers every spawn request on the bus with `result`.
    fn spawn_server(bus: Arc<EventBus>, result: SpawnResult) -> JoinHandle<()> {
        let mut requests = bus.subscribe_to(Topic::SpawnRequests);
        tokio::spawn(async move {
            while let Ok(event) = requests.recv().await {
                if let EventPayload::SpawnRequested { request_id, .. } = event.payload {
                    bus.publish_to(
                        Topic::SpawnResponses,
                        Event::new(
                            "test::spawn_server",
                            EventPayload::SpawnCompleted {
                                request_id,
                                result: result.clone(),
                            },
                        ),
                    )
                    .unwrap();
                }
            }
        })
    }

    /// Keeps publishing the same poses until aborted.
    fn pose_source(bus: Arc<EventBus>, poses: Vec<(&'static str, PlanarPose)>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                for (agent, pose) in &poses {
                    let sample = PoseSample {
                        agent_name: agent.to_string(),
                        pose: *pose,
                        stamp: Utc::now(),
                    };
                    bus.publish_to(Topic::Pose, Event::new("test::sim", EventPayload::Pose(sample)))
                        .unwrap();
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    }

    async fn next_command(rx: &mut TopicReceiver) -> VelocityCommand {
        timeout(WAIT, async {
            loop {
                if let Ok(Event {
                    payload: EventPayload::Velocity(cmd),
                    ..
                }) = rx.recv().await
                {
                    return cmd;
                }
            }
        })
        .await
        .expect("no velocity command in time")
    }

    async fn wait_for_diagnostic(rx: &mut TopicReceiver, needle: &str) -> String {
        timeout(WAIT, async {
            loop {
                if let Ok(Event {
                    payload: EventPayload::Diagnostic { message, .. },
                    ..
                }) = rx.recv().await
                    && message.contains(needle)
                {
                    return message;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("no diagnostic containing {needle:?} in time"))
    }

    struct OfflineStore;

    impl FrameStore for OfflineStore {
        fn publish(&self, _transform: StampedTransform) -> Result<(), ChaseError> {
            Err(ChaseError::StoreConnectivity("offline".to_string()))
        }

        fn query_latest(&self, _parent: &str, _child: &str) -> Result<StampedTransform, ChaseError> {
            Err(ChaseError::StoreConnectivity("offline".to_string()))
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cfg = NodeConfig {
            tick_period_ms: 0,
            ..NodeConfig::default()
        };
        assert!(matches!(
            PursuitNode::new(cfg, Arc::new(EventBus::default())),
            Err(ChaseError::Config(_))
        ));
    }

    #[tokio::test]
    async fn chases_target_end_to_end() {
        let bus = Arc::new(EventBus::default());
        let server = spawn_server(
            bus.clone(),
            SpawnResult::Spawned {
                name: "turtle2".to_string(),
            },
        );
        let poses = pose_source(
            bus.clone(),
            vec![
                ("turtle1", PlanarPose::new(5.0, 5.0, 0.0)),
                ("turtle2", PlanarPose::new(1.0, 1.0, 0.0)),
            ],
        );
        let mut cmd_rx = bus.subscribe_to(Topic::CmdVel);

        let node = PursuitNode::new(fast_config(), bus.clone()).unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        let running = tokio::spawn(async move { node.run(stop_rx).await });

        let cmd = next_command(&mut cmd_rx).await;
        assert!((cmd.linear_x - 0.5 * 32f64.sqrt()).abs() < 1e-9, "{cmd:?}");
        assert!((cmd.angular_z - std::f64::consts::FRAC_PI_4).abs() < 1e-9, "{cmd:?}");

        stop_tx.send(true).unwrap();
        timeout(WAIT, running).await.unwrap().unwrap().unwrap();
        server.abort();
        poses.abort();
    }

    #[tokio::test]
    async fn waits_for_spawn_service() {
        let bus = Arc::new(EventBus::default());
        let mut diag_rx = bus.subscribe_to(Topic::Diagnostics);
        let mut cmd_rx = bus.subscribe_to(Topic::CmdVel);

        let node = PursuitNode::new(fast_config(), bus.clone()).unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        let running = tokio::spawn(async move { node.run(stop_rx).await });

        wait_for_diagnostic(&mut diag_rx, "Service is not ready").await;
        wait_for_diagnostic(&mut diag_rx, "Service is not ready").await;
        assert!(cmd_rx.try_recv().is_err(), "no command before the pursuer exists");

        stop_tx.send(true).unwrap();
        timeout(WAIT, running).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn missing_target_is_reported_not_fatal() {
        let bus = Arc::new(EventBus::default());
        let server = spawn_server(
            bus.clone(),
            SpawnResult::Spawned {
                name: "turtle2".to_string(),
            },
        );
        let poses = pose_source(bus.clone(), vec![("turtle2", PlanarPose::new(1.0, 1.0, 0.0))]);
        let mut diag_rx = bus.subscribe_to(Topic::Diagnostics);

        let node = PursuitNode::new(fast_config(), bus.clone()).unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        let running = tokio::spawn(async move { node.run(stop_rx).await });

        wait_for_diagnostic(&mut diag_rx, "Successfully spawned turtle2").await;
        wait_for_diagnostic(&mut diag_rx, "Could not transform turtle2 to turtle1").await;
        wait_for_diagnostic(&mut diag_rx, "Could not transform turtle2 to turtle1").await;

        stop_tx.send(true).unwrap();
        timeout(WAIT, running).await.unwrap().unwrap().unwrap();
        server.abort();
        poses.abort();
    }

    #[tokio::test]
    async fn spawn_failure_is_returned_at_shutdown() {
        let bus = Arc::new(EventBus::default());
        let server = spawn_server(
            bus.clone(),
            SpawnResult::Failed {
                reason: "A turtle named [turtle2] already exists".to_string(),
            },
        );
        let mut diag_rx = bus.subscribe_to(Topic::Diagnostics);

        let node = PursuitNode::new(fast_config(), bus.clone()).unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        let running = tokio::spawn(async move { node.run(stop_rx).await });

        wait_for_diagnostic(&mut diag_rx, "Spawn failed").await;
        assert!(!running.is_finished(), "node keeps running until shutdown");

        stop_tx.send(true).unwrap();
        let err = timeout(WAIT, running).await.unwrap().unwrap().unwrap_err();
        assert!(matches!(err, ChaseError::SpawnFailed { .. }));
        server.abort();
    }

    #[tokio::test]
    async fn store_outage_stops_the_node() {
        let bus = Arc::new(EventBus::default());
        let node = PursuitNode::with_store(fast_config(), bus, Arc::new(OfflineStore)).unwrap();
        let spawner = ScriptedSpawnService::ready_with([SpawnPoll::Completed {
            name: "turtle2".to_string(),
        }]);
        let sink: Arc<dyn MotionSink> = Arc::new(BusMotionSink::new(Arc::new(EventBus::default()), "turtle2"));
        let (_stop_tx, stop_rx) = watch::channel(false);

        let result = timeout(WAIT, node.run_with(spawner, sink, stop_rx)).await.unwrap();
        assert!(matches!(result, Err(ChaseError::StoreConnectivity(_))));
    }

    #[tokio::test]
    async fn already_stopped_returns_immediately() {
        let node = PursuitNode::new(fast_config(), Arc::new(EventBus::default())).unwrap();
        let (_stop_tx, stop_rx) = watch::channel(true);
        timeout(Duration::from_millis(500), node.run(stop_rx))
            .await
            .unwrap()
            .unwrap();
    }
}
