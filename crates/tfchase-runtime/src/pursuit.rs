//! [`PursuitController`] – steer one agent toward another from their
//! relative transform.
//!
//! Each [`on_tick`][PursuitController::on_tick]:
//!
//! 1. If the pursuer has not been spawned yet, advance the
//!    [`SpawnStateMachine`] and stop there.
//! 2. Ask the frame store for the target's pose expressed in the pursuer's
//!    frame, at the latest available time.
//! 3. If that transform is not available yet, report it and stop; the next
//!    tick tries again.
//! 4. Otherwise turn the relative translation `(dx, dy)` into one
//!    [`VelocityCommand`] and hand it to the motion sink:
//!
//!    ```text
//!    angular_z = Kr * atan2(dy, dx)          Kr = 1.0
//!    linear_x  = Kf * sqrt(dx² + dy²)        Kf = 0.5
//!    ```
//!
//! Every command is computed from the latest transform alone: no smoothing,
//! no filtering, no rate limiting.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tfchase_middleware::{MotionSink, SpawnService};
use tfchase_perception::{FrameStore, Vec3};
use tfchase_types::{ChaseError, SpawnRequest, VelocityCommand};
use tracing::{debug, info, instrument};

use crate::spawn::{SpawnProgress, SpawnState, SpawnStateMachine};

// ─────────────────────────────────────────────────────────────────────────────
// Control law
// ─────────────────────────────────────────────────────────────────────────────

/// Proportional gains of the pursuit law.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PursuitGains {
    /// `Kr`: yaw rate per radian of bearing.
    pub rotation: f64,
    /// `Kf`: forward speed per metre of distance.
    pub forward: f64,
}

impl Default for PursuitGains {
    fn default() -> Self {
        Self {
            rotation: 1.0,
            forward: 0.5,
        }
    }
}

/// Velocity command that turns toward and closes on a target at `offset`
/// (target position in the pursuer's frame).  `z` is ignored.
///
/// ```rust
/// use tfchase_perception::Vec3;
/// use tfchase_runtime::pursuit::{pursuit_command, PursuitGains};
///
/// let cmd = pursuit_command(Vec3::new(3.0, 4.0, 0.0), PursuitGains::default());
/// assert!((cmd.linear_x - 2.5).abs() < 1e-12);
/// assert!((cmd.angular_z - 4f64.atan2(3.0)).abs() < 1e-12);
/// ```
pub fn pursuit_command(offset: Vec3, gains: PursuitGains) -> VelocityCommand {
    VelocityCommand {
        angular_z: gains.rotation * offset.y.atan2(offset.x),
        linear_x: gains.forward * offset.x.hypot(offset.y),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration bundle for [`PursuitController`].
#[derive(Debug, Clone, PartialEq)]
pub struct PursuitConfig {
    /// Frame of the agent being chased.
    pub target_frame: String,
    /// Frame of the chasing agent; commands steer this agent.
    pub pursuer_frame: String,
    pub gains: PursuitGains,
    /// Sent once to create the pursuer.
    pub spawn_request: SpawnRequest,
}

impl Default for PursuitConfig {
    fn default() -> Self {
        Self {
            target_frame: "turtle1".to_string(),
            pursuer_frame: "turtle2".to_string(),
            gains: PursuitGains::default(),
            spawn_request: SpawnRequest {
                name: "turtle2".to_string(),
                x: 4.0,
                y: 2.0,
                theta: 0.0,
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tick outcome
// ─────────────────────────────────────────────────────────────────────────────

/// What one controller tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// The pursuer does not exist yet; the spawn handshake moved (or not).
    AwaitingSpawn(SpawnProgress),
    /// The relative transform could not be looked up this tick.
    TransformUnavailable {
        parent: String,
        child: String,
        error: ChaseError,
    },
    /// A command was sent to the motion sink.
    Commanded(VelocityCommand),
}

impl TickOutcome {
    /// Human-readable status for ticks that produced no command.
    pub fn diagnostic(&self) -> Option<String> {
        match self {
            TickOutcome::AwaitingSpawn(SpawnProgress::ServiceNotReady) => {
                Some("Service is not ready".to_string())
            }
            TickOutcome::AwaitingSpawn(SpawnProgress::RequestIssued) => {
                Some("Spawn requested".to_string())
            }
            TickOutcome::AwaitingSpawn(SpawnProgress::InProgress) => {
                Some("Spawn is not finished".to_string())
            }
            TickOutcome::AwaitingSpawn(SpawnProgress::JustSpawned { name }) => {
                Some(format!("Successfully spawned {name}"))
            }
            TickOutcome::AwaitingSpawn(SpawnProgress::Spawned) => None,
            TickOutcome::TransformUnavailable { parent, child, error } => {
                Some(format!("Could not transform {parent} to {child}: {error}"))
            }
            TickOutcome::Commanded(_) => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PursuitController
// ─────────────────────────────────────────────────────────────────────────────

/// Periodic pursuit loop body.  Owns the spawn handshake; holds no other
/// state between ticks.
pub struct PursuitController {
    config: PursuitConfig,
    store: Arc<dyn FrameStore>,
    sink: Arc<dyn MotionSink>,
    spawner: SpawnStateMachine,
}

impl PursuitController {
    pub fn new(
        config: PursuitConfig,
        store: Arc<dyn FrameStore>,
        spawn_service: Arc<dyn SpawnService>,
        sink: Arc<dyn MotionSink>,
    ) -> Self {
        let spawner = SpawnStateMachine::new(spawn_service, config.spawn_request.clone());
        Self {
            config,
            store,
            sink,
            spawner,
        }
    }

    pub fn config(&self) -> &PursuitConfig {
        &self.config
    }

    pub fn spawn_state(&self) -> SpawnState {
        self.spawner.state()
    }

    pub fn spawner(&self) -> &SpawnStateMachine {
        &self.spawner
    }

    /// Run one control step.
    ///
    /// # Errors
    ///
    /// * [`ChaseError::SpawnFailed`] – the pursuer can never be spawned.
    /// * [`ChaseError::StoreConnectivity`] – the frame store is unreachable.
    /// * Any error from the motion sink.
    ///
    /// A transform that is merely not available yet is *not* an error; it is
    /// reported as [`TickOutcome::TransformUnavailable`].
    #[instrument(
        level = "debug",
        skip(self),
        fields(target = %self.config.target_frame, pursuer = %self.config.pursuer_frame)
    )]
    pub fn on_tick(&mut self, now: DateTime<Utc>) -> Result<TickOutcome, ChaseError> {
        if !self.spawner.is_spawned() {
            return self.spawner.advance().map(TickOutcome::AwaitingSpawn);
        }

        let parent = &self.config.pursuer_frame;
        let child = &self.config.target_frame;
        let relative = match self.store.query_latest(parent, child) {
            Ok(t) => t,
            Err(e) if e.is_transform_unavailable() => {
                info!("Could not transform {parent} to {child}: {e}");
                return Ok(TickOutcome::TransformUnavailable {
                    parent: parent.clone(),
                    child: child.clone(),
                    error: e,
                });
            }
            Err(e) => return Err(e),
        };

        let command = pursuit_command(relative.transform.translation, self.config.gains);
        debug!(
            dx = relative.transform.translation.x,
            dy = relative.transform.translation.y,
            linear_x = command.linear_x,
            angular_z = command.angular_z,
            transform_age_ms = (now - relative.stamp).num_milliseconds(),
            "pursuit command"
        );
        self.sink.send(command)?;
        Ok(TickOutcome::Commanded(command))
    }
}

impl std::fmt::Debug for PursuitController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PursuitController")
            .field("config", &self.config)
            .field("spawner", &self.spawner)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spawn::tests::{ScriptedSpawnService, turtle2_request};
    use std::sync::Mutex;
    use std::sync::atomic::Ordering;
    use tfchase_middleware::SpawnPoll;
    use tfchase_perception::{Quaternion, StampedTransform, TfBuffer, Transform3D};
    use tfchase_types::PlanarPose;

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<VelocityCommand>>,
    }

    impl MotionSink for RecordingSink {
        fn send(&self, command: VelocityCommand) -> Result<(), ChaseError> {
            self.sent.lock().unwrap().push(command);
            Ok(())
        }
    }

    impl RecordingSink {
        fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    /// Frame store that always fails with a fixed error.
    struct FailingStore(ChaseError);

    impl FrameStore for FailingStore {
        fn publish(&self, _transform: StampedTransform) -> Result<(), ChaseError> {
            Err(self.0.clone())
        }

        fn query_latest(&self, _parent: &str, _child: &str) -> Result<StampedTransform, ChaseError> {
            Err(self.0.clone())
        }
    }

    fn spawned_service() -> Arc<ScriptedSpawnService> {
        ScriptedSpawnService::ready_with([SpawnPoll::Completed {
            name: "turtle2".to_string(),
        }])
    }

    /// Tick until the spawn handshake has finished.
    fn finish_spawn(controller: &mut PursuitController) {
        for _ in 0..3 {
            if controller.spawn_state() == SpawnState::Spawned {
                return;
            }
            controller.on_tick(Utc::now()).unwrap();
        }
        assert_eq!(controller.spawn_state(), SpawnState::Spawned);
    }

    fn place(store: &TfBuffer, agent: &str, x: f64, y: f64, heading: f64) {
        store
            .publish(StampedTransform::from_planar("world", agent, PlanarPose::new(x, y, heading), Utc::now()))
            .unwrap();
    }

    // ── Control law ─────────────────────────────────────────────────────────

    #[test]
    fn three_four_five_triangle() {
        let cmd = pursuit_command(Vec3::new(3.0, 4.0, 0.0), PursuitGains::default());
        assert!((cmd.linear_x - 2.5).abs() < 1e-12);
        assert!((cmd.angular_z - 0.927_295_218).abs() < 1e-6);
    }

    #[test]
    fn zero_offset_gives_zero_command() {
        let cmd = pursuit_command(Vec3::zero(), PursuitGains::default());
        assert_eq!(cmd.linear_x, 0.0);
        assert_eq!(cmd.angular_z, 0.0);
    }

    #[test]
    fn bearing_sign_follows_ccw_convention() {
        let g = PursuitGains::default();
        assert!(pursuit_command(Vec3::new(1.0, 1.0, 0.0), g).angular_z > 0.0);
        assert!(pursuit_command(Vec3::new(1.0, -1.0, 0.0), g).angular_z < 0.0);
        let left = pursuit_command(Vec3::new(0.0, 2.0, 0.0), g);
        assert!((left.angular_z - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        assert!((left.linear_x - 1.0).abs() < 1e-12);
        let behind = pursuit_command(Vec3::new(-1.0, 0.0, 0.0), g);
        assert!((behind.angular_z - std::f64::consts::PI).abs() < 1e-12);
        assert!(behind.linear_x > 0.0);
    }

    #[test]
    fn gains_scale_linearly() {
        let cmd = pursuit_command(
            Vec3::new(3.0, 4.0, 7.0),
            PursuitGains {
                rotation: 2.0,
                forward: 0.1,
            },
        );
        assert!((cmd.linear_x - 0.5).abs() < 1e-12, "z must not count toward distance");
        assert!((cmd.angular_z - 2.0 * 4f64.atan2(3.0)).abs() < 1e-12);
    }

    // ── Controller ──────────────────────────────────────────────────────────

    #[test]
    fn no_commands_before_spawn() {
        let store = Arc::new(TfBuffer::new());
        place(&store, "turtle1", 5.0, 5.0, 0.0);
        place(&store, "turtle2", 1.0, 1.0, 0.0);
        let svc = ScriptedSpawnService::ready_with([SpawnPoll::Pending]);
        svc.ready.store(false, Ordering::SeqCst);
        let sink = Arc::new(RecordingSink::default());
        let mut c = PursuitController::new(PursuitConfig::default(), store, svc.clone(), sink.clone());

        for _ in 0..5 {
            assert_eq!(
                c.on_tick(Utc::now()).unwrap(),
                TickOutcome::AwaitingSpawn(SpawnProgress::ServiceNotReady)
            );
        }
        svc.ready.store(true, Ordering::SeqCst);
        for _ in 0..5 {
            assert!(matches!(c.on_tick(Utc::now()).unwrap(), TickOutcome::AwaitingSpawn(_)));
        }
        assert_eq!(sink.count(), 0);
        assert_eq!(c.spawner().requests_issued(), 1);
    }

    #[test]
    fn spawn_tick_itself_emits_nothing() {
        let store = Arc::new(TfBuffer::new());
        place(&store, "turtle1", 5.0, 5.0, 0.0);
        place(&store, "turtle2", 1.0, 1.0, 0.0);
        let sink = Arc::new(RecordingSink::default());
        let mut c = PursuitController::new(PursuitConfig::default(), store, spawned_service(), sink.clone());

        assert_eq!(
            c.on_tick(Utc::now()).unwrap(),
            TickOutcome::AwaitingSpawn(SpawnProgress::RequestIssued)
        );
        assert_eq!(
            c.on_tick(Utc::now()).unwrap(),
            TickOutcome::AwaitingSpawn(SpawnProgress::JustSpawned {
                name: "turtle2".to_string()
            })
        );
        assert_eq!(sink.count(), 0);
        assert!(matches!(c.on_tick(Utc::now()).unwrap(), TickOutcome::Commanded(_)));
        assert_eq!(sink.count(), 1);
    }

    #[test]
    fn commands_steer_toward_target() {
        let store = Arc::new(TfBuffer::new());
        place(&store, "turtle1", 4.0, 5.0, 0.0);
        place(&store, "turtle2", 1.0, 1.0, 0.0);
        let sink = Arc::new(RecordingSink::default());
        let mut c = PursuitController::new(PursuitConfig::default(), store, spawned_service(), sink.clone());
        finish_spawn(&mut c);

        let TickOutcome::Commanded(cmd) = c.on_tick(Utc::now()).unwrap() else {
            panic!("expected a command");
        };
        assert!((cmd.linear_x - 2.5).abs() < 1e-9);
        assert!((cmd.angular_z - 4f64.atan2(3.0)).abs() < 1e-9);
        assert_eq!(sink.sent.lock().unwrap().as_slice(), &[cmd]);
    }

    #[test]
    fn bearing_is_relative_to_pursuer_heading() {
        // Pursuer faces +Y; target sits directly to its right (world +X).
        let store = Arc::new(TfBuffer::new());
        place(&store, "turtle2", 0.0, 0.0, std::f64::consts::FRAC_PI_2);
        place(&store, "turtle1", 2.0, 0.0, 0.0);
        let sink = Arc::new(RecordingSink::default());
        let mut c = PursuitController::new(PursuitConfig::default(), store, spawned_service(), sink);
        finish_spawn(&mut c);

        let TickOutcome::Commanded(cmd) = c.on_tick(Utc::now()).unwrap() else {
            panic!("expected a command");
        };
        assert!((cmd.angular_z + std::f64::consts::FRAC_PI_2).abs() < 1e-9, "got {}", cmd.angular_z);
        assert!((cmd.linear_x - 1.0).abs() < 1e-9);
    }

    #[test]
    fn coincident_agents_hold_still() {
        let store = Arc::new(TfBuffer::new());
        place(&store, "turtle1", 3.0, 3.0, 0.0);
        place(&store, "turtle2", 3.0, 3.0, 1.2);
        let sink = Arc::new(RecordingSink::default());
        let mut c = PursuitController::new(PursuitConfig::default(), store, spawned_service(), sink);
        finish_spawn(&mut c);

        let TickOutcome::Commanded(cmd) = c.on_tick(Utc::now()).unwrap() else {
            panic!("expected a command");
        };
        assert!(cmd.linear_x.abs() < 1e-12);
        assert!(cmd.angular_z.abs() < 1e-9);
    }

    #[test]
    fn missing_target_skips_tick_with_diagnostic() {
        let store = Arc::new(TfBuffer::new());
        place(&store, "turtle2", 1.0, 1.0, 0.0);
        let sink = Arc::new(RecordingSink::default());
        let mut c = PursuitController::new(PursuitConfig::default(), store.clone(), spawned_service(), sink.clone());
        finish_spawn(&mut c);

        let outcome = c.on_tick(Utc::now()).unwrap();
        match &outcome {
            TickOutcome::TransformUnavailable { parent, child, error } => {
                assert_eq!(parent, "turtle2");
                assert_eq!(child, "turtle1");
                assert!(matches!(error, ChaseError::FrameNotFound { .. }));
            }
            other => panic!("expected TransformUnavailable, got {other:?}"),
        }
        let diag = outcome.diagnostic().unwrap();
        assert!(diag.starts_with("Could not transform turtle2 to turtle1"), "{diag}");
        assert_eq!(sink.count(), 0);

        // Once the target appears the next tick drives again.
        place(&store, "turtle1", 2.0, 1.0, 0.0);
        assert!(matches!(c.on_tick(Utc::now()).unwrap(), TickOutcome::Commanded(_)));
        assert_eq!(sink.count(), 1);
    }

    #[test]
    fn configured_target_frame_is_used() {
        let store = Arc::new(TfBuffer::new());
        place(&store, "turtle2", 0.0, 0.0, 0.0);
        store
            .publish(StampedTransform::new(
                "turtle1",
                "carrot1",
                Transform3D::new(Vec3::new(0.0, 2.0, 0.0), Quaternion::identity()),
                Utc::now(),
            ))
            .unwrap();
        place(&store, "turtle1", 1.0, 0.0, 0.0);

        let config = PursuitConfig {
            target_frame: "carrot1".to_string(),
            ..PursuitConfig::default()
        };
        let sink = Arc::new(RecordingSink::default());
        let mut c = PursuitController::new(config, store, spawned_service(), sink);
        finish_spawn(&mut c);

        let TickOutcome::Commanded(cmd) = c.on_tick(Utc::now()).unwrap() else {
            panic!("expected a command");
        };
        // carrot1 is at world (1, 2): bearing atan2(2, 1), distance sqrt(5).
        assert!((cmd.angular_z - 2f64.atan2(1.0)).abs() < 1e-9);
        assert!((cmd.linear_x - 0.5 * 5f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn stale_transform_is_not_fatal() {
        let store: Arc<dyn FrameStore> = Arc::new(FailingStore(ChaseError::Extrapolation {
            parent: "turtle2".to_string(),
            child: "turtle1".to_string(),
            skew_ms: 1500,
        }));
        let sink = Arc::new(RecordingSink::default());
        let mut c = PursuitController::new(PursuitConfig::default(), store, spawned_service(), sink.clone());
        finish_spawn(&mut c);
        assert!(matches!(
            c.on_tick(Utc::now()).unwrap(),
            TickOutcome::TransformUnavailable { .. }
        ));
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn store_outage_propagates() {
        let store: Arc<dyn FrameStore> =
            Arc::new(FailingStore(ChaseError::StoreConnectivity("buffer gone".to_string())));
        let sink = Arc::new(RecordingSink::default());
        let mut c = PursuitController::new(PursuitConfig::default(), store, spawned_service(), sink.clone());
        finish_spawn(&mut c);
        assert!(matches!(c.on_tick(Utc::now()), Err(ChaseError::StoreConnectivity(_))));
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn spawn_failure_ends_pursuit() {
        let svc = ScriptedSpawnService::ready_with([SpawnPoll::Failed {
            reason: "out of turtles".to_string(),
        }]);
        let sink = Arc::new(RecordingSink::default());
        let mut c = PursuitController::new(PursuitConfig::default(), Arc::new(TfBuffer::new()), svc, sink.clone());
        c.on_tick(Utc::now()).unwrap();
        for _ in 0..3 {
            let err = c.on_tick(Utc::now()).unwrap_err();
            assert!(matches!(err, ChaseError::SpawnFailed { .. }));
            assert!(err.is_fatal());
        }
        assert_eq!(c.spawn_state(), SpawnState::Failed);
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn spawn_request_comes_from_config() {
        let config = PursuitConfig::default();
        assert_eq!(config.spawn_request, turtle2_request());
        assert_eq!(config.gains, PursuitGains::default());
    }
}
