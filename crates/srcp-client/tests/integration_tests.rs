//! Integration tests for the SRCP client runtime
//!
//! These tests run the client against the virtual server and verify:
//! - Session handshake, command traffic and disconnect behavior
//! - Device locking across sessions
//! - Locomotive commands for single and double decoders
//! - Reconciliation of info channel pushes under the timestamp rule

use std::sync::Arc;

use srcp_client::{
    ClientConfig, CommandData, ConnectionError, LockControl, Locomotive, LocomotiveControl,
    LocomotiveError, LocomotiveKind, PowerDevice, Session, SharedLocomotive, SrcpError,
};
use srcp_protocol::{Address, DeviceGroup, Direction, InfoEvent};
use srcp_sim::SimServer;

// ============================================================================
// Helper Functions
// ============================================================================

mod helpers {
    use super::*;

    /// Open a session on the virtual server
    pub async fn session(sim: &SimServer) -> Arc<Session> {
        Session::attach(sim.connect()).await.unwrap()
    }

    /// Create a control with its own session, sharing `locks`
    pub async fn control(sim: &SimServer, locks: &Arc<LockControl>) -> LocomotiveControl {
        let control = LocomotiveControl::new(locks.clone());
        control.set_session(Some(session(sim).await));
        control
    }

    /// Commands the server received that start with `prefix`
    pub fn commands_with(sim: &SimServer, prefix: &str) -> Vec<String> {
        sim.commands()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    /// Feed every pending info line of the server to `control`
    pub fn deliver_info(sim: &SimServer, control: &LocomotiveControl) -> usize {
        let events: Vec<InfoEvent> = sim
            .take_info()
            .iter()
            .filter_map(|line| InfoEvent::parse(line).ok())
            .collect();
        for event in &events {
            control.handle_info(event);
        }
        events.len()
    }

    pub fn last_ack(loco: &SharedLocomotive) -> f64 {
        loco.lock().unwrap().last_command_acknowledge()
    }
}

use helpers::*;

// ============================================================================
// Session Tests
// ============================================================================

mod session_tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_sessions_get_distinct_ids() {
        let sim = SimServer::new();
        let a = session(&sim).await;
        let b = session(&sim).await;
        assert_eq!(a.id(), 1);
        assert_eq!(b.id(), 2);
    }

    #[tokio::test]
    async fn test_listeners_see_both_directions() {
        let sim = SimServer::new();
        let session = session(&sim).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.command_listeners().add(Arc::new(tx));

        session.send("INIT 1 GL 3 M 2 14 5").await.unwrap();

        let sent = rx.try_recv().unwrap();
        assert_eq!(sent, CommandData::Sent("INIT 1 GL 3 M 2 14 5".into()));
        let received = rx.try_recv().unwrap();
        assert!(matches!(received, CommandData::Received(ref line) if line.ends_with("200 OK")));
    }

    #[tokio::test]
    async fn test_error_reply_is_decoded() {
        let sim = SimServer::new();
        let session = session(&sim).await;

        let err = session.send("SET 1 GL 3 1 0 14").await.unwrap_err();
        assert_eq!(err.code(), Some(416));
    }

    #[tokio::test]
    async fn test_send_after_disconnect_writes_nothing() {
        let sim = SimServer::new();
        let session = session(&sim).await;
        session.disconnect().await.unwrap();
        assert!(!session.is_connected().await);

        let err = session.send("GET 1 POWER").await.unwrap_err();
        assert!(matches!(
            err,
            SrcpError::Connection(ConnectionError::Io(ref e)) if e.kind() == std::io::ErrorKind::NotConnected
        ));
        assert!(sim.commands().is_empty());

        session.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_over_tcp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let sim = SimServer::new();
        let server = sim.clone();
        tokio::spawn(async move { server.serve(listener).await });

        let session = Session::connect(&ClientConfig::new("127.0.0.1", port))
            .await
            .unwrap();
        assert_eq!(session.id(), 1);
        session.send("SET 1 POWER ON").await.unwrap();
        assert_eq!(sim.power(1), Some(true));
    }

    #[tokio::test]
    async fn test_power_device() {
        let sim = SimServer::new();
        let power = PowerDevice::new(session(&sim).await, 1);

        power.set(true, "layout up").await.unwrap();
        assert!(power.get().await.unwrap().ends_with("100 INFO 1 POWER ON"));
        power.set(false, "").await.unwrap();
        assert_eq!(sim.power(1), Some(false));
        power.term().await.unwrap();
        assert_eq!(power.get().await.unwrap_err().code(), Some(416));
    }
}

// ============================================================================
// Locking Tests
// ============================================================================

mod locking_tests {
    use super::*;

    #[tokio::test]
    async fn test_lock_blocks_other_session_until_release() {
        let sim = SimServer::new();
        let locks = Arc::new(LockControl::new());
        let control_a = control(&sim, &locks).await;
        let control_b = control(&sim, &locks).await;

        let loco_a = Locomotive::shared(LocomotiveKind::MmDigital, 1, 3);
        let loco_b = Locomotive::shared(LocomotiveKind::MmDigital, 1, 3);

        control_a.acquire_lock(&loco_a).await.unwrap();
        assert!(control_b.is_locked(&loco_b).await.unwrap());
        assert!(!control_b.is_locked_by_me(&loco_b).await.unwrap());

        let err = control_b.set_speed(&loco_b, 4, &[false; 5]).await.unwrap_err();
        assert!(matches!(err, LocomotiveError::Locked(_)));
        assert!(matches!(
            control_b.acquire_lock(&loco_b).await,
            Err(LocomotiveError::Locked(_))
        ));

        control_a.set_speed(&loco_a, 4, &[false; 5]).await.unwrap();
        control_a.release_lock(&loco_a).await.unwrap();

        control_b.set_speed(&loco_b, 6, &[false; 5]).await.unwrap();
        assert_eq!(sim.locomotive(Address::new(1, 3)).unwrap().speed, 6);
    }

    #[tokio::test]
    async fn test_lock_notifications() {
        let sim = SimServer::new();
        let locks = Arc::new(LockControl::new());
        let control = control(&sim, &locks).await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        locks.add_lock_change_listener(Arc::new(tx));

        let loco = Locomotive::shared(LocomotiveKind::MmDelta, 1, 5);
        control.acquire_lock(&loco).await.unwrap();
        control.release_lock(&loco).await.unwrap();

        let taken = rx.try_recv().unwrap();
        assert_eq!(taken.group, DeviceGroup::Gl);
        assert_eq!(taken.address, Address::new(1, 5));
        assert_eq!(taken.session, Some(control.session().unwrap().id()));
        assert_eq!(rx.try_recv().unwrap().session, None);
    }

    #[tokio::test]
    async fn test_release_all_on_disconnect() {
        let sim = SimServer::new();
        let locks = Arc::new(LockControl::new());
        let control = control(&sim, &locks).await;
        let id = control.session().unwrap().id();

        for address in 1..=3 {
            let loco = Locomotive::shared(LocomotiveKind::MmDelta, 1, address);
            control.acquire_lock(&loco).await.unwrap();
        }
        assert_eq!(locks.release_all(id), 3);
        assert!(!locks.is_locked(DeviceGroup::Gl, Address::new(1, 2)));
    }
}

// ============================================================================
// Locomotive Tests
// ============================================================================

mod locomotive_tests {
    use super::*;

    #[tokio::test]
    async fn test_drive_mm_digital() {
        let sim = SimServer::new();
        let locks = Arc::new(LockControl::new());
        let control = control(&sim, &locks).await;
        let loco = Locomotive::shared(LocomotiveKind::MmDigital, 1, 3);
        control.add_locomotive(&loco);

        control.set_speed(&loco, 5, &[true, false, false, false, false]).await.unwrap();
        control.increase_speed(&loco).await.unwrap();
        control
            .set_functions(&loco, &[false, false, true, false, false])
            .await
            .unwrap();

        let state = sim.locomotive(Address::new(1, 3)).unwrap();
        assert_eq!(state.speed, 6);
        assert_eq!(state.functions, vec![false, false, true, false, false]);
        assert_eq!(commands_with(&sim, "INIT"), vec!["INIT 1 GL 3 M 2 14 5"]);
    }

    #[tokio::test]
    async fn test_toggle_direction_from_undef() {
        let sim = SimServer::new();
        let locks = Arc::new(LockControl::new());
        let control = control(&sim, &locks).await;
        let loco = Locomotive::shared(LocomotiveKind::MmDelta, 1, 3);

        control.set_speed(&loco, 8, &[false]).await.unwrap();
        assert_eq!(control.direction(&loco), Direction::Undef);

        control.toggle_direction(&loco).await.unwrap();

        assert_eq!(control.direction(&loco), Direction::Reverse);
        assert_eq!(control.current_speed(&loco), 0);
        let sets = commands_with(&sim, "SET");
        assert_eq!(sets.len(), 3);
        assert_eq!(&sets[1..], &["SET 1 GL 3 0 0 14 0", "SET 1 GL 3 0 0 14 0"]);
    }

    #[tokio::test]
    async fn test_double_decoder_halves() {
        let sim = SimServer::new();
        let locks = Arc::new(LockControl::new());
        let control = control(&sim, &locks).await;
        let loco = Locomotive::shared_double(1, 10, 11);

        let mut functions = vec![false; 10];
        functions[0] = true;
        functions[9] = true;
        control.set_speed(&loco, 3, &functions).await.unwrap();

        assert_eq!(
            commands_with(&sim, "SET"),
            vec!["SET 1 GL 10 1 3 14 1 0 0 0 0", "SET 1 GL 11 1 3 14 0 0 0 0 1"]
        );
        assert_eq!(sim.locomotive(Address::new(1, 11)).unwrap().speed, 3);
        assert_eq!(control.functions(&loco), functions);
    }

    #[tokio::test]
    async fn test_double_decoder_stops_on_first_failure() {
        let sim = SimServer::new();
        let locks = Arc::new(LockControl::new());
        let control = control(&sim, &locks).await;
        let loco = Locomotive::shared_double(1, 10, 11);
        control.check_locomotive(&loco).await.unwrap();

        sim.fail_next(412);
        let err = control.set_speed(&loco, 3, &[false; 10]).await.unwrap_err();

        assert!(matches!(err, LocomotiveError::Failed(_)));
        assert_eq!(err.cause().and_then(|c| c.code()), Some(412));
        assert_eq!(commands_with(&sim, "SET").len(), 1);
    }

    #[tokio::test]
    async fn test_init_failure() {
        let sim = SimServer::new();
        let locks = Arc::new(LockControl::new());
        let control = control(&sim, &locks).await;
        let loco = Locomotive::shared(LocomotiveKind::MmDelta, 1, 3);

        sim.fail_next(603);
        let err = control.set_speed(&loco, 1, &[false]).await.unwrap_err();
        assert!(matches!(err, LocomotiveError::InitFailed(_)));
        assert_eq!(err.cause().and_then(|c| c.code()), Some(603));

        control.set_speed(&loco, 1, &[false]).await.unwrap();
        assert_eq!(commands_with(&sim, "INIT").len(), 2);
    }

    #[tokio::test]
    async fn test_function_width_mismatch() {
        let sim = SimServer::new();
        let locks = Arc::new(LockControl::new());
        let control = control(&sim, &locks).await;
        let loco = Locomotive::shared(LocomotiveKind::MmDigital, 1, 3);

        let err = control.set_speed(&loco, 1, &[false; 4]).await.unwrap_err();
        assert!(matches!(err, LocomotiveError::Model(_)));
        assert!(commands_with(&sim, "SET").is_empty());
    }

    #[tokio::test]
    async fn test_emergency_stop_mm_delta() {
        let sim = SimServer::new();
        let locks = Arc::new(LockControl::new());
        let control = control(&sim, &locks).await;
        let loco = Locomotive::shared(LocomotiveKind::MmDelta, 1, 3);

        control.set_speed(&loco, 10, &[false]).await.unwrap();
        control.emergency_stop(&loco, None).await.unwrap();

        assert_eq!(commands_with(&sim, "SET").last().unwrap(), "SET 1 GL 3 1 0 14 1");
        assert_eq!(control.functions(&loco), vec![true]);
    }
}

// ============================================================================
// Reconciliation Tests
// ============================================================================

mod reconciliation_tests {
    use super::*;

    #[tokio::test]
    async fn test_other_client_update_is_applied() {
        let sim = SimServer::new();
        let locks_a = Arc::new(LockControl::new());
        let locks_b = Arc::new(LockControl::new());
        let control_a = control(&sim, &locks_a).await;
        let control_b = control(&sim, &locks_b).await;

        let loco_a = Locomotive::shared(LocomotiveKind::MmDigital, 1, 3);
        let loco_b = Locomotive::shared(LocomotiveKind::MmDigital, 1, 3);
        control_a.add_locomotive(&loco_a);

        control_a.set_speed(&loco_a, 2, &[false; 5]).await.unwrap();
        sim.take_info();

        control_b.toggle_direction(&loco_b).await.unwrap();
        control_b
            .set_speed(&loco_b, 9, &[true, false, false, false, true])
            .await
            .unwrap();
        assert!(deliver_info(&sim, &control_a) > 0);

        assert_eq!(control_a.current_speed(&loco_a), 9);
        assert_eq!(control_a.direction(&loco_a), Direction::Reverse);
        assert_eq!(
            control_a.functions(&loco_a),
            vec![true, false, false, false, true]
        );
    }

    #[tokio::test]
    async fn test_own_echo_is_discarded() {
        let sim = SimServer::new();
        let locks = Arc::new(LockControl::new());
        let control = control(&sim, &locks).await;
        let loco = Locomotive::shared(LocomotiveKind::MmDelta, 1, 3);
        control.add_locomotive(&loco);

        control.set_speed(&loco, 4, &[true]).await.unwrap();
        let ack = last_ack(&loco);
        let echo: Vec<InfoEvent> = sim
            .take_info()
            .iter()
            .filter_map(|line| InfoEvent::parse(line).ok())
            .filter(|e| matches!(e, InfoEvent::Set { .. }))
            .collect();
        assert_eq!(echo.len(), 1);
        assert_eq!(echo[0].timestamp(), ack);

        control.on_device_set(ack, Address::new(1, 3), Direction::Reverse, 0, &[false]);
        assert_eq!(control.current_speed(&loco), 4);
    }

    #[tokio::test]
    async fn test_server_termination_forces_reinit() {
        let sim = SimServer::new();
        let locks = Arc::new(LockControl::new());
        let control = control(&sim, &locks).await;
        let other = session(&sim).await;
        let loco = Locomotive::shared(LocomotiveKind::MmDelta, 1, 3);
        control.add_locomotive(&loco);

        control.set_speed(&loco, 4, &[false]).await.unwrap();
        sim.take_info();

        other.send("TERM 1 GL 3").await.unwrap();
        deliver_info(&sim, &control);
        assert!(!loco.lock().unwrap().is_initialized());
        assert!(locks.control_object(DeviceGroup::Gl, Address::new(1, 3)).is_none());

        control.set_speed(&loco, 5, &[false]).await.unwrap();
        assert_eq!(commands_with(&sim, "INIT").len(), 2);
        assert_eq!(sim.locomotive(Address::new(1, 3)).unwrap().speed, 5);
    }
}

// ============================================================================
// Property Tests
// ============================================================================

mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    fn push_after_ack(offset_ms: i64, speed: u32) -> (u32, u32) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let sim = SimServer::new();
            let locks = Arc::new(LockControl::new());
            let control = control(&sim, &locks).await;
            let loco = Locomotive::shared(LocomotiveKind::MmDelta, 1, 3);
            control.add_locomotive(&loco);

            control.set_speed(&loco, 1, &[false]).await.unwrap();
            let ack = last_ack(&loco);

            let pushed = ack + offset_ms as f64 / 1000.0;
            control.on_device_set(pushed, Address::new(1, 3), Direction::Forward, speed, &[true]);
            (control.current_speed(&loco), speed)
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// A push is applied exactly when it is newer than the last acknowledgement
        #[test]
        fn prop_push_applied_only_when_newer(offset_ms in -5_000i64..5_000, speed in 2u32..=14) {
            let (current, pushed) = push_after_ack(offset_ms, speed);
            if offset_ms > 0 {
                prop_assert_eq!(current, pushed);
            } else {
                prop_assert_eq!(current, 1);
            }
        }
    }
}
