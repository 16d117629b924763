//! Per-decoder command strategies
//!
//! A strategy knows how many device handles a locomotive kind needs, how to
//! initialize them, and how to split one speed/function update into `SET`
//! commands. The locomotive mutex is never held across a send: each step
//! copies what it needs, sends, then re-locks to apply the acknowledgement.

use std::sync::Arc;

use srcp_protocol::{Address, DeviceGroup, Reply};
use tracing::{debug, info};

use crate::devices::GlDevice;
use crate::error::{LocomotiveError, ModelError, SrcpError};
use crate::lock::LockControl;
use crate::locomotive::{lock, Locomotive, LocomotiveKind, SharedLocomotive, MM_DIGITAL_FUNCTIONS};
use crate::session::Session;

/// How a locomotive kind is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocomotiveStrategy {
    /// One decoder, one handle
    Default,
    /// Two decoders presented as one locomotive
    SimulatedDouble,
}

impl LocomotiveStrategy {
    /// Create handles and register them if missing, then send `INIT` unless
    /// the locomotive is already initialized
    pub async fn init_locomotive(
        &self,
        loco: &SharedLocomotive,
        session: &Arc<Session>,
        locks: &LockControl,
    ) -> Result<(), LocomotiveError> {
        let pending = {
            let mut l = lock(loco);
            if !l.has_devices() {
                let devices: Vec<GlDevice> = self
                    .device_addresses(&l)
                    .into_iter()
                    .map(|address| GlDevice::new(session.clone(), address))
                    .collect();
                for device in &devices {
                    locks.register_control_object(DeviceGroup::Gl, device.address(), loco);
                }
                l.devices = devices;
            }

            if l.initialized {
                None
            } else {
                let kind = l.kind();
                Some((l.devices.clone(), kind.protocol(), kind.init_params()))
            }
        };

        let Some((devices, protocol, params)) = pending else {
            return Ok(());
        };

        for device in &devices {
            device
                .init(protocol, params)
                .await
                .map_err(|e| LocomotiveError::InitFailed(Box::new(e)))?;
            debug!("Initialized decoder {}", device.address());
        }

        let mut l = lock(loco);
        l.initialized = true;
        info!(
            "Initialized {} locomotive {}",
            l.kind().name(),
            l.primary_address()
        );
        Ok(())
    }

    /// Send speed and functions with the locomotive's current direction
    ///
    /// State is updated only once the server acknowledges; an empty
    /// acknowledgement leaves it untouched.
    pub async fn set_speed(
        &self,
        loco: &SharedLocomotive,
        speed: u32,
        functions: &[bool],
    ) -> Result<(), SrcpError> {
        let (devices, direction, max_speed) = {
            let l = lock(loco);
            let expected = l.kind().function_count();
            if functions.len() != expected {
                return Err(ModelError::FunctionCount {
                    expected,
                    actual: functions.len(),
                }
                .into());
            }
            if l.devices.len() != self.device_count() {
                return Err(ModelError::NotInitialized(l.primary_address()).into());
            }
            (l.devices.clone(), l.direction, l.kind().driving_steps())
        };

        match self {
            Self::Default => {
                let reply = devices[0]
                    .set(direction, speed, max_speed, functions)
                    .await?;
                if reply.is_empty() {
                    return Ok(());
                }
                apply(loco, &reply, Some((speed, functions)));
            }
            Self::SimulatedDouble => {
                let (first, second) = functions.split_at(MM_DIGITAL_FUNCTIONS);

                let reply = devices[0].set(direction, speed, max_speed, first).await?;
                if reply.is_empty() {
                    return Ok(());
                }
                apply(loco, &reply, Some((speed, functions)));

                let reply = devices[1].set(direction, speed, max_speed, second).await?;
                apply(loco, &reply, None);
            }
        }
        Ok(())
    }

    /// Function vector for an emergency stop
    ///
    /// `index` selects a function to switch on along with the stop, if the
    /// decoder has it.
    pub fn emergency_stop_functions(&self, kind: LocomotiveKind, index: Option<usize>) -> Vec<bool> {
        let width = match (self, kind) {
            (Self::Default, LocomotiveKind::MmDelta) => return vec![true],
            _ => kind.function_count(),
        };
        let mut functions = vec![false; width];
        if let Some(slot) = index.and_then(|i| functions.get_mut(i)) {
            *slot = true;
        }
        functions
    }

    /// Number of device handles
    pub fn device_count(&self) -> usize {
        match self {
            Self::Default => 1,
            Self::SimulatedDouble => 2,
        }
    }

    fn device_addresses(&self, loco: &Locomotive) -> Vec<Address> {
        let mut addresses = loco.addresses();
        addresses.truncate(self.device_count());
        addresses
    }
}

/// Record the acknowledgement timestamp and, if it is the newest, the new state
fn apply(loco: &SharedLocomotive, reply: &str, state: Option<(u32, &[bool])>) {
    let timestamp = Reply::parse(reply).and_then(|r| r.timestamp);
    let mut l = lock(loco);
    let newest = match timestamp {
        Some(ts) => l.acknowledge(ts),
        None => true,
    };
    if !newest {
        debug!(
            "Stale acknowledgement for {}, keeping newer state",
            l.primary_address()
        );
        return;
    }
    if let Some((speed, functions)) = state {
        l.current_speed = speed;
        l.functions = functions.to_vec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use srcp_sim::SimServer;

    async fn session(sim: &SimServer) -> Arc<Session> {
        Session::attach(sim.connect()).await.unwrap()
    }

    async fn attached(sim: &SimServer, loco: &SharedLocomotive, locks: &LockControl) -> Arc<Session> {
        let session = session(sim).await;
        let strategy = lock(loco).kind().strategy();
        strategy.init_locomotive(loco, &session, locks).await.unwrap();
        session
    }

    #[tokio::test]
    async fn test_default_init_once() {
        let sim = SimServer::new();
        let locks = LockControl::new();
        let loco = Locomotive::shared(LocomotiveKind::MmDigital, 1, 3);
        let session = session(&sim).await;

        let strategy = LocomotiveStrategy::Default;
        strategy.init_locomotive(&loco, &session, &locks).await.unwrap();
        strategy.init_locomotive(&loco, &session, &locks).await.unwrap();

        assert_eq!(sim.commands(), vec!["INIT 1 GL 3 M 2 14 5"]);
        assert!(lock(&loco).is_initialized());
        assert!(locks.control_object(DeviceGroup::Gl, Address::new(1, 3)).is_some());
    }

    #[tokio::test]
    async fn test_double_init_registers_both() {
        let sim = SimServer::new();
        let locks = LockControl::new();
        let loco = Locomotive::shared_double(1, 3, 4);
        attached(&sim, &loco, &locks).await;

        assert_eq!(
            sim.commands(),
            vec!["INIT 1 GL 3 M 2 14 5", "INIT 1 GL 4 M 2 14 5"]
        );
        assert!(locks.control_object(DeviceGroup::Gl, Address::new(1, 3)).is_some());
        assert!(locks.control_object(DeviceGroup::Gl, Address::new(1, 4)).is_some());
    }

    #[tokio::test]
    async fn test_init_failure_leaves_uninitialized() {
        let sim = SimServer::new();
        let locks = LockControl::new();
        let loco = Locomotive::shared(LocomotiveKind::MmDelta, 1, 3);
        let session = session(&sim).await;

        sim.fail_next(420);
        let err = LocomotiveStrategy::Default
            .init_locomotive(&loco, &session, &locks)
            .await
            .unwrap_err();
        assert!(matches!(err, LocomotiveError::InitFailed(_)));
        assert!(!lock(&loco).is_initialized());
    }

    #[tokio::test]
    async fn test_default_set_speed_records_ack() {
        let sim = SimServer::new();
        let locks = LockControl::new();
        let loco = Locomotive::shared(LocomotiveKind::MmDigital, 1, 3);
        attached(&sim, &loco, &locks).await;

        let functions = [true, false, false, false, true];
        LocomotiveStrategy::Default
            .set_speed(&loco, 7, &functions)
            .await
            .unwrap();

        assert_eq!(sim.commands().last().unwrap(), "SET 1 GL 3 1 7 14 1 0 0 0 1");
        let l = lock(&loco);
        assert_eq!(l.current_speed(), 7);
        assert_eq!(l.functions(), &functions);
        assert!(l.last_command_acknowledge() > 0.0);
    }

    #[tokio::test]
    async fn test_double_splits_functions() {
        let sim = SimServer::new();
        let locks = LockControl::new();
        let loco = Locomotive::shared_double(1, 3, 4);
        attached(&sim, &loco, &locks).await;

        let mut functions = vec![false; 10];
        functions[1] = true;
        functions[7] = true;
        LocomotiveStrategy::SimulatedDouble
            .set_speed(&loco, 5, &functions)
            .await
            .unwrap();

        let commands = sim.commands();
        assert_eq!(
            &commands[2..],
            &["SET 1 GL 3 1 5 14 0 1 0 0 0", "SET 1 GL 4 1 5 14 0 0 1 0 0"]
        );
        assert_eq!(lock(&loco).functions(), functions.as_slice());
    }

    #[tokio::test]
    async fn test_double_first_failure_stops_second() {
        let sim = SimServer::new();
        let locks = LockControl::new();
        let loco = Locomotive::shared_double(1, 3, 4);
        attached(&sim, &loco, &locks).await;

        sim.fail_next(412);
        let err = LocomotiveStrategy::SimulatedDouble
            .set_speed(&loco, 5, &[false; 10])
            .await
            .unwrap_err();

        assert_eq!(err.code(), Some(412));
        assert_eq!(sim.commands().len(), 3);
        assert_eq!(lock(&loco).current_speed(), 0);
    }

    #[tokio::test]
    async fn test_function_width_checked_before_send() {
        let sim = SimServer::new();
        let locks = LockControl::new();
        let loco = Locomotive::shared(LocomotiveKind::MmDigital, 1, 3);
        attached(&sim, &loco, &locks).await;

        let err = LocomotiveStrategy::Default
            .set_speed(&loco, 5, &[true])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SrcpError::Model(ModelError::FunctionCount {
                expected: 5,
                actual: 1
            })
        ));
        assert_eq!(sim.commands().len(), 1);
    }

    #[test]
    fn test_emergency_stop_functions() {
        let default = LocomotiveStrategy::Default;
        let double = LocomotiveStrategy::SimulatedDouble;

        assert_eq!(default.emergency_stop_functions(LocomotiveKind::MmDelta, Some(3)), vec![true]);
        assert_eq!(
            default.emergency_stop_functions(LocomotiveKind::MmDigital, Some(2)),
            vec![false, false, true, false, false]
        );
        assert_eq!(
            default.emergency_stop_functions(LocomotiveKind::MmDigital, Some(9)),
            vec![false; 5]
        );

        let functions = double.emergency_stop_functions(LocomotiveKind::DoubleMmDigital, Some(8));
        assert_eq!(functions.len(), 10);
        assert_eq!(functions.iter().filter(|f| **f).count(), 1);
        assert!(functions[8]);
        assert_eq!(
            double.emergency_stop_functions(LocomotiveKind::DoubleMmDigital, None),
            vec![false; 10]
        );
    }
}
