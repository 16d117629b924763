//! Locomotive control facade
//!
//! [`LocomotiveControl`] validates locomotives, attaches them to a session,
//! dispatches commands through their [`LocomotiveStrategy`](crate::LocomotiveStrategy),
//! and folds external state updates back in under the timestamp rule: an
//! update is applied only if it is strictly newer than the last command this
//! client had acknowledged for the locomotive.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use srcp_protocol::{Address, DeviceGroup, Direction, InfoEvent};
use tracing::{debug, trace, warn};

use crate::error::{ConnectionError, LocomotiveError, ModelError};
use crate::events::{Listener, ListenerSet, LocomotiveChange};
use crate::lock::LockControl;
use crate::locomotive::{lock, SharedLocomotive};
use crate::session::{Session, SessionId};

/// Locomotive registry and command facade
#[derive(Debug)]
pub struct LocomotiveControl {
    locks: Arc<LockControl>,
    session: RwLock<Option<Arc<Session>>>,
    locomotives: Mutex<HashMap<Address, SharedLocomotive>>,
    listeners: ListenerSet<LocomotiveChange>,
}

impl LocomotiveControl {
    /// Create a control sharing `locks` with other controls of this process
    pub fn new(locks: Arc<LockControl>) -> Self {
        Self {
            locks,
            session: RwLock::new(None),
            locomotives: Mutex::new(HashMap::new()),
            listeners: ListenerSet::new(),
        }
    }

    /// The lock registry this control uses
    pub fn lock_control(&self) -> &Arc<LockControl> {
        &self.locks
    }

    /// Set the ambient session and attach it to every registered locomotive
    pub fn set_session(&self, session: Option<Arc<Session>>) {
        *self
            .session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = session.clone();

        for loco in self.locomotives() {
            lock(&loco).session = session.clone();
        }
    }

    /// The ambient session
    pub fn session(&self) -> Option<Arc<Session>> {
        self.session
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Register a locomotive under its primary address
    ///
    /// Returns the locomotive previously registered at that address.
    pub fn add_locomotive(&self, loco: &SharedLocomotive) -> Option<SharedLocomotive> {
        let address = lock(loco).primary_address();
        self.registry().insert(address, loco.clone())
    }

    /// Remove the locomotive registered at `address`
    pub fn remove_locomotive(&self, address: Address) -> Option<SharedLocomotive> {
        self.registry().remove(&address)
    }

    /// The locomotive registered at `address`
    pub fn locomotive(&self, address: Address) -> Option<SharedLocomotive> {
        self.registry().get(&address).cloned()
    }

    /// Every registered locomotive
    pub fn locomotives(&self) -> Vec<SharedLocomotive> {
        self.registry().values().cloned().collect()
    }

    /// Validate a locomotive, attach a session, and initialize it if needed
    pub async fn check_locomotive(&self, loco: &SharedLocomotive) -> Result<(), LocomotiveError> {
        let (session, strategy) = {
            let mut l = lock(loco);
            if !l.check_bus_address() {
                return Err(ModelError::InvalidAddress(l.primary_address()).into());
            }
            if l.session.is_none() {
                l.session = self.session();
            }
            let session = l.session.clone().ok_or(ModelError::NoSession)?;
            (session, l.kind().strategy())
        };

        strategy.init_locomotive(loco, &session, &self.locks).await
    }

    /// Send speed and functions, keeping the current direction
    pub async fn set_speed(
        &self,
        loco: &SharedLocomotive,
        speed: u32,
        functions: &[bool],
    ) -> Result<(), LocomotiveError> {
        self.check_locomotive(loco).await?;

        let (strategy, addresses, session) = {
            let l = lock(loco);
            let expected = l.kind().function_count();
            if functions.len() != expected {
                return Err(ModelError::FunctionCount {
                    expected,
                    actual: functions.len(),
                }
                .into());
            }
            let session = l.session.as_ref().map(|s| s.id()).ok_or(ModelError::NoSession)?;
            (l.kind().strategy(), l.addresses(), session)
        };

        for address in addresses {
            self.locks.check_access(DeviceGroup::Gl, address, session)?;
        }

        strategy
            .set_speed(loco, speed, functions)
            .await
            .map_err(|e| {
                warn!("set_speed failed: {}", e);
                LocomotiveError::from_command(e)
            })?;

        self.notify(loco);
        Ok(())
    }

    /// Send new functions at the current speed
    pub async fn set_functions(
        &self,
        loco: &SharedLocomotive,
        functions: &[bool],
    ) -> Result<(), LocomotiveError> {
        let speed = lock(loco).current_speed();
        self.set_speed(loco, speed, functions).await
    }

    /// One step faster, capped at the decoder's top step
    pub async fn increase_speed(&self, loco: &SharedLocomotive) -> Result<(), LocomotiveError> {
        self.check_locomotive(loco).await?;
        let (speed, functions) = {
            let l = lock(loco);
            let speed = (l.current_speed() + 1).min(l.kind().driving_steps());
            (speed, l.functions().to_vec())
        };
        self.set_speed(loco, speed, &functions).await
    }

    /// One step slower, stopping at zero
    pub async fn decrease_speed(&self, loco: &SharedLocomotive) -> Result<(), LocomotiveError> {
        self.check_locomotive(loco).await?;
        let (speed, functions) = {
            let l = lock(loco);
            (l.current_speed().saturating_sub(1), l.functions().to_vec())
        };
        self.set_speed(loco, speed, &functions).await
    }

    /// Reverse the direction and stop
    ///
    /// Motorola decoders get the new direction with two zero-speed commands.
    pub async fn toggle_direction(&self, loco: &SharedLocomotive) -> Result<(), LocomotiveError> {
        self.check_locomotive(loco).await?;
        let functions = {
            let mut l = lock(loco);
            l.direction = l.direction().toggled();
            debug!("{} direction now {:?}", l.primary_address(), l.direction());
            l.functions().to_vec()
        };

        self.set_speed(loco, 0, &functions).await?;
        self.set_speed(loco, 0, &functions).await?;
        self.notify(loco);
        Ok(())
    }

    /// Stop immediately, optionally switching on the function at `index`
    pub async fn emergency_stop(
        &self,
        loco: &SharedLocomotive,
        index: Option<usize>,
    ) -> Result<(), LocomotiveError> {
        self.check_locomotive(loco).await?;
        let functions = {
            let l = lock(loco);
            let kind = l.kind();
            kind.strategy().emergency_stop_functions(kind, index)
        };
        self.set_speed(loco, 0, &functions).await
    }

    pub fn direction(&self, loco: &SharedLocomotive) -> Direction {
        lock(loco).direction()
    }

    pub fn current_speed(&self, loco: &SharedLocomotive) -> u32 {
        lock(loco).current_speed()
    }

    pub fn functions(&self, loco: &SharedLocomotive) -> Vec<bool> {
        lock(loco).functions().to_vec()
    }

    /// The server initialized a decoder
    pub fn on_device_init(&self, timestamp: f64, address: Address) {
        let Some(loco) = self.lookup(address) else {
            trace!("Ignoring init of unknown locomotive {}", address);
            return;
        };
        lock(&loco).initialized = true;
        debug!("{} initialized by server at {}", address, timestamp);
    }

    /// The server reports a decoder state
    ///
    /// Applied only if `timestamp` is strictly greater than the last
    /// acknowledged command of the locomotive.
    pub fn on_device_set(
        &self,
        timestamp: f64,
        address: Address,
        direction: Direction,
        speed: u32,
        functions: &[bool],
    ) {
        let Some(loco) = self.lookup(address) else {
            trace!("Ignoring update of unknown locomotive {}", address);
            return;
        };

        {
            let mut l = lock(&loco);
            if timestamp <= l.last_command_acknowledge() {
                debug!(
                    "Discarding update for {} at {} (acknowledged {})",
                    address,
                    timestamp,
                    l.last_command_acknowledge()
                );
                return;
            }

            l.direction = direction;
            l.current_speed = speed;
            if let Some(range) = l.function_range(address) {
                let width = range.len().min(functions.len());
                let start = range.start;
                l.functions[start..start + width].copy_from_slice(&functions[..width]);
            }
        }
        self.notify(&loco);
    }

    /// The server terminated a decoder
    pub fn on_device_terminate(&self, timestamp: f64, address: Address) {
        let Some(loco) = self.lookup(address) else {
            trace!("Ignoring termination of unknown locomotive {}", address);
            return;
        };

        let addresses = {
            let mut l = lock(&loco);
            l.devices.clear();
            l.initialized = false;
            l.addresses()
        };
        for address in addresses {
            self.locks.unregister_control_object(DeviceGroup::Gl, address);
        }
        debug!("{} terminated by server at {}", address, timestamp);
    }

    /// Dispatch an info channel event to the reconciliation handlers
    pub fn handle_info(&self, event: &InfoEvent) {
        match event {
            InfoEvent::Init {
                timestamp, address, ..
            } => self.on_device_init(*timestamp, *address),
            InfoEvent::Set {
                timestamp,
                address,
                direction,
                speed,
                functions,
                ..
            } => self.on_device_set(*timestamp, *address, *direction, *speed, functions),
            InfoEvent::Term { timestamp, address } => {
                self.on_device_terminate(*timestamp, *address)
            }
        }
    }

    /// Release the ambient session's locks and close it
    ///
    /// Returns how many locks were released. Without a session this does
    /// nothing.
    pub async fn disconnect(&self) -> Result<usize, ConnectionError> {
        let Some(session) = self.session() else {
            return Ok(0);
        };
        let released = self.locks.release_all(session.id());
        debug!("Session {} released {} locks", session.id(), released);
        self.set_session(None);
        session.disconnect().await?;
        Ok(released)
    }

    /// Lock the locomotive for its session
    pub async fn acquire_lock(&self, loco: &SharedLocomotive) -> Result<(), LocomotiveError> {
        let (address, session) = self.lock_key(loco).await?;
        self.locks.acquire_lock(DeviceGroup::Gl, address, session)?;
        Ok(())
    }

    /// Release the locomotive's lock held by its session
    pub async fn release_lock(&self, loco: &SharedLocomotive) -> Result<(), LocomotiveError> {
        let (address, session) = self.lock_key(loco).await?;
        self.locks.release_lock(DeviceGroup::Gl, address, session)?;
        Ok(())
    }

    /// Returns true if any session holds the locomotive's lock
    pub async fn is_locked(&self, loco: &SharedLocomotive) -> Result<bool, LocomotiveError> {
        let (address, _) = self.lock_key(loco).await?;
        Ok(self.locks.is_locked(DeviceGroup::Gl, address))
    }

    /// Returns true if the locomotive's own session holds its lock
    pub async fn is_locked_by_me(&self, loco: &SharedLocomotive) -> Result<bool, LocomotiveError> {
        let (address, session) = self.lock_key(loco).await?;
        Ok(self.locks.locking_session_id(DeviceGroup::Gl, address) == Some(session))
    }

    /// Add a locomotive change listener
    pub fn add_locomotive_change_listener(
        &self,
        listener: Arc<dyn Listener<LocomotiveChange>>,
    ) -> bool {
        self.listeners.add(listener)
    }

    /// Remove a locomotive change listener
    pub fn remove_locomotive_change_listener(
        &self,
        listener: &Arc<dyn Listener<LocomotiveChange>>,
    ) -> bool {
        self.listeners.remove(listener)
    }

    async fn lock_key(&self, loco: &SharedLocomotive) -> Result<(Address, SessionId), LocomotiveError> {
        self.check_locomotive(loco).await?;
        let l = lock(loco);
        let session = l.session().map(|s| s.id()).ok_or(ModelError::NoSession)?;
        Ok((l.primary_address(), session))
    }

    /// Registered locomotive for a primary address, falling back to the
    /// control object registered for a secondary decoder
    fn lookup(&self, address: Address) -> Option<SharedLocomotive> {
        self.locomotive(address)
            .or_else(|| self.locks.control_object(DeviceGroup::Gl, address))
    }

    fn notify(&self, loco: &SharedLocomotive) {
        let change = lock(loco).change();
        self.listeners.emit(&change);
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<Address, SharedLocomotive>> {
        self.locomotives
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
