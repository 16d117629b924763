//! Cross-session device locks
//!
//! [`LockControl`] maps a (device group, address) pair to the control object
//! registered for it and to the session holding its lock, if any. All
//! operations go through one mutex, so register, unregister, acquire and
//! release are atomic with respect to each other.
//!
//! The registry is an explicit object: create one per client process (or per
//! test) and share it through an `Arc`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use srcp_protocol::{Address, DeviceGroup};
use tracing::debug;

use crate::error::LockError;
use crate::events::{Listener, ListenerSet, LockChange};
use crate::locomotive::{Locomotive, SharedLocomotive};
use crate::session::SessionId;

#[derive(Debug, Default)]
struct Registration {
    object: Option<Weak<Mutex<Locomotive>>>,
    holder: Option<SessionId>,
}

/// Registry of control objects and their lock holders
#[derive(Debug, Default)]
pub struct LockControl {
    registry: Mutex<HashMap<(DeviceGroup, Address), Registration>>,
    listeners: ListenerSet<LockChange>,
}

impl LockControl {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate a control object with a device; keeps any existing lock
    pub fn register_control_object(
        &self,
        group: DeviceGroup,
        address: Address,
        object: &SharedLocomotive,
    ) {
        let mut registry = self.lock();
        let entry = registry.entry((group, address)).or_default();
        entry.object = Some(Arc::downgrade(object));
        debug!("Registered control object for {} {}", group, address);
    }

    /// Remove a device from the registry, releasing its lock
    pub fn unregister_control_object(&self, group: DeviceGroup, address: Address) {
        let removed = self.lock().remove(&(group, address));
        if let Some(holder) = removed.and_then(|r| r.holder) {
            debug!(
                "Unregistered {} {}, releasing lock of session {}",
                group, address, holder
            );
            self.listeners.emit(&LockChange {
                group,
                address,
                session: None,
            });
        }
    }

    /// The control object registered for a device, if it is still alive
    pub fn control_object(&self, group: DeviceGroup, address: Address) -> Option<SharedLocomotive> {
        self.lock()
            .get(&(group, address))
            .and_then(|r| r.object.as_ref())
            .and_then(Weak::upgrade)
    }

    /// Take the lock for `session`
    ///
    /// Taking a lock the session already holds is a no-op.
    pub fn acquire_lock(
        &self,
        group: DeviceGroup,
        address: Address,
        session: SessionId,
    ) -> Result<(), LockError> {
        {
            let mut registry = self.lock();
            let entry = registry.entry((group, address)).or_default();
            match entry.holder {
                Some(holder) if holder == session => return Ok(()),
                Some(holder) => {
                    return Err(LockError::DeviceLocked {
                        group,
                        address,
                        holder,
                    })
                }
                None => entry.holder = Some(session),
            }
        }

        debug!("Session {} locked {} {}", session, group, address);
        self.listeners.emit(&LockChange {
            group,
            address,
            session: Some(session),
        });
        Ok(())
    }

    /// Release the lock held by `session`
    ///
    /// Releasing an unlocked device is a no-op; releasing another session's
    /// lock fails.
    pub fn release_lock(
        &self,
        group: DeviceGroup,
        address: Address,
        session: SessionId,
    ) -> Result<(), LockError> {
        {
            let mut registry = self.lock();
            let Some(entry) = registry.get_mut(&(group, address)) else {
                return Ok(());
            };
            match entry.holder {
                None => return Ok(()),
                Some(holder) if holder != session => {
                    return Err(LockError::DeviceLocked {
                        group,
                        address,
                        holder,
                    })
                }
                Some(_) => entry.holder = None,
            }
            if entry.object.is_none() {
                registry.remove(&(group, address));
            }
        }

        debug!("Session {} unlocked {} {}", session, group, address);
        self.listeners.emit(&LockChange {
            group,
            address,
            session: None,
        });
        Ok(())
    }

    /// Release every lock held by `session`; returns how many were released
    pub fn release_all(&self, session: SessionId) -> usize {
        let released: Vec<_> = {
            let mut registry = self.lock();
            let released: Vec<_> = registry
                .iter_mut()
                .filter(|(_, r)| r.holder == Some(session))
                .map(|(key, r)| {
                    r.holder = None;
                    *key
                })
                .collect();
            registry.retain(|_, r| r.holder.is_some() || r.object.is_some());
            released
        };

        for (group, address) in &released {
            self.listeners.emit(&LockChange {
                group: *group,
                address: *address,
                session: None,
            });
        }
        released.len()
    }

    /// Fail if the device is locked by a session other than `session`
    pub fn check_access(
        &self,
        group: DeviceGroup,
        address: Address,
        session: SessionId,
    ) -> Result<(), LockError> {
        match self.locking_session_id(group, address) {
            Some(holder) if holder != session => Err(LockError::DeviceLocked {
                group,
                address,
                holder,
            }),
            _ => Ok(()),
        }
    }

    /// Returns true if any session holds the lock
    pub fn is_locked(&self, group: DeviceGroup, address: Address) -> bool {
        self.locking_session_id(group, address).is_some()
    }

    /// The session holding the lock, `None` if unlocked
    pub fn locking_session_id(&self, group: DeviceGroup, address: Address) -> Option<SessionId> {
        self.lock().get(&(group, address)).and_then(|r| r.holder)
    }

    /// Add a lock change listener
    pub fn add_lock_change_listener(&self, listener: Arc<dyn Listener<LockChange>>) -> bool {
        self.listeners.add(listener)
    }

    /// Remove a lock change listener
    pub fn remove_lock_change_listener(&self, listener: &Arc<dyn Listener<LockChange>>) -> bool {
        self.listeners.remove(listener)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(DeviceGroup, Address), Registration>> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
