//! Locomotive model
//!
//! One [`Locomotive`] record covers every supported decoder type; the
//! [`LocomotiveKind`] tag carries the per-type constants (protocol,
//! init parameters, speed steps, function count) and selects the
//! [`LocomotiveStrategy`] that drives it.

use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use srcp_protocol::{Address, Direction};

use crate::devices::GlDevice;
use crate::events::LocomotiveChange;
use crate::session::Session;
use crate::strategy::LocomotiveStrategy;

/// Highest address a Motorola decoder accepts
pub const MM_MAX_ADDRESS: u32 = 80;

/// Functions per Motorola digital decoder
pub const MM_DIGITAL_FUNCTIONS: usize = 5;

/// A locomotive shared between the control, its strategy and the lock registry
pub type SharedLocomotive = Arc<Mutex<Locomotive>>;

/// Supported decoder types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocomotiveKind {
    /// Motorola delta decoder: 14 steps, one function
    MmDelta,
    /// Motorola digital decoder: 14 steps, five functions
    MmDigital,
    /// Two Motorola digital decoders in one engine, driven as one
    /// locomotive with ten functions
    DoubleMmDigital,
}

impl LocomotiveKind {
    /// Decoder protocol tag sent in `INIT`
    pub fn protocol(&self) -> &'static str {
        "M"
    }

    /// Protocol version, speed steps and function count sent in `INIT`
    pub fn init_params(&self) -> &'static [&'static str] {
        match self {
            Self::MmDelta => &["1", "14", "1"],
            Self::MmDigital | Self::DoubleMmDigital => &["2", "14", "5"],
        }
    }

    /// Number of speed steps
    pub fn driving_steps(&self) -> u32 {
        14
    }

    /// Width of the function vector
    pub fn function_count(&self) -> usize {
        match self {
            Self::MmDelta => 1,
            Self::MmDigital => MM_DIGITAL_FUNCTIONS,
            Self::DoubleMmDigital => 2 * MM_DIGITAL_FUNCTIONS,
        }
    }

    /// Returns true if the engine has a second decoder
    pub fn is_double(&self) -> bool {
        matches!(self, Self::DoubleMmDigital)
    }

    /// Strategy that initializes and drives this kind
    pub fn strategy(&self) -> LocomotiveStrategy {
        match self {
            Self::MmDelta | Self::MmDigital => LocomotiveStrategy::Default,
            Self::DoubleMmDigital => LocomotiveStrategy::SimulatedDouble,
        }
    }

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::MmDelta => "MM Delta",
            Self::MmDigital => "MM Digital",
            Self::DoubleMmDigital => "Double MM Digital",
        }
    }
}

/// A locomotive and the state the client believes it is in
#[derive(Debug)]
pub struct Locomotive {
    kind: LocomotiveKind,
    bus: u32,
    address: u32,
    address2: Option<u32>,
    pub(crate) direction: Direction,
    pub(crate) current_speed: u32,
    pub(crate) functions: Vec<bool>,
    pub(crate) initialized: bool,
    pub(crate) last_command_acknowledge: f64,
    pub(crate) session: Option<Arc<Session>>,
    pub(crate) devices: Vec<GlDevice>,
}

impl Locomotive {
    /// Create a single-decoder locomotive
    ///
    /// For [`LocomotiveKind::DoubleMmDigital`] use [`Locomotive::new_double`];
    /// without a second address the record fails address validation.
    pub fn new(kind: LocomotiveKind, bus: u32, address: u32) -> Self {
        Self {
            kind,
            bus,
            address,
            address2: None,
            direction: Direction::Undef,
            current_speed: 0,
            functions: vec![false; kind.function_count()],
            initialized: false,
            last_command_acknowledge: 0.0,
            session: None,
            devices: Vec::new(),
        }
    }

    /// Create a double-decoder locomotive
    pub fn new_double(bus: u32, address: u32, address2: u32) -> Self {
        Self {
            address2: Some(address2),
            ..Self::new(LocomotiveKind::DoubleMmDigital, bus, address)
        }
    }

    /// Create a single-decoder locomotive ready for sharing
    pub fn shared(kind: LocomotiveKind, bus: u32, address: u32) -> SharedLocomotive {
        Arc::new(Mutex::new(Self::new(kind, bus, address)))
    }

    /// Create a double-decoder locomotive ready for sharing
    pub fn shared_double(bus: u32, address: u32, address2: u32) -> SharedLocomotive {
        Arc::new(Mutex::new(Self::new_double(bus, address, address2)))
    }

    pub fn kind(&self) -> LocomotiveKind {
        self.kind
    }

    pub fn bus(&self) -> u32 {
        self.bus
    }

    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn address2(&self) -> Option<u32> {
        self.address2
    }

    /// Bus and primary address
    pub fn primary_address(&self) -> Address {
        Address::new(self.bus, self.address)
    }

    /// Every decoder address, primary first
    pub fn addresses(&self) -> Vec<Address> {
        let mut addresses = vec![self.primary_address()];
        if self.kind.is_double() {
            if let Some(a2) = self.address2 {
                addresses.push(Address::new(self.bus, a2));
            }
        }
        addresses
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn current_speed(&self) -> u32 {
        self.current_speed
    }

    pub fn functions(&self) -> &[bool] {
        &self.functions
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Server timestamp of the last acknowledged command
    pub fn last_command_acknowledge(&self) -> f64 {
        self.last_command_acknowledge
    }

    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    /// Returns true while device handles exist
    pub fn has_devices(&self) -> bool {
        !self.devices.is_empty()
    }

    pub fn check_bus(&self) -> bool {
        self.bus > 0
    }

    /// Decoder-specific address check
    pub fn check_address(&self) -> bool {
        let valid = |a: u32| (1..=MM_MAX_ADDRESS).contains(&a);
        match self.kind {
            LocomotiveKind::MmDelta | LocomotiveKind::MmDigital => valid(self.address),
            LocomotiveKind::DoubleMmDigital => match self.address2 {
                Some(a2) => valid(self.address) && valid(a2) && a2 != self.address,
                None => false,
            },
        }
    }

    pub fn check_bus_address(&self) -> bool {
        self.check_bus() && self.check_address()
    }

    /// Slice of the function vector owned by the decoder at `address`
    pub fn function_range(&self, address: Address) -> Option<Range<usize>> {
        if address.bus != self.bus {
            return None;
        }
        if address.address == self.address {
            let width = if self.kind.is_double() {
                MM_DIGITAL_FUNCTIONS
            } else {
                self.kind.function_count()
            };
            return Some(0..width);
        }
        match self.address2 {
            Some(a2) if self.kind.is_double() && address.address == a2 => {
                Some(MM_DIGITAL_FUNCTIONS..2 * MM_DIGITAL_FUNCTIONS)
            }
            _ => None,
        }
    }

    /// Record an acknowledgement timestamp
    ///
    /// Returns false, leaving the record untouched, if a newer
    /// acknowledgement is already stored.
    pub(crate) fn acknowledge(&mut self, timestamp: f64) -> bool {
        if timestamp < self.last_command_acknowledge {
            return false;
        }
        self.last_command_acknowledge = timestamp;
        true
    }

    /// Snapshot for change listeners
    pub fn change(&self) -> LocomotiveChange {
        LocomotiveChange {
            address: self.primary_address(),
            kind: self.kind,
            direction: self.direction,
            speed: self.current_speed,
            functions: self.functions.clone(),
        }
    }
}

/// Lock a shared locomotive, recovering from a poisoned mutex
pub(crate) fn lock(loco: &SharedLocomotive) -> MutexGuard<'_, Locomotive> {
    loco.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
