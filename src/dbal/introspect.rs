use std::any::Any;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use thiserror::Error;

use crate::dbal::driver::{Driver, DriverConnection};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlotError {
    #[error("Slot does not accept writes")]
    Sealed,
    #[error("Slot content changed since it was read")]
    Changed,
    #[error("Slot lock is poisoned")]
    Poisoned,
}

/// Field of a host connection that holds its driver.
pub struct DriverSlot {
    driver: RwLock<Arc<dyn Driver>>,
    sealed: bool,
}

impl DriverSlot {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver: RwLock::new(driver),
            sealed: false,
        }
    }

    /// A slot whose driver can be read but never replaced.
    pub fn sealed(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver: RwLock::new(driver),
            sealed: true,
        }
    }

    pub fn get(&self) -> Arc<dyn Driver> {
        self.driver
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn try_get(&self) -> Result<Arc<dyn Driver>, SlotError> {
        self.driver
            .read()
            .map(|driver| driver.clone())
            .map_err(|_| SlotError::Poisoned)
    }

    /// Swaps in `new` only if the slot still holds `expected`.
    pub fn replace(&self, expected: &Arc<dyn Driver>, new: Arc<dyn Driver>) -> Result<(), SlotError> {
        if self.sealed {
            return Err(SlotError::Sealed);
        }

        let mut current = self.driver.write().map_err(|_| SlotError::Poisoned)?;
        if !Arc::ptr_eq(&current, expected) {
            return Err(SlotError::Changed);
        }
        *current = new;

        Ok(())
    }
}

/// Field of a host connection that keeps idle driver connections around.
pub struct ConnectionSlot {
    idle: Mutex<Vec<Box<dyn DriverConnection>>>,
    capacity: usize,
}

impl ConnectionSlot {
    pub fn new(capacity: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            capacity,
        }
    }

    pub fn pop(&self) -> Option<Box<dyn DriverConnection>> {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
    }

    /// Gives a connection back, dropping it when the slot is full.
    pub fn push(&self, connection: Box<dyn DriverConnection>) {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.capacity {
            idle.push(connection);
        }
    }

    pub fn len(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Passes every idle connection that is not tracked yet through `wrap`,
    /// returning how many were replaced.
    pub fn wrap_untracked<F>(&self, mut wrap: F) -> Result<usize, SlotError>
    where
        F: FnMut(Box<dyn DriverConnection>) -> Box<dyn DriverConnection>,
    {
        let mut idle = self.idle.lock().map_err(|_| SlotError::Poisoned)?;
        let mut replaced = 0;
        for connection in std::mem::take(&mut *idle) {
            if connection.tracks_queries() {
                idle.push(connection);
            } else {
                replaced += 1;
                idle.push(wrap(connection));
            }
        }

        Ok(replaced)
    }
}

#[derive(Clone, Copy)]
pub enum Property<'a> {
    Driver(&'a DriverSlot),
    Connections(&'a ConnectionSlot),
    Opaque(&'a (dyn Any + Send + Sync)),
}

impl Property<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Property::Driver(_) => "driver",
            Property::Connections(_) => "connections",
            Property::Opaque(_) => "opaque",
        }
    }
}

/// Named access to the fields of a host connection. Field names are a
/// property of the host version, so callers probe rather than assume them.
pub trait Introspect: Send + Sync {
    fn property(&self, name: &str) -> Option<Property<'_>>;

    fn parent(&self) -> Option<&dyn Introspect> {
        None
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
