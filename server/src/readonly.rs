//! Container read-only gate.
//!
//! The container garbage collector must not race manifest pushes, so
//! it flips this gate for the duration of a pass. Pushes consult the
//! gate at authorization time and refuse while it is set. The flag
//! is mirrored into the settings table so restarts during a GC pass
//! keep the registry read-only.

use std::sync::atomic::{AtomicBool, Ordering};

use sea_orm::ConnectionTrait;

use crate::database::entity::setting::CONTAINER_READ_ONLY;
use crate::database::{get_setting, put_setting};
use crate::error::{ServerError, ServerResult};

#[derive(Debug, Default)]
pub struct ReadOnlyGate {
    flag: AtomicBool,
}

impl ReadOnlyGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the persisted value.
    pub async fn load<C: ConnectionTrait>(&self, conn: &C) -> ServerResult<()> {
        let value = get_setting(conn, CONTAINER_READ_ONLY).await?;
        self.flag.store(value.as_deref() == Some("true"), Ordering::SeqCst);

        Ok(())
    }

    /// Returns whether the registry is read-only.
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Fails with `ReadOnly` when the gate is set.
    pub fn ensure_writable(&self) -> ServerResult<()> {
        if self.is_set() {
            Err(ServerError::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// Sets the gate and persists the new value.
    pub async fn set<C: ConnectionTrait>(&self, conn: &C, value: bool) -> ServerResult<()> {
        put_setting(conn, CONTAINER_READ_ONLY, if value { "true" } else { "false" }).await?;
        self.flag.store(value, Ordering::SeqCst);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_flag() {
        let gate = ReadOnlyGate::new();

        assert!(!gate.is_set());
        assert!(gate.ensure_writable().is_ok());

        gate.flag.store(true, Ordering::SeqCst);
        assert!(gate.is_set());
        assert!(matches!(gate.ensure_writable(), Err(ServerError::ReadOnly)));
    }
}
