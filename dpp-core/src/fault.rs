//! Fault-injection port.
//!
//! Components call [`FaultInjector::check`] before each fallible step
//! they want to be testable under failure. A disarmed injector (the
//! default) never fails. Tests arm a point to fail on its n-th use; the
//! point disarms itself after firing.
//!
//! The injector is a cheap handle: clones share the same armed set, so a
//! test can keep one clone while the engine owns another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::errors::DppError;

/// Named places where a failure can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    /// Key pair generation.
    GenerateKey,
    /// ECDH or other point multiplication.
    Ecdh,
    /// AES-SIV encryption.
    Encrypt,
    /// AES-SIV decryption.
    Decrypt,
    /// JWS signing.
    Sign,
    /// Message buffer allocation.
    Alloc,
}

#[derive(Debug, Default)]
struct Armed {
    /// Remaining uses before the fault fires (1 = next use).
    countdown: HashMap<FaultPoint, u32>,
    fired: Vec<FaultPoint>,
}

/// Shared, per-test fault configuration.
#[derive(Debug, Clone, Default)]
pub struct FaultInjector {
    inner: Option<Arc<Mutex<Armed>>>,
}

impl FaultInjector {
    /// An injector that never fails.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// An injector with nothing armed yet.
    pub fn enabled() -> Self {
        Self {
            inner: Some(Arc::new(Mutex::new(Armed::default()))),
        }
    }

    /// Fail the `nth` (1-based) upcoming use of `point`.
    pub fn arm(&self, point: FaultPoint, nth: u32) {
        if let Some(inner) = &self.inner {
            if let Ok(mut armed) = inner.lock() {
                armed.countdown.insert(point, nth.max(1));
            }
        }
    }

    /// Clear every armed point.
    pub fn reset(&self) {
        if let Some(inner) = &self.inner {
            if let Ok(mut armed) = inner.lock() {
                armed.countdown.clear();
                armed.fired.clear();
            }
        }
    }

    /// Points that have fired since the last reset.
    pub fn fired(&self) -> Vec<FaultPoint> {
        self.inner
            .as_ref()
            .and_then(|inner| inner.lock().ok().map(|a| a.fired.clone()))
            .unwrap_or_default()
    }

    /// Consume one use of `point`.
    ///
    /// # Errors
    /// Returns `DppError::InjectedFault` when the armed countdown hits zero.
    pub fn check(&self, point: FaultPoint) -> Result<(), DppError> {
        let Some(inner) = &self.inner else {
            return Ok(());
        };
        let Ok(mut armed) = inner.lock() else {
            return Ok(());
        };
        let fire = match armed.countdown.get_mut(&point) {
            Some(remaining) if *remaining <= 1 => true,
            Some(remaining) => {
                *remaining -= 1;
                false
            }
            None => false,
        };
        if fire {
            armed.countdown.remove(&point);
            armed.fired.push(point);
            tracing::debug!(?point, "injected fault");
            return Err(DppError::InjectedFault(point));
        }
        Ok(())
    }

    /// Run `op` unless `point` is armed to fail.
    pub fn wrap<T>(
        &self,
        point: FaultPoint,
        op: impl FnOnce() -> Result<T, DppError>,
    ) -> Result<T, DppError> {
        self.check(point)?;
        op()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_never_fails() {
        let f = FaultInjector::disabled();
        f.arm(FaultPoint::Ecdh, 1);
        assert!(f.check(FaultPoint::Ecdh).is_ok());
        assert!(f.fired().is_empty());
    }

    #[test]
    fn fires_on_nth_use_then_disarms() {
        let f = FaultInjector::enabled();
        f.arm(FaultPoint::Decrypt, 2);
        assert!(f.check(FaultPoint::Decrypt).is_ok());
        assert_eq!(
            f.check(FaultPoint::Decrypt),
            Err(DppError::InjectedFault(FaultPoint::Decrypt))
        );
        assert!(f.check(FaultPoint::Decrypt).is_ok());
        assert_eq!(f.fired(), vec![FaultPoint::Decrypt]);
    }

    #[test]
    fn clones_share_state() {
        let f = FaultInjector::enabled();
        let engine_side = f.clone();
        f.arm(FaultPoint::Alloc, 1);
        assert!(engine_side.check(FaultPoint::Alloc).is_err());
        assert_eq!(f.fired(), vec![FaultPoint::Alloc]);
    }

    #[test]
    fn wrap_skips_operation_on_fault() {
        let f = FaultInjector::enabled();
        f.arm(FaultPoint::Sign, 1);
        let mut ran = false;
        let result = f.wrap(FaultPoint::Sign, || {
            ran = true;
            Ok(())
        });
        assert!(result.is_err());
        assert!(!ran);
    }
}
