// Device state: the application phase and the per-unit records

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::motor::{HomeParams, SerialNumber, VelocityLimits, VelocityParams};

/// Process-wide phase
///
/// `Initializing` -> `Ready` | `Failed`, `Ready` -> `Failed`. Nothing returns
/// to `Initializing` and `Failed` is terminal.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum ApplicationPhase {
    #[default]
    Initializing,
    Failed(String),
    Ready,
}

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("Illegal phase transition: {from} -> {to}")]
pub struct PhaseError {
    pub from: &'static str,
    pub to: &'static str,
}

impl ApplicationPhase {
    pub fn name(&self) -> &'static str {
        match self {
            ApplicationPhase::Initializing => "initializing",
            ApplicationPhase::Failed(_) => "failed",
            ApplicationPhase::Ready => "ready",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ApplicationPhase::Ready)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ApplicationPhase::Failed(_))
    }

    pub fn failure_message(&self) -> Option<&str> {
        match self {
            ApplicationPhase::Failed(msg) => Some(msg),
            _ => None,
        }
    }

    /// Move to `next` if the transition is legal
    pub fn advance(&mut self, next: ApplicationPhase) -> Result<(), PhaseError> {
        let legal = matches!(
            (&*self, &next),
            (ApplicationPhase::Initializing, ApplicationPhase::Ready)
                | (ApplicationPhase::Initializing, ApplicationPhase::Failed(_))
                | (ApplicationPhase::Ready, ApplicationPhase::Failed(_))
        );
        if !legal {
            return Err(PhaseError {
                from: self.name(),
                to: next.name(),
            });
        }
        *self = next;
        Ok(())
    }

    /// Enter `Failed` unless already failed; the first failure message wins
    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        if let Err(e) = self.advance(ApplicationPhase::Failed(message.clone())) {
            warn!("{} (dropped failure: {})", e, message);
        }
    }
}

/// State of one physical unit
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceRecord {
    serial: SerialNumber,
    /// Last-known-good values read from hardware
    pub velocity: VelocityParams,
    /// Operator-edited candidates, sent on commit
    pub pending_velocity: VelocityParams,
    pub limits: VelocityLimits,
    pub current_position: f32,
    pub last_observed_position: f32,
    pub destination_position: f32,
    pub home: HomeParams,
    pub is_moving: bool,
    warning: Option<String>,
}

impl DeviceRecord {
    pub fn new(serial: SerialNumber) -> Self {
        Self {
            serial,
            ..Default::default()
        }
    }

    pub fn serial(&self) -> SerialNumber {
        self.serial
    }

    pub fn has_warning(&self) -> bool {
        self.warning.is_some()
    }

    pub fn warning_text(&self) -> Option<&str> {
        self.warning.as_deref()
    }

    /// Flag a warning; replaces any previous text
    pub fn set_warning(&mut self, text: impl Into<String>) {
        self.warning = Some(text.into());
    }

    /// Operator acknowledgment; no-op without a warning
    pub fn acknowledge_warning(&mut self) -> bool {
        self.warning.take().is_some()
    }
}

/// Fixed-size, index-addressed collection of device records
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceRegistry {
    records: Box<[DeviceRecord]>,
}

impl DeviceRegistry {
    /// Allocate one zeroed record per enumerated serial, in enumeration order
    pub fn from_serials(serials: impl IntoIterator<Item = SerialNumber>) -> Self {
        Self {
            records: serials.into_iter().map(DeviceRecord::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut DeviceRecord> {
        self.records.get_mut(index)
    }

    pub fn records(&self) -> &[DeviceRecord] {
        &self.records
    }
}

impl std::ops::Index<usize> for DeviceRegistry {
    type Output = DeviceRecord;

    fn index(&self, index: usize) -> &DeviceRecord {
        &self.records[index]
    }
}

impl std::ops::IndexMut<usize> for DeviceRegistry {
    fn index_mut(&mut self, index: usize) -> &mut DeviceRecord {
        &mut self.records[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_legal_transitions() {
        let mut phase = ApplicationPhase::default();
        assert_eq!(phase, ApplicationPhase::Initializing);
        phase.advance(ApplicationPhase::Ready).unwrap();
        phase.advance(ApplicationPhase::Failed("boom".into())).unwrap();
        assert_eq!(phase.failure_message(), Some("boom"));
    }

    #[test]
    fn test_phase_never_returns_to_initializing() {
        let mut ready = ApplicationPhase::Ready;
        assert!(ready.advance(ApplicationPhase::Initializing).is_err());

        let mut failed = ApplicationPhase::Failed("x".into());
        assert_eq!(
            failed.advance(ApplicationPhase::Initializing),
            Err(PhaseError {
                from: "failed",
                to: "initializing"
            })
        );
        assert!(failed.advance(ApplicationPhase::Ready).is_err());
        assert!(failed.is_failed());
    }

    #[test]
    fn test_first_failure_message_is_kept() {
        let mut phase = ApplicationPhase::Ready;
        phase.fail("first");
        phase.fail("second");
        assert_eq!(phase.failure_message(), Some("first"));
    }

    #[test]
    fn test_phase_json_shape() {
        let json = serde_json::to_string(&ApplicationPhase::Failed("no units".into())).unwrap();
        assert_eq!(json, r#"{"state":"failed","message":"no units"}"#);
        let json = serde_json::to_string(&ApplicationPhase::Ready).unwrap();
        assert_eq!(json, r#"{"state":"ready"}"#);
    }

    #[test]
    fn test_acknowledge_is_idempotent() {
        let mut rec = DeviceRecord::new(SerialNumber(26000001));
        assert!(!rec.acknowledge_warning());

        rec.set_warning("first");
        rec.set_warning("second");
        assert_eq!(rec.warning_text(), Some("second"));
        assert!(rec.acknowledge_warning());
        assert!(!rec.has_warning());
        assert!(!rec.acknowledge_warning());
    }

    #[test]
    fn test_registry_is_zeroed_and_ordered() {
        let mut reg = DeviceRegistry::from_serials([SerialNumber(3), SerialNumber(1)]);
        assert_eq!(reg.len(), 2);
        assert_eq!(reg[0].serial(), SerialNumber(3));
        assert_eq!(reg[1].serial(), SerialNumber(1));
        assert_eq!(reg[1].current_position, 0.0);
        assert!(!reg[1].is_moving);
        assert!(reg.get_mut(2).is_none());
    }
}
