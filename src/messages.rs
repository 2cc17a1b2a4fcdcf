// Message types exchanged with the presentation layer

use serde::{Deserialize, Serialize};

use crate::registry::{ApplicationPhase, DeviceRecord, DeviceRegistry};

/// Operator-editable fields of a device panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditableField {
    MinVelocity,
    MaxVelocity,
    Acceleration,
    Destination,
}

impl EditableField {
    pub fn is_velocity(self) -> bool {
        !matches!(self, EditableField::Destination)
    }
}

/// Intent from an operator console -> runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperatorIntent {
    /// Change a pending value without sending it
    Edit {
        device: usize,
        field: EditableField,
        value: f32,
    },
    /// Send the pending value(s) of a field to the device
    Commit { device: usize, field: EditableField },
    Home { device: usize },
    Acknowledge { device: usize },
    /// Leave the runtime (the exit action of the failure screen)
    Exit,
}

impl OperatorIntent {
    /// Device the intent addresses, if any
    pub fn device(&self) -> Option<usize> {
        match *self {
            OperatorIntent::Edit { device, .. }
            | OperatorIntent::Commit { device, .. }
            | OperatorIntent::Home { device }
            | OperatorIntent::Acknowledge { device } => Some(device),
            OperatorIntent::Exit => None,
        }
    }
}

/// Read-only view published by the runtime every tick
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub tick: u64,
    pub phase: ApplicationPhase,
    /// Empty until the phase has been `Ready`
    pub devices: Vec<DeviceRecord>,
}

impl StateSnapshot {
    pub fn new(tick: u64, phase: &ApplicationPhase, registry: Option<&DeviceRegistry>) -> Self {
        Self {
            tick,
            phase: phase.clone(),
            devices: registry.map(|r| r.records().to_vec()).unwrap_or_default(),
        }
    }
}
