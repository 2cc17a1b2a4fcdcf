// Unit conversion between physical stage units and K-Cube device counts
//
// The controller works in microstep counts. Position, velocity and
// acceleration each have their own scaling factor, which depends on the
// stage attached to the cube.

use super::gateway::VelocityLimits;

/// ZST-series stage driven by a KST101: microsteps per mm
pub const ZST_COUNTS_PER_MM: f64 = 2_008_645.63;
/// ZST-series stage driven by a KST101: device velocity per mm/s
pub const ZST_VELOCITY_FACTOR: f64 = 107_824_097.5;
/// ZST-series stage driven by a KST101: device acceleration per mm/s²
pub const ZST_ACCELERATION_FACTOR: f64 = 22_097.3;

/// Default stage ceilings (mm/s, mm/s²)
pub const ZST_MAX_VELOCITY: f32 = 2.6;
pub const ZST_MAX_ACCELERATION: f32 = 4.0;

/// Scaling factors for one stage type
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageScaling {
    pub counts_per_unit: f64,
    pub velocity_factor: f64,
    pub acceleration_factor: f64,
}

impl Default for StageScaling {
    fn default() -> Self {
        Self {
            counts_per_unit: ZST_COUNTS_PER_MM,
            velocity_factor: ZST_VELOCITY_FACTOR,
            acceleration_factor: ZST_ACCELERATION_FACTOR,
        }
    }
}

/// Scaling plus the ceilings reported as the unit's velocity limits
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageProfile {
    pub scaling: StageScaling,
    pub limits: VelocityLimits,
}

impl Default for StageProfile {
    fn default() -> Self {
        Self {
            scaling: StageScaling::default(),
            limits: VelocityLimits {
                max_acceleration: ZST_MAX_ACCELERATION,
                max_velocity: ZST_MAX_VELOCITY,
            },
        }
    }
}

/// Round and clamp a scaled value to the device's signed 32-bit range
fn to_counts(value: f64) -> i32 {
    value.round().clamp(i32::MIN as f64, i32::MAX as f64) as i32
}

impl StageScaling {
    pub fn position_to_counts(&self, position: f32) -> i32 {
        to_counts(position as f64 * self.counts_per_unit)
    }

    pub fn position_from_counts(&self, counts: i32) -> f32 {
        (counts as f64 / self.counts_per_unit) as f32
    }

    pub fn velocity_to_counts(&self, velocity: f32) -> i32 {
        to_counts(velocity as f64 * self.velocity_factor)
    }

    pub fn velocity_from_counts(&self, counts: i32) -> f32 {
        (counts as f64 / self.velocity_factor) as f32
    }

    pub fn acceleration_to_counts(&self, acceleration: f32) -> i32 {
        to_counts(acceleration as f64 * self.acceleration_factor)
    }

    pub fn acceleration_from_counts(&self, counts: i32) -> f32 {
        (counts as f64 / self.acceleration_factor) as f32
    }
}
