// Motion controller access for the K-Cube bank
//
// Provides:
// - The Device Command Gateway trait and its parameter types
// - Thorlabs APT serial protocol implementation
// - A gateway for real KST101 cubes and a simulated one

pub mod apt;
mod gateway;
pub mod kcube;
pub mod sim;
pub mod units;

pub use gateway::{
    DeviceGateway, GatewayError, HomeParams, SerialNumber, VelocityLimits, VelocityParams,
};
pub use kcube::KCubeGateway;
pub use sim::{Operation, SimulatedGateway};
pub use units::{StageProfile, StageScaling};
