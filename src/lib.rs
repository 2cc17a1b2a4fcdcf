// K-Cube runtime: background initialization, per-frame polling and operator
// commands for a bank of KST101 stepper controllers

pub mod config;
pub mod messages;
pub mod motor;
pub mod poller;
pub mod registry;
pub mod runtime;
pub mod sequencer;
