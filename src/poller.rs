// Polling & command loop
//
// One `tick` per frame while the phase is `Ready`. For every device in index
// order: refresh position (if it was moving), refresh motion status, then
// apply whatever the operator committed since the last tick. Per-device
// failures become warnings on that device only; an unreadable motion status
// fails the whole application.

use tracing::{debug, error, info, warn};

use crate::messages::{EditableField, OperatorIntent};
use crate::motor::{DeviceGateway, VelocityLimits, VelocityParams};
use crate::registry::{ApplicationPhase, DeviceRecord, DeviceRegistry};

/// Hardware command kinds an operator can queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Velocity,
    Destination,
    Home,
}

/// State changes produced by one tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickEvent {
    /// A recoverable failure recorded on the device
    Warning { device: usize, message: String },
    /// Motion status could not be read; the application has failed
    MotionStatusLost { device: usize, message: String },
    MotionStopped { device: usize, position: f32 },
    VelocityConfirmed {
        device: usize,
        params: VelocityParams,
    },
    MoveStarted { device: usize, destination: f32 },
    HomeStarted { device: usize },
    /// A queued command was dropped because the device started moving
    CommandRejected { device: usize, command: Command },
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum IntentError {
    #[error("No device at index {0}")]
    UnknownDevice(usize),

    #[error("Device {0} is moving")]
    DeviceMoving(usize),

    #[error("Intent does not address a device")]
    NotADeviceIntent,
}

/// Commit signals waiting for the next tick
#[derive(Debug, Clone, Copy, Default)]
struct PendingCommands {
    velocity: bool,
    destination: bool,
    home: bool,
}

/// Steady-state owner of the registry and the gateway
pub struct Poller<G> {
    gateway: G,
    registry: DeviceRegistry,
    pending: Vec<PendingCommands>,
    first_run_done: bool,
}

/// Record a recoverable failure; the newest message replaces the old one
fn flag(events: &mut Vec<TickEvent>, record: &mut DeviceRecord, device: usize, message: String) {
    warn!("Device {} ({}): {}", device, record.serial(), message);
    record.set_warning(message.clone());
    events.push(TickEvent::Warning { device, message });
}

/// Check candidate velocity parameters against the unit's ceilings
///
/// A zero ceiling means it was never read and is not enforced.
pub fn check_velocity(params: VelocityParams, limits: VelocityLimits) -> Result<(), String> {
    let VelocityParams {
        min_velocity,
        acceleration,
        max_velocity,
    } = params;

    if ![min_velocity, acceleration, max_velocity]
        .iter()
        .all(|v| v.is_finite() && *v >= 0.0)
    {
        return Err("values must be finite and non-negative".to_string());
    }
    if min_velocity > max_velocity {
        return Err(format!(
            "min velocity {} above max velocity {}",
            min_velocity, max_velocity
        ));
    }
    if limits.max_velocity > 0.0 && max_velocity > limits.max_velocity {
        return Err(format!(
            "max velocity {} above limit {}",
            max_velocity, limits.max_velocity
        ));
    }
    if limits.max_acceleration > 0.0 && acceleration > limits.max_acceleration {
        return Err(format!(
            "acceleration {} above limit {}",
            acceleration, limits.max_acceleration
        ));
    }
    Ok(())
}

impl<G: DeviceGateway> Poller<G> {
    /// Take over a fully initialized registry and its gateway
    pub fn new(registry: DeviceRegistry, gateway: G) -> Self {
        let pending = vec![PendingCommands::default(); registry.len()];
        Self {
            gateway,
            registry,
            pending,
            first_run_done: false,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn gateway_mut(&mut self) -> &mut G {
        &mut self.gateway
    }

    /// Accept an operator intent into the device's pending slots
    ///
    /// Edits, commits and home requests for a moving device are rejected.
    /// Acknowledgment is always accepted and never touches hardware.
    pub fn submit(&mut self, intent: OperatorIntent) -> Result<(), IntentError> {
        let device = intent.device().ok_or(IntentError::NotADeviceIntent)?;
        let record = self
            .registry
            .get_mut(device)
            .ok_or(IntentError::UnknownDevice(device))?;
        let slot = &mut self.pending[device];

        match intent {
            OperatorIntent::Acknowledge { .. } => {
                if record.acknowledge_warning() {
                    debug!("Device {} warning acknowledged", device);
                }
            }
            _ if record.is_moving => return Err(IntentError::DeviceMoving(device)),
            OperatorIntent::Edit { field, value, .. } => match field {
                EditableField::MinVelocity => record.pending_velocity.min_velocity = value,
                EditableField::MaxVelocity => record.pending_velocity.max_velocity = value,
                EditableField::Acceleration => record.pending_velocity.acceleration = value,
                EditableField::Destination => record.destination_position = value,
            },
            OperatorIntent::Commit { field, .. } => {
                if field.is_velocity() {
                    slot.velocity = true;
                } else {
                    slot.destination = true;
                }
            }
            OperatorIntent::Home { .. } => slot.home = true,
            OperatorIntent::Exit => return Err(IntentError::NotADeviceIntent),
        }
        Ok(())
    }

    /// Run one polling pass; does nothing unless `phase` is `Ready`
    pub fn tick(&mut self, phase: &mut ApplicationPhase) -> Vec<TickEvent> {
        let mut events = Vec::new();
        if !phase.is_ready() {
            return events;
        }

        if !self.first_run_done {
            for device in 0..self.registry.len() {
                self.fetch_initial(device, &mut events);
            }
            self.first_run_done = true;
        }

        let mut failed = false;
        for device in 0..self.registry.len() {
            self.refresh_position(device, &mut events);

            if let Err(message) = self.refresh_motion(device, &mut events) {
                error!("{}", message);
                phase.fail(message.clone());
                events.push(TickEvent::MotionStatusLost { device, message });
                failed = true;
                continue;
            }
            // No commands go out once the application has failed
            if failed {
                continue;
            }

            self.apply_velocity(device, &mut events);
            self.apply_destination(device, &mut events);
            self.apply_home(device, &mut events);
        }

        events
    }

    /// Read home params, position and velocity settings once after `Ready`
    ///
    /// Each read is independent; a failure only warns.
    fn fetch_initial(&mut self, device: usize, events: &mut Vec<TickEvent>) {
        let record = &mut self.registry[device];
        let serial = record.serial();

        match self.gateway.home_params(serial) {
            Ok(home) => record.home = home,
            Err(e) => flag(
                events,
                record,
                device,
                format!("Failed to get home info for device {}: {}: {}", device, serial, e),
            ),
        }

        match self.gateway.position(serial) {
            Ok(position) => record.current_position = position,
            Err(e) => flag(
                events,
                record,
                device,
                format!("Failed to get current pos info for device {}: {}: {}", device, serial, e),
            ),
        }
        record.last_observed_position = record.current_position;
        record.destination_position = record.current_position;

        match self.gateway.velocity_limits(serial) {
            Ok(limits) => record.limits = limits,
            Err(e) => flag(
                events,
                record,
                device,
                format!("Failed to get velocity limit info for device {}: {}: {}", device, serial, e),
            ),
        }

        match self.gateway.velocity_params(serial) {
            Ok(params) => record.velocity = params,
            Err(e) => flag(
                events,
                record,
                device,
                format!("Failed to get velocity params info for device {}: {}: {}", device, serial, e),
            ),
        }
        record.pending_velocity = record.velocity;

        debug!("Device {} ({}) first-run fetch done", device, serial);
    }

    fn refresh_position(&mut self, device: usize, events: &mut Vec<TickEvent>) {
        let record = &mut self.registry[device];
        if !record.is_moving {
            return;
        }
        let serial = record.serial();
        record.last_observed_position = record.current_position;
        match self.gateway.position(serial) {
            Ok(position) => record.current_position = position,
            Err(e) => flag(
                events,
                record,
                device,
                format!("Failed to get position for device {}: {}: {}", device, serial, e),
            ),
        }
    }

    /// Err carries the application failure message
    fn refresh_motion(&mut self, device: usize, events: &mut Vec<TickEvent>) -> Result<(), String> {
        let record = &mut self.registry[device];
        let serial = record.serial();
        let was_moving = record.is_moving;

        let moving = self.gateway.is_in_motion(serial).map_err(|e| {
            format!(
                "Failed to get moving status info for device {}: {}: {}",
                device, serial, e
            )
        })?;
        record.is_moving = moving;

        if was_moving && !moving {
            debug!("Device {} stopped at {}", device, record.current_position);
            events.push(TickEvent::MotionStopped {
                device,
                position: record.current_position,
            });
        }
        Ok(())
    }

    /// Drop a queued command for a moving device; true if it was dropped
    fn reject_if_moving(
        record: &DeviceRecord,
        device: usize,
        command: Command,
        events: &mut Vec<TickEvent>,
    ) -> bool {
        if record.is_moving {
            warn!("Device {} is moving, dropping {:?} command", device, command);
            events.push(TickEvent::CommandRejected { device, command });
        }
        record.is_moving
    }

    fn apply_velocity(&mut self, device: usize, events: &mut Vec<TickEvent>) {
        if !std::mem::take(&mut self.pending[device].velocity) {
            return;
        }
        let record = &mut self.registry[device];
        if Self::reject_if_moving(record, device, Command::Velocity, events) {
            return;
        }
        let serial = record.serial();
        let params = record.pending_velocity;

        if let Err(reason) = check_velocity(params, record.limits) {
            flag(
                events,
                record,
                device,
                format!("Velocity parameters out of range: {}", reason),
            );
            return;
        }

        if let Err(e) = self.gateway.set_velocity_params(serial, params) {
            flag(
                events,
                record,
                device,
                format!("Could not set velocity parameters: {}", e),
            );
            return;
        }
        match self.gateway.velocity_params(serial) {
            Ok(confirmed) => {
                info!("Device {} velocity params now {:?}", device, confirmed);
                record.velocity = confirmed;
                events.push(TickEvent::VelocityConfirmed {
                    device,
                    params: confirmed,
                });
            }
            Err(e) => flag(
                events,
                record,
                device,
                format!("Could not retrieve velocity parameters: {}", e),
            ),
        }
    }

    fn apply_destination(&mut self, device: usize, events: &mut Vec<TickEvent>) {
        if !std::mem::take(&mut self.pending[device].destination) {
            return;
        }
        let record = &mut self.registry[device];
        if Self::reject_if_moving(record, device, Command::Destination, events) {
            return;
        }
        let destination = record.destination_position;
        match self.gateway.move_absolute(record.serial(), destination) {
            Ok(()) => {
                info!("Device {} moving to {}", device, destination);
                events.push(TickEvent::MoveStarted {
                    device,
                    destination,
                });
            }
            Err(e) => flag(events, record, device, format!("Could not go to position: {}", e)),
        }
    }

    fn apply_home(&mut self, device: usize, events: &mut Vec<TickEvent>) {
        if !std::mem::take(&mut self.pending[device].home) {
            return;
        }
        let record = &mut self.registry[device];
        if Self::reject_if_moving(record, device, Command::Home, events) {
            return;
        }
        match self.gateway.move_home(record.serial()) {
            Ok(()) => {
                info!("Device {} homing", device);
                events.push(TickEvent::HomeStarted { device });
            }
            Err(e) => flag(events, record, device, format!("Could not go home: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::{Operation, SimulatedGateway, StageProfile};
    use crate::sequencer::initialize;

    fn profile() -> StageProfile {
        let mut profile = StageProfile::default();
        profile.limits = VelocityLimits {
            max_acceleration: 10.0,
            max_velocity: 20.0,
        };
        profile
    }

    fn poller_with(
        count: usize,
        configure: impl FnOnce(&mut SimulatedGateway),
    ) -> Poller<SimulatedGateway> {
        let mut gw = SimulatedGateway::new(count, profile()).recording();
        configure(&mut gw);
        let registry = initialize(&mut gw).unwrap();
        gw.clear_calls();
        Poller::new(registry, gw)
    }

    fn poller(count: usize) -> Poller<SimulatedGateway> {
        poller_with(count, |_| {})
    }

    fn commit(p: &mut Poller<SimulatedGateway>, device: usize, field: EditableField, value: f32) {
        p.submit(OperatorIntent::Edit {
            device,
            field,
            value,
        })
        .unwrap();
        p.submit(OperatorIntent::Commit { device, field }).unwrap();
    }

    #[test]
    fn test_first_run_seeds_confirmed_and_pending_values() {
        let mut p = poller_with(1, |gw| {
            let s = gw.serial_at(0);
            gw.set_position(s, 7.5);
            gw.set_velocity(s, VelocityParams::new(0.5, 2.0, 1.8));
        });
        let mut phase = ApplicationPhase::Ready;
        let events = p.tick(&mut phase);

        assert!(events.is_empty(), "{:?}", events);
        let rec = &p.registry()[0];
        assert_eq!(rec.current_position, 7.5);
        assert_eq!(rec.last_observed_position, 7.5);
        assert_eq!(rec.destination_position, 7.5);
        assert_eq!(rec.velocity, VelocityParams::new(0.5, 2.0, 1.8));
        assert_eq!(rec.pending_velocity, rec.velocity);
        assert_eq!(rec.limits.max_velocity, 20.0);
        assert_eq!(rec.home.offset, 0.1);
        assert!(!rec.has_warning());
    }

    #[test]
    fn test_first_run_happens_once() {
        let mut p = poller(2);
        let mut phase = ApplicationPhase::Ready;
        for _ in 0..3 {
            p.tick(&mut phase);
        }
        assert_eq!(p.gateway().count(Operation::HomeParams), 2);
        assert_eq!(p.gateway().count(Operation::VelocityLimits), 2);
        assert_eq!(p.gateway().count(Operation::InMotion), 6);
    }

    #[test]
    fn test_read_failure_stays_on_its_device() {
        let mut p = poller_with(2, |gw| {
            let s = gw.serial_at(1);
            gw.inject_fault(Operation::Position, Some(s), 38);
            gw.set_position(gw.serial_at(0), 1.0);
        });
        let mut phase = ApplicationPhase::Ready;
        p.tick(&mut phase);

        assert!(phase.is_ready());
        let (a, b) = (&p.registry()[0], &p.registry()[1]);
        assert!(!a.has_warning());
        assert_eq!(a.current_position, 1.0);
        assert_eq!(
            b.warning_text(),
            Some(format!("Failed to get current pos info for device 1: {}: 38", b.serial()).as_str())
        );
        // The rest of device 1's fetch still ran
        assert_eq!(b.limits.max_velocity, 20.0);
    }

    #[test]
    fn test_last_failure_message_wins_but_all_are_reported() {
        let mut p = poller_with(1, |gw| {
            gw.inject_fault(Operation::HomeParams, None, 1);
            gw.inject_fault(Operation::VelocityParams, None, 2);
        });
        let mut phase = ApplicationPhase::Ready;
        let events = p.tick(&mut phase);

        let warnings = events
            .iter()
            .filter(|e| matches!(e, TickEvent::Warning { device: 0, .. }))
            .count();
        assert_eq!(warnings, 2);
        let text = p.registry()[0].warning_text().unwrap();
        assert!(text.starts_with("Failed to get velocity params info for device 0"), "{}", text);
    }

    #[test]
    fn test_velocity_commit_round_trip() {
        let mut p = poller_with(2, |gw| {
            gw.set_velocity(gw.serial_at(0), VelocityParams::new(2.0, 5.0, 10.0));
            gw.set_velocity(gw.serial_at(1), VelocityParams::new(1.0, 3.0, 4.0));
        });
        let mut phase = ApplicationPhase::Ready;
        p.tick(&mut phase);
        let before = p.registry()[1].clone();

        commit(&mut p, 0, EditableField::MaxVelocity, 15.0);
        let events = p.tick(&mut phase);

        let sent = VelocityParams::new(2.0, 5.0, 15.0);
        assert!(events.contains(&TickEvent::VelocityConfirmed {
            device: 0,
            params: sent
        }));
        let rec = &p.registry()[0];
        assert_eq!(rec.velocity.max_velocity, 15.0);
        assert_eq!(rec.velocity, sent);
        assert!(!rec.has_warning());
        assert_eq!(p.registry()[1], before);
        assert_eq!(
            p.gateway()
                .count_for(Operation::SetVelocityParams, p.registry()[1].serial()),
            0
        );
    }

    #[test]
    fn test_velocity_write_and_readback_failures_warn_independently() {
        let mut p = poller(1);
        let mut phase = ApplicationPhase::Ready;
        p.tick(&mut phase);

        p.gateway_mut()
            .inject_fault(Operation::SetVelocityParams, None, 5);
        commit(&mut p, 0, EditableField::Acceleration, 2.0);
        p.tick(&mut phase);
        assert_eq!(
            p.registry()[0].warning_text(),
            Some("Could not set velocity parameters: 5")
        );
        assert_eq!(p.gateway().count(Operation::VelocityParams), 1);

        p.gateway_mut().clear_faults();
        p.gateway_mut().inject_fault(Operation::VelocityParams, None, 6);
        p.submit(OperatorIntent::Commit {
            device: 0,
            field: EditableField::Acceleration,
        })
        .unwrap();
        p.tick(&mut phase);
        assert_eq!(
            p.registry()[0].warning_text(),
            Some("Could not retrieve velocity parameters: 6")
        );
        // Confirmed values are left as last read
        assert_eq!(p.registry()[0].velocity.acceleration, 1.5);
    }

    #[test]
    fn test_out_of_range_velocity_is_not_sent() {
        let mut p = poller(1);
        let mut phase = ApplicationPhase::Ready;
        p.tick(&mut phase);

        commit(&mut p, 0, EditableField::MaxVelocity, 25.0);
        p.tick(&mut phase);

        assert_eq!(p.gateway().count(Operation::SetVelocityParams), 0);
        assert_eq!(
            p.registry()[0].warning_text(),
            Some("Velocity parameters out of range: max velocity 25 above limit 20")
        );
    }

    #[test]
    fn test_check_velocity_rules() {
        let limits = VelocityLimits {
            max_acceleration: 4.0,
            max_velocity: 2.6,
        };
        assert!(check_velocity(VelocityParams::new(0.0, 4.0, 2.6), limits).is_ok());
        assert!(check_velocity(VelocityParams::new(-0.1, 1.0, 1.0), limits).is_err());
        assert!(check_velocity(VelocityParams::new(2.0, 1.0, 1.0), limits).is_err());
        assert!(check_velocity(VelocityParams::new(0.0, 4.1, 1.0), limits).is_err());
        assert!(check_velocity(VelocityParams::new(0.0, f32::NAN, 1.0), limits).is_err());
        // Unread ceilings are not enforced
        assert!(check_velocity(VelocityParams::new(0.0, 50.0, 50.0), VelocityLimits::default()).is_ok());
    }

    #[test]
    fn test_motion_status_failure_fails_application_in_same_tick() {
        let mut p = poller(3);
        let mut phase = ApplicationPhase::Ready;
        for _ in 0..6 {
            p.tick(&mut phase);
        }
        assert!(phase.is_ready());

        p.submit(OperatorIntent::Home { device: 1 }).unwrap();
        p.submit(OperatorIntent::Home { device: 2 }).unwrap();
        let s0 = p.registry()[0].serial();
        p.gateway_mut().inject_fault(Operation::InMotion, Some(s0), 9);

        let events = p.tick(&mut phase);
        assert_eq!(
            phase.failure_message(),
            Some(format!("Failed to get moving status info for device 0: {}: 9", s0).as_str())
        );
        assert!(matches!(events[0], TickEvent::MotionStatusLost { device: 0, .. }));
        assert_eq!(p.gateway().count(Operation::MoveHome), 0);

        // Nothing runs on the following tick
        p.gateway_mut().clear_calls();
        assert!(p.tick(&mut phase).is_empty());
        assert!(p.gateway().calls().is_empty());
    }

    #[test]
    fn test_devices_before_the_failing_one_still_get_commands() {
        let mut p = poller(2);
        let mut phase = ApplicationPhase::Ready;
        p.tick(&mut phase);

        p.submit(OperatorIntent::Home { device: 0 }).unwrap();
        let s1 = p.registry()[1].serial();
        p.gateway_mut().inject_fault(Operation::InMotion, Some(s1), 9);
        p.tick(&mut phase);

        assert!(phase.is_failed());
        assert_eq!(p.gateway().count(Operation::MoveHome), 1);
    }

    #[test]
    fn test_moving_device_rejects_edits_and_commands() {
        let mut p = poller(1);
        let mut phase = ApplicationPhase::Ready;
        let s = p.registry()[0].serial();
        p.gateway_mut().start_motion(s, 5.0);
        p.tick(&mut phase);
        assert!(p.registry()[0].is_moving);

        let edit = OperatorIntent::Edit {
            device: 0,
            field: EditableField::Destination,
            value: 3.0,
        };
        assert_eq!(p.submit(edit), Err(IntentError::DeviceMoving(0)));
        assert_eq!(
            p.submit(OperatorIntent::Commit {
                device: 0,
                field: EditableField::Destination
            }),
            Err(IntentError::DeviceMoving(0))
        );
        assert_eq!(
            p.submit(OperatorIntent::Home { device: 0 }),
            Err(IntentError::DeviceMoving(0))
        );
        p.tick(&mut phase);
        assert_eq!(p.gateway().count(Operation::MoveAbsolute), 0);
        assert_eq!(p.registry()[0].destination_position, 0.0);
    }

    #[test]
    fn test_command_queued_before_motion_is_dropped() {
        let mut p = poller(1);
        let mut phase = ApplicationPhase::Ready;
        p.tick(&mut phase);

        commit(&mut p, 0, EditableField::Destination, 4.0);
        let s = p.registry()[0].serial();
        p.gateway_mut().start_motion(s, 1.0);
        let events = p.tick(&mut phase);

        assert!(events.contains(&TickEvent::CommandRejected {
            device: 0,
            command: Command::Destination
        }));
        assert_eq!(p.gateway().count(Operation::MoveAbsolute), 0);
        assert!(!p.registry()[0].has_warning());
    }

    #[test]
    fn test_move_tracks_position_until_stopped() {
        let mut gw = SimulatedGateway::new(1, profile())
            .recording()
            .with_move_polls(2);
        let registry = initialize(&mut gw).unwrap();
        let mut p = Poller::new(registry, gw);
        let mut phase = ApplicationPhase::Ready;
        p.tick(&mut phase);

        commit(&mut p, 0, EditableField::Destination, 3.0);
        let events = p.tick(&mut phase);
        assert_eq!(
            events,
            vec![TickEvent::MoveStarted {
                device: 0,
                destination: 3.0
            }]
        );

        p.tick(&mut phase);
        assert!(p.registry()[0].is_moving);
        p.tick(&mut phase);
        let events = p.tick(&mut phase);

        assert_eq!(
            events,
            vec![TickEvent::MotionStopped {
                device: 0,
                position: 3.0
            }]
        );
        let rec = &p.registry()[0];
        assert_eq!(rec.current_position, 3.0);
        assert_eq!(rec.last_observed_position, 0.0);
        assert!(!rec.is_moving);
    }

    #[test]
    fn test_position_refresh_failure_keeps_motion_state() {
        let mut p = poller(1);
        let mut phase = ApplicationPhase::Ready;
        let s = p.registry()[0].serial();
        p.gateway_mut().start_motion(s, 2.0);
        p.tick(&mut phase);

        p.gateway_mut().inject_fault(Operation::Position, None, 4);
        p.tick(&mut phase);
        let rec = &p.registry()[0];
        assert!(rec.is_moving);
        assert_eq!(
            rec.warning_text(),
            Some(format!("Failed to get position for device 0: {}: 4", s).as_str())
        );
        assert!(phase.is_ready());
    }

    #[test]
    fn test_home_failure_warns() {
        let mut p = poller(2);
        let mut phase = ApplicationPhase::Ready;
        p.tick(&mut phase);

        p.gateway_mut().inject_fault(Operation::MoveHome, None, 41);
        p.submit(OperatorIntent::Home { device: 1 }).unwrap();
        p.tick(&mut phase);

        assert_eq!(p.registry()[1].warning_text(), Some("Could not go home: 41"));
        assert!(!p.registry()[0].has_warning());
    }

    #[test]
    fn test_acknowledge_without_warning_is_a_no_op() {
        let mut p = poller(1);
        let mut phase = ApplicationPhase::Ready;
        p.tick(&mut phase);
        p.gateway_mut().clear_calls();

        let before = p.registry()[0].clone();
        p.submit(OperatorIntent::Acknowledge { device: 0 }).unwrap();
        assert_eq!(p.registry()[0], before);
        assert!(p.gateway().calls().is_empty());
    }

    #[test]
    fn test_acknowledge_clears_warning_even_while_moving() {
        let mut p = poller_with(1, |gw| gw.inject_fault(Operation::HomeParams, None, 3));
        let mut phase = ApplicationPhase::Ready;
        let s = p.registry()[0].serial();
        p.gateway_mut().start_motion(s, 1.0);
        p.tick(&mut phase);
        assert!(p.registry()[0].is_moving && p.registry()[0].has_warning());

        p.submit(OperatorIntent::Acknowledge { device: 0 }).unwrap();
        assert!(!p.registry()[0].has_warning());
    }

    #[test]
    fn test_intents_for_unknown_devices_are_refused() {
        let mut p = poller(1);
        assert_eq!(
            p.submit(OperatorIntent::Home { device: 4 }),
            Err(IntentError::UnknownDevice(4))
        );
        assert_eq!(
            p.submit(OperatorIntent::Exit),
            Err(IntentError::NotADeviceIntent)
        );
    }

    #[test]
    fn test_tick_is_inert_outside_ready() {
        let mut p = poller(1);
        let mut phase = ApplicationPhase::Initializing;
        assert!(p.tick(&mut phase).is_empty());
        assert!(p.gateway().calls().is_empty());
    }
}
