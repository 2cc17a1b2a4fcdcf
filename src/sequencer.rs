// Initialization sequencer
//
// Enumerates units, allocates the registry and opens every session. All or
// nothing: the first failure aborts the sequence and no registry is handed
// out. Runs once on a blocking worker; the gateway travels to the worker and
// comes back with the outcome, which is the only hand-off between the two.

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::motor::{DeviceGateway, GatewayError, SerialNumber};
use crate::registry::DeviceRegistry;

/// Fatal initialization outcomes
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("Failed to enumerate K-Cubes: {0}")]
    Enumerate(#[source] GatewayError),

    #[error("Could not find any K-Cubes.")]
    NoUnits,

    #[error("Failed to get serial number for device {index}: {source}")]
    Serial {
        index: usize,
        #[source]
        source: GatewayError,
    },

    #[error("Failed to init device {index}: {serial}: {source}")]
    Open {
        index: usize,
        serial: SerialNumber,
        #[source]
        source: GatewayError,
    },

    #[error("Initialization worker stopped unexpectedly: {0}")]
    Worker(String),
}

/// Run the sequence to completion on the calling thread
pub fn initialize<G: DeviceGateway + ?Sized>(gateway: &mut G) -> Result<DeviceRegistry, InitError> {
    let count = gateway.enumerate().map_err(InitError::Enumerate)?;
    if count == 0 {
        return Err(InitError::NoUnits);
    }
    info!("Enumerated {} unit(s)", count);

    let mut serials = Vec::with_capacity(count);
    for index in 0..count {
        let serial = gateway
            .serial_of(index)
            .map_err(|source| InitError::Serial { index, source })?;
        gateway
            .open_session(serial)
            .map_err(|source| InitError::Open {
                index,
                serial,
                source,
            })?;
        info!("Device {} ({}) initialized", index, serial);
        serials.push(serial);
    }

    Ok(DeviceRegistry::from_serials(serials))
}

/// Terminal result of the background sequence
pub enum InitOutcome<G> {
    Ready {
        registry: DeviceRegistry,
        gateway: G,
    },
    /// The gateway is lost only if the worker itself died
    Failed {
        reason: InitError,
        gateway: Option<G>,
    },
}

/// The sequence running on a blocking worker
pub struct InitTask<G> {
    handle: JoinHandle<(G, Result<DeviceRegistry, InitError>)>,
}

impl<G: DeviceGateway + 'static> InitTask<G> {
    /// Move the gateway onto a worker and start the sequence
    pub fn spawn(mut gateway: G) -> Self {
        let handle = tokio::task::spawn_blocking(move || {
            let result = initialize(&mut gateway);
            (gateway, result)
        });
        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the worker and take its outcome
    pub async fn join(self) -> InitOutcome<G> {
        match self.handle.await {
            Ok((gateway, Ok(registry))) => InitOutcome::Ready { registry, gateway },
            Ok((gateway, Err(reason))) => {
                error!("Initialization failed: {}", reason);
                InitOutcome::Failed {
                    reason,
                    gateway: Some(gateway),
                }
            }
            Err(e) => {
                error!("Initialization worker failed: {}", e);
                InitOutcome::Failed {
                    reason: InitError::Worker(e.to_string()),
                    gateway: None,
                }
            }
        }
    }

    /// Wait at most `limit` for the worker; `None` if it is still running
    pub async fn join_timeout(self, limit: Duration) -> Option<InitOutcome<G>> {
        tokio::time::timeout(limit, self.join()).await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::{Operation, SimulatedGateway, StageProfile};

    fn sim(count: usize) -> SimulatedGateway {
        SimulatedGateway::new(count, StageProfile::default()).recording()
    }

    #[test]
    fn test_all_units_open() {
        let mut gw = sim(3);
        let registry = initialize(&mut gw).unwrap();
        assert_eq!(registry.len(), 3);
        assert_eq!(registry[2].serial(), gw.serial_at(2));
        assert_eq!(gw.count(Operation::OpenSession), 3);
    }

    #[test]
    fn test_zero_units_fails_before_any_allocation() {
        let mut gw = sim(0);
        let err = initialize(&mut gw).unwrap_err();
        assert!(matches!(err, InitError::NoUnits));
        assert_eq!(err.to_string(), "Could not find any K-Cubes.");
        assert_eq!(gw.count(Operation::SerialOf), 0);
    }

    #[test]
    fn test_enumeration_failure_carries_status_code() {
        let mut gw = sim(2);
        gw.fail_enumeration(2);
        let err = initialize(&mut gw).unwrap_err();
        assert_eq!(err.to_string(), "Failed to enumerate K-Cubes: 2");
    }

    #[test]
    fn test_open_failure_aborts_remaining_units() {
        let mut gw = sim(3);
        let bad = gw.serial_at(1);
        gw.inject_fault(Operation::OpenSession, Some(bad), 10004);

        let err = initialize(&mut gw).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("Failed to init device 1: {}: 10004", bad)
        );
        // Device 2 is never touched
        assert_eq!(gw.count_for(Operation::SerialOf, gw.serial_at(2)), 0);
        assert_eq!(gw.count_for(Operation::OpenSession, gw.serial_at(2)), 0);
    }

    #[test]
    fn test_serial_failure_aborts() {
        let mut gw = sim(2);
        gw.inject_fault(Operation::SerialOf, None, 7);
        let err = initialize(&mut gw).unwrap_err();
        assert!(matches!(err, InitError::Serial { index: 0, .. }));
        assert_eq!(gw.count(Operation::OpenSession), 0);
    }

    #[test]
    fn test_missing_serial_past_first_device_aborts() {
        let mut gw = sim(2);
        gw.override_enumeration(3);
        let err = initialize(&mut gw).unwrap_err();
        assert!(matches!(
            err,
            InitError::Serial {
                index: 2,
                source: GatewayError::NoSuchIndex(2)
            }
        ));
        assert_eq!(
            err.to_string(),
            "Failed to get serial number for device 2: No unit at enumeration index 2"
        );
        // Devices before the failing index were opened, nothing is handed out
        assert_eq!(gw.count(Operation::OpenSession), 2);
    }

    #[tokio::test]
    async fn test_join_timeout_gives_up_on_stalled_worker() {
        let mut gw = sim(1);
        gw.stall_enumeration(Duration::from_millis(300));
        let task = InitTask::spawn(gw);
        assert!(task.join_timeout(Duration::from_millis(20)).await.is_none());
    }

    #[test]
    fn test_runtime_teardown_does_not_wait_for_stalled_worker() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let started = std::time::Instant::now();
        let outcome = rt.block_on(async {
            let mut gw = sim(1);
            gw.stall_enumeration(Duration::from_secs(5));
            InitTask::spawn(gw)
                .join_timeout(Duration::from_millis(20))
                .await
        });
        assert!(outcome.is_none());
        rt.shutdown_timeout(Duration::from_millis(100));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_task_hands_back_gateway_and_registry() {
        let task = InitTask::spawn(sim(2));
        match task.join().await {
            InitOutcome::Ready { registry, gateway } => {
                assert_eq!(registry.len(), 2);
                assert_eq!(gateway.count(Operation::OpenSession), 2);
            }
            InitOutcome::Failed { reason, .. } => panic!("unexpected failure: {}", reason),
        }
    }

    #[tokio::test]
    async fn test_task_reports_failure_with_gateway() {
        let mut gw = sim(3);
        gw.inject_fault(Operation::OpenSession, Some(gw.serial_at(1)), 1);
        let outcome = InitTask::spawn(gw)
            .join_timeout(Duration::from_secs(5))
            .await
            .expect("worker finished");
        assert!(matches!(
            outcome,
            InitOutcome::Failed {
                reason: InitError::Open { index: 1, .. },
                gateway: Some(_)
            }
        ));
    }
}
