// Fixed-rate runtime loop
// Initialization runs on a worker while the loop keeps publishing the
// `Initializing` phase; once the worker hands back the registry the loop
// polls devices every tick. Operator intents arrive over zenoh and the full
// state goes back out every tick.

use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};
use zenoh::handlers::FifoChannelHandler;
use zenoh::pubsub::{Publisher, Subscriber};
use zenoh::sample::Sample;

// local imports
use crate::config::{INIT_JOIN_TIMEOUT, RuntimeOptions, TOPIC_INTENT, TOPIC_STATE};
use crate::messages::{OperatorIntent, StateSnapshot};
use crate::motor::{DeviceGateway, KCubeGateway, Operation, SimulatedGateway};
use crate::poller::{Poller, TickEvent};
use crate::registry::ApplicationPhase;
use crate::sequencer::{InitOutcome, InitTask};

/// Status code the simulator reports for `--sim-fail-open`
const SIM_OPEN_FAULT_CODE: i32 = 10004;

/// Phase, init worker and poller of one run
pub struct Session<G> {
    phase: ApplicationPhase,
    init: Option<InitTask<G>>,
    poller: Option<Poller<G>>,
    tick: u64,
    exit_requested: bool,
}

impl<G: DeviceGateway + 'static> Session<G> {
    /// Start initialization in the background
    pub fn start(gateway: G) -> Self {
        info!("Starting initialization...");
        Self {
            phase: ApplicationPhase::Initializing,
            init: Some(InitTask::spawn(gateway)),
            poller: None,
            tick: 0,
            exit_requested: false,
        }
    }

    pub fn phase(&self) -> &ApplicationPhase {
        &self.phase
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    pub fn poller_mut(&mut self) -> Option<&mut Poller<G>> {
        self.poller.as_mut()
    }

    /// Process an incoming intent
    pub fn on_intent(&mut self, intent: OperatorIntent) {
        debug!("Received intent: {:?}", &intent);
        if intent == OperatorIntent::Exit {
            info!("Exit requested");
            self.exit_requested = true;
            return;
        }
        match self.poller.as_mut() {
            Some(poller) if self.phase.is_ready() => {
                if let Err(e) = poller.submit(intent) {
                    warn!("Intent rejected: {}", e);
                }
            }
            _ => debug!("Ignoring intent while {}", self.phase.name()),
        }
    }

    /// One tick: pick up a finished init worker, then poll
    pub async fn step(&mut self) -> Vec<TickEvent> {
        self.tick += 1;

        if self.init.as_ref().is_some_and(|task| task.is_finished()) {
            self.finish_init().await;
        }

        match self.poller.as_mut() {
            Some(poller) => poller.tick(&mut self.phase),
            None => Vec::new(),
        }
    }

    async fn finish_init(&mut self) {
        let Some(task) = self.init.take() else {
            return;
        };
        match task.join().await {
            InitOutcome::Ready { registry, gateway } => {
                info!("All {} device(s) initialized", registry.len());
                match self.phase.advance(ApplicationPhase::Ready) {
                    Ok(()) => self.poller = Some(Poller::new(registry, gateway)),
                    Err(e) => warn!("{}", e),
                }
            }
            InitOutcome::Failed { reason, .. } => self.phase.fail(reason.to_string()),
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot::new(
            self.tick,
            &self.phase,
            self.poller.as_ref().map(|p| p.registry()),
        )
    }

    /// Wait (bounded) for an init worker that is still running
    pub async fn shutdown(self) {
        self.shutdown_within(INIT_JOIN_TIMEOUT).await;
    }

    /// Returns false when the worker was abandoned
    ///
    /// An abandoned worker keeps its blocking thread, so the caller must not
    /// wait on the tokio runtime to drain (see `main`).
    pub async fn shutdown_within(mut self, limit: Duration) -> bool {
        let Some(task) = self.init.take() else {
            return true;
        };
        info!("Waiting for initialization worker...");
        if task.join_timeout(limit).await.is_some() {
            return true;
        }
        warn!(
            "Initialization worker still running after {:?}, abandoning it",
            limit
        );
        false
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Where operator intents come from
trait IntentSource {
    /// Next decodable intent, if one is waiting
    fn next_intent(&self) -> Option<OperatorIntent>;
}

/// Where state snapshots go
trait StateSink {
    async fn publish(&self, json: String) -> Result<(), BoxError>;
}

impl IntentSource for Subscriber<FifoChannelHandler<Sample>> {
    fn next_intent(&self) -> Option<OperatorIntent> {
        while let Ok(Some(sample)) = self.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<OperatorIntent>(&payload) {
                Ok(intent) => return Some(intent),
                Err(e) => warn!("Failed to parse intent: {}", e),
            }
        }
        None
    }
}

impl StateSink for Publisher<'_> {
    async fn publish(&self, json: String) -> Result<(), BoxError> {
        self.put(json).await?;
        Ok(())
    }
}

/// Build the simulated bank described by the options
pub fn simulated_gateway(count: usize, options: &RuntimeOptions) -> SimulatedGateway {
    let mut gateway = SimulatedGateway::new(count, options.stage_profile());
    if let Some(index) = options.sim_fail_open {
        let serial = gateway.serial_at(index);
        gateway.inject_fault(Operation::OpenSession, Some(serial), SIM_OPEN_FAULT_CODE);
    }
    gateway
}

pub async fn run(options: RuntimeOptions) -> Result<(), BoxError> {
    options.validate()?;
    match options.simulate {
        Some(count) => {
            info!("Simulating {} unit(s)", count);
            let gateway = simulated_gateway(count, &options);
            serve(Session::start(gateway), options.tick_period()).await
        }
        None => {
            let gateway = KCubeGateway::new(options.stage_profile());
            serve(Session::start(gateway), options.tick_period()).await
        }
    }
}

async fn serve<G: DeviceGateway + 'static>(
    session: Session<G>,
    period: Duration,
) -> Result<(), BoxError> {
    info!("Opening Zenoh session...");
    let zenoh_session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = zenoh_session.declare_subscriber(TOPIC_INTENT).await?;
    let pub_state = zenoh_session.declare_publisher(TOPIC_STATE).await?;

    info!("Runtime started: {}ms tick", period.as_millis());
    info!("Subscribed to: {}", TOPIC_INTENT);
    info!("Publishing to: {}", TOPIC_STATE);

    drive(session, period, &subscriber, &pub_state).await
}

/// Run the loop, then shut the session down however the loop ended
async fn drive<G, I, S>(
    mut session: Session<G>,
    period: Duration,
    intents: &I,
    sink: &S,
) -> Result<(), BoxError>
where
    G: DeviceGateway + 'static,
    I: IntentSource,
    S: StateSink,
{
    let result = pump(&mut session, period, intents, sink).await;
    if let Err(e) = &result {
        error!("Runtime loop failed: {}", e);
    }
    session.shutdown().await;
    result
}

async fn pump<G, I, S>(
    session: &mut Session<G>,
    period: Duration,
    intents: &I,
    sink: &S,
) -> Result<(), BoxError>
where
    G: DeviceGateway + 'static,
    I: IntentSource,
    S: StateSink,
{
    // Hardware calls run inline, so a slow call stretches the tick
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = &mut ctrl_c => {
                info!("Interrupted, shutting down");
                return Ok(());
            }
        }

        // 1. Drain all pending intents (non-blocking)
        while let Some(intent) = intents.next_intent() {
            session.on_intent(intent);
        }
        if session.exit_requested() {
            return Ok(());
        }

        // 2. Advance initialization / poll devices
        for event in session.step().await {
            debug!("{:?}", event);
        }

        // 3. Publish state
        let snapshot_json = serde_json::to_string(&session.snapshot())?;
        sink.publish(snapshot_json).await?;
    }
}
