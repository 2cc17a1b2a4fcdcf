// Operator console: renders runtime state and publishes operator intents
//
// Keys: Up/Down select device, N/M/A edit min velocity/max velocity/acceleration,
// D edit destination, H home, O acknowledge warning, X exit runtime, Q quit console.
// While editing: type a number, Enter commits, Esc cancels.
use crossterm::{
    cursor::{Hide, MoveTo, Show},
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    execute, queue,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{
        Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode,
        enable_raw_mode,
    },
};
use std::io::{self, Write};
use std::time::Duration;
use tracing::{info, warn};
use zenoh::handlers::FifoChannelHandler;
use zenoh::sample::Sample;

use kcube_runtime::config::{TOPIC_INTENT, TOPIC_STATE};
use kcube_runtime::messages::{EditableField, OperatorIntent, StateSnapshot};
use kcube_runtime::registry::{ApplicationPhase, DeviceRecord};

const SPINNER: [char; 4] = ['-', '\\', '|', '/'];
const FRAMES_PER_SPINNER_STEP: u64 = 15;
const FRAME_MS: u64 = 16;

/// What a key press asks the console to do
#[derive(Debug, PartialEq)]
enum KeyOutcome {
    Nothing,
    Send(Vec<OperatorIntent>),
    Quit,
}

#[derive(Debug, Clone, PartialEq)]
struct FieldEdit {
    device: usize,
    field: EditableField,
    buffer: String,
}

#[derive(Default)]
struct Console {
    snapshot: Option<StateSnapshot>,
    selected: usize,
    editing: Option<FieldEdit>,
    frame: u64,
}

fn field_label(field: EditableField) -> &'static str {
    match field {
        EditableField::MinVelocity => "Min velocity",
        EditableField::MaxVelocity => "Max velocity",
        EditableField::Acceleration => "Acceleration",
        EditableField::Destination => "Destination",
    }
}

impl Console {
    fn devices(&self) -> &[DeviceRecord] {
        match &self.snapshot {
            Some(s) if s.phase.is_ready() => &s.devices,
            _ => &[],
        }
    }

    fn on_snapshot(&mut self, snapshot: StateSnapshot) {
        self.snapshot = Some(snapshot);
        let count = self.devices().len();
        if count > 0 && self.selected >= count {
            self.selected = count - 1;
        }
        // Edits are read-only while the device moves
        if let Some(edit) = &self.editing {
            if self.devices().get(edit.device).is_none_or(|d| d.is_moving) {
                self.editing = None;
            }
        }
    }

    fn handle_key(&mut self, code: KeyCode) -> KeyOutcome {
        if let Some(edit) = self.editing.as_mut() {
            match code {
                KeyCode::Char(c) if c.is_ascii_digit() || c == '.' || c == '-' => {
                    edit.buffer.push(c);
                }
                KeyCode::Backspace => {
                    edit.buffer.pop();
                }
                KeyCode::Esc => self.editing = None,
                KeyCode::Enter => {
                    let Some(edit) = self.editing.take() else {
                        return KeyOutcome::Nothing;
                    };
                    return match edit.buffer.parse::<f32>() {
                        Ok(value) => KeyOutcome::Send(vec![
                            OperatorIntent::Edit {
                                device: edit.device,
                                field: edit.field,
                                value,
                            },
                            OperatorIntent::Commit {
                                device: edit.device,
                                field: edit.field,
                            },
                        ]),
                        Err(_) => {
                            warn!("Not a number: {:?}", edit.buffer);
                            KeyOutcome::Nothing
                        }
                    };
                }
                _ => {}
            }
            return KeyOutcome::Nothing;
        }

        if let Some(phase) = self.snapshot.as_ref().map(|s| &s.phase) {
            if phase.is_failed() {
                return match code {
                    KeyCode::Char('x') => KeyOutcome::Send(vec![OperatorIntent::Exit]),
                    KeyCode::Char('q') | KeyCode::Esc => KeyOutcome::Quit,
                    _ => KeyOutcome::Nothing,
                };
            }
        }

        let count = self.devices().len();
        let device = self.selected;
        let moving = self.devices().get(device).is_some_and(|d| d.is_moving);
        let edit = |field| {
            if count == 0 || moving {
                return None;
            }
            Some(FieldEdit {
                device,
                field,
                buffer: String::new(),
            })
        };

        match code {
            KeyCode::Char('q') | KeyCode::Esc => KeyOutcome::Quit,
            KeyCode::Char('x') => KeyOutcome::Send(vec![OperatorIntent::Exit]),
            KeyCode::Up => {
                self.selected = self.selected.saturating_sub(1);
                KeyOutcome::Nothing
            }
            KeyCode::Down => {
                if self.selected + 1 < count {
                    self.selected += 1;
                }
                KeyOutcome::Nothing
            }
            KeyCode::Char('n') => {
                self.editing = edit(EditableField::MinVelocity);
                KeyOutcome::Nothing
            }
            KeyCode::Char('m') => {
                self.editing = edit(EditableField::MaxVelocity);
                KeyOutcome::Nothing
            }
            KeyCode::Char('a') => {
                self.editing = edit(EditableField::Acceleration);
                KeyOutcome::Nothing
            }
            KeyCode::Char('d') => {
                self.editing = edit(EditableField::Destination);
                KeyOutcome::Nothing
            }
            KeyCode::Char('h') if count > 0 && !moving => {
                KeyOutcome::Send(vec![OperatorIntent::Home { device }])
            }
            KeyCode::Char('o') if count > 0 => {
                KeyOutcome::Send(vec![OperatorIntent::Acknowledge { device }])
            }
            _ => KeyOutcome::Nothing,
        }
    }

    /// Screen content as (color, text) lines
    fn lines(&self) -> Vec<(Option<Color>, String)> {
        let mut out = Vec::new();
        let Some(snapshot) = &self.snapshot else {
            out.push((None, "Waiting for runtime...".to_string()));
            return out;
        };

        match &snapshot.phase {
            ApplicationPhase::Initializing => {
                let idx = (self.frame / FRAMES_PER_SPINNER_STEP) as usize % SPINNER.len();
                out.push((None, format!("Initializing {}", SPINNER[idx])));
            }
            ApplicationPhase::Failed(message) => {
                out.push((Some(Color::Red), message.clone()));
                out.push((None, String::new()));
                out.push((None, "[X] Exit".to_string()));
            }
            ApplicationPhase::Ready => {
                for (i, d) in snapshot.devices.iter().enumerate() {
                    let marker = if i == self.selected { '>' } else { ' ' };
                    out.push((None, "-".repeat(60)));
                    out.push((
                        None,
                        format!(
                            "{} Motor: {} | Serial: {}{}",
                            marker,
                            i + 1,
                            d.serial(),
                            if d.is_moving { " | MOVING" } else { "" }
                        ),
                    ));
                    out.push((
                        None,
                        format!(
                            "  Velocity: Min: {:.3} | Max: {:.3} | Accel: {:.3}",
                            d.velocity.min_velocity, d.velocity.max_velocity, d.velocity.acceleration
                        ),
                    ));
                    out.push((
                        None,
                        format!(
                            "  Set:      Min: {:.3} | Max: {:.3} | Accel: {:.3}",
                            d.pending_velocity.min_velocity,
                            d.pending_velocity.max_velocity,
                            d.pending_velocity.acceleration
                        ),
                    ));
                    out.push((
                        None,
                        format!(
                            "  Current position: {:.3} | Destination: {:.3}",
                            d.current_position, d.destination_position
                        ),
                    ));
                    match d.warning_text() {
                        Some(text) => out.push((Some(Color::Yellow), format!("  Status: {} [O] OKAY", text))),
                        None => out.push((None, "  Status: OKAY".to_string())),
                    }
                }
                out.push((None, "-".repeat(60)));
                if let Some(edit) = &self.editing {
                    out.push((
                        Some(Color::Cyan),
                        format!(
                            "Motor {} {}: {}_",
                            edit.device + 1,
                            field_label(edit.field),
                            edit.buffer
                        ),
                    ));
                } else {
                    out.push((
                        None,
                        "Up/Down select | N/M/A velocity | D destination | H home | O okay | Q quit"
                            .to_string(),
                    ));
                }
            }
        }
        out
    }

    fn draw(&self, stdout: &mut impl Write) -> io::Result<()> {
        queue!(stdout, Clear(ClearType::All), MoveTo(0, 0))?;
        for (color, text) in self.lines() {
            match color {
                Some(c) => queue!(stdout, SetForegroundColor(c), Print(text), ResetColor)?,
                None => queue!(stdout, Print(text))?,
            }
            queue!(stdout, Print("\r\n"))?;
        }
        stdout.flush()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("warn").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_INTENT).await?;
    let subscriber = session.declare_subscriber(TOPIC_STATE).await?;

    let mut stdout = io::stdout();
    enable_raw_mode()?;
    execute!(stdout, EnterAlternateScreen, Hide)?;
    let result = run_console(&publisher, &subscriber, &mut stdout).await;
    execute!(stdout, Show, LeaveAlternateScreen)?;
    disable_raw_mode()?;

    result
}

async fn run_console(
    publisher: &zenoh::pubsub::Publisher<'_>,
    subscriber: &zenoh::pubsub::Subscriber<FifoChannelHandler<Sample>>,
    stdout: &mut impl Write,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut console = Console::default();

    loop {
        // Keep only the newest snapshot
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<StateSnapshot>(&payload) {
                Ok(snapshot) => console.on_snapshot(snapshot),
                Err(e) => warn!("Failed to parse snapshot: {}", e),
            }
        }

        if event::poll(Duration::from_millis(FRAME_MS))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                if kind == KeyEventKind::Press {
                    match console.handle_key(code) {
                        KeyOutcome::Nothing => {}
                        KeyOutcome::Quit => break,
                        KeyOutcome::Send(intents) => {
                            let exit = intents.contains(&OperatorIntent::Exit);
                            for intent in intents {
                                publisher.put(serde_json::to_string(&intent)?).await?;
                            }
                            if exit {
                                break;
                            }
                        }
                    }
                }
            }
        }

        console.draw(stdout)?;
        console.frame += 1;
    }

    Ok(())
}
