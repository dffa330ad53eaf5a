use anyhow::Context;
use rc_vehicle_client::domain::input::JoystickMapper;
use rc_vehicle_client::domain::models::{
    Command, RadioPayload, SessionStatus, SocketPayload,
};
use rc_vehicle_client::domain::settings::{SettingsService, TransportKind};
use rc_vehicle_client::infrastructure::dispatcher::{CommandDispatcher, DispatchOutcome, VehicleLink};
use rc_vehicle_client::infrastructure::socket::{SocketConfig, SocketSessionHandle};
use rc_vehicle_client::infrastructure::status::StatusStream;
use std::fmt::Debug;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

const HELP: &str = "\
commands:
  forward | backward | left | right | stop | photo | measure
  joy <x> <y>     drive from stick axes in [-1, 1]
  read            read the sensor
  start | reconnect | disconnect | close
  quit";

/// One printable line per status
trait StatusLine {
    fn line(&self) -> String;
}

impl StatusLine for RadioPayload {
    fn line(&self) -> String {
        if self.sensors.is_empty() {
            format!("{:?}", self.connection)
        } else {
            format!("{:?} sensors={}", self.connection, self.sensors)
        }
    }
}

impl StatusLine for SocketPayload {
    fn line(&self) -> String {
        let mut line = format!("{:?}", self.connection);
        if !self.sensors.is_empty() {
            line.push_str(&format!(" sensors={}", self.sensors));
        }
        if let Some(image) = &self.image {
            line.push_str(&format!(" photo={} bytes", image.len()));
        }
        line
    }
}

async fn print_statuses<P>(mut statuses: StatusStream<P>)
where
    P: StatusLine + Clone + Send + Debug + 'static,
{
    while let Some(status) = statuses.recv().await {
        match status {
            SessionStatus::Loading { message } => println!("... {}", message),
            SessionStatus::Success { payload } => println!("ok  {}", payload.line()),
            SessionStatus::Error { message } => println!("err {}", message),
        }
    }
}

async fn drive<L: VehicleLink>(link: L, axis_flat: f32) -> anyhow::Result<()> {
    let dispatcher = CommandDispatcher::new(link);
    let mut joystick = JoystickMapper::new(axis_flat);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    dispatcher.link().start()?;
    println!("{}", HELP);

    while let Some(line) = lines.next_line().await? {
        let mut words = line.split_whitespace();
        let Some(word) = words.next() else {
            continue;
        };

        match word {
            "quit" | "exit" => break,
            "help" => println!("{}", HELP),
            "read" => dispatcher.link().read_sensor()?,
            "start" => dispatcher.link().start()?,
            "reconnect" => dispatcher.link().reconnect()?,
            "disconnect" => dispatcher.link().disconnect()?,
            "close" => dispatcher.link().close()?,
            "joy" => {
                let axes: Vec<f32> = words.filter_map(|w| w.parse().ok()).collect();
                let &[x, y] = axes.as_slice() else {
                    warn!("joy expects two numeric axes");
                    continue;
                };
                if let Some(command) = joystick.update(x, y) {
                    report(command, dispatcher.dispatch(command));
                }
            }
            other => match other.parse::<Command>() {
                Ok(command) => report(command, dispatcher.dispatch(command)),
                Err(e) => warn!("{}", e),
            },
        }
    }

    dispatcher.link().close()?;
    Ok(())
}

fn report(command: Command, outcome: DispatchOutcome) {
    if outcome == DispatchOutcome::Dropped {
        println!("-- {:?} dropped, not connected", command);
    }
}

#[cfg(windows)]
async fn run_radio(settings: &rc_vehicle_client::domain::settings::Settings) -> anyhow::Result<()> {
    use rc_vehicle_client::infrastructure::bluetooth::winrt::WinRtRadio;
    use rc_vehicle_client::infrastructure::bluetooth::{RadioSessionHandle, SessionConfig};

    let config = SessionConfig::from_settings(settings)?;
    let handle = RadioSessionHandle::spawn(WinRtRadio::new(), config);
    let printer = tokio::spawn(print_statuses(handle.subscribe()));

    let result = drive(handle, settings.axis_flat).await;
    printer.abort();
    result
}

#[cfg(not(windows))]
async fn run_radio(_settings: &rc_vehicle_client::domain::settings::Settings) -> anyhow::Result<()> {
    anyhow::bail!("radio transport unavailable on this platform, set \"transport\": \"socket\"")
}

async fn run_socket(settings: &rc_vehicle_client::domain::settings::Settings) -> anyhow::Result<()> {
    let handle = SocketSessionHandle::spawn(SocketConfig::from_settings(settings));
    let printer = tokio::spawn(print_statuses(handle.subscribe()));

    let result = drive(handle, settings.axis_flat).await;
    printer.abort();
    result
}

fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new().context("Failed to load settings")?;

    let _logging_guard = rc_vehicle_client::infrastructure::logging::init_logger(
        &settings_service.get().log_settings,
    )
    .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
    .ok();

    info!(
        "Starting RC vehicle client, settings at {}",
        settings_service.path().display()
    );
    let settings = settings_service.get().clone();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    let result = rt.block_on(async {
        match settings.transport {
            TransportKind::Ble => run_radio(&settings).await,
            TransportKind::Socket => run_socket(&settings).await,
        }
    });

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}
