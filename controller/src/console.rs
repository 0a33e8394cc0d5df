use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::watch,
};
use tracing::{debug, warn};

use climate_common::{settings::SETTINGS_VERSION, ControllerSnapshot};

const HELP: &str = "\
help           show this list
show versions  controller and settings document versions
show status    current sensor, relay and device state
exit           stop the controller";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleAction {
    Print(String),
    Exit,
    Nothing,
}

pub fn interpret(line: &str, snapshot: &ControllerSnapshot) -> ConsoleAction {
    let words: Vec<&str> = line.split_whitespace().collect();
    match words.as_slice() {
        [] => ConsoleAction::Nothing,
        ["help"] => ConsoleAction::Print(HELP.to_string()),
        ["show", "versions"] => ConsoleAction::Print(format!(
            "climate-controller {}\nsettings document {SETTINGS_VERSION}",
            env!("CARGO_PKG_VERSION")
        )),
        ["show", "status"] => ConsoleAction::Print(render_status(snapshot)),
        ["exit"] => ConsoleAction::Exit,
        _ => ConsoleAction::Print("Command Not Found".to_string()),
    }
}

fn render_status(snapshot: &ControllerSnapshot) -> String {
    let mut lines = vec![format!(
        "user {} | heartbeat {}ms | {}",
        snapshot.user_id, snapshot.heartbeat_ms, snapshot.sync_phase
    )];
    for sensor in &snapshot.sensors {
        lines.push(format!(
            "{:<11} value {:.2} threshold {:.2} {}",
            sensor.kind.as_str(),
            sensor.value,
            sensor.threshold,
            sensor.orientation.as_str()
        ));
    }
    for relay in &snapshot.relays {
        lines.push(format!(
            "{:<11} {} {}",
            relay.relay,
            relay.status.as_str(),
            relay.mode.as_str()
        ));
    }
    for device in &snapshot.devices {
        lines.push(format!(
            "{:<11} {} {}",
            device.role.as_str(),
            device.device_id.as_deref().unwrap_or("-"),
            device.liveness.as_str()
        ));
    }
    lines.join("\n")
}

/// Reads commands from stdin and returns on `exit`. A closed or unreadable
/// stdin leaves the controller running without a console.
pub async fn run(snapshots: watch::Receiver<ControllerSnapshot>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("console input closed");
                return std::future::pending().await;
            }
            Err(err) => {
                warn!("console input failed, console disabled: {err}");
                return std::future::pending().await;
            }
        };
        match interpret(&line, &snapshots.borrow()) {
            ConsoleAction::Print(text) => println!("{text}"),
            ConsoleAction::Exit => return,
            ConsoleAction::Nothing => {}
        }
    }
}
