//! Operator console for the running monitor.
//!
//! Supported slash-commands:
//!   /help                     – show this list
//!   /status                   – lifecycle and the active warning
//!   /foreground | /background – simulate a host lifecycle transition
//!   /center <lat> <lon> [z]   – recenter the map surface
//!   /quit | /exit             – stop the monitor

use std::io::{self, Write};
use std::sync::Arc;

use aquamon_runtime::MonitorPipeline;
use aquamon_types::Lifecycle;
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

const DEFAULT_ZOOM: f64 = 14.0;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Status,
    Lifecycle(Lifecycle),
    Center { latitude: f64, longitude: f64, zoom: f64 },
    Quit,
}

/// Parse one console line. Empty lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };
    let cmd = match head {
        "/help" => Command::Help,
        "/status" => Command::Status,
        "/foreground" | "/fg" => Command::Lifecycle(Lifecycle::Foreground),
        "/background" | "/bg" => Command::Lifecycle(Lifecycle::Background),
        "/quit" | "/exit" => Command::Quit,
        "/center" => {
            let latitude = number(words.next(), "latitude")?;
            let longitude = number(words.next(), "longitude")?;
            let zoom = match words.next() {
                Some(z) => number(Some(z), "zoom")?,
                None => DEFAULT_ZOOM,
            };
            Command::Center {
                latitude,
                longitude,
                zoom,
            }
        }
        other => return Err(format!("unknown command '{other}'")),
    };
    Ok(Some(cmd))
}

fn number(word: Option<&str>, name: &str) -> Result<f64, String> {
    word.ok_or_else(|| format!("missing {name}"))?
        .parse::<f64>()
        .map_err(|_| format!("{name} must be a number"))
}

/// Read commands from stdin until `/quit`, EOF, or shutdown.
pub async fn run(
    pipeline: Arc<MonitorPipeline>,
    lifecycle: watch::Sender<Lifecycle>,
    shutdown: Arc<watch::Sender<bool>>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stop = shutdown.subscribe();

    loop {
        print!("{} ", "aquamon>".bold().cyan());
        io::stdout().flush().ok();

        let line = tokio::select! {
            read = lines.next_line() => match read {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    eprintln!("{}: {}", "Read error".red(), e);
                    break;
                }
            },
            _ = stop.wait_for(|stopped| *stopped) => break,
        };

        match parse_command(&line) {
            Ok(None) => {}
            Ok(Some(Command::Help)) => cmd_help(),
            Ok(Some(Command::Status)) => cmd_status(&pipeline),
            Ok(Some(Command::Lifecycle(next))) => {
                lifecycle.send_replace(next);
                println!("  Host lifecycle → {}", format!("{next:?}").bold());
            }
            Ok(Some(Command::Center {
                latitude,
                longitude,
                zoom,
            })) => match pipeline.map().center_on(latitude, longitude, zoom) {
                Ok(outcome) => println!("  Center view {:?}", outcome),
                Err(e) => println!("{}: {}", "Rejected".red(), e),
            },
            Ok(Some(Command::Quit)) => {
                println!("{}", "Goodbye.".green());
                shutdown.send_replace(true);
                break;
            }
            Err(msg) => println!(
                "{} {}. Type {} for available commands.",
                "Error:".red(),
                msg.yellow(),
                "/help".bold()
            ),
        }
    }
}

fn cmd_help() {
    println!();
    println!("  {}", "Commands".bold());
    println!("    {}                      show this list", "/help".cyan());
    println!("    {}                    lifecycle and active warning", "/status".cyan());
    println!("    {}  simulate a lifecycle transition", "/foreground | /background".cyan());
    println!("    {}    recenter the map surface", "/center <lat> <lon> [z]".cyan());
    println!("    {}              stop the monitor", "/quit | /exit".cyan());
    println!();
}

fn cmd_status(pipeline: &MonitorPipeline) {
    let alerts = pipeline.alerts();
    println!("  Lifecycle: {}", format!("{:?}", alerts.lifecycle()).bold());
    match alerts.active_warning() {
        Some(w) => println!(
            "  Active warning: {} (value {:.2}, threshold {:.2})",
            w.family.title().red().bold(),
            w.value,
            w.threshold
        ),
        None => println!("  Active warning: {}", "none".green()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_lines_are_ignored() {
        assert_eq!(parse_command("   \n"), Ok(None));
    }

    #[test]
    fn lifecycle_commands_and_aliases() {
        assert_eq!(
            parse_command("/bg"),
            Ok(Some(Command::Lifecycle(Lifecycle::Background)))
        );
        assert_eq!(
            parse_command("/foreground\n"),
            Ok(Some(Command::Lifecycle(Lifecycle::Foreground)))
        );
        assert_eq!(parse_command("/exit"), Ok(Some(Command::Quit)));
    }

    #[test]
    fn center_uses_default_zoom() {
        assert_eq!(
            parse_command("/center 10.77 106.7"),
            Ok(Some(Command::Center {
                latitude: 10.77,
                longitude: 106.7,
                zoom: DEFAULT_ZOOM
            }))
        );
        assert_eq!(
            parse_command("/center 1 2 18"),
            Ok(Some(Command::Center {
                latitude: 1.0,
                longitude: 2.0,
                zoom: 18.0
            }))
        );
    }

    #[test]
    fn center_argument_errors() {
        assert_eq!(parse_command("/center"), Err("missing latitude".into()));
        assert_eq!(
            parse_command("/center 1 east"),
            Err("longitude must be a number".into())
        );
        assert_eq!(parse_command("/center 1 2 far"), Err("zoom must be a number".into()));
    }

    #[test]
    fn unknown_command_is_reported() {
        assert_eq!(parse_command("/models"), Err("unknown command '/models'".into()));
    }
}
