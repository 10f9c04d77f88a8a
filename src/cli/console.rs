//! Interactive line console
//!
//! Reads commands from stdin on a plain thread and renders core events as
//! they arrive. The console only keeps display state; every action goes
//! through the session's command channel.

use anyhow::{anyhow, Result};
use flume::Receiver;
use std::{
    io::{self, BufRead},
    sync::Arc,
    time::Duration,
};

use crate::{
    core::{
        clock::format_hms,
        logs::LogBuffer,
        Bus, CoreToUi, RunSnapshot, RunSummary, Session, TestPlan, UiToCore,
    },
    protocol::link::LinkId,
};

pub const HELP: &str = "\
Commands:
  open a|b            open Port1 or Port2
  close a|b           close Port1 or Port2
  send a|b <text>     send one line
  test                run the loopback test
  pause               pause or resume the running test
  stop                stop the running test
  status              show ports and test state
  log [n]             show the last n log lines (default 20)
  help                show this help
  quit                close ports and exit";

const DEFAULT_LOG_TAIL: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Core(UiToCore),
    Status,
    Log(usize),
    Help,
}

/// Parse one console line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim_start()),
        None => (line, ""),
    };

    let link = |arg: &str| {
        LinkId::parse(arg).ok_or_else(|| format!("Unknown port '{arg}', expected a or b"))
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "open" => ConsoleCommand::Core(UiToCore::Open(link(rest)?)),
        "close" => ConsoleCommand::Core(UiToCore::Close(link(rest)?)),
        "send" => {
            let (target, text) = rest.split_once(' ').unwrap_or((rest, ""));
            ConsoleCommand::Core(UiToCore::Send(link(target)?, text.to_string()))
        }
        "test" | "start" => ConsoleCommand::Core(UiToCore::StartTest),
        "pause" | "resume" => ConsoleCommand::Core(UiToCore::TogglePause),
        "stop" => ConsoleCommand::Core(UiToCore::StopTest),
        "quit" | "exit" => ConsoleCommand::Core(UiToCore::Quit),
        "status" => ConsoleCommand::Status,
        "log" => {
            let count = if rest.is_empty() {
                DEFAULT_LOG_TAIL
            } else {
                rest.parse()
                    .map_err(|_| format!("Invalid line count '{rest}'"))?
            };
            ConsoleCommand::Log(count)
        }
        "help" | "?" => ConsoleCommand::Help,
        other => return Err(format!("Unknown command '{other}', type 'help'")),
    };
    Ok(Some(command))
}

fn slot(id: LinkId) -> usize {
    match id {
        LinkId::A => 0,
        LinkId::B => 1,
    }
}

/// Display state rebuilt from core events.
pub struct ConsoleView {
    port_names: [String; 2],
    open: [bool; 2],
    received: [Option<String>; 2],
    log: LogBuffer,
    test_time: Duration,
    paused: bool,
    summary: Option<RunSummary>,
}

impl ConsoleView {
    pub fn new(port_a: impl Into<String>, port_b: impl Into<String>) -> Self {
        Self {
            port_names: [port_a.into(), port_b.into()],
            open: [false; 2],
            received: [None, None],
            log: LogBuffer::default(),
            test_time: Duration::ZERO,
            paused: false,
            summary: None,
        }
    }

    /// Apply one event, returning the lines to print.
    pub fn apply(&mut self, event: CoreToUi) -> Vec<String> {
        match event {
            CoreToUi::Log(entry) => {
                let line = entry.to_string();
                self.log.push(entry);
                vec![line]
            }
            CoreToUi::Received { link, line } => {
                self.received[slot(link)] = Some(line);
                Vec::new()
            }
            CoreToUi::ClearReceived(link) => {
                self.received[slot(link)] = None;
                Vec::new()
            }
            CoreToUi::LinkStatus { link, open } => {
                self.open[slot(link)] = open;
                Vec::new()
            }
            CoreToUi::TestTime(elapsed) => {
                self.test_time = elapsed;
                Vec::new()
            }
            CoreToUi::Paused(paused) => {
                self.paused = paused;
                Vec::new()
            }
            CoreToUi::Summary(summary) => {
                let lines = summary.to_string().lines().map(str::to_string).collect();
                self.summary = Some(summary);
                lines
            }
            CoreToUi::Quit => Vec::new(),
        }
    }

    pub fn status_lines(&self, run: &RunSnapshot, plan: &TestPlan) -> Vec<String> {
        let mut lines = Vec::new();
        for id in [LinkId::A, LinkId::B] {
            let index = slot(id);
            lines.push(format!(
                "{id} ({}): {} | Last received: {}",
                self.port_names[index],
                if self.open[index] { "Open" } else { "Closed" },
                self.received[index].as_deref().unwrap_or("-"),
            ));
        }
        let state = if run.cancel_requested && run.phase.is_active() {
            " (stopping)"
        } else if self.paused {
            " (paused)"
        } else {
            ""
        };
        lines.push(format!(
            "Test: {}{state} | Test Time: {}",
            run.phase,
            format_hms(self.test_time),
        ));
        lines.push(format!(
            "Timing: response timeout {} ms, step delay {} ms",
            plan.response_timeout.as_millis(),
            plan.step_delay.as_millis(),
        ));
        if let Some(summary) = &self.summary {
            lines.push(format!(
                "Last result: {}/{} ({:.2}%)",
                summary.overall_passed(),
                summary.overall_total(),
                summary.overall_rate()
            ));
        }
        lines
    }

    pub fn log_tail(&self, count: usize) -> Vec<String> {
        self.log.tail(count).iter().map(ToString::to_string).collect()
    }
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = flume::unbounded();
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    log::warn!("Failed to read stdin: {err}");
                    break;
                }
            }
        }
    });
    rx
}

/// Run the console until the user quits or stdin closes.
pub async fn run(
    session: Arc<Session>,
    bus: Bus,
    commands: Receiver<UiToCore>,
    mut view: ConsoleView,
) -> Result<()> {
    let core = tokio::spawn(Arc::clone(&session).run(commands));
    let input = spawn_stdin_reader();
    let mut input_open = true;

    println!("{HELP}");
    loop {
        tokio::select! {
            event = bus.core_rx.recv_async() => match event {
                Ok(CoreToUi::Quit) | Err(_) => break,
                Ok(event) => {
                    for line in view.apply(event) {
                        println!("{line}");
                    }
                }
            },
            line = input.recv_async(), if input_open => match line {
                Ok(line) => match parse_command(&line) {
                    Ok(Some(ConsoleCommand::Core(command))) => bus
                        .ui_tx
                        .send(command)
                        .map_err(|err| anyhow!("Failed to send command to core: {err}"))?,
                    Ok(Some(ConsoleCommand::Status)) => {
                        let plan = session.orchestrator().plan();
                        for line in view.status_lines(&session.snapshot(), plan) {
                            println!("{line}");
                        }
                    }
                    Ok(Some(ConsoleCommand::Log(count))) => {
                        for line in view.log_tail(count) {
                            println!("{line}");
                        }
                    }
                    Ok(Some(ConsoleCommand::Help)) => println!("{HELP}"),
                    Ok(None) => {}
                    Err(message) => println!("{message}"),
                },
                Err(_) => {
                    input_open = false;
                    bus.ui_tx
                        .send(UiToCore::Quit)
                        .map_err(|err| anyhow!("Failed to send Quit to core: {err}"))?;
                }
            },
        }
    }

    core.await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{logs::LogEntry, PhaseResult, RunOutcome, RunPhase};

    #[test]
    fn parses_port_commands() {
        assert_eq!(
            parse_command("open a"),
            Ok(Some(ConsoleCommand::Core(UiToCore::Open(LinkId::A))))
        );
        assert_eq!(
            parse_command("  CLOSE port2 "),
            Ok(Some(ConsoleCommand::Core(UiToCore::Close(LinkId::B))))
        );
        assert_eq!(
            parse_command("send 1 hello  world"),
            Ok(Some(ConsoleCommand::Core(UiToCore::Send(
                LinkId::A,
                "hello  world".to_string()
            ))))
        );
        assert!(parse_command("open c").is_err());
    }

    #[test]
    fn parses_test_and_local_commands() {
        assert_eq!(parse_command(""), Ok(None));
        assert_eq!(
            parse_command("test"),
            Ok(Some(ConsoleCommand::Core(UiToCore::StartTest)))
        );
        assert_eq!(
            parse_command("pause"),
            Ok(Some(ConsoleCommand::Core(UiToCore::TogglePause)))
        );
        assert_eq!(parse_command("log"), Ok(Some(ConsoleCommand::Log(20))));
        assert_eq!(parse_command("log 5"), Ok(Some(ConsoleCommand::Log(5))));
        assert!(parse_command("log many").is_err());
        assert!(parse_command("frobnicate").is_err());
    }

    #[test]
    fn view_tracks_display_state() {
        let mut view = ConsoleView::new("COM1", "COM2");
        assert!(view
            .apply(CoreToUi::LinkStatus {
                link: LinkId::B,
                open: true
            })
            .is_empty());
        view.apply(CoreToUi::Received {
            link: LinkId::B,
            line: "ping".to_string(),
        });
        view.apply(CoreToUi::TestTime(Duration::from_secs(65)));
        let printed = view.apply(CoreToUi::Log(LogEntry::info("Port2 received: ping")));
        assert_eq!(printed.len(), 1);
        assert!(printed[0].ends_with(" - Port2 received: ping"));

        let snapshot = RunSnapshot {
            phase: RunPhase::Idle,
            paused: false,
            elapsed: Duration::ZERO,
            cancel_requested: false,
            phase1: PhaseResult::default(),
            phase2: PhaseResult::default(),
        };
        let plan = TestPlan::default();
        let status = view.status_lines(&snapshot, &plan);
        assert_eq!(status[0], "Port1 (COM1): Closed | Last received: -");
        assert_eq!(status[1], "Port2 (COM2): Open | Last received: ping");
        assert_eq!(status[2], "Test: Idle | Test Time: 00:01:05");
        assert_eq!(status[3], "Timing: response timeout 1000 ms, step delay 100 ms");

        view.apply(CoreToUi::ClearReceived(LinkId::B));
        assert!(view.status_lines(&snapshot, &plan)[1].ends_with("Last received: -"));
        assert_eq!(view.log_tail(10).len(), 1);
    }

    #[test]
    fn status_shows_pause_and_pending_stop() {
        let mut view = ConsoleView::new("COM1", "COM2");
        let plan = TestPlan {
            response_timeout: Duration::from_millis(250),
            ..TestPlan::default()
        };
        let mut snapshot = RunSnapshot {
            phase: RunPhase::Phase2,
            paused: true,
            elapsed: Duration::from_secs(3),
            cancel_requested: false,
            phase1: PhaseResult::default(),
            phase2: PhaseResult::default(),
        };
        view.apply(CoreToUi::Paused(true));
        let status = view.status_lines(&snapshot, &plan);
        assert_eq!(status[2], "Test: Phase2 (paused) | Test Time: 00:00:00");
        assert_eq!(status[3], "Timing: response timeout 250 ms, step delay 100 ms");

        snapshot.cancel_requested = true;
        assert!(view.status_lines(&snapshot, &plan)[2].starts_with("Test: Phase2 (stopping)"));

        snapshot.phase = RunPhase::Stopped;
        view.apply(CoreToUi::Paused(false));
        assert!(view.status_lines(&snapshot, &plan)[2].starts_with("Test: Stopped |"));
    }

    #[test]
    fn summary_is_printed_line_by_line() {
        let mut view = ConsoleView::new("a", "b");
        let printed = view.apply(CoreToUi::Summary(RunSummary {
            phase1: PhaseResult::default(),
            phase2: PhaseResult::default(),
            elapsed: Duration::ZERO,
            outcome: RunOutcome::Stopped,
        }));
        assert_eq!(printed.len(), 4);
        assert_eq!(printed[2], "Overall: 0/50 (0.00%)");
    }
}
