use anyhow::{anyhow, Context, Result};
use clap::ArgMatches;
use serde::Serialize;
use std::sync::Arc;

use super::{
    config::AppConfig,
    console::{self, ConsoleView},
};
use crate::{
    core::{clock::format_hms, Bus, CoreToUi, EventSink, RunSummary, Session},
    protocol::{
        link::{Link, LinkId, MemoryLink, SerialConfig, SerialLink},
        ports::available_ports,
    },
};

/// Handle commands that print something and exit. Returns `true` when one ran.
pub fn run_one_shot_actions(matches: &ArgMatches) -> bool {
    if matches.get_flag("list-ports") {
        let ports = available_ports();

        if matches.get_flag("json") {
            match serde_json::to_string_pretty(&ports) {
                Ok(s) => println!("{s}"),
                Err(err) => {
                    log::warn!("Failed to serialize port list: {err}");
                    for p in &ports {
                        println!("{}", p.name);
                    }
                }
            }
        } else {
            for p in &ports {
                println!("{}\t{}", p.name, p.kind);
            }
        }
        return true;
    }

    false
}

/// Configuration from `--config`, with `--port-a`/`--port-b` applied on top.
pub fn load_config(matches: &ArgMatches) -> Result<AppConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };
    if let Some(name) = matches.get_one::<String>("port-a") {
        config.ports.a = name.clone();
    }
    if let Some(name) = matches.get_one::<String>("port-b") {
        config.ports.b = name.clone();
    }
    Ok(config)
}

/// The two links under test with the names shown for them.
pub struct LinkPair {
    pub a: Arc<dyn Link>,
    pub b: Arc<dyn Link>,
    pub names: (String, String),
}

/// Either two serial ports or an in-memory echo pair.
pub fn build_links(config: &AppConfig, simulate: bool) -> LinkPair {
    if simulate {
        log::info!("Using simulated in-memory link pair");
        let (a, b) = MemoryLink::pair();
        return LinkPair {
            a,
            b,
            names: ("memory".to_string(), "memory".to_string()),
        };
    }
    let a = SerialLink::new(LinkId::A, config.ports.a.clone(), SerialConfig::default());
    let b = SerialLink::new(LinkId::B, config.ports.b.clone(), SerialConfig::default());
    let names = (a.port_name().to_string(), b.port_name().to_string());
    LinkPair {
        a: Arc::new(a),
        b: Arc::new(b),
        names,
    }
}

/// Interactive console mode.
pub async fn start_console(matches: &ArgMatches) -> Result<()> {
    let config = load_config(matches)?;
    let LinkPair { a, b, names } = build_links(&config, matches.get_flag("simulate"));

    let (sink, core_rx) = EventSink::channel();
    let (ui_tx, ui_rx) = flume::unbounded();
    let session = Arc::new(Session::new(a, b, sink, config.plan.to_plan()));

    console::run(
        session,
        Bus::new(core_rx, ui_tx),
        ui_rx,
        ConsoleView::new(names.0, names.1),
    )
    .await
}

#[derive(Debug, Serialize)]
struct PhaseReport {
    passed: u32,
    total: u32,
    timed_out: u32,
    rate: f64,
}

/// `--run --json` output
#[derive(Debug, Serialize)]
struct RunReport {
    outcome: String,
    phase1: PhaseReport,
    phase2: PhaseReport,
    overall_passed: u32,
    overall_total: u32,
    overall_rate: f64,
    elapsed: String,
    all_passed: bool,
}

impl From<&RunSummary> for RunReport {
    fn from(summary: &RunSummary) -> Self {
        let phase = |p: &crate::core::PhaseResult| PhaseReport {
            passed: p.passed,
            total: p.total,
            timed_out: p.timed_out,
            rate: p.success_rate(),
        };
        Self {
            outcome: summary.outcome.to_string(),
            phase1: phase(&summary.phase1),
            phase2: phase(&summary.phase2),
            overall_passed: summary.overall_passed(),
            overall_total: summary.overall_total(),
            overall_rate: summary.overall_rate(),
            elapsed: format_hms(summary.elapsed),
            all_passed: summary.all_passed(),
        }
    }
}

/// Callback that stops the running test.
pub type StopCallback = Box<dyn Fn() + Send + 'static>;

/// Run one test without the console, stopping it on Ctrl-C.
///
/// Returns `true` when every step passed.
pub async fn run_headless(matches: &ArgMatches) -> Result<bool> {
    run_headless_with(matches, |stop| {
        ctrlc::set_handler(stop).context("Failed to install Ctrl-C handler")
    })
    .await
}

/// Same as [`run_headless`], with the stop callback handed to `install_stop`
/// instead of the process signal handler.
pub async fn run_headless_with<F>(matches: &ArgMatches, install_stop: F) -> Result<bool>
where
    F: FnOnce(StopCallback) -> Result<()>,
{
    let config = load_config(matches)?;
    let want_json = matches.get_flag("json");
    let LinkPair { a, b, names } = build_links(&config, matches.get_flag("simulate"));
    log::info!("Testing {} <-> {}", names.0, names.1);

    let (sink, core_rx) = EventSink::channel();
    let session = Arc::new(Session::new(a, b, sink, config.plan.to_plan()));
    let plan = session.orchestrator().plan();
    log::debug!(
        "Response timeout {:?}, step delay {:?}",
        plan.response_timeout,
        plan.step_delay
    );

    let stopper = Arc::clone(&session);
    install_stop(Box::new(move || {
        stopper.stop_test();
    }))?;

    // Log lines go to stderr in JSON mode so stdout stays parseable
    let printer = tokio::spawn(async move {
        while let Ok(event) = core_rx.recv_async().await {
            match event {
                CoreToUi::Log(entry) if want_json => eprintln!("{entry}"),
                CoreToUi::Log(entry) => println!("{entry}"),
                CoreToUi::Quit => break,
                _ => {}
            }
        }
    });

    let summary = match session.start_test() {
        Some(handle) => Some(handle.wait().await.context("Test task failed")?),
        None => None,
    };
    session.shutdown();
    printer
        .await
        .map_err(|err| anyhow!("Event printer failed: {err}"))?;

    let Some(summary) = summary else {
        return Ok(false);
    };
    if want_json {
        println!("{}", serde_json::to_string_pretty(&RunReport::from(&summary))?);
    } else {
        println!("{summary}");
    }
    Ok(summary.all_passed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cli::command,
        core::{PhaseResult, RunOutcome},
    };
    use std::time::Duration;

    #[test]
    fn cli_port_names_override_config() {
        let matches = command()
            .try_get_matches_from(["twinport", "--port-b", "/dev/ttyACM0"])
            .unwrap();
        let config = load_config(&matches).unwrap();
        assert_eq!(config.ports.a, "COM1");
        assert_eq!(config.ports.b, "/dev/ttyACM0");
    }

    #[test]
    fn missing_config_file_is_reported() {
        let matches = command()
            .try_get_matches_from(["twinport", "--config", "/nonexistent/twinport.toml"])
            .unwrap();
        let err = load_config(&matches).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/twinport.toml"));
    }

    #[test]
    fn serial_links_are_named_after_their_ports() {
        let mut config = AppConfig::default();
        config.ports.b = "/dev/ttyUSB1".to_string();
        let links = build_links(&config, false);
        assert_eq!(links.names, ("COM1".to_string(), "/dev/ttyUSB1".to_string()));
        assert_eq!(links.a.id(), LinkId::A);
        assert!(!links.b.is_open());
    }

    #[test]
    fn simulated_links_are_a_connected_pair() {
        let LinkPair { a, b, names } = build_links(&AppConfig::default(), true);
        assert_eq!(names.0, "memory");
        assert_eq!(a.id(), LinkId::A);
        assert_eq!(b.id(), LinkId::B);
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let slot = Arc::clone(&seen);
        let reader = Arc::clone(&b);
        b.notifier().subscribe(Arc::new(move || {
            *slot.lock() = reader.read_line().ok();
        }));
        a.open().unwrap();
        b.open().unwrap();
        a.write_line("x").unwrap();
        assert_eq!(seen.lock().as_deref(), Some("x"));
    }

    #[test]
    fn report_mirrors_summary() {
        let summary = RunSummary {
            phase1: PhaseResult {
                passed: 25,
                attempted: 25,
                ..PhaseResult::default()
            },
            phase2: PhaseResult {
                passed: 25,
                attempted: 25,
                ..PhaseResult::default()
            },
            elapsed: Duration::from_secs(5),
            outcome: RunOutcome::Completed,
        };
        let report = RunReport::from(&summary);
        assert!(report.all_passed);
        assert_eq!(report.overall_passed, 50);
        assert_eq!(report.elapsed, "00:00:05");
        assert_eq!(report.outcome, "Completed");
    }

    fn headless_args(extra: &[&str]) -> ArgMatches {
        let mut args = vec!["twinport", "--simulate", "--run"];
        args.extend_from_slice(extra);
        command().try_get_matches_from(args).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn headless_simulated_run_passes() {
        let matches = headless_args(&["--json"]);
        let mut installed = false;
        let passed = run_headless_with(&matches, |_stop| {
            installed = true;
            Ok(())
        })
        .await
        .unwrap();
        assert!(passed);
        assert!(installed);
    }

    #[tokio::test(start_paused = true)]
    async fn headless_stop_callback_ends_the_run_as_failed() {
        let matches = headless_args(&[]);
        let passed = run_headless_with(&matches, |stop| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(1250)).await;
                stop();
            });
            Ok(())
        })
        .await
        .unwrap();
        assert!(!passed);
    }

    #[tokio::test(start_paused = true)]
    async fn headless_reports_handler_install_failure() {
        let matches = headless_args(&[]);
        let err = run_headless_with(&matches, |_stop| Err(anyhow!("handler already set")))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "handler already set");
    }
}
