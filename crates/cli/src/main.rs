mod cli;
mod constants;
mod format;
mod shutdown;
mod ui;

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tokio::sync::mpsc;

use lpbridge_bridge::{
    CallGateway, CallOutcome, CallOutput, Dispatch, LogEvent, LogObserver, MemoryMonitor,
    NodeCallback, ObserverResult, SearchNode, SolverSession,
};
use lpbridge_core::{BridgeConfig, load_config, load_config_from, save_config, save_config_to};
use lpbridge_engine::MsgLevel;

use crate::cli::{Cli, SolveMethod};
use crate::constants::EXIT_INTERRUPTED;
use crate::format::{format_duration, format_failure, format_memory, format_output};
use crate::shutdown::{ShutdownController, ShutdownEvent, spawn_ctrl_c_handler};
use crate::ui::Ui;

fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn effective_config(cli: &Cli) -> BridgeConfig {
    let loaded = match &cli.config {
        Some(path) => load_config_from(path),
        None => load_config(),
    };
    let mut cfg = match loaded {
        Ok(Some(cfg)) => cfg,
        Ok(None) => BridgeConfig::default(),
        Err(err) => {
            eprintln!("warning: failed to read config: {err:#}");
            BridgeConfig::default()
        }
    };

    if let Some(level) = cli.msg_level {
        let level: MsgLevel = level.into();
        cfg.simplex.msg_level = level;
        cfg.interior.msg_level = level;
        cfg.mip.msg_level = level;
    }
    if cli.presolve {
        cfg.simplex.presolve = true;
        cfg.mip.presolve = true;
    }
    if let Some(limit) = cli.node_limit {
        cfg.mip.node_limit = Some(limit);
    }
    if cli.echo {
        cfg.echo_engine_output = true;
    }
    cfg
}

fn node_callback(ui: Ui) -> NodeCallback {
    Box::new(move |node: &mut SearchNode<'_>| {
        if let Some(info) = node.info() {
            ui.set_node(info);
        }
    })
}

/// Await a call while reacting to Ctrl-C.
async fn settle(
    dispatch: Dispatch,
    ui: &Ui,
    shutdown_rx: &mut mpsc::UnboundedReceiver<ShutdownEvent>,
) -> CallOutcome {
    let mut call = dispatch.into_future();
    let mut signals_open = true;
    loop {
        tokio::select! {
            outcome = &mut call => return outcome,
            ev = shutdown_rx.recv(), if signals_open => match ev {
                Some(ShutdownEvent::Graceful) => {
                    ui.println("Stop requested, finishing the current call (press CTRL+C again to exit immediately).");
                }
                Some(ShutdownEvent::Immediate) => {
                    ui.println("Stop requested again, exiting immediately.");
                    std::process::exit(EXIT_INTERRUPTED);
                }
                None => signals_open = false,
            },
        }
    }
}

fn accept(ui: &Ui, outcome: CallOutcome) -> anyhow::Result<CallOutput> {
    for failure in &outcome.observer_failures {
        ui.println(&format_failure(failure));
    }
    tracing::debug!(
        call_id = outcome.call_id,
        elapsed = %format_duration(outcome.elapsed),
        "call finished"
    );
    let output = outcome.into_result()?;
    Ok(output)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = effective_config(&cli);
    if cli.save_config {
        let saved = match &cli.config {
            Some(path) => save_config_to(path, &cfg),
            None => save_config(&cfg),
        };
        if let Err(err) = saved {
            eprintln!("warning: failed to write config: {err:#}");
        }
    }

    let mode = cli.exec_mode();
    let ui = if !cli.no_progress && std::io::stderr().is_terminal() {
        Ui::with_spinner()
    } else {
        Ui::plain()
    };
    ui.println(&format!(
        "lpbridge {} method={:?} mode={:?}",
        env!("CARGO_PKG_VERSION"),
        cli.method,
        mode
    ));

    let shutdown = Arc::new(ShutdownController::new());
    let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel::<ShutdownEvent>();
    spawn_ctrl_c_handler(shutdown.clone(), shutdown_tx);

    let gateway = CallGateway::new(&cfg)?;
    let session = SolverSession::with_gateway(Arc::clone(&gateway));
    let printer = ui.clone();
    let observer: LogObserver = Arc::new(move |event: &LogEvent| -> ObserverResult {
        printer.println(&event.text);
        Ok(())
    });
    session.set_log_observer(Some(observer));

    let started = Instant::now();
    ui.set_stage("reading model");
    let read = settle(session.read_model(cli.model.clone(), mode), &ui, &mut shutdown_rx).await;
    let model = accept(&ui, read)?;
    tracing::info!(model = %format_output(&model), "model loaded");

    let solved = match cli.method {
        SolveMethod::Simplex => {
            ui.set_stage("simplex");
            settle(session.simplex(mode), &ui, &mut shutdown_rx).await
        }
        SolveMethod::Exact => {
            ui.set_stage("exact simplex");
            settle(session.exact(mode), &ui, &mut shutdown_rx).await
        }
        SolveMethod::Interior => {
            ui.set_stage("interior point");
            settle(session.interior(mode), &ui, &mut shutdown_rx).await
        }
        SolveMethod::Mip => {
            if !cfg.mip.presolve {
                ui.set_stage("solving relaxation");
                let relaxation = settle(session.simplex(mode), &ui, &mut shutdown_rx).await;
                accept(&ui, relaxation)?;
            }
            ui.set_stage("branch and bound");
            let search = session
                .start_search(Some(node_callback(ui.clone())))
                .with_control(shutdown.search_control());
            settle(search.run(mode), &ui, &mut shutdown_rx).await
        }
    };
    let output = accept(&ui, solved)?;
    ui.finish(started.elapsed());

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", format_output(&output));
    }
    println!("{}", format_memory("session", &session.memory()));
    println!("{}", format_memory("engine", &MemoryMonitor::global().snapshot()));
    println!("elapsed: {}", format_duration(started.elapsed()));

    session.destroy()?;
    tokio::task::spawn_blocking(move || gateway.shutdown()).await?;
    Ok(())
}
