//! `grape-worker` — a Cocaine-style application worker process.
//!
//! Connects to the orchestrating engine over a UNIX-domain socket, serves
//! one named application, and exits when the engine terminates it or
//! disowns it (see `grape_worker::worker` for the event loop).

use anyhow::{Context, Result};
use clap::Parser;
use grape_worker::logging::RemoteLogger;
use grape_worker::{function_factory, Application, ExitReason, Worker};

/// Command-line arguments (spec.md §6): `--app` and `--uuid` are required.
///
/// Unknown options are ignored rather than rejected, since the engine that
/// spawns this process may pass additional flags a future protocol version
/// introduces; `extra` soaks up anything clap doesn't recognize as `--app`
/// or `--uuid` instead of clap's default of erroring out on it.
#[derive(Parser, Debug)]
#[command(name = "grape-worker")]
struct Args {
    /// Application name this worker serves.
    #[arg(long)]
    app: String,

    /// Worker identity, assigned by the engine that spawned this process.
    #[arg(long)]
    uuid: String,

    /// Unrecognized options and positional arguments, discarded.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    extra: Vec<String>,
}

/// Build the sample application this binary serves.
///
/// A real deployment would load application bindings from a plugin or
/// configuration; this binary ships one illustrative event so the worker
/// is runnable standalone, mirroring the original's `App1`/`on_event1`
/// sample from `main.cpp`.
fn sample_application(app_name: &str) -> Application {
    Application::new(
        app_name,
        vec![(
            "event1".into(),
            function_factory(|_event, chunks| Ok(chunks.concat())),
        )],
    )
}

async fn run(args: Args) -> Result<ExitReason> {
    let endpoint = grape_worker::config::engine_endpoint(&args.app);
    let app = sample_application(&args.app);

    let mut worker = Worker::connect(&endpoint, args.uuid, app)
        .await
        .with_context(|| format!("connecting to engine at {}", endpoint.display()))?;

    // The remote logging service is a separate, best-effort connection: if
    // it's unreachable the worker still serves invocations, it just loses
    // the engine-visible copy of its own dispatch-loop diagnostics.
    match grape_worker::config::logging_endpoint() {
        Ok(addr) => match RemoteLogger::connect(addr).await {
            Ok(logger) => worker = worker.with_remote_logger(logger),
            Err(e) => log::warn!("could not connect to logging service at {addr}: {e}"),
        },
        Err(e) => log::warn!("could not resolve logging endpoint: {e}"),
    }

    log::info!("worker {} serving application {}", worker.uuid(), args.app);
    Ok(worker.run().await)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::process::ExitCode {
    grape_worker::logging::init_local_logging();
    let args = Args::parse();

    match run(args).await {
        Ok(ExitReason::Terminated) => std::process::ExitCode::SUCCESS,
        Ok(ExitReason::Disowned | ExitReason::ChannelFailed) => std::process::ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{e:#}");
            std::process::ExitCode::FAILURE
        }
    }
}
