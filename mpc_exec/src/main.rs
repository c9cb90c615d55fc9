//! Main controller executable entry point.
//!
//! # Architecture
//!
//! The executable reads one vehicle message per line on stdin and writes one response per line
//! on stdout:
//!
//!     - Initialise the session, logging and MpcCtrl
//!     - Main loop, for each line received:
//!         - Parse the message, telemetry or manual
//!         - For telemetry run MpcCtrl processing
//!         - Write the steering command, or the manual acknowledgement if no command could be
//!           computed
//!
//! All logging goes to stderr and the session log file so that stdout carries only responses.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Result};
use log::{debug, info, warn};
use std::io::{self, BufRead, Write};
use std::time::Instant;
use structopt::StructOpt;

// Internal
use comms_if::eqpt::vehicle::{VehicleMsg, VehicleResponse};
use mpc_lib::mpc_ctrl::MpcCtrl;
use util::{
    logger::{logger_init, LevelFilter},
    module::State,
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "mpc_exec", about = "Latency compensated MPC trajectory tracker")]
struct Opt {
    /// Parameter file, relative to `$MPC_SW_ROOT/params`
    #[structopt(short, long, default_value = "mpc_ctrl.toml")]
    params: String,

    /// Log debug and trace messages
    #[structopt(short, long)]
    verbose: bool,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    let opt = Opt::from_args();

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("mpc_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    let level = if opt.verbose {
        LevelFilter::Trace
    }
    else {
        LevelFilter::Info
    };
    logger_init(level, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("MPC Controller Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- INITIALISE MODULES ----

    let mut mpc_ctrl = MpcCtrl::default();
    mpc_ctrl
        .init(opt.params.clone(), &session)
        .wrap_err("Failed to initialise MpcCtrl")?;

    // Target period of one cycle
    let cycle_period_s = mpc_ctrl.params().control_period_s;

    info!("Module initialisation complete\n");

    // ---- MAIN LOOP ----

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let mut num_cycles: u64 = 0;

    for line in stdin.lock().lines() {
        let line = line.wrap_err("Failed to read from stdin")?;
        let cycle_start = Instant::now();

        let response = match VehicleMsg::parse(&line) {
            Ok(VehicleMsg::Telemetry(telem)) => match mpc_ctrl.proc(&telem) {
                Ok((cmd, report)) => {
                    debug!("MpcCtrl status: {:?}", report);
                    VehicleResponse::Steer(cmd)
                }
                Err(e) => {
                    warn!("Cycle {} skipped: {}", num_cycles, e);
                    VehicleResponse::Manual
                }
            },
            Ok(VehicleMsg::Manual) => VehicleResponse::Manual,
            Err(e) => {
                warn!("Cycle {} skipped: {}", num_cycles, e);
                VehicleResponse::Manual
            }
        };

        let json = response
            .to_json()
            .wrap_err("Failed to serialise the response")?;
        writeln!(out, "{}", json).wrap_err("Failed to write to stdout")?;
        out.flush().wrap_err("Failed to flush stdout")?;

        let cycle_dur_s = cycle_start.elapsed().as_secs_f64();
        if cycle_dur_s > cycle_period_s {
            warn!(
                "Cycle {} overran by {:.06} s",
                num_cycles,
                cycle_dur_s - cycle_period_s
            );
        }

        num_cycles += 1;
    }

    info!("Input closed after {} cycles", num_cycles);

    session.exit();

    Ok(())
}
