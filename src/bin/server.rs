//! Mission control server binary.
//! Run with: cargo run --bin mission-server

use std::process::ExitCode;

use mission_control::start_mission_control;

fn main() -> ExitCode {
    start_mission_control::run()
}
