use std::process::ExitCode;

fn main() -> ExitCode {
    coachdesk_cli::run()
}
