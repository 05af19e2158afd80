use std::process::ExitCode;

fn main() -> ExitCode {
    match tempo_core::run(std::env::args_os().collect()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("tempo: {err:#}");
            ExitCode::FAILURE
        }
    }
}
