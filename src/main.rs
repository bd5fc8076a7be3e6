//! stcp utility - main entrypoint
// (c) 2025 Ross Younger

fn main() -> std::process::ExitCode {
    stcp::cli(std::env::args_os())
}
