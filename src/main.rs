use std::{process::ExitCode, time::Duration};

/// How long exit waits for blocking work (a capture stuck in a driver call).
const EXIT_GRACE: Duration = Duration::from_millis(500);

fn main() -> ExitCode {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to start async runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    let code = runtime.block_on(scanlog::run());
    runtime.shutdown_timeout(EXIT_GRACE);
    code
}
