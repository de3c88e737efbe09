use std::process::ExitCode;

use aint_queue::JobRegistry;
use aint_queue::console::{Application, init_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    Application::new(JobRegistry::new()).main().await
}
