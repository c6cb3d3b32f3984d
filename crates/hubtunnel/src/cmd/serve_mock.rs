use hubtunnel_mock::MockHub;
use hubtunnel_transport::PipeListener;

use crate::cmd::{runtime, ServeMockArgs};
use crate::exit::{transport_error, CliResult, SUCCESS};

pub fn run(args: ServeMockArgs) -> CliResult<i32> {
    runtime()?.block_on(serve(&args.pipe))
}

async fn serve(pipe: &str) -> CliResult<i32> {
    let mut listener =
        PipeListener::bind(pipe).map_err(|err| transport_error("bind failed", err))?;
    tracing::info!(path = %listener.path().display(), "mock hub listening");

    let hub = MockHub::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let stream = accepted.map_err(|err| transport_error("accept failed", err))?;
                tracing::debug!(peer = stream.peer(), "client connected");
                let hub = hub.clone();
                tokio::spawn(async move {
                    if let Err(err) = hub.serve(stream).await {
                        tracing::debug!(error = %err, "client session ended");
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tracing::info!(served = hub.connections(), "mock hub stopped");
    Ok(SUCCESS)
}
