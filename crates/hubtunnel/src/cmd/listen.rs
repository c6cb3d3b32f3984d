use std::sync::Arc;

use bytes::Bytes;
use hubtunnel_conn::{ConnectionEvents, PendingAck};
use tokio::sync::mpsc;

use crate::cmd::{connect, parse_duration, runtime, shutdown, ListenArgs, TargetArgs};
use crate::exit::{connection_error, CliError, CliResult, CONNECT, SUCCESS};
use crate::msgpack::decode_value;
use crate::output::{print_invocation, OutputFormat};

/// Reports the end of the connection to the listen loop.
struct ClosedSignal(mpsc::UnboundedSender<Option<String>>);

impl ConnectionEvents for ClosedSignal {
    fn closed(&self, error: Option<&str>) -> PendingAck {
        let _ = self.0.send(error.map(str::to_string));
        PendingAck::ready()
    }
}

pub fn run(args: ListenArgs, target: &TargetArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&target.timeout)?;

    runtime()?.block_on(async {
        let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
        let connection = connect(target, timeout, Some(Arc::new(ClosedSignal(closed_tx)) as Arc<dyn ConnectionEvents>)).await?;

        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
        let handler = move |arguments: Bytes| {
            let _ = tx.send(arguments);
            PendingAck::ready()
        };
        if let Err(err) = connection.on(&args.method, Arc::new(handler)) {
            shutdown(connection).await;
            return Err(connection_error("subscribe failed", err));
        }
        tracing::info!(method = %args.method, endpoint = %connection.endpoint(), "listening");

        let mut printed = 0usize;
        let outcome = loop {
            if args.count.is_some_and(|count| printed >= count) {
                break Ok(SUCCESS);
            }
            tokio::select! {
                Some(arguments) = rx.recv() => {
                    printed = printed.saturating_add(1);
                    print_invocation(printed, &args.method, &decode_value(&arguments), format);
                }
                Some(error) = closed_rx.recv() => {
                    break match error {
                        Some(error) => Err(CliError::new(CONNECT, format!("connection closed: {error}"))),
                        None => Ok(SUCCESS),
                    };
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::debug!("interrupted");
                    break Ok(SUCCESS);
                }
            }
        };

        shutdown(connection).await;
        outcome
    })
}
