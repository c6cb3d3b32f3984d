use std::time::Duration;

use bytes::Bytes;
use hubtunnel_conn::CancellationToken;

use crate::cmd::{connect, parse_duration, runtime, shutdown, SendArgs, TargetArgs};
use crate::exit::{connection_error, CliResult, SUCCESS};
use crate::msgpack::encode_arguments;

pub fn run(args: SendArgs, target: &TargetArgs) -> CliResult<i32> {
    let timeout = parse_duration(&target.timeout)?;
    let arguments = encode_arguments(args.args.as_deref())?;

    runtime()?.block_on(send_once(&args.method, arguments, target, timeout))
}

async fn send_once(
    method: &str,
    arguments: Bytes,
    target: &TargetArgs,
    timeout: Duration,
) -> CliResult<i32> {
    let connection = connect(target, timeout, None).await?;
    let result = connection
        .send(method, arguments, &CancellationToken::new())
        .await;
    shutdown(connection).await;

    result.map_err(|err| connection_error("send failed", err))?;
    tracing::info!(method, "sent");
    Ok(SUCCESS)
}
