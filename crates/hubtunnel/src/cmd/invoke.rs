use hubtunnel_conn::CancellationToken;

use crate::cmd::{connect, parse_duration, runtime, shutdown, InvokeArgs, TargetArgs};
use crate::exit::{connection_error, CliError, CliResult, SUCCESS, TIMEOUT};
use crate::msgpack::{decode_value, encode_arguments};
use crate::output::{print_result, OutputFormat};

pub fn run(args: InvokeArgs, target: &TargetArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&target.timeout)?;
    let arguments = encode_arguments(args.args.as_deref())?;

    runtime()?.block_on(async {
        let connection = connect(target, timeout, None).await?;
        let cancel = CancellationToken::new();
        let outcome =
            tokio::time::timeout(timeout, connection.invoke(&args.method, arguments, &cancel)).await;
        shutdown(connection).await;

        let result = match outcome {
            Ok(result) => result.map_err(|err| connection_error("invoke failed", err))?,
            Err(_) => {
                return Err(CliError::new(
                    TIMEOUT,
                    format!("'{}' did not complete within {timeout:?}", args.method),
                ));
            }
        };

        let value = result
            .as_deref()
            .map(decode_value)
            .unwrap_or(serde_json::Value::Null);
        print_result(&args.method, &value, format);
        Ok(SUCCESS)
    })
}
