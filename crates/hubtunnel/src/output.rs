use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Text,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Text
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct InvocationOutput<'a> {
    sequence: usize,
    method: &'a str,
    arguments: &'a Value,
}

/// Print one invocation received from the hub.
pub fn print_invocation(sequence: usize, method: &str, arguments: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = InvocationOutput {
                sequence,
                method,
                arguments,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["#", "METHOD", "ARGUMENTS"])
                .add_row(vec![sequence.to_string(), method.to_string(), arguments.to_string()]);
            println!("{table}");
        }
        OutputFormat::Text => println!("#{sequence} {method} {arguments}"),
    }
}

/// Print the result of an invocation. `Value::Null` stands for no result.
pub fn print_result(method: &str, result: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{result}"),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["METHOD", "RESULT"])
                .add_row(vec![method.to_string(), result.to_string()]);
            println!("{table}");
        }
        OutputFormat::Text => match serde_json::to_string_pretty(result) {
            Ok(text) => println!("{text}"),
            Err(_) => println!("{result}"),
        },
    }
}
