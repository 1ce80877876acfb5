//! Command execution.

use crate::Commands;
use colored::Colorize;
use postbird_client::{Client, ClientError};
use postbird_protocol::CallFrame;
use serde_json::Value;

/// Executes a command and returns the formatted output.
pub async fn execute(client: &Client, cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Call { name, args } => {
            let params: Vec<Value> = args.iter().map(|a| parse_arg(a)).collect();
            let shown = format_params(&params);
            client.call(&name, params).await?;
            Ok(format!("{} {}({})", "Sent".green(), name.cyan(), shown))
        }

        Commands::Listen { count } => {
            if let Some(id) = client.session_id() {
                eprintln!("{} session {}", "Listening".green(), id.cyan());
            }

            let conn = client.connection();
            let mut seen = 0usize;
            let result = conn
                .read_calls(|frame| {
                    println!("{}", format_call(&frame));
                    seen += 1;
                    if count.is_some_and(|limit| seen >= limit) {
                        let conn = conn.clone();
                        tokio::spawn(async move { conn.close().await });
                    }
                })
                .await;

            match result {
                Ok(()) | Err(ClientError::ConnectionClosed) => {
                    Ok(format!("{} call(s) received", seen).dimmed().to_string())
                }
                Err(e) => Err(e.into()),
            }
        }
    }
}

/// Parses a command-line argument as JSON, or keeps it as a string.
pub(crate) fn parse_arg(arg: &str) -> Value {
    serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.to_string()))
}

fn format_params(params: &[Value]) -> String {
    params
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_call(frame: &CallFrame) -> String {
    format!(
        "{}({})",
        frame.function_name.cyan(),
        format_params(&frame.params)
    )
}
