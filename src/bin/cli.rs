//! ArcProc - CLI Client

use std::env;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;

use anyhow::Context;
use arcproc::server::DEFAULT_PORT;
use arcproc::storage::Value;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde_json::Map;

/// Print welcome banner
fn print_banner(address: &str) {
    println!(
        r#"
 ArcProc CLI, connected to {}
 Type '.help' for help, '.quit' to exit
"#,
        address
    );
}

/// Print help message
fn print_help() {
    println!(
        r#"
Commands:
  .help              Show this help message
  .quit              Exit

Requests are JSON objects tagged by "cmd":
  {{"cmd":"insert","relation":"emp","rows":[[1,"KING",5000]]}}
  {{"cmd":"update","relation":"emp","set":{{"sal":900}},"filter":"sal < :cap","binds":{{"cap":1000}}}}
  {{"cmd":"delete","relation":"emp","filter":"empno = 1"}}
  {{"cmd":"select_into","query":"SELECT ename FROM emp WHERE empno = 1"}}
  {{"cmd":"open","package":"payroll","cursor":"c_low","args":[1000]}}
  {{"cmd":"fetch","package":"payroll","cursor":"c_low","limit":10}}
  {{"cmd":"update_current","package":"payroll","cursor":"c_low","set":{{"sal":900}}}}
  {{"cmd":"delete_current","package":"payroll","cursor":"c_low"}}
  {{"cmd":"attributes","package":"payroll","cursor":"c_low"}}
  {{"cmd":"close","package":"payroll","cursor":"c_low"}}
  {{"cmd":"get_var","package":"payroll","name":"raise"}}
  {{"cmd":"set_var","package":"payroll","name":"raise","value":250}}
  {{"cmd":"reset_package","package":"payroll"}}
  {{"cmd":"savepoint","name":"a"}}   {{"cmd":"rollback_to","name":"a"}}
  {{"cmd":"commit"}}   {{"cmd":"rollback"}}
"#
    );
}

/// Format fetched rows as a table
fn format_rows(rows: &[Map<String, serde_json::Value>]) -> String {
    let Some(first) = rows.first() else {
        return "0 row(s) returned\n".to_string();
    };
    let columns: Vec<&String> = first.keys().collect();
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|c| {
                    row.get(c.as_str())
                        .and_then(|v| serde_json::from_value::<Value>(v.clone()).ok())
                        .map(|v| v.to_string())
                        .unwrap_or_default()
                })
                .collect()
        })
        .collect();

    // Calculate column widths
    let mut widths: Vec<usize> = columns.iter().map(|c| c.len()).collect();
    for row in &cells {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let separator: String = widths
        .iter()
        .map(|w| "-".repeat(*w + 2))
        .collect::<Vec<_>>()
        .join("+");
    let separator = format!("+{}+\n", separator);

    let mut output = String::new();
    output.push_str(&separator);
    let header: String = columns
        .iter()
        .zip(&widths)
        .map(|(c, w)| format!(" {:^width$} ", c, width = *w))
        .collect::<Vec<_>>()
        .join("|");
    output.push_str(&format!("|{}|\n", header));
    output.push_str(&separator);

    for row in &cells {
        let line: String = row
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!(" {:>width$} ", v, width = *w))
            .collect::<Vec<_>>()
            .join("|");
        output.push_str(&format!("|{}|\n", line));
    }
    output.push_str(&separator);
    output.push_str(&format!("{} row(s) returned\n", rows.len()));
    output
}

/// Print one server response
fn print_response(line: &str) {
    let Ok(serde_json::Value::Object(response)) = serde_json::from_str(line) else {
        println!("{}", line.trim_end());
        return;
    };
    if response.get("status").and_then(|s| s.as_str()) == Some("error") {
        let message = response.get("message").and_then(|m| m.as_str()).unwrap_or("error");
        eprintln!("Error: {}", message);
        return;
    }

    if let Some(serde_json::Value::Array(rows)) = response.get("rows") {
        let rows: Vec<Map<String, serde_json::Value>> = rows
            .iter()
            .filter_map(|r| r.as_object().cloned())
            .collect();
        print!("{}", format_rows(&rows));
    } else if let Some(n) = response.get("affected_rows") {
        println!("{} row(s) affected", n);
    } else if let Some(value) = response.get("value") {
        println!("{}", value);
    } else if let Some(attributes) = response.get("attributes") {
        println!("{}", attributes);
    } else if let Some(message) = response.get("message").and_then(|m| m.as_str()) {
        println!("{}", message);
    } else {
        println!("OK");
    }
}

/// Main REPL loop
fn run_repl(address: &str) -> anyhow::Result<()> {
    let stream = TcpStream::connect(address).with_context(|| format!("connecting to {}", address))?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;

    let mut banner = String::new();
    reader.read_line(&mut banner)?;
    print_banner(address);

    let mut editor = DefaultEditor::new()?;
    loop {
        match editor.readline("arcproc> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(trimmed);

                match trimmed {
                    ".help" => {
                        print_help();
                        continue;
                    }
                    ".quit" | ".exit" => {
                        writer.write_all(b".quit\n")?;
                        break;
                    }
                    _ => {}
                }

                writer.write_all(trimmed.as_bytes())?;
                writer.write_all(b"\n")?;
                writer.flush()?;

                let mut response = String::new();
                if reader.read_line(&mut response)? == 0 {
                    eprintln!("Server closed the connection");
                    break;
                }
                print_response(&response);
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        }
    }

    println!("Goodbye!");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    let mut host = "127.0.0.1".to_string();
    let mut port = DEFAULT_PORT;

    // Simple argument parsing
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--host" | "-h" => {
                host = args.get(i + 1).context("--host needs a value")?.clone();
                i += 1;
            }
            "--port" | "-p" => {
                port = args
                    .get(i + 1)
                    .context("--port needs a value")?
                    .parse()
                    .context("invalid port")?;
                i += 1;
            }
            other => anyhow::bail!("unknown argument: {}", other),
        }
        i += 1;
    }

    run_repl(&format!("{}:{}", host, port))
}
