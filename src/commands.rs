use anyhow::Context as _;
use chrono::Local;
use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::client::OpencodeApi;
use crate::events::{Event, EventCallback};
use crate::project::{FileItem, FileKind};
use crate::session::Message;

pub async fn create_session(client: &dyn OpencodeApi) -> anyhow::Result<()> {
    println!("{}", "🔄 Creating session...".blue());
    let session = client.create_session().await?;
    println!("{}", format!("✅ Session created: {}", session.id).green());
    Ok(())
}

pub async fn send_message(client: &dyn OpencodeApi, session_id: &str, content: &str) -> anyhow::Result<()> {
    println!("{}", "📤 Sending message...".blue());
    let message = client.send_message(session_id, content).await?;
    println!("{}", format!("✅ Message sent (ID: {})", message.id).green());
    println!("{}", format!("Role: {}", message.role).bright_black());
    println!("{}", format!("Timestamp: {}", message.timestamp_iso()).bright_black());
    println!();
    println!("{}", message.content);
    Ok(())
}

pub async fn list_messages(client: &dyn OpencodeApi, session_id: &str) -> anyhow::Result<()> {
    println!("{}", "📖 Loading messages...".blue());
    let messages = client.list_messages(session_id).await;
    print!("{}", render_messages(&messages));
    Ok(())
}

pub async fn list_files(client: &dyn OpencodeApi) -> anyhow::Result<()> {
    let files = client.list_files().await?;
    print!("{}", render_files(&files));
    Ok(())
}

pub async fn read_file(client: &dyn OpencodeApi, path: &str) -> anyhow::Result<()> {
    let content = client.read_file(path).await?;
    println!("{}", content);
    Ok(())
}

pub async fn monitor_events(client: &dyn OpencodeApi) -> anyhow::Result<()> {
    println!("{}", "📡 Monitoring events... Press Ctrl+C to stop".yellow());
    let callback: EventCallback = Arc::new(|event: Event| print!("{}", render_event(&event)));
    let subscription = client.connect_events(callback);

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    println!("{}", "\n📡 Stopping event monitoring...".yellow());
    subscription.disconnect();
    Ok(())
}

/// Interactive loop: plain input is sent as a message, slash commands list
/// the history or leave.
pub async fn interactive(client: &dyn OpencodeApi, base_url: &str) -> anyhow::Result<()> {
    println!("{}", "🚀 Welcome to OpenCode CLI Tester".blue());
    println!("{}", format!("Connected to: {}", base_url).bright_black());
    println!();

    println!("{}", "📡 Starting event monitoring...".yellow());
    let callback: EventCallback = Arc::new(|event: Event| {
        println!("{} {}", format!("📢 Event: {}", event.type_name()).magenta(), event.data);
    });
    let subscription = client.connect_events(callback);

    let result = interactive_loop(client).await;

    subscription.disconnect();
    println!("{}", "📡 Event monitoring stopped".yellow());
    result
}

async fn interactive_loop(client: &dyn OpencodeApi) -> anyhow::Result<()> {
    println!("{}", "🔄 Creating session...".blue());
    let session = client.create_session().await?;
    println!("{}", format!("✅ Session created: {}", session.id).green());
    println!(
        "{}",
        "Type a message to send it. /history or /refresh lists messages, /exit leaves.".bright_black()
    );
    println!();

    let mut rl = DefaultEditor::new()?;
    loop {
        let line = match rl.readline("» ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("{}", "CTRL-C detected. Type /exit to leave.".yellow());
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        };

        match parse_input(&line) {
            Input::Exit => break,
            Input::Empty => println!("{}", "Message cannot be empty".red()),
            Input::History => {
                println!("{}", "📖 Loading messages...".blue());
                let messages = client.list_messages(&session.id).await;
                print!("{}", render_messages(&messages));
            }
            Input::Unknown(cmd) => println!("{}", format!("Unknown command: {cmd}").bright_black()),
            Input::Send(text) => {
                if let Err(error) = rl.add_history_entry(text) {
                    tracing::debug!(%error, "failed to record readline history");
                }
                println!("{}", "📤 Sending message...".blue());
                match client.send_message(&session.id, text).await {
                    Ok(sent) => {
                        println!("{}", format!("✅ Message sent (ID: {})", sent.id).green());
                        let messages = client.list_messages(&session.id).await;
                        print!("{}", render_messages(&messages));
                    }
                    Err(error) => eprintln!("{} {}", "❌ Failed to send message:".red(), error),
                }
            }
        }
        println!();
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Send(&'a str),
    History,
    Exit,
    Empty,
    Unknown(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    let trimmed = line.trim();
    match trimmed {
        "" => Input::Empty,
        "/exit" | "/quit" => Input::Exit,
        "/history" | "/refresh" => Input::History,
        cmd if cmd.starts_with('/') => Input::Unknown(cmd),
        text => Input::Send(text),
    }
}

pub fn render_messages(messages: &[Message]) -> String {
    let mut out = String::new();
    if messages.is_empty() {
        let _ = writeln!(out, "{}", "No messages yet".bright_black());
        return out;
    }
    let _ = writeln!(out);
    for (index, msg) in messages.iter().enumerate() {
        let role = if msg.is_user() { "👤 User".blue() } else { "🤖 Assistant".green() };
        let local = msg.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S");
        let _ = writeln!(out, "{}. {} ({})", index + 1, role, local.to_string().bright_black());
        let _ = writeln!(out, "   {}", msg.content);
        let _ = writeln!(out);
    }
    out
}

pub fn render_event(event: &Event) -> String {
    let mut header = format!("[{}] Event: {}", event.timestamp_iso(), event.type_name());
    if event.is_synthetic() {
        header.push_str(" (client-generated)");
    }
    let data = serde_json::to_string_pretty(&event.data).unwrap_or_else(|_| event.data.to_string());
    format!("{}\n{}\n\n", header.magenta(), data)
}

pub fn render_files(files: &[FileItem]) -> String {
    let mut out = String::new();
    if files.is_empty() {
        let _ = writeln!(out, "{}", "No files".bright_black());
        return out;
    }
    for file in files {
        match file.kind {
            FileKind::Dir => {
                let _ = writeln!(out, "📁 {}", file.path.blue());
            }
            FileKind::File => {
                let _ = writeln!(out, "📄 {}", file.path);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::epoch_millis_to_utc;
    use serde_json::json;

    fn message(role: &str, content: &str) -> Message {
        Message {
            id: "m".into(),
            content: content.into(),
            role: role.into(),
            timestamp: epoch_millis_to_utc(0),
        }
    }

    #[test]
    fn parse_input_variants() {
        assert_eq!(parse_input("  hello  "), Input::Send("hello"));
        assert_eq!(parse_input("   "), Input::Empty);
        assert_eq!(parse_input("/exit"), Input::Exit);
        assert_eq!(parse_input("/quit"), Input::Exit);
        assert_eq!(parse_input("/refresh"), Input::History);
        assert_eq!(parse_input("/history"), Input::History);
        assert_eq!(parse_input("/nope"), Input::Unknown("/nope"));
    }

    #[test]
    fn renders_empty_history() {
        assert!(render_messages(&[]).contains("No messages yet"));
    }

    #[test]
    fn renders_numbered_messages_with_roles() {
        let out = render_messages(&[message("user", "hi"), message("assistant", "hello")]);
        assert!(out.contains("1. "));
        assert!(out.contains("User"));
        assert!(out.contains("2. "));
        assert!(out.contains("Assistant"));
        assert!(out.contains("   hello"));
    }

    #[test]
    fn renders_events_with_type_and_pretty_data() {
        let out = render_event(&Event::server("session.idle", json!({"sessionID": "s"})));
        assert!(out.contains("Event: session.idle"));
        assert!(out.contains("\"sessionID\": \"s\""));

        let beat = render_event(&Event::liveness(10));
        assert!(beat.contains("Event: heartbeat"));
        assert!(beat.contains("client-generated"));
    }

    #[test]
    fn renders_files() {
        let out = render_files(&[
            FileItem { path: "src".into(), kind: FileKind::Dir },
            FileItem { path: "src/main.rs".into(), kind: FileKind::File },
        ]);
        assert!(out.contains("📁"));
        assert!(out.contains("📄 src/main.rs"));
    }
}
