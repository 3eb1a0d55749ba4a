//! Interactive command shell over stdin.
//!
//! Parsing and execution are plain functions so they can be tested without
//! a terminal; [`run`] only wires them to stdin and stdout.

use std::io::Write;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::error::CommandError;
use crate::replication::ReplicationNode;

const LOG_TAIL: usize = 10;

pub const HELP: &str = "\
=== Commands ===
  insert <pos> <text>  - insert text starting at position
  delete <pos>         - delete the character at position
  show                 - show the document and vector clock
  log                  - show the last 10 operations
  peers                - list connected peers
  help                 - show this help
  quit                 - leave
================";

/// A parsed shell command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Insert { position: usize, text: String },
    Delete { position: usize },
    Show,
    Log,
    Peers,
    Help,
    Quit,
}

impl Command {
    /// Parses one input line. Blank lines yield `Ok(None)`.
    ///
    /// Insert text is the remaining words joined by single spaces.
    pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
        let mut words = line.split_whitespace();
        let Some(word) = words.next() else {
            return Ok(None);
        };

        let command = match word.to_lowercase().as_str() {
            "insert" => {
                let position = words
                    .next()
                    .ok_or(CommandError::Usage("insert <pos> <text>"))?;
                let position = parse_position(position)?;
                let text = words.collect::<Vec<_>>().join(" ");
                if text.is_empty() {
                    return Err(CommandError::Usage("insert <pos> <text>"));
                }
                Command::Insert { position, text }
            }
            "delete" => {
                let (Some(position), None) = (words.next(), words.next()) else {
                    return Err(CommandError::Usage("delete <pos>"));
                };
                Command::Delete {
                    position: parse_position(position)?,
                }
            }
            "show" => Command::Show,
            "log" => Command::Log,
            "peers" => Command::Peers,
            "help" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }
}

fn parse_position(word: &str) -> Result<usize, CommandError> {
    word.parse()
        .map_err(|_| CommandError::InvalidPosition(word.to_string()))
}

/// Runs a command against the node and returns what to print.
pub fn execute(node: &ReplicationNode, command: &Command) -> String {
    match command {
        Command::Insert { position, text } => match node.local_insert(*position, text) {
            Ok(_) => format!("Inserted '{text}' at position {position}"),
            Err(e) => format!("Error: {e}"),
        },
        Command::Delete { position } => match node.local_delete(*position) {
            Ok(character) => format!(
                "Deleted '{}' at position {}",
                character.value(),
                position
            ),
            Err(e) => format!("Error: {e}"),
        },
        Command::Show => format!(
            "Document: '{}'\nVector clock: {}",
            node.visible_text(),
            node.clock_snapshot()
        ),
        Command::Log => {
            let entries = node.operation_log(LOG_TAIL);
            let mut out = format!("--- Last {LOG_TAIL} operations ---");
            for entry in entries {
                out.push_str("\n  ");
                out.push_str(&entry);
            }
            out
        }
        Command::Peers => {
            let peers = node.peers();
            if peers.is_empty() {
                "No connected peers".to_string()
            } else {
                format!("Connected peers: {}", peers.join(", "))
            }
        }
        Command::Help => HELP.to_string(),
        Command::Quit => "Shutting down...".to_string(),
    }
}

/// Current text with a ruler of positions underneath.
fn render_document(text: &str) -> String {
    let ruler: String = (0..text.chars().count())
        .map(|i| char::from_digit((i % 10) as u32, 10).unwrap_or('?'))
        .collect();
    format!("\nText:      [{text}]\nPositions:  {ruler}")
}

/// Reads commands from stdin until `quit` or end of input.
pub async fn run(node: ReplicationNode) -> std::io::Result<()> {
    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        println!("{}", render_document(&node.visible_text()));
        print!("\n[{}]> ", node.node_id());
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            debug!("stdin closed");
            break;
        };

        match Command::parse(&line) {
            Ok(None) => continue,
            Ok(Some(Command::Quit)) => {
                println!("{}", execute(&node, &Command::Quit));
                break;
            }
            Ok(Some(command)) => println!("{}", execute(&node, &command)),
            Err(e) => println!("Error: {e}"),
        }
    }
    Ok(())
}
