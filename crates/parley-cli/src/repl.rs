//! Interactive commands.
//!
//! Lines starting with `/` are commands, anything else is sent to the room.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use parley_core::{ChatEvent, ChatSession, Promotion, Role};

use crate::transcript::Transcript;

/// Base64 characters of a file included in a `/file` message.
pub const FILE_SNIPPET_CHARS: usize = 100;

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/create <room>`
    Create(String),
    /// `/join <room> <key>`
    Join {
        /// Room id
        room: String,
        /// Base64 room key
        key: String,
    },
    /// `/list`
    List,
    /// `/save`
    Save,
    /// `/file <path>`
    File(PathBuf),
    /// `/relay on|off`
    Relay(bool),
    /// `/help`
    Help,
    /// `/exit`
    Exit,
    /// A chat message
    Say(String),
    /// Blank line
    Empty,
}

/// Why a line could not be parsed.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    /// Known command, wrong arguments
    #[error("Usage: {0}")]
    Usage(&'static str),
    /// Unknown command
    #[error("Unknown command: {0}\nType '/help' for available commands")]
    Unknown(String),
}

/// Parse one input line.
///
/// # Errors
///
/// Returns [`CommandError`] for unknown commands or missing arguments.
pub fn parse(line: &str) -> Result<Command, CommandError> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        if line.is_empty() {
            return Ok(Command::Empty);
        }
        return Ok(Command::Say(line.to_string()));
    };

    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };
    let words: Vec<&str> = args.split_whitespace().collect();

    match name {
        "create" => match words.as_slice() {
            [room] => Ok(Command::Create((*room).to_string())),
            _ => Err(CommandError::Usage("/create [room ID]")),
        },
        "join" => match words.as_slice() {
            [room, key] => Ok(Command::Join {
                room: (*room).to_string(),
                key: (*key).to_string(),
            }),
            _ => Err(CommandError::Usage("/join [room ID] [room key]")),
        },
        "list" => Ok(Command::List),
        "save" => Ok(Command::Save),
        "file" if !args.is_empty() => Ok(Command::File(PathBuf::from(args))),
        "file" => Err(CommandError::Usage("/file [file path]")),
        "relay" => match words.as_slice() {
            ["on"] => Ok(Command::Relay(true)),
            ["off"] => Ok(Command::Relay(false)),
            _ => Err(CommandError::Usage("/relay on|off")),
        },
        "help" => Ok(Command::Help),
        "exit" | "quit" => Ok(Command::Exit),
        other => Err(CommandError::Unknown(format!("/{other}"))),
    }
}

/// Build the `/file` chat line for `path`.
///
/// The file is read in `chunk_size` pieces and base64-encoded; only the
/// first [`FILE_SNIPPET_CHARS`] characters are kept, followed by `...` when
/// the encoding is longer.
///
/// # Errors
///
/// Returns an error if the path does not exist, is a directory or cannot
/// be read.
pub fn file_snippet(path: &Path, chunk_size: usize) -> anyhow::Result<String> {
    let metadata = std::fs::metadata(path)
        .map_err(|_| anyhow::anyhow!("File does not exist: {}", path.display()))?;
    if metadata.is_dir() {
        anyhow::bail!("Cannot send directory: {}", path.display());
    }

    let mut data = Vec::with_capacity(usize::try_from(metadata.len()).unwrap_or_default());
    BufReader::with_capacity(chunk_size.max(1), File::open(path)?).read_to_end(&mut data)?;

    let encoded = STANDARD.encode(&data);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let mut line = format!(
        "[File] {name}: {}",
        &encoded[..encoded.len().min(FILE_SNIPPET_CHARS)]
    );
    if encoded.len() > FILE_SNIPPET_CHARS {
        line.push_str("...");
    }
    Ok(line)
}

/// What the input loop should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep reading input
    Continue,
    /// Leave the loop
    Exit,
}

/// Print the command list.
pub fn print_help() {
    println!("Available commands:");
    println!("  /create [room ID] - Create room");
    println!("  /join [room ID] [room key] - Join room");
    println!("  /list - List nodes in room");
    println!("  /save - Save chat log");
    println!("  /file [file path] - Send file");
    println!("  /relay on|off - Allow or disable relay mode");
    println!("  /help - Show this help message");
    println!("  /exit - Exit program");
    println!("  (Messages without / are sent as chat messages)");
}

/// Executes commands against a session and renders its events.
pub struct Repl {
    session: ChatSession,
    transcript: Transcript,
    log_dir: PathBuf,
}

impl Repl {
    /// Chat logs are written to `log_dir`.
    pub fn new(session: ChatSession, log_dir: PathBuf) -> Self {
        Self {
            session,
            transcript: Transcript::default(),
            log_dir,
        }
    }

    fn in_room(&self) -> bool {
        if self.session.room_id().is_some() {
            return true;
        }
        println!("Please create or join a room first!");
        false
    }

    /// Run one command.
    ///
    /// # Errors
    ///
    /// Returns the command's failure; the caller prints it and keeps going.
    pub async fn execute(&mut self, command: Command) -> anyhow::Result<Flow> {
        match command {
            Command::Empty => {}
            Command::Create(room) => {
                let key = self.session.create_room(&room).await?;
                println!("Room created successfully! Room ID: {room}");
                println!("Room key: {}", key.to_base64());
                println!("Your nickname: {}", self.session.nickname());
            }
            Command::Join { room, key } => {
                self.session.join_room(&room, &key).await?;
                println!("Successfully joined room {room}!");
                println!("Your nickname: {}", self.session.nickname());
            }
            Command::List => {
                if let Some(room) = self.session.room_id() {
                    let peers = self.session.peers();
                    println!("Nodes in room {room} ({} nodes):", peers.len());
                    for (i, view) in peers.iter().enumerate() {
                        let you = if view.is_local { " (you)" } else { "" };
                        let relay = if view.role == Role::Relay { " [relay]" } else { "" };
                        println!(
                            "  {}. {} ({}){you}{relay}",
                            i + 1,
                            view.record.display_name,
                            view.record.address
                        );
                    }
                } else {
                    println!("Please create or join a room first!");
                }
            }
            Command::Save => {
                let path = self.transcript.save_in(&self.log_dir, chrono::Local::now())?;
                println!("Chat log saved to {}", path.display());
            }
            Command::File(path) => {
                if self.in_room() {
                    let line = file_snippet(&path, self.session.config().file_chunk_size)?;
                    self.session.send_message(&line)?;
                    println!("File info sent");
                }
            }
            Command::Relay(enabled) => {
                self.session.set_relay_mode(enabled);
                println!("Relay mode {}", if enabled { "enabled" } else { "disabled" });
            }
            Command::Help => print_help(),
            Command::Exit => {
                println!("Exiting program...");
                return Ok(Flow::Exit);
            }
            Command::Say(text) => {
                if self.in_room() {
                    self.session.send_message(&text)?;
                }
            }
        }
        Ok(Flow::Continue)
    }

    /// Print a session event; message lines also go to the chat log.
    pub fn show_event(&mut self, event: ChatEvent) {
        let line = match event {
            ChatEvent::Message(m) => {
                let line = m.display_line();
                self.transcript.push(line.clone());
                line
            }
            ChatEvent::LocalEcho(m) => {
                let line = m.echo_line();
                self.transcript.push(line.clone());
                line
            }
            ChatEvent::PeerJoined(p) => {
                format!("[System] Node {} ({}) joined the room", p.display_name, p.address)
            }
            ChatEvent::PeerLeft(id) => format!("[System] Node {id} left the room"),
            ChatEvent::RelayPromoted(Promotion::Local) => {
                "[System] This node is now a relay".to_string()
            }
            ChatEvent::RelayPromoted(Promotion::Peer(id)) => {
                format!("[System] Node {id} is now a relay")
            }
        };
        println!("{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse("/create r1"), Ok(Command::Create("r1".into())));
        assert_eq!(
            parse("  /join r1 AAAA  "),
            Ok(Command::Join {
                room: "r1".into(),
                key: "AAAA".into()
            })
        );
        assert_eq!(parse("/list"), Ok(Command::List));
        assert_eq!(parse("/save"), Ok(Command::Save));
        assert_eq!(parse("/relay off"), Ok(Command::Relay(false)));
        assert_eq!(parse("/exit"), Ok(Command::Exit));
        assert_eq!(
            parse("/file my notes.txt"),
            Ok(Command::File(PathBuf::from("my notes.txt")))
        );
    }

    #[test]
    fn test_parse_chat_and_blank() {
        assert_eq!(parse("hello there"), Ok(Command::Say("hello there".into())));
        assert_eq!(parse("   "), Ok(Command::Empty));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse("/create"), Err(CommandError::Usage(_))));
        assert!(matches!(parse("/join r1"), Err(CommandError::Usage(_))));
        assert!(matches!(parse("/file"), Err(CommandError::Usage(_))));
        assert!(matches!(parse("/relay maybe"), Err(CommandError::Usage(_))));
        assert_eq!(parse("/dance"), Err(CommandError::Unknown("/dance".into())));
    }

    #[test]
    fn test_file_snippet_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, vec![0u8; 300]).unwrap();

        let line = file_snippet(&path, 16).unwrap();
        let expected = format!("[File] data.bin: {}...", "A".repeat(FILE_SNIPPET_CHARS));
        assert_eq!(line, expected);
    }

    #[test]
    fn test_file_snippet_short_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hi.txt");
        std::fs::write(&path, b"hi").unwrap();
        assert_eq!(file_snippet(&path, 1024).unwrap(), "[File] hi.txt: aGk=");
    }

    #[test]
    fn test_file_snippet_refuses_directory_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = file_snippet(dir.path(), 1024).unwrap_err();
        assert!(err.to_string().starts_with("Cannot send directory"));

        let err = file_snippet(&dir.path().join("nope"), 1024).unwrap_err();
        assert!(err.to_string().starts_with("File does not exist"));
    }
}
