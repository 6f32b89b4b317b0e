//! Command line: which rooms the worker serves and how loudly it logs.

use crate::worker::DispatchMode;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "voice-assistant-agent",
    about = "LiveKit voice assistant worker",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Subcommand)]
pub enum Command {
    /// Serve every room that has participants.
    Start,
    /// Like `start`, with debug logging.
    Dev,
    /// Serve a single named room, then exit.
    Connect {
        /// Room to join.
        #[arg(short, long)]
        room: String,
    },
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Start)
    }
}

impl Command {
    pub fn dispatch_mode(&self) -> DispatchMode {
        match self {
            Command::Start | Command::Dev => DispatchMode::Poll,
            Command::Connect { room } => DispatchMode::Room(room.clone()),
        }
    }

    /// Log filter used when `RUST_LOG` is unset.
    pub fn default_log_filter(&self) -> &'static str {
        match self {
            Command::Dev => "voice_assistant_agent=debug,actix_web=debug",
            _ => "voice_assistant_agent=info,actix_web=info",
        }
    }
}
