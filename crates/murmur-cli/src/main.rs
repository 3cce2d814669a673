//! murmur — peer-to-peer chat over a NATS bus.
//!
//! Short-lived frontend for the murmurd daemon: each subcommand issues
//! one control request over the daemon's Unix socket, except `open`,
//! which holds the socket and bridges stdin/stdout to the chat.

mod client;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use murmur_core::control::{default_base_dir, socket_path, ControlRequest};
use murmur_core::{Address, Profile};

#[derive(Parser)]
#[command(name = "murmur", about = "Peer-to-peer chat over a NATS bus", version)]
struct Cli {
    /// Profile directory (defaults to ~/.murmur).
    #[arg(long, global = true)]
    profile: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a key pair and profile directory.
    Generate {
        /// Where to put the generated profile (defaults to the profile
        /// directory).
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Print the address of the profile.
    Address,

    /// Connect the daemon to the bus and start answering presence
    /// probes.
    Online {
        /// URL of the NATS server.
        #[arg(long)]
        nats_url: String,
    },

    /// Disconnect the daemon from the bus.
    Offline,

    /// Dial a peer and attach a chat.
    CreateChat {
        /// Address of the peer to dial.
        #[arg(long)]
        recipient: Address,
    },

    /// Close the current chat.
    DeleteChat {
        /// Address of the dialed peer.
        #[arg(long)]
        recipient: Address,
    },

    /// Open the chat: stdin lines go to the peer, incoming messages
    /// print to stdout. Ends on EOF (Ctrl-D).
    Open,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let base = cli.profile.clone().unwrap_or_else(default_base_dir);
    let socket = socket_path(&base);

    match cli.command {
        Command::Generate { out } => {
            let target = out.unwrap_or_else(|| base.clone());
            let profile = Profile::generate(&target)
                .with_context(|| format!("cannot generate profile in {}", target.display()))?;
            println!("Generated a new key pair in {}", target.display());
            println!("Your address is:\n{}", profile.address());
        }
        Command::Address => {
            let profile = load_profile(&base)?;
            println!("Your address is:\n{}", profile.address());
        }
        Command::Online { nats_url } => {
            let profile = load_profile(&base)?;
            client::request(
                &socket,
                &ControlRequest::Online {
                    nats_url,
                    sender_address: profile.address().clone(),
                },
            )
            .await?;
            println!("Online as {}", profile.address());
        }
        Command::Offline => {
            client::request(&socket, &ControlRequest::Offline).await?;
            println!("Offline");
        }
        Command::CreateChat { recipient } => {
            client::request(
                &socket,
                &ControlRequest::CreateChat {
                    recipient_address: recipient.clone(),
                },
            )
            .await?;
            println!("Chatting with {recipient}");
        }
        Command::DeleteChat { recipient } => {
            client::request(
                &socket,
                &ControlRequest::DeleteChat {
                    recipient_address: recipient,
                },
            )
            .await?;
            println!("Chat closed");
        }
        Command::Open => {
            client::open_chat(&socket).await?;
        }
    }
    Ok(())
}

fn load_profile(base: &std::path::Path) -> anyhow::Result<Profile> {
    Profile::load(base).with_context(|| {
        format!(
            "cannot load profile from {} (run `murmur generate` first?)",
            base.display()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn recipient_must_be_a_valid_address() {
        let ok = Cli::try_parse_from([
            "murmur",
            "create-chat",
            "--recipient",
            "QeA75s5LAcBYK4yAXmUhxP",
        ]);
        assert!(ok.is_ok());

        let bad = Cli::try_parse_from(["murmur", "create-chat", "--recipient", "not-base58-0"]);
        assert!(bad.is_err());
    }
}
