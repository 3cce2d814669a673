//! Client side of the daemon's control protocol.

use std::path::Path;

use anyhow::{bail, Context};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, warn};

use murmur_core::control::{self, ControlRequest, ControlResponse};
use murmur_core::wire::ChatMessage;

/// Issue one request and check the daemon's reply.
pub async fn request(socket: &Path, request: &ControlRequest) -> anyhow::Result<()> {
    let mut stream = connect(socket).await?;
    stream
        .write_all(control::to_line(request)?.as_bytes())
        .await
        .context("cannot write to the daemon")?;
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .await
        .context("cannot read the daemon's reply")?;
    match control::from_line(&line).context("malformed reply from the daemon")? {
        ControlResponse::Ok => Ok(()),
        ControlResponse::Error { code, message } => {
            bail!("daemon refused ({code:?}): {message}")
        }
    }
}

/// Attach to the current chat: stdin lines go out as messages, incoming
/// messages print to stdout. Returns when stdin closes.
pub async fn open_chat(socket: &Path) -> anyhow::Result<()> {
    let mut stream = connect(socket).await?;
    stream
        .write_all(control::to_line(&ControlRequest::Send)?.as_bytes())
        .await
        .context("cannot write to the daemon")?;

    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .await
        .context("cannot read the daemon's reply")?;
    match control::from_line(&line).context("malformed reply from the daemon")? {
        ControlResponse::Ok => {}
        ControlResponse::Error { code, message } => {
            bail!("daemon refused ({code:?}): {message}")
        }
    }

    let printer = tokio::spawn(async move {
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => match control::from_line::<ChatMessage>(&line) {
                    Ok(msg) => println!("[{}] {}", format_hms(msg.time), msg.text),
                    Err(e) => warn!(error = %e, "skipping malformed chat line"),
                },
                Err(e) => {
                    debug!(error = %e, "chat stream closed");
                    break;
                }
            }
        }
    });

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    while let Some(text) = input.next_line().await.context("cannot read stdin")? {
        if text.is_empty() {
            continue;
        }
        let msg = ChatMessage::now(text);
        write_half
            .write_all(control::to_line(&msg)?.as_bytes())
            .await
            .context("the daemon went away mid-chat")?;
    }

    // Stdin is done: closing our write half tells the daemon to wind
    // the relay down; the printer drains whatever is left.
    write_half
        .shutdown()
        .await
        .context("cannot close the chat stream")?;
    let _ = printer.await;
    Ok(())
}

async fn connect(socket: &Path) -> anyhow::Result<UnixStream> {
    UnixStream::connect(socket).await.with_context(|| {
        format!(
            "cannot reach the daemon at {} (is murmurd running?)",
            socket.display()
        )
    })
}

/// HH:MM:SS (UTC) from Unix milliseconds, without pulling in a calendar
/// crate.
pub fn format_hms(unix_ms: u64) -> String {
    let secs = unix_ms / 1000;
    let h = (secs / 3600) % 24;
    let m = (secs / 60) % 60;
    let s = secs % 60;
    format!("{h:02}:{m:02}:{s:02}")
}
