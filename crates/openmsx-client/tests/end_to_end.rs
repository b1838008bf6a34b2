#![cfg(unix)]

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use ctor::ctor;
use openmsx_client::{
    BlockOutcome, BlockReadCommand, BlockWriteCommand, Client, ClientListener, TextCommand,
    command::shared_buffer,
    probe::probe_title,
    session::{CpuStatus, bootstrap},
    transport::spawn_connection,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::UnixStream,
    sync::{mpsc, oneshot},
    time::timeout,
};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[ctor]
fn init_tracing() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .compact()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

const WAIT: Duration = Duration::from_secs(5);

fn ok(body: &str) -> String {
    format!("<reply result=\"ok\">{body}</reply>\n")
}

fn answer(command: &str) -> String {
    match command {
        "set pause" => ok("false"),
        "debug breaked" => ok("0"),
        "debug list" => ok("memory {CPU regs}"),
        "debug size {memory}" => ok("65536"),
        "debug size {CPU regs}" => ok("28"),
        "machine_info config_name" => ok("C-BIOS_MSX2+"),
        "guess_title" => ok(""),
        "debug_bin2hex [ debug read_block {memory} 0 4 ]" => ok("DEADBEEF"),
        "debug break" => format!(
            "<update type=\"status\" name=\"cpu\">suspended</update>\n{}",
            ok("")
        ),
        c if c.starts_with("debug write_block ") || c.starts_with("proc ") => ok(""),
        "openmsx_update enable status" => ok(""),
        _ => "<reply result=\"nok\">invalid command name</reply>\n".to_string(),
    }
}

struct Transcript {
    commands: Vec<String>,
    closed_document: bool,
}

/// Answers up to `limit` commands, then hangs up.
async fn fake_emulator(mut stream: UnixStream, limit: usize) -> Transcript {
    let mut pending = String::new();
    let mut commands = Vec::new();
    let mut chunk = [0u8; 512];
    let _ = stream.write_all(b"<openmsx-output>\n").await;

    while commands.len() < limit {
        let n = stream.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        pending.push_str(&String::from_utf8_lossy(&chunk[..n]));
        while let Some(end) = pending.find("</command>") {
            let frame: String = pending.drain(..end + "</command>".len()).collect();
            let Some(start) = frame.find("<command>") else {
                continue;
            };
            let command = frame[start + "<command>".len()..end].to_string();
            let _ = stream.write_all(answer(&command).as_bytes()).await;
            commands.push(command);
            if commands.len() == limit {
                break;
            }
        }
    }

    Transcript {
        commands,
        closed_document: pending.contains("</openmsx-control>"),
    }
}

struct Events(mpsc::UnboundedSender<String>);

impl ClientListener for Events {
    fn connection_ready(&self) {
        let _ = self.0.send("ready".into());
    }
    fn connection_terminated(&self) {
        let _ = self.0.send("terminated".into());
    }
    fn update(&self, kind: &str, name: &str, message: &str) {
        let _ = self.0.send(format!("update {kind} {name} {message}"));
    }
}

async fn within<T>(rx: oneshot::Receiver<T>) -> Result<T> {
    Ok(timeout(WAIT, rx).await.context("timed out")??)
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<String>) -> Result<String> {
    timeout(WAIT, events.recv())
        .await
        .context("timed out")?
        .context("listener dropped")
}

fn hub_with_events() -> (Client, mpsc::UnboundedReceiver<String>) {
    let client = Client::new();
    let (tx, rx) = mpsc::unbounded_channel();
    client.subscribe(Arc::new(Events(tx)));
    (client, rx)
}

#[tokio::test]
async fn hub_drives_a_debug_session() -> Result<()> {
    let (ours, theirs) = UnixStream::pair()?;
    let emulator = tokio::spawn(fake_emulator(theirs, usize::MAX));
    let (client, mut events) = hub_with_events();
    client.connect_to_emulator(spawn_connection(ours));
    assert_eq!(next_event(&mut events).await?, "ready");

    let (tx, rx) = oneshot::channel();
    probe_title(client.clone(), move |title| {
        let _ = tx.send(title);
    });
    assert_eq!(within(rx).await?, Some("C-BIOS_MSX2+".to_string()));

    let (tx, rx) = oneshot::channel();
    bootstrap(client.clone(), move |info| {
        let _ = tx.send(info);
    });
    let info = within(rx).await?;
    assert!(!info.paused);
    assert!(!info.halted);
    assert_eq!(info.debuggables.get("memory"), Some(&65536));
    assert_eq!(info.debuggables.get("CPU regs"), Some(&28));

    let buffer = shared_buffer(8);
    let (tx, rx) = oneshot::channel();
    client.send_command(
        BlockReadCommand::new("memory", 0, 4, buffer.clone())
            .at(2)
            .on_done(move |outcome| {
                let _ = tx.send(outcome);
            }),
    );
    assert_eq!(within(rx).await?, BlockOutcome::Done);
    assert_eq!(*buffer.lock(), vec![0, 0, 0xde, 0xad, 0xbe, 0xef, 0, 0]);

    let (tx, rx) = oneshot::channel();
    let write = BlockWriteCommand::new("memory", 3, 2, &buffer.lock())?.on_done(move |outcome| {
        let _ = tx.send(outcome);
    });
    client.send_command(write);
    assert_eq!(within(rx).await?, BlockOutcome::Done);

    let (tx, rx) = oneshot::channel();
    client.send_command(TextCommand::new("debug break").with_reply(move |res| {
        let _ = tx.send(res);
    }));
    assert_eq!(
        next_event(&mut events).await?,
        "update status cpu suspended"
    );
    assert_eq!(within(rx).await?, Ok(String::new()));
    assert_eq!(
        CpuStatus::from_update("status", "cpu", "suspended"),
        Some(CpuStatus::Suspended)
    );

    let (tx, rx) = oneshot::channel();
    client.send_command(TextCommand::new("frobnicate").with_reply(move |res| {
        let _ = tx.send(res);
    }));
    assert_eq!(within(rx).await?, Err("invalid command name".to_string()));

    client.close_connection();
    assert_eq!(next_event(&mut events).await?, "terminated");
    let transcript = timeout(WAIT, emulator).await??;
    assert!(transcript.closed_document);
    assert_eq!(
        transcript.commands[..2],
        ["machine_info config_name", "guess_title"]
    );
    assert!(
        transcript
            .commands
            .contains(&"debug write_block {memory} 3 [ debug_hex2bin \"ADBE\" ]".to_string())
    );
    assert_eq!(transcript.commands.last().map(String::as_str), Some("frobnicate"));
    Ok(())
}

#[tokio::test]
async fn emulator_hanging_up_cancels_pending_commands() -> Result<()> {
    let (ours, theirs) = UnixStream::pair()?;
    let emulator = tokio::spawn(fake_emulator(theirs, 1));
    let (client, mut events) = hub_with_events();
    client.connect_to_emulator(spawn_connection(ours));
    assert_eq!(next_event(&mut events).await?, "ready");

    let (first_tx, first_rx) = oneshot::channel();
    client.send_command(TextCommand::new("set pause").with_reply(move |res| {
        let _ = first_tx.send(res);
    }));
    let buffer = shared_buffer(4);
    let (second_tx, second_rx) = oneshot::channel();
    client.send_command(
        BlockReadCommand::new("memory", 0, 4, buffer.clone()).on_done(move |outcome| {
            let _ = second_tx.send(outcome);
        }),
    );

    assert_eq!(within(first_rx).await?, Ok("false".to_string()));
    assert_eq!(within(second_rx).await?, BlockOutcome::Cancelled);
    assert_eq!(*buffer.lock(), vec![0; 4]);
    assert_eq!(next_event(&mut events).await?, "terminated");
    assert!(!client.is_connected());

    // Commands sent afterwards are cancelled on the spot.
    let (tx, mut rx) = oneshot::channel();
    client.send_command(
        BlockReadCommand::new("memory", 0, 4, buffer).on_done(move |outcome| {
            let _ = tx.send(outcome);
        }),
    );
    assert_eq!(rx.try_recv()?, BlockOutcome::Cancelled);

    let transcript = timeout(WAIT, emulator).await??;
    assert_eq!(transcript.commands, vec!["set pause"]);
    Ok(())
}
