use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use openmsx_client::{
    BlockOutcome, BlockReadCommand, BlockWriteCommand, Client, ClientListener, Command, Connection,
    TextCommand,
    command::shared_buffer,
    discovery,
    probe::probe_title,
    session::{CpuStatus, SessionInfo, bootstrap},
    transport,
};
use openmsx_proto::framing::escape_xml;
use tokio::sync::{Notify, oneshot};
use tracing::{Level, debug, info};
use tracing_subscriber::FmtSubscriber;

/// openMSX debug client
#[derive(Parser, Debug)]
#[command(name = "openmsx-debug")]
#[command(about = "Talk to a running openMSX emulator over its control socket", long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: Level,

    /// Connect to this socket instead of discovering one
    #[arg(long, conflicts_with = "port")]
    socket: Option<PathBuf>,

    /// Connect to 127.0.0.1:PORT instead of discovering a socket
    #[arg(long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List running emulators
    List,
    /// Show pause/break state and the debuggables
    Info,
    /// Run a Tcl command and print its result
    Exec {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        words: Vec<String>,
    },
    /// Hex dump part of a debuggable
    Read {
        debuggable: String,
        #[arg(value_parser = parse_number)]
        offset: usize,
        #[arg(value_parser = parse_number)]
        size: usize,
    },
    /// Write hex bytes into a debuggable
    Write {
        debuggable: String,
        #[arg(value_parser = parse_number)]
        offset: usize,
        hex: String,
    },
    /// Print log and status updates until interrupted
    Monitor,
}

/// Decimal, or hex with a `0x` or `$` prefix.
fn parse_number(s: &str) -> Result<usize, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix('$')) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number {s:?}: {e}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Cmd::List = args.command {
        return list().await;
    }

    let client = Client::instance();
    client.connect_to_emulator(connect(&args).await?);

    let result = match args.command {
        Cmd::List => Ok(()),
        Cmd::Info => show_info(client).await,
        Cmd::Exec { words } => exec(client, exec_request(&words)).await,
        Cmd::Read {
            debuggable,
            offset,
            size,
        } => read(client, &debuggable, offset, size).await,
        Cmd::Write {
            debuggable,
            offset,
            hex,
        } => write(client, &debuggable, offset, &hex).await,
        Cmd::Monitor => monitor(client).await,
    };
    client.close_connection();
    result
}

async fn connect(args: &Args) -> anyhow::Result<Arc<Connection>> {
    if let Some(path) = &args.socket {
        #[cfg(unix)]
        return Ok(transport::connect_unix(path).await?);
        #[cfg(not(unix))]
        bail!("--socket is not supported here, use --port ({})", path.display());
    }
    if let Some(port) = args.port {
        return Ok(transport::connect_tcp(SocketAddr::from(([127, 0, 0, 1], port))).await?);
    }

    let servers = discovery::collect_servers().await;
    if servers.len() > 1 {
        for (endpoint, conn) in &servers {
            eprintln!("  {}", endpoint.path().display());
            conn.close();
        }
    }
    let (endpoint, conn) = discovery::select_single(servers)?;
    info!("Using {}", endpoint.path().display());
    Ok(conn)
}

async fn list() -> anyhow::Result<()> {
    let servers = discovery::collect_servers().await;
    if servers.is_empty() {
        println!("no running emulators in {}", discovery::socket_dir().display());
        return Ok(());
    }
    for (endpoint, conn) in servers {
        let (tx, rx) = oneshot::channel();
        probe_title(conn.clone(), move |title| {
            let _ = tx.send(title);
        });
        let title = rx.await.ok().flatten();
        conn.close();
        let pid = endpoint
            .pid()
            .map_or_else(|| "?".to_string(), |p| p.to_string());
        match title {
            Some(title) => println!("{pid}\t{}\t{title}", endpoint.path().display()),
            None => println!("{pid}\t{}\t(not responding)", endpoint.path().display()),
        }
    }
    Ok(())
}

/// Send `text` and wait for the reply.
async fn ask(client: &Client, text: impl Into<String>) -> anyhow::Result<Result<String, String>> {
    let (tx, rx) = oneshot::channel();
    client.send_command(TextCommand::new(text).with_reply(move |res| {
        let _ = tx.send(res);
    }));
    rx.await.context("connection closed before the reply arrived")
}

async fn session(client: &Client) -> anyhow::Result<SessionInfo> {
    let (tx, rx) = oneshot::channel();
    bootstrap(client.clone(), move |info| {
        let _ = tx.send(info);
    });
    rx.await.context("connection closed during setup")
}

async fn show_info(client: &Client) -> anyhow::Result<()> {
    let info = session(client).await?;
    println!("paused: {}", info.paused);
    println!("halted: {}", info.halted);
    for (name, size) in &info.debuggables {
        println!("{size:>10}  {name}");
    }
    Ok(())
}

async fn exec(client: &Client, text: String) -> anyhow::Result<()> {
    debug!("exec: {text}");
    match ask(client, text).await? {
        Ok(body) => {
            println!("{body}");
            Ok(())
        }
        Err(body) => bail!("{body}"),
    }
}

async fn read(client: &Client, debuggable: &str, offset: usize, size: usize) -> anyhow::Result<()> {
    session(client).await?;
    let buffer = shared_buffer(size);
    let (tx, rx) = oneshot::channel();
    let name = escape_xml(debuggable);
    client.send_command(
        BlockReadCommand::new(&name, offset, size, buffer.clone()).on_done(move |outcome| {
            let _ = tx.send(outcome);
        }),
    );
    match rx.await.context("connection closed")? {
        BlockOutcome::Done => {
            print!("{}", hex_dump(offset, &buffer.lock()));
            Ok(())
        }
        BlockOutcome::Failed(reason) => bail!("read failed: {reason}"),
        BlockOutcome::Cancelled => bail!("read cancelled"),
    }
}

async fn write(client: &Client, debuggable: &str, offset: usize, text: &str) -> anyhow::Result<()> {
    let data = hex::decode(text.trim()).context("invalid hex data")?;
    session(client).await?;
    let (tx, rx) = oneshot::channel();
    let name = escape_xml(debuggable);
    let cmd = BlockWriteCommand::from_bytes(&name, offset, &data).on_done(move |o| {
        let _ = tx.send(o);
    });
    client.send_command(cmd);
    match rx.await.context("connection closed")? {
        BlockOutcome::Done => Ok(()),
        BlockOutcome::Failed(reason) => bail!("write failed: {reason}"),
        BlockOutcome::Cancelled => bail!("write cancelled"),
    }
}

/// User-typed words as command text, with XML markup characters escaped.
fn exec_request(words: &[String]) -> String {
    escape_xml(&words.join(" "))
}

fn hex_dump(base: usize, data: &[u8]) -> String {
    let mut out = String::new();
    for (i, line) in data.chunks(16).enumerate() {
        let bytes: Vec<String> = line.iter().map(|b| format!("{b:02X}")).collect();
        let ascii: String = line
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        out.push_str(&format!(
            "{:06X}  {:<47}  {ascii}\n",
            base + i * 16,
            bytes.join(" ")
        ));
    }
    out
}

struct Printer {
    terminated: Arc<Notify>,
}

impl ClientListener for Printer {
    fn connection_terminated(&self) {
        self.terminated.notify_one();
    }

    fn log(&self, level: &str, message: &str) {
        println!("[{level}] {message}");
    }

    fn update(&self, kind: &str, name: &str, message: &str) {
        match CpuStatus::from_update(kind, name, message) {
            Some(CpuStatus::Suspended) => println!("cpu: break"),
            Some(CpuStatus::Running) => println!("cpu: running"),
            None => println!("{kind} {name}: {message}"),
        }
    }
}

async fn monitor(client: &Client) -> anyhow::Result<()> {
    let terminated = Arc::new(Notify::new());
    let subscription = client.subscribe(Arc::new(Printer {
        terminated: terminated.clone(),
    }));
    let info = session(client).await?;
    println!(
        "connected: {}, {}",
        if info.paused { "paused" } else { "not paused" },
        if info.halted { "in break" } else { "running" }
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        _ = terminated.notified() => println!("emulator went away"),
    }
    client.unsubscribe(subscription);
    Ok(())
}
