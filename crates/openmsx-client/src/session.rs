//! Connection bootstrap: the queries and definitions a debugger front-end
//! sends right after adopting a connection.

use std::{collections::BTreeMap, sync::Arc};

use openmsx_proto::block::quote_name;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{client::CommandSink, command::TextCommand};

/// Emulator-side helper turning a binary string into uppercase hex.
pub const BIN2HEX_PROC: &str = concat!(
    "proc debug_bin2hex { input } {\n",
    "  set result \"\"\n",
    "  foreach i [split $input {}] {\n",
    "    append result [format %02X [scan $i %c]] \"\"\n",
    "  }\n",
    "  return $result\n",
    "}\n",
);

/// Emulator-side helper turning hex back into a binary string.
pub const HEX2BIN_PROC: &str = concat!(
    "proc debug_hex2bin { input } {\n",
    "  set result \"\"\n",
    "  foreach {h l} [split $input {}] {\n",
    "    append result [binary format H2 $h$l] \"\"\n",
    "  }\n",
    "  return $result\n",
    "}\n",
);

/// Emulator state gathered by [`bootstrap`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInfo {
    pub paused: bool,
    /// The CPU is stopped at a breakpoint.
    pub halted: bool,
    /// Debuggable names with their size in bytes (0 when unknown).
    pub debuggables: BTreeMap<String, usize>,
}

type SessionFn = Box<dyn FnOnce(SessionInfo) + Send>;

struct Progress {
    info: SessionInfo,
    /// Replies still to come before `done` runs.
    remaining: usize,
    done: Option<SessionFn>,
}

impl Progress {
    fn settle(state: &Mutex<Progress>) {
        let finished = {
            let mut progress = state.lock();
            progress.remaining = progress.remaining.saturating_sub(1);
            if progress.remaining == 0 {
                progress
                    .done
                    .take()
                    .map(|done| (done, std::mem::take(&mut progress.info)))
            } else {
                None
            }
        };
        if let Some((done, info)) = finished {
            done(info);
        }
    }
}

/// Query pause/break state, subscribe to status updates, list debuggables
/// with their sizes and define the block transfer helpers.
///
/// `done` runs after the last reply. If the connection goes away first it
/// is dropped without being called.
pub fn bootstrap<S>(sink: S, done: impl FnOnce(SessionInfo) + Send + 'static)
where
    S: CommandSink + Clone + 'static,
{
    let state = Arc::new(Mutex::new(Progress {
        info: SessionInfo::default(),
        remaining: 1,
        done: Some(Box::new(done)),
    }));

    let s = state.clone();
    sink.submit(
        TextCommand::new("set pause")
            .with_reply(move |res| {
                if let Ok(body) = res {
                    // Older emulators answer "on"; only "false" means running.
                    s.lock().info.paused = body.trim() != "false";
                }
            })
            .into(),
    );

    let s = state.clone();
    sink.submit(
        TextCommand::new("debug breaked")
            .with_reply(move |res| {
                if let Ok(body) = res {
                    s.lock().info.halted = body.trim() == "1";
                }
            })
            .into(),
    );

    sink.submit(TextCommand::new("openmsx_update enable status").into());

    let s = state.clone();
    let size_sink = sink.clone();
    sink.submit(
        TextCommand::new("debug list")
            .with_reply(move |res| match res {
                Ok(body) => {
                    let names = parse_tcl_list(&body);
                    {
                        let mut progress = s.lock();
                        progress.remaining += names.len();
                        for name in &names {
                            progress.info.debuggables.insert(name.clone(), 0);
                        }
                    }
                    for name in names {
                        let s = s.clone();
                        let key = name.clone();
                        debuggable_size(&size_sink, &name, move |size| {
                            if let Some(size) = size {
                                s.lock().info.debuggables.insert(key, size);
                            }
                            Progress::settle(&s);
                        });
                    }
                }
                Err(e) => warn!("debug list failed: {e}"),
            })
            .into(),
    );

    sink.submit(TextCommand::new(BIN2HEX_PROC).into());
    let s = state;
    sink.submit(
        TextCommand::new(HEX2BIN_PROC)
            .with_reply(move |res| {
                if let Err(e) = res {
                    warn!("defining debug_hex2bin failed: {e}");
                }
                Progress::settle(&s);
            })
            .into(),
    );
}

/// `debug size {NAME}`. `done` gets `None` on failure and is dropped
/// uncalled when the command is cancelled.
pub fn debuggable_size<S>(sink: &S, name: &str, done: impl FnOnce(Option<usize>) + Send + 'static)
where
    S: CommandSink + ?Sized,
{
    sink.submit(
        TextCommand::new(format!("debug size {}", quote_name(name)))
            .with_reply(move |res| match res {
                Ok(body) => done(body.trim().parse().ok()),
                Err(e) => {
                    debug!("debug size failed: {e}");
                    done(None)
                }
            })
            .into(),
    );
}

/// Split a Tcl list into its words. Braced and quoted words may contain
/// spaces; braces nest.
pub fn parse_tcl_list(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut chars = text.chars().peekable();
    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(&first) = chars.peek() else {
            break;
        };
        let mut word = String::new();
        match first {
            '{' => {
                chars.next();
                let mut depth = 1;
                for c in chars.by_ref() {
                    match c {
                        '{' => depth += 1,
                        '}' => depth -= 1,
                        _ => {}
                    }
                    if depth == 0 {
                        break;
                    }
                    word.push(c);
                }
            }
            '"' => {
                chars.next();
                for c in chars.by_ref() {
                    if c == '"' {
                        break;
                    }
                    word.push(c);
                }
            }
            _ => {
                while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                    word.push(c);
                }
            }
        }
        words.push(word);
    }
    words
}

/// CPU run state announced through `status` updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuStatus {
    Suspended,
    Running,
}

impl CpuStatus {
    /// Classify an update; `None` for anything but the cpu status.
    pub fn from_update(kind: &str, name: &str, message: &str) -> Option<Self> {
        if kind != "status" || name != "cpu" {
            return None;
        }
        Some(if message == "suspended" {
            Self::Suspended
        } else {
            Self::Running
        })
    }
}

/// Pause state announced through `status` updates.
pub fn pause_from_update(kind: &str, name: &str, message: &str) -> Option<bool> {
    (kind == "status" && name == "paused").then(|| message == "true")
}
