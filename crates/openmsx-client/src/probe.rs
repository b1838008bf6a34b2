//! Short multi-command queries run right after connecting.

use openmsx_proto::block::quote_name;
use tracing::debug;

use crate::{
    client::CommandSink,
    command::{Command, CommandHandler, TextCommand},
};

type NameFn = Box<dyn FnOnce(Option<String>) + Send>;

enum TitleStep {
    Machine,
    Title { config: String },
}

/// Asks the machine config first, then the running software's title, as
/// one handler that resubmits itself between the two replies.
struct TitleProbe<S> {
    sink: S,
    step: TitleStep,
    done: NameFn,
}

impl<S: CommandSink + Clone + 'static> CommandHandler for TitleProbe<S> {
    fn request(&self) -> String {
        match self.step {
            TitleStep::Machine => "machine_info config_name".into(),
            TitleStep::Title { .. } => "guess_title".into(),
        }
    }

    fn reply_ok(self: Box<Self>, body: String) {
        let TitleProbe { sink, step, done } = *self;
        match step {
            TitleStep::Machine => {
                let next = TitleProbe {
                    sink: sink.clone(),
                    step: TitleStep::Title { config: body },
                    done,
                };
                sink.submit(Command::custom(next));
            }
            TitleStep::Title { config } if body.is_empty() => done(Some(config)),
            TitleStep::Title { config } => done(Some(format!("{config} ({body})"))),
        }
    }

    fn reply_nok(self: Box<Self>, body: String) {
        debug!("title probe failed: {body}");
        (self.done)(None);
    }

    fn cancel(self: Box<Self>) {
        (self.done)(None);
    }
}

/// Describe the emulator behind `sink` as `CONFIG` or `CONFIG (TITLE)`.
///
/// `done` gets `None` when either query fails or the connection goes away.
pub fn probe_title<S>(sink: S, done: impl FnOnce(Option<String>) + Send + 'static)
where
    S: CommandSink + Clone + 'static,
{
    let probe = TitleProbe {
        sink: sink.clone(),
        step: TitleStep::Machine,
        done: Box::new(done),
    };
    sink.submit(Command::custom(probe));
}

/// Report the first of `candidates` the emulator knows as a debuggable.
///
/// Debuggable names changed between emulator versions (`physical VRAM`
/// versus `VRAM`); each name is tried with `debug desc` in order. `done` is
/// called exactly once, with `None` when no candidate is accepted or the
/// connection goes away.
pub fn resolve_debuggable<S>(
    sink: S,
    candidates: &[&str],
    done: impl FnOnce(Option<String>) + Send + 'static,
) where
    S: CommandSink + Clone + 'static,
{
    let mut remaining: Vec<String> = candidates.iter().rev().map(|c| c.to_string()).collect();
    match remaining.pop() {
        Some(first) => try_candidate(sink, first, remaining, Box::new(done)),
        None => done(None),
    }
}

fn try_candidate<S>(sink: S, name: String, mut rest: Vec<String>, done: NameFn)
where
    S: CommandSink + Clone + 'static,
{
    let next_sink = sink.clone();
    let request = format!("debug desc {}", quote_name(&name));
    // The reply handler owns `done`; a cancelled command drops it uncalled,
    // so cancellation is reported from a guard instead.
    let guard = DoneGuard(Some(done));
    sink.submit(
        TextCommand::new(request)
            .with_reply(move |result| {
                let mut guard = guard;
                let Some(done) = guard.0.take() else {
                    return;
                };
                match (result, rest.pop()) {
                    (Ok(_), _) => done(Some(name)),
                    (Err(_), Some(next)) => try_candidate(next_sink, next, rest, done),
                    (Err(_), None) => done(None),
                }
            })
            .into(),
    );
}

/// Calls the wrapped callback with `None` if dropped unused.
struct DoneGuard(Option<NameFn>);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        if let Some(done) = self.0.take() {
            done(None);
        }
    }
}
