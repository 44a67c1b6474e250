use std::collections::HashSet;
use std::error::Error;
use std::io::Write;

use log::info;
use tokio::io::{ AsyncBufReadExt, BufReader };

use crate::models::chat::{ ChatMessage, EventKind, Role, Transcript };
use crate::session::{ ChatSession, TurnOutcome };

/// Renders one transcript entry as a single terminal line.
pub fn render_message(msg: &ChatMessage) -> String {
    let who = match msg.role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    if let Some(error) = &msg.error {
        return format!("[{}] error: {}", who, error);
    }
    match msg.event_kind {
        Some(EventKind::Status) => format!("[status] {}", msg.content),
        Some(EventKind::AwaitingFeedback) => format!("[agent] {}", msg.content),
        Some(EventKind::Visualization) => format!("[chart] {}", msg.content),
        None => format!("[{}] {}", who, msg.content),
    }
}

/// Prints settled messages exactly once, even after the transcript prunes
/// entries around them.
#[derive(Default)]
pub struct TranscriptPrinter {
    printed: HashSet<String>,
}

impl TranscriptPrinter {
    pub fn take_new(&mut self, transcript: &Transcript, include_user: bool) -> Vec<String> {
        let mut lines = Vec::new();
        for msg in transcript.visible() {
            if msg.pending || self.printed.contains(&msg.id) {
                continue;
            }
            self.printed.insert(msg.id.clone());
            if msg.role == Role::User && !include_user {
                continue;
            }
            lines.push(render_message(msg));
        }
        lines
    }

    fn print_new(&mut self, transcript: &Transcript, include_user: bool) {
        for line in self.take_new(transcript, include_user) {
            println!("{}", line);
        }
    }
}

/// What woke the REPL up while it sat at the prompt.
enum Input {
    Line(std::io::Result<Option<String>>),
    Channel(Option<TurnOutcome>),
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

pub async fn run_repl(mut session: ChatSession) -> Result<(), Box<dyn Error + Send + Sync>> {
    let abort = session.abort_handle();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            abort.abort();
        }
    });
    info!("Ctrl-C cancels the current reply, Ctrl-D exits.");

    let mut printer = TranscriptPrinter::default();
    printer.print_new(session.transcript(), true);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt();
    loop {
        let input = if session.has_open_channel() {
            tokio::select! {
                line = lines.next_line() => Input::Line(line),
                outcome = session.poll_channel() => Input::Channel(outcome),
            }
        } else {
            Input::Line(lines.next_line().await)
        };

        let outcome = match input {
            Input::Line(line) => {
                let Some(line) = line? else {
                    break;
                };
                session.submit(&line).await
            }
            Input::Channel(None) => {
                printer.print_new(session.transcript(), false);
                continue;
            }
            Input::Channel(Some(outcome)) => {
                println!();
                outcome
            }
        };

        printer.print_new(session.transcript(), false);
        match outcome {
            TurnOutcome::AwaitingInput => println!("(agent is waiting for your reply)"),
            TurnOutcome::Aborted => println!("(cancelled)"),
            TurnOutcome::Ignored | TurnOutcome::Completed | TurnOutcome::SessionClosed => {}
        }
        prompt();
    }

    session.close_channel().await;
    printer.print_new(session.transcript(), false);
    Ok(())
}
