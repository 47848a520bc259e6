//! Terminal side of a run: answers notification prompts and turns operator
//! commands into stop requests.
//!
//! Stdin lines and notification requests arrive on one event channel so a
//! single loop can tell a prompt answer from a stray `q`.

use std::io::{BufRead, Write};
use std::sync::mpsc::{Receiver, Sender};
use std::thread::{self, JoinHandle};

use tracing::{debug, info};

use crate::notify::NotificationRequest;
use crate::stop::StopHandle;

/// Something the operator loop has to react to.
#[derive(Debug)]
pub enum OperatorEvent {
    Notification(NotificationRequest),
    Line(String),
    /// Stdin reached end of file or failed.
    InputClosed,
    /// The worker dropped its notifier; nothing else will be asked.
    RunFinished,
}

/// `q`, `quit`, or `stop`, case-insensitive.
pub fn is_stop_command(line: &str) -> bool {
    matches!(
        line.trim().to_ascii_lowercase().as_str(),
        "q" | "quit" | "stop"
    )
}

/// Whether a prompt answer declines to continue.
fn declines(line: &str) -> bool {
    is_stop_command(line)
        || matches!(
            line.trim().to_ascii_lowercase().as_str(),
            "n" | "no" | "s"
        )
}

/// Forward notification requests as events, then report [`OperatorEvent::RunFinished`].
pub fn forward_requests(
    requests: Receiver<NotificationRequest>,
    events: Sender<OperatorEvent>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        for request in requests {
            if events.send(OperatorEvent::Notification(request)).is_err() {
                return;
            }
        }
        let _ = events.send(OperatorEvent::RunFinished);
    })
}

/// Read lines from `input` until it closes. The thread may outlive the run
/// while blocked on a read.
pub fn spawn_line_reader<R>(input: R, events: Sender<OperatorEvent>) -> JoinHandle<()>
where
    R: BufRead + Send + 'static,
{
    thread::spawn(move || {
        for line in input.lines() {
            let Ok(line) = line else { break };
            if events.send(OperatorEvent::Line(line)).is_err() {
                return;
            }
        }
        let _ = events.send(OperatorEvent::InputClosed);
    })
}

/// Serve events until the run finishes.
///
/// A line answers the pending prompt if there is one; otherwise a stop command
/// requests a cooperative stop through `stop`. With `auto_continue`, or once
/// input has closed, every notification is answered "continue".
pub fn serve<W: Write>(
    events: Receiver<OperatorEvent>,
    stop: &StopHandle,
    auto_continue: bool,
    out: &mut W,
) {
    let mut pending: Option<NotificationRequest> = None;
    let mut input_open = true;
    for event in events {
        match event {
            OperatorEvent::Notification(request) => {
                if auto_continue || !input_open {
                    request.respond(true);
                    continue;
                }
                let _ = write!(
                    out,
                    "[{}] {}\nContinue? [Y/n] ",
                    request.step_name, request.message
                );
                let _ = out.flush();
                pending = Some(request);
            }
            OperatorEvent::Line(line) => {
                if let Some(request) = pending.take() {
                    request.respond(!declines(&line));
                } else if is_stop_command(&line) {
                    info!("stop requested by operator");
                    stop.stop();
                    let _ = writeln!(out, "stopping after the current step");
                } else if !line.trim().is_empty() {
                    debug!(%line, "ignoring operator input");
                    let _ = writeln!(out, "type q and Enter to stop the run");
                }
            }
            OperatorEvent::InputClosed => {
                input_open = false;
                if let Some(request) = pending.take() {
                    request.respond(true);
                }
            }
            OperatorEvent::RunFinished => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;
    use crate::notify::{Notifier, notification_channel};

    /// Run `notify` on a worker thread and hand back its pending request.
    fn ask(message: &'static str) -> (JoinHandle<bool>, NotificationRequest) {
        let (notifier, requests) = notification_channel(Duration::from_secs(5));
        let worker = thread::spawn(move || notifier.notify(message, "check"));
        let request = requests.recv().expect("request");
        (worker, request)
    }

    #[test]
    fn stop_commands_are_recognized() {
        for line in ["q", "Q\n", " stop ", "quit"] {
            assert!(is_stop_command(line), "{line:?}");
        }
        for line in ["", "n", "quitter", "s"] {
            assert!(!is_stop_command(line), "{line:?}");
        }
        assert!(declines("n"));
        assert!(declines("S"));
        assert!(!declines(""));
        assert!(!declines("y"));
    }

    #[test]
    fn stop_command_outside_a_prompt_requests_stop() {
        let (events, inbox) = mpsc::channel();
        events.send(OperatorEvent::Line("hello".to_string())).expect("send");
        events.send(OperatorEvent::Line("q".to_string())).expect("send");
        events.send(OperatorEvent::RunFinished).expect("send");
        let stop = StopHandle::new();
        let mut out = Vec::new();

        serve(inbox, &stop, false, &mut out);

        assert!(stop.is_requested());
        let out = String::from_utf8(out).expect("utf8");
        assert!(out.contains("type q and Enter"), "{out}");
        assert!(out.contains("stopping after the current step"), "{out}");
    }

    #[test]
    fn line_answers_the_pending_prompt_instead_of_stopping() {
        let (worker, request) = ask("Boss reached");
        let (events, inbox) = mpsc::channel();
        events.send(OperatorEvent::Notification(request)).expect("send");
        events.send(OperatorEvent::Line("stop".to_string())).expect("send");
        events.send(OperatorEvent::RunFinished).expect("send");
        let stop = StopHandle::new();
        let mut out = Vec::new();

        serve(inbox, &stop, false, &mut out);

        assert!(!worker.join().expect("join"));
        assert!(!stop.is_requested());
        let out = String::from_utf8(out).expect("utf8");
        assert!(out.starts_with("[check] Boss reached"), "{out}");
    }

    #[test]
    fn closed_input_and_auto_continue_answer_continue() {
        let (worker, request) = ask("first");
        let (events, inbox) = mpsc::channel();
        events.send(OperatorEvent::Notification(request)).expect("send");
        events.send(OperatorEvent::InputClosed).expect("send");
        events.send(OperatorEvent::RunFinished).expect("send");
        serve(inbox, &StopHandle::new(), false, &mut Vec::new());
        assert!(worker.join().expect("join"));

        let (worker, request) = ask("second");
        let (events, inbox) = mpsc::channel();
        events.send(OperatorEvent::Notification(request)).expect("send");
        events.send(OperatorEvent::RunFinished).expect("send");
        let mut out = Vec::new();
        serve(inbox, &StopHandle::new(), true, &mut out);
        assert!(worker.join().expect("join"));
        assert!(out.is_empty());
    }

    #[test]
    fn reader_forwards_lines_then_reports_closed_input() {
        let (events, inbox) = mpsc::channel();
        spawn_line_reader(Cursor::new("a\nq\n"), events)
            .join()
            .expect("join");
        let received: Vec<OperatorEvent> = inbox.iter().collect();
        assert_eq!(received.len(), 3);
        assert!(matches!(&received[0], OperatorEvent::Line(l) if l == "a"));
        assert!(matches!(&received[1], OperatorEvent::Line(l) if l == "q"));
        assert!(matches!(received[2], OperatorEvent::InputClosed));
    }

    #[test]
    fn forwarder_reports_run_finished_once_notifier_is_gone() {
        let (notifier, requests) = notification_channel(Duration::from_secs(5));
        let (events, inbox) = mpsc::channel();
        let forwarder = forward_requests(requests, events);
        drop(notifier);
        forwarder.join().expect("join");
        let received: Vec<OperatorEvent> = inbox.iter().collect();
        assert_eq!(received.len(), 1);
        assert!(matches!(received[0], OperatorEvent::RunFinished));
    }
}
