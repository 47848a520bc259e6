//! Notification hand-off between the run worker and whoever answers it.
//!
//! A notification step blocks the worker until the operator says "continue"
//! or "stop". [`notification_channel`] implements this as a rendezvous: the
//! worker sends a [`NotificationRequest`] carrying a one-shot reply channel and
//! waits on it with a hard timeout. Unanswered or abandoned requests resolve
//! to "continue".

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::time::Duration;

use tracing::{info, warn};

/// Answers a notification: `true` continues the run, `false` stops it.
pub trait Notifier: Send {
    fn notify(&self, message: &str, step_name: &str) -> bool;
}

impl<F> Notifier for F
where
    F: Fn(&str, &str) -> bool + Send,
{
    fn notify(&self, message: &str, step_name: &str) -> bool {
        self(message, step_name)
    }
}

/// Logs the message and always continues.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoContinue;

impl Notifier for AutoContinue {
    fn notify(&self, message: &str, step_name: &str) -> bool {
        info!(step = step_name, "notification: {message} (auto-continue)");
        true
    }
}

/// A pending question for the responder side.
#[derive(Debug)]
pub struct NotificationRequest {
    pub message: String,
    pub step_name: String,
    reply: SyncSender<bool>,
}

impl NotificationRequest {
    /// Answer the request. Dropping a request without answering it lets the
    /// worker continue.
    pub fn respond(self, proceed: bool) {
        if self.reply.send(proceed).is_err() {
            warn!(step = %self.step_name, "notification answered after the run gave up waiting");
        }
    }
}

/// Worker-side end of the rendezvous.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    requests: Sender<NotificationRequest>,
    timeout: Duration,
}

impl Notifier for ChannelNotifier {
    fn notify(&self, message: &str, step_name: &str) -> bool {
        let (reply, answer) = mpsc::sync_channel(1);
        let request = NotificationRequest {
            message: message.to_string(),
            step_name: step_name.to_string(),
            reply,
        };
        if self.requests.send(request).is_err() {
            warn!(step = step_name, "nobody is listening for notifications; continuing");
            return true;
        }
        match answer.recv_timeout(self.timeout) {
            Ok(proceed) => proceed,
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    step = step_name,
                    timeout_secs = self.timeout.as_secs(),
                    "notification unanswered; continuing"
                );
                true
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!(step = step_name, "notification dismissed without an answer; continuing");
                true
            }
        }
    }
}

/// Create a rendezvous: give the notifier to the interpreter and serve the
/// receiver on the thread that talks to the operator.
pub fn notification_channel(timeout: Duration) -> (ChannelNotifier, Receiver<NotificationRequest>) {
    let (requests, receiver) = mpsc::channel();
    (ChannelNotifier { requests, timeout }, receiver)
}
