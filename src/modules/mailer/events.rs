use std::sync::Mutex;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::error;

/// Observable side effects of orchestrator operations, dispatched after the
/// committing write and in commit order per account.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MailEvent {
    AccountAdded {
        address: String,
    },
    AccountUpdated {
        address: String,
    },
    AccountDeleted {
        address: String,
    },
    FolderCreated {
        account_address: String,
        path: String,
    },
    FolderRenamed {
        account_address: String,
        old_path: String,
        new_path: String,
    },
    FolderDeleted {
        account_address: String,
        path: String,
    },
    ContactAdded {
        address: String,
    },
    ContactChanged {
        address: String,
    },
    ContactDeleted {
        address: String,
    },
}

/// Post-commit event fan-out. A subscriber that went away is dropped and
/// logged; it never affects the originating write.
#[derive(Default)]
pub struct EventChannel {
    subscribers: Mutex<Vec<UnboundedSender<MailEvent>>>,
}

impl EventChannel {
    pub fn new() -> Self {
        EventChannel::default()
    }

    pub fn subscribe(&self) -> UnboundedReceiver<MailEvent> {
        let (sender, receiver) = unbounded_channel();
        self.subscribers.lock().unwrap().push(sender);
        receiver
    }

    pub fn emit(&self, event: MailEvent) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|subscriber| match subscriber.send(event.clone()) {
            Ok(()) => true,
            Err(e) => {
                error!("Dropping event listener after send failure: {:#?}", e);
                false
            }
        });
    }

    pub fn emit_all(&self, events: impl IntoIterator<Item = MailEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}
