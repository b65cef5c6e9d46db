use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Counted gate over the vault's open handles.
///
/// Every `open` registers a handle; `reset` waits here until the count drains
/// to zero before it may delete the backing file.
#[derive(Default)]
pub struct HandleGate {
    count: AtomicUsize,
    drained: Notify,
}

impl HandleGate {
    pub fn new() -> Arc<Self> {
        Arc::new(HandleGate::default())
    }

    pub fn register(self: &Arc<Self>) -> HandleGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        HandleGuard {
            gate: Arc::clone(self),
        }
    }

    pub fn active(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Wait until every registered handle has been released.
    pub async fn drained(&self) {
        loop {
            let waiter = self.drained.notified();
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            waiter.await;
        }
    }

    fn release(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }
}

pub struct HandleGuard {
    gate: Arc<HandleGate>,
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        self.gate.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn drain_waits_for_all_guards() {
        let gate = HandleGate::new();
        let guards: Vec<_> = (0..100).map(|_| gate.register()).collect();
        assert_eq!(gate.active(), 100);

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.drained().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(guards);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("gate never drained")
            .unwrap();
        assert_eq!(gate.active(), 0);
    }
}
