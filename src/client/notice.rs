use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{sync::watch, task::JoinHandle, time::Instant};

/// One transient line of user-facing text. Posting replaces whatever is
/// shown and restarts the dismissal timer.
pub struct Notice {
    current: Arc<watch::Sender<Option<String>>>,
    ttl: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Notice {
    pub fn new(ttl: Duration) -> Notice {
        Notice {
            current: Arc::new(watch::Sender::new(None)),
            ttl,
            timer: Mutex::new(None),
        }
    }

    pub fn post(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::debug!(notice = %text, "notice posted");
        self.current.send_replace(Some(text));

        let current = self.current.clone();
        let deadline = Instant::now() + self.ttl;
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            current.send_replace(None);
        });
        if let Some(old) = self.timer.lock().replace(timer) {
            old.abort();
        }
    }

    pub fn dismiss(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
        self.current.send_replace(None);
    }

    pub fn current(&self) -> Option<String> {
        self.current.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Option<String>> {
        self.current.subscribe()
    }
}

impl Drop for Notice {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dismisses_after_ttl() {
        let notice = Notice::new(Duration::from_secs(3));
        notice.post("Message is empty.");
        assert_eq!(notice.current().as_deref(), Some("Message is empty."));

        tokio::time::advance(Duration::from_millis(2999)).await;
        settle().await;
        assert!(notice.current().is_some());

        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert!(notice.current().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn newer_notice_rearms_timer() {
        let notice = Notice::new(Duration::from_secs(3));
        notice.post("first");
        tokio::time::advance(Duration::from_secs(2)).await;
        notice.post("second");

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(notice.current().as_deref(), Some("second"));

        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert!(notice.current().is_none());
    }

    #[tokio::test]
    async fn dismiss_clears_immediately() {
        let notice = Notice::new(Duration::from_secs(3));
        notice.post("oops");
        notice.dismiss();
        assert!(notice.current().is_none());
    }
}
