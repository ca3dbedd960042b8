//! Push-based delivery of live event logs

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::LogFeed;
use super::events::EventMatcher;
use super::TypedEvent;
use crate::error::{BackendError, Error, Result};

/// Live event feed decoded into a consumer's channel.
///
/// Delivery runs on its own task until the caller unsubscribes, the consumer
/// drops the receiving end, or the feed fails. A backend error or an
/// undecodable log ends delivery and is reported once through [`err`].
///
/// [`err`]: LogSubscription::err
#[derive(Debug)]
pub struct LogSubscription {
    quit: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<()>>>,
}

impl LogSubscription {
    pub(crate) fn spawn(
        feed: LogFeed,
        matcher: Arc<EventMatcher>,
        sink: mpsc::Sender<TypedEvent>,
    ) -> Self {
        let (quit_tx, quit_rx) = oneshot::channel();
        info!("Watching {} logs", matcher.event_name());
        let task = tokio::spawn(deliver(feed, matcher, sink, quit_rx));

        Self {
            quit: Some(quit_tx),
            task: Some(task),
        }
    }

    /// Wait for delivery to end and take its terminal error.
    ///
    /// Resolves to `None` after a clean shutdown and on every call after the
    /// first. Pending forever while the feed is healthy.
    pub async fn err(&mut self) -> Option<Error> {
        let task = self.task.as_mut()?;
        let outcome = task.await;
        self.task = None;

        match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(e) => Some(Error::Subscription(BackendError::new(format!(
                "Log delivery task failed: {}",
                e
            )))),
        }
    }

    /// Receive the next event from the sink handed to `watch_logs`.
    ///
    /// Events already queued are returned first. Once delivery has ended and
    /// the sink is drained, the terminal error is returned, or `Ok(None)` after
    /// a clean shutdown. The caller must not keep its own clone of the sink.
    pub async fn recv(
        &mut self,
        events: &mut mpsc::Receiver<TypedEvent>,
    ) -> Result<Option<TypedEvent>> {
        match events.recv().await {
            Some(event) => Ok(Some(event)),
            None => self.err().await.map_or(Ok(None), Err),
        }
    }

    /// Stop delivery and release the backend feed, waiting for the loop to exit.
    /// A terminal error that has not been taken yet is discarded.
    pub async fn unsubscribe(&mut self) {
        if let Some(quit) = self.quit.take() {
            let _ = quit.send(());
        }

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Log delivery task failed during unsubscribe: {}", e);
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        if let Some(quit) = self.quit.take() {
            let _ = quit.send(());
        }
    }
}

/// Delivery loop. Termination signals win over pending logs, and a backend
/// error wins over a quit that arrives at the same time.
async fn deliver(
    mut feed: LogFeed,
    matcher: Arc<EventMatcher>,
    sink: mpsc::Sender<TypedEvent>,
    mut quit: oneshot::Receiver<()>,
) -> Result<()> {
    let outcome = loop {
        tokio::select! {
            biased;

            Some(err) = feed.errors.recv() => break Err(Error::Subscription(err)),
            _ = &mut quit => break Ok(()),
            received = feed.logs.recv() => {
                let Some(record) = received else {
                    break Err(Error::Subscription(BackendError::new(
                        "Log feed closed by backend",
                    )));
                };

                let event = match matcher.decode(record) {
                    Ok(Some(event)) => event,
                    Ok(None) => continue,
                    Err(e) => break Err(e),
                };

                tokio::select! {
                    biased;

                    Some(err) = feed.errors.recv() => break Err(Error::Subscription(err)),
                    _ = &mut quit => break Ok(()),
                    sent = sink.send(event) => {
                        if sent.is_err() {
                            debug!("Consumer dropped the {} sink", matcher.event_name());
                            break Ok(());
                        }
                    }
                }
            }
        }
    };

    feed.unsubscribe();

    match &outcome {
        Ok(()) => info!("Stopped watching {} logs", matcher.event_name()),
        Err(e) => warn!("Watching {} logs failed: {}", matcher.event_name(), e),
    }

    outcome
}
