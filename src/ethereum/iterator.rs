//! Pull-based cursor over a historical log query

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use futures::Stream;
use tracing::debug;

use super::backend::Backend;
use super::events::EventMatcher;
use super::{FilterOptions, LogRecord, Position, TypedEvent};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ready,
    Exhausted,
    Failed,
}

/// Block windows still to be queried
#[derive(Debug)]
struct Pages {
    next_from: u64,
    end: Option<u64>,
    page_size: Option<u64>,
    done: bool,
}

impl Pages {
    fn new(opts: FilterOptions) -> Self {
        Self {
            next_from: opts.start,
            end: opts.end,
            page_size: opts.page_size.filter(|size| *size > 0),
            done: false,
        }
    }

    fn next_window(&mut self) -> Option<(u64, Option<u64>)> {
        if self.done {
            return None;
        }

        match (self.end, self.page_size) {
            (Some(end), Some(size)) => {
                if self.next_from > end {
                    self.done = true;
                    return None;
                }
                let from = self.next_from;
                let to = from.saturating_add(size - 1).min(end);
                match to.checked_add(1) {
                    Some(next) => self.next_from = next,
                    None => self.done = true,
                }
                Some((from, Some(to)))
            }
            (end, _) => {
                self.done = true;
                Some((self.next_from, end))
            }
        }
    }
}

/// Finite, lazily advanced sequence of decoded events from one
/// [`EventStream::filter_logs`](super::events::EventStream::filter_logs) call.
///
/// `next` returns `None` once the range is exhausted or a retrieval or decode
/// error occurred; `error` tells the two apart and stays set. Ranges with a
/// page size are fetched one window at a time as the caller advances. A log
/// is never reported twice by the same iterator.
pub struct LogIterator {
    backend: Arc<dyn Backend>,
    matcher: Arc<EventMatcher>,
    pages: Pages,
    /// Window taken from `pages` whose query has not completed yet
    pending: Option<(u64, Option<u64>)>,
    buffered: VecDeque<LogRecord>,
    seen: HashSet<Position>,
    state: State,
    fail: Option<Error>,
    closed: bool,
}

impl fmt::Debug for LogIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogIterator")
            .field("event", &self.matcher.event_name())
            .field("state", &self.state)
            .field("buffered", &self.buffered.len())
            .field("closed", &self.closed)
            .finish()
    }
}

impl LogIterator {
    /// Create the cursor and run the first query so retrieval errors surface immediately
    pub(crate) async fn start(
        backend: Arc<dyn Backend>,
        matcher: Arc<EventMatcher>,
        opts: FilterOptions,
    ) -> Result<Self> {
        let mut iter = Self {
            backend,
            matcher,
            pages: Pages::new(opts),
            pending: None,
            buffered: VecDeque::new(),
            seen: HashSet::new(),
            state: State::Ready,
            fail: None,
            closed: false,
        };

        if let Some((from, to)) = iter.pages.next_window() {
            iter.fetch(from, to).await?;
        }

        Ok(iter)
    }

    async fn fetch(&mut self, from: u64, to: Option<u64>) -> Result<()> {
        let query = self.matcher.query().clone().with_range(Some(from), to);
        debug!(
            "Querying {} logs in blocks {}..{}",
            self.matcher.event_name(),
            from,
            to.map_or_else(|| "latest".to_string(), |to| to.to_string())
        );

        let logs = self.backend.filter_logs(&query).await?;
        self.buffered.extend(logs);
        Ok(())
    }

    /// Advance to the next matching event
    pub async fn next(&mut self) -> Option<TypedEvent> {
        loop {
            if self.state != State::Ready {
                return None;
            }

            if let Some(record) = self.buffered.pop_front() {
                if let Some(position) = record.position() {
                    if !self.seen.insert(position) {
                        continue;
                    }
                }

                match self.matcher.decode(record) {
                    Ok(Some(event)) => return Some(event),
                    Ok(None) => continue,
                    Err(e) => {
                        self.fail_with(e);
                        return None;
                    }
                }
            }

            // Pending until its query returns; a cancelled `next` retries it
            if self.pending.is_none() {
                self.pending = self.pages.next_window();
            }

            match self.pending {
                Some((from, to)) => {
                    let fetched = self.fetch(from, to).await;
                    self.pending = None;
                    if let Err(e) = fetched {
                        self.fail_with(e);
                        return None;
                    }
                }
                None => {
                    self.state = State::Exhausted;
                    return None;
                }
            }
        }
    }

    fn fail_with(&mut self, err: Error) {
        self.state = State::Failed;
        self.fail = Some(err);
        self.buffered.clear();
    }

    /// Retrieval or decode error that ended the iteration, if any
    pub fn error(&self) -> Option<&Error> {
        self.fail.as_ref()
    }

    /// Stop iterating and release buffered logs. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }

        self.closed = true;
        self.buffered.clear();
        self.seen.clear();
        self.pages.done = true;
        self.pending = None;
        if self.state == State::Ready {
            self.state = State::Exhausted;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Drain the remaining events, failing on the first error
    pub async fn collect_events(mut self) -> Result<Vec<TypedEvent>> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }

        match self.fail.take() {
            Some(err) => Err(err),
            None => Ok(events),
        }
    }

    /// The remaining events as a stream; a failure is yielded once, then the stream ends
    pub fn into_stream(self) -> impl Stream<Item = Result<TypedEvent>> {
        futures::stream::unfold(Some(self), |state| async move {
            let mut iter = state?;
            match iter.next().await {
                Some(event) => Some((Ok(event), Some(iter))),
                None => iter.error().cloned().map(|err| (Err(err), None)),
            }
        })
    }
}
