//! Event filtering and log decoding
//!
//! An event's topic 0 is its signature hash (absent for anonymous events) and
//! each following topic holds one indexed parameter. Filters are built slot by
//! slot from per-field accepted-value sets; non-indexed fields only exist in
//! the data payload and are recovered by decoding.

use std::sync::Arc;

use alloy::dyn_abi::{DynSolValue, EventExt, Specifier};
use alloy::json_abi::{Event, EventParam, JsonAbi};
use alloy::primitives::{keccak256, Address, B256};
use alloy::sol_types::SolEvent;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::backend::{Backend, LogQuery};
use super::iterator::LogIterator;
use super::subscription::LogSubscription;
use super::{FilterOptions, LogRecord, TypedEvent, WatchOptions};
use crate::error::{Error, Result};

/// Indexed field a filter rule applies to
#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldRef {
    Name(String),
    Position(usize),
}

/// Event name plus accepted values for its indexed fields.
///
/// A field with no rule, or with an empty value set, matches anything.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCriteria {
    event: String,
    rules: Vec<(FieldRef, Vec<DynSolValue>)>,
}

impl FilterCriteria {
    /// `event` is a name, or a full signature for overloaded events
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            rules: Vec::new(),
        }
    }

    /// Accept only these values for the indexed field `name`
    pub fn field(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = DynSolValue>,
    ) -> Self {
        self.rules
            .push((FieldRef::Name(name.into()), values.into_iter().collect()));
        self
    }

    /// Accept only these values for the `position`-th indexed field
    pub fn indexed(mut self, position: usize, values: impl IntoIterator<Item = DynSolValue>) -> Self {
        self.rules
            .push((FieldRef::Position(position), values.into_iter().collect()));
        self
    }

    pub fn event(&self) -> &str {
        &self.event
    }
}

/// Look up an event by name or full signature
pub fn resolve_event<'a>(abi: &'a JsonAbi, name: &str) -> Result<&'a Event> {
    if name.contains('(') {
        return abi
            .events()
            .find(|event| event.signature() == name)
            .ok_or_else(|| unknown_event(abi, name));
    }

    match abi.event(name).map(Vec::as_slice) {
        Some([event]) => Ok(event),
        Some(overloads) if !overloads.is_empty() => {
            let signatures: Vec<String> = overloads.iter().map(Event::signature).collect();
            Err(Error::encoding(format!(
                "Event '{}' is overloaded, use a full signature: {}",
                name,
                signatures.join(", ")
            )))
        }
        _ => Err(unknown_event(abi, name)),
    }
}

fn unknown_event(abi: &JsonAbi, name: &str) -> Error {
    let available: Vec<String> = abi.events().map(|event| event.name.clone()).collect();

    if available.is_empty() {
        Error::encoding(format!(
            "Event '{}' not found. The contract ABI declares no events.",
            name
        ))
    } else {
        Error::encoding(format!(
            "Event '{}' not found in contract ABI. Available events: {}",
            name,
            available.join(", ")
        ))
    }
}

/// Build the per-slot topic sets for `criteria` against `event`
pub fn build_topics(event: &Event, criteria: &FilterCriteria) -> Result<Vec<Vec<B256>>> {
    let indexed: Vec<&EventParam> = event.inputs.iter().filter(|p| p.indexed).collect();
    let offset = usize::from(!event.anonymous);

    let mut topics = vec![Vec::new(); offset + indexed.len()];
    if !event.anonymous {
        topics[0].push(event.selector());
    }

    for (field, values) in &criteria.rules {
        let position = match field {
            FieldRef::Position(position) if *position < indexed.len() => *position,
            FieldRef::Position(position) => {
                return Err(Error::encoding(format!(
                    "Event '{}' has {} indexed fields, no indexed field #{}",
                    event.name,
                    indexed.len(),
                    position
                )))
            }
            FieldRef::Name(name) => match indexed.iter().position(|p| &p.name == name) {
                Some(position) => position,
                None if event.inputs.iter().any(|p| &p.name == name) => {
                    return Err(Error::encoding(format!(
                        "Field '{}' of event '{}' is not indexed and cannot be filtered on",
                        name, event.name
                    )))
                }
                None => {
                    return Err(Error::encoding(format!(
                        "Event '{}' has no field named '{}'",
                        event.name, name
                    )))
                }
            },
        };

        let slot = &mut topics[offset + position];
        for value in values {
            let topic = encode_topic(indexed[position], value)?;
            if !slot.contains(&topic) {
                slot.push(topic);
            }
        }
    }

    while topics.last().is_some_and(Vec::is_empty) {
        topics.pop();
    }

    Ok(topics)
}

/// Encode one value the way the EVM stores it in an indexed topic
pub fn encode_topic(param: &EventParam, value: &DynSolValue) -> Result<B256> {
    let ty = param.resolve().map_err(|e| {
        Error::encoding(format!(
            "Cannot resolve type '{}' of field '{}': {}",
            param.ty, param.name, e
        ))
    })?;

    if !ty.matches(value) {
        return Err(Error::encoding(format!(
            "Filter value {:?} does not match type '{}' of field '{}'",
            value, param.ty, param.name
        )));
    }

    match value {
        DynSolValue::String(s) => Ok(keccak256(s.as_bytes())),
        DynSolValue::Bytes(b) => Ok(keccak256(b)),
        other => other.as_word().ok_or_else(|| {
            Error::encoding(format!(
                "Indexed field '{}' of type '{}' cannot be filtered on",
                param.name, param.ty
            ))
        }),
    }
}

/// Decode `record` against `event`. Performs no I/O.
pub fn parse_log(event: &Event, record: &LogRecord) -> Result<TypedEvent> {
    let fields = decode_fields(event, record)?;
    Ok(TypedEvent {
        name: event.name.clone(),
        fields,
        raw: record.clone(),
    })
}

fn decode_fields(event: &Event, record: &LogRecord) -> Result<Vec<(String, DynSolValue)>> {
    let indexed_count = event.inputs.iter().filter(|p| p.indexed).count();
    let expected_topics = indexed_count + usize::from(!event.anonymous);

    if !event.anonymous {
        let selector = event.selector();
        match record.topic0() {
            Some(topic) if *topic == selector => {}
            Some(topic) => {
                return Err(Error::decoding(format!(
                    "Log topic {} does not match signature {} of event {}",
                    topic,
                    selector,
                    event.signature()
                )))
            }
            None => {
                return Err(Error::decoding(format!(
                    "Log has no topics, expected signature of event {}",
                    event.signature()
                )))
            }
        }
    }

    if record.topics.len() != expected_topics {
        return Err(Error::decoding(format!(
            "Event {} expects {} topics, log has {}",
            event.signature(),
            expected_topics,
            record.topics.len()
        )));
    }

    let decoded = event
        .decode_log_parts(record.topics.iter().copied(), &record.data, true)
        .map_err(|e| {
            Error::decoding(format!("Failed to decode event {}: {}", event.signature(), e))
        })?;

    let mut indexed = decoded.indexed.into_iter();
    let mut body = decoded.body.into_iter();

    event
        .inputs
        .iter()
        .enumerate()
        .map(|(i, param)| {
            let value = if param.indexed {
                indexed.next()
            } else {
                body.next()
            };
            let name = if param.name.is_empty() {
                i.to_string()
            } else {
                param.name.clone()
            };
            value.map(|value| (name, value)).ok_or_else(|| {
                Error::decoding(format!(
                    "Event {} decoded fewer values than it declares",
                    event.signature()
                ))
            })
        })
        .collect()
}

/// Decode `record` into a `sol!`-generated event type
pub fn decode_log_as<E: SolEvent>(record: &LogRecord) -> Result<E> {
    if !E::ANONYMOUS && record.topic0() != Some(&E::SIGNATURE_HASH) {
        return Err(Error::decoding(format!(
            "Log is not a {} event",
            E::SIGNATURE
        )));
    }

    E::decode_raw_log(record.topics.iter().copied(), &record.data, true)
        .map_err(|e| Error::decoding(format!("Failed to decode {}: {}", E::SIGNATURE, e)))
}

/// Decoder plus topic filter shared by an iterator or subscription
#[derive(Debug)]
pub(crate) struct EventMatcher {
    event: Event,
    query: LogQuery,
}

impl EventMatcher {
    pub(crate) fn new(event: Event, query: LogQuery) -> Self {
        Self { event, query }
    }

    pub(crate) fn query(&self) -> &LogQuery {
        &self.query
    }

    pub(crate) fn event_name(&self) -> &str {
        &self.event.name
    }

    /// Decode a delivered log. Logs from other contracts, of other events or
    /// outside the accepted topic sets are skipped; a log that passes the
    /// filter but does not decode is an error.
    pub(crate) fn decode(&self, record: LogRecord) -> Result<Option<TypedEvent>> {
        if record.address != self.query.address {
            trace!("Skipping log from {:?}", record.address);
            return Ok(None);
        }

        // Topic 0 is part of the query, so other events of the contract are skipped here
        if !self.query.matches_topics(&record) {
            trace!("Skipping {} log outside the filter", self.event.name);
            return Ok(None);
        }

        let fields = decode_fields(&self.event, &record)?;

        Ok(Some(TypedEvent {
            name: self.event.name.clone(),
            fields,
            raw: record,
        }))
    }
}

/// Log retrieval side of a contract binding
#[derive(Clone)]
pub struct EventStream {
    address: Address,
    abi: Arc<JsonAbi>,
    backend: Arc<dyn Backend>,
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl EventStream {
    pub fn new(address: Address, abi: Arc<JsonAbi>, backend: Arc<dyn Backend>) -> Self {
        Self {
            address,
            abi,
            backend,
        }
    }

    pub fn event(&self, name: &str) -> Result<&Event> {
        resolve_event(&self.abi, name)
    }

    /// Backend query for `criteria`, without a block range
    pub fn query(&self, criteria: &FilterCriteria) -> Result<LogQuery> {
        let event = self.event(criteria.event())?;
        Ok(LogQuery {
            address: self.address,
            topics: build_topics(event, criteria)?,
            from_block: None,
            to_block: None,
        })
    }

    fn matcher(&self, criteria: &FilterCriteria) -> Result<Arc<EventMatcher>> {
        let event = self.event(criteria.event())?.clone();
        let query = self.query(criteria)?;
        Ok(Arc::new(EventMatcher::new(event, query)))
    }

    /// Historical query over `opts`' block range
    pub async fn filter_logs(
        &self,
        mut opts: FilterOptions,
        criteria: &FilterCriteria,
    ) -> Result<LogIterator> {
        let matcher = self.matcher(criteria)?;

        // Paging an open range pins it to the current head
        if opts.page_size.is_some() && opts.end.is_none() {
            let head = self.backend.block_number().await?;
            debug!("Resolved open log range to head block {}", head);
            opts.end = Some(head);
        }

        debug!(
            "Filtering {} logs of {:?} from block {}",
            matcher.event_name(),
            self.address,
            opts.start
        );
        LogIterator::start(self.backend.clone(), matcher, opts).await
    }

    /// Live feed of matching logs, decoded and pushed into `sink`
    pub async fn watch_logs(
        &self,
        opts: WatchOptions,
        criteria: &FilterCriteria,
        sink: mpsc::Sender<TypedEvent>,
    ) -> Result<LogSubscription> {
        let matcher = self.matcher(criteria)?;
        let query = matcher.query().clone().with_range(opts.start, None);
        let feed = self.backend.watch_logs(&query).await?;
        Ok(LogSubscription::spawn(feed, matcher, sink))
    }

    pub fn parse_log(&self, event: &str, record: &LogRecord) -> Result<TypedEvent> {
        parse_log(self.event(event)?, record)
    }
}
