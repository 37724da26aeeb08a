//! Provenance and timing chain carried alongside messages.
//!
//! Each hop a message passes through appends its source (id, index) and a
//! nanosecond timestamp. Both lists are bounded by
//! [`MESSAGE_HISTORY_LENGTH`].

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Result, WireError};
use crate::input::WireIn;
use crate::out::WireOut;
use crate::value::{Marshallable, ReadMarshallable, WriteMarshallable};

/// Maximum number of sources, and separately of timings.
pub const MESSAGE_HISTORY_LENGTH: usize = 128;

/// Nanosecond clock used to stamp timings.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

fn wall_clock_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
}

/// Where the message currently being read came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceContext {
    pub source_id: i32,
    pub index: i64,
}

#[derive(Clone)]
pub struct MessageHistory {
    sources: Vec<(i32, i64)>,
    timings: Vec<i64>,
    add_source_details: bool,
    source_context: Option<SourceContext>,
    clock: Clock,
}

impl Default for MessageHistory {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            timings: Vec::new(),
            add_source_details: false,
            source_context: None,
            clock: Arc::new(wall_clock_nanos),
        }
    }
}

impl MessageHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the clock used for timings.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> i64 {
        (self.clock)()
    }

    pub fn add_source(&mut self, id: i32, index: i64) -> Result<()> {
        if self.sources.len() >= MESSAGE_HISTORY_LENGTH {
            return Err(WireError::CapacityExceeded {
                what: "message history sources",
                max: MESSAGE_HISTORY_LENGTH,
            });
        }
        self.sources.push((id, index));
        Ok(())
    }

    pub fn add_timing(&mut self, nanos: i64) -> Result<()> {
        if self.timings.len() >= MESSAGE_HISTORY_LENGTH {
            return Err(WireError::CapacityExceeded {
                what: "message history timings",
                max: MESSAGE_HISTORY_LENGTH,
            });
        }
        self.timings.push(nanos);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.sources.clear();
        self.timings.clear();
    }

    /// Start over from a single source, timed now.
    pub fn reset_with(&mut self, source_id: i32, index: i64) {
        self.reset();
        self.sources.push((source_id, index));
        let now = self.now();
        self.timings.push(now);
    }

    /// Independent copy; later changes to either side do not show in the other.
    pub fn deep_copy(&self) -> Self {
        self.clone()
    }

    pub fn sources(&self) -> usize {
        self.sources.len()
    }

    pub fn timings(&self) -> usize {
        self.timings.len()
    }

    pub fn source_id(&self, n: usize) -> Option<i32> {
        self.sources.get(n).map(|&(id, _)| id)
    }

    pub fn source_index(&self, n: usize) -> Option<i64> {
        self.sources.get(n).map(|&(_, index)| index)
    }

    pub fn timing(&self, n: usize) -> Option<i64> {
        self.timings.get(n).copied()
    }

    pub fn last_source_id(&self) -> Option<i32> {
        self.sources.last().map(|&(id, _)| id)
    }

    pub fn last_source_index(&self) -> Option<i64> {
        self.sources.last().map(|&(_, index)| index)
    }

    /// Whether the source ids end with `ids`, in order.
    pub fn source_ids_ends_with(&self, ids: &[i32]) -> bool {
        ids.len() <= self.sources.len()
            && self.sources[self.sources.len() - ids.len()..]
                .iter()
                .zip(ids)
                .all(|(&(id, _), want)| id == *want)
    }

    /// When set, reading a history also records the pending source context.
    pub fn add_source_details(&mut self, enabled: bool) {
        self.add_source_details = enabled;
    }

    pub fn is_adding_source_details(&self) -> bool {
        self.add_source_details
    }

    /// Source applied by the next read, at most once.
    pub fn set_source_context(&mut self, context: SourceContext) {
        self.source_context = Some(context);
    }

    fn parse_source(text: &str) -> Result<(i32, i64)> {
        let invalid = || WireError::IllegalArgument(format!("invalid history source '{text}'"));
        let (id, index) = text.split_once("=0x").ok_or_else(invalid)?;
        let id = id.parse::<i32>().map_err(|_| invalid())?;
        let index = u64::from_str_radix(index, 16).map_err(|_| invalid())?;
        Ok((id, index as i64))
    }
}

impl PartialEq for MessageHistory {
    fn eq(&self, other: &Self) -> bool {
        self.sources == other.sources && self.timings == other.timings
    }
}

impl fmt::Debug for MessageHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageHistory")
            .field("sources", &self.sources)
            .field("timings", &self.timings)
            .field("add_source_details", &self.add_source_details)
            .field("source_context", &self.source_context)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for MessageHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("sources: [")?;
        for (i, (id, index)) in self.sources.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{id}=0x{index:x}")?;
        }
        f.write_str("] timings: [")?;
        for (i, timing) in self.timings.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{timing}")?;
        }
        f.write_str("]")
    }
}

impl WriteMarshallable for MessageHistory {
    fn write_marshallable(&self, out: &mut dyn WireOut) -> Result<()> {
        let sources = &self.sources;
        out.write("sources")?.sequence(&mut |seq| {
            for (id, index) in sources {
                seq.text(Some(&format!("{id}=0x{index:x}")))?;
            }
            Ok(())
        })?;
        let timings = &self.timings;
        let now = self.now();
        out.write("timings")?.sequence(&mut |seq| {
            for timing in timings {
                seq.int64(*timing)?;
            }
            seq.int64(now)
        })
    }
}

impl ReadMarshallable for MessageHistory {
    fn read_marshallable(&mut self, input: &mut dyn WireIn) -> Result<()> {
        self.reset();
        if let Some(value) = input.read("sources")? {
            let mut sources = Vec::new();
            value.sequence(&mut |seq| {
                while seq.has_next_sequence_item()? {
                    let text = seq.text()?.unwrap_or_default();
                    sources.push(Self::parse_source(&text)?);
                }
                Ok(())
            })?;
            for (id, index) in sources {
                self.add_source(id, index)?;
            }
        }
        if let Some(value) = input.read("timings")? {
            let mut timings = Vec::new();
            value.sequence(&mut |seq| {
                while seq.has_next_sequence_item()? {
                    timings.push(seq.int64()?);
                }
                Ok(())
            })?;
            for timing in timings {
                self.add_timing(timing)?;
            }
        }

        if self.add_source_details {
            if let Some(context) = self.source_context.take() {
                self.add_source(context.source_id, context.index)?;
                let now = self.now();
                self.add_timing(now)?;
            }
        }
        Ok(())
    }
}

impl Marshallable for MessageHistory {
    fn type_name(&self) -> &str {
        "MessageHistory"
    }
}

/// The calling thread's current history.
pub mod message_history {
    use std::cell::RefCell;

    use super::MessageHistory;

    thread_local! {
        static CURRENT: RefCell<Option<MessageHistory>> = const { RefCell::new(None) };
    }

    /// Run `f` on the current history, creating it if needed. Must not be
    /// nested.
    pub fn with<R>(f: impl FnOnce(&mut MessageHistory) -> R) -> R {
        CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            f(current.get_or_insert_with(MessageHistory::default))
        })
    }

    /// Replace the current history, returning the previous one.
    pub fn set(history: Option<MessageHistory>) -> Option<MessageHistory> {
        CURRENT.with(|current| current.replace(history))
    }

    pub fn take() -> Option<MessageHistory> {
        set(None)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, Ordering};

    use bytes::BytesMut;

    use super::*;
    use crate::binary::{BinaryWireIn, BinaryWireOut};
    use crate::text::{TextWireIn, TextWireOut};

    fn ticking_clock(start: i64, step: i64) -> Clock {
        let next = Arc::new(AtomicI64::new(start));
        Arc::new(move || next.fetch_add(step, Ordering::SeqCst))
    }

    fn sample() -> MessageHistory {
        let mut history = MessageHistory::new();
        history.add_source(1, 0xff).unwrap();
        history.add_source(2, 0xfff).unwrap();
        history.add_timing(10_000).unwrap();
        history.add_timing(20_000).unwrap();
        history
    }

    #[test]
    fn displays_sources_and_timings() {
        assert_eq!(
            sample().to_string(),
            "sources: [1=0xff,2=0xfff] timings: [10000,20000]"
        );
        assert_eq!(MessageHistory::new().to_string(), "sources: [] timings: []");
    }

    #[test]
    fn capacity_is_enforced_per_list() {
        let mut history = MessageHistory::new();
        for i in 0..MESSAGE_HISTORY_LENGTH {
            history.add_source(1, i as i64).unwrap();
        }
        assert!(matches!(
            history.add_source(1, 0),
            Err(WireError::CapacityExceeded { .. })
        ));
        // Timings are tracked independently.
        history.add_timing(1).unwrap();

        for i in 1..MESSAGE_HISTORY_LENGTH {
            history.add_timing(i as i64).unwrap();
        }
        assert!(history.add_timing(0).is_err());
    }

    #[test]
    fn deep_copy_is_independent() {
        let original = sample();
        let mut copy = original.deep_copy();
        assert_eq!(copy, original);
        copy.add_source(3, 1).unwrap();
        assert_eq!(original.sources(), 2);
        assert_ne!(copy, original);
    }

    #[test]
    fn accessors() {
        let history = sample();
        assert_eq!(history.source_id(1), Some(2));
        assert_eq!(history.source_index(0), Some(0xff));
        assert_eq!(history.timing(1), Some(20_000));
        assert_eq!(history.timing(2), None);
        assert_eq!(history.last_source_id(), Some(2));
        assert_eq!(history.last_source_index(), Some(0xfff));
        assert!(history.source_ids_ends_with(&[2]));
        assert!(history.source_ids_ends_with(&[1, 2]));
        assert!(!history.source_ids_ends_with(&[2, 1]));
        assert!(!history.source_ids_ends_with(&[0, 1, 2]));
    }

    #[test]
    fn reset_with_keeps_one_source_and_one_timing() {
        let mut history = sample().with_clock(ticking_clock(500, 1));
        history.reset_with(9, 4);
        assert_eq!(history.sources(), 1);
        assert_eq!(history.timings(), 1);
        assert_eq!(history.timing(0), Some(500));
    }

    #[test]
    fn binary_round_trip_appends_write_time() {
        let history = sample().with_clock(ticking_clock(30_000, 1));
        let mut buf = BytesMut::new();
        BinaryWireOut::new(&mut buf)
            .write("history")
            .unwrap()
            .typed_marshallable(Some(&history))
            .unwrap();

        let mut read = MessageHistory::new();
        let mut input = BinaryWireIn::new(&buf);
        assert!(input
            .read("history")
            .unwrap()
            .unwrap()
            .marshallable(&mut read)
            .unwrap());
        assert_eq!(read.sources(), 2);
        assert_eq!(read.source_index(1), Some(0xfff));
        assert_eq!(read.timings(), 3);
        assert_eq!(read.timing(2), Some(30_000));
    }

    #[test]
    fn text_form_uses_compact_sources() {
        let history = sample().with_clock(ticking_clock(30_000, 1));
        let mut buf = BytesMut::new();
        TextWireOut::new(&mut buf)
            .write("history")
            .unwrap()
            .typed_marshallable(Some(&history))
            .unwrap();
        let text = String::from_utf8(buf.to_vec()).unwrap();
        assert!(
            text.contains("sources: [\"1=0xff\", \"2=0xfff\"]"),
            "{text}"
        );

        let mut read = MessageHistory::new();
        let mut input = TextWireIn::new(&text);
        input
            .read("history")
            .unwrap()
            .unwrap()
            .marshallable(&mut read)
            .unwrap();
        assert_eq!(read.source_id(0), Some(1));
        assert_eq!(read.timing(1), Some(20_000));
    }

    #[test]
    fn source_context_is_applied_once() {
        let writer = sample().with_clock(ticking_clock(30_000, 1));
        let mut buf = BytesMut::new();
        BinaryWireOut::new(&mut buf)
            .write("history")
            .unwrap()
            .marshallable(&writer)
            .unwrap();

        let mut reader = MessageHistory::new().with_clock(ticking_clock(40_000, 1));
        reader.add_source_details(true);
        reader.set_source_context(SourceContext {
            source_id: 7,
            index: 0x10,
        });

        let mut input = BinaryWireIn::new(&buf);
        input.read("history").unwrap().unwrap().marshallable(&mut reader).unwrap();
        assert_eq!(reader.last_source_id(), Some(7));
        assert_eq!(reader.last_source_index(), Some(0x10));
        assert_eq!(reader.timings(), 4);
        assert_eq!(reader.timing(3), Some(40_000));

        let mut input = BinaryWireIn::new(&buf);
        input.read("history").unwrap().unwrap().marshallable(&mut reader).unwrap();
        assert_eq!(reader.sources(), 2);
    }

    #[test]
    fn thread_local_history_is_replaceable() {
        message_history::set(None);
        message_history::with(|h| h.add_source(1, 1)).unwrap();
        assert_eq!(message_history::with(|h| h.sources()), 1);

        let previous = message_history::set(Some(sample()));
        assert_eq!(previous.map(|h| h.sources()), Some(1));
        assert_eq!(message_history::with(|h| h.last_source_index()), Some(0xfff));

        message_history::set(None);
        assert_eq!(message_history::with(|h| h.sources()), 0);
        assert!(message_history::take().is_some());
        assert!(message_history::take().is_none());

        let other = std::thread::spawn(|| message_history::with(|h| h.sources()))
            .join()
            .unwrap();
        assert_eq!(other, 0);
    }
}
