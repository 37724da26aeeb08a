//! Event dispatch and the pump that drives it.

use tracing::{debug, warn};
use wireprims_wire::{Result as WireResult, ValueIn};

use crate::channel::WireChannel;
use crate::error::Result;

/// Receives the events read from a channel.
pub trait EventHandler: Send {
    fn on_event(&mut self, event: &str, value: &mut dyn ValueIn) -> WireResult<()>;

    /// A closed handler stops the pump driving it.
    fn is_closed(&self) -> bool {
        false
    }

    /// Called once when the pump exits.
    fn close(&mut self) {}
}

impl<F> EventHandler for F
where
    F: FnMut(&str, &mut dyn ValueIn) -> WireResult<()> + Send,
{
    fn on_event(&mut self, event: &str, value: &mut dyn ValueIn) -> WireResult<()> {
        self(event, value)
    }
}

/// Reads documents off a channel and hands their events to a handler.
///
/// Metadata documents are consumed without dispatch; the channel has
/// already recorded any heartbeat they carry.
#[derive(Debug)]
pub struct MethodReader<H> {
    handler: H,
}

impl<H: EventHandler> MethodReader<H> {
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    /// Read and dispatch at most one document. Returns whether a document
    /// was read.
    pub fn read_one(&mut self, channel: &mut dyn WireChannel) -> Result<bool> {
        let Some(document) = channel.reading_document()? else {
            return Ok(false);
        };
        if document.is_metadata() {
            return Ok(true);
        }
        let handler = &mut self.handler;
        document.with_event(channel.config().source_id, |event, value| {
            handler.on_event(event, value)
        })?;
        Ok(true)
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_inner(self) -> H {
        self.handler
    }
}

/// Dispatch events until the channel or the handler closes, or a read
/// fails. The handler is closed on the way out and handed back.
pub fn run_event_loop<H: EventHandler>(channel: &mut dyn WireChannel, handler: H) -> H {
    let mut pauser = channel.config().pauser_mode.pauser();
    let closer = channel.close_handle();
    let mut reader = MethodReader::new(handler);
    let mut dispatched = 0u64;

    while !closer.is_closed() && !reader.handler().is_closed() {
        match reader.read_one(channel) {
            Ok(true) => {
                dispatched += 1;
                pauser.reset();
            }
            Ok(false) => pauser.pause(),
            Err(err) => {
                if !closer.is_closed() && !reader.handler().is_closed() {
                    warn!(error = %err, "event loop stopped");
                }
                break;
            }
        }
    }
    debug!(dispatched, "event loop finished");

    let mut handler = reader.into_inner();
    handler.close();
    handler
}

/// Move a channel and its handler into a task for a worker thread.
///
/// The channel is closed when the task finishes.
pub fn event_handler_as_runnable<H>(
    mut channel: Box<dyn WireChannel>,
    handler: H,
) -> impl FnOnce() + Send + 'static
where
    H: EventHandler + 'static,
{
    move || {
        run_event_loop(channel.as_mut(), handler);
        channel.close();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use wireprims_wire::WireValue;

    use super::*;
    use crate::config::ChannelConfig;
    use crate::connector::connect;
    use crate::header::HandlerHeader;

    #[derive(Default)]
    struct Collect {
        seen: Vec<(String, WireValue)>,
        limit: usize,
        closed: bool,
    }

    impl EventHandler for Collect {
        fn on_event(&mut self, event: &str, value: &mut dyn ValueIn) -> WireResult<()> {
            self.seen.push((event.to_string(), value.value()?));
            Ok(())
        }

        fn is_closed(&self) -> bool {
            self.seen.len() >= self.limit
        }

        fn close(&mut self) {
            self.closed = true;
        }
    }

    #[test]
    fn pump_stops_when_the_handler_closes() {
        let mut channel = connect(ChannelConfig::default(), HandlerHeader::echo())
            .expect("internal channel should connect");
        channel
            .write_event("first", &mut |v| v.int32(1))
            .expect("write should succeed");
        channel
            .test_message(5)
            .expect("heartbeat should be written");
        channel
            .write_event("second", &mut |v| v.text(Some("two")))
            .expect("write should succeed");

        let handler = run_event_loop(
            channel.as_mut(),
            Collect {
                limit: 2,
                ..Collect::default()
            },
        );
        assert!(handler.closed);
        assert_eq!(
            handler.seen,
            vec![
                ("first".to_string(), WireValue::Int32(1)),
                ("second".to_string(), WireValue::Text("two".into())),
            ]
        );
        assert_eq!(channel.last_test_message(), 5);
        assert!(!channel.is_closed());
    }

    #[test]
    fn closures_are_handlers() {
        let mut channel = connect(ChannelConfig::default(), HandlerHeader::echo())
            .expect("internal channel should connect");
        channel
            .write_event("tick", &mut |v| v.int64(7))
            .expect("write should succeed");

        let mut events = Vec::new();
        let mut reader = MethodReader::new(|event: &str, value: &mut dyn ValueIn| -> WireResult<()> {
            events.push((event.to_string(), value.int64()?));
            Ok(())
        });
        while !reader
            .read_one(channel.as_mut())
            .expect("read should succeed")
        {}
        drop(reader);
        assert_eq!(events, vec![("tick".to_string(), 7)]);
    }

    struct Flagged(Arc<AtomicBool>);

    impl EventHandler for Flagged {
        fn on_event(&mut self, _event: &str, _value: &mut dyn ValueIn) -> WireResult<()> {
            Ok(())
        }

        fn close(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn runnable_exits_when_the_channel_is_closed_elsewhere() {
        let channel = connect(ChannelConfig::default(), HandlerHeader::echo())
            .expect("internal channel should connect");
        let closer = channel.close_handle();
        let handler_closed = Arc::new(AtomicBool::new(false));

        let task = event_handler_as_runnable(channel, Flagged(Arc::clone(&handler_closed)));
        let worker = thread::spawn(task);
        thread::sleep(Duration::from_millis(50));
        closer.close();
        worker.join().expect("pump thread should exit cleanly");

        assert!(handler_closed.load(Ordering::SeqCst));
        assert!(closer.is_closed());
    }
}
