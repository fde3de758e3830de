//! Network-fed streaming source
//!
//! A live producer (an RTP/WebRTC depacketizer, typically running on its own
//! network thread) never touches the consumer's state directly. It pushes
//! [`FeedEvent`] messages into a bounded channel through a [`StreamFeeder`];
//! the [`StreamingSource`] drains that channel into its buffer each time the
//! demuxer pulls bytes, on the caller's read thread.

use std::io::SeekFrom;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::time::{Duration, Instant};

use bytes::Bytes;

use super::{BufferSource, DataSource, SourceError};
use crate::demux::VideoCodec;

/// Transport connection state as reported by the network session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// States after which no more media will arrive
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Failed | ConnectionState::Closed
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::New => "new",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}

/// Message from the network producer
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// One depacketized access unit, start codes already applied
    AccessUnit(Bytes),
    /// Transport state transition
    ConnectionState(ConnectionState),
}

/// Errors on the producer side of the feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// The consuming source has been dropped
    Disconnected,
}

impl std::fmt::Display for FeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedError::Disconnected => write!(f, "Streaming source is gone"),
        }
    }
}

impl std::error::Error for FeedError {}

/// Producer handle given to the network callback thread
#[derive(Debug, Clone)]
pub struct StreamFeeder {
    sender: SyncSender<FeedEvent>,
}

impl StreamFeeder {
    /// Queue an access unit, blocking while the channel is full
    pub fn push_unit(&self, unit: impl Into<Bytes>) -> Result<(), FeedError> {
        self.send(FeedEvent::AccessUnit(unit.into()))
    }

    /// Report a transport state change
    pub fn report_state(&self, state: ConnectionState) -> Result<(), FeedError> {
        self.send(FeedEvent::ConnectionState(state))
    }

    pub fn send(&self, event: FeedEvent) -> Result<(), FeedError> {
        self.sender.send(event).map_err(|_| FeedError::Disconnected)
    }
}

/// Non-seekable data source fed by a [`StreamFeeder`]
#[derive(Debug)]
pub struct StreamingSource {
    events: Receiver<FeedEvent>,
    buffer: BufferSource,
    codec: VideoCodec,
    state: ConnectionState,
}

impl StreamingSource {
    /// Create a source for a stream of `codec` access units, with a feed
    /// channel holding at most `capacity` pending events
    pub fn new(codec: VideoCodec, capacity: usize) -> (Self, StreamFeeder) {
        let (sender, events) = mpsc::sync_channel(capacity.max(1));
        let source = Self {
            events,
            buffer: BufferSource::streaming(),
            codec,
            state: ConnectionState::New,
        };
        (source, StreamFeeder { sender })
    }

    /// Demuxer to force for raw elementary streams of this codec
    pub fn format_hint(&self) -> Option<&'static str> {
        self.codec.format_hint()
    }

    pub fn codec(&self) -> VideoCodec {
        self.codec
    }

    pub fn connection_state(&mut self) -> ConnectionState {
        self.pump_events();
        self.state
    }

    pub fn is_connected(&mut self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Whether unread bytes are buffered
    pub fn is_data_available(&mut self) -> bool {
        self.pump_events();
        self.buffer.bytes_available() > 0
    }

    /// Discard buffered bytes and end the stream
    pub fn close(&mut self) {
        self.buffer.clear();
        self.buffer.set_eof(true);
        self.state = ConnectionState::Closed;
    }

    /// Block until bytes are buffered, the stream ends or `timeout` passes.
    /// Returns whether bytes are available.
    ///
    /// Opening a demuxer probes the first bytes, so live sources should wait
    /// here before being opened.
    pub fn wait_for_data(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.pump_events();
            if self.buffer.bytes_available() > 0 {
                return true;
            }
            if self.buffer.is_eof() {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match self.events.recv_timeout(remaining) {
                Ok(event) => self.apply(event),
                Err(RecvTimeoutError::Timeout) => return false,
                Err(RecvTimeoutError::Disconnected) => self.mark_feeders_gone(),
            }
        }
    }

    fn pump_events(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.apply(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.mark_feeders_gone();
                    break;
                }
            }
        }
    }

    fn apply(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::AccessUnit(unit) => {
                if self.state != ConnectionState::Closed {
                    self.buffer.append_data(&unit);
                }
            }
            FeedEvent::ConnectionState(state) => {
                tracing::info!(codec = %self.codec, %state, "Stream connection state changed");
                self.state = state;
                if state.is_terminal() {
                    self.buffer.set_eof(true);
                }
            }
        }
    }

    /// Every feeder dropped: nothing more can arrive
    fn mark_feeders_gone(&mut self) {
        if !self.buffer.is_eof() {
            tracing::debug!(codec = %self.codec, "Stream feeders dropped, marking end of stream");
            self.buffer.set_eof(true);
        }
    }
}

impl DataSource for StreamingSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SourceError> {
        self.pump_events();
        self.buffer.read(buf)
    }

    fn seek(&mut self, _pos: SeekFrom) -> Result<u64, SourceError> {
        Err(SourceError::SeekUnsupported)
    }

    fn size(&self) -> Option<u64> {
        None
    }

    fn is_seekable(&self) -> bool {
        false
    }
}
