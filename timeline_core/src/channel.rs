// Push-channel listener. Notifications that arrive before the registration
// handshake completes are buffered and replayed in arrival order on ack.

use std::collections::VecDeque;
use std::fmt;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::TimelineError;
use crate::session::SessionId;
use crate::types::{EventRecord, TimelineConfig};

/// Payload pushed by the backend for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Notification {
    /// One new event record.
    Event { event: EventRecord },
    /// Several event records, in order.
    Events { events: Vec<EventRecord> },
    /// Rendered video locator.
    Video { url: String },
    /// Generated audio locator.
    Audio { url: String },
    /// Drop all events.
    Clear,
}

/// A notification addressed to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub session_id: SessionId,
    pub notification: Notification,
}

/// Handshake payload: listener name and the session it listens for.
/// The backend echoes it back as the ack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub name: String,
    pub id: SessionId,
}

/// Receiver of delivered notifications.
pub trait NotificationSink {
    fn deliver(&mut self, notification: Notification) -> Result<(), TimelineError>;
}

/// Registration state of the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HandshakeState {
    /// No registration sent, or the connection dropped.
    Detached,
    /// Registration sent, waiting for the ack.
    Pending,
    /// Ack received; notifications go straight to the sink.
    Registered,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeState::Detached => write!(f, "Detached"),
            HandshakeState::Pending => write!(f, "Pending"),
            HandshakeState::Registered => write!(f, "Registered"),
        }
    }
}

/// What happened to a received notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Delivery {
    Delivered,
    Buffered,
    /// Addressed to another session.
    Ignored,
}

/// Listener side of the push channel for one session.
#[derive(Debug)]
pub struct PushChannel {
    session_id: SessionId,
    name: String,
    state: HandshakeState,
    buffer: VecDeque<Notification>,
    capacity: usize,
}

impl PushChannel {
    pub fn new(session_id: SessionId, config: &TimelineConfig) -> Self {
        PushChannel {
            session_id,
            name: config.channel_name.clone(),
            state: HandshakeState::Detached,
            buffer: VecDeque::new(),
            capacity: config.max_buffered_notifications,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Start (or restart after a reconnect) the handshake. Until the ack arrives,
    /// received notifications are buffered.
    pub fn begin_registration(&mut self) -> Registration {
        self.state = HandshakeState::Pending;
        debug!("Registering {} for session {}", self.name, self.session_id);
        Registration {
            name: self.name.clone(),
            id: self.session_id.clone(),
        }
    }

    /// Accept the ack and flush buffered notifications into `sink` in arrival order.
    /// Returns how many were flushed. If the sink fails, the failing notification
    /// and everything after it stay buffered, the channel stays `Pending`, and the
    /// same ack can be replayed to retry.
    pub fn complete_registration<K: NotificationSink>(
        &mut self,
        ack: &Registration,
        sink: &mut K,
    ) -> Result<usize, TimelineError> {
        if self.state != HandshakeState::Pending {
            warn!("Unexpected registration ack while {}", self.state);
            return Err(TimelineError::RegistrationNotPending {
                state: self.state.to_string(),
            });
        }
        if ack.id != self.session_id {
            warn!("Registration ack for {} on session {}", ack.id, self.session_id);
            return Err(TimelineError::SessionMismatch {
                expected: self.session_id.to_string(),
                received: ack.id.to_string(),
            });
        }

        let mut flushed = 0;
        while let Some(notification) = self.buffer.front().cloned() {
            if let Err(e) = sink.deliver(notification) {
                warn!(
                    "Flush for session {} stopped after {} notifications: {}",
                    self.session_id, flushed, e
                );
                return Err(e);
            }
            self.buffer.pop_front();
            flushed += 1;
        }
        // Only an empty buffer may be bypassed by direct delivery.
        self.state = HandshakeState::Registered;
        debug!(
            "Session {} registered, flushed {} buffered notifications",
            self.session_id, flushed
        );
        Ok(flushed)
    }

    /// Mark the connection as lost. Buffered notifications are kept.
    pub fn detach(&mut self) {
        self.state = HandshakeState::Detached;
    }

    /// Route one envelope: deliver when registered, buffer otherwise, ignore when
    /// it belongs to another session.
    pub fn receive<K: NotificationSink>(
        &mut self,
        envelope: Envelope,
        sink: &mut K,
    ) -> Result<Delivery, TimelineError> {
        if envelope.session_id != self.session_id {
            debug!(
                "Ignoring notification for session {} on {}",
                envelope.session_id, self.session_id
            );
            return Ok(Delivery::Ignored);
        }

        if self.state == HandshakeState::Registered {
            sink.deliver(envelope.notification)?;
            return Ok(Delivery::Delivered);
        }

        if self.buffer.len() >= self.capacity {
            warn!(
                "Dropping notification for session {}: buffer full ({})",
                self.session_id, self.capacity
            );
            return Err(TimelineError::BufferFull {
                capacity: self.capacity,
            });
        }
        self.buffer.push_back(envelope.notification);
        Ok(Delivery::Buffered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sink that records what it receives and can be told to fail.
    #[derive(Default)]
    struct RecordingSink {
        received: Vec<Notification>,
        fail_on_clear: bool,
    }

    impl NotificationSink for RecordingSink {
        fn deliver(&mut self, notification: Notification) -> Result<(), TimelineError> {
            if self.fail_on_clear && notification == Notification::Clear {
                return Err(TimelineError::Storage {
                    key: "k".to_string(),
                    message: "full".to_string(),
                });
            }
            self.received.push(notification);
            Ok(())
        }
    }

    fn channel() -> PushChannel {
        PushChannel::new(SessionId::new("abc"), &TimelineConfig::default())
    }

    fn video(session: &str, url: &str) -> Envelope {
        Envelope {
            session_id: SessionId::new(session),
            notification: Notification::Video {
                url: url.to_string(),
            },
        }
    }

    #[test]
    fn buffers_until_registered_then_flushes_in_order() {
        let mut channel = channel();
        let mut sink = RecordingSink::default();

        assert_eq!(channel.receive(video("abc", "a"), &mut sink).unwrap(), Delivery::Buffered);
        let registration = channel.begin_registration();
        assert_eq!(channel.receive(video("abc", "b"), &mut sink).unwrap(), Delivery::Buffered);
        assert!(sink.received.is_empty());

        let flushed = channel.complete_registration(&registration, &mut sink).unwrap();
        assert_eq!(flushed, 2);
        assert_eq!(channel.state(), HandshakeState::Registered);

        assert_eq!(channel.receive(video("abc", "c"), &mut sink).unwrap(), Delivery::Delivered);
        let urls: Vec<&str> = sink
            .received
            .iter()
            .map(|n| match n {
                Notification::Video { url } => url.as_str(),
                _ => "",
            })
            .collect();
        assert_eq!(urls, vec!["a", "b", "c"]);
    }

    #[test]
    fn other_sessions_are_ignored() {
        let mut channel = channel();
        let mut sink = RecordingSink::default();
        assert_eq!(channel.receive(video("zzz", "a"), &mut sink).unwrap(), Delivery::Ignored);
        assert_eq!(channel.buffered_len(), 0);
    }

    #[test]
    fn ack_requires_pending_state() {
        let mut channel = channel();
        let mut sink = RecordingSink::default();
        let ack = Registration {
            name: "timeline".to_string(),
            id: SessionId::new("abc"),
        };
        let err = channel.complete_registration(&ack, &mut sink).unwrap_err();
        assert!(matches!(err, TimelineError::RegistrationNotPending { .. }));
    }

    #[test]
    fn ack_for_other_session_rejected() {
        let mut channel = channel();
        let mut sink = RecordingSink::default();
        channel.begin_registration();
        let ack = Registration {
            name: "timeline".to_string(),
            id: SessionId::new("zzz"),
        };
        let err = channel.complete_registration(&ack, &mut sink).unwrap_err();
        assert!(matches!(err, TimelineError::SessionMismatch { .. }));
        assert_eq!(channel.state(), HandshakeState::Pending);
    }

    #[test]
    fn full_buffer_rejects_newest() {
        let config = TimelineConfig {
            max_buffered_notifications: 1,
            ..TimelineConfig::default()
        };
        let mut channel = PushChannel::new(SessionId::new("abc"), &config);
        let mut sink = RecordingSink::default();
        channel.receive(video("abc", "a"), &mut sink).unwrap();
        let err = channel.receive(video("abc", "b"), &mut sink).unwrap_err();
        assert!(matches!(err, TimelineError::BufferFull { capacity: 1 }));
        assert_eq!(channel.buffered_len(), 1);
    }

    #[test]
    fn failed_flush_keeps_remaining_buffered() {
        let mut channel = channel();
        let mut sink = RecordingSink {
            fail_on_clear: true,
            ..RecordingSink::default()
        };
        let registration = channel.begin_registration();
        channel.receive(video("abc", "a"), &mut sink).unwrap();
        channel
            .receive(
                Envelope {
                    session_id: SessionId::new("abc"),
                    notification: Notification::Clear,
                },
                &mut sink,
            )
            .unwrap();
        channel.receive(video("abc", "b"), &mut sink).unwrap();

        assert!(channel.complete_registration(&registration, &mut sink).is_err());
        assert_eq!(sink.received.len(), 1);
        assert_eq!(channel.buffered_len(), 2);
        assert_eq!(channel.state(), HandshakeState::Pending);
    }

    #[test]
    fn notifications_after_failed_flush_queue_behind_buffer() {
        let mut channel = channel();
        let mut sink = RecordingSink {
            fail_on_clear: true,
            ..RecordingSink::default()
        };
        let registration = channel.begin_registration();
        let clear = Envelope {
            session_id: SessionId::new("abc"),
            notification: Notification::Clear,
        };
        channel.receive(clear, &mut sink).unwrap();
        channel.receive(video("abc", "a"), &mut sink).unwrap();

        assert!(channel.complete_registration(&registration, &mut sink).is_err());
        assert_eq!(
            channel.receive(video("abc", "b"), &mut sink).unwrap(),
            Delivery::Buffered
        );
        assert!(sink.received.is_empty());

        sink.fail_on_clear = false;
        let flushed = channel
            .complete_registration(&registration, &mut sink)
            .unwrap();
        assert_eq!(flushed, 3);
        assert_eq!(channel.state(), HandshakeState::Registered);
        assert_eq!(
            sink.received,
            vec![
                Notification::Clear,
                Notification::Video {
                    url: "a".to_string()
                },
                Notification::Video {
                    url: "b".to_string()
                },
            ]
        );
    }

    #[test]
    fn detach_buffers_again() {
        let mut channel = channel();
        let mut sink = RecordingSink::default();
        let registration = channel.begin_registration();
        channel.complete_registration(&registration, &mut sink).unwrap();
        channel.detach();
        assert_eq!(channel.receive(video("abc", "a"), &mut sink).unwrap(), Delivery::Buffered);
    }

    #[test]
    fn envelope_json_shape() {
        let json = concat!(
            r#"{"sessionId":"abc","notification":"#,
            r#"{"type":"event","event":{"kind":"click","pointTime":1.5}}}"#,
        );
        let envelope: Envelope = serde_json::from_str(json).expect("parse envelope");
        assert_eq!(envelope.session_id, SessionId::new("abc"));
        match envelope.notification {
            Notification::Event { event } => assert_eq!(event.point_time, Some(1.5)),
            other => panic!("unexpected notification {:?}", other),
        }

        let clear: Notification = serde_json::from_str(r#"{"type":"clear"}"#).expect("parse clear");
        assert_eq!(clear, Notification::Clear);
    }
}
