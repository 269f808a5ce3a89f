//! Maps raw engine notifications onto typed domain events.
//!
//! One raw event in, exactly one domain event out. Nothing is queued,
//! deduplicated or reordered here; consumers are idempotent instead.

use crate::events::{MembershipState, Participant, TrackHandle};
use crate::transport::{EngineEvent, MediaTrack, ParticipantRef};

/// An inbound data-channel message with its sender resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMessage {
    pub sender_identity: Option<String>,
    /// Display name, else identity, else `Unknown`.
    pub sender_label: String,
    pub topic: Option<String>,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    ParticipantJoined(Participant),
    ParticipantLeft(Participant),
    ParticipantRenamed {
        identity: String,
        previous_label: String,
        name: Option<String>,
    },
    TrackSubscribed(TrackHandle),
    TrackUnsubscribed { track_id: String },
    LocalTrackPublished(MediaTrack),
    LocalTrackUnpublished(MediaTrack),
    LocalTrackEnded(MediaTrack),
    MessageReceived(DataMessage),
    Reconnecting,
    Reconnected,
    Disconnected { reason: String },
}

pub struct EventNormalizer;

impl EventNormalizer {
    pub fn normalize(event: EngineEvent) -> DomainEvent {
        match event {
            EngineEvent::ParticipantConnected(p) => {
                DomainEvent::ParticipantJoined(Self::participant(p, MembershipState::Joined))
            }
            EngineEvent::ParticipantDisconnected(p) => {
                DomainEvent::ParticipantLeft(Self::participant(p, MembershipState::Left))
            }
            EngineEvent::ParticipantNameChanged { participant, name } => {
                let previous_label = participant.label();
                DomainEvent::ParticipantRenamed {
                    identity: participant.identity,
                    previous_label,
                    name: Some(name).filter(|n| !n.is_empty()),
                }
            }
            EngineEvent::TrackSubscribed { track, participant } => DomainEvent::TrackSubscribed(
                TrackHandle::new(track.id, participant.identity, track.kind, track.source),
            ),
            EngineEvent::TrackUnsubscribed { track_id, .. } => {
                DomainEvent::TrackUnsubscribed { track_id }
            }
            EngineEvent::LocalTrackPublished(track) => DomainEvent::LocalTrackPublished(track),
            EngineEvent::LocalTrackUnpublished(track) => DomainEvent::LocalTrackUnpublished(track),
            EngineEvent::LocalTrackEnded(track) => DomainEvent::LocalTrackEnded(track),
            EngineEvent::DataReceived {
                payload,
                topic,
                participant,
            } => DomainEvent::MessageReceived(DataMessage {
                sender_label: participant
                    .as_ref()
                    .map(ParticipantRef::label)
                    .unwrap_or_else(|| "Unknown".to_string()),
                sender_identity: participant.map(|p| p.identity),
                topic,
                payload,
            }),
            EngineEvent::Reconnecting => DomainEvent::Reconnecting,
            EngineEvent::Reconnected => DomainEvent::Reconnected,
            EngineEvent::Disconnected { reason } => DomainEvent::Disconnected { reason },
        }
    }

    fn participant(p: ParticipantRef, state: MembershipState) -> Participant {
        Participant {
            identity: p.identity,
            name: p.name,
            state,
        }
    }
}
