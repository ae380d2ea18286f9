//! Duplex wire protocol
//!
//! JSON envelopes tagged by `type`, with PCM16 audio base64-encoded inside.
//! Inbound envelopes are reduced to [`TurnEvent`]s; types the engine does not
//! act on decode to nothing.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::voice::AudioFrame;
use crate::{Error, Result};

/// Message sent to the remote side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Append captured audio to the remote input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioAppend {
        /// Base64 PCM16 mono 24kHz
        audio: String,
    },
}

impl ClientMessage {
    /// Wrap a capture frame in its outbound envelope
    #[must_use]
    pub fn append(frame: &AudioFrame) -> Self {
        Self::InputAudioAppend {
            audio: STANDARD.encode(&frame.pcm),
        }
    }

    /// Serialize to the JSON text sent on the wire
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Speaker of a transcript line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human speaker
    User,
    /// The voice model
    Assistant,
    /// System instructions
    System,
    /// Anything else the remote side reports
    #[serde(other)]
    Other,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Conversation item carried by `conversation.item.created`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConversationItem {
    /// Item author
    #[serde(default)]
    pub role: Option<Role>,
    /// Content parts; only transcripts are read
    #[serde(default)]
    pub content: Vec<ContentPart>,
}

/// One content part of a conversation item
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ContentPart {
    /// Transcript text, when the part is audio
    #[serde(default)]
    pub transcript: Option<String>,
}

/// Error payload of an `error` envelope
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ErrorDetail {
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
    /// Machine-readable code
    #[serde(default)]
    pub code: Option<String>,
}

/// Message received from the remote side
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Remote VAD detected the start of user speech
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        audio_start_ms: Option<u64>,
    },
    /// Remote VAD detected the end of user speech
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        #[serde(default)]
        audio_end_ms: Option<u64>,
    },
    /// A chunk of synthesized speech
    #[serde(rename = "response.output_audio.delta", alias = "response.audio.delta")]
    OutputAudioDelta { delta: String },
    /// The current response has no more audio
    #[serde(rename = "response.output_audio.done", alias = "response.audio.done")]
    OutputAudioDone {
        #[serde(default)]
        response_id: Option<String>,
    },
    /// A conversation item was added
    #[serde(rename = "conversation.item.created")]
    ItemCreated {
        #[serde(default)]
        item: Option<ConversationItem>,
    },
    /// Transcript of the user's audio is ready
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted { transcript: String },
    /// Transcript of the model's spoken reply is ready
    #[serde(
        rename = "response.output_audio_transcript.done",
        alias = "response.audio_transcript.done"
    )]
    OutputTranscriptDone { transcript: String },
    /// Session-level error
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: ErrorDetail,
    },
    /// Any type the engine does not act on
    #[serde(other)]
    Unknown,
}

/// Turn-taking signal dispatched by the duplex session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    /// The user started speaking
    UserSpeechStarted,
    /// The user stopped speaking; a reply is expected
    UserSpeechStopped,
    /// PCM16 audio of the reply
    OutputAudioDelta(Vec<u8>),
    /// The reply's audio is complete
    OutputAudioDone,
    /// A transcript line for display
    Transcript {
        /// Speaker
        role: Role,
        /// Text
        text: String,
    },
    /// The remote side reported an error; the session ends
    SessionError(String),
}

impl ServerMessage {
    /// Parse one inbound text frame
    ///
    /// # Errors
    ///
    /// Returns `MalformedMessage` if the text is not a recognizable envelope
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::MalformedMessage(e.to_string()))
    }

    /// Reduce the message to the turn events it carries
    ///
    /// # Errors
    ///
    /// Returns `MalformedMessage` if an audio delta is not valid base64
    pub fn into_events(self) -> Result<Vec<TurnEvent>> {
        let events = match self {
            Self::SpeechStarted { .. } => vec![TurnEvent::UserSpeechStarted],
            Self::SpeechStopped { .. } => vec![TurnEvent::UserSpeechStopped],
            Self::OutputAudioDelta { delta } => {
                let pcm = STANDARD
                    .decode(delta.as_bytes())
                    .map_err(|e| Error::MalformedMessage(format!("audio delta: {e}")))?;
                vec![TurnEvent::OutputAudioDelta(pcm)]
            }
            Self::OutputAudioDone { .. } => vec![TurnEvent::OutputAudioDone],
            Self::ItemCreated { item } => item
                .into_iter()
                .flat_map(|item| {
                    let role = item.role;
                    item.content
                        .into_iter()
                        .filter_map(|part| part.transcript)
                        .filter(|text| !text.is_empty())
                        .filter_map(move |text| role.map(|role| TurnEvent::Transcript { role, text }))
                })
                .collect(),
            Self::InputTranscriptionCompleted { transcript } => vec![TurnEvent::Transcript {
                role: Role::User,
                text: transcript,
            }],
            Self::OutputTranscriptDone { transcript } => vec![TurnEvent::Transcript {
                role: Role::Assistant,
                text: transcript,
            }],
            Self::Error { error } => vec![TurnEvent::SessionError(
                error
                    .message
                    .or(error.code)
                    .unwrap_or_else(|| "unspecified remote error".to_string()),
            )],
            Self::Unknown => Vec::new(),
        };
        Ok(events)
    }
}

/// Parse an inbound text frame straight to turn events
///
/// # Errors
///
/// Returns `MalformedMessage` if the envelope or its payload is undecodable
pub fn decode_events(text: &str) -> Result<Vec<TurnEvent>> {
    ServerMessage::parse(text)?.into_events()
}
