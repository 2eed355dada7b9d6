use std::fmt;

use thiserror::Error;

use super::event::EventShapeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    MatrixToDiscord,
    DiscordToMatrix,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::MatrixToDiscord => f.write_str("matrix->discord"),
            Direction::DiscordToMatrix => f.write_str("discord->matrix"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Sent before this process started.
    Replay,
    /// Sent by the relay's own account.
    SelfEcho,
    /// Sent by one of the webhooks the identity cache created.
    ImpersonationEcho,
    UnmappedRoom,
    /// Edit of a message that was never relayed.
    UnknownEditTarget,
    UnsupportedKind,
    EmptyMessage,
}

impl IgnoreReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IgnoreReason::Replay => "replay",
            IgnoreReason::SelfEcho => "self_echo",
            IgnoreReason::ImpersonationEcho => "impersonation_echo",
            IgnoreReason::UnmappedRoom => "unmapped_room",
            IgnoreReason::UnknownEditTarget => "unknown_edit_target",
            IgnoreReason::UnsupportedKind => "unsupported_kind",
            IgnoreReason::EmptyMessage => "empty_message",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Ignored(IgnoreReason),
    Relayed {
        origin_id: String,
        destination_id: String,
    },
    Edited {
        origin_id: String,
        destination_id: String,
    },
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to provision impersonation identity: {0:#}")]
    Identity(anyhow::Error),
    #[error("failed to send relayed message: {0:#}")]
    Send(anyhow::Error),
    #[error("failed to edit relayed message: {0:#}")]
    Edit(anyhow::Error),
    #[error("failed to transfer media: {0:#}")]
    Media(anyhow::Error),
    #[error("malformed event: {0}")]
    Malformed(#[from] EventShapeError),
}

impl RelayError {
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Identity(_) => "identity",
            RelayError::Send(_) => "send",
            RelayError::Edit(_) => "edit",
            RelayError::Media(_) => "media",
            RelayError::Malformed(_) => "malformed",
        }
    }
}
