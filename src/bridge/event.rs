//! Normalized inbound events from both platforms.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventShapeError {
    #[error("missing field {0}")]
    MissingField(&'static str),
    #[error("field {field} has an unexpected shape: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixMedia {
    pub body: String,
    pub url: String,
    pub mimetype: Option<String>,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatrixContent {
    Text { body: String },
    Notice { body: String },
    Emote { body: String },
    Image(MatrixMedia),
    Audio(MatrixMedia),
    Video(MatrixMedia),
    File { media: MatrixMedia, filename: String },
    /// `m.replace` edit of an earlier event.
    Replace {
        replaces: String,
        new_content: Box<MatrixContent>,
    },
    Unknown { msgtype: Option<String> },
}

#[derive(Debug, Deserialize)]
struct RawContent {
    msgtype: Option<String>,
    body: Option<String>,
    url: Option<String>,
    filename: Option<String>,
    info: Option<RawInfo>,
    #[serde(rename = "m.relates_to")]
    relates_to: Option<RawRelation>,
    #[serde(rename = "m.new_content")]
    new_content: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawInfo {
    mimetype: Option<String>,
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawRelation {
    rel_type: Option<String>,
    event_id: Option<String>,
}

impl MatrixContent {
    pub fn from_json(content: &Value) -> Result<Self, EventShapeError> {
        let raw = parse_raw(content, "content")?;

        let is_replacement = raw
            .relates_to
            .as_ref()
            .is_some_and(|relation| relation.rel_type.as_deref() == Some("m.replace"));
        if !is_replacement {
            return Self::from_raw(raw);
        }

        let replaces = raw
            .relates_to
            .and_then(|relation| relation.event_id)
            .ok_or(EventShapeError::MissingField("m.relates_to.event_id"))?;
        let new_content = raw
            .new_content
            .ok_or(EventShapeError::MissingField("m.new_content"))?;
        let new_content = Self::from_raw(parse_raw(&new_content, "m.new_content")?)?;

        Ok(MatrixContent::Replace {
            replaces,
            new_content: Box::new(new_content),
        })
    }

    fn from_raw(raw: RawContent) -> Result<Self, EventShapeError> {
        let Some(msgtype) = raw.msgtype.clone() else {
            return Ok(MatrixContent::Unknown { msgtype: None });
        };

        let content = match msgtype.as_str() {
            "m.text" => MatrixContent::Text { body: body(&raw)? },
            "m.notice" => MatrixContent::Notice { body: body(&raw)? },
            "m.emote" => MatrixContent::Emote { body: body(&raw)? },
            "m.image" => MatrixContent::Image(media(&raw)?),
            "m.audio" => MatrixContent::Audio(media(&raw)?),
            "m.video" => MatrixContent::Video(media(&raw)?),
            "m.file" => {
                let media = media(&raw)?;
                let filename = raw.filename.clone().unwrap_or_else(|| media.body.clone());
                MatrixContent::File { media, filename }
            }
            _ => MatrixContent::Unknown {
                msgtype: Some(msgtype),
            },
        };
        Ok(content)
    }

    /// Short kind name used for generated file names, e.g. `image`.
    pub fn kind(&self) -> &'static str {
        match self {
            MatrixContent::Text { .. } => "text",
            MatrixContent::Notice { .. } => "notice",
            MatrixContent::Emote { .. } => "emote",
            MatrixContent::Image(_) => "image",
            MatrixContent::Audio(_) => "audio",
            MatrixContent::Video(_) => "video",
            MatrixContent::File { .. } => "file",
            MatrixContent::Replace { .. } => "replace",
            MatrixContent::Unknown { .. } => "unknown",
        }
    }
}

fn parse_raw(content: &Value, field: &'static str) -> Result<RawContent, EventShapeError> {
    RawContent::deserialize(content).map_err(|err| EventShapeError::InvalidField {
        field,
        reason: err.to_string(),
    })
}

fn body(raw: &RawContent) -> Result<String, EventShapeError> {
    raw.body.clone().ok_or(EventShapeError::MissingField("body"))
}

fn media(raw: &RawContent) -> Result<MatrixMedia, EventShapeError> {
    Ok(MatrixMedia {
        body: body(raw)?,
        url: raw.url.clone().ok_or(EventShapeError::MissingField("url"))?,
        mimetype: raw.info.as_ref().and_then(|info| info.mimetype.clone()),
        size: raw.info.as_ref().and_then(|info| info.size),
    })
}

/// A `m.room.message` timeline event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixInbound {
    pub event_id: String,
    pub room_id: String,
    pub sender: String,
    /// Milliseconds since the unix epoch.
    pub origin_server_ts: i64,
    pub content: MatrixContent,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    event_id: Option<String>,
    sender: Option<String>,
    origin_server_ts: Option<i64>,
    #[serde(default)]
    content: Value,
}

impl MatrixInbound {
    pub fn from_event_json(room_id: &str, event: &Value) -> Result<Self, EventShapeError> {
        let raw = RawEvent::deserialize(event).map_err(|err| EventShapeError::InvalidField {
            field: "event",
            reason: err.to_string(),
        })?;

        Ok(Self {
            event_id: raw.event_id.ok_or(EventShapeError::MissingField("event_id"))?,
            room_id: room_id.to_string(),
            sender: raw.sender.ok_or(EventShapeError::MissingField("sender"))?,
            origin_server_ts: raw
                .origin_server_ts
                .ok_or(EventShapeError::MissingField("origin_server_ts"))?,
            content: MatrixContent::from_json(&raw.content)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscordAttachment {
    pub url: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub size: u64,
}

/// A new message seen on the Discord gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscordInbound {
    pub message_id: String,
    pub channel_id: String,
    /// User id, or webhook id for webhook messages.
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    pub attachments: Vec<DiscordAttachment>,
}

/// A Discord message update. The gateway sends partial objects, so most fields are optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscordEdit {
    pub message_id: String,
    pub channel_id: String,
    pub author_id: Option<String>,
    pub author_name: Option<String>,
    pub content: Option<String>,
}
