use serde_json::{Value, json};
use tracing::{debug, warn};

use super::BridgeCore;
use super::event::{DiscordAttachment, DiscordEdit, DiscordInbound};
use super::format::{attachment_summary, discord_to_matrix_html, discord_to_matrix_plain};
use super::outcome::{IgnoreReason, RelayError, RelayOutcome};
use crate::store::CorrelationRecord;

const HTML_FORMAT: &str = "org.matrix.custom.html";

impl BridgeCore {
    pub(crate) async fn handle_discord_message(
        &self,
        message: &DiscordInbound,
    ) -> Result<RelayOutcome, RelayError> {
        if let Some(reason) = self.discord_echo(&message.author_id) {
            return Ok(RelayOutcome::Ignored(reason));
        }
        let Some(room_id) = self.channels.matrix_room_for(&message.channel_id) else {
            return Ok(RelayOutcome::Ignored(IgnoreReason::UnmappedRoom));
        };
        if message.content.is_empty() && message.attachments.is_empty() {
            return Ok(RelayOutcome::Ignored(IgnoreReason::EmptyMessage));
        }

        let mut primary = None;
        if !message.content.is_empty() {
            let event_id = self
                .matrix
                .send_message(room_id, text_content(&message.author_name, &message.content))
                .await
                .map_err(RelayError::Send)?;
            self.remember_discord_relay(message, room_id, &event_id);
            primary = Some(event_id);
        }

        if let Some(content) = self.attachment_content(message).await {
            let event_id = self
                .matrix
                .send_message(room_id, content)
                .await
                .map_err(RelayError::Send)?;
            if primary.is_none() {
                self.remember_discord_relay(message, room_id, &event_id);
                primary = Some(event_id);
            }
        }

        match primary {
            Some(destination_id) => Ok(RelayOutcome::Relayed {
                origin_id: message.message_id.clone(),
                destination_id,
            }),
            None => Ok(RelayOutcome::Ignored(IgnoreReason::EmptyMessage)),
        }
    }

    /// Relays a Discord edit as an `m.replace` of the Matrix event it produced earlier.
    pub(crate) async fn handle_discord_edit(
        &self,
        edit: &DiscordEdit,
    ) -> Result<RelayOutcome, RelayError> {
        if let Some(reason) = edit.author_id.as_deref().and_then(|id| self.discord_echo(id)) {
            return Ok(RelayOutcome::Ignored(reason));
        }
        // Updates of webhook posts can arrive without an author.
        if self.correlations.by_destination(&edit.message_id).is_some() {
            return Ok(RelayOutcome::Ignored(IgnoreReason::ImpersonationEcho));
        }
        if self.channels.matrix_room_for(&edit.channel_id).is_none() {
            return Ok(RelayOutcome::Ignored(IgnoreReason::UnmappedRoom));
        }
        let Some(content) = edit.content.as_deref().filter(|content| !content.is_empty()) else {
            return Ok(RelayOutcome::Ignored(IgnoreReason::EmptyMessage));
        };
        let Some(record) = self.correlations.by_origin(&edit.message_id) else {
            debug!(message_id = %edit.message_id, "edit of a discord message that was never relayed");
            return Ok(RelayOutcome::Ignored(IgnoreReason::UnknownEditTarget));
        };

        let author = edit.author_name.as_deref().unwrap_or("unknown");
        self.matrix
            .send_message(
                &record.destination_room,
                replace_content(author, content, &record.destination_id),
            )
            .await
            .map_err(RelayError::Edit)?;

        Ok(RelayOutcome::Edited {
            origin_id: edit.message_id.clone(),
            destination_id: record.destination_id,
        })
    }

    fn discord_echo(&self, author_id: &str) -> Option<IgnoreReason> {
        if self.is_own_discord_account(author_id) {
            Some(IgnoreReason::SelfEcho)
        } else if self.identities.is_owned_identity(author_id) {
            Some(IgnoreReason::ImpersonationEcho)
        } else {
            None
        }
    }

    /// A small single attachment is re-uploaded; anything else, or a failed upload, is listed as links.
    async fn attachment_content(&self, message: &DiscordInbound) -> Option<Value> {
        let attachments = message.attachments.as_slice();
        match attachments {
            [] => None,
            [single] if single.size <= self.attachment_size_limit => {
                let content_type = attachment_mime(single);
                match self
                    .matrix
                    .upload_from_url(&single.url, &content_type, &single.filename)
                    .await
                {
                    Ok(mxc_url) => Some(uploaded_content(
                        &message.author_name,
                        single,
                        &content_type,
                        &mxc_url,
                    )),
                    Err(err) => {
                        warn!(
                            message_id = %message.message_id,
                            error = %format!("{err:#}"),
                            "attachment upload failed, sending a link"
                        );
                        Some(summary_content(&message.author_name, attachments))
                    }
                }
            }
            _ => {
                if let [single] = attachments {
                    debug!(
                        message_id = %message.message_id,
                        size = single.size,
                        "attachment above the upload threshold, sending a link"
                    );
                }
                Some(summary_content(&message.author_name, attachments))
            }
        }
    }

    fn remember_discord_relay(&self, message: &DiscordInbound, room_id: &str, event_id: &str) {
        self.remember(CorrelationRecord {
            origin_id: message.message_id.clone(),
            destination_id: event_id.to_string(),
            webhook: None,
            origin_room: message.channel_id.clone(),
            destination_room: room_id.to_string(),
        });
    }
}

fn attachment_mime(attachment: &DiscordAttachment) -> String {
    match &attachment.content_type {
        Some(content_type) => content_type.clone(),
        None => {
            let guessed = mime_guess::from_path(&attachment.filename).first_or_octet_stream();
            warn!(filename = %attachment.filename, mime = %guessed, "attachment has no content type, guessing");
            guessed.to_string()
        }
    }
}

fn summary_content(author: &str, attachments: &[DiscordAttachment]) -> Value {
    let (plain, html) = attachment_summary(author, attachments);
    json!({
        "msgtype": "m.text",
        "body": plain,
        "format": HTML_FORMAT,
        "formatted_body": html,
    })
}

fn text_content(author: &str, content: &str) -> Value {
    json!({
        "msgtype": "m.text",
        "body": discord_to_matrix_plain(author, content),
        "format": HTML_FORMAT,
        "formatted_body": discord_to_matrix_html(author, content),
    })
}

fn uploaded_content(
    author: &str,
    attachment: &DiscordAttachment,
    content_type: &str,
    mxc_url: &str,
) -> Value {
    let msgtype = if content_type.starts_with("image/") {
        "m.image"
    } else {
        "m.file"
    };

    json!({
        "msgtype": msgtype,
        "body": format!("{author} uploaded {}", attachment.filename),
        "filename": attachment.filename,
        "url": mxc_url,
        "info": {
            "mimetype": content_type,
            "size": attachment.size,
        },
    })
}

fn replace_content(author: &str, content: &str, target_event_id: &str) -> Value {
    let plain = discord_to_matrix_plain(author, content);
    let html = discord_to_matrix_html(author, content);

    json!({
        "msgtype": "m.text",
        "body": format!("* {plain}"),
        "format": HTML_FORMAT,
        "formatted_body": format!("* {html}"),
        "m.new_content": {
            "msgtype": "m.text",
            "body": plain,
            "format": HTML_FORMAT,
            "formatted_body": html,
        },
        "m.relates_to": {
            "rel_type": "m.replace",
            "event_id": target_event_id,
        },
    })
}
