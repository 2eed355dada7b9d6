use tracing::{debug, warn};

use super::BridgeCore;
use super::event::{MatrixContent, MatrixInbound, MatrixMedia};
use super::format::{matrix_to_discord_text, media_filename, strip_matrix_name};
use super::gateway::{OutboundFile, WebhookPost};
use super::outcome::{IgnoreReason, RelayError, RelayOutcome};
use crate::media::MediaTooLarge;
use crate::store::CorrelationRecord;

impl BridgeCore {
    pub(crate) async fn handle_matrix_event(
        &self,
        event: &MatrixInbound,
    ) -> Result<RelayOutcome, RelayError> {
        if event.origin_server_ts < self.started_at_ms {
            return Ok(RelayOutcome::Ignored(IgnoreReason::Replay));
        }
        if event.sender == self.matrix_user_id {
            return Ok(RelayOutcome::Ignored(IgnoreReason::SelfEcho));
        }
        let Some(channel_id) = self.channels.discord_channel_for(&event.room_id) else {
            return Ok(RelayOutcome::Ignored(IgnoreReason::UnmappedRoom));
        };

        match &event.content {
            MatrixContent::Replace {
                replaces,
                new_content,
            } => self.relay_matrix_edit(event, replaces, new_content).await,
            MatrixContent::Unknown { msgtype } => {
                debug!(event_id = %event.event_id, msgtype = ?msgtype, "unsupported matrix message kind");
                Ok(RelayOutcome::Ignored(IgnoreReason::UnsupportedKind))
            }
            content => self.relay_matrix_message(event, channel_id, content).await,
        }
    }

    async fn relay_matrix_message(
        &self,
        event: &MatrixInbound,
        channel_id: &str,
        content: &MatrixContent,
    ) -> Result<RelayOutcome, RelayError> {
        let username = strip_matrix_name(&event.sender);
        let webhook = self
            .identities
            .resolve(channel_id, &event.sender, username, self.discord.as_ref())
            .await
            .map_err(RelayError::Identity)?;

        let post = self.webhook_post(username, &event.sender, content).await?;
        let message_id = self
            .discord
            .execute_webhook(&webhook, post)
            .await
            .map_err(RelayError::Send)?;

        self.remember(CorrelationRecord {
            origin_id: event.event_id.clone(),
            destination_id: message_id.clone(),
            webhook: Some(webhook),
            origin_room: event.room_id.clone(),
            destination_room: channel_id.to_string(),
        });

        Ok(RelayOutcome::Relayed {
            origin_id: event.event_id.clone(),
            destination_id: message_id,
        })
    }

    async fn relay_matrix_edit(
        &self,
        event: &MatrixInbound,
        replaces: &str,
        new_content: &MatrixContent,
    ) -> Result<RelayOutcome, RelayError> {
        let Some(record) = self.correlations.by_origin(replaces) else {
            warn!(event_id = %event.event_id, replaces, "edit of a message that was never relayed");
            return Ok(RelayOutcome::Ignored(IgnoreReason::UnknownEditTarget));
        };
        let Some(webhook) = record.webhook else {
            warn!(event_id = %event.event_id, replaces, "edit target was not posted through a webhook");
            return Ok(RelayOutcome::Ignored(IgnoreReason::UnknownEditTarget));
        };
        let Some(text) = matrix_to_discord_text(&event.sender, new_content) else {
            return Ok(RelayOutcome::Ignored(IgnoreReason::UnsupportedKind));
        };

        self.discord
            .edit_webhook_message(&webhook, &record.destination_id, &text)
            .await
            .map_err(RelayError::Edit)?;

        Ok(RelayOutcome::Edited {
            origin_id: replaces.to_string(),
            destination_id: record.destination_id,
        })
    }

    async fn webhook_post(
        &self,
        username: &str,
        sender: &str,
        content: &MatrixContent,
    ) -> Result<WebhookPost, RelayError> {
        let (media, filename) = match content {
            MatrixContent::Image(media) | MatrixContent::Audio(media) | MatrixContent::Video(media) => {
                (media, media_filename(content.kind(), media.mimetype.as_deref()))
            }
            MatrixContent::File { media, filename } => (media, filename.clone()),
            other => {
                let text = matrix_to_discord_text(sender, other).unwrap_or_default();
                return Ok(WebhookPost::text(username, text));
            }
        };

        self.media_post(username, media, filename).await
    }

    async fn media_post(
        &self,
        username: &str,
        media: &MatrixMedia,
        filename: String,
    ) -> Result<WebhookPost, RelayError> {
        let link = || WebhookPost::text(username, self.matrix.media_download_url(&media.url));

        if media.size.is_some_and(|size| size > self.max_discord_file_size) {
            debug!(url = %media.url, "media above the discord upload limit, posting a link");
            return Ok(link());
        }

        let downloaded = match self
            .matrix
            .download_media(&media.url, self.max_discord_file_size)
            .await
        {
            Ok(downloaded) => downloaded,
            Err(err) if err.downcast_ref::<MediaTooLarge>().is_some() => {
                debug!(url = %media.url, "downloaded media above the discord upload limit, posting a link");
                return Ok(link());
            }
            Err(err) => return Err(RelayError::Media(err)),
        };

        let content_type = media.mimetype.clone().or(Some(downloaded.content_type));
        Ok(WebhookPost::file(
            username,
            OutboundFile {
                filename,
                content_type,
                data: downloaded.data,
            },
        ))
    }
}
