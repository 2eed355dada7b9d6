use std::sync::Arc;

use chrono::Utc;
use once_cell::sync::OnceCell;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{ChannelMap, RelayConfig};
use crate::store::{CorrelationRecord, CorrelationStore, IdentityCache};
use crate::web::metrics::Metrics;

pub mod discord_to_matrix;
pub mod event;
pub mod format;
pub mod gateway;
pub mod matrix_to_discord;
pub mod outcome;

#[cfg(test)]
mod testing;

use self::event::{DiscordEdit, DiscordInbound, MatrixInbound};
use self::gateway::{DiscordGateway, MatrixGateway};
use self::outcome::{Direction, IgnoreReason, RelayError, RelayOutcome};

/// Routes events between the two platforms.
///
/// Each origin stream feeds events one at a time; the identity cache and the
/// correlation store are the only state shared between the two streams.
pub struct BridgeCore {
    channels: ChannelMap,
    identities: Arc<IdentityCache>,
    correlations: Arc<CorrelationStore>,
    discord: Arc<dyn DiscordGateway>,
    matrix: Arc<dyn MatrixGateway>,
    matrix_user_id: String,
    discord_user_id: OnceCell<String>,
    started_at_ms: i64,
    attachment_size_limit: u64,
    max_discord_file_size: u64,
}

impl BridgeCore {
    pub fn new(
        channels: ChannelMap,
        identities: Arc<IdentityCache>,
        correlations: Arc<CorrelationStore>,
        discord: Arc<dyn DiscordGateway>,
        matrix: Arc<dyn MatrixGateway>,
        matrix_user_id: &str,
        relay: &RelayConfig,
    ) -> Self {
        Self {
            channels,
            identities,
            correlations,
            discord,
            matrix,
            matrix_user_id: matrix_user_id.to_string(),
            discord_user_id: OnceCell::new(),
            started_at_ms: Utc::now().timestamp_millis(),
            attachment_size_limit: relay.attachment_size_limit,
            max_discord_file_size: relay.max_discord_file_size,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_start_time(mut self, started_at_ms: i64) -> Self {
        self.started_at_ms = started_at_ms;
        self
    }

    /// Records the bot's own Discord user id once the gateway reports it.
    pub fn set_discord_user_id(&self, user_id: &str) {
        if self.discord_user_id.set(user_id.to_string()).is_err() {
            debug!(user_id, "discord user id already known");
        } else {
            info!(user_id, "discord bot user id learned");
        }
    }

    pub fn identities(&self) -> &IdentityCache {
        &self.identities
    }

    pub fn correlations(&self) -> &CorrelationStore {
        &self.correlations
    }

    /// Handles one `m.room.message` timeline event from `/sync`.
    pub async fn on_matrix_sync_event(
        &self,
        room_id: &str,
        event: &Value,
    ) -> Result<RelayOutcome, RelayError> {
        Metrics::event_received(Direction::MatrixToDiscord);

        // Backfill is dropped before parsing.
        let sent_at = event.get("origin_server_ts").and_then(Value::as_i64);
        if sent_at.is_some_and(|ts| ts < self.started_at_ms) {
            let origin_id = event.get("event_id").and_then(Value::as_str).unwrap_or("<unknown>");
            let result = Ok(RelayOutcome::Ignored(IgnoreReason::Replay));
            self.report(Direction::MatrixToDiscord, origin_id, &result);
            return result;
        }

        let (origin_id, result) = match MatrixInbound::from_event_json(room_id, event) {
            Ok(inbound) => {
                let result = self.handle_matrix_event(&inbound).await;
                (inbound.event_id, result)
            }
            Err(err) => {
                let origin_id = event
                    .get("event_id")
                    .and_then(Value::as_str)
                    .unwrap_or("<unknown>")
                    .to_string();
                (origin_id, Err(RelayError::from(err)))
            }
        };

        self.report(Direction::MatrixToDiscord, &origin_id, &result);
        result
    }

    pub async fn on_discord_message(
        &self,
        message: &DiscordInbound,
    ) -> Result<RelayOutcome, RelayError> {
        Metrics::event_received(Direction::DiscordToMatrix);
        let result = self.handle_discord_message(message).await;
        self.report(Direction::DiscordToMatrix, &message.message_id, &result);
        result
    }

    pub async fn on_discord_edit(&self, edit: &DiscordEdit) -> Result<RelayOutcome, RelayError> {
        Metrics::event_received(Direction::DiscordToMatrix);
        let result = self.handle_discord_edit(edit).await;
        self.report(Direction::DiscordToMatrix, &edit.message_id, &result);
        result
    }

    fn report(
        &self,
        direction: Direction,
        origin_id: &str,
        result: &Result<RelayOutcome, RelayError>,
    ) {
        Metrics::record_outcome(direction, result);

        match result {
            Ok(RelayOutcome::Ignored(reason)) => {
                debug!(%direction, origin_id, reason = reason.as_str(), "event ignored");
            }
            Ok(RelayOutcome::Relayed { destination_id, .. }) => {
                info!(%direction, origin_id, destination_id = %destination_id, "message relayed");
            }
            Ok(RelayOutcome::Edited { destination_id, .. }) => {
                info!(%direction, origin_id, destination_id = %destination_id, "edit relayed");
            }
            Err(err) => {
                warn!(%direction, origin_id, kind = err.kind(), error = %err, "relay failed, event dropped");
            }
        }
    }

    /// Stores a correlation. A failed write is logged; the in-memory record stays usable.
    fn remember(&self, record: CorrelationRecord) {
        let origin_id = record.origin_id.clone();
        if let Err(err) = self.correlations.record(record) {
            Metrics::persistence_failure();
            warn!(origin_id = %origin_id, error = %err, "failed to persist message correlation");
        }
    }

    fn is_own_discord_account(&self, author_id: &str) -> bool {
        self.discord_user_id
            .get()
            .is_some_and(|own| own == author_id)
    }
}
