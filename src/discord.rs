use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serenity::all::{
    ChannelId, Client as SerenityClient, Context as SerenityContext, CreateAllowedMentions,
    CreateAttachment, CreateWebhook, EditWebhookMessage, EventHandler as SerenityEventHandler, ExecuteWebhook,
    GatewayIntents, Http, Message as SerenityMessage, MessageId, MessageUpdateEvent, Ready,
    Webhook,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bridge::BridgeCore;
use crate::bridge::event::{DiscordAttachment, DiscordEdit, DiscordInbound};
use crate::bridge::gateway::{DiscordGateway, WebhookPost};
use crate::config::DiscordConfig;
use crate::store::{IdentityProvisioner, WebhookCredential};

const MAX_WEBHOOK_NAME_LEN: usize = 80;
const FALLBACK_WEBHOOK_NAME: &str = "matrix user";

/// Gateway events handed from serenity's callbacks to the relay worker.
#[derive(Debug)]
enum DiscordEvent {
    Message(DiscordInbound),
    Edit(DiscordEdit),
}

struct RelayEventHandler {
    bridge: Arc<BridgeCore>,
    events: mpsc::UnboundedSender<DiscordEvent>,
}

impl RelayEventHandler {
    fn forward(&self, event: DiscordEvent) {
        if self.events.send(event).is_err() {
            warn!("discord relay worker has stopped, dropping gateway event");
        }
    }
}

#[serenity::async_trait]
impl SerenityEventHandler for RelayEventHandler {
    async fn ready(&self, _ctx: SerenityContext, ready: Ready) {
        info!(
            "discord gateway ready as {} ({})",
            ready.user.name, ready.user.id
        );
        self.bridge.set_discord_user_id(&ready.user.id.to_string());
    }

    async fn message(&self, _ctx: SerenityContext, msg: SerenityMessage) {
        self.forward(DiscordEvent::Message(inbound_message(&msg)));
    }

    async fn message_update(
        &self,
        _ctx: SerenityContext,
        _old_if_available: Option<SerenityMessage>,
        _new_if_available: Option<SerenityMessage>,
        update: MessageUpdateEvent,
    ) {
        self.forward(DiscordEvent::Edit(DiscordEdit {
            message_id: update.id.to_string(),
            channel_id: update.channel_id.to_string(),
            author_id: update.author.as_ref().map(|author| author.id.to_string()),
            author_name: update.author.as_ref().map(|author| author.name.clone()),
            content: update.content.clone(),
        }));
    }
}

fn inbound_message(msg: &SerenityMessage) -> DiscordInbound {
    let author_id = match msg.webhook_id {
        Some(webhook_id) => webhook_id.to_string(),
        None => msg.author.id.to_string(),
    };

    DiscordInbound {
        message_id: msg.id.to_string(),
        channel_id: msg.channel_id.to_string(),
        author_id,
        author_name: msg.author.name.clone(),
        content: msg.content.clone(),
        attachments: msg
            .attachments
            .iter()
            .map(|attachment| DiscordAttachment {
                url: attachment.url.clone(),
                filename: attachment.filename.clone(),
                content_type: attachment.content_type.clone(),
                size: u64::from(attachment.size),
            })
            .collect(),
    }
}

/// Bot REST session plus the gateway connection that feeds the bridge.
pub struct DiscordClient {
    http: Arc<Http>,
    bot_token: SecretString,
    disable_everyone_mention: bool,
}

impl DiscordClient {
    pub fn new(config: &DiscordConfig) -> Self {
        let token = config.bot_token.expose_secret();
        Self {
            http: Arc::new(Http::new(token)),
            bot_token: SecretString::new(token.into()),
            disable_everyone_mention: config.disable_everyone_mention,
        }
    }

    /// Connects to the gateway and relays events until the connection ends.
    ///
    /// Events are queued to a single worker so each message is fully handled before the next.
    pub async fn run_gateway(&self, bridge: Arc<BridgeCore>) -> Result<()> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        let worker_bridge = bridge.clone();
        let worker = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                // Outcomes are logged and counted by the bridge.
                let _ = match event {
                    DiscordEvent::Message(message) => worker_bridge.on_discord_message(&message).await,
                    DiscordEvent::Edit(edit) => worker_bridge.on_discord_edit(&edit).await,
                };
            }
            debug!("discord relay worker finished");
        });

        let intents = GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;
        let handler = RelayEventHandler {
            bridge,
            events: events_tx,
        };

        let mut gateway_client = SerenityClient::builder(self.bot_token.expose_secret(), intents)
            .event_handler(handler)
            .await
            .map_err(|err| anyhow!("failed to build discord gateway client: {err}"))?;

        info!("connecting to the discord gateway");
        let result = gateway_client.start_autosharded().await;
        worker.abort();
        result.map_err(|err| anyhow!("discord gateway stopped: {err}"))
    }

    async fn webhook(&self, credential: &WebhookCredential) -> Result<Webhook> {
        let webhook_url = format!(
            "https://discord.com/api/webhooks/{}/{}",
            credential.id, credential.token
        );
        Webhook::from_url(self.http.as_ref(), &webhook_url)
            .await
            .map_err(|e| anyhow!("failed to load webhook {}: {}", credential.id, e))
    }
}

#[async_trait]
impl IdentityProvisioner for DiscordClient {
    async fn provision(&self, channel_id: &str, display_name: &str) -> Result<WebhookCredential> {
        let channel = ChannelId::new(parse_snowflake(channel_id)?);
        let webhook = channel
            .create_webhook(self.http.as_ref(), CreateWebhook::new(webhook_name(display_name)))
            .await
            .map_err(|e| anyhow!("failed to create webhook in channel {}: {}", channel_id, e))?;

        let url = webhook
            .url()
            .map_err(|e| anyhow!("created webhook has no url: {}", e))?;
        let token = token_from_webhook_url(&url)
            .ok_or_else(|| anyhow!("created webhook has no token"))?;

        info!(channel_id, webhook_id = %webhook.id, "created impersonation webhook");
        Ok(WebhookCredential {
            id: webhook.id.to_string(),
            token: token.to_string(),
        })
    }
}

#[async_trait]
impl DiscordGateway for DiscordClient {
    async fn execute_webhook(&self, credential: &WebhookCredential, post: WebhookPost) -> Result<String> {
        let webhook = self.webhook(credential).await?;

        let mut builder = ExecuteWebhook::new()
            .username(webhook_name(&post.username))
            .allowed_mentions(allowed_mentions(self.disable_everyone_mention));
        if let Some(content) = post.content {
            builder = builder.content(content);
        }
        if let Some(file) = post.file {
            builder = builder.add_file(CreateAttachment::bytes(file.data, file.filename));
        }

        let message = webhook
            .execute(self.http.as_ref(), true, builder)
            .await
            .map_err(|e| anyhow!("webhook send failed: {}", e))?
            .ok_or_else(|| anyhow!("webhook execution returned no message"))?;

        debug!(webhook_id = %credential.id, message_id = %message.id, "sent message via webhook");
        Ok(message.id.to_string())
    }

    async fn edit_webhook_message(
        &self,
        credential: &WebhookCredential,
        message_id: &str,
        content: &str,
    ) -> Result<()> {
        let webhook = self.webhook(credential).await?;
        let message_id = MessageId::new(parse_snowflake(message_id)?);

        webhook
            .edit_message(
                self.http.as_ref(),
                message_id,
                EditWebhookMessage::new()
                    .content(content)
                    .allowed_mentions(allowed_mentions(self.disable_everyone_mention)),
            )
            .await
            .map_err(|e| anyhow!("webhook edit failed: {}", e))?;

        debug!(webhook_id = %credential.id, message_id = %message_id, "edited message via webhook");
        Ok(())
    }
}

/// User and role pings pass through; `@everyone`/`@here` only when allowed.
fn allowed_mentions(disable_everyone: bool) -> CreateAllowedMentions {
    CreateAllowedMentions::new()
        .everyone(!disable_everyone)
        .all_users(true)
        .all_roles(true)
}

fn parse_snowflake(id: &str) -> Result<u64> {
    match id.parse::<u64>() {
        Ok(0) => Err(anyhow!("invalid discord id: {id}")),
        Ok(value) => Ok(value),
        Err(e) => Err(anyhow!("invalid discord id {}: {}", id, e)),
    }
}

/// `https://discord.com/api/webhooks/<id>/<token>` -> `<token>`.
fn token_from_webhook_url(url: &str) -> Option<&str> {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|token| !token.is_empty() && !token.contains(':'))
}

/// Discord rejects webhook names containing "discord" or "clyde" and caps them at 80 characters.
fn webhook_name(display_name: &str) -> String {
    let mut name = display_name.trim().to_string();
    for banned in ["discord", "clyde"] {
        while let Some(pos) = name.to_ascii_lowercase().find(banned) {
            name.replace_range(pos..pos + banned.len(), "");
        }
    }

    let name: String = name.trim().chars().take(MAX_WEBHOOK_NAME_LEN).collect();
    if name.is_empty() {
        FALLBACK_WEBHOOK_NAME.to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::{allowed_mentions, parse_snowflake, token_from_webhook_url, webhook_name};

    fn parsed_mentions(disable_everyone: bool) -> Vec<String> {
        let value = serde_json::to_value(allowed_mentions(disable_everyone)).expect("serialize mentions");
        value["parse"]
            .as_array()
            .expect("parse list")
            .iter()
            .filter_map(|kind| kind.as_str().map(str::to_string))
            .collect()
    }

    #[test]
    fn everyone_pings_are_suppressed_when_disabled() {
        let parsed = parsed_mentions(true);

        assert!(!parsed.contains(&"everyone".to_string()));
        assert!(parsed.contains(&"users".to_string()));
        assert!(parsed.contains(&"roles".to_string()));
    }

    #[test]
    fn everyone_pings_pass_when_enabled() {
        assert!(parsed_mentions(false).contains(&"everyone".to_string()));
    }

    #[test]
    fn parses_snowflakes() {
        assert_eq!(parse_snowflake("1235678930234").ok(), Some(1_235_678_930_234));
        assert!(parse_snowflake("0").is_err());
        assert!(parse_snowflake("general").is_err());
    }

    #[test]
    fn extracts_the_token_from_a_webhook_url() {
        assert_eq!(
            token_from_webhook_url("https://discord.com/api/webhooks/123/abc-DEF_ghi"),
            Some("abc-DEF_ghi")
        );
        assert_eq!(token_from_webhook_url("https://"), None);
    }

    #[test_case("alice", "alice" ; "plain name")]
    #[test_case("  bob  ", "bob" ; "trimmed")]
    #[test_case("DiscordFan", "Fan" ; "banned word removed")]
    #[test_case("clyde", "matrix user" ; "only a banned word")]
    #[test_case("", "matrix user" ; "empty")]
    fn sanitises_webhook_names(display_name: &str, expected: &str) {
        assert_eq!(webhook_name(display_name), expected);
    }

    #[test]
    fn long_names_are_truncated() {
        assert_eq!(webhook_name(&"x".repeat(200)).chars().count(), 80);
    }
}
