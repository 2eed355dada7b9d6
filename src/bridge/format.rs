//! Text conversion between Matrix events and Discord messages.

use std::fmt::Write as _;

use pulldown_cmark::{Event, Options, Parser, html};

use super::event::{DiscordAttachment, MatrixContent};

/// `@alice:example.org` -> `alice`.
pub fn strip_matrix_name(user_id: &str) -> &str {
    let localpart = user_id.split(':').next().unwrap_or(user_id);
    localpart.strip_prefix('@').unwrap_or(localpart)
}

/// Discord text for a Matrix message, or `None` for kinds without a text body.
pub fn matrix_to_discord_text(sender: &str, content: &MatrixContent) -> Option<String> {
    match content {
        MatrixContent::Emote { body } => {
            Some(format!("* **{}** {}", strip_matrix_name(sender), body))
        }
        MatrixContent::Text { body } | MatrixContent::Notice { body } => Some(body.clone()),
        MatrixContent::Image(media) | MatrixContent::Audio(media) | MatrixContent::Video(media) => {
            Some(media.body.clone())
        }
        MatrixContent::File { media, .. } => Some(media.body.clone()),
        MatrixContent::Replace { new_content, .. } => matrix_to_discord_text(sender, new_content),
        MatrixContent::Unknown { .. } => None,
    }
}

pub fn discord_to_matrix_plain(sender: &str, content: &str) -> String {
    format!("{sender}: {content}")
}

pub fn discord_to_matrix_html(sender: &str, content: &str) -> String {
    // Markup typed on Discord is shown literally, never interpreted by Matrix clients.
    let events = Parser::new_ext(content, Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TABLES)
        .map(|event| match event {
            Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
            other => other,
        });
    let mut rendered = String::new();
    html::push_html(&mut rendered, events);

    let rendered = rendered.trim();
    let rendered = rendered
        .strip_prefix("<p>")
        .and_then(|inner| inner.strip_suffix("</p>"))
        .unwrap_or(rendered);

    format!("<b>{}</b>: {}", escape_html(sender), rendered)
}

/// Human-readable size with one decimal, e.g. `1.5 kB`.
pub fn file_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;

    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} kB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Plain and HTML listing of attachments that are linked rather than uploaded.
pub fn attachment_summary(sender: &str, attachments: &[DiscordAttachment]) -> (String, String) {
    let mut plain = format!("{sender} uploaded files");
    let mut html = format!(
        "<b>{}</b> uploaded files<table><tr><th>Link</th><th>MIME Type</th><th>Size</th></tr>",
        escape_html(sender)
    );

    for attachment in attachments {
        let size = file_size(attachment.size);
        let _ = write!(
            html,
            "<tr><td><a href=\"{}\">{}</a></td><td>{}</td><td>{}</td></tr>",
            escape_html(&attachment.url),
            escape_html(&attachment.filename),
            escape_html(attachment.content_type.as_deref().unwrap_or("")),
            size
        );
        let _ = write!(plain, "\n{} ({}): {}", attachment.filename, size, attachment.url);
    }
    html.push_str("</table>");

    (plain, html)
}

/// File name for relayed Matrix media: the message kind plus an extension for the MIME type.
pub fn media_filename(kind: &str, mimetype: Option<&str>) -> String {
    let extension = mimetype
        .and_then(mime_guess::get_mime_extensions_str)
        .and_then(|extensions| extensions.first());

    match extension {
        Some(extension) => format!("{kind}.{extension}"),
        None => kind.to_string(),
    }
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
