use std::sync::Arc;

use serenity::async_trait;
use serenity::client::Client;
use serenity::model::application::component::ButtonStyle;
use serenity::model::application::interaction::{Interaction, InteractionResponseType};
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::model::id::ChannelId;
use serenity::prelude::*;

use crate::conversation_manager::{
    transition, Action, ConversationId, ConversationManager, ConversationState, Event, Reply,
    Transition, HELP_ID, START_CHAT_ID,
};

/// Discord rejects messages longer than this many characters.
const DISCORD_MESSAGE_LIMIT: usize = 2000;

const GENERIC_FAILURE_TEXT: &str = "Sorry, I couldn't get an answer right now. Please try again in a moment.";

/// Turns Discord DMs and button presses into conversation events.
struct Handler {
    conversations: Arc<ConversationManager>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn message(&self, context: Context, msg: Message) {
        // Ignore bot messages, including our own
        if msg.author.bot {
            return;
        }

        // Direct messages only, and only ones with text
        if msg.guild_id.is_some() || msg.content.trim().is_empty() {
            return;
        }

        let event = parse_message(&msg.content);
        tracing::debug!(user = %msg.author.name, ?event, "message received");

        let id = ConversationId(msg.author.id.0);
        if will_complete(self.conversations.state(id).await, &event) {
            if let Err(why) = msg.channel_id.broadcast_typing(&context.http).await {
                tracing::debug!(error = %why, "failed to send typing indicator");
            }
        }

        self.dispatch(&context, id, msg.channel_id, event).await;
    }

    async fn interaction_create(&self, context: Context, interaction: Interaction) {
        let Interaction::MessageComponent(component) = interaction else {
            return;
        };

        let Some(event) = parse_button(&component.data.custom_id) else {
            tracing::debug!(custom_id = %component.data.custom_id, "unknown button, ignoring");
            return;
        };

        if let Err(why) = component
            .create_interaction_response(&context.http, |response| {
                response.kind(InteractionResponseType::DeferredUpdateMessage)
            })
            .await
        {
            tracing::warn!(error = %why, "failed to acknowledge interaction");
        }

        self.dispatch(
            &context,
            ConversationId(component.user.id.0),
            component.channel_id,
            event,
        )
        .await;
    }

    async fn ready(&self, _: Context, ready: Ready) {
        tracing::info!(bot = %ready.user.name, "connected to Discord");
    }
}

impl Handler {
    async fn dispatch(&self, context: &Context, id: ConversationId, channel_id: ChannelId, event: Event) {
        let replies = match self.conversations.handle(id, event).await {
            Ok(replies) => replies,
            Err(error) => {
                tracing::error!(conversation = %id, %error, "completion failed");
                vec![Reply::Text(GENERIC_FAILURE_TEXT.to_string())]
            }
        };

        for reply in replies {
            if let Err(why) = send_reply(context, channel_id, reply).await {
                tracing::warn!(conversation = %id, error = %why, "failed to send reply");
            }
        }

        tracing::debug!(sessions = self.conversations.session_count(), "event handled");
    }
}

async fn send_reply(context: &Context, channel_id: ChannelId, reply: Reply) -> serenity::Result<()> {
    match reply {
        Reply::Text(text) => {
            for chunk in split_message(&text, DISCORD_MESSAGE_LIMIT) {
                channel_id.say(&context.http, chunk).await?;
            }
        }
        Reply::Menu { text, buttons } => {
            channel_id
                .send_message(&context.http, |message| {
                    message.content(text).components(|components| {
                        components.create_action_row(|row| {
                            for button in &buttons {
                                row.create_button(|b| {
                                    b.custom_id(&button.custom_id)
                                        .label(&button.label)
                                        .style(ButtonStyle::Primary)
                                });
                            }
                            row
                        })
                    })
                })
                .await?;
        }
    }
    Ok(())
}

/// Maps a DM to an event. `/start` and `!start` restart the conversation,
/// `/help` and `!help` show help, anything else is chat text.
fn parse_message(content: &str) -> Event {
    let command = content.trim();
    if command.eq_ignore_ascii_case("/start") || command.eq_ignore_ascii_case("!start") {
        Event::Welcome
    } else if command.eq_ignore_ascii_case("/help") || command.eq_ignore_ascii_case("!help") {
        Event::Help
    } else {
        Event::Text(content.to_string())
    }
}

/// Whether `event` will reach the completion API, which is when a typing
/// indicator is worth showing.
fn will_complete(state: ConversationState, event: &Event) -> bool {
    matches!(
        transition(state, event),
        Some(Transition {
            action: Action::Complete(_),
            ..
        })
    )
}

fn parse_button(custom_id: &str) -> Option<Event> {
    match custom_id {
        START_CHAT_ID => Some(Event::StartChat),
        HELP_ID => Some(Event::Help),
        _ => None,
    }
}

/// Splits text into chunks of at most `max_len` bytes, preferring newline
/// then space boundaries and never cutting inside a UTF-8 character. Only the
/// separator at a boundary is dropped, so indentation survives. Blank chunks
/// are skipped.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            if !remaining.trim().is_empty() {
                chunks.push(remaining.to_string());
            }
            break;
        }

        let mut boundary = max_len;
        while !remaining.is_char_boundary(boundary) {
            boundary -= 1;
        }

        let head = &remaining[..boundary];
        let (chunk, rest) = match head.rfind('\n').or_else(|| head.rfind(' ')) {
            Some(index) if index > 0 => (&remaining[..index], &remaining[index + 1..]),
            _ => (head, &remaining[boundary..]),
        };

        if !chunk.trim().is_empty() {
            chunks.push(chunk.to_string());
        }
        remaining = rest;
    }

    chunks
}

pub struct DiscordManager {
    discord_client: Client,
}

impl DiscordManager {
    pub async fn new(token: &str, conversations: Arc<ConversationManager>) -> Result<Self, serenity::Error> {
        let intents = GatewayIntents::DIRECT_MESSAGES | GatewayIntents::MESSAGE_CONTENT;
        let discord_client = Client::builder(token, intents)
            .event_handler(Handler { conversations })
            .await?;

        Ok(Self { discord_client })
    }

    pub async fn start(&mut self) -> Result<(), serenity::Error> {
        self.discord_client.start().await
    }
}
