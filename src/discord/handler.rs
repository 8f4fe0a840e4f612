use serenity::all::Interaction;
use serenity::async_trait;
use serenity::builder::{
    CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage, CreateMessage,
    EditInteractionResponse,
};
use serenity::model::{channel::Message, gateway::Ready};
use serenity::model::id::{ChannelId, GuildId, MessageId, UserId};
use serenity::prelude::*;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::panel::{parse_button_id, PanelNotifier, EMBED_COLOR};
use super::voice::{self, SerenityChannel};
use crate::access::Action;
use crate::catalog::{Catalog, Credential};
use crate::config::AppConfig;
use crate::credentials::CredentialStore;
use crate::error::PlayerError;
use crate::registry::{Requester, SessionRegistry};
use crate::session::{ControlReply, SessionParams};
use crate::transport::VoiceChannel;

pub const PREFIX: &str = "!wave ";

type CommandResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Everything the gateway handlers need, stored in the client's TypeMap.
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub credentials: CredentialStore,
    pub catalog: Arc<dyn Catalog>,
    pub panels: Arc<PanelNotifier>,
    pub config: AppConfig,
    pub http: reqwest::Client,
}

pub struct AppStateKey;
impl TypeMapKey for AppStateKey {
    type Value = Arc<AppState>;
}

pub struct Handler;

/// The parts of a message the command handlers use.
struct Invocation {
    channel_id: ChannelId,
    message_id: MessageId,
    guild_id: Option<GuildId>,
    author_id: UserId,
    author_name: String,
}

async fn app_state(ctx: &Context) -> Option<Arc<AppState>> {
    ctx.data.read().await.get::<AppStateKey>().cloned()
}

async fn send_info(ctx: &Context, channel: ChannelId, title: &str, desc: &str) -> CommandResult {
    let embed = CreateEmbed::new()
        .title(title)
        .description(desc)
        .color(EMBED_COLOR);
    channel
        .send_message(&ctx.http, CreateMessage::new().embed(embed))
        .await?;
    Ok(())
}

fn is_server_admin(ctx: &Context, guild_id: GuildId, user_id: UserId) -> bool {
    let Some(guild) = ctx.cache.guild(guild_id) else {
        return false;
    };
    if guild.owner_id == user_id {
        return true;
    }
    let Some(member) = guild.members.get(&user_id) else {
        return false;
    };
    member
        .roles
        .iter()
        .filter_map(|r| guild.roles.get(r))
        .any(|role| role.permissions.administrator() || role.permissions.manage_guild())
}

fn requester(
    ctx: &Context,
    state: &AppState,
    guild_id: GuildId,
    user_id: UserId,
    user_name: &str,
) -> Requester {
    Requester {
        user_id,
        server_admin: is_server_admin(ctx, guild_id, user_id),
        global_admin: state.config.is_global_admin(user_id.get(), user_name),
        voice_channel: voice::voice_channel_for_user_id(&ctx.cache, guild_id, user_id),
        credential: state.credentials.get(user_id),
    }
}

pub fn describe_reply(reply: &ControlReply) -> String {
    match reply {
        ControlReply::Paused => "Paused.".to_string(),
        ControlReply::Resumed => "Resumed.".to_string(),
        ControlReply::Skipped => "Skipped.".to_string(),
        ControlReply::Previous(track) => format!("Back to {track}."),
        ControlReply::Stopped => "Stopped.".to_string(),
        ControlReply::Liked(track) => format!("Liked {track}."),
        ControlReply::LikeRejected(track) => format!("Could not like {track}."),
    }
}

fn outcome_text(outcome: &crate::Result<ControlReply>) -> String {
    match outcome {
        Ok(reply) => describe_reply(reply),
        Err(e) => e.to_string(),
    }
}

fn help_embed() -> CreateEmbed {
    let fields: Vec<(String, String, bool)> = [
        ("login <token>", "Link your catalog account (message is deleted)"),
        ("logout", "Forget your catalog account"),
        ("account", "Show the linked account and its subscription"),
        ("play [station]", "Start the wave in your voice channel"),
        ("pause / resume", "Pause or resume playback"),
        ("skip / prev", "Next or previous track"),
        ("like", "Like the current track on your account"),
        ("stop", "Stop and leave the channel"),
        ("public on|off", "Let listeners in the channel control the player"),
        ("status", "Show the player state"),
        ("ping", "Pong reply"),
    ]
    .iter()
    .map(|(name, desc)| (format!("{}{}", PREFIX, name), (*desc).to_string(), false))
    .collect();

    CreateEmbed::new()
        .title("Help Menu")
        .description("Use the commands below with the prefix")
        .color(EMBED_COLOR)
        .fields(fields)
}

async fn play(ctx: &Context, state: &AppState, inv: &Invocation, args: &str) -> CommandResult {
    let guild_id = inv.guild_id.ok_or("This command only works in a server")?;

    let status = state.registry.is_active(guild_id);
    if status.active {
        let owner = status.owner.map(|o| format!(" (started by <@{o}>)")).unwrap_or_default();
        return send_info(ctx, inv.channel_id, "Wave", &format!("Already playing here{owner}.")).await;
    }

    let Some(credential) = state.credentials.get(inv.author_id) else {
        return send_info(ctx, inv.channel_id, "Wave", &PlayerError::NotLoggedIn.to_string()).await;
    };

    let Some(voice_channel) = voice::voice_channel_for_user_id(&ctx.cache, guild_id, inv.author_id)
    else {
        return send_info(ctx, inv.channel_id, "Wave", "Join a voice channel first.").await;
    };

    let channel = SerenityChannel::new(ctx.cache.clone(), guild_id, voice_channel);
    let bot_id = ctx.cache.current_user().id;
    if !channel.permissions_granted(bot_id) {
        return send_info(
            ctx,
            inv.channel_id,
            "Wave",
            &format!("I need Connect and Speak permissions in <#{}>.", voice_channel.get()),
        )
        .await;
    }

    let manager = songbird::get(ctx)
        .await
        .ok_or("Songbird Voice client placed in at initialisation.")?
        .clone();
    let (transport, watch) =
        voice::connect(manager, channel, state.http.clone(), state.config.player.volume).await?;

    let station_id = match args.trim() {
        "" => state.config.catalog.station.clone(),
        s => s.to_string(),
    };
    let params = SessionParams {
        server_id: guild_id,
        owner: inv.author_id,
        credential,
        station_id,
    };

    state.panels.bind(guild_id, inv.channel_id);
    info!(guild = %guild_id, user = %inv.author_id, "starting wave");
    match state.registry.create_session(params, transport).await {
        // Only the winning session may claim the call's disconnect events.
        Ok(_) => watch.install().await,
        Err(e) => {
            warn!(guild = %guild_id, "could not start wave: {e}");
            send_info(ctx, inv.channel_id, "Wave", &format!("Could not start: {e}")).await?;
        }
    }
    Ok(())
}

async fn login(ctx: &Context, state: &AppState, inv: &Invocation, token: &str) -> CommandResult {
    // The token must not stay visible in the channel.
    if let Err(e) = inv.channel_id.delete_message(&ctx.http, inv.message_id).await {
        warn!("could not delete login message: {e:?}");
    }

    let token = token.trim();
    if token.is_empty() {
        return send_info(ctx, inv.channel_id, "Login", &format!("Usage: {PREFIX}login <token>")).await;
    }

    let account = match state.catalog.fetch_account(token).await {
        Ok(account) => account,
        Err(e) => {
            warn!(user = %inv.author_id, "account lookup failed: {e}");
            return send_info(ctx, inv.channel_id, "Login", "That token was not accepted.").await;
        }
    };
    if !account.has_plus {
        return send_info(ctx, inv.channel_id, "Login", "The wave needs an active Plus subscription.").await;
    }

    let name = account.login.clone().unwrap_or_else(|| "your account".to_string());
    state.credentials.login(
        inv.author_id,
        Credential {
            token: token.to_string(),
            catalog_user_id: account.uid.clone(),
        },
        account,
    );
    send_info(ctx, inv.channel_id, "Login", &format!("<@{}> logged in as {name}.", inv.author_id)).await
}

async fn account(ctx: &Context, state: &AppState, inv: &Invocation) -> CommandResult {
    let Some(account) = state.credentials.account(inv.author_id) else {
        return send_info(ctx, inv.channel_id, "Account", &PlayerError::NotLoggedIn.to_string()).await;
    };

    let embed = CreateEmbed::new()
        .title("Your catalog account")
        .color(EMBED_COLOR)
        .field("Login", account.login.as_deref().unwrap_or("unknown"), true)
        .field("User id", &account.uid, true)
        .field("Plus", if account.has_plus { "active" } else { "none" }, true);
    inv.channel_id
        .send_message(&ctx.http, CreateMessage::new().embed(embed))
        .await?;
    Ok(())
}

async fn public(ctx: &Context, state: &AppState, inv: &Invocation, args: &str) -> CommandResult {
    let guild_id = inv.guild_id.ok_or("This command only works in a server")?;
    if !is_server_admin(ctx, guild_id, inv.author_id)
        && !state.config.is_global_admin(inv.author_id.get(), &inv.author_name)
    {
        return send_info(ctx, inv.channel_id, "Wave", "Only server admins can change this.").await;
    }

    let enabled = match args.trim() {
        "on" => true,
        "off" => false,
        _ => {
            let current = state.registry.public_control(guild_id).await;
            let mode = if current { "on" } else { "off" };
            return send_info(ctx, inv.channel_id, "Wave", &format!("Public control is {mode}. Use `{PREFIX}public on|off`.")).await;
        }
    };

    let persisted = state.registry.set_public_control(guild_id, enabled).await;
    let mode = if enabled { "on" } else { "off" };
    let note = if persisted { "" } else { " (could not be saved, applies until restart)" };
    send_info(ctx, inv.channel_id, "Wave", &format!("Public control {mode}{note}.")).await
}

async fn status(ctx: &Context, state: &AppState, inv: &Invocation) -> CommandResult {
    let guild_id = inv.guild_id.ok_or("This command only works in a server")?;
    let Some(handle) = state.registry.get(guild_id) else {
        return send_info(ctx, inv.channel_id, "Wave", "Nothing is playing.").await;
    };

    let snapshot = handle.snapshot();
    let track = snapshot
        .current
        .as_ref()
        .map(|t| t.to_string())
        .unwrap_or_else(|| "none".to_string());
    let desc = format!(
        "State: {}\nTrack: {}\nOwner: <@{}>\nQueued: {}\nPublic control: {}",
        snapshot.state.as_str(),
        track,
        snapshot.owner,
        snapshot.pending.len(),
        if snapshot.public_control { "on" } else { "off" },
    );
    send_info(ctx, inv.channel_id, "Wave", &desc).await
}

async fn control(ctx: &Context, state: &AppState, inv: &Invocation, action: Action) -> CommandResult {
    let guild_id = inv.guild_id.ok_or("This command only works in a server")?;
    let who = requester(ctx, state, guild_id, inv.author_id, &inv.author_name);
    let text = outcome_text(&state.registry.dispatch(guild_id, &who, action).await);
    send_info(ctx, inv.channel_id, "Wave", &text).await
}

async fn handle_command(ctx: &Context, inv: Invocation, command: &str) -> CommandResult {
    let Some(state) = app_state(ctx).await else {
        return Err("app state missing from client data".into());
    };

    let mut parts = command.split_whitespace();
    let cmd = parts.next().unwrap_or("").to_ascii_lowercase();
    let args = parts.collect::<Vec<_>>().join(" ");

    match cmd.as_str() {
        "ping" => {
            inv.channel_id.say(&ctx.http, "Pong!").await?;
        }
        "help" | "" => {
            inv.channel_id
                .send_message(&ctx.http, CreateMessage::new().embed(help_embed()))
                .await?;
        }
        "play" | "start" => play(ctx, &state, &inv, &args).await?,
        "login" => login(ctx, &state, &inv, &args).await?,
        "logout" => {
            let text = if state.credentials.logout(inv.author_id) {
                "Logged out."
            } else {
                "You were not logged in."
            };
            send_info(ctx, inv.channel_id, "Login", text).await?;
        }
        "account" | "me" => account(ctx, &state, &inv).await?,
        "public" => public(ctx, &state, &inv, &args).await?,
        "status" => status(ctx, &state, &inv).await?,
        other => match Action::parse(other) {
            Some(action) => control(ctx, &state, &inv, action).await?,
            None => debug!(command = other, "unknown command"),
        },
    }
    Ok(())
}

#[async_trait]
impl EventHandler for Handler {
    async fn message(&self, ctx: Context, msg: Message) {
        // move any data we need out of the `Message` before awaiting
        let author_is_bot = msg.author.bot;
        let inv = Invocation {
            channel_id: msg.channel_id,
            message_id: msg.id,
            guild_id: msg.guild_id,
            author_id: msg.author.id,
            author_name: msg.author.name.clone(),
        };
        let content = msg.content.clone();
        drop(msg);

        if author_is_bot {
            return;
        }

        let Some(command) = content.trim().strip_prefix(PREFIX.trim_end()) else {
            return;
        };
        // "!wavefoo" is not ours.
        if !command.is_empty() && !command.starts_with(char::is_whitespace) {
            return;
        }

        let channel_id = inv.channel_id;
        if let Err(why) = handle_command(&ctx, inv, command.trim()).await {
            error!("Error handling command: {why:?}");
            let _ = send_info(&ctx, channel_id, "Wave", "Something went wrong.").await;
        }
    }

    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("Connected as {}", ready.user.name);
        info!("Ready: {} guilds", ctx.cache.guild_count());
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Interaction::Component(mc) = interaction else {
            return;
        };
        // custom_id format: wave:<action>:<guild_id>
        let Some((action, guild_id)) = parse_button_id(&mc.data.custom_id) else {
            return;
        };
        let Some(state) = app_state(&ctx).await else {
            return;
        };

        // Skips can wait on the catalog, so acknowledge before dispatching.
        let deferred = CreateInteractionResponse::Defer(
            CreateInteractionResponseMessage::new().ephemeral(true),
        );
        if let Err(e) = mc.create_response(&ctx.http, deferred).await {
            warn!(guild = %guild_id, "failed to acknowledge button: {e:?}");
            return;
        }

        let who = requester(&ctx, &state, guild_id, mc.user.id, &mc.user.name);
        let text = outcome_text(&state.registry.dispatch(guild_id, &who, action).await);
        let edit = EditInteractionResponse::new().content(text);
        if let Err(e) = mc.edit_response(&ctx.http, edit).await {
            warn!(guild = %guild_id, "failed to answer button: {e:?}");
        }
    }
}
