use dotenvy::dotenv;
use serenity::prelude::*;
use songbird::SerenityInit;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use wave_radio::catalog::{Catalog, YandexCatalog};
use wave_radio::config::{self, AppConfig, PlayerSettings};
use wave_radio::credentials::CredentialStore;
use wave_radio::discord::{AppState, AppStateKey, Handler, PanelNotifier};
use wave_radio::logging;
use wave_radio::policy::PolicyStore;
use wave_radio::SessionRegistry;

#[tokio::main]
async fn main() {
    dotenv().ok();

    let config_path = env::var("WAVE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(config::CONFIG_PATH));
    let (mut app_config, config_error) = match config::load_config(&config_path).await {
        Ok(cfg) => (cfg, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };
    app_config.merge_env_admins(env::var("ADMINS").ok());

    logging::init(app_config.logging.as_ref());
    if let Some(e) = config_error {
        warn!("could not load {}: {e}; using defaults", config_path.display());
    }

    let token = env::var("DISCORD_TOKEN").expect("DISCORD_TOKEN not set");

    let catalog: Arc<dyn Catalog> =
        Arc::new(YandexCatalog::new(&app_config.catalog).expect("Failed to build catalog client"));

    let policies = match PolicyStore::load(&app_config.policy_path).await {
        Ok(store) => store,
        Err(e) => {
            warn!("could not load {}: {e}; policies stay in memory", app_config.policy_path);
            PolicyStore::in_memory()
        }
    };

    let intents = GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_VOICE_STATES;

    let mut client = Client::builder(token, intents)
        .register_songbird()
        .event_handler(Handler)
        .await
        .expect("Err creating client");

    let panels = Arc::new(PanelNotifier::new(client.http.clone()));
    let registry = Arc::new(SessionRegistry::new(
        catalog.clone(),
        panels.clone(),
        Arc::new(policies),
        PlayerSettings::from(&app_config.player),
    ));

    {
        let mut data = client.data.write().await;
        data.insert::<AppStateKey>(Arc::new(AppState {
            registry: registry.clone(),
            credentials: CredentialStore::new(),
            catalog,
            panels,
            config: app_config,
            http: reqwest::Client::new(),
        }));
    }

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutting down");
            registry.stop_all("shutting down").await;
            shard_manager.shutdown_all().await;
        }
    });

    if let Err(why) = client.start().await {
        error!("Client error: {why:?}");
    }
}
