use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use zone::{AssetCatalog, AssetSource, PlayerRemovalPolicy, ServerConfig, WorldConfig};

use crate::Args;

pub fn server_config(args: &Args) -> anyhow::Result<ServerConfig> {
    let removal_policy: PlayerRemovalPolicy = args
        .removal_policy
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    Ok(ServerConfig {
        world: WorldConfig {
            tick_rate: args.tick_rate,
            sync_rate: args.sync_rate,
            removal_policy,
            ..Default::default()
        },
        max_clients: args.max_clients,
        level: (!args.level.is_empty()).then(|| args.level.clone()),
        ai_players: args.ai_players,
        ..Default::default()
    })
}

/// The catalog at `path`, or the built-in one.
pub fn asset_source(path: Option<&Path>) -> anyhow::Result<Arc<dyn AssetSource>> {
    let catalog = match path {
        Some(path) => AssetCatalog::load(path)
            .with_context(|| format!("failed to load asset catalog {}", path.display()))?,
        None => AssetCatalog::builtin(),
    };
    Ok(Arc::new(catalog))
}
