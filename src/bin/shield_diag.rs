//! Headless diagnostics for the shield layer.
//!
//! Boots a shield against statically-described shims, runs the compatibility
//! probe and writes the resulting diagnostics snapshot as JSON to stdout.
//!
//! Environment:
//!
//! - `NAVSHIELD_CONFIG`: config file path (default: platform config dir)
//! - `NAVSHIELD_TIER`: `free`, `plus` or `pro` (default: `free`)
//! - `NAVSHIELD_MAPS_VERSION`, `NAVSHIELD_AI_VERSION`,
//!   `NAVSHIELD_ROUTING_VERSION`: version each shim reports; an unset
//!   variable makes that shim unavailable
//!
//! All tracing output goes to stderr so stdout stays machine-readable.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use navshield::component::ComponentId;
use navshield::shim::StaticShim;
use navshield::{ShieldBuilder, ShieldConfig, ShimSet, Tier};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("navshield=info")),
        )
        .init();

    let config = load_config()?;
    let tier = match std::env::var("NAVSHIELD_TIER") {
        Ok(raw) => raw
            .parse::<Tier>()
            .with_context(|| format!("NAVSHIELD_TIER={raw:?}"))?,
        Err(_) => Tier::Free,
    };

    let shims = ShimSet::new(
        static_shim(ComponentId::maps(), "NAVSHIELD_MAPS_VERSION"),
        static_shim(ComponentId::gemini(), "NAVSHIELD_AI_VERSION"),
        static_shim(ComponentId::here(), "NAVSHIELD_ROUTING_VERSION"),
    );

    let shield = ShieldBuilder::new(shims)
        .config(config)
        .tier(tier)
        .boot()
        .context("failed to boot shield")?;

    tracing::info!(
        tier = %tier,
        protective_mode = shield.is_protective_mode_active(),
        "shield booted"
    );

    let json = shield
        .diagnostics()
        .to_json()
        .context("failed to render diagnostics")?;
    println!("{json}");
    Ok(())
}

fn load_config() -> anyhow::Result<ShieldConfig> {
    let (path, explicit) = match std::env::var_os("NAVSHIELD_CONFIG") {
        Some(path) => (PathBuf::from(path), true),
        None => (ShieldConfig::default_config_path(), false),
    };

    if !explicit && !path.exists() {
        tracing::debug!(path = %path.display(), "no config file; using defaults");
        return Ok(ShieldConfig::default());
    }

    let config = ShieldConfig::from_file(&path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    tracing::info!(path = %path.display(), "loaded config");
    Ok(config)
}

fn static_shim(component: ComponentId, version_var: &str) -> Arc<StaticShim> {
    match std::env::var(version_var) {
        Ok(version) => Arc::new(StaticShim::new(component, Some(version.as_str()))),
        Err(_) => Arc::new(StaticShim::unavailable(component)),
    }
}
