//! Authentication: bearer token storage and viewer identity
//!
//! The backend issues a JWT at sign-in; this client only stores it and
//! reads the identity claims from its payload.

pub mod tokens;

use anyhow::{bail, Context, Result};

pub use tokens::{StoredToken, TokenStore};

use crate::config::Config;
use crate::models::Viewer;

/// Authenticated session: the bearer token plus who it belongs to.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub viewer: Viewer,
}

impl Session {
    /// Build the session from stored config, failing if there is no usable token.
    pub fn from_config(config: &Config) -> Result<Self> {
        let stored = config
            .get_token()
            .context("No token stored. Run 'autocare login --token <JWT>' first.")?;
        if stored.is_expired() {
            bail!("Token expired. Sign in again and run 'autocare login --token <JWT>'.");
        }
        let viewer = stored.viewer()?;
        Ok(Self {
            token: stored.token,
            viewer,
        })
    }
}

/// Store a bearer token after validating that it decodes.
pub async fn login(token: &str) -> Result<()> {
    let stored = StoredToken::from_jwt(token)?;
    if stored.is_expired() {
        bail!("Token is already expired");
    }
    let viewer = stored.viewer()?;

    let mut config = Config::load()?;
    config.set_token(stored);
    config.save()?;

    tracing::info!("Stored token for user {}", viewer.id);
    println!("Logged in as {} (id {})", viewer.name, viewer.id);
    Ok(())
}

/// Clear the stored token.
pub async fn logout() -> Result<()> {
    let mut config = Config::load()?;
    config.clear_tokens();
    config.save()?;
    println!("Logged out.");
    Ok(())
}

/// Print the stored identity and expiry.
pub async fn status() -> Result<()> {
    let config = Config::load()?;
    println!("API:       {}", config.api_base_url);
    println!("WebSocket: {}", config.ws_url);

    let Some(stored) = config.get_token() else {
        println!("Not logged in.");
        return Ok(());
    };

    match stored.viewer() {
        Ok(viewer) => println!("User:      {} (id {})", viewer.name, viewer.id),
        Err(e) => println!("User:      <unreadable token: {:#}>", e),
    }
    match stored
        .expires_at
        .and_then(|exp| chrono::DateTime::from_timestamp(exp, 0))
    {
        Some(exp) if stored.is_expired() => println!("Token:     expired ({})", exp),
        Some(exp) => println!("Token:     valid until {}", exp),
        None => println!("Token:     no expiry"),
    }
    Ok(())
}
