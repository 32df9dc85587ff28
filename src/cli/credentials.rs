use anyhow::Result;
use clap::Args;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Input, Password};
use log::warn;
use std::sync::Arc;

use crate::client::transport::ReqwestTransport;
use crate::client::{Credentials, Session};
use crate::settings::Settings;

/// Personal access tokens all start with this.
pub const TOKEN_PREFIX: &str = "vktrpat_";

#[derive(Args, Debug, Clone, Default)]
pub struct EnvironmentArgs {
    /// Environment domain, e.g. `acme.viktor.ai`
    #[arg(long, env = "PLATFORM_ENV")]
    pub env: Option<String>,

    /// Personal access token, e.g. `vktrpat_xxxxxx`
    #[arg(long, env = "PLATFORM_PAT", hide_env_values = true)]
    pub pat: Option<String>,

    /// Log in with a password instead of a token
    #[arg(long, env = "PLATFORM_USERNAME", conflicts_with = "pat")]
    pub username: Option<String>,
}

pub fn is_valid_token(token: &str) -> bool {
    token.len() > TOKEN_PREFIX.len() && token.starts_with(TOKEN_PREFIX)
}

/// First and last characters only.
pub fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= TOKEN_PREFIX.len() + 4 {
        return "*".repeat(chars.len());
    }
    let hidden = chars.len() - TOKEN_PREFIX.len() - 4;
    let head: String = chars[..TOKEN_PREFIX.len()].iter().collect();
    let tail: String = chars[TOKEN_PREFIX.len() + hidden..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(hidden))
}

impl EnvironmentArgs {
    /// Fills in whatever was not given on the command line or in the
    /// environment by asking on the terminal.
    pub fn resolve(&self) -> Result<(String, Credentials)> {
        let theme = ColorfulTheme::default();
        let env = match &self.env {
            Some(env) if !env.trim().is_empty() => env.trim().to_string(),
            _ => Input::<String>::with_theme(&theme)
                .with_prompt("Environment (e.g. acme.viktor.ai)")
                .interact_text()?,
        };

        if let Some(username) = &self.username {
            let password = Password::with_theme(&theme)
                .with_prompt(format!("Password for {username} on {env}"))
                .interact()?;
            return Ok((
                env,
                Credentials::Password {
                    username: username.clone(),
                    password,
                },
            ));
        }

        let token = match &self.pat {
            Some(pat) if is_valid_token(pat) => pat.clone(),
            given => {
                if given.is_some() {
                    warn!("The personal access token does not start with '{TOKEN_PREFIX}'");
                }
                Password::with_theme(&theme)
                    .with_prompt("Personal access token")
                    .validate_with(|input: &String| -> std::result::Result<(), String> {
                        if is_valid_token(input) {
                            Ok(())
                        } else {
                            Err(format!("a personal access token starts with '{TOKEN_PREFIX}'"))
                        }
                    })
                    .interact()?
            }
        };
        Ok((env, Credentials::Token(token)))
    }
}

pub async fn login(settings: &Settings, args: &EnvironmentArgs) -> Result<Arc<Session>> {
    let (env, credentials) = args.resolve()?;
    let transport = Arc::new(ReqwestTransport::new(settings.slow_request_threshold())?);
    let session = Session::login(&env, credentials, settings, transport).await?;
    Ok(Arc::new(session))
}

/// Logout failures are logged; they never replace the command's own result.
pub async fn release(session: &Session) {
    if let Err(e) = session.logout().await {
        warn!("Logging out of {} failed: {e}", session.domain());
    }
}
