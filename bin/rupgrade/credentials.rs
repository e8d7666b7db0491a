use std::path::Path;

use anyhow::{Context, Result, bail};
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input, Password};
use rupgrade::model::CredentialSet;

/// Credential sets from a JSON file, or asked for interactively when no file
/// is given.
pub fn load(path: Option<&Path>) -> Result<Vec<CredentialSet>> {
    let credentials = match path {
        Some(path) => from_file(path)?,
        None => prompt()?,
    };
    if credentials.is_empty() {
        bail!("at least one credential set is required");
    }
    Ok(credentials)
}

/// `[{"username": "...", "password": "...", "secret": "..."}]`, secret optional.
fn from_file(path: &Path) -> Result<Vec<CredentialSet>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read credentials from {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("invalid credentials file {}", path.display()))
}

fn prompt() -> Result<Vec<CredentialSet>> {
    let theme = ColorfulTheme::default();
    let mut credentials = Vec::new();
    loop {
        let username: String = Input::with_theme(&theme)
            .with_prompt("Username")
            .interact_text()?;
        let password: String = Password::with_theme(&theme)
            .with_prompt("Password")
            .interact()?;
        let secret: String = Password::with_theme(&theme)
            .with_prompt("Enable secret (blank for none)")
            .allow_empty_password(true)
            .interact()?;

        let mut set = CredentialSet::new(username, password);
        if !secret.is_empty() {
            set = set.with_secret(secret);
        }
        credentials.push(set);

        let more = Confirm::with_theme(&theme)
            .with_prompt("Add another credential set?")
            .default(false)
            .interact()?;
        if !more {
            break;
        }
    }
    Ok(credentials)
}
