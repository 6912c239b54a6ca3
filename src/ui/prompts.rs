//! Confirmation prompt with CI/non-interactive fallback

use super::context::UiContext;
use crate::error::{LvCacheError, LvCacheResult};

/// Ask for confirmation; returns `default` when non-interactive
pub async fn confirm(ctx: &UiContext, message: &str, default: bool) -> LvCacheResult<bool> {
    if ctx.auto_yes() {
        println!("  {} (auto-approved)", message);
        return Ok(true);
    }

    if !ctx.is_interactive() {
        return Ok(default);
    }

    // cliclack blocks on the terminal
    let message = message.to_string();
    let result = tokio::task::spawn_blocking(move || {
        cliclack::confirm(&message)
            .initial_value(default)
            .interact()
    })
    .await
    .map_err(|e| LvCacheError::User(format!("Prompt task failed: {}", e)))?;

    result.map_err(|e| LvCacheError::User(format!("Prompt failed: {}", e)))
}
