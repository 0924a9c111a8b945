//! Typed accessors for client preferences

use super::keys;
use super::types::Theme;
use super::SqliteStorage;
use crate::error::{OpenChatError, Result};
use crate::scheduler::ScheduledPromptSettings;
use serde::de::DeserializeOwned;
use serde::Serialize;

impl SqliteStorage {
    fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        Ok(self.get_value(key)?.unwrap_or(default))
    }

    /// Whether the Terms of Service were accepted (default false)
    pub fn tos_accepted(&self) -> Result<bool> {
        self.get_or(keys::TOS_ACCEPTED, false)
    }

    /// Record Terms of Service acceptance
    pub fn set_tos_accepted(&self, accepted: bool) -> Result<()> {
        self.set_value(keys::TOS_ACCEPTED, &accepted)
    }

    /// Stored theme; an unrecognized value is reset to light
    pub fn theme(&self) -> Result<Theme> {
        let raw: Option<serde_json::Value> = self.get_value(keys::THEME)?;
        match raw.as_ref().and_then(|v| v.as_str()) {
            None if raw.is_none() => Ok(Theme::Light),
            Some("dark") => Ok(Theme::Dark),
            Some("light") => Ok(Theme::Light),
            _ => {
                tracing::warn!("Resetting corrupted theme value to light");
                self.set_theme(Theme::Light)?;
                Ok(Theme::Light)
            }
        }
    }

    /// Store the theme
    pub fn set_theme(&self, theme: Theme) -> Result<()> {
        self.set_value(keys::THEME, &theme)
    }

    /// Sidebar collapsed state (default false)
    pub fn sidebar_collapsed(&self) -> Result<bool> {
        self.get_or(keys::SIDEBAR_COLLAPSED, false)
    }

    /// Store the sidebar collapsed state
    pub fn set_sidebar_collapsed(&self, collapsed: bool) -> Result<()> {
        self.set_value(keys::SIDEBAR_COLLAPSED, &collapsed)
    }

    /// Web search toggle (default true)
    pub fn web_search_enabled(&self) -> Result<bool> {
        self.get_or(keys::WEB_SEARCH_ENABLED, true)
    }

    /// Store the web search toggle
    pub fn set_web_search_enabled(&self, enabled: bool) -> Result<()> {
        self.set_value(keys::WEB_SEARCH_ENABLED, &enabled)
    }

    /// Selected text model, or `default` when none was chosen
    pub fn selected_model(&self, default: &str) -> Result<String> {
        self.get_or(keys::SELECTED_MODEL, default.to_string())
    }

    /// Store the selected text model
    pub fn set_selected_model(&self, model: &str) -> Result<()> {
        self.set_value(keys::SELECTED_MODEL, model)
    }

    /// Selected image model, or `default` when none was chosen
    pub fn selected_image_model(&self, default: &str) -> Result<String> {
        self.get_or(keys::SELECTED_IMAGE_MODEL, default.to_string())
    }

    /// Store the selected image model
    pub fn set_selected_image_model(&self, model: &str) -> Result<()> {
        self.set_value(keys::SELECTED_IMAGE_MODEL, model)
    }

    /// Custom system prompt (default empty)
    pub fn system_prompt(&self) -> Result<String> {
        self.get_or(keys::SYSTEM_PROMPT, String::new())
    }

    /// Store the custom system prompt
    pub fn set_system_prompt(&self, prompt: &str) -> Result<()> {
        self.set_value(keys::SYSTEM_PROMPT, prompt)
    }

    /// Deployment password (default empty)
    pub fn deployment_password(&self) -> Result<String> {
        self.get_or(keys::DEPLOYMENT_PASSWORD, String::new())
    }

    /// Store the deployment password
    pub fn set_deployment_password(&self, password: &str) -> Result<()> {
        self.set_value(keys::DEPLOYMENT_PASSWORD, password)
    }

    /// Forget the deployment password
    pub fn clear_deployment_password(&self) -> Result<()> {
        self.remove_value(keys::DEPLOYMENT_PASSWORD)
    }

    /// Scheduled prompt section collapsed state (default true)
    pub fn scheduled_section_collapsed(&self) -> Result<bool> {
        self.get_or(keys::SCHEDULED_SECTION_COLLAPSED, true)
    }

    /// Store the scheduled prompt section collapsed state
    pub fn set_scheduled_section_collapsed(&self, collapsed: bool) -> Result<()> {
        self.set_value(keys::SCHEDULED_SECTION_COLLAPSED, &collapsed)
    }

    /// Scheduled prompt settings, if ever saved
    pub fn scheduled_prompt(&self) -> Result<Option<ScheduledPromptSettings>> {
        self.get_value(keys::SCHEDULED_PROMPT)
    }

    /// Store the scheduled prompt settings
    pub fn set_scheduled_prompt(&self, settings: &ScheduledPromptSettings) -> Result<()> {
        self.set_value(keys::SCHEDULED_PROMPT, settings)
    }

    /// Set a preference by its storage key from a command-line string
    ///
    /// # Errors
    ///
    /// Returns `OpenChatError::Validation` for an unknown key or a value that
    /// does not parse for that key.
    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        match key {
            keys::TOS_ACCEPTED => self.set_tos_accepted(parse_flag(key, value)?),
            keys::THEME => self.set_theme(value.parse().map_err(OpenChatError::Validation)?),
            keys::SIDEBAR_COLLAPSED => self.set_sidebar_collapsed(parse_flag(key, value)?),
            keys::WEB_SEARCH_ENABLED => self.set_web_search_enabled(parse_flag(key, value)?),
            keys::SELECTED_MODEL => self.set_selected_model(value),
            keys::SELECTED_IMAGE_MODEL => self.set_selected_image_model(value),
            keys::SYSTEM_PROMPT => self.set_system_prompt(value),
            keys::DEPLOYMENT_PASSWORD if value.is_empty() => self.clear_deployment_password(),
            keys::DEPLOYMENT_PASSWORD => self.set_deployment_password(value),
            keys::SCHEDULED_SECTION_COLLAPSED => {
                self.set_scheduled_section_collapsed(parse_flag(key, value)?)
            }
            other => Err(OpenChatError::Validation(format!(
                "Unknown setting: {} (expected one of {})",
                other,
                SETTABLE_KEYS.join(", ")
            ))
            .into()),
        }
    }

    /// All preferences as `(key, JSON value)` pairs, defaults applied
    pub fn settings_snapshot(
        &self,
        default_model: &str,
        default_image_model: &str,
    ) -> Result<Vec<(&'static str, serde_json::Value)>> {
        fn json<T: Serialize>(value: T) -> serde_json::Value {
            serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
        }

        let password_set = !self.deployment_password()?.is_empty();
        Ok(vec![
            (keys::TOS_ACCEPTED, json(self.tos_accepted()?)),
            (keys::THEME, json(self.theme()?)),
            (keys::SIDEBAR_COLLAPSED, json(self.sidebar_collapsed()?)),
            (keys::WEB_SEARCH_ENABLED, json(self.web_search_enabled()?)),
            (keys::SELECTED_MODEL, json(self.selected_model(default_model)?)),
            (
                keys::SELECTED_IMAGE_MODEL,
                json(self.selected_image_model(default_image_model)?),
            ),
            (keys::SYSTEM_PROMPT, json(self.system_prompt()?)),
            (
                keys::DEPLOYMENT_PASSWORD,
                json(if password_set { "(set)" } else { "" }),
            ),
            (
                keys::SCHEDULED_SECTION_COLLAPSED,
                json(self.scheduled_section_collapsed()?),
            ),
        ])
    }
}

/// Keys accepted by [`SqliteStorage::set_setting`]
pub const SETTABLE_KEYS: [&str; 9] = [
    keys::TOS_ACCEPTED,
    keys::THEME,
    keys::SIDEBAR_COLLAPSED,
    keys::WEB_SEARCH_ENABLED,
    keys::SELECTED_MODEL,
    keys::SELECTED_IMAGE_MODEL,
    keys::SYSTEM_PROMPT,
    keys::DEPLOYMENT_PASSWORD,
    keys::SCHEDULED_SECTION_COLLAPSED,
];

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => Err(OpenChatError::Validation(format!(
            "{} expects true or false, got {}",
            key, value
        ))
        .into()),
    }
}
