//! `openchat schedule`

use super::{open_storage, proxy_client};
use crate::cli::ScheduleCommand;
use crate::config::Config;
use crate::error::{OpenChatError, Result};
use crate::scheduler::{ScheduledPromptSettings, Scheduler, WebSearchChoice};
use chrono::Local;
use colored::Colorize;
use tokio_util::sync::CancellationToken;

/// Changes requested by `openchat schedule set`
#[derive(Debug, Clone, Default)]
pub struct ScheduleUpdate {
    /// New prompt text
    pub prompt: Option<String>,
    /// New hour
    pub hour: Option<u32>,
    /// New minute
    pub minute: Option<u32>,
    /// New model; empty clears the override
    pub model: Option<String>,
    /// New web search choice
    pub web_search: Option<String>,
    /// Turn the schedule on
    pub enable: bool,
    /// Turn the schedule off
    pub disable: bool,
}

impl ScheduleUpdate {
    /// Apply the update to stored settings
    ///
    /// # Errors
    ///
    /// Returns `OpenChatError::Validation` for an unknown web search choice
    /// or an out-of-range time.
    pub fn apply(self, settings: &mut ScheduledPromptSettings, now_ms: i64) -> Result<()> {
        if let Some(prompt) = self.prompt {
            settings.prompt = prompt;
        }
        if let Some(hour) = self.hour {
            settings.hour = hour;
        }
        if let Some(minute) = self.minute {
            settings.minute = minute;
        }
        if let Some(model) = self.model {
            settings.model = Some(model).filter(|m| !m.trim().is_empty());
        }
        if let Some(choice) = self.web_search {
            settings.web_search = choice
                .parse::<WebSearchChoice>()
                .map_err(OpenChatError::Validation)?;
        }
        if self.enable {
            settings.enabled = true;
            settings.ensure_conversation_id(now_ms);
        }
        if self.disable {
            settings.enabled = false;
        }
        settings.validate()
    }
}

/// Handle schedule commands
pub async fn run_schedule(config: &Config, command: ScheduleCommand) -> Result<()> {
    let storage = open_storage(config)?;

    match command {
        ScheduleCommand::Show => {
            let settings = storage.scheduled_prompt()?.unwrap_or_default();
            print_settings(&settings);
        }
        ScheduleCommand::Set {
            prompt,
            hour,
            minute,
            model,
            web_search,
            enable,
            disable,
        } => {
            let mut settings = storage.scheduled_prompt()?.unwrap_or_default();
            let update = ScheduleUpdate {
                prompt,
                hour,
                minute,
                model,
                web_search,
                enable,
                disable,
            };
            update.apply(&mut settings, Local::now().timestamp_millis())?;
            storage.set_scheduled_prompt(&settings)?;
            println!("{}", "Scheduled prompt updated".green());
            print_settings(&settings);
        }
        ScheduleCommand::Run => {
            let client = proxy_client(config, &storage)?;
            let scheduler =
                Scheduler::new(storage.clone(), client, config.models.default_model.clone());

            let cancel = CancellationToken::new();
            let ctrl_c = {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        cancel.cancel();
                    }
                })
            };

            println!("Scheduler running; press Ctrl-C to stop.");
            scheduler.run_forever(cancel).await?;
            ctrl_c.abort();
        }
        ScheduleCommand::Test => {
            let client = proxy_client(config, &storage)?;
            let scheduler =
                Scheduler::new(storage.clone(), client, config.models.default_model.clone());
            if let Some(outcome) = scheduler.run(Local::now().naive_local(), true).await? {
                println!("{}", outcome.content);
                println!(
                    "{}",
                    format!("Saved to conversation {}", outcome.conversation_id).dimmed()
                );
            }
        }
    }

    Ok(())
}

fn print_settings(settings: &ScheduledPromptSettings) {
    let status = if settings.enabled {
        "enabled".green()
    } else {
        "disabled".yellow()
    };
    println!("Status:      {}", status);
    println!(
        "Prompt:      {}",
        if settings.prompt.is_empty() {
            "-"
        } else {
            settings.prompt.as_str()
        }
    );
    println!("Time:        {:02}:{:02}", settings.hour, settings.minute);
    println!(
        "Model:       {}",
        settings.model.as_deref().unwrap_or("(selected model)")
    );
    println!("Web search:  {:?}", settings.web_search);
    println!(
        "Last run:    {} {}",
        settings.last_run_date.as_deref().unwrap_or("-"),
        settings.last_run_time.as_deref().unwrap_or("")
    );
    match settings.next_run_time(Local::now().naive_local()) {
        Some(next) => println!("Next run:    {}", next.format("%Y-%m-%d %H:%M")),
        None => println!("Next run:    -"),
    }
    if let Some(id) = &settings.conversation_id {
        println!("Conversation: {}", id);
    }
}
