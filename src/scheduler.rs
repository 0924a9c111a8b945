//! Daily scheduled prompt
//!
//! A single prompt fires once a day at a configured local time into a
//! dedicated conversation. The check runs every minute; a run is due when
//! the schedule is enabled, the prompt is non-empty, the hour matches, the
//! minute falls within a two-minute window starting at the configured
//! minute, and the prompt has not already run today.

use crate::client::{ChatClient, OutgoingChat};
use crate::error::{OpenChatError, Result};
use crate::storage::{derive_title, Conversation, SqliteStorage, THINKING_PLACEHOLDER};
use crate::streaming::{NoopCallbacks, StreamingResult};
use crate::types::{ChatMessage, Role};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Local, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How often the schedule is checked
pub const CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Minutes after the configured minute during which a run may still start
const DUE_WINDOW_MINUTES: u32 = 2;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M";

/// Web search behaviour for the scheduled prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebSearchChoice {
    /// Follow the global web search setting
    #[default]
    Current,
    /// Always search
    On,
    /// Never search
    Off,
}

impl WebSearchChoice {
    /// Resolve against the global web search setting
    pub fn resolve(self, current: bool) -> bool {
        match self {
            WebSearchChoice::Current => current,
            WebSearchChoice::On => true,
            WebSearchChoice::Off => false,
        }
    }
}

impl FromStr for WebSearchChoice {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "current" => Ok(WebSearchChoice::Current),
            "on" => Ok(WebSearchChoice::On),
            "off" => Ok(WebSearchChoice::Off),
            other => Err(format!(
                "Invalid web search choice: {} (expected current, on or off)",
                other
            )),
        }
    }
}

/// Persisted scheduled prompt settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScheduledPromptSettings {
    /// Whether the schedule fires
    pub enabled: bool,
    /// Prompt text
    pub prompt: String,
    /// Local hour (0-23)
    pub hour: u32,
    /// Local minute (0-59)
    pub minute: u32,
    /// Model override; the selected model is used when empty
    pub model: Option<String>,
    /// Web search behaviour
    pub web_search: WebSearchChoice,
    /// Local date (`YYYY-MM-DD`) of the last scheduled run
    pub last_run_date: Option<String>,
    /// Local time of the last run; test runs carry a ` (test)` suffix
    pub last_run_time: Option<String>,
    /// Conversation the replies are written to
    pub conversation_id: Option<String>,
}

impl Default for ScheduledPromptSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            prompt: String::new(),
            hour: 8,
            minute: 0,
            model: None,
            web_search: WebSearchChoice::Current,
            last_run_date: None,
            last_run_time: None,
            conversation_id: None,
        }
    }
}

impl ScheduledPromptSettings {
    /// Validate the configured time of day
    ///
    /// # Errors
    ///
    /// Returns `OpenChatError::Validation` for an hour above 23 or a minute
    /// above 59.
    pub fn validate(&self) -> Result<()> {
        if self.hour > 23 {
            return Err(OpenChatError::Validation(format!(
                "Scheduled hour must be 0-23, got {}",
                self.hour
            ))
            .into());
        }
        if self.minute > 59 {
            return Err(OpenChatError::Validation(format!(
                "Scheduled minute must be 0-59, got {}",
                self.minute
            ))
            .into());
        }
        Ok(())
    }

    /// Assign a stable conversation id if none is set
    ///
    /// # Returns
    ///
    /// Returns the conversation id.
    pub fn ensure_conversation_id(&mut self, now_ms: i64) -> &str {
        self.conversation_id
            .get_or_insert_with(|| format!("scheduled-{}", now_ms))
    }

    /// Returns true when the prompt should fire at `now` (local time)
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::NaiveDate;
    /// use openchat::scheduler::ScheduledPromptSettings;
    ///
    /// let settings = ScheduledPromptSettings {
    ///     enabled: true,
    ///     prompt: "Morning news".to_string(),
    ///     hour: 8,
    ///     minute: 30,
    ///     ..Default::default()
    /// };
    /// let at = |h, m| NaiveDate::from_ymd_opt(2024, 5, 1).unwrap().and_hms_opt(h, m, 0).unwrap();
    /// assert!(settings.is_due(at(8, 31)));
    /// assert!(!settings.is_due(at(8, 32)));
    /// ```
    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        if !self.enabled || self.prompt.trim().is_empty() {
            return false;
        }
        if now.hour() != self.hour {
            return false;
        }
        if now.minute() < self.minute || now.minute() >= self.minute + DUE_WINDOW_MINUTES {
            return false;
        }
        self.last_run_date.as_deref() != Some(now.format(DATE_FORMAT).to_string().as_str())
    }

    /// Next time the prompt will fire, or `None` while it cannot fire
    pub fn next_run_time(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        if !self.enabled || self.prompt.trim().is_empty() {
            return None;
        }
        let today = now.date().and_hms_opt(self.hour, self.minute, 0)?;
        let window_end = today + ChronoDuration::minutes(i64::from(DUE_WINDOW_MINUTES));
        let ran_today =
            self.last_run_date.as_deref() == Some(now.format(DATE_FORMAT).to_string().as_str());

        if !ran_today && now < window_end {
            Some(today)
        } else {
            Some(today + ChronoDuration::days(1))
        }
    }
}

/// Sends the scheduled prompt and returns the finished reply
#[async_trait]
pub trait PromptRunner: Send + Sync {
    /// Run one chat turn to completion
    async fn run_prompt(&self, chat: &OutgoingChat) -> Result<StreamingResult>;
}

#[async_trait]
impl PromptRunner for ChatClient {
    async fn run_prompt(&self, chat: &OutgoingChat) -> Result<StreamingResult> {
        self.send_chat(chat, &mut NoopCallbacks, None).await
    }
}

/// Outcome of one scheduled run
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// Conversation the reply was written to
    pub conversation_id: String,
    /// Final reply text
    pub content: String,
}

/// Fires the scheduled prompt against a [`PromptRunner`]
pub struct Scheduler<R> {
    storage: SqliteStorage,
    runner: R,
    default_model: String,
    running: AtomicBool,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<R: PromptRunner> Scheduler<R> {
    /// Create a scheduler
    ///
    /// # Arguments
    ///
    /// * `storage` - Settings and conversation store
    /// * `runner` - Sends the prompt
    /// * `default_model` - Used when neither the schedule nor the user selected a model
    pub fn new(storage: SqliteStorage, runner: R, default_model: impl Into<String>) -> Self {
        Self {
            storage,
            runner,
            default_model: default_model.into(),
            running: AtomicBool::new(false),
        }
    }

    /// Returns true while a run is in progress
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run the prompt if it is due at `now`
    ///
    /// # Returns
    ///
    /// Returns the outcome when a run happened, `None` when nothing was due
    /// or a run was already in progress.
    pub async fn check(&self, now: NaiveDateTime) -> Result<Option<RunOutcome>> {
        let due = self
            .storage
            .scheduled_prompt()?
            .is_some_and(|settings| settings.is_due(now));
        if !due {
            return Ok(None);
        }
        self.run(now, false).await
    }

    /// Run the prompt immediately
    ///
    /// A test run records only `lastRunTime` with a ` (test)` suffix, so the
    /// daily run still fires.
    ///
    /// # Errors
    ///
    /// Returns `OpenChatError::Validation` when no prompt is configured, or
    /// the runner's error after writing it into the placeholder message.
    pub async fn run(&self, now: NaiveDateTime, test: bool) -> Result<Option<RunOutcome>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Scheduled prompt already running; skipping");
            return Ok(None);
        }
        let _guard = RunningGuard(&self.running);

        let mut settings = self.storage.scheduled_prompt()?.unwrap_or_default();
        let prompt = settings.prompt.trim().to_string();
        if prompt.is_empty() {
            return Err(OpenChatError::Validation("No scheduled prompt configured".into()).into());
        }

        let conversation_id = settings
            .ensure_conversation_id(Local::now().timestamp_millis())
            .to_string();
        let time = now.format(TIME_FORMAT).to_string();
        if test {
            settings.last_run_time = Some(format!("{} (test)", time));
        } else {
            settings.last_run_date = Some(now.format(DATE_FORMAT).to_string());
            settings.last_run_time = Some(time);
        }
        // Recorded before the request so a slow reply cannot fire twice.
        self.storage.set_scheduled_prompt(&settings)?;

        let model = match settings.model.as_deref().filter(|m| !m.trim().is_empty()) {
            Some(model) => model.to_string(),
            None => self.storage.selected_model(&self.default_model)?,
        };
        let web_search = settings
            .web_search
            .resolve(self.storage.web_search_enabled()?);

        if self.storage.get_conversation(&conversation_id)?.is_none() {
            let mut conversation =
                Conversation::new(&conversation_id, derive_title(&prompt, false), &model);
            conversation.is_scheduled = true;
            self.storage.save_conversation(conversation)?;
        }

        self.storage
            .add_message(&conversation_id, &model, Role::User, &prompt, None)?;
        // Each run stands alone: earlier scheduled replies are not context.
        let messages = vec![ChatMessage::new(Role::User, prompt.clone())];
        let placeholder_id = self.storage.add_message(
            &conversation_id,
            &model,
            Role::Assistant,
            THINKING_PLACEHOLDER,
            None,
        )?;

        let system_prompt = self.storage.system_prompt()?;
        let chat = OutgoingChat {
            model,
            messages,
            web_search,
            image_data_url: None,
            system_prompt: Some(system_prompt).filter(|p| !p.trim().is_empty()),
        };

        tracing::info!(
            "Running scheduled prompt into {} (test={})",
            conversation_id,
            test
        );

        match self.runner.run_prompt(&chat).await {
            Ok(result) => {
                self.storage.update_message(
                    &conversation_id,
                    &placeholder_id,
                    &result.content,
                    Some(&result.citations),
                )?;
                Ok(Some(RunOutcome {
                    conversation_id,
                    content: result.content,
                }))
            }
            Err(e) => {
                tracing::error!("Scheduled prompt failed: {}", e);
                self.storage.update_message(
                    &conversation_id,
                    &placeholder_id,
                    &format!("Error: {}", e),
                    None,
                )?;
                Err(e)
            }
        }
    }

    /// Check the schedule every minute until `cancel` fires
    pub async fn run_forever(&self, cancel: CancellationToken) -> Result<()> {
        let mut interval = tokio::time::interval(CHECK_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Scheduler stopped");
                    return Ok(());
                }
                _ = interval.tick() => {
                    match self.check(Local::now().naive_local()).await {
                        Ok(Some(outcome)) => tracing::info!(
                            "Scheduled prompt completed in {} ({} chars)",
                            outcome.conversation_id,
                            outcome.content.len()
                        ),
                        Ok(None) => {}
                        Err(e) => tracing::warn!("Scheduled prompt check failed: {}", e),
                    }
                }
            }
        }
    }
}
