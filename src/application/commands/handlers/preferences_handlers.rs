//! Preferences Handler - 用户偏好子命令

use dashmap::DashMap;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::application::commands::preferences_commands::PreferencesCommand;
use crate::application::error::ApplicationError;
use crate::application::ports::PreferenceStorePort;
use crate::config::{CheckpointsConfig, GlobalCommandConfig};
use crate::domain::generation::ValueRange;
use crate::domain::preferences::UserPreferences;

/// Preferences Handler
pub struct PreferencesHandler {
    store: Arc<dyn PreferenceStorePort>,
    global: GlobalCommandConfig,
    checkpoints: CheckpointsConfig,
    /// 同一用户的读-改-写串行执行
    user_locks: DashMap<String, Arc<Mutex<()>>>,
}

fn check<T>(name: &str, value: Option<T>, range: &ValueRange<T>) -> Result<(), ApplicationError>
where
    T: PartialOrd + Copy + Display,
{
    match value {
        Some(value) if !range.contains(value) => Err(ApplicationError::validation(format!(
            "{} must be between {} and {}.",
            name, range.min, range.max
        ))),
        _ => Ok(()),
    }
}

impl PreferencesHandler {
    pub fn new(
        store: Arc<dyn PreferenceStorePort>,
        global: GlobalCommandConfig,
        checkpoints: CheckpointsConfig,
    ) -> Self {
        Self {
            store,
            global,
            checkpoints,
            user_locks: DashMap::new(),
        }
    }

    fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.user_locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn handle(
        &self,
        user_id: &str,
        cmd: PreferencesCommand,
    ) -> Result<UserPreferences, ApplicationError> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let mut preferences = self.store.read(user_id).await?;
        let action = cmd.as_str();

        match cmd {
            PreferencesCommand::List => return Ok(preferences),
            PreferencesCommand::Set(update) => {
                self.validate(&update)?;
                preferences.merge(update);
            }
            PreferencesCommand::Reset(fields) => {
                for field in fields {
                    preferences.reset(field);
                }
            }
            PreferencesCommand::Clear => preferences.clear(),
        }

        self.store.write(user_id, &preferences).await?;
        tracing::info!(user_id = %user_id, action, "Preferences updated");
        Ok(preferences)
    }

    fn validate(&self, update: &UserPreferences) -> Result<(), ApplicationError> {
        let global = &self.global;
        check("Steps", update.steps, &global.steps)?;
        check("CFG", update.cfg, &global.cfg)?;
        check("Width", update.width, &global.width)?;
        check("Height", update.height, &global.height)?;
        check("Count", update.count, &global.count)?;

        if let Some(checkpoint) = &update.checkpoint {
            let installed = &self.checkpoints.installed;
            let known = installed
                .iter()
                .any(|c| &c.id == checkpoint || &c.name == checkpoint);
            if !installed.is_empty() && !known {
                return Err(ApplicationError::validation(format!(
                    "Checkpoint {} is not installed.",
                    checkpoint
                )));
            }
        }
        Ok(())
    }
}
