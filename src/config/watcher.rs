//! Hot reload of the agent configuration file.
//!
//! The parent directory is watched rather than the file itself, so editors
//! that save by writing a temp file and renaming it over the original keep
//! triggering reloads.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::AgentConfig;

pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<AgentConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for validated configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<AgentConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. Updates stop when the returned watcher is dropped.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self { path, update_tx } = self;
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        // Last configuration sent, so saves that change nothing are skipped.
        let current = Mutex::new(load_config(&path).ok());
        let watched = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if touches(&event, &watched) => {
                    let new_config = match load_config(&watched) {
                        Ok(config) => config,
                        Err(e) => {
                            tracing::error!(
                                path = %watched.display(),
                                error = %e,
                                "Failed to reload config, keeping current configuration"
                            );
                            return;
                        }
                    };

                    let mut current = current.lock().unwrap_or_else(PoisonError::into_inner);
                    if current.as_ref() == Some(&new_config) {
                        tracing::debug!("Config file touched without changes");
                        return;
                    }
                    *current = Some(new_config.clone());
                    tracing::info!(path = %watched.display(), "Config file changed, reloading");
                    let _ = update_tx.send(new_config);
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        tracing::info!(path = %path.display(), "Config watcher started");
        Ok(watcher)
    }
}

/// Whether `event` may have changed the file at `path`.
fn touches(event: &Event, path: &Path) -> bool {
    let relevant = matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_));
    relevant && event.paths.iter().any(|p| p.file_name() == path.file_name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind};

    #[test]
    fn test_only_changes_to_the_config_file_count() {
        let config = Path::new("/etc/agent/agent.toml");

        let modified = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/etc/agent/agent.toml"));
        assert!(touches(&modified, config));

        let renamed_over = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/etc/agent/agent.toml"));
        assert!(touches(&renamed_over, config));

        let sibling = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/etc/agent/other.toml"));
        assert!(!touches(&sibling, config));

        let read = Event::new(EventKind::Access(AccessKind::Any))
            .add_path(PathBuf::from("/etc/agent/agent.toml"));
        assert!(!touches(&read, config));
    }
}
