use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use super::ProjectOrchestrator;
use crate::error::{ProjectError, RuntimeError};
use crate::runtime::LogOptions;

/// Lines buffered between the log producer and the caller.
pub const LOG_CHANNEL_CAPACITY: usize = 256;

impl ProjectOrchestrator {
    /// Streams compose logs of a project into `sink`.
    ///
    /// Ends on EOF, when `cancel` flips to `true`, or when `sink` is closed.
    /// The producer task is always joined before returning.
    pub async fn stream_project_logs(
        &self,
        id: &str,
        options: LogOptions,
        sink: mpsc::Sender<String>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<(), ProjectError> {
        let project = self.get_project(id)?;
        let loaded = self.load_compose(&project).await?;

        let (tx, mut rx) = mpsc::channel(LOG_CHANNEL_CAPACITY);
        let compose = Arc::clone(&self.compose);
        let producer = tokio::spawn(async move { compose.logs(&loaded, &options, tx).await });

        let mut stopped_early = *cancel.borrow();
        let mut cancel_open = true;
        while !stopped_early {
            tokio::select! {
                changed = cancel.changed(), if cancel_open => match changed {
                    Ok(()) => stopped_early = *cancel.borrow(),
                    Err(_) => cancel_open = false,
                },
                line = rx.recv() => match line {
                    Some(line) => {
                        if sink.send(line).await.is_err() {
                            stopped_early = true;
                        }
                    }
                    None => break,
                },
            }
        }

        drop(rx);
        if stopped_early {
            producer.abort();
        }

        match producer.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) if stopped_early => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(join) if join.is_cancelled() => Ok(()),
            Err(join) => Err(RuntimeError::Unavailable(format!("log producer failed: {}", join)).into()),
        }
    }
}
