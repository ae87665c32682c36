use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

use tokio::sync::oneshot;

use sandcell_common::protocol::error::{Result, SandcellError};

use crate::session::ConnectionSession;
use crate::state::ServerState;

struct Job {
    line: String,
    reply: oneshot::Sender<Vec<String>>,
}

/// A dedicated sandbox thread for one connection.
///
/// The connection's [`ConnectionSession`], and with it the Boa context, is
/// created on the worker thread and never leaves it. Lines are handled in
/// the order they are submitted. Dropping the worker ends the thread once
/// the line in progress, if any, is finished.
pub struct SessionWorker {
    jobs: mpsc::Sender<Job>,
}

impl SessionWorker {
    pub fn spawn(state: Arc<ServerState>, connection_id: u64) -> Result<Self> {
        let (jobs, queue) = mpsc::channel::<Job>();
        thread::Builder::new()
            .name(format!("sandcell-conn-{connection_id}"))
            .spawn(move || {
                let mut session = ConnectionSession::new(state);
                for job in queue {
                    let replies = session.handle_line(&job.line);
                    // The connection may have gone away while the line ran.
                    let _ = job.reply.send(replies);
                }
                tracing::debug!(connection_id, "sandbox worker finished");
            })?;
        Ok(Self { jobs })
    }

    /// Hands `line` to the worker and waits for the identifiers to reply with.
    pub async fn submit(&self, line: String) -> Result<Vec<String>> {
        let (reply, replied) = oneshot::channel();
        self.jobs
            .send(Job { line, reply })
            .map_err(|_| SandcellError::Connection("sandbox worker has stopped".to_string()))?;
        replied
            .await
            .map_err(|_| SandcellError::Connection("sandbox worker dropped the request".to_string()))
    }
}
