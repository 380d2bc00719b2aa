//! Command handling: turns a peer's `COMMAND` into the `STATUS` reply.
//!
//! The session engine calls [`CommandHandler::handle`] on its receive thread
//! and sends the returned [`StatusReply`] back before reading the next frame,
//! so handlers must be quick.  [`RecorderCommands`] never writes to the sink
//! itself; closing a segment is queued for the persistence worker.

use std::sync::Arc;

use peerlink_core::protocol::messages::{commands, statuses, StatusReply};
use tracing::{info, warn};

use crate::application::consume_data::BufferedRecorder;

/// Maps a command name and its optional arguments to a status reply.
pub trait CommandHandler: Send + Sync {
    fn handle(&self, name: &str, args: Option<&str>) -> StatusReply;
}

impl<F> CommandHandler for F
where
    F: Fn(&str, Option<&str>) -> StatusReply + Send + Sync,
{
    fn handle(&self, name: &str, args: Option<&str>) -> StatusReply {
        self(name, args)
    }
}

/// Reply used when no handler understands the command.
pub fn unknown_command() -> StatusReply {
    StatusReply::new(statuses::UNKNOWN_COMMAND)
}

/// The recorder's command set.
///
/// | Command              | Reply                                               |
/// |----------------------|-----------------------------------------------------|
/// | `OPEN_FILE[:name]`   | `FILE_OPENED:<name>` or `FILE_OPEN_FAILED[:reason]` |
/// | `CLOSE_FILE`         | `FILE_CLOSED`                                       |
/// | `GET_STATUS`         | `RUNNING:file_open=..,filename=..,data_count=..,files_created=..` |
/// | `SHUTDOWN`           | `SHUTTING_DOWN` (closes any open segment first)     |
/// | anything else        | `UNKNOWN_COMMAND`                                   |
pub struct RecorderCommands {
    recorder: Arc<BufferedRecorder>,
}

impl RecorderCommands {
    pub fn new(recorder: Arc<BufferedRecorder>) -> Self {
        Self { recorder }
    }

    fn open_file(&self, name: Option<&str>) -> StatusReply {
        match self.recorder.open_segment(name) {
            Ok(opened) => StatusReply::with_details(statuses::FILE_OPENED, opened),
            Err(e) => {
                warn!("OPEN_FILE failed: {e}");
                StatusReply::new(statuses::FILE_OPEN_FAILED)
            }
        }
    }

    fn close_file(&self) -> StatusReply {
        self.recorder.close_segment();
        StatusReply::new(statuses::FILE_CLOSED)
    }

    fn running(&self) -> StatusReply {
        let status = self.recorder.status();
        let details = format!(
            "file_open={},filename={},data_count={},files_created={}",
            status.segment.is_some(),
            status.segment.as_deref().unwrap_or("none"),
            status.data_count,
            status.segments_created,
        );
        StatusReply::with_details(statuses::RUNNING, details)
    }

    fn shutdown(&self) -> StatusReply {
        self.recorder.close_segment();
        info!("peer requested shutdown");
        StatusReply::new(statuses::SHUTTING_DOWN)
    }
}

impl CommandHandler for RecorderCommands {
    fn handle(&self, name: &str, args: Option<&str>) -> StatusReply {
        match name {
            commands::OPEN_FILE => self.open_file(args),
            commands::CLOSE_FILE => self.close_file(),
            commands::GET_STATUS => self.running(),
            commands::SHUTDOWN => self.shutdown(),
            other => {
                warn!("unknown command {other:?}");
                unknown_command()
            }
        }
    }
}
