//! Attachment discovery: what the monitoring loop processes.

pub mod error;
pub mod parser;
pub mod spool;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use error::{InboxError, Result};
pub use parser::EmailParser;
pub use spool::SpoolDirectorySource;

/// One file attached to an incoming email.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub filename: String,
    pub content: Vec<u8>,
    pub mime_type: String,
    pub sender: String,
    pub subject: String,
    pub received_time: Option<DateTime<Utc>>,
    pub message_id: Option<String>,
    /// Where the source keeps the message, for acknowledgement.
    pub origin: Option<PathBuf>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, content: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            content,
            mime_type: mime_type.into(),
            sender: String::new(),
            subject: String::new(),
            received_time: None,
            message_id: None,
            origin: None,
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

/// Which attachments a tenant wants processed. Empty lists accept everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentFilter {
    /// MIME patterns such as `text/csv` or `application/*`.
    pub mime_include: Vec<String>,
    pub mime_exclude: Vec<String>,
    /// Filename globs such as `*.csv`.
    pub filename_include: Vec<String>,
    pub filename_exclude: Vec<String>,
    /// Case-insensitive substrings; a message must match one if any are set.
    pub sender_contains: Vec<String>,
    pub subject_contains: Vec<String>,
    pub min_size: u64,
    pub max_size: Option<u64>,
}

/// Finds attachments that have not been processed yet.
pub trait AttachmentSource: Send + Sync {
    /// New attachments for a tenant, in discovery order.
    fn find_new_attachments(
        &self,
        tenant_key: &str,
        filter: &AttachmentFilter,
    ) -> Result<Vec<Attachment>>;

    /// Marks an attachment as handled so it is not discovered again.
    fn acknowledge(&self, tenant_key: &str, attachment: &Attachment) -> Result<()>;
}
