//! Attachment source backed by a spool directory of `.eml` files.
//!
//! Layout: `<root>/<tenant-key>/*.eml`. A message moves to `processed/` once
//! every attachment it yielded has been acknowledged, and to `failed/` if it
//! cannot be parsed at all.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::error::{InboxError, Result};
use super::parser::EmailParser;
use super::{Attachment, AttachmentFilter, AttachmentSource};
use crate::tenant;

pub const PROCESSED_DIR: &str = "processed";
pub const FAILED_DIR: &str = "failed";

pub struct SpoolDirectorySource {
    root: PathBuf,
    /// Message path → attachments not yet acknowledged.
    pending: Mutex<HashMap<PathBuf, usize>>,
}

impl SpoolDirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn tenant_dir(&self, tenant_key: &str) -> PathBuf {
        self.root.join(tenant::storage_key(tenant_key))
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<PathBuf, usize>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Spool pending map lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// `.eml` files directly under the tenant directory, by name.
    fn messages(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut messages = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| InboxError::SpoolDirectory {
                path: dir.to_path_buf(),
                source: e.into(),
            })?;
            let is_eml = entry
                .path()
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("eml"));
            if entry.file_type().is_file() && is_eml {
                messages.push(entry.into_path());
            }
        }
        messages.sort();
        Ok(messages)
    }

    fn move_to(&self, message: &Path, subdir: &str) -> Result<PathBuf> {
        let parent = message.parent().unwrap_or(&self.root);
        let target_dir = parent.join(subdir);
        std::fs::create_dir_all(&target_dir).map_err(|e| InboxError::Io {
            path: target_dir.clone(),
            source: e,
        })?;

        let name = message
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "message.eml".to_string());
        let mut target = target_dir.join(&name);
        let mut counter = 1;
        while target.exists() {
            target = target_dir.join(format!("{}_{}", counter, name));
            counter += 1;
        }
        std::fs::rename(message, &target).map_err(|e| InboxError::Io {
            path: message.to_path_buf(),
            source: e,
        })?;
        Ok(target)
    }
}

impl AttachmentSource for SpoolDirectorySource {
    fn find_new_attachments(
        &self,
        tenant_key: &str,
        filter: &AttachmentFilter,
    ) -> Result<Vec<Attachment>> {
        let dir = self.tenant_dir(tenant_key);
        if !dir.is_dir() {
            debug!("No spool directory for tenant at {}", dir.display());
            return Ok(Vec::new());
        }

        let parser = EmailParser::new(filter)?;
        let mut found = Vec::new();
        for message in self.messages(&dir)? {
            let raw = std::fs::read(&message).map_err(|e| InboxError::Io {
                path: message.clone(),
                source: e,
            })?;
            match parser.extract_attachments(&raw, &message) {
                Ok(attachments) if attachments.is_empty() => {
                    debug!("No matching attachments in {}", message.display());
                    self.move_to(&message, PROCESSED_DIR)?;
                }
                Ok(attachments) => {
                    self.pending().insert(message.clone(), attachments.len());
                    found.extend(attachments);
                }
                Err(e) => {
                    warn!("Moving unreadable message aside: {}", e);
                    self.move_to(&message, FAILED_DIR)?;
                }
            }
        }
        if !found.is_empty() {
            info!(
                "Found {} attachments for {}",
                found.len(),
                tenant::storage_key(tenant_key)
            );
        }
        Ok(found)
    }

    fn acknowledge(&self, _tenant_key: &str, attachment: &Attachment) -> Result<()> {
        let Some(origin) = &attachment.origin else {
            return Ok(());
        };
        let done = {
            let mut pending = self.pending();
            match pending.get_mut(origin) {
                Some(remaining) if *remaining > 1 => {
                    *remaining -= 1;
                    false
                }
                Some(_) => {
                    pending.remove(origin);
                    true
                }
                None => origin.exists(),
            }
        };
        if done && origin.exists() {
            let target = self.move_to(origin, PROCESSED_DIR)?;
            debug!("Message {} processed -> {}", origin.display(), target.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn message(attachments: &[(&str, &str)]) -> String {
        let mut body = String::from(
            "From: ops@acme.test\nSubject: loads\nMIME-Version: 1.0\n\
             Content-Type: multipart/mixed; boundary=\"B\"\n\n",
        );
        for (name, content) in attachments {
            body.push_str(&format!(
                "--B\nContent-Type: text/csv; name=\"{name}\"\n\
                 Content-Disposition: attachment; filename=\"{name}\"\n\n{content}\n"
            ));
        }
        body.push_str("--B--\n");
        body
    }

    fn spool_with(dir: &TempDir, files: &[(&str, String)]) -> SpoolDirectorySource {
        let tenant_dir = dir.path().join("acme-freight");
        std::fs::create_dir_all(&tenant_dir).unwrap();
        for (name, content) in files {
            std::fs::write(tenant_dir.join(name), content).unwrap();
        }
        SpoolDirectorySource::new(dir.path())
    }

    #[test]
    fn test_missing_tenant_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let spool = SpoolDirectorySource::new(dir.path());
        assert!(spool
            .find_new_attachments("nobody", &AttachmentFilter::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_discovery_order_and_ack() {
        let dir = TempDir::new().unwrap();
        let spool = spool_with(
            &dir,
            &[
                ("b.eml", message(&[("second.csv", "a,b\n1,2")])),
                ("a.eml", message(&[("first.csv", "a,b\n1,2"), ("extra.csv", "a\n1")])),
                ("notes.txt", "ignored".to_string()),
            ],
        );

        let found = spool
            .find_new_attachments("Acme_Freight", &AttachmentFilter::default())
            .unwrap();
        let names: Vec<&str> = found.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(names, vec!["first.csv", "extra.csv", "second.csv"]);

        let tenant_dir = dir.path().join("acme-freight");
        spool.acknowledge("acme-freight", &found[0]).unwrap();
        assert!(tenant_dir.join("a.eml").exists(), "one attachment still pending");
        spool.acknowledge("acme-freight", &found[1]).unwrap();
        assert!(!tenant_dir.join("a.eml").exists());
        assert!(tenant_dir.join(PROCESSED_DIR).join("a.eml").exists());

        let again = spool
            .find_new_attachments("acme-freight", &AttachmentFilter::default())
            .unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].filename, "second.csv");
    }

    #[test]
    fn test_messages_without_matches_are_retired() {
        let dir = TempDir::new().unwrap();
        let spool = spool_with(&dir, &[("a.eml", message(&[("loads.csv", "a\n1")]))]);
        let filter = AttachmentFilter {
            filename_include: vec!["*.xlsx".into()],
            ..AttachmentFilter::default()
        };
        assert!(spool.find_new_attachments("acme-freight", &filter).unwrap().is_empty());
        assert!(dir
            .path()
            .join("acme-freight")
            .join(PROCESSED_DIR)
            .join("a.eml")
            .exists());
    }

    #[test]
    fn test_ack_without_origin_is_noop() {
        let dir = TempDir::new().unwrap();
        let spool = SpoolDirectorySource::new(dir.path());
        let attachment = Attachment::new("x.csv", b"a\n1".to_vec(), "text/csv");
        spool.acknowledge("acme", &attachment).unwrap();
    }
}
