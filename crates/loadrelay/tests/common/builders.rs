//! Builders for test messages and configuration files.

#![allow(dead_code)]

use serde_json::{json, Value};

/// Builds a multipart `.eml` message with file attachments.
pub struct MessageBuilder {
    from: String,
    subject: String,
    attachments: Vec<(String, String, String)>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self {
            from: "dispatch@acme-freight.test".to_string(),
            subject: "Today's loads".to_string(),
            attachments: Vec::new(),
        }
    }

    pub fn from(mut self, from: &str) -> Self {
        self.from = from.to_string();
        self
    }

    pub fn subject(mut self, subject: &str) -> Self {
        self.subject = subject.to_string();
        self
    }

    pub fn csv(self, filename: &str, content: &str) -> Self {
        self.attachment(filename, "text/csv", content)
    }

    pub fn attachment(mut self, filename: &str, mime_type: &str, content: &str) -> Self {
        self.attachments
            .push((filename.to_string(), mime_type.to_string(), content.to_string()));
        self
    }

    pub fn build(&self) -> String {
        let mut message = format!(
            "From: {}\nTo: loads@loadrelay.test\nSubject: {}\nMIME-Version: 1.0\n\
             Content-Type: multipart/mixed; boundary=\"LOADRELAY\"\n\n\
             --LOADRELAY\nContent-Type: text/plain\n\nSee attached.\n",
            self.from, self.subject
        );
        for (name, mime, content) in &self.attachments {
            message.push_str(&format!(
                "--LOADRELAY\nContent-Type: {mime}; name=\"{name}\"\n\
                 Content-Disposition: attachment; filename=\"{name}\"\n\n{content}\n"
            ));
        }
        message.push_str("--LOADRELAY--\n");
        message
    }
}

/// Builds a configuration document as JSON.
pub struct ConfigBuilder {
    spool_directory: String,
    output_directory: String,
    storage_directory: Option<String>,
    required_columns: Vec<String>,
    tenants: Vec<Value>,
}

impl ConfigBuilder {
    pub fn new(spool_directory: &str, output_directory: &str) -> Self {
        Self {
            spool_directory: spool_directory.to_string(),
            output_directory: output_directory.to_string(),
            storage_directory: None,
            required_columns: Vec::new(),
            tenants: Vec::new(),
        }
    }

    pub fn storage_directory(mut self, dir: &str) -> Self {
        self.storage_directory = Some(dir.to_string());
        self
    }

    pub fn required_column(mut self, column: &str) -> Self {
        self.required_columns.push(column.to_string());
        self
    }

    pub fn tenant(mut self, tenant: Value) -> Self {
        self.tenants.push(tenant);
        self
    }

    pub fn build(&self) -> Value {
        let mut storage = json!({ "lock_timeout_seconds": 2 });
        if let Some(dir) = &self.storage_directory {
            storage["directory"] = json!(dir);
        }
        json!({
            "version": "1.0",
            "spool_directory": self.spool_directory,
            "output_directory": self.output_directory,
            "required_columns": self.required_columns,
            "storage": storage,
            "service": {
                "idle_delay_seconds": 1,
                "retry_delay_seconds": 1,
                "join_timeout_seconds": 5
            },
            "tenants": self.tenants,
        })
    }
}

/// A shipment sheet with `rows` loads.
pub fn shipment_csv(rows: usize) -> String {
    let mut csv = String::from("Ship From,Ship To,Weight\n");
    for i in 0..rows {
        csv.push_str(&format!("Dallas {i},Houston {i},{}\n", 1000 + i));
    }
    csv
}
