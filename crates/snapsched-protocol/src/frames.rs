use serde::{Deserialize, Deserializer, Serialize};

use snapsched_core::errno::EINVAL;

use crate::commands;

/// Inbound command, one JSON object per line in serve mode.
/// Wire: `{ "id": "7", "command": "add", "path": "/data", "snap-schedule": "1h" }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandFrame {
    /// Echoed back in the result frame; optional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub command: Command,
}

/// Every command the dispatcher understands, tagged by `command`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum Command {
    Status {
        path: Option<String>,
        subvol: Option<String>,
        fs: Option<String>,
        #[serde(default)]
        format: OutputFormat,
    },
    List {
        path: String,
        #[serde(default)]
        recursive: bool,
        subvol: Option<String>,
        fs: Option<String>,
        #[serde(default)]
        format: OutputFormat,
    },
    Add {
        path: String,
        #[serde(rename = "snap-schedule")]
        schedule: String,
        start: Option<String>,
        fs: Option<String>,
        subvol: Option<String>,
    },
    Remove {
        path: String,
        repeat: Option<String>,
        start: Option<String>,
        subvol: Option<String>,
        fs: Option<String>,
    },
    #[serde(rename = "retention add")]
    RetentionAdd {
        path: String,
        #[serde(rename = "retention-spec-or-period")]
        spec_or_period: String,
        #[serde(rename = "retention-count", default, deserialize_with = "string_or_number")]
        count: Option<String>,
        fs: Option<String>,
        subvol: Option<String>,
    },
    #[serde(rename = "retention remove")]
    RetentionRemove {
        path: String,
        #[serde(rename = "retention-spec-or-period")]
        spec_or_period: String,
        #[serde(rename = "retention-count", default, deserialize_with = "string_or_number")]
        count: Option<String>,
        fs: Option<String>,
        subvol: Option<String>,
        /// Allow removing the last retention period of a scheduled path.
        #[serde(default)]
        purge: bool,
    },
    Activate {
        path: String,
        repeat: Option<String>,
        start: Option<String>,
        subvol: Option<String>,
        fs: Option<String>,
    },
    Deactivate {
        path: String,
        repeat: Option<String>,
        start: Option<String>,
        subvol: Option<String>,
        fs: Option<String>,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Status { .. } => commands::STATUS,
            Command::List { .. } => commands::LIST,
            Command::Add { .. } => commands::ADD,
            Command::Remove { .. } => commands::REMOVE,
            Command::RetentionAdd { .. } => commands::RETENTION_ADD,
            Command::RetentionRemove { .. } => commands::RETENTION_REMOVE,
            Command::Activate { .. } => commands::ACTIVATE,
            Command::Deactivate { .. } => commands::DEACTIVATE,
        }
    }

    /// Filesystem named by the command, if any.
    pub fn fs(&self) -> Option<&str> {
        match self {
            Command::Status { fs, .. }
            | Command::List { fs, .. }
            | Command::Add { fs, .. }
            | Command::Remove { fs, .. }
            | Command::RetentionAdd { fs, .. }
            | Command::RetentionRemove { fs, .. }
            | Command::Activate { fs, .. }
            | Command::Deactivate { fs, .. } => fs.as_deref(),
        }
    }
}

// Counts arrive as strings from the CLI and often as numbers from scripts.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }
    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    }))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Plain,
    Json,
}

/// The `(status, output, error)` triple every command returns.
///
/// `status` is 0 on success, otherwise a negated errno.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub status: i32,
    pub output: String,
    pub error: String,
}

impl CommandResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            status: 0,
            output: output.into(),
            error: String::new(),
        }
    }

    pub fn err(status: i32, error: impl Into<String>) -> Self {
        Self {
            status,
            output: String::new(),
            error: error.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 0
    }

    pub fn into_tuple(self) -> (i32, String, String) {
        (self.status, self.output, self.error)
    }
}

/// Outbound result, one JSON object per line in serve mode.
/// Wire: `{ "id": "7", "status": 0, "output": "Schedule set for path /data", "error": "" }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub result: CommandResult,
}

impl ResultFrame {
    pub fn new(id: Option<String>, result: CommandResult) -> Self {
        Self { id, result }
    }

    /// Reply to a line that did not parse as a [`CommandFrame`].
    pub fn invalid(reason: impl std::fmt::Display) -> Self {
        Self::new(
            None,
            CommandResult::err(-EINVAL, format!("invalid command frame: {reason}")),
        )
    }
}
