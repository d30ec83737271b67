use serde::{Deserialize, Serialize};

use crate::snapshot::SnapshotTree;

/// `[cols, rows]` pair as carried on `create-shell`/`resize-shell`.
pub type ShellSize = [u16; 2];

/// Every command this system's peers exchange, tagged by the wire
/// `command` string. One enum covers both directions: `write-stdout` and
/// `exit-shell` are server-to-client requests, the rest are client-to-server,
/// but both sides decode inbound frames through the same type (§4.5: "if
/// REQUEST, route to the command handler").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum Command {
    SyncWorkspace {
        workspace: String,
    },
    ListDir {
        path: String,
    },
    CreateDir {
        path: String,
    },
    RemoveDir {
        path: String,
    },
    WriteFile {
        path: String,
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
        overwrite: bool,
    },
    RemoveFile {
        path: String,
    },
    MoveItem {
        src_path: String,
        dst_path: String,
    },
    SetPerm {
        path: String,
        perm: u32,
    },
    CreateShell {
        size: ShellSize,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        session: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        timeout: Option<u64>,
    },
    WriteStdin {
        #[serde(with = "serde_bytes")]
        buffer: Vec<u8>,
    },
    ResizeShell {
        size: ShellSize,
    },
    WriteStdout {
        #[serde(with = "serde_bytes")]
        buffer: Vec<u8>,
    },
    ExitShell {},
}

impl Command {
    /// The wire command string, e.g. `"sync-workspace"`. Useful for logging
    /// and for echoing `command` on response packets.
    pub fn name(&self) -> &'static str {
        match self {
            Command::SyncWorkspace { .. } => "sync-workspace",
            Command::ListDir { .. } => "list-dir",
            Command::CreateDir { .. } => "create-dir",
            Command::RemoveDir { .. } => "remove-dir",
            Command::WriteFile { .. } => "write-file",
            Command::RemoveFile { .. } => "remove-file",
            Command::MoveItem { .. } => "move-item",
            Command::SetPerm { .. } => "set-perm",
            Command::CreateShell { .. } => "create-shell",
            Command::WriteStdin { .. } => "write-stdin",
            Command::ResizeShell { .. } => "resize-shell",
            Command::WriteStdout { .. } => "write-stdout",
            Command::ExitShell {} => "exit-shell",
        }
    }
}

/// Command-specific payload carried on a successful `RESPONSE` packet, in
/// addition to the mandatory `code`/`message`. Most commands have nothing
/// beyond the envelope fields, hence `Empty`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Snapshot { data: SnapshotTree },
    ShellCreated {
        platform: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        session: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        line_mode: Option<bool>,
    },
    Empty {},
}

impl Default for ResponseBody {
    fn default() -> Self {
        ResponseBody::Empty {}
    }
}
