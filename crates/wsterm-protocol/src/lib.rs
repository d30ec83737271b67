//! Wire types and framing for the workspace-sync/remote-shell protocol:
//! the packet envelope, the command set, and the length-prefixed
//! MessagePack codec that frames them over a duplex byte stream.

pub mod codec;
pub mod command;
pub mod envelope;
pub mod error;
pub mod snapshot;

pub use codec::{encode_frame, FrameDecoder, MAX_FRAME_SIZE};
pub use command::{Command, ResponseBody, ShellSize};
pub use envelope::{Frame, RequestPacket, ResponsePacket, PACKET_TYPE_REQUEST, PACKET_TYPE_RESPONSE};
pub use error::{ProtocolError, CODE_ERROR, CODE_OK};
pub use snapshot::{DirEntry, FileEntry, SnapshotTree, REMOVED};
