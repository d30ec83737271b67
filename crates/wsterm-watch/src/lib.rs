//! Cross-platform filesystem change observation: one `WatchBackend`
//! implementation per OS, all producing the same [`NormalizedEvent`] set.

pub mod backend;
pub mod error;
pub mod event;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
mod macos;
#[cfg(windows)]
mod windows;

pub use backend::WatchBackend;
pub use error::WatchError;
pub use event::NormalizedEvent;

#[cfg(target_os = "linux")]
pub use linux::LinuxWatcher as PlatformWatcher;
#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub use macos::MacosWatcher as PlatformWatcher;
#[cfg(windows)]
pub use windows::WindowsWatcher as PlatformWatcher;

/// Builds the watcher backend for the current OS.
pub fn platform_watcher() -> Result<PlatformWatcher, WatchError> {
    PlatformWatcher::new()
}
