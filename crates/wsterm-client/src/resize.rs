//! Window-size tracking (spec.md §4.7): poll local terminal dimensions every
//! 0.5 s and report changes.

use std::time::Duration;

use wsterm_protocol::ShellSize;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub fn current_size() -> ShellSize {
    crossterm::terminal::size()
        .map(|(cols, rows)| [cols, rows])
        .unwrap_or([80, 24])
}

/// Runs forever, invoking `on_change` whenever the polled size differs from
/// the last reported one.
pub async fn run_resize_pump<F>(mut on_change: F)
where
    F: FnMut(ShellSize),
{
    let mut last = current_size();
    let mut tick = tokio::time::interval(POLL_INTERVAL);
    loop {
        tick.tick().await;
        let size = current_size();
        if size != last {
            last = size;
            on_change(size);
        }
    }
}
