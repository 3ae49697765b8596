//! Connection watcher
//!
//! Turns repeated liveness checks of one socket into a stream of events. Notification
//! is level-triggered: as long as bytes stay unread, every tick reports them
//! again. Owners must read promptly or expect duplicates for the same bytes.

use std::io;
use std::iter::FusedIterator;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::trace;

use super::config::SessionConfig;
use super::liveness::{is_alive, Pollable};

/// Event produced by a [`Watch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEvent {
    /// The socket holds this many unread bytes
    DataAvailable(usize),
    /// The socket was inferred dead; always the last event
    Disconnected,
}

/// Lazy, unbounded event sequence for one socket
///
/// Each call to `next` sleeps one poll interval, checks the socket, and
/// repeats until a tick produces an event. After [`WatchEvent::Disconnected`]
/// the iterator is exhausted and cannot be restarted.
///
/// # Examples
///
/// ```no_run
/// use tcp_session::io::{SessionConfig, Watch, WatchEvent};
/// use std::net::TcpStream;
///
/// let stream = TcpStream::connect("127.0.0.1:23333")?;
/// for event in Watch::new(stream, &SessionConfig::default()) {
///     match event {
///         WatchEvent::DataAvailable(n) => println!("{} bytes waiting", n),
///         WatchEvent::Disconnected => println!("peer gone"),
///     }
/// }
/// # Ok::<(), std::io::Error>(())
/// ```
#[derive(Debug)]
pub struct Watch<P> {
    socket: P,
    interval: Duration,
    readable_timeout: Duration,
    finished: bool,
}

impl<P: Pollable> Watch<P> {
    /// Create a watcher over `socket` using the config's timing
    pub fn new(socket: P, config: &SessionConfig) -> Self {
        Self {
            socket,
            interval: config.poll_interval,
            readable_timeout: config.readable_timeout,
            finished: false,
        }
    }

    /// Check once without sleeping
    fn tick(&self) -> Option<WatchEvent> {
        if !is_alive(&self.socket, self.readable_timeout) {
            return Some(WatchEvent::Disconnected);
        }

        match self.socket.buffered_bytes() {
            Ok(0) => None,
            Ok(n) => Some(WatchEvent::DataAvailable(n)),
            // Closed between the two checks.
            Err(_) => Some(WatchEvent::Disconnected),
        }
    }
}

impl<P: Pollable> Iterator for Watch<P> {
    type Item = WatchEvent;

    fn next(&mut self) -> Option<WatchEvent> {
        if self.finished {
            return None;
        }

        loop {
            thread::sleep(self.interval);
            match self.tick() {
                Some(WatchEvent::Disconnected) => {
                    self.finished = true;
                    return Some(WatchEvent::Disconnected);
                }
                Some(event) => return Some(event),
                None => trace!("Watch tick: idle"),
            }
        }
    }
}

impl<P: Pollable> FusedIterator for Watch<P> {}

/// Drive a watch on a dedicated named thread, handing every event to `on_event`
pub(crate) fn spawn_watcher<P, F>(
    name: String,
    watch: Watch<P>,
    mut on_event: F,
) -> io::Result<JoinHandle<()>>
where
    P: Pollable + Send + 'static,
    F: FnMut(WatchEvent) + Send + 'static,
{
    thread::Builder::new().name(name).spawn(move || {
        for event in watch {
            on_event(event);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Scripted {
        // (readable, buffered) answers, consumed one per tick; last one repeats
        ticks: Mutex<Vec<(bool, usize)>>,
        current: Mutex<(bool, usize)>,
    }

    impl Scripted {
        fn new(mut ticks: Vec<(bool, usize)>) -> Arc<Self> {
            ticks.reverse();
            Arc::new(Self {
                ticks: Mutex::new(ticks),
                current: Mutex::new((false, 0)),
            })
        }
    }

    impl Pollable for Scripted {
        fn poll_readable(&self, _timeout: Duration) -> io::Result<bool> {
            let mut ticks = self.ticks.lock();
            let next = if ticks.len() > 1 {
                ticks.pop()
            } else {
                ticks.last().copied()
            };
            if let Some(state) = next {
                *self.current.lock() = state;
            }
            Ok(self.current.lock().0)
        }

        fn buffered_bytes(&self) -> io::Result<usize> {
            Ok(self.current.lock().1)
        }
    }

    fn fast_config() -> SessionConfig {
        SessionConfig::default().with_poll_interval(Duration::from_millis(1))
    }

    #[test]
    fn test_data_available_is_level_triggered() {
        let socket = Scripted::new(vec![(true, 4), (true, 4), (true, 4), (true, 0)]);
        let events: Vec<_> = Watch::new(socket, &fast_config()).collect();
        assert_eq!(
            events,
            vec![
                WatchEvent::DataAvailable(4),
                WatchEvent::DataAvailable(4),
                WatchEvent::DataAvailable(4),
                WatchEvent::Disconnected,
            ]
        );
    }

    #[test]
    fn test_idle_ticks_emit_nothing() {
        let socket = Scripted::new(vec![(false, 0), (false, 0), (true, 2), (true, 0)]);
        let events: Vec<_> = Watch::new(socket, &fast_config()).collect();
        assert_eq!(
            events,
            vec![WatchEvent::DataAvailable(2), WatchEvent::Disconnected]
        );
    }

    #[test]
    fn test_disconnected_is_terminal() {
        let socket = Scripted::new(vec![(true, 0)]);
        let mut watch = Watch::new(socket, &fast_config());
        assert_eq!(watch.next(), Some(WatchEvent::Disconnected));
        assert_eq!(watch.next(), None);
        assert_eq!(watch.next(), None);
    }

    #[test]
    fn test_spawned_watcher_delivers_events() {
        let socket = Scripted::new(vec![(true, 1), (true, 0)]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let watch = Watch::new(socket, &fast_config());
        let handle =
            spawn_watcher("watch-test".to_string(), watch, move |ev| sink.lock().push(ev)).unwrap();
        handle.join().unwrap();

        assert_eq!(
            *seen.lock(),
            vec![WatchEvent::DataAvailable(1), WatchEvent::Disconnected]
        );
    }
}
