//! Wait primitives
//!
//! Poll the shared screen from the foreground until a condition holds or
//! the time runs out. Every wait lasts at least the connection timeout and
//! checks the screen a fixed number of times spread over that window.

use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;
use tracing::{debug, warn};

use super::connection::TelnetConnection;
use super::term::{lock_screen, VirtualScreen};

/// Checks per wait window
const POLL_TRIALS: u32 = 25;

impl TelnetConnection {
    /// Wait until `text` appears on screen and return it as displayed
    pub fn wait_for_string(
        &self,
        text: &str,
        case_sensitive: bool,
        timeout: Duration,
    ) -> Option<String> {
        let found = poll_screen(&self.screen(), self.wait_window(timeout), |screen| {
            screen.find_on_screen(text, case_sensitive)
        });
        if found.is_none() {
            debug!("Timed out waiting for {:?}", text);
        }
        found
    }

    /// Wait until the case-sensitive `pattern` matches and return the match
    pub fn wait_for_regex(&self, pattern: &str, timeout: Duration) -> Option<String> {
        let re = match Regex::new(pattern) {
            Ok(re) => re,
            Err(e) => {
                warn!("Invalid wait pattern {:?}: {}", pattern, e);
                return None;
            }
        };
        let found = poll_screen(&self.screen(), self.wait_window(timeout), |screen| {
            screen.find_regex(&re)
        });
        if found.is_none() {
            debug!("Timed out waiting for /{}/", pattern);
        }
        found
    }

    /// Wait until the screen changes after this call
    pub fn wait_for_changed_screen(&self, timeout: Duration) -> bool {
        let screen = self.screen();
        // Take a snapshot so only later changes count
        lock_screen(&screen).find_on_screen("", true);
        poll_screen(&screen, self.wait_window(timeout), |screen| {
            screen.is_changed().then_some(())
        })
        .is_some()
    }

    /// Sleep on the calling thread; the reader keeps drawing meanwhile
    pub fn wait(&self, duration: Duration) {
        thread::sleep(duration);
    }

    fn wait_window(&self, timeout: Duration) -> Duration {
        timeout.max(self.settings().timeout)
    }
}

/// Run `check` against the locked screen until it yields a value or
/// `timeout` elapses. The deadline is fixed up front.
pub(crate) fn poll_screen<T>(
    screen: &Mutex<VirtualScreen>,
    timeout: Duration,
    mut check: impl FnMut(&mut VirtualScreen) -> Option<T>,
) -> Option<T> {
    let deadline = Instant::now() + timeout;
    let interval = (timeout / POLL_TRIALS).max(Duration::from_millis(1));

    loop {
        if let Some(found) = check(&mut lock_screen(screen)) {
            return Some(found);
        }
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        thread::sleep(interval.min(deadline - now));
    }
}
