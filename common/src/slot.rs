use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A blocking single-value slot for cross-thread hand-off.
///
/// Only the latest value is retained; sending overwrites any previous value
/// and returns the overwritten one to the sender. A receiver may block until
/// a value arrives or the slot is closed.
#[derive(Debug)]
pub struct Slot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

#[derive(Debug)]
struct SlotState<T> {
    value: Option<T>,
    closed: bool,
}

/// Outcome of [`Slot::send`].
#[derive(Debug, PartialEq, Eq)]
pub enum Sent<T> {
    Stored,
    /// The slot already held a value; it was replaced and is returned here.
    Replaced(T),
    /// The slot is closed; the value is handed back untouched.
    Closed(T),
}

/// Outcome of [`Slot::recv_timeout`].
#[derive(Debug, PartialEq, Eq)]
pub enum Recv<T> {
    Value(T),
    Timeout,
    Closed,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Slot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                value: None,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Stores a value, replacing any existing value.
    pub fn send(&self, val: T) -> Sent<T> {
        let mut state = self.state.lock();
        if state.closed {
            return Sent::Closed(val);
        }
        let previous = state.value.replace(val);
        drop(state);
        self.ready.notify_one();

        match previous {
            Some(previous) => Sent::Replaced(previous),
            None => Sent::Stored,
        }
    }

    /// Takes the value if present, leaving the slot empty.
    pub fn take(&self) -> Option<T> {
        self.state.lock().value.take()
    }

    /// Returns true if there is a value present.
    pub fn has_value(&self) -> bool {
        self.state.lock().value.is_some()
    }

    /// Blocks until a value is available, the slot is closed or `timeout` elapses.
    ///
    /// A value stored before the slot was closed is still delivered.
    pub fn recv_timeout(&self, timeout: Duration) -> Recv<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(value) = state.value.take() {
                return Recv::Value(value);
            }
            if state.closed {
                return Recv::Closed;
            }
            if self.ready.wait_until(&mut state, deadline).timed_out() {
                return match state.value.take() {
                    Some(value) => Recv::Value(value),
                    None if state.closed => Recv::Closed,
                    None => Recv::Timeout,
                };
            }
        }
    }

    /// Closes the slot. Further sends are rejected and blocked receivers wake up.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Reopens a closed slot and discards any stale value.
    pub fn reopen(&self) {
        let mut state = self.state.lock();
        state.closed = false;
        state.value = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn send_and_take() {
        let slot = Slot::new();
        assert!(!slot.has_value());

        assert_eq!(slot.send(42), Sent::Stored);
        assert!(slot.has_value());

        assert_eq!(slot.take(), Some(42));
        assert!(!slot.has_value());
    }

    #[test]
    fn take_empty_returns_none() {
        let slot: Slot<i32> = Slot::new();
        assert!(slot.take().is_none());
    }

    #[test]
    fn send_overwrites_previous() {
        let slot = Slot::new();
        assert_eq!(slot.send(1), Sent::Stored);
        assert_eq!(slot.send(2), Sent::Replaced(1));
        assert_eq!(slot.send(3), Sent::Replaced(2));

        assert_eq!(slot.take(), Some(3));
        assert!(slot.take().is_none());
    }

    #[test]
    fn closed_slot_rejects_values() {
        let slot = Slot::new();
        slot.close();
        assert_eq!(slot.send(7), Sent::Closed(7));
        assert_eq!(slot.recv_timeout(Duration::from_millis(1)), Recv::Closed);

        slot.reopen();
        assert_eq!(slot.send(8), Sent::Stored);
    }

    #[test]
    fn recv_times_out_when_empty() {
        let slot: Slot<u8> = Slot::new();
        assert_eq!(slot.recv_timeout(Duration::from_millis(10)), Recv::Timeout);
    }

    #[test]
    fn recv_wakes_on_send_from_other_thread() {
        let slot = Arc::new(Slot::new());
        let sender = thread::spawn({
            let slot = Arc::clone(&slot);
            move || {
                thread::sleep(Duration::from_millis(20));
                slot.send("frame");
            }
        });

        assert_eq!(slot.recv_timeout(Duration::from_secs(5)), Recv::Value("frame"));
        sender.join().unwrap();
    }

    #[test]
    fn close_wakes_blocked_receiver() {
        let slot: Arc<Slot<u32>> = Arc::new(Slot::new());
        let receiver = thread::spawn({
            let slot = Arc::clone(&slot);
            move || slot.recv_timeout(Duration::from_secs(5))
        });

        thread::sleep(Duration::from_millis(20));
        slot.close();
        assert_eq!(receiver.join().unwrap(), Recv::Closed);
    }
}
