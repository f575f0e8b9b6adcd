use std::sync::atomic::{AtomicU32, Ordering};

const SHOULD_CLOSE: u32 = 1 << 0;
const CLOSE_ENQUEUED: u32 = 1 << 1;
const CONSIDER_CLOSE_ENQUEUED: u32 = 1 << 2;
const SUBTASK_SHIFT: u32 = 16;

/// The close-lifecycle flags of one conversation, packed into one word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversationState {
    /// The conversation must close once nothing is running. Never reset.
    pub should_close: bool,
    /// The close work item was enqueued. Never reset.
    pub close_enqueued: bool,
    /// The consider-close work item was enqueued. Never reset.
    pub consider_close_enqueued: bool,
    /// Subtasks currently serving a request.
    pub running_subtasks: u16,
}

impl ConversationState {
    fn pack(self) -> u32 {
        let mut word = u32::from(self.running_subtasks) << SUBTASK_SHIFT;
        if self.should_close {
            word |= SHOULD_CLOSE;
        }
        if self.close_enqueued {
            word |= CLOSE_ENQUEUED;
        }
        if self.consider_close_enqueued {
            word |= CONSIDER_CLOSE_ENQUEUED;
        }
        word
    }

    fn unpack(word: u32) -> Self {
        Self {
            should_close: word & SHOULD_CLOSE != 0,
            close_enqueued: word & CLOSE_ENQUEUED != 0,
            consider_close_enqueued: word & CONSIDER_CLOSE_ENQUEUED != 0,
            running_subtasks: (word >> SUBTASK_SHIFT) as u16,
        }
    }
}

/// [`ConversationState`] shared between the reactor thread and subtasks.
///
/// Every change goes through a compare-and-swap so that concurrent subtask
/// completions enqueue the consider-close work item at most once.
#[derive(Debug, Default)]
pub struct SharedState(AtomicU32);

impl SharedState {
    /// A fresh conversation: open, nothing running.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn load(&self) -> ConversationState {
        ConversationState::unpack(self.0.load(Ordering::Acquire))
    }

    /// Replace `expected` with `desired` if nothing changed in between.
    pub fn try_transition(&self, expected: ConversationState, desired: ConversationState) -> bool {
        self.0
            .compare_exchange(
                expected.pack(),
                desired.pack(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Count one more running subtask.
    pub fn subtask_started(&self) {
        self.update(|state| {
            state.running_subtasks = state.running_subtasks.saturating_add(1);
        });
    }

    /// Set `should_close`.
    pub fn mark_should_close(&self) {
        self.update(|state| state.should_close = true);
    }

    /// Run the close evaluation, first counting one subtask as ended if
    /// `subtask_ended`.
    ///
    /// Returns true to exactly one caller over the conversation's life: the one
    /// whose transition set `consider_close_enqueued`. That caller must enqueue
    /// the consider-close work item.
    pub fn evaluate(&self, subtask_ended: bool) -> bool {
        loop {
            let compare = self.load();
            let mut replace = compare;
            if subtask_ended {
                replace.running_subtasks = replace.running_subtasks.saturating_sub(1);
            }
            if replace.running_subtasks == 0 && replace.should_close && !replace.consider_close_enqueued {
                replace.consider_close_enqueued = true;
            }
            if replace == compare {
                return false;
            }
            if self.try_transition(compare, replace) {
                return !compare.consider_close_enqueued && replace.consider_close_enqueued;
            }
        }
    }

    /// Set `close_enqueued` if the conversation is idle and the close item was
    /// not yet enqueued. Only called from the reactor thread.
    pub fn mark_close_enqueued(&self) -> bool {
        let state = self.load();
        if state.running_subtasks != 0 || state.close_enqueued {
            return false;
        }
        self.0.fetch_or(CLOSE_ENQUEUED, Ordering::AcqRel) & CLOSE_ENQUEUED == 0
    }

    fn update(&self, change: impl Fn(&mut ConversationState)) {
        loop {
            let compare = self.load();
            let mut replace = compare;
            change(&mut replace);
            if replace == compare || self.try_transition(compare, replace) {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn packing_is_lossless() {
        let state = ConversationState {
            should_close: true,
            close_enqueued: false,
            consider_close_enqueued: true,
            running_subtasks: 513,
        };
        assert_eq!(ConversationState::unpack(state.pack()), state);
    }

    #[test]
    fn idle_close_enqueues_once() {
        let shared = SharedState::new();
        assert!(!shared.evaluate(false));
        shared.mark_should_close();
        assert!(shared.evaluate(false));
        assert!(!shared.evaluate(false));
        assert!(shared.mark_close_enqueued());
        assert!(!shared.mark_close_enqueued());
    }

    #[test]
    fn waits_for_running_subtasks() {
        let shared = SharedState::new();
        shared.subtask_started();
        shared.subtask_started();
        shared.mark_should_close();
        assert!(!shared.evaluate(false));
        assert!(!shared.evaluate(true));
        assert!(shared.evaluate(true));
        assert_eq!(shared.load().running_subtasks, 0);
    }

    #[test]
    fn concurrent_completions_enqueue_once() {
        for _ in 0..200 {
            let subtasks = fastrand::usize(1..16);
            let shared = Arc::new(SharedState::new());
            for _ in 0..subtasks {
                shared.subtask_started();
            }
            let enqueued = Arc::new(AtomicUsize::new(0));

            let mut handles = Vec::new();
            for i in 0..subtasks {
                let shared = shared.clone();
                let enqueued = enqueued.clone();
                let close_first = fastrand::bool();
                handles.push(thread::spawn(move || {
                    if close_first || i == 0 {
                        shared.mark_should_close();
                    }
                    for _ in 0..fastrand::usize(0..4) {
                        thread::yield_now();
                    }
                    if shared.evaluate(true) {
                        enqueued.fetch_add(1, Ordering::SeqCst);
                    }
                    if shared.evaluate(false) {
                        enqueued.fetch_add(1, Ordering::SeqCst);
                    }
                }));
            }
            if shared.evaluate(false) {
                enqueued.fetch_add(1, Ordering::SeqCst);
            }
            for handle in handles {
                handle.join().unwrap();
            }

            assert_eq!(enqueued.load(Ordering::SeqCst), 1);
            let state = shared.load();
            assert_eq!(state.running_subtasks, 0);
            assert!(state.consider_close_enqueued);
        }
    }
}
