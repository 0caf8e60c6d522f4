//! Wait/wake on a 32-bit word in shared memory
//!
//! On Linux and Android this is `futex(2)` without `FUTEX_PRIVATE_FLAG`, so a
//! waiter in one process is woken by a writer in another process mapping the
//! same block. Other targets fall back to polling the word.

use std::sync::atomic::AtomicU32;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod imp {
    use crate::trace;
    use rustix::io::Errno;
    use rustix::thread::futex;
    use std::sync::atomic::AtomicU32;

    pub(super) fn wait(word: &AtomicU32, expected: u32) {
        match futex::wait(word, futex::Flags::empty(), expected, None) {
            Ok(()) => {}
            // AGAIN: the word no longer held `expected` when the kernel looked
            Err(err) if err == Errno::AGAIN || err == Errno::INTR => {}
            Err(_err) => {
                trace::warn!(error = %_err, "futex wait failed");
            }
        }
    }

    pub(super) fn wake(word: &AtomicU32) {
        if let Err(_err) = futex::wake(word, futex::Flags::empty(), i32::MAX as u32) {
            trace::warn!(error = %_err, "futex wake failed");
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
mod imp {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    const SPIN_COUNT: u32 = 1000;

    pub(super) fn wait(word: &AtomicU32, expected: u32) {
        loop {
            for _ in 0..SPIN_COUNT {
                if word.load(Ordering::SeqCst) != expected {
                    return;
                }
                std::hint::spin_loop();
            }
            std::thread::sleep(Duration::from_micros(10));
        }
    }

    pub(super) fn wake(_word: &AtomicU32) {}
}

/// Block while `word` still holds `expected`
///
/// May return spuriously; callers re-check their condition.
#[inline]
pub(crate) fn wait(word: &AtomicU32, expected: u32) {
    imp::wait(word, expected)
}

/// Wake every context blocked in [`wait`] on `word`
#[inline]
pub(crate) fn wake(word: &AtomicU32) {
    imp::wake(word)
}
