//! In-process stack sampling of the monitored thread
//!
//! ## How a sample is taken
//!
//! 1. The requesting thread (capture worker or watchdog) marks the static
//!    sample slot as requested and sends a real-time signal to the monitored
//!    thread with `pthread_kill`.
//! 2. The handler runs on the monitored thread, reads the interrupted
//!    `pc`/`fp`/`sp` from the signal context and walks the frame-pointer chain
//!    into the slot. It only touches atomics and stack memory inside the
//!    thread's own bounds, so it is async-signal-safe.
//! 3. The requester waits for the slot (bounded), copies the addresses out and
//!    symbolizes them on its own thread.
//!
//! Frame pointers are forced for the whole workspace in `.cargo/config.toml`;
//! frames from code built without them (libc mostly) end the walk early.
//!
//! Supported on Linux x86_64 and aarch64. Everywhere else
//! [`SignalStackCapturer::capture`] returns [`CaptureError::Unsupported`].

#![allow(unsafe_code)]

use std::sync::Arc;

use super::StackCapturer;
use crate::domain::CaptureError;
use crate::host::HostLooper;

/// How long a requester waits for the monitored thread to answer
pub const SAMPLE_TIMEOUT_MS: u64 = 100;

/// Deepest stack recorded
pub const MAX_FRAMES: usize = 64;

/// Samples the monitored thread of a host by signal.
pub struct SignalStackCapturer {
    host: Arc<dyn HostLooper>,
}

impl SignalStackCapturer {
    #[must_use]
    pub fn new(host: Arc<dyn HostLooper>) -> Self {
        Self { host }
    }

    /// True on platforms where sampling works.
    #[must_use]
    pub fn is_supported() -> bool {
        cfg!(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))
    }
}

#[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
impl StackCapturer for SignalStackCapturer {
    fn capture(&self) -> Result<String, CaptureError> {
        let thread = self.host.monitored_thread().ok_or(CaptureError::NoMonitoredThread)?;
        let frames = imp::sample(&thread)?;
        Ok(imp::with_resolver(|resolver| resolver.format_stack(&frames)))
    }

    fn prepare(&self) {
        imp::with_resolver(|_| ());
    }
}

#[cfg(not(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64"))))]
impl StackCapturer for SignalStackCapturer {
    fn capture(&self) -> Result<String, CaptureError> {
        let _ = &self.host;
        Err(CaptureError::Unsupported)
    }
}

#[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
mod imp {
    use log::debug;
    use parking_lot::{const_mutex, Mutex};
    use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
    use std::sync::OnceLock;
    use std::time::{Duration, Instant};

    use super::{MAX_FRAMES, SAMPLE_TIMEOUT_MS};
    use crate::domain::CaptureError;
    use crate::host::MonitoredThread;
    use crate::stack::resolver::StackResolver;

    const IDLE: u8 = 0;
    const REQUESTED: u8 = 1;
    const WRITING: u8 = 2;
    const DONE: u8 = 3;

    struct Slot {
        state: AtomicU8,
        len: AtomicUsize,
        frames: [AtomicUsize; MAX_FRAMES],
        stack_low: AtomicUsize,
        stack_high: AtomicUsize,
    }

    static SLOT: Slot = Slot {
        state: AtomicU8::new(IDLE),
        len: AtomicUsize::new(0),
        frames: [const { AtomicUsize::new(0) }; MAX_FRAMES],
        stack_low: AtomicUsize::new(0),
        stack_high: AtomicUsize::new(0),
    };

    /// One sample at a time: the slot is process-wide
    static SAMPLER: Mutex<()> = const_mutex(());

    static SIGNAL: OnceLock<Result<libc::c_int, CaptureError>> = OnceLock::new();

    /// Shared by every requesting thread; loads the executable's DWARF once
    static RESOLVER: OnceLock<Mutex<StackResolver>> = OnceLock::new();

    pub(super) fn with_resolver<T>(f: impl FnOnce(&StackResolver) -> T) -> T {
        let resolver = RESOLVER.get_or_init(|| Mutex::new(StackResolver::for_current_exe()));
        f(&resolver.lock())
    }

    fn errno() -> i32 {
        std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
    }

    fn install_handler() -> Result<libc::c_int, CaptureError> {
        SIGNAL
            .get_or_init(|| {
                let signo = libc::SIGRTMIN() + 1;
                // SAFETY: the action is fully initialized before use and the
                // handler has the SA_SIGINFO signature.
                unsafe {
                    let mut action: libc::sigaction = std::mem::zeroed();
                    action.sa_sigaction = on_sample_signal as usize;
                    action.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
                    libc::sigemptyset(&mut action.sa_mask);
                    if libc::sigaction(signo, &action, std::ptr::null_mut()) != 0 {
                        return Err(CaptureError::SignalFailed(errno()));
                    }
                }
                debug!("Installed stack sample handler on signal {signo}");
                Ok(signo)
            })
            .clone()
    }

    /// Sample the thread's stack. Returns `pc` followed by return addresses.
    pub(super) fn sample(thread: &MonitoredThread) -> Result<Vec<u64>, CaptureError> {
        let signo = install_handler()?;
        let timeout = Duration::from_millis(SAMPLE_TIMEOUT_MS);
        let _guard = SAMPLER.try_lock_for(timeout).ok_or(CaptureError::Busy)?;

        SLOT.stack_low.store(thread.stack_low, Ordering::Relaxed);
        SLOT.stack_high.store(thread.stack_high, Ordering::Relaxed);
        SLOT.len.store(0, Ordering::Relaxed);
        SLOT.state.store(REQUESTED, Ordering::Release);

        // SAFETY: the pthread_t comes from a thread registered by the host;
        // pthread_kill reports ESRCH if it has exited.
        let rc = unsafe { libc::pthread_kill(thread.pthread, signo) };
        if rc != 0 {
            SLOT.state.store(IDLE, Ordering::Release);
            return Err(CaptureError::SignalFailed(rc));
        }

        let deadline = Instant::now() + timeout;
        loop {
            match SLOT.state.load(Ordering::Acquire) {
                DONE => break,
                REQUESTED if Instant::now() >= deadline => {
                    // withdraw the request unless the handler just took it
                    if SLOT
                        .state
                        .compare_exchange(REQUESTED, IDLE, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return Err(CaptureError::Timeout(SAMPLE_TIMEOUT_MS));
                    }
                }
                _ => std::thread::sleep(Duration::from_micros(50)),
            }
        }

        let len = SLOT.len.load(Ordering::Acquire).min(MAX_FRAMES);
        let frames = SLOT.frames[..len].iter().map(|f| f.load(Ordering::Relaxed) as u64).collect();
        SLOT.state.store(IDLE, Ordering::Release);
        Ok(frames)
    }

    /// Interrupted program counter, frame pointer and stack pointer
    #[cfg(target_arch = "x86_64")]
    unsafe fn registers(context: *mut libc::c_void) -> (usize, usize, usize) {
        let uc = &*context.cast::<libc::ucontext_t>();
        let gregs = &uc.uc_mcontext.gregs;
        (
            gregs[libc::REG_RIP as usize] as usize,
            gregs[libc::REG_RBP as usize] as usize,
            gregs[libc::REG_RSP as usize] as usize,
        )
    }

    #[cfg(target_arch = "aarch64")]
    unsafe fn registers(context: *mut libc::c_void) -> (usize, usize, usize) {
        let uc = &*context.cast::<libc::ucontext_t>();
        let mc = &uc.uc_mcontext;
        (mc.pc as usize, mc.regs[29] as usize, mc.sp as usize)
    }

    extern "C" fn on_sample_signal(
        _signo: libc::c_int,
        _info: *mut libc::siginfo_t,
        context: *mut libc::c_void,
    ) {
        if SLOT
            .state
            .compare_exchange(REQUESTED, WRITING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        // SAFETY: the kernel passes a valid ucontext_t for SA_SIGINFO handlers
        let (pc, mut fp, sp) = unsafe { registers(context) };
        let word = std::mem::size_of::<usize>();
        let low = SLOT.stack_low.load(Ordering::Relaxed).max(sp);
        let high = SLOT.stack_high.load(Ordering::Relaxed);

        SLOT.frames[0].store(pc, Ordering::Relaxed);
        let mut len = 1;

        // each frame record is [saved fp, return address]; records live at
        // strictly increasing addresses inside the live stack
        while len < MAX_FRAMES && fp >= low && fp % word == 0 && fp + 2 * word <= high {
            // SAFETY: fp and fp + word lie within [sp, stack_high), the live
            // part of this thread's own stack
            let (next, ret) = unsafe {
                let record = fp as *const usize;
                (record.read_volatile(), record.add(1).read_volatile())
            };
            if ret == 0 {
                break;
            }
            SLOT.frames[len].store(ret, Ordering::Relaxed);
            len += 1;
            if next <= fp {
                break;
            }
            fp = next;
        }

        SLOT.len.store(len, Ordering::Release);
        SLOT.state.store(DONE, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Looper;
    use std::time::Duration;

    #[test]
    fn test_no_monitored_thread() {
        let looper: Arc<dyn HostLooper> = Arc::new(Looper::new());
        let capturer = SignalStackCapturer::new(looper);
        let expected = if SignalStackCapturer::is_supported() {
            CaptureError::NoMonitoredThread
        } else {
            CaptureError::Unsupported
        };
        assert_eq!(capturer.capture(), Err(expected));
    }

    #[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
    #[test]
    fn test_resolver_shared_across_threads() {
        let here = imp::with_resolver(|r| std::ptr::from_ref(r) as usize);
        let there = std::thread::spawn(|| imp::with_resolver(|r| std::ptr::from_ref(r) as usize))
            .join()
            .unwrap();
        assert_eq!(here, there);
    }

    #[test]
    fn test_samples_busy_looper_thread() {
        if !SignalStackCapturer::is_supported() {
            return;
        }
        let (looper, handle) = Looper::spawn("sampled-looper").unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        looper.post("stall", move || {
            let _ = tx.send(());
            std::thread::sleep(Duration::from_millis(300));
        });
        rx.recv_timeout(Duration::from_secs(2)).unwrap();

        let host: Arc<dyn HostLooper> = Arc::new(looper.clone());
        let stack = SignalStackCapturer::new(host).capture().unwrap();
        assert!(stack.starts_with("#0 "));

        looper.quit();
        handle.join().unwrap();
    }
}
