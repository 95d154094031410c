//! Console I/O on both sides of the syscall boundary.
//!
//! User programs format into a small buffer in their own memory and hand
//! it to `sys_cputs`, like `cprintf` does. The kernel's own console goes
//! to [`HostConsole`], which files each line under the machine whose CPU
//! thread printed it.

use crate::env::UserEnv;
use exo_kernel::config::USTACKTOP;
use exo_kernel::console::Console;
use spin::Mutex;
use std::cell::RefCell;
use std::fmt::{self, Write};
use std::sync::Arc;

/// Text the kernel printed for one machine.
pub type OutputSink = Arc<Mutex<String>>;

/// bytes handed to `sys_cputs` at a time
const PRINTBUFSIZE: usize = 256;
/// where [`print`] stages its buffer: the top of the user stack page
const PRINTBUF: usize = USTACKTOP - PRINTBUFSIZE;

thread_local! {
    static SINK: RefCell<Option<OutputSink>> = RefCell::new(None);
}

/// Run `f` with kernel console output of this thread going to `sink`.
pub(crate) fn with_sink<T>(sink: &OutputSink, f: impl FnOnce() -> T) -> T {
    let old = SINK.with(|s| s.replace(Some(Arc::clone(sink))));
    let ret = f();
    SINK.with(|s| *s.borrow_mut() = old);
    ret
}

/// Kernel console of the host: the current machine's sink, echoed to stdout.
pub struct HostConsole;

impl Console for HostConsole {
    fn put_char(&self, c: u8) {
        let mut buf = [0u8; 4];
        self.put_str((c as char).encode_utf8(&mut buf));
    }

    fn put_str(&self, s: &str) {
        SINK.with(|sink| {
            if let Some(sink) = sink.borrow().as_ref() {
                sink.lock().push_str(s);
            }
        });
        print!("{}", s);
    }
}

struct PrintBuf<'a> {
    env: &'a mut UserEnv,
    buf: [u8; PRINTBUFSIZE],
    idx: usize,
}

impl PrintBuf<'_> {
    fn flush(&mut self) {
        if self.idx == 0 {
            return;
        }
        let len = self.idx;
        self.idx = 0;
        let bytes = self.buf;
        self.env.write(PRINTBUF, &bytes[..len]);
        let _ = self.env.sys_cputs(PRINTBUF, len);
    }
}

impl Write for PrintBuf<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &c in s.as_bytes() {
            self.buf[self.idx] = c;
            self.idx += 1;
            if self.idx == PRINTBUFSIZE {
                self.flush();
            }
        }
        Ok(())
    }
}

#[doc(hidden)]
pub fn print(env: &mut UserEnv, args: fmt::Arguments) {
    let mut out = PrintBuf {
        env,
        buf: [0; PRINTBUFSIZE],
        idx: 0,
    };
    let _ = out.write_fmt(args);
    out.flush();
}

/// `cprintf` from a user environment.
#[macro_export]
macro_rules! uprint {
    ($env: expr, $fmt: literal $(, $($arg: tt)+)?) => {
        $crate::console::print($env, format_args!($fmt $(, $($arg)+)?))
    }
}

#[macro_export]
macro_rules! uprintln {
    ($env: expr, $fmt: literal $(, $($arg: tt)+)?) => {
        $crate::console::print($env, format_args!(concat!($fmt, "\n") $(, $($arg)+)?))
    }
}
