//! Kernel console output.
//!
//! The kernel never talks to a UART itself: whoever hosts it installs a
//! [`Console`] sink once with [`init_console`], and `print!`/`println!`
//! write through it. Output before a sink exists is dropped.

use core::fmt::{self, Write};
use spin::Once;

/// 控制台输出的抽象
pub trait Console: Sync {
    fn put_char(&self, c: u8);

    /// 如果实现里用了锁，覆盖这个方法以免逐字符加锁
    fn put_str(&self, s: &str) {
        for c in s.bytes() {
            self.put_char(c);
        }
    }
}

static CONSOLE: Once<&'static dyn Console> = Once::new();

/// Install the output sink; later calls are ignored.
pub fn init_console(console: &'static dyn Console) {
    CONSOLE.call_once(|| console);
}

struct Stdout;

impl Write for Stdout {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if let Some(console) = CONSOLE.get() {
            console.put_str(s);
        }
        Ok(())
    }
}

#[doc(hidden)]
pub fn print(args: fmt::Arguments) {
    let _ = Stdout.write_fmt(args);
}

#[macro_export]
macro_rules! print {
    ($fmt: literal $(, $($arg: tt)+)?) => {
        $crate::console::print(format_args!($fmt $(, $($arg)+)?))
    }
}

#[macro_export]
macro_rules! println {
    () => {
        $crate::console::print(format_args!("\n"))
    };
    ($fmt: literal $(, $($arg: tt)+)?) => {
        $crate::console::print(format_args!(concat!($fmt, "\n") $(, $($arg)+)?))
    }
}
