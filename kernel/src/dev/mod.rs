//! Devices the kernel talks to, seen only through traits.
//!
//! Real drivers (PS/2, 8250 UART, e1000, IDE) are out of the kernel's
//! reach; the host attaches whatever implementations it has in a
//! [`Devices`] bundle at boot. Input gathered from them is queued in
//! [`InputState`] until user space asks for it.

mod input;

use crate::error::KernelError;
use crate::trap::TrapFrame;
use alloc::boxed::Box;

pub use input::{Cursor, InputState, IoEvent, IoEventKind, IO_EVENT_SIZE};

/// keyboard or serial line
pub trait CharDevice: Send {
    /// Next pending character, `None` when drained.
    fn getc(&mut self) -> Option<u8>;
}

/// One decoded PS/2 mouse packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MousePacket {
    pub dx: i32,
    /// as the mouse reports it: up is positive
    pub dy: i32,
    pub left: bool,
    pub right: bool,
    pub middle: bool,
}

pub trait PointerDevice: Send {
    fn poll(&mut self) -> Option<MousePacket>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetError {
    /// transmit ring full, or nothing received yet
    NotReady,
    /// the packet is larger than the buffer
    BufferTooSmall,
}

impl From<NetError> for KernelError {
    fn from(e: NetError) -> Self {
        match e {
            NetError::NotReady => KernelError::NetNotReady,
            NetError::BufferTooSmall => KernelError::NetTooSmall,
        }
    }
}

pub trait NetworkAdapter: Send {
    fn transmit(&mut self, packet: &[u8]) -> Result<(), NetError>;
    /// Copy the next packet into `buf` and return its length.
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, NetError>;
}

/// Disk used by the file-system environment; the kernel itself only hands
/// out its I/O port base.
pub trait BlockDevice: Send {
    fn io_base(&self) -> u32;
    fn read_block(&mut self, blockno: u32, buf: &mut [u8]) -> Result<(), KernelError>;
    fn write_block(&mut self, blockno: u32, buf: &[u8]) -> Result<(), KernelError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorAction {
    /// resume whatever was interrupted
    Continue,
    /// destroy the current environment
    Kill,
}

/// Kernel monitor entered on breakpoints and when nothing is left to run.
pub trait Monitor: Send {
    fn enter(&mut self, tf: Option<&TrapFrame>) -> MonitorAction;
}

/// Prints the frame and lets execution continue.
pub struct LogMonitor;

impl Monitor for LogMonitor {
    fn enter(&mut self, tf: Option<&TrapFrame>) -> MonitorAction {
        match tf {
            Some(tf) => {
                println!("Welcome to the JOS kernel monitor!");
                print!("{}", tf);
            }
            None => info!("monitor entered with no trap frame"),
        }
        MonitorAction::Continue
    }
}

/// Everything attached to the machine.
pub struct Devices {
    pub keyboard: Option<Box<dyn CharDevice>>,
    pub serial: Option<Box<dyn CharDevice>>,
    pub mouse: Option<Box<dyn PointerDevice>>,
    pub net: Option<Box<dyn NetworkAdapter>>,
    pub disk: Option<Box<dyn BlockDevice>>,
    pub monitor: Box<dyn Monitor>,
}

impl Default for Devices {
    fn default() -> Self {
        Self {
            keyboard: None,
            serial: None,
            mouse: None,
            net: None,
            disk: None,
            monitor: Box::new(LogMonitor),
        }
    }
}

impl Devices {
    /// Drain keyboard and mouse together; on real hardware they share
    /// the PS/2 controller.
    pub fn drain_keyboard_and_mouse(&mut self, input: &mut InputState) {
        let old = input.cursor;
        if let Some(kbd) = self.keyboard.as_mut() {
            while let Some(c) = kbd.getc() {
                input.keyboard_char(c);
            }
        }
        if let Some(mouse) = self.mouse.as_mut() {
            while let Some(packet) = mouse.poll() {
                input.mouse_packet(packet);
            }
        }
        // 位置变了就补一个 MouseMove
        if (input.cursor.x, input.cursor.y) != (old.x, old.y) {
            input.put_event(IoEvent::mouse_move(input.cursor.x, input.cursor.y));
        }
    }

    pub fn drain_serial(&mut self, input: &mut InputState) {
        if let Some(serial) = self.serial.as_mut() {
            while let Some(c) = serial.getc() {
                input.console_char(c);
            }
        }
    }
}
