//! Console input ring, io event queue and the mouse cursor.

use super::MousePacket;
use crate::config::{CONSBUFSIZE, GRAPHICS_HEIGHT, GRAPHICS_WIDTH, IO_EVENT_QUEUE_SIZE};
use crate::sync::RingBuffer;

/// bytes of one io event as copied out to user space
pub const IO_EVENT_SIZE: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum IoEventKind {
    /// `a` = character
    KeyboardKey = 1,
    /// `a`, `b` = new cursor position
    MouseMove = 2,
    /// `a` = button: 0 left, 1 middle, 2 right
    MouseClick = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoEvent {
    pub kind: IoEventKind,
    pub a: i32,
    pub b: i32,
}

impl Default for IoEvent {
    fn default() -> Self {
        Self {
            kind: IoEventKind::KeyboardKey,
            a: 0,
            b: 0,
        }
    }
}

impl IoEvent {
    pub fn key(c: u8) -> Self {
        Self {
            kind: IoEventKind::KeyboardKey,
            a: c as i32,
            b: 0,
        }
    }

    pub fn mouse_move(x: i32, y: i32) -> Self {
        Self {
            kind: IoEventKind::MouseMove,
            a: x,
            b: y,
        }
    }

    pub fn mouse_click(button: i32) -> Self {
        Self {
            kind: IoEventKind::MouseClick,
            a: button,
            b: 0,
        }
    }

    /// `kind`, `a`, `b` as little-endian 32-bit words
    pub fn to_bytes(&self) -> [u8; IO_EVENT_SIZE] {
        let mut out = [0u8; IO_EVENT_SIZE];
        out[0..4].copy_from_slice(&(self.kind as u32).to_le_bytes());
        out[4..8].copy_from_slice(&self.a.to_le_bytes());
        out[8..12].copy_from_slice(&self.b.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; IO_EVENT_SIZE]) -> Option<Self> {
        let word = |i: usize| [bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]];
        let kind = match u32::from_le_bytes(word(0)) {
            1 => IoEventKind::KeyboardKey,
            2 => IoEventKind::MouseMove,
            3 => IoEventKind::MouseClick,
            _ => return None,
        };
        Some(Self {
            kind,
            a: i32::from_le_bytes(word(4)),
            b: i32::from_le_bytes(word(8)),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    pub x: i32,
    pub y: i32,
    pub left: bool,
    pub right: bool,
    pub middle: bool,
}

pub struct InputState {
    pub console: RingBuffer<u8, CONSBUFSIZE>,
    pub events: RingBuffer<IoEvent, IO_EVENT_QUEUE_SIZE>,
    pub cursor: Cursor,
    /// keyboard input feeds the event queue instead of the console
    pub graphics: bool,
    /// events lost because the queue was full
    pub dropped: usize,
}

impl InputState {
    pub fn new(graphics: bool) -> Self {
        Self {
            console: RingBuffer::new(),
            events: RingBuffer::new(),
            cursor: Cursor::default(),
            graphics,
            dropped: 0,
        }
    }

    /// Queue an event; dropped when the queue is full.
    pub fn put_event(&mut self, e: IoEvent) {
        if !self.events.push(e) {
            self.dropped += 1;
            trace!("io event queue full, dropping {:?}", e);
        }
    }

    /// 控制台缓冲区写满后覆盖最旧的字符
    pub fn console_char(&mut self, c: u8) {
        if c != 0 {
            self.console.push_overwrite(c);
        }
    }

    pub fn keyboard_char(&mut self, c: u8) {
        if c == 0 {
            return;
        }
        if self.graphics {
            self.put_event(IoEvent::key(c));
        } else {
            self.console_char(c);
        }
    }

    pub fn mouse_packet(&mut self, p: MousePacket) {
        let new = Cursor {
            x: (self.cursor.x + p.dx).clamp(0, GRAPHICS_WIDTH - 1),
            // 鼠标报告的 y 方向向上为正，屏幕坐标向下为正
            y: (self.cursor.y - p.dy).clamp(0, GRAPHICS_HEIGHT - 1),
            left: p.left,
            right: p.right,
            middle: p.middle,
        };
        let old = self.cursor;
        let left = new.left && !old.left;
        let middle = new.middle && !old.middle;
        let right = new.right && !old.right;
        // 先报告当前位置，点击才能落在正确的地方
        if left || middle || right {
            self.put_event(IoEvent::mouse_move(new.x, new.y));
        }
        if left {
            self.put_event(IoEvent::mouse_click(0));
        }
        if middle {
            self.put_event(IoEvent::mouse_click(1));
        }
        if right {
            self.put_event(IoEvent::mouse_click(2));
        }
        self.cursor = new;
    }
}
