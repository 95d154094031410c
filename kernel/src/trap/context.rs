//! Saved user context.
//!
//! The layout is the one the x86 trap entry code builds on the kernel
//! stack: `pushal` registers, data segments, trap number, error code and
//! the frame the processor pushes itself. Every field is 32 bits wide.

use core::fmt::{self, Display, Formatter};

// GDT 中的段选择子
pub const GD_KT: u32 = 0x08;
pub const GD_KD: u32 = 0x10;
pub const GD_UT: u32 = 0x18;
pub const GD_UD: u32 = 0x20;
pub const GD_TSS0: u32 = 0x28;

/// Interrupt Flag
pub const FL_IF: u32 = 0x0000_0200;
/// I/O Privilege Level bitmask
pub const FL_IOPL_MASK: u32 = 0x0000_3000;
/// Virtual 8086 mode
pub const FL_VM: u32 = 0x0002_0000;

/// bytes of a serialized [`TrapFrame`]
pub const TRAPFRAME_SIZE: usize = 17 * 4;
/// bytes of a serialized [`UTrapframe`]
pub const UTRAPFRAME_SIZE: usize = 13 * 4;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// registers as pushed by `pushal`
pub struct PushRegs {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    /// useless
    pub oesp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapFrame {
    pub regs: PushRegs,
    pub es: u32,
    pub ds: u32,
    pub trapno: u32,
    // 以下由 x86 硬件压栈
    pub err: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    // 以下仅在跨特权级时压栈
    pub esp: u32,
    pub ss: u32,
}

/// What the page-fault upcall finds on the user exception stack.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UTrapframe {
    pub fault_va: u32,
    pub err: u32,
    pub regs: PushRegs,
    pub eip: u32,
    pub eflags: u32,
    pub esp: u32,
}

fn put_words(words: &[u32], out: &mut [u8]) {
    for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
}

fn get_words<const N: usize>(bytes: &[u8]) -> [u32; N] {
    let mut words = [0u32; N];
    for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    words
}

impl PushRegs {
    fn words(&self) -> [u32; 8] {
        [
            self.edi, self.esi, self.ebp, self.oesp, self.ebx, self.edx, self.ecx, self.eax,
        ]
    }

    fn from_words(w: &[u32]) -> Self {
        Self {
            edi: w[0],
            esi: w[1],
            ebp: w[2],
            oesp: w[3],
            ebx: w[4],
            edx: w[5],
            ecx: w[6],
            eax: w[7],
        }
    }
}

impl TrapFrame {
    /// Initial context of a new environment: user segments, interrupts on,
    /// stack at `esp`. `eip` is filled in by the loader.
    pub fn user_init(esp: u32) -> Self {
        Self {
            ds: GD_UD | 3,
            es: GD_UD | 3,
            ss: GD_UD | 3,
            cs: GD_UT | 3,
            esp,
            eflags: FL_IF,
            ..Self::default()
        }
    }

    /// Trapped from ring 3
    pub fn from_user(&self) -> bool {
        self.cs & 3 == 3
    }

    /// Make a frame handed in by user code safe to run: user segments,
    /// interrupts enabled, no I/O privilege.
    pub fn sanitize(&mut self) {
        self.cs = GD_UT | 3;
        self.ds = GD_UD | 3;
        self.es = GD_UD | 3;
        self.ss = GD_UD | 3;
        self.eflags |= FL_IF;
        self.eflags &= !FL_IOPL_MASK;
    }

    pub fn to_bytes(&self) -> [u8; TRAPFRAME_SIZE] {
        let r = self.regs.words();
        let words = [
            r[0], r[1], r[2], r[3], r[4], r[5], r[6], r[7], self.es, self.ds, self.trapno,
            self.err, self.eip, self.cs, self.eflags, self.esp, self.ss,
        ];
        let mut out = [0u8; TRAPFRAME_SIZE];
        put_words(&words, &mut out);
        out
    }

    pub fn from_bytes(bytes: &[u8; TRAPFRAME_SIZE]) -> Self {
        let w: [u32; 17] = get_words(bytes);
        Self {
            regs: PushRegs::from_words(&w[..8]),
            es: w[8],
            ds: w[9],
            trapno: w[10],
            err: w[11],
            eip: w[12],
            cs: w[13],
            eflags: w[14],
            esp: w[15],
            ss: w[16],
        }
    }
}

impl UTrapframe {
    pub fn to_bytes(&self) -> [u8; UTRAPFRAME_SIZE] {
        let r = self.regs.words();
        let words = [
            self.fault_va, self.err, r[0], r[1], r[2], r[3], r[4], r[5], r[6], r[7], self.eip,
            self.eflags, self.esp,
        ];
        let mut out = [0u8; UTRAPFRAME_SIZE];
        put_words(&words, &mut out);
        out
    }

    pub fn from_bytes(bytes: &[u8; UTRAPFRAME_SIZE]) -> Self {
        let w: [u32; 13] = get_words(bytes);
        Self {
            fault_va: w[0],
            err: w[1],
            regs: PushRegs::from_words(&w[2..10]),
            eip: w[10],
            eflags: w[11],
            esp: w[12],
        }
    }
}

/// Human readable name of a trap number.
pub fn trapname(trapno: u32) -> &'static str {
    const EXCNAMES: [&str; 20] = [
        "Divide error",
        "Debug",
        "Non-Maskable Interrupt",
        "Breakpoint",
        "Overflow",
        "BOUND Range Exceeded",
        "Invalid Opcode",
        "Device Not Available",
        "Double Fault",
        "Coprocessor Segment Overrun",
        "Invalid TSS",
        "Segment Not Present",
        "Stack Fault",
        "General Protection",
        "Page Fault",
        "(unknown trap)",
        "x87 FPU Floating-Point Error",
        "Alignment Check",
        "Machine-Check",
        "SIMD Floating-Point Exception",
    ];
    match trapno {
        n if (n as usize) < EXCNAMES.len() => EXCNAMES[n as usize],
        super::T_SYSCALL => "System call",
        n if (super::IRQ_OFFSET..super::IRQ_OFFSET + 16).contains(&n) => "Hardware Interrupt",
        _ => "(unknown trap)",
    }
}

impl Display for TrapFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let r = &self.regs;
        writeln!(f, "  edi  {:#010x}", r.edi)?;
        writeln!(f, "  esi  {:#010x}", r.esi)?;
        writeln!(f, "  ebp  {:#010x}", r.ebp)?;
        writeln!(f, "  oesp {:#010x}", r.oesp)?;
        writeln!(f, "  ebx  {:#010x}", r.ebx)?;
        writeln!(f, "  edx  {:#010x}", r.edx)?;
        writeln!(f, "  ecx  {:#010x}", r.ecx)?;
        writeln!(f, "  eax  {:#010x}", r.eax)?;
        writeln!(f, "  es   0x----{:04x}", self.es & 0xffff)?;
        writeln!(f, "  ds   0x----{:04x}", self.ds & 0xffff)?;
        writeln!(f, "  trap {:#010x} {}", self.trapno, trapname(self.trapno))?;
        write!(f, "  err  {:#010x}", self.err)?;
        // 缺页异常的错误码单独解释一下
        if self.trapno == super::T_PGFLT {
            let bit = |mask: u32, yes: &'static str, no: &'static str| {
                if self.err & mask != 0 {
                    yes
                } else {
                    no
                }
            };
            write!(
                f,
                " [{}, {}, {}]",
                bit(4, "user", "kernel"),
                bit(2, "write", "read"),
                bit(1, "protection", "not-present")
            )?;
        }
        writeln!(f)?;
        writeln!(f, "  eip  {:#010x}", self.eip)?;
        writeln!(f, "  cs   0x----{:04x}", self.cs & 0xffff)?;
        writeln!(f, "  flag {:#010x}", self.eflags)?;
        if self.from_user() {
            writeln!(f, "  esp  {:#010x}", self.esp)?;
            writeln!(f, "  ss   0x----{:04x}", self.ss & 0xffff)?;
        }
        Ok(())
    }
}
