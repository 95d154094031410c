//! Memory management implementation
//!
//! 32-bit two-level paging over simulated physical memory, and everything
//! about memory management, like frame allocator, page table, the user
//! MMU and memory set, is implemented here.
//!
//! Every environment has a memory_set to control its virtual memory.

mod address;
mod frame_allocator;
mod memory_set;
mod mmu;
mod page_table;
mod phys_memory;

pub use address::{PhysAddr, PhysPageNum, VirtAddr, VirtPageNum};
pub use address::VPNRange;
pub use frame_allocator::{page_init, AllocFlags, BootAllocator, FrameAllocator};
pub use memory_set::{KernelSpace, MemorySet};
pub use mmu::{translate, user_load, user_store, PageFault, FEC_PR, FEC_U, FEC_WR};
pub use page_table::{copy_from_user, copy_to_user, PTEFlags, PageTable, PageTableEntry};
pub use phys_memory::{PageInfo, PhysMemory};
