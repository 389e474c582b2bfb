use crate::{*, error::*, os::*};
use libc::pid_t;
use std::mem;

// Snapshot of a thread's general-purpose registers. Only meaningful while
// the thread is ptrace-stopped.
#[derive(Clone, Copy)]
pub struct Registers {
    pub regs: libc::user_regs_struct,
}

impl Registers {
    pub fn pc(&self) -> u64 { self.regs.rip }
    pub fn set_pc(&mut self, pc: u64) { self.regs.rip = pc; }
    pub fn sp(&self) -> u64 { self.regs.rsp }

    // (name, value) pairs in user_regs_struct order, for dumping.
    pub fn fields(&self) -> [(&'static str, u64); 18] {
        let r = &self.regs;
        [("rip", r.rip), ("rsp", r.rsp), ("rbp", r.rbp), ("rax", r.rax), ("rbx", r.rbx), ("rcx", r.rcx), ("rdx", r.rdx), ("rsi", r.rsi), ("rdi", r.rdi),
         ("r8", r.r8), ("r9", r.r9), ("r10", r.r10), ("r11", r.r11), ("r12", r.r12), ("r13", r.r13), ("r14", r.r14), ("r15", r.r15), ("eflags", r.eflags)]
    }
}

impl Default for Registers {
    fn default() -> Self {
        Registers {regs: unsafe {mem::zeroed()}}
    }
}

pub fn getregs(tid: pid_t) -> Result<Registers> {
    unsafe {
        let mut regs: libc::user_regs_struct = mem::zeroed();
        ptrace(PTRACE_GETREGS, tid, 0, &mut regs as *mut _ as u64)?;
        Ok(Registers {regs})
    }
}

pub fn setregs(tid: pid_t, registers: &Registers) -> Result<()> {
    unsafe {
        let mut regs = registers.regs;
        ptrace(PTRACE_SETREGS, tid, 0, &mut regs as *mut _ as u64)?;
        Ok(())
    }
}
