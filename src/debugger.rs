use crate::{*, error::*, elf::*, eval::{self, MemReader, Variable}, os::{self, *}, procfs::*, registers::{self, *}, symbols::*, unwind::*};
use libc::{c_char, pid_t};
use std::{collections::{BTreeMap, HashMap}, ffi::CString, sync::Arc, thread};

pub const TRAP_BYTE: u8 = 0xcc;

// A debug session attached to some process (child or otherwise).
//
// The kernel requires that every ptrace command after the initial attach come
// from the attaching thread, so a DebuggedProcess must live and die on the OS
// thread that created it. The only internal parallelism is the load phase,
// which reads the executable image, not the tracee.
pub struct DebuggedProcess {
    pub pid: pid_t,
    pub elf: Arc<ElfFile>,
    pub symtab: Arc<SymTable>,
    pub frames: Arc<FrameTable>,
    pub debug_info: Arc<DebugInfo>,

    pub threads: BTreeMap<pid_t, ThreadCtx>,
    // The thread commands operate on; the thread whose tid equals the pid.
    pub current: pid_t,

    // Keyed by trap address. The address space is process-wide, so the table
    // lives here rather than per thread.
    breakpoints: HashMap<u64, Breakpoint>,

    // Whether we forked the tracee ourselves (the CLI offers to kill it on exit).
    pub spawned: bool,
}

// Per-kernel-thread state. The register cache is only meaningful while the
// thread is stopped.
pub struct ThreadCtx {
    pub tid: pid_t,
    pub regs: Registers,
    pub status: WaitStatus,
}

// A software breakpoint: the trap byte at `addr` displaced `original_data`.
// While the record exists, the byte in tracee memory is TRAP_BYTE; clearing
// restores `original_data` and drops the record.
#[derive(Clone, Debug)]
pub struct Breakpoint {
    pub function_name: String,
    pub file: String,
    pub line: u32,
    pub addr: u64,
    pub original_data: u8,
}

impl DebuggedProcess {
    // Attaches to every kernel thread of `pid`, waits for each to stop, then
    // loads debug information.
    pub fn attach(pid: pid_t) -> Result<DebuggedProcess> {
        let mut threads: BTreeMap<pid_t, ThreadCtx> = BTreeMap::new();
        // Threads can spawn while we're attaching (before we've attached to
        // their parent), so rescan until a round discovers nothing new.
        loop {
            let tids = match list_threads(pid) {
                Err(e) if e.is_io_not_found() => return err!(ProcessState, "no process with pid {}", pid),
                r => r?,
            };
            let mut found_new = false;
            for tid in tids {
                if threads.contains_key(&tid) {
                    continue;
                }
                found_new = true;
                match unsafe {ptrace(PTRACE_ATTACH, tid, 0, 0)} {
                    Ok(_) => (),
                    Err(e) if e.is_io_permission_denied() => return err!(Usage, "ptrace({}) failed: operation not permitted - check /proc/sys/kernel/yama/ptrace_scope or run as root", tid),
                    Err(e) if e.is_tracee_gone() => continue, // raced with thread exit
                    Err(e) => return Err(e),
                }
                let status = os::wait(tid)?;
                threads.insert(tid, ThreadCtx {tid, regs: Registers::default(), status});
            }
            if !found_new {
                break;
            }
        }
        if !threads.contains_key(&pid) {
            return err!(ProcessState, "thread {} disappeared while attaching", pid);
        }
        Self::with_threads(pid, threads, false)
    }

    // Fork-execs `path` under tracing and attaches to the result. The child
    // raises SIGTRAP at exec (PTRACE_TRACEME), so it stops before its first
    // instruction.
    pub fn launch(path: &str, args: &[String]) -> Result<DebuggedProcess> {
        // Everything the child needs is prepared before fork(); the child
        // itself must not allocate.
        let mut argv_owned: Vec<CString> = Vec::new();
        argv_owned.push(match CString::new(path) {
            Ok(x) => x,
            Err(_) => return err!(Usage, "path contains a NUL byte"),
        });
        for a in args {
            argv_owned.push(match CString::new(&a[..]) {
                Ok(x) => x,
                Err(_) => return err!(Usage, "argument contains a NUL byte"),
            });
        }
        let mut argv: Vec<*const c_char> = argv_owned.iter().map(|s| s.as_ptr()).collect();
        argv.push(std::ptr::null());

        let pid = unsafe {libc::fork()};
        if pid < 0 {
            return errno_err!("fork() failed");
        }
        if pid == 0 {
            // Child. Do as little as possible here, and always end with
            // either a successful exec or a hard exit.
            unsafe {
                if libc::ptrace(PTRACE_TRACEME as _, 0 as pid_t, 0 as u64, 0 as u64) == 0 {
                    libc::execvp(argv[0], argv.as_ptr());
                }
                libc::perror(b"child: exec failed\0".as_ptr() as *const c_char);
                libc::_exit(1);
            }
        }

        let status = os::wait(pid)?;
        if !status.stopped() {
            return err!(ProcessState, "child did not stop at exec: {}", status.human_string());
        }
        let mut threads = BTreeMap::new();
        threads.insert(pid, ThreadCtx {tid: pid, regs: Registers::default(), status});
        Self::with_threads(pid, threads, true)
    }

    fn with_threads(pid: pid_t, threads: BTreeMap<pid_t, ThreadCtx>, spawned: bool) -> Result<DebuggedProcess> {
        let (elf, symtab, frames, debug_info) = load_information(pid)?;
        Ok(DebuggedProcess {pid, elf, symtab, frames, debug_info, threads, current: pid, breakpoints: HashMap::new(), spawned})
    }

    // Detaches from every attached thread; optionally kills the process after.
    pub fn detach(&mut self, kill: bool) {
        let tids: Vec<pid_t> = self.threads.keys().copied().collect();
        for tid in tids {
            if let Err(e) = unsafe {ptrace(PTRACE_DETACH, tid, 0, 0)} {
                if !e.is_tracee_gone() {
                    eprintln!("warning: failed to detach from {}: {}", tid, e);
                }
            }
        }
        self.threads.clear();
        if kill {
            unsafe {libc::kill(self.pid, libc::SIGKILL)};
        }
    }

    pub fn status(&self) -> WaitStatus {
        self.threads.get(&self.current).map_or(WaitStatus(0), |t| t.status)
    }

    pub fn breakpoints(&self) -> &HashMap<u64, Breakpoint> {
        &self.breakpoints
    }

    // Fresh register values for the current thread (also refreshes the cache).
    pub fn registers(&mut self) -> Result<Registers> {
        let regs = registers::getregs(self.current)?;
        self.threads.get_mut(&self.current).unwrap().regs = regs;
        Ok(regs)
    }

    pub fn set_registers(&mut self, regs: &Registers) -> Result<()> {
        registers::setregs(self.current, regs)?;
        self.threads.get_mut(&self.current).unwrap().regs = *regs;
        Ok(())
    }

    pub fn current_pc(&mut self) -> Result<u64> {
        Ok(self.registers()?.pc())
    }

    // Installs a trap at `addr`. Fails with InvalidAddress if no function
    // covers `addr`, with BreakpointExists if a trap is already there.
    pub fn set_breakpoint(&mut self, addr: u64) -> Result<Breakpoint> {
        let function_name = match self.symtab.func_for_pc(addr) {
            None => return err!(InvalidAddress, "invalid address 0x{:x}", addr),
            Some(f) => f.name.clone(),
        };
        let (file, line) = match self.symtab.pc_to_line(addr) {
            Some((f, l)) => (f.to_string(), l),
            None => (String::new(), 0),
        };

        let mut original = [0u8; 1];
        os::peek_data(self.current, addr, &mut original)?;
        if original[0] == TRAP_BYTE {
            return err!(BreakpointExists, "breakpoint exists at {}:{} at 0x{:x}", file, line, addr);
        }
        os::poke_data(self.current, addr, &[TRAP_BYTE])?;

        let bp = Breakpoint {function_name, file, line, addr, original_data: original[0]};
        self.breakpoints.insert(addr, bp.clone());
        Ok(bp)
    }

    // Restores the displaced byte and returns the removed record.
    pub fn clear_breakpoint(&mut self, pc: u64) -> Result<Breakpoint> {
        let bp = match self.breakpoints.get(&pc) {
            None => return err!(NoSuchBreakpoint, "no breakpoint currently set at 0x{:x}", pc),
            Some(bp) => bp.clone(),
        };
        os::poke_data(self.current, bp.addr, &[bp.original_data])?;
        self.breakpoints.remove(&pc);
        Ok(bp)
    }

    // Single instruction step. If the thread is parked just after a trap we
    // installed, rewind onto the displaced instruction first, and re-install
    // the trap after the step so it keeps firing on later arrivals.
    pub fn step(&mut self) -> Result<()> {
        let mut regs = self.registers()?;
        let mut restore: Option<u64> = None;
        if let Some(bp) = self.breakpoints.get(&regs.pc().wrapping_sub(1)) {
            let addr = bp.addr;
            self.clear_breakpoint(addr)?;
            regs.set_pc(addr);
            self.set_registers(&regs)?;
            restore = Some(addr);
        }

        let step_result = self.single_step();

        // The breakpoint must survive even a failed step. (If the tracee
        // exited there is no text left to poke.)
        if let Some(addr) = restore {
            if !self.status().exited() {
                let restore_result = self.set_breakpoint(addr).map(|_| ());
                if step_result.is_ok() {
                    restore_result?;
                }
            }
        }
        step_result
    }

    fn single_step(&mut self) -> Result<()> {
        unsafe {ptrace(PTRACE_SINGLESTEP, self.current, 0, 0)?};
        self.wait_current()
    }

    // Resumes until the next trap or exit. Stepping first clears-and-restores
    // a trap the thread may be parked on; a bare resume would immediately
    // re-hit it. Other signals (the runtime preempts its own threads with
    // SIGURG) are passed through and the wait repeated.
    pub fn cont(&mut self) -> Result<()> {
        self.step()?;
        if self.status().exited() {
            return Ok(());
        }
        let mut signal = 0i32;
        loop {
            unsafe {ptrace(PTRACE_CONT, self.current, 0, signal as u64)?};
            self.wait_current()?;
            let status = self.status();
            if !status.stopped() || status.stop_signal() == libc::SIGTRAP {
                return Ok(());
            }
            signal = status.stop_signal();
        }
    }

    // Steps to the next source line in the same function activation,
    // transparently running callees to completion.
    pub fn next(&mut self) -> Result<()> {
        let mut pc = self.current_pc()?;
        if self.breakpoints.contains_key(&pc.wrapping_sub(1)) {
            // Parked after a trap; the displaced instruction is what counts.
            pc -= 1;
        }
        let line = self.line_for_pc(pc)?;
        let fde = self.frames.fde_for_pc(pc)?;
        let ret_offset = self.frames.return_address_offset(&fde, pc)?;
        let ret = self.return_address_from_offset(ret_offset)?;

        loop {
            self.step()?;
            if self.status().exited() {
                return Ok(());
            }
            let mut pc = self.current_pc()?;
            if !fde.cover(pc) && pc != ret {
                // The step entered a callee; run it to its return address.
                self.continue_to_return_address(pc, &fde)?;
                if self.status().exited() {
                    return Ok(());
                }
                pc = self.current_pc()?;
            }
            if self.line_for_pc(pc)? != line {
                return Ok(());
            }
        }
    }

    fn continue_to_return_address(&mut self, mut pc: u64, fde: &Fde) -> Result<()> {
        while !fde.cover(pc) {
            // Execution is at the callee's first instruction; its prologue
            // hasn't adjusted the stack yet, so the return address is at
            // offset 0 from RSP.
            let addr = self.return_address_from_offset(0)?;
            let ours = match self.set_breakpoint(addr) {
                Ok(_) => true,
                // A user breakpoint already lives there. Use it, and leave it installed.
                Err(e) if e.is_breakpoint_exists() => false,
                Err(e) => return Err(e),
            };
            self.cont()?;
            if self.status().exited() {
                return Ok(());
            }
            if ours {
                self.clear_temp_breakpoint(addr)?;
            }
            pc = self.current_pc()?;
        }
        Ok(())
    }

    fn clear_temp_breakpoint(&mut self, pc: u64) -> Result<()> {
        if self.breakpoints.contains_key(&pc) {
            let mut regs = self.registers()?;
            let bp = self.clear_breakpoint(pc)?;
            if regs.pc() == bp.addr + 1 {
                // Parked after the trap; rewind onto the restored instruction.
                regs.set_pc(bp.addr);
                self.set_registers(&regs)?;
            }
        }
        Ok(())
    }

    // Reads the address the current activation will return to: the 64-bit
    // little-endian word at RSP + `offset`.
    pub fn return_address_from_offset(&mut self, offset: i64) -> Result<u64> {
        let regs = self.registers()?;
        let addr = (regs.sp() as i64).wrapping_add(offset) as u64;
        let mut buf = [0u8; 8];
        os::peek_text(self.current, addr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    // Resolves `name` against the debug info and materialises its value from
    // the stopped tracee's current frame.
    pub fn eval_symbol(&mut self, name: &str) -> Result<Variable> {
        let regs = self.registers()?;
        let mem = MemReader::Pid(self.current);
        eval::eval_symbol(&self.debug_info, &self.frames, &mem, &regs, name)
    }

    fn line_for_pc(&self, pc: u64) -> Result<u32> {
        match self.symtab.pc_to_line(pc) {
            Some((_, line)) => Ok(line),
            None => err!(SymbolNotFound, "no line information for 0x{:x}", pc),
        }
    }

    // Waits for the current thread to change state and reconciles its context.
    fn wait_current(&mut self) -> Result<()> {
        match os::wait(self.current) {
            Ok(status) => {
                let thread = self.threads.get_mut(&self.current).unwrap();
                thread.status = status;
                if status.stopped() {
                    thread.regs = registers::getregs(self.current)?;
                    if status.stop_signal() != libc::SIGTRAP {
                        eprintln!("info: traced program {} at 0x{:x}", status.human_string(), thread.regs.pc());
                    }
                }
                Ok(())
            }
            // ECHILD and friends: the tracee is gone. Terminal; the last
            // observed status stands.
            Err(e) if e.is_tracee_gone() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

// Opens /proc/<pid>/exe and builds the oracles. The frame table and the
// symbol/line oracle parse concurrently; they read disjoint sections of the
// immutable mapping and join before the process becomes controllable. Either
// failing makes the whole load fail: the debugger is useless without them.
fn load_information(pid: pid_t) -> Result<(Arc<ElfFile>, Arc<SymTable>, Arc<FrameTable>, Arc<DebugInfo>)> {
    let elf = Arc::new(ElfFile::open(&exe_path(pid))?);
    let (frames_result, syms_result) = thread::scope(|s| {
        let elf_frames = elf.clone();
        let frames = s.spawn(move || FrameTable::load(elf_frames));
        let elf_syms = elf.clone();
        let syms = s.spawn(move || -> Result<(DebugInfo, SymTable)> {
            let info = DebugInfo::load(elf_syms.clone())?;
            let symtab = SymTable::load(&info, &elf_syms)?;
            Ok((info, symtab))
        });
        (frames.join(), syms.join())
    });
    let frames = match frames_result {
        Ok(r) => r?,
        Err(_) => return err!(Sanity, "frame table loader panicked"),
    };
    let (debug_info, symtab) = match syms_result {
        Ok(r) => r?,
        Err(_) => return err!(Sanity, "symbol table loader panicked"),
    };
    Ok((elf, Arc::new(symtab), Arc::new(frames), Arc::new(debug_info)))
}
