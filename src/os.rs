use crate::{*, error::*};
use libc::pid_t;

// Thin layer over the kernel tracing facility. Everything here requires the
// target thread to be ptrace-stopped; the kernel answers ESRCH otherwise.

pub const PTRACE_TRACEME: i32 = 0;
pub const PTRACE_PEEKTEXT: i32 = 1;
pub const PTRACE_PEEKDATA: i32 = 2;
pub const PTRACE_POKETEXT: i32 = 4;
pub const PTRACE_POKEDATA: i32 = 5;
pub const PTRACE_CONT: i32 = 7;
pub const PTRACE_KILL: i32 = 8;
pub const PTRACE_SINGLESTEP: i32 = 9;
pub const PTRACE_GETREGS: i32 = 12;
pub const PTRACE_SETREGS: i32 = 13;
pub const PTRACE_ATTACH: i32 = 16;
pub const PTRACE_DETACH: i32 = 17;

pub fn ptrace_request_name(c: i32) -> &'static str {
    match c {
        PTRACE_TRACEME => "PTRACE_TRACEME", PTRACE_PEEKTEXT => "PTRACE_PEEKTEXT", PTRACE_PEEKDATA => "PTRACE_PEEKDATA", PTRACE_POKETEXT => "PTRACE_POKETEXT", PTRACE_POKEDATA => "PTRACE_POKEDATA", PTRACE_CONT => "PTRACE_CONT", PTRACE_KILL => "PTRACE_KILL", PTRACE_SINGLESTEP => "PTRACE_SINGLESTEP", PTRACE_GETREGS => "PTRACE_GETREGS", PTRACE_SETREGS => "PTRACE_SETREGS", PTRACE_ATTACH => "PTRACE_ATTACH", PTRACE_DETACH => "PTRACE_DETACH",
        _ => "[unknown request]",
    }
}

const SIGNAL_NAMES: [&str; 32] = ["[unknown signal number]", "SIGHUP", "SIGINT", "SIGQUIT", "SIGILL", "SIGTRAP", "SIGABRT", "SIGBUS", "SIGFPE", "SIGKILL", "SIGUSR1", "SIGSEGV", "SIGUSR2", "SIGPIPE", "SIGALRM", "SIGTERM", "SIGSTKFLT", "SIGCHLD", "SIGCONT", "SIGSTOP", "SIGTSTP", "SIGTTIN", "SIGTTOU", "SIGURG", "SIGXCPU", "SIGXFSZ", "SIGVTALRM", "SIGPROF", "SIGWINCH", "SIGIO", "SIGPWR", "SIGSYS"];

pub fn signal_name(sig: i32) -> &'static str {
    // strsignal() is not thread safe, and sigabbrev_np() is not in rust libc bindings.
    let sig = sig as usize;
    SIGNAL_NAMES[if sig >= SIGNAL_NAMES.len() {0} else {sig}]
}

pub unsafe fn ptrace(request: i32, pid: pid_t, addr: u64, data: u64) -> Result<i64> {
    // PEEK requests return the word in the result, so -1 is ambiguous; errno disambiguates.
    (*libc::__errno_location()) = 0;
    // (`as _` because the request parameter is c_uint on some libc flavors.)
    let r = libc::ptrace(request as _, pid, addr, data);
    if r == -1 && (*libc::__errno_location()) != 0 {
        return errno_err!("ptrace({}, {}) failed", ptrace_request_name(request), pid);
    }
    Ok(r)
}

// PTRACE_PEEK*/POKE* move one aligned word per call. These loops hide that,
// with read-modify-write at the edges so a poke never clobbers neighbors.

fn peek_words(request: i32, pid: pid_t, addr: u64, buf: &mut [u8]) -> Result<()> {
    let mut off = 0usize;
    while off < buf.len() {
        let pos = addr + off as u64;
        let word_addr = pos & !7;
        let shift = (pos - word_addr) as usize;
        let word = unsafe {ptrace(request, pid, word_addr, 0)?} as u64;
        let bytes = word.to_le_bytes();
        let n = (8 - shift).min(buf.len() - off);
        buf[off..off+n].copy_from_slice(&bytes[shift..shift+n]);
        off += n;
    }
    Ok(())
}

pub fn peek_data(pid: pid_t, addr: u64, buf: &mut [u8]) -> Result<()> {
    peek_words(PTRACE_PEEKDATA, pid, addr, buf)
}

// Same syscall as peek_data on x86-64; the split mirrors the kernel's request names.
pub fn peek_text(pid: pid_t, addr: u64, buf: &mut [u8]) -> Result<()> {
    peek_words(PTRACE_PEEKTEXT, pid, addr, buf)
}

// Splices `bytes` into `word` starting at byte `shift`. Returns the patched
// word and how many bytes were consumed.
pub fn splice_word(word: u64, shift: usize, bytes: &[u8]) -> (u64, usize) {
    let n = (8 - shift).min(bytes.len());
    let mut le = word.to_le_bytes();
    le[shift..shift+n].copy_from_slice(&bytes[..n]);
    (u64::from_le_bytes(le), n)
}

pub fn poke_data(pid: pid_t, addr: u64, data: &[u8]) -> Result<()> {
    let mut off = 0usize;
    while off < data.len() {
        let pos = addr + off as u64;
        let word_addr = pos & !7;
        let shift = (pos - word_addr) as usize;
        // Partial word: read it first so the surrounding bytes survive.
        let word = if shift != 0 || data.len() - off < 8 {
            (unsafe {ptrace(PTRACE_PEEKDATA, pid, word_addr, 0)?}) as u64
        } else {
            0
        };
        let (word, n) = splice_word(word, shift, &data[off..]);
        unsafe {ptrace(PTRACE_POKEDATA, pid, word_addr, word)?};
        off += n;
    }
    Ok(())
}

#[derive(Clone, Copy, Default, Debug, Eq, PartialEq)]
pub struct WaitStatus(pub i32);

impl WaitStatus {
    pub fn stopped(self) -> bool { libc::WIFSTOPPED(self.0) }
    pub fn stop_signal(self) -> i32 { libc::WSTOPSIG(self.0) }
    pub fn exited(self) -> bool { libc::WIFEXITED(self.0) }
    pub fn exit_status(self) -> i32 { libc::WEXITSTATUS(self.0) }
    pub fn signaled(self) -> bool { libc::WIFSIGNALED(self.0) }
    pub fn term_signal(self) -> i32 { libc::WTERMSIG(self.0) }

    pub fn human_string(self) -> String {
        if self.exited() {
            format!("exited with status {}", self.exit_status())
        } else if self.signaled() {
            format!("terminated by {}", signal_name(self.term_signal()))
        } else if self.stopped() {
            format!("stopped by {}", signal_name(self.stop_signal()))
        } else {
            format!("[unexpected wait status 0x{:x}]", self.0)
        }
    }
}

// Blocks until `tid` changes state. __WALL so non-leader threads are waitable too.
pub fn wait(tid: pid_t) -> Result<WaitStatus> {
    let mut status = 0i32;
    let r = unsafe {libc::waitpid(tid, &mut status, libc::__WALL)};
    if r < 0 { return errno_err!("waitpid({}) failed", tid); }
    Ok(WaitStatus(status))
}

#[cfg(test)]
mod tests {
    use crate::os::*;
    use rand::random;

    #[test]
    fn wait_status_decoding() {
        // Exited with status 3: status = 3 << 8.
        let s = WaitStatus(3 << 8);
        assert!(s.exited() && !s.stopped() && !s.signaled());
        assert_eq!(s.exit_status(), 3);
        // Stopped by SIGTRAP: 0x7f | sig << 8.
        let s = WaitStatus(0x7f | (libc::SIGTRAP << 8));
        assert!(s.stopped() && !s.exited());
        assert_eq!(s.stop_signal(), libc::SIGTRAP);
        assert_eq!(signal_name(s.stop_signal()), "SIGTRAP");
        // Killed by SIGKILL: status = sig.
        let s = WaitStatus(libc::SIGKILL);
        assert!(s.signaled() && !s.exited() && !s.stopped());
        assert_eq!(s.term_signal(), libc::SIGKILL);
    }

    #[test]
    fn splice_word_nonsense() {
        for _ in 0..3000 {
            let word: u64 = random();
            let shift = random::<usize>() % 8;
            let len = random::<usize>() % 12;
            let bytes: Vec<u8> = (0..len).map(|_| random()).collect();

            let (patched, n) = splice_word(word, shift, &bytes);
            assert_eq!(n, (8 - shift).min(len));
            let orig = word.to_le_bytes();
            let got = patched.to_le_bytes();
            for i in 0..8 {
                if i >= shift && i < shift + n {
                    assert_eq!(got[i], bytes[i - shift]);
                } else {
                    assert_eq!(got[i], orig[i]);
                }
            }
        }
    }
}
