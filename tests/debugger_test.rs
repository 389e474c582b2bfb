// Integration scenarios against real traced processes. Fixtures are Go
// programs under testprogs/, built on demand with optimizations and inlining
// disabled; every test is skipped (with a notice) when no Go toolchain is on
// PATH. Each test runs entirely on its own thread, which keeps the
// ptrace-commands-from-the-attaching-thread rule satisfied.

use godbg::{debugger::*, os};
use std::{path::PathBuf, process::Command, sync::atomic::{AtomicUsize, Ordering}};

static FIXTURE_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn go_available() -> bool {
    Command::new("go").arg("version").output().map(|o| o.status.success()).unwrap_or(false)
}

fn fixture_source(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("testprogs").join(format!("{}.go", name))
}

fn build_fixture(name: &str) -> Option<PathBuf> {
    if !go_available() {
        eprintln!("skipping: no go toolchain on PATH");
        return None;
    }
    let out = std::env::temp_dir().join(format!(
        "godbg_fixture_{}_{}_{}",
        name,
        std::process::id(),
        FIXTURE_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    let status = Command::new("go")
        .arg("build")
        .arg("-gcflags=all=-N -l")
        .arg("-o")
        .arg(&out)
        .arg(fixture_source(name))
        .status()
        .expect("failed to run go build");
    assert!(status.success(), "go build failed for fixture {}", name);
    Some(out)
}

// Kills the tracee even if the test body panics.
struct KillOnDrop(libc::pid_t);
impl Drop for KillOnDrop {
    fn drop(&mut self) {
        unsafe {
            libc::kill(self.0, libc::SIGKILL);
        }
    }
}

fn with_test_process(name: &str, f: impl FnOnce(&mut DebuggedProcess)) {
    let bin = match build_fixture(name) {
        None => return,
        Some(b) => b,
    };
    // Async preemption signals would make single-steps noisier than the
    // fixtures need; the tracee inherits this.
    std::env::set_var("GODEBUG", "asyncpreemptoff=1");
    let mut p = DebuggedProcess::launch(bin.to_str().unwrap(), &[]).expect("launch failed");
    let _guard = KillOnDrop(p.pid);
    f(&mut p);
    if !p.status().exited() {
        p.detach(true);
    }
    let _ = std::fs::remove_file(&bin);
}

fn current_line(p: &mut DebuggedProcess) -> (String, u32) {
    let pc = p.current_pc().expect("current_pc failed");
    let symtab = p.symtab.clone();
    let (file, line) = symtab.pc_to_line(pc).expect("no line information at current pc");
    (file.to_string(), line)
}

fn byte_at(p: &DebuggedProcess, addr: u64) -> u8 {
    let mut buf = [0u8; 1];
    os::peek_data(p.pid, addr, &mut buf).expect("peek failed");
    buf[0]
}

#[test]
fn attach_process() {
    with_test_process("testprog", |p| {
        assert!(p.status().stopped(), "process was not stopped after launch");
    });
}

#[test]
fn step_advances_pc() {
    with_test_process("testprog", |p| {
        assert!(!p.status().exited(), "process already exited");
        let rip = p.current_pc().expect("current_pc failed");
        p.step().expect("step failed");
        let new_rip = p.current_pc().expect("current_pc failed");
        assert!(new_rip > rip, "expected pc 0x{:x} > 0x{:x}", new_rip, rip);
    });
}

#[test]
fn continue_to_exit() {
    with_test_process("continuetestprog", |p| {
        assert!(!p.status().exited(), "process already exited");
        p.cont().expect("continue failed");
        assert!(p.status().exited(), "process did not exit");
        assert_eq!(p.status().exit_status(), 0, "process did not exit successfully");
    });
}

#[test]
fn breakpoint_hit() {
    with_test_process("testprog", |p| {
        let entry = p.symtab.lookup_func("main.sleepytime").expect("no main.sleepytime").addr;
        let bp = p.set_breakpoint(entry).expect("set_breakpoint failed");

        let breakpc = bp.addr + 1;
        p.cont().expect("continue failed");
        let pc = p.current_pc().expect("current_pc failed");
        assert_eq!(pc, breakpc, "breakpoint not respected");

        p.step().expect("step failed");
        let pc = p.current_pc().expect("current_pc failed");
        assert_ne!(pc, breakpc, "step not respected");
    });
}

#[test]
fn breakpoint_at_invalid_address() {
    with_test_process("testprog", |p| {
        let err = p.set_breakpoint(0).expect_err("breakpoint at address 0 should fail");
        assert!(err.is_invalid_address(), "unexpected error: {}", err);
    });
}

#[test]
fn double_breakpoint_fails() {
    with_test_process("testprog", |p| {
        let entry = p.symtab.lookup_func("main.sleepytime").expect("no main.sleepytime").addr;
        p.set_breakpoint(entry).expect("set_breakpoint failed");
        let err = p.set_breakpoint(entry).expect_err("second breakpoint should fail");
        assert!(err.is_breakpoint_exists(), "unexpected error: {}", err);
    });
}

#[test]
fn clear_breakpoint_restores_byte() {
    with_test_process("testprog", |p| {
        let entry = p.symtab.lookup_func("main.sleepytime").expect("no main.sleepytime").addr;
        let bp = p.set_breakpoint(entry).expect("set_breakpoint failed");
        assert_eq!(byte_at(p, bp.addr), TRAP_BYTE);

        let bp = p.clear_breakpoint(entry).expect("clear_breakpoint failed");
        let restored = byte_at(p, bp.addr);
        assert_eq!(restored, bp.original_data, "breakpoint was not cleared");
        assert_ne!(restored, TRAP_BYTE);
        assert_eq!(p.breakpoints().len(), 0, "breakpoint not removed internally");
    });
}

#[test]
fn next_walks_source_lines() {
    let testcases: [(u32, u32); 18] = [
        (19, 20),
        (20, 23),
        (23, 24),
        (24, 26),
        (26, 31),
        (31, 23),
        (23, 24),
        (24, 26),
        (26, 31),
        (31, 23),
        (23, 24),
        (24, 26),
        (26, 27),
        (27, 34),
        (34, 35),
        (35, 41),
        (41, 40),
        (40, 41),
    ];

    with_test_process("testnextprog", |p| {
        let pc = p.symtab.line_to_pc("testnextprog.go", testcases[0].0).expect("line_to_pc failed");
        p.set_breakpoint(pc).expect("set_breakpoint failed");
        p.cont().expect("continue failed");

        for (begin, end) in testcases {
            let (file, line) = current_line(p);
            assert_eq!(line, begin, "not stopped at correct spot: expected {} was {}:{}", begin, file, line);

            p.next().expect("next failed");

            let (file, line) = current_line(p);
            assert_eq!(line, end, "did not continue to correct location: expected {} was {}:{}", end, file, line);
        }

        assert_eq!(p.breakpoints().len(), 1, "not all temporary breakpoints were cleaned up");
    });
}

#[test]
fn variable_evaluation() {
    let testcases = [
        ("a1", "foo", "struct string"),
        ("a2", "6", "int"),
        ("a3", "7.23", "float64"),
        ("a5", "len: 5 cap: 5 [1 2 3 4 5]", "struct []int"),
        ("a6", "main.FooBar {Baz: 8, Bur: word}", "main.FooBar"),
        ("a7", "*main.FooBar {Baz: 5, Bur: strum}", "*main.FooBar"),
        ("baz", "bazburzum", "struct string"),
    ];

    with_test_process("testvariables", |p| {
        let pc = p.symtab.line_to_pc("testvariables.go", 21).expect("line_to_pc failed");
        p.set_breakpoint(pc).expect("set_breakpoint failed");
        p.cont().expect("continue failed");

        for (name, value, typ) in testcases {
            let variable = p.eval_symbol(name).expect("eval_symbol failed");
            assert_eq!(variable.name, name);
            assert_eq!(variable.typ, typ, "wrong type for {}", name);
            assert_eq!(variable.value, value, "wrong value for {}", name);
        }
    });
}
