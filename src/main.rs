use godbg::{*, debugger::*, error::*};
use libc::pid_t;
use std::{io, io::{BufRead, Write}, process::exit, str::FromStr};

fn print_usage() {
    eprintln!("usage: godbg [-p PID | PROGRAM [ARGS...]]");
    eprintln!();
    eprintln!("commands:");
    eprintln!("  break LOCATION    set breakpoint (file:line, function name, or 0xADDR)");
    eprintln!("  clear ADDR        clear breakpoint");
    eprintln!("  step              single instruction step");
    eprintln!("  next              step to next source line in this function");
    eprintln!("  continue          resume until the next breakpoint or exit");
    eprintln!("  print NAME        evaluate a named variable");
    eprintln!("  regs              dump registers");
    eprintln!("  breakpoints       list breakpoints");
    eprintln!("  status            show last wait status");
    eprintln!("  exit              detach (and optionally kill) the tracee");
}

fn main() {
    let all_args: Vec<String> = std::env::args().collect();
    let mut args = &all_args[1..];
    let mut attach_pid: Option<pid_t> = None;

    while !args.is_empty() && args[0].starts_with('-') {
        match &args[0][..] {
            "-p" | "--pid" => {
                if args.len() < 2 {
                    eprintln!("{} requires an argument", args[0]);
                    exit(1);
                }
                attach_pid = match pid_t::from_str(&args[1]) {
                    Ok(x) => Some(x),
                    Err(_) => {
                        eprintln!("invalid pid: {}", args[1]);
                        exit(1);
                    }
                };
                args = &args[2..];
            }
            "-h" | "--help" => {
                print_usage();
                exit(0);
            }
            a => {
                eprintln!("unrecognized argument: {}", a);
                exit(1);
            }
        }
    }

    let dbgproc = match attach_pid {
        Some(pid) => {
            if !args.is_empty() {
                eprintln!("can't combine --pid with a command line");
                exit(1);
            }
            DebuggedProcess::attach(pid)
        }
        None => {
            if args.is_empty() {
                print_usage();
                exit(0);
            }
            DebuggedProcess::launch(&args[0], &args[1..])
        }
    };
    let mut dbgproc = match dbgproc {
        Ok(p) => p,
        Err(e) => {
            eprintln!("error: {}", e);
            exit(1);
        }
    };

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("(godbg) ");
        let _ = io::stdout().flush();
        let line = match lines.next() {
            None => {
                handle_exit(&mut dbgproc, /*prompt_kill*/ false);
                return;
            }
            Some(Err(e)) => {
                eprintln!("error: failed to read stdin: {}", e);
                exit(2);
            }
            Some(Ok(l)) => l,
        };
        let mut parts = line.split_whitespace();
        let cmd = match parts.next() {
            None => continue,
            Some(c) => c,
        };
        let arg = parts.next();

        if matches!(cmd, "exit" | "quit" | "q") {
            handle_exit(&mut dbgproc, true);
            return;
        }
        if let Err(e) = run_command(&mut dbgproc, cmd, arg) {
            eprintln!("command failed: {}", e);
        }
    }
}

fn run_command(p: &mut DebuggedProcess, cmd: &str, arg: Option<&str>) -> Result<()> {
    match cmd {
        "break" | "b" => {
            let loc = required(arg, "break LOCATION")?;
            let addr = resolve_location(p, loc)?;
            let bp = p.set_breakpoint(addr)?;
            println!("breakpoint set at {}:{} (0x{:x}, {})", bp.file, bp.line, bp.addr, bp.function_name);
        }
        "clear" => {
            let loc = required(arg, "clear ADDR")?;
            let addr = resolve_location(p, loc)?;
            let bp = p.clear_breakpoint(addr)?;
            println!("breakpoint cleared at 0x{:x}", bp.addr);
        }
        "step" | "s" => {
            p.step()?;
            report_stop(p)?;
        }
        "next" | "n" => {
            p.next()?;
            report_stop(p)?;
        }
        "continue" | "c" => {
            p.cont()?;
            report_stop(p)?;
        }
        "print" | "p" => {
            let name = required(arg, "print NAME")?;
            let var = p.eval_symbol(name)?;
            println!("{} = {} ({})", var.name, var.value, var.typ);
        }
        "regs" => {
            let regs = p.registers()?;
            for (name, value) in regs.fields() {
                println!("{:>8} 0x{:016x}", name, value);
            }
        }
        "breakpoints" | "bp" => {
            let mut bps: Vec<&Breakpoint> = p.breakpoints().values().collect();
            bps.sort_by_key(|b| b.addr);
            for b in bps {
                println!("0x{:x} {}:{} ({})", b.addr, b.file, b.line, b.function_name);
            }
        }
        "status" => println!("{}", p.status().human_string()),
        "help" => print_usage(),
        _ => eprintln!("unknown command: {} (try 'help')", cmd),
    }
    Ok(())
}

fn required<'a>(arg: Option<&'a str>, usage: &str) -> Result<&'a str> {
    match arg {
        Some(a) => Ok(a),
        None => err!(Usage, "usage: {}", usage),
    }
}

// A location is "file.go:123", a function name, or a raw 0x address.
fn resolve_location(p: &DebuggedProcess, loc: &str) -> Result<u64> {
    if let Some(hex) = loc.strip_prefix("0x") {
        return match u64::from_str_radix(hex, 16) {
            Ok(a) => Ok(a),
            Err(_) => err!(Usage, "invalid address: {}", loc),
        };
    }
    if let Some((file, line)) = loc.rsplit_once(':') {
        if let Ok(line) = line.parse::<u32>() {
            return p.symtab.line_to_pc(file, line);
        }
    }
    match p.symtab.lookup_func(loc) {
        Some(f) => Ok(f.addr),
        None => err!(SymbolNotFound, "could not find function {}", loc),
    }
}

fn report_stop(p: &mut DebuggedProcess) -> Result<()> {
    let status = p.status();
    if status.exited() || status.signaled() {
        println!("process {}", status.human_string());
        return Ok(());
    }
    let pc = p.current_pc()?;
    match p.symtab.pc_to_line(pc) {
        Some((file, line)) => println!("stopped at {}:{} (0x{:x})", file, line, pc),
        None => println!("stopped at 0x{:x}", pc),
    }
    Ok(())
}

fn handle_exit(p: &mut DebuggedProcess, prompt_kill: bool) {
    let mut kill = false;
    if prompt_kill && !p.status().exited() {
        println!("Would you like to kill the process? [y/n]");
        let mut answer = String::new();
        let _ = io::stdin().read_line(&mut answer);
        kill = answer.trim() == "y";
    }
    if !p.status().exited() {
        println!("Detaching from process...");
        p.detach(kill);
    }
}
