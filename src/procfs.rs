use crate::{*, error::*};
use libc::pid_t;
use std::{fs, str::FromStr};

pub fn list_threads(pid: pid_t) -> Result<Vec<pid_t>> {
    let mut r: Vec<pid_t> = Vec::new();
    for entry in fs::read_dir(format!("/proc/{}/task/", pid))? {
        let entry = entry?;
        let name = entry.file_name().into_string().unwrap_or_default();
        match pid_t::from_str(&name) {
            Ok(tid) => r.push(tid),
            Err(_) => return err!(Sanity, "unexpected entry in /proc/{}/task/: {}", pid, name),
        }
    }
    r.sort_unstable();
    Ok(r)
}

pub fn exe_path(pid: pid_t) -> String {
    format!("/proc/{}/exe", pid)
}
