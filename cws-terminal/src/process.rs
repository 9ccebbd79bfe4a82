//! Process tree helpers used when tearing down a terminal.

use std::collections::{HashMap, HashSet, VecDeque};
use sysinfo::System;
use tracing::debug;

/// Every live process below `root`, deepest first.
pub fn descendants(root: u32) -> Vec<u32> {
    let mut system = System::new();
    system.refresh_processes();

    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (pid, process) in system.processes() {
        if let Some(parent) = process.parent() {
            children
                .entry(parent.as_u32())
                .or_default()
                .push(pid.as_u32());
        }
    }

    let mut seen = HashSet::from([root]);
    let mut order = Vec::new();
    let mut queue = VecDeque::from([root]);
    while let Some(pid) = queue.pop_front() {
        for &child in children.get(&pid).into_iter().flatten() {
            if seen.insert(child) {
                order.push(child);
                queue.push_back(child);
            }
        }
    }
    order.reverse();
    order
}

/// SIGTERM every descendant of `root`, then `root` itself.
#[cfg(unix)]
pub fn terminate_tree(root: u32) {
    use nix::sys::signal::Signal;

    let targets = descendants(root);
    debug!(root, descendants = targets.len(), "terminating process tree");
    for pid in targets.into_iter().chain(std::iter::once(root)) {
        signal(pid, Signal::SIGTERM);
    }
}

#[cfg(not(unix))]
pub fn terminate_tree(root: u32) {
    debug!(root, "process tree termination is unix-only");
}

#[cfg(unix)]
fn signal(pid: u32, sig: nix::sys::signal::Signal) {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match kill(Pid::from_raw(raw), sig) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => debug!(pid, error = %e, "failed to signal process"),
    }
}

/// Whether a process with this pid exists (zombies included).
#[cfg(unix)]
pub fn is_running(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    i32::try_from(pid).is_ok_and(|raw| kill(Pid::from_raw(raw), None).is_ok())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Command;
    use std::time::{Duration, Instant};
    use sysinfo::{Pid, ProcessStatus};

    // Reparented children may linger as zombies when nothing reaps them.
    fn alive(pid: u32) -> bool {
        let mut system = System::new();
        system.refresh_processes();
        system
            .process(Pid::from_u32(pid))
            .is_some_and(|p| p.status() != ProcessStatus::Zombie)
    }

    fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if check() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        check()
    }

    #[test]
    fn finds_and_terminates_grandchildren() {
        let mut parent = Command::new("/bin/sh")
            .arg("-c")
            .arg("sleep 30 & sleep 30 & wait")
            .spawn()
            .unwrap();
        let root = parent.id();

        assert!(wait_until(Duration::from_secs(5), || descendants(root).len() >= 2));
        let children = descendants(root);

        terminate_tree(root);
        parent.wait().unwrap();

        for pid in children {
            assert!(
                wait_until(Duration::from_secs(5), || !alive(pid)),
                "descendant {pid} survived"
            );
        }
    }

    #[test]
    fn unknown_pid_has_no_descendants() {
        assert!(descendants(u32::MAX - 1).is_empty());
        assert!(!is_running(u32::MAX - 1));
    }
}
