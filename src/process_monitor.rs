//! Process-tree helpers: descendant enumeration via `sysinfo` and
//! platform-specific termination signals.

use std::collections::{HashMap, HashSet, VecDeque};
use sysinfo::System;

/// Every descendant of `root` (children, grandchildren, ...), excluding `root`.
pub fn descendants(root: u32) -> Vec<u32> {
    let mut sys = System::new();
    sys.refresh_processes();

    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (pid, process) in sys.processes() {
        if let Some(parent) = process.parent() {
            children.entry(parent.as_u32()).or_default().push(pid.as_u32());
        }
    }
    collect_descendants(root, &children)
}

fn collect_descendants(root: u32, children: &HashMap<u32, Vec<u32>>) -> Vec<u32> {
    let mut seen = HashSet::from([root]);
    let mut queue = VecDeque::from([root]);
    let mut out = Vec::new();

    while let Some(pid) = queue.pop_front() {
        for &child in children.get(&pid).into_iter().flatten() {
            // parent 링크가 순환하는 비정상 스냅샷 방지
            if seen.insert(child) {
                out.push(child);
                queue.push_back(child);
            }
        }
    }
    out
}

/// Signal `root` and all of its descendants. Descendants are enumerated and
/// signalled before the parent so none of them get re-parented first.
///
/// Returns how many processes were signalled successfully.
pub fn terminate_tree(root: u32, force: bool) -> usize {
    let mut targets = descendants(root);
    targets.push(root);

    let mut signalled = 0;
    for pid in targets {
        match signal_pid(pid, force) {
            Ok(()) => signalled += 1,
            Err(e) => tracing::debug!("Could not signal pid {}: {}", pid, e),
        }
    }
    tracing::info!(
        "Sent {} to process tree of pid {} ({} processes)",
        if force { "KILL" } else { "TERM" },
        root,
        signalled
    );
    signalled
}

#[cfg(not(target_os = "windows"))]
fn signal_pid(pid: u32, force: bool) -> anyhow::Result<()> {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
    signal::kill(Pid::from_raw(pid as i32), signal)
        .map_err(|e| anyhow::anyhow!("Failed to send {:?} to {}: {}", signal, pid, e))
}

#[cfg(target_os = "windows")]
fn signal_pid(pid: u32, _force: bool) -> anyhow::Result<()> {
    use winapi::um::handleapi::CloseHandle;
    use winapi::um::processthreadsapi::{OpenProcess, TerminateProcess};
    use winapi::um::winnt::PROCESS_TERMINATE;

    // Windows에는 SIGTERM에 해당하는 것이 없으므로 항상 TerminateProcess
    unsafe {
        let handle = OpenProcess(PROCESS_TERMINATE, 0, pid);
        if handle.is_null() {
            anyhow::bail!("Failed to open process {}", pid);
        }
        let result = TerminateProcess(handle, 1);
        CloseHandle(handle);
        if result == 0 {
            anyhow::bail!("TerminateProcess failed for {}", pid);
        }
    }
    Ok(())
}

/// `terminate_tree` on the blocking pool. The sysinfo scan walks the whole
/// OS process table synchronously.
pub async fn terminate_tree_async(root: u32, force: bool) -> usize {
    tokio::task::spawn_blocking(move || terminate_tree(root, force))
        .await
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_descendants_walks_all_levels() {
        let mut children = HashMap::new();
        children.insert(1, vec![2, 3]);
        children.insert(2, vec![4]);
        children.insert(4, vec![5]);
        children.insert(9, vec![10]);

        let mut found = collect_descendants(1, &children);
        found.sort_unstable();
        assert_eq!(found, vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_collect_descendants_survives_cycles() {
        let mut children = HashMap::new();
        children.insert(1, vec![2]);
        children.insert(2, vec![1, 3]);

        let mut found = collect_descendants(1, &children);
        found.sort_unstable();
        assert_eq!(found, vec![2, 3]);
    }

    #[test]
    fn test_leaf_has_no_descendants() {
        let children = HashMap::new();
        assert!(collect_descendants(42, &children).is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_tree_reaches_grandchildren() {
        let mut child = tokio::process::Command::new("sh")
            .args(["-c", "sleep 30 & wait"])
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;

        let found = tokio::task::spawn_blocking(move || descendants(pid)).await.unwrap();
        assert!(!found.is_empty(), "sh should have a sleeping child");

        let signalled = terminate_tree_async(pid, false).await;
        assert!(signalled >= 2);

        let exited = tokio::time::timeout(std::time::Duration::from_secs(5), child.wait()).await;
        assert!(exited.is_ok(), "parent should exit after SIGTERM");
    }
}
