use std::sync::Arc;

use sysinfo::{Pid, ProcessesToUpdate, Signal, System};
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Process {0} is not running anymore")]
    NotFound(u32),
    #[error("Failed sending termination signal to process {0}")]
    SignalFailed(u32),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Snapshot of one OS process at lookup time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
    pub name: String,
    pub status: String,
}

pub trait ProcessTable: Send + Sync {
    fn snapshot(&self) -> Vec<ProcessHandle>;
    /// Asks the process to exit gracefully
    fn terminate(&self, pid: u32) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessTable;

impl ProcessTable for SystemProcessTable {
    fn snapshot(&self) -> Vec<ProcessHandle> {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);
        system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessHandle {
                pid: pid.as_u32(),
                name: process.name().to_string_lossy().to_string(),
                status: process.status().to_string(),
            })
            .collect()
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        let sys_pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
        let process = system.process(sys_pid).ok_or(Error::NotFound(pid))?;
        // None means SIGTERM doesn't exist on this platform (Windows)
        let sent = process
            .kill_with(Signal::Term)
            .unwrap_or_else(|| process.kill());
        if sent {
            Ok(())
        } else {
            Err(Error::SignalFailed(pid))
        }
    }
}

fn normalize(name: &str) -> String {
    let name = name.trim().to_lowercase();
    match name.strip_suffix(".exe") {
        Some(stem) => stem.to_owned(),
        None => name,
    }
}

/// Picks the caller out of `processes`: an exact pid match first, otherwise the lowest pid
/// whose name matches `process_name`. Several name matches are not an error, one is picked.
pub fn find_caller<'a>(
    processes: &'a [ProcessHandle],
    pid: Option<u32>,
    process_name: &str,
    own_pid: u32,
) -> Option<&'a ProcessHandle> {
    let candidates = processes.iter().filter(|p| p.pid != own_pid);
    if let Some(pid) = pid {
        if let Some(process) = candidates.clone().find(|p| p.pid == pid) {
            return Some(process);
        }
    }
    let wanted = normalize(process_name);
    if wanted.is_empty() {
        return None;
    }
    let matches: Vec<&ProcessHandle> = candidates
        .filter(|p| normalize(&p.name) == wanted)
        .collect();
    if matches.len() > 1 {
        log::warn!(
            "{} processes are called {}, closing only one of them",
            matches.len(),
            process_name
        );
    }
    matches.into_iter().min_by_key(|p| p.pid)
}

/// Best effort: every failure is logged and swallowed.
pub fn reap(table: &dyn ProcessTable, pid: Option<u32>, process_name: &str) {
    log::info!(
        "Check for running process {} (PID {:?})...",
        process_name,
        pid
    );
    let processes = table.snapshot();
    let Some(caller) = find_caller(&processes, pid, process_name, std::process::id()) else {
        log::info!("No running process to close, continuing");
        return;
    };
    log::info!(
        "Closing {} (PID {}, {})",
        caller.name,
        caller.pid,
        caller.status
    );
    if let Err(e) = table.terminate(caller.pid) {
        log::warn!("Ran into issue closing PID {}: {}", caller.pid, e);
    }
}

/// Runs [`reap`] on the blocking pool. Nothing waits for the returned handle during an
/// update, the download goes ahead regardless.
pub fn spawn_reaper(
    table: Arc<dyn ProcessTable>,
    pid: Option<u32>,
    process_name: String,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || reap(table.as_ref(), pid, &process_name))
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use test_log::test;

    struct FakeTable {
        processes: Vec<ProcessHandle>,
        terminated: Mutex<Vec<u32>>,
        fail: bool,
    }

    impl FakeTable {
        fn new(processes: &[(u32, &str)]) -> Self {
            Self {
                processes: processes
                    .iter()
                    .map(|(pid, name)| ProcessHandle {
                        pid: *pid,
                        name: name.to_string(),
                        status: "Run".to_owned(),
                    })
                    .collect(),
                terminated: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn terminated(&self) -> Vec<u32> {
            self.terminated.lock().unwrap().clone()
        }
    }

    impl ProcessTable for FakeTable {
        fn snapshot(&self) -> Vec<ProcessHandle> {
            self.processes.clone()
        }

        fn terminate(&self, pid: u32) -> Result<()> {
            self.terminated.lock().unwrap().push(pid);
            if self.fail {
                Err(Error::SignalFailed(pid))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn pid_match_wins_over_name() {
        let table = FakeTable::new(&[(10, "MyApp.exe"), (20, "other")]);
        let found = find_caller(&table.processes, Some(20), "MyApp", 1).unwrap();
        assert_eq!(found.pid, 20);
    }

    #[test]
    fn name_match_ignores_case_and_exe_suffix() {
        let table = FakeTable::new(&[(10, "shell"), (30, "MYAPP.EXE"), (20, "myapp")]);
        let found = find_caller(&table.processes, None, "myapp", 1).unwrap();
        assert_eq!(found.pid, 20);
        let found = find_caller(&table.processes, Some(999), "MyApp.exe", 1).unwrap();
        assert_eq!(found.pid, 20);
    }

    #[test]
    fn own_process_is_never_picked() {
        let table = FakeTable::new(&[(7, "updater")]);
        assert_eq!(find_caller(&table.processes, Some(7), "updater", 7), None);
    }

    #[test]
    fn empty_name_only_matches_pid() {
        let table = FakeTable::new(&[(7, "")]);
        assert_eq!(find_caller(&table.processes, None, "", 1), None);
    }

    #[test]
    fn reap_terminates_the_match() {
        let table = FakeTable::new(&[(10, "shell"), (20, "MyApp")]);
        reap(&table, Some(20), "MyApp");
        assert_eq!(table.terminated(), vec![20]);
    }

    #[test]
    fn reap_without_match_is_a_no_op() {
        let table = FakeTable::new(&[(10, "shell")]);
        reap(&table, Some(4_000_000), "MyApp");
        assert_eq!(table.terminated(), Vec::<u32>::new());
    }

    #[test]
    fn failed_signal_is_absorbed() {
        let mut table = FakeTable::new(&[(20, "MyApp")]);
        table.fail = true;
        reap(&table, None, "MyApp");
        assert_eq!(table.terminated(), vec![20]);
    }

    #[test(tokio::test)]
    async fn missing_pid_on_the_real_table_is_harmless() {
        let handle = spawn_reaper(
            Arc::new(SystemProcessTable),
            Some(u32::MAX - 1),
            String::new(),
        );
        handle.await.expect("reaper must not panic");
    }

    #[test]
    fn terminating_a_missing_process_reports_not_found() {
        let err = SystemProcessTable.terminate(u32::MAX - 1).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[cfg(unix)]
    #[test]
    fn real_process_is_terminated() {
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("sleep is available");
        reap(&SystemProcessTable, Some(child.id()), "");
        let status = child.wait().expect("child exits");
        assert!(!status.success(), "sleep should have been terminated");
    }
}
