#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Serializes tests that write and then execute scripts: a concurrent fork
/// can hold the script open for writing and make exec fail with ETXTBSY.
static SCRIPT_LOCK: Mutex<()> = Mutex::new(());

pub fn script_lock() -> MutexGuard<'static, ()> {
    SCRIPT_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Engine stand-in: records its arguments, copies a sandbox fixture, writes
/// statistics (solver time 40 with a map, 100 without) and two test cases.
pub const FAKE_ENGINE: &str = r#"#!/bin/sh
out=""
sandbox=""
vase=""
for arg in "$@"; do
  case "$arg" in
    --output-dir=*) out="${arg#--output-dir=}" ;;
    --run-in-dir=*) sandbox="${arg#--run-in-dir=}" ;;
    --use-vase) vase=1 ;;
  esac
done
printf '%s\n' "$@" > "$out/args.txt"
cat "$sandbox/dirA/a.txt" "$sandbox/dirA/subdir/b.txt" > "$out/sandbox.txt"
if [ -n "$vase" ]; then solver=40; else solver=100; fi
printf 'SolverTime: %s\nQueryTime: 0\nthis line has no separator\nNumStates: many\n' "$solver" > "$out/info"
touch "$out/test000001.ktest" "$out/test000002.ktest" "$out/test000001.cov"
echo "KLEE: done: generated tests = 2"
echo "KLEE: WARNING: fake engine" >&2
exit 0
"#;

/// Starts a grandchild that would outlive the timeout, then waits on it.
pub const HANGING_ENGINE: &str = r#"#!/bin/sh
out=""
for arg in "$@"; do
  case "$arg" in
    --output-dir=*) out="${arg#--output-dir=}" ;;
  esac
done
sleep 60 &
echo $! > "$out/child.pid"
echo "SolverTime: 1" > "$out/info"
touch "$out/test000001.ktest"
wait
"#;

/// Exits straight away but leaves a background child holding stdout open.
pub const DETACHING_ENGINE: &str = r#"#!/bin/sh
out=""
for arg in "$@"; do
  case "$arg" in
    --output-dir=*) out="${arg#--output-dir=}" ;;
  esac
done
sleep 20 &
echo $! > "$out/child.pid"
echo "SolverTime: 5" > "$out/info"
touch "$out/test000001.ktest"
echo "KLEE: done"
exit 0
"#;

pub const FAILING_ENGINE: &str = "#!/bin/sh\necho 'KLEE: ERROR: bad bitcode' >&2\nexit 3\n";

pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Whether `pid` names a live (non-zombie) process.
pub fn is_running(pid: i32) -> bool {
    match fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => match stat.rsplit_once(") ") {
            Some((_, rest)) => !matches!(rest.chars().next(), Some('Z') | Some('X')),
            None => false,
        },
        Err(_) => false,
    }
}
