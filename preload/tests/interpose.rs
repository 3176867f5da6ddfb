//! Runs copies of this binary with the library preloaded and checks what
//! they report. The children log from their main thread, which a test
//! harness would keep for itself.

use std::env;
use std::fs;
use std::hint::black_box;
use std::path::PathBuf;
use std::process::{Command, Output};
use std::ptr;

use libc::{c_void, size_t};

const MODE_VAR: &str = "MEMLOG_INTERPOSE_MODE";

extern "C" {
    fn aligned_alloc(alignment: size_t, size: size_t) -> *mut c_void;
    fn memalign(alignment: size_t, size: size_t) -> *mut c_void;
}

fn errno() -> i32 {
    unsafe { *libc::__errno_location() }
}

/// Three blocks from one line, the middle one released.
#[inline(never)]
fn work() {
    let mut blocks = [ptr::null_mut(); 3];
    for (i, size) in [10, 20, 30].into_iter().enumerate() {
        blocks[i] = unsafe { libc::malloc(size) };
    }
    assert!(blocks.iter().all(|b| !b.is_null()));
    unsafe { libc::free(blocks[1]) };
    black_box(blocks);
}

#[inline(never)]
fn c_semantics() {
    unsafe {
        *libc::__errno_location() = 0;
        assert!(libc::calloc(usize::MAX, 2).is_null());
        assert_eq!(errno(), libc::ENOMEM);

        let zeroed = libc::calloc(4, 8) as *mut u8;
        assert!(std::slice::from_raw_parts(zeroed, 32).iter().all(|&b| b == 0));
        libc::free(zeroed as *mut c_void);

        let mut p: *mut c_void = ptr::null_mut();
        assert_eq!(libc::posix_memalign(&mut p, 3, 8), libc::EINVAL);
        assert_eq!(libc::posix_memalign(&mut p, 4, 8), libc::EINVAL);
        assert_eq!(libc::posix_memalign(&mut p, 24, 8), libc::EINVAL);
        assert!(p.is_null());
        assert_eq!(libc::posix_memalign(&mut p, 64, 100), 0);
        assert_eq!(p as usize % 64, 0);
        libc::free(p);

        let q = aligned_alloc(128, 256);
        assert_eq!(q as usize % 128, 0);
        libc::free(q);
        let r = memalign(32, 8);
        assert_eq!(r as usize % 32, 0);
        libc::free(r);

        let s = libc::realloc(ptr::null_mut(), 16) as *mut u8;
        assert!(!s.is_null());
        s.write_bytes(0xab, 16);
        let s = libc::realloc(s as *mut c_void, 64) as *mut u8;
        assert!(std::slice::from_raw_parts(s, 16).iter().all(|&b| b == 0xab));
        assert!(libc::realloc(s as *mut c_void, 0).is_null());

        libc::free(ptr::null_mut());
    }
}

fn preload_library() -> PathBuf {
    // target/<profile>/deps/interpose-<hash>, next to or above the library.
    let exe = env::current_exe().unwrap();
    let deps = exe.parent().unwrap();
    [deps, deps.parent().unwrap()]
        .iter()
        .map(|dir| dir.join("libmemlog_preload.so"))
        .find(|lib| lib.exists())
        .expect("libmemlog_preload.so not built")
}

fn run_child(mode: &str, report: Option<&PathBuf>) -> Output {
    let mut cmd = Command::new(env::current_exe().unwrap());
    cmd.env(MODE_VAR, mode)
        .env("LD_PRELOAD", preload_library())
        .env("MEM_LOG_PATH", env!("CARGO_MANIFEST_DIR"));
    for var in ["MEM_LOG_FILE", "MEM_LOG_AT_EXIT", "MEM_LOG_SKIP", "MEM_LOG_DEPTH", "MEM_LOG_STRICT"] {
        cmd.env_remove(var);
    }
    if let Some(path) = report {
        cmd.env("MEM_LOG_FILE", path);
    }
    let output = cmd.output().unwrap();
    assert!(
        output.status.success(),
        "{} child failed: {}", mode, String::from_utf8_lossy(&output.stderr)
    );

    output
}

fn row(line: &str, label: &str) -> Vec<u64> {
    let values = line.strip_prefix(label).unwrap_or_else(|| panic!("expected {}, got {:?}", label, line));
    values.split_whitespace().map(|v| v.parse().unwrap()).collect()
}

fn exit_report_is_written_to_file() {
    let path = env::temp_dir().join(format!("memlog-interpose-{}.log", std::process::id()));
    run_child("report", Some(&path));
    let report = fs::read_to_string(&path).unwrap();
    let _ = fs::remove_file(&path);

    let lines: Vec<&str> = report.lines().collect();
    let at = lines.iter()
        .position(|l| l.starts_with("Caller: ") && l.ends_with(":interpose::work"))
        .unwrap_or_else(|| panic!("no entry for work() in:\n{}", report));
    let caller = lines[at].trim_start_matches("Caller: ");
    assert!(caller.starts_with(env!("CARGO_MANIFEST_DIR")), "{}", caller);
    assert!(caller.contains("interpose.rs("), "{}", caller);

    assert_eq!(row(lines[at + 1], "Blocks:"), [2, 1, 3]);
    assert_eq!(row(lines[at + 2], "Bytes:"), [40, 20, 60]);
}

fn closed_stdout_is_reported() {
    let output = run_child("closed", None);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("set MEM_LOG_FILE"), "{}", stderr);
}

fn main() {
    match env::var(MODE_VAR).as_deref() {
        Ok("report") => {
            work();
            c_semantics();
        },
        Ok("closed") => {
            work();
            unsafe { libc::close(libc::STDOUT_FILENO) };
        },
        _ => {
            exit_report_is_written_to_file();
            closed_stdout_is_reported();
            println!("interpose: ok");
        }
    }
}
