/// Syscall policy behavior inside a forked child
///
/// Installing a filter needs no privileges, so these run as any user. Each
/// case forks, installs the compiled policy in the child, issues raw syscalls
/// and reports through its exit status. Everything the child touches is built
/// before fork.
use judger::seccomp::CompiledPolicy;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult};
use serial_test::serial;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

/// Exit status of a child whose filter could not be installed
const INSTALL_FAILED: i32 = 99;

fn run_filtered<F: FnOnce()>(compiled: &CompiledPolicy, body: F) -> WaitStatus {
    match unsafe { fork() }.expect("Failed to fork") {
        ForkResult::Child => {
            if compiled.install().is_err() {
                unsafe { libc::_exit(INSTALL_FAILED) }
            }
            body();
            unsafe { libc::_exit(0) }
        }
        ForkResult::Parent { child } => waitpid(child, None).expect("Failed to wait for child"),
    }
}

fn openat(path: &CStr, flags: libc::c_int) -> libc::c_long {
    unsafe { libc::syscall(libc::SYS_openat, libc::AT_FDCWD, path.as_ptr(), flags, 0) }
}

fn exit_code(status: WaitStatus) -> Option<i32> {
    match status {
        WaitStatus::Exited(_, code) => Some(code),
        _ => None,
    }
}

fn killed_by_sigsys(status: WaitStatus) -> bool {
    matches!(status, WaitStatus::Signaled(_, Signal::SIGSYS, _))
}

/// Executable path the policy is pinned to, plus an argv pointing at it
struct Pinned {
    exe: CString,
    argv: [*const c_char; 2],
    envp: [*const c_char; 1],
}

impl Pinned {
    fn new(path: &str) -> Self {
        let exe = CString::new(path).unwrap();
        let argv = [exe.as_ptr(), ptr::null()];
        Self {
            exe,
            argv,
            envp: [ptr::null()],
        }
    }

    fn compile(&self, name: &str) -> CompiledPolicy {
        CompiledPolicy::compile(name, &self.exe).expect("Failed to compile policy")
    }

    /// execve through `path`, returning only when the kernel refuses
    fn execve(&self, path: &CStr) {
        unsafe {
            libc::execve(path.as_ptr(), self.argv.as_ptr(), self.envp.as_ptr());
        }
    }
}

#[test]
#[serial]
fn test_c_cpp_allows_read_only_open() {
    let pinned = Pinned::new("/nonexistent/judged-program");
    let compiled = pinned.compile("c_cpp");
    let dev_null = CString::new("/dev/null").unwrap();

    let status = run_filtered(&compiled, || {
        if openat(&dev_null, libc::O_RDONLY | libc::O_CLOEXEC) < 0 {
            unsafe { libc::_exit(1) }
        }
    });
    assert_eq!(exit_code(status), Some(0), "status was {:?}", status);
}

#[test]
#[serial]
fn test_c_cpp_kills_writable_open() {
    let pinned = Pinned::new("/nonexistent/judged-program");
    let compiled = pinned.compile("c_cpp");
    let dev_null = CString::new("/dev/null").unwrap();

    for flags in [libc::O_WRONLY, libc::O_RDWR | libc::O_CLOEXEC] {
        let status = run_filtered(&compiled, || {
            openat(&dev_null, flags);
        });
        assert!(killed_by_sigsys(status), "flags {:#o} gave {:?}", flags, status);
    }
}

#[test]
#[serial]
fn test_c_cpp_execve_is_pinned_to_the_exe_pointer() {
    let pinned = Pinned::new("/nonexistent/judged-program");
    let compiled = pinned.compile("c_cpp");

    // Pinned pointer passes the filter and fails in the kernel
    let status = run_filtered(&compiled, || {
        pinned.execve(&pinned.exe);
        if nix::errno::Errno::last() == nix::errno::Errno::ENOENT {
            unsafe { libc::_exit(7) }
        }
    });
    assert_eq!(exit_code(status), Some(7), "status was {:?}", status);

    // Same bytes at another address is a different pointer
    let copy = pinned.exe.clone();
    let status = run_filtered(&compiled, || pinned.execve(&copy));
    assert!(killed_by_sigsys(status), "status was {:?}", status);
}

#[test]
#[serial]
fn test_c_cpp_kills_unlisted_syscalls() {
    let pinned = Pinned::new("/nonexistent/judged-program");
    let compiled = pinned.compile("c_cpp");

    let status = run_filtered(&compiled, || unsafe {
        libc::syscall(libc::SYS_getpid);
    });
    assert!(killed_by_sigsys(status), "status was {:?}", status);
}

#[test]
#[serial]
fn test_general_socket_fails_with_eacces() {
    let pinned = Pinned::new("/nonexistent/judged-program");
    let compiled = pinned.compile("general");

    let status = run_filtered(&compiled, || {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
        if fd != -1 || nix::errno::Errno::last() != nix::errno::Errno::EACCES {
            unsafe { libc::_exit(1) }
        }
    });
    assert_eq!(exit_code(status), Some(0), "status was {:?}", status);
}

#[test]
#[serial]
fn test_general_kills_signal_sending() {
    let pinned = Pinned::new("/nonexistent/judged-program");
    let compiled = pinned.compile("general");

    let status = run_filtered(&compiled, || unsafe {
        libc::kill(libc::getpid(), 0);
    });
    assert!(killed_by_sigsys(status), "status was {:?}", status);
}

#[test]
#[serial]
fn test_general_kills_foreign_execve() {
    let pinned = Pinned::new("/nonexistent/judged-program");
    let compiled = pinned.compile("general");

    let status = run_filtered(&compiled, || {
        pinned.execve(&pinned.exe);
        if nix::errno::Errno::last() == nix::errno::Errno::ENOENT {
            unsafe { libc::_exit(7) }
        }
    });
    assert_eq!(exit_code(status), Some(7), "status was {:?}", status);

    let other = CString::new("/bin/true").unwrap();
    let status = run_filtered(&compiled, || pinned.execve(&other));
    assert!(killed_by_sigsys(status), "status was {:?}", status);
}

#[test]
#[serial]
fn test_general_allows_read_only_open() {
    let pinned = Pinned::new("/nonexistent/judged-program");
    let compiled = pinned.compile("general");
    let dev_null = CString::new("/dev/null").unwrap();

    let status = run_filtered(&compiled, || {
        if openat(&dev_null, libc::O_RDONLY) < 0 {
            unsafe { libc::_exit(1) }
        }
    });
    assert_eq!(exit_code(status), Some(0), "status was {:?}", status);

    let status = run_filtered(&compiled, || {
        openat(&dev_null, libc::O_WRONLY);
    });
    assert!(killed_by_sigsys(status), "status was {:?}", status);
}
