//! warden-exec: lightweight wrapper that applies resource limits before
//! exec'ing the real command.
//!
//! Usage: `warden-exec [--rlimit RESOURCE=SOFT:HARD]... -- PROGRAM [ARGS]...`
//!
//! Each side of a limit is a number, `-` for unlimited, or blank to keep the
//! current value. Limits are applied in the order given.

use std::env;
use std::process;

use nix::sys::resource::{Resource, getrlimit, setrlimit};

/// One side of a requested limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Keep,
    Unlimited,
    Value(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LimitRequest {
    resource: Resource,
    name: &'static str,
    soft: Side,
    hard: Side,
}

#[derive(Debug, PartialEq, Eq)]
struct Invocation {
    limits: Vec<LimitRequest>,
    program_and_args: Vec<String>,
}

fn main() {
    // Guard: refuse to run if the setuid/setgid bit is set on this binary.
    reject_if_setuid();

    let args: Vec<String> = env::args().skip(1).collect();
    let invocation = parse_args(&args).unwrap_or_else(|e| fail(&e));

    for limit in &invocation.limits {
        if let Err(e) = apply_limit(limit) {
            fail(&e);
        }
    }

    // Close inherited file descriptors above stderr before exec
    close_inherited_fds();

    exec(&invocation.program_and_args)
}

fn fail(message: &str) -> ! {
    eprintln!("warden-exec: {}", message);
    process::exit(127);
}

fn parse_args(args: &[String]) -> Result<Invocation, String> {
    let mut limits = Vec::new();
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "--rlimit" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| "--rlimit requires a value".to_string())?;
                limits.push(parse_limit(value)?);
                i += 2;
            }
            "--" => {
                let program_and_args = args[i + 1..].to_vec();
                if program_and_args.is_empty() {
                    return Err("missing command after --".to_string());
                }
                return Ok(Invocation {
                    limits,
                    program_and_args,
                });
            }
            other => return Err(format!("unknown argument: {}", other)),
        }
    }

    Err("missing command after --".to_string())
}

/// Parse `RESOURCE=SOFT:HARD`
fn parse_limit(arg: &str) -> Result<LimitRequest, String> {
    let (name, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("invalid limit '{}' (expected RESOURCE=SOFT:HARD)", arg))?;
    let (resource, name) = resource_by_name(name)?;
    let (soft, hard) = value
        .split_once(':')
        .ok_or_else(|| format!("invalid limit '{}' (expected RESOURCE=SOFT:HARD)", arg))?;

    Ok(LimitRequest {
        resource,
        name,
        soft: parse_side(soft)?,
        hard: parse_side(hard)?,
    })
}

fn parse_side(side: &str) -> Result<Side, String> {
    match side {
        "" => Ok(Side::Keep),
        "-" => Ok(Side::Unlimited),
        _ => side
            .parse::<u64>()
            .map(Side::Value)
            .map_err(|_| format!("invalid limit value '{}'", side)),
    }
}

fn resource_by_name(name: &str) -> Result<(Resource, &'static str), String> {
    let found = match name {
        "nofile" => (Resource::RLIMIT_NOFILE, "nofile"),
        "core" => (Resource::RLIMIT_CORE, "core"),
        "data" => (Resource::RLIMIT_DATA, "data"),
        "addrspace" | "as" => (Resource::RLIMIT_AS, "addrspace"),
        "cpu" => (Resource::RLIMIT_CPU, "cpu"),
        "fsize" => (Resource::RLIMIT_FSIZE, "fsize"),
        "stack" => (Resource::RLIMIT_STACK, "stack"),
        "nproc" => (Resource::RLIMIT_NPROC, "nproc"),
        "memlock" => (Resource::RLIMIT_MEMLOCK, "memlock"),
        _ => return Err(format!("unknown resource '{}'", name)),
    };
    Ok(found)
}

fn resolve_side(side: Side, current: u64) -> u64 {
    match side {
        Side::Keep => current,
        Side::Unlimited => libc::RLIM_INFINITY,
        Side::Value(v) => v,
    }
}

fn apply_limit(limit: &LimitRequest) -> Result<(), String> {
    let (current_soft, current_hard) = getrlimit(limit.resource)
        .map_err(|e| format!("getrlimit({}) failed: {}", limit.name, e))?;
    let soft = resolve_side(limit.soft, current_soft);
    let hard = resolve_side(limit.hard, current_hard);

    setrlimit(limit.resource, soft, hard)
        .map_err(|e| format!("setrlimit({}, {}, {}) failed: {}", limit.name, soft, hard, e))
}

/// Abort if running as a setuid/setgid binary.
fn reject_if_setuid() {
    use nix::unistd::{getegid, geteuid, getgid, getuid};

    let ruid = getuid();
    let euid = geteuid();
    let rgid = getgid();
    let egid = getegid();

    if ruid != euid || rgid != egid {
        fail(&format!(
            "refusing to run as setuid/setgid binary (uid={}, euid={}, gid={}, egid={})",
            ruid, euid, rgid, egid
        ));
    }
}

/// Close all file descriptors above stderr (fd > 2) so daemon resources do
/// not leak into the service.
fn close_inherited_fds() {
    // close_range (Linux 5.9+)
    #[cfg(target_os = "linux")]
    {
        let ret = unsafe { libc::syscall(libc::SYS_close_range, 3u32, u32::MAX, 0u32) };
        if ret == 0 {
            return;
        }
    }

    let fd_dir = if cfg!(target_os = "linux") {
        "/proc/self/fd"
    } else {
        "/dev/fd"
    };

    if let Ok(entries) = std::fs::read_dir(fd_dir) {
        let fds_to_close: Vec<i32> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str().and_then(|s| s.parse::<i32>().ok()))
            .filter(|&fd| fd > 2)
            .collect();

        for fd in fds_to_close {
            unsafe {
                libc::close(fd);
            }
        }
    }
}

/// Replace this process with the command. Only returns on error.
fn exec(program_and_args: &[String]) -> ! {
    use std::ffi::CString;

    let c_args: Vec<CString> = program_and_args
        .iter()
        .map(|arg| {
            CString::new(arg.as_bytes())
                .unwrap_or_else(|_| fail(&format!("argument contains a NUL byte: {:?}", arg)))
        })
        .collect();

    // execvp searches PATH
    match nix::unistd::execvp(&c_args[0], &c_args) {
        Ok(infallible) => match infallible {},
        Err(e) => fail(&format!("exec of {} failed: {}", program_and_args[0], e)),
    }
}
