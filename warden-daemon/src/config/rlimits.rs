//! Resource limit (`rlimit-<resource>`) settings

use std::fmt;

/// Resources that can be limited with an `rlimit-<resource>` directive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Open file descriptors (RLIMIT_NOFILE)
    NoFile,
    /// Core dump size (RLIMIT_CORE)
    Core,
    /// Data segment size (RLIMIT_DATA)
    Data,
    /// Address space (RLIMIT_AS)
    AddrSpace,
    /// CPU seconds (RLIMIT_CPU)
    Cpu,
    /// Largest file size (RLIMIT_FSIZE)
    FileSize,
    /// Stack size (RLIMIT_STACK)
    Stack,
    /// Processes for the user (RLIMIT_NPROC)
    NProc,
    /// Locked memory (RLIMIT_MEMLOCK)
    MemLock,
}

impl ResourceKind {
    /// Map the suffix of an `rlimit-<resource>` setting to a resource
    pub fn from_setting_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "nofile" => Some(ResourceKind::NoFile),
            "core" => Some(ResourceKind::Core),
            "data" => Some(ResourceKind::Data),
            "addrspace" | "as" => Some(ResourceKind::AddrSpace),
            "cpu" => Some(ResourceKind::Cpu),
            "fsize" => Some(ResourceKind::FileSize),
            "stack" => Some(ResourceKind::Stack),
            "nproc" => Some(ResourceKind::NProc),
            "memlock" => Some(ResourceKind::MemLock),
            _ => None,
        }
    }

    /// Name understood by `warden-exec --rlimit`
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::NoFile => "nofile",
            ResourceKind::Core => "core",
            ResourceKind::Data => "data",
            ResourceKind::AddrSpace => "addrspace",
            ResourceKind::Cpu => "cpu",
            ResourceKind::FileSize => "fsize",
            ResourceKind::Stack => "stack",
            ResourceKind::NProc => "nproc",
            ResourceKind::MemLock => "memlock",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One side of a limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitValue {
    Value(u64),
    Unlimited,
}

impl fmt::Display for LimitValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitValue::Value(v) => write!(f, "{}", v),
            LimitValue::Unlimited => f.write_str("-"),
        }
    }
}

/// A soft/hard limit pair for one resource. `None` leaves that side as inherited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RlimitEntry {
    pub resource: ResourceKind,
    pub soft: Option<LimitValue>,
    pub hard: Option<LimitValue>,
}

impl RlimitEntry {
    pub fn soft_is_set(&self) -> bool {
        self.soft.is_some()
    }

    pub fn hard_is_set(&self) -> bool {
        self.hard.is_some()
    }

    /// Render as `RESOURCE=SOFT:HARD` for `warden-exec`, leaving unset sides blank
    pub fn to_wrapper_arg(&self) -> String {
        let side = |v: Option<LimitValue>| v.map(|v| v.to_string()).unwrap_or_default();
        format!("{}={}:{}", self.resource, side(self.soft), side(self.hard))
    }
}

fn parse_side(s: &str) -> Result<Option<LimitValue>, String> {
    let s = s.trim();
    match s {
        "" => Ok(None),
        "-" => Ok(Some(LimitValue::Unlimited)),
        _ => s
            .parse::<u64>()
            .map(|v| Some(LimitValue::Value(v)))
            .map_err(|_| format!("invalid limit value '{}'", s)),
    }
}

/// Parse an rlimit value: `SOFT:HARD`, `VALUE` (both sides), `-` for unlimited,
/// and a blank side (colon present) to leave that side unset.
pub fn parse_rlimit(resource: ResourceKind, value: &str) -> Result<RlimitEntry, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("missing limit value".to_string());
    }

    let (soft, hard) = match value.split_once(':') {
        Some((soft, hard)) => {
            if hard.contains(':') {
                return Err(format!("too many ':' in limit '{}'", value));
            }
            (parse_side(soft)?, parse_side(hard)?)
        }
        None => {
            let both = parse_side(value)?;
            (both, both)
        }
    };

    Ok(RlimitEntry {
        resource,
        soft,
        hard,
    })
}
