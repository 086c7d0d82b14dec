use std::fmt;

use super::sideband::SidebandMode;

pub fn agent() -> String {
    format!("gitbruv/{}", env!("CARGO_PKG_VERSION"))
}

/// Space-separated capability list as sent after `\0` or on the first command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    caps: Vec<String>,
}

impl Capabilities {
    pub fn parse(s: &str) -> Self {
        Self {
            caps: s.split_whitespace().map(str::to_string).collect(),
        }
    }

    pub fn has(&self, cap: &str) -> bool {
        self.caps.iter().any(|c| c == cap)
    }

    /// Value of a `key=value` capability.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.caps.iter().find_map(|c| {
            c.strip_prefix(key)
                .and_then(|rest| rest.strip_prefix('='))
        })
    }

    pub fn sideband(&self) -> SidebandMode {
        if self.has("side-band-64k") {
            SidebandMode::SideBand64k
        } else if self.has("side-band") {
            SidebandMode::SideBand
        } else {
            SidebandMode::None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.caps.iter().map(String::as_str)
    }
}

/// Capabilities upload-pack advertises on its first ref line.
#[derive(Debug, Clone)]
pub struct UploadPackCapabilities {
    /// Target of `HEAD`, advertised as `symref=HEAD:<target>`.
    pub head_symref: Option<String>,
    pub agent: String,
}

impl UploadPackCapabilities {
    pub fn new(head_symref: Option<String>) -> Self {
        Self {
            head_symref,
            agent: agent(),
        }
    }
}

impl fmt::Display for UploadPackCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "side-band side-band-64k no-progress")?;
        if let Some(target) = &self.head_symref {
            write!(f, " symref=HEAD:{}", target)?;
        }
        write!(f, " agent={}", self.agent)
    }
}

/// Capabilities on either side of a receive-pack exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceivePackCapabilities {
    pub report_status: bool,
    pub delete_refs: bool,
    pub side_band_64k: bool,
    pub quiet: bool,
    pub ofs_delta: bool,
    pub push_options: bool,
    pub agent: Option<String>,
}

impl ReceivePackCapabilities {
    pub fn server() -> Self {
        Self {
            report_status: true,
            delete_refs: true,
            side_band_64k: true,
            quiet: true,
            ofs_delta: true,
            push_options: true,
            agent: Some(agent()),
        }
    }

    pub fn parse(caps_str: &str) -> Self {
        let caps = Capabilities::parse(caps_str);
        Self {
            report_status: caps.has("report-status"),
            delete_refs: caps.has("delete-refs"),
            side_band_64k: caps.has("side-band-64k"),
            quiet: caps.has("quiet"),
            ofs_delta: caps.has("ofs-delta"),
            push_options: caps.has("push-options"),
            agent: caps.value("agent").map(str::to_string),
        }
    }

    pub fn sideband(&self) -> SidebandMode {
        if self.side_band_64k {
            SidebandMode::SideBand64k
        } else {
            SidebandMode::None
        }
    }
}

impl fmt::Display for ReceivePackCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut caps = Vec::new();
        if self.report_status {
            caps.push("report-status".to_string());
        }
        if self.delete_refs {
            caps.push("delete-refs".to_string());
        }
        if self.side_band_64k {
            caps.push("side-band-64k".to_string());
        }
        if self.quiet {
            caps.push("quiet".to_string());
        }
        if self.ofs_delta {
            caps.push("ofs-delta".to_string());
        }
        if self.push_options {
            caps.push("push-options".to_string());
        }
        if let Some(agent) = &self.agent {
            caps.push(format!("agent={}", agent));
        }
        write!(f, "{}", caps.join(" "))
    }
}
