//! Target triples, host detection and the per-OS libc policy.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("invalid target triple '{0}': expected <arch>-<os>-<abi>")]
    InvalidTriple(String),
    #[error("unknown architecture '{0}'")]
    UnknownArch(String),
    #[error("unknown operating system '{0}'")]
    UnknownOs(String),
    #[error("unknown ABI '{0}'")]
    UnknownAbi(String),
    #[error("unsupported host {os}/{arch}")]
    UnsupportedHost { os: String, arch: String },
}

/// CPU architecture family. Sub-architectures (e.g. `armv8_5a`) live on
/// [`CrossTarget::sub_arch`] and never change the family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Arch {
    X86_64,
    I386,
    Aarch64,
    Arm,
    Mipsel,
    Riscv64,
    Wasm32,
}

impl Arch {
    pub const ALL: [Self; 7] = [
        Self::X86_64,
        Self::I386,
        Self::Aarch64,
        Self::Arm,
        Self::Mipsel,
        Self::Riscv64,
        Self::Wasm32,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::I386 => "i386",
            Self::Aarch64 => "aarch64",
            Self::Arm => "arm",
            Self::Mipsel => "mipsel",
            Self::Riscv64 => "riscv64",
            Self::Wasm32 => "wasm32",
        }
    }

    fn from_rust_arch(raw: &str) -> Option<Self> {
        match raw {
            "x86_64" => Some(Self::X86_64),
            "x86" => Some(Self::I386),
            "aarch64" => Some(Self::Aarch64),
            "arm" => Some(Self::Arm),
            "mips" => Some(Self::Mipsel),
            "riscv64" => Some(Self::Riscv64),
            "wasm32" => Some(Self::Wasm32),
            _ => None,
        }
    }

    /// Split `armv8_5a` into (`Arm`, `Some("v8_5a")`). The longest matching
    /// family name wins.
    fn split_archsub(raw: &str) -> Option<(Self, Option<String>)> {
        let mut names: Vec<Self> = Self::ALL.to_vec();
        names.sort_by_key(|a| std::cmp::Reverse(a.as_str().len()));
        names.into_iter().find_map(|arch| {
            let rest = raw.strip_prefix(arch.as_str())?;
            let sub = (!rest.is_empty()).then(|| rest.to_string());
            Some((arch, sub))
        })
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Os {
    Linux,
    Macos,
    Windows,
    Freebsd,
    Netbsd,
    Dragonfly,
    Freestanding,
    Wasi,
}

impl Os {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Macos => "macos",
            Self::Windows => "windows",
            Self::Freebsd => "freebsd",
            Self::Netbsd => "netbsd",
            Self::Dragonfly => "dragonfly",
            Self::Freestanding => "freestanding",
            Self::Wasi => "wasi",
        }
    }

    #[must_use]
    pub fn from_str_loose(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "linux" => Some(Self::Linux),
            "macos" | "macosx" | "darwin" => Some(Self::Macos),
            "windows" => Some(Self::Windows),
            "freebsd" => Some(Self::Freebsd),
            "netbsd" => Some(Self::Netbsd),
            "dragonfly" => Some(Self::Dragonfly),
            "freestanding" => Some(Self::Freestanding),
            "wasi" => Some(Self::Wasi),
            _ => None,
        }
    }

    /// Operating systems whose only stable syscall interface is the system libc,
    /// so every executable for them links libc dynamically.
    #[must_use]
    pub const fn requires_libc(self) -> bool {
        matches!(
            self,
            Self::Macos | Self::Freebsd | Self::Netbsd | Self::Dragonfly
        )
    }

    #[must_use]
    pub const fn exe_suffix(self) -> &'static str {
        match self {
            Self::Windows => ".exe",
            _ => "",
        }
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Abi {
    None,
    Gnu,
    Gnueabihf,
    Musl,
    Musleabihf,
    Msvc,
}

impl Abi {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gnu => "gnu",
            Self::Gnueabihf => "gnueabihf",
            Self::Musl => "musl",
            Self::Musleabihf => "musleabihf",
            Self::Msvc => "msvc",
        }
    }

    #[must_use]
    pub fn from_str_loose(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "none" => Some(Self::None),
            "gnu" => Some(Self::Gnu),
            "gnueabihf" => Some(Self::Gnueabihf),
            "musl" => Some(Self::Musl),
            "musleabihf" => Some(Self::Musleabihf),
            "msvc" => Some(Self::Msvc),
            _ => None,
        }
    }
}

impl fmt::Display for Abi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An explicit cross-compilation target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CrossTarget {
    pub arch: Arch,
    pub sub_arch: Option<String>,
    pub os: Os,
    pub abi: Abi,
}

impl CrossTarget {
    #[must_use]
    pub const fn new(arch: Arch, os: Os, abi: Abi) -> Self {
        Self {
            arch,
            sub_arch: None,
            os,
            abi,
        }
    }

    #[must_use]
    pub fn with_sub_arch(mut self, sub: impl Into<String>) -> Self {
        self.sub_arch = Some(sub.into());
        self
    }

    /// `<arch><sub>-<os>-<abi>`, as passed to `-target`.
    #[must_use]
    pub fn triple(&self) -> String {
        format!(
            "{}{}-{}-{}",
            self.arch,
            self.sub_arch.as_deref().unwrap_or(""),
            self.os,
            self.abi
        )
    }
}

/// Either the host's own configuration or an explicit triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Target {
    #[default]
    Native,
    Cross(CrossTarget),
}

impl Target {
    #[must_use]
    pub const fn cross(arch: Arch, os: Os, abi: Abi) -> Self {
        Self::Cross(CrossTarget::new(arch, os, abi))
    }

    #[must_use]
    pub fn os(&self, host: &Host) -> Os {
        match self {
            Self::Native => host.os,
            Self::Cross(t) => t.os,
        }
    }

    #[must_use]
    pub fn arch(&self, host: &Host) -> Arch {
        match self {
            Self::Native => host.arch,
            Self::Cross(t) => t.arch,
        }
    }

    /// Same OS and architecture family as the host (ABI and sub-arch ignored).
    #[must_use]
    pub fn matches_host(&self, host: &Host) -> bool {
        match self {
            Self::Native => true,
            Self::Cross(t) => t.os == host.os && t.arch == host.arch,
        }
    }

    /// Whether an executable built for this target can run directly on `host`.
    #[must_use]
    pub fn can_exec_on(&self, host: &Host) -> bool {
        match self {
            Self::Native => true,
            Self::Cross(t) => {
                t.os == host.os
                    && (t.arch == host.arch
                        || (host.arch == Arch::X86_64 && t.arch == Arch::I386))
            }
        }
    }

    #[must_use]
    pub fn requires_libc(&self, host: &Host) -> bool {
        self.os(host).requires_libc()
    }

    /// The `-target` argument, or `None` for a native build.
    #[must_use]
    pub fn triple(&self) -> Option<String> {
        match self {
            Self::Native => None,
            Self::Cross(t) => Some(t.triple()),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => f.write_str("native"),
            Self::Cross(t) => f.write_str(&t.triple()),
        }
    }
}

impl FromStr for Target {
    type Err = TargetError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("native") {
            return Ok(Self::Native);
        }
        let parts: Vec<&str> = raw.split('-').collect();
        let [archsub, os, abi] = parts.as_slice() else {
            return Err(TargetError::InvalidTriple(raw.to_string()));
        };
        let (arch, sub_arch) = Arch::split_archsub(&archsub.to_ascii_lowercase())
            .ok_or_else(|| TargetError::UnknownArch((*archsub).to_string()))?;
        let os = Os::from_str_loose(os).ok_or_else(|| TargetError::UnknownOs((*os).to_string()))?;
        let abi =
            Abi::from_str_loose(abi).ok_or_else(|| TargetError::UnknownAbi((*abi).to_string()))?;
        Ok(Self::Cross(CrossTarget {
            arch,
            sub_arch,
            os,
            abi,
        }))
    }
}

impl TryFrom<String> for Target {
    type Error = TargetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Target> for String {
    fn from(value: Target) -> Self {
        value.to_string()
    }
}

/// The machine the harness itself runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Host {
    pub os: Os,
    pub arch: Arch,
}

impl Host {
    #[must_use]
    pub const fn new(os: Os, arch: Arch) -> Self {
        Self { os, arch }
    }

    /// Detect the running host from the standard library's compile-time constants.
    pub fn detect() -> Result<Self, TargetError> {
        let os = std::env::consts::OS;
        let arch = std::env::consts::ARCH;
        match (Os::from_str_loose(os), Arch::from_rust_arch(arch)) {
            (Some(os), Some(arch)) => Ok(Self { os, arch }),
            _ => Err(TargetError::UnsupportedHost {
                os: os.to_string(),
                arch: arch.to_string(),
            }),
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.arch, self.os)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINUX_X64: Host = Host::new(Os::Linux, Arch::X86_64);

    #[test]
    fn parses_plain_and_subarch_triples() {
        let t: Target = "x86_64-linux-musl".parse().unwrap();
        assert_eq!(t, Target::cross(Arch::X86_64, Os::Linux, Abi::Musl));

        let t: Target = "armv8_5a-linux-musleabihf".parse().unwrap();
        let Target::Cross(cross) = &t else {
            panic!("expected cross target");
        };
        assert_eq!(cross.arch, Arch::Arm);
        assert_eq!(cross.sub_arch.as_deref(), Some("v8_5a"));
        assert_eq!(t.to_string(), "armv8_5a-linux-musleabihf");

        assert_eq!("native".parse::<Target>().unwrap(), Target::Native);
    }

    #[test]
    fn rejects_malformed_triples() {
        assert_eq!(
            "x86_64-linux".parse::<Target>(),
            Err(TargetError::InvalidTriple("x86_64-linux".into()))
        );
        assert!(matches!(
            "sparc-linux-gnu".parse::<Target>(),
            Err(TargetError::UnknownArch(_))
        ));
        assert!(matches!(
            "x86_64-plan9-none".parse::<Target>(),
            Err(TargetError::UnknownOs(_))
        ));
        assert!(matches!(
            "x86_64-linux-eabi".parse::<Target>(),
            Err(TargetError::UnknownAbi(_))
        ));
    }

    #[test]
    fn serde_uses_triple_strings() {
        let t = Target::cross(Arch::Aarch64, Os::Linux, Abi::Gnu);
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, "\"aarch64-linux-gnu\"");
        let back: Target = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
        assert!(serde_json::from_str::<Target>("\"bogus\"").is_err());
    }

    #[test]
    fn libc_policy_by_os() {
        assert!(Os::Macos.requires_libc());
        assert!(Os::Freebsd.requires_libc());
        assert!(!Os::Linux.requires_libc());
        assert!(!Os::Windows.requires_libc());
        let mac = Target::cross(Arch::X86_64, Os::Macos, Abi::Gnu);
        assert!(mac.requires_libc(&LINUX_X64));
        assert!(!Target::Native.requires_libc(&LINUX_X64));
    }

    #[test]
    fn host_matching_ignores_abi_and_subarch() {
        assert!(Target::cross(Arch::X86_64, Os::Linux, Abi::Musl).matches_host(&LINUX_X64));
        assert!(!Target::cross(Arch::I386, Os::Linux, Abi::None).matches_host(&LINUX_X64));
        assert!(!Target::cross(Arch::X86_64, Os::Windows, Abi::Gnu).matches_host(&LINUX_X64));
        assert!(Target::Native.matches_host(&LINUX_X64));
    }

    #[test]
    fn i386_runs_on_x86_64_hosts() {
        assert!(Target::cross(Arch::I386, Os::Linux, Abi::Musl).can_exec_on(&LINUX_X64));
        assert!(!Target::cross(Arch::Aarch64, Os::Linux, Abi::Musl).can_exec_on(&LINUX_X64));
        let arm_host = Host::new(Os::Linux, Arch::Aarch64);
        assert!(!Target::cross(Arch::X86_64, Os::Linux, Abi::None).can_exec_on(&arm_host));
    }

    #[test]
    fn windows_exe_suffix() {
        assert_eq!(Os::Windows.exe_suffix(), ".exe");
        assert_eq!(Os::Linux.exe_suffix(), "");
    }
}
