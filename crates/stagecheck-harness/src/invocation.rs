//! Compiler command lines.

use std::ffi::OsString;
use std::path::Path;

use stagecheck_exec::CaptureRequest;

use crate::cases::BuildKind;
use crate::config::HarnessConfig;
use crate::matrix::MatrixEntry;
use crate::target::Host;

/// Name of every produced artifact (`--name test`).
pub const ARTIFACT_NAME: &str = "test";

fn compiler_request(config: &HarnessConfig) -> CaptureRequest {
    CaptureRequest::new(config.compiler.as_os_str())
        .args(config.compiler_prefix_args.iter())
        .max_output_bytes(config.max_output_bytes)
        .timeout(config.timeouts.compile())
}

/// `<compiler> build-exe|build-obj|test <root> --name test --output-dir <dir> ...`
#[must_use]
pub fn compile_request(
    config: &HarnessConfig,
    kind: BuildKind,
    root: &Path,
    out_dir: &Path,
    entry: &MatrixEntry,
    host: &Host,
) -> CaptureRequest {
    let mut args: Vec<OsString> = vec![
        kind.subcommand().into(),
        root.as_os_str().to_owned(),
        "--name".into(),
        ARTIFACT_NAME.into(),
        "--output-dir".into(),
        out_dir.as_os_str().to_owned(),
    ];
    if let Some(flag) = entry.mode.compiler_flag() {
        args.push(flag.into());
    }
    if let Some(triple) = entry.target.triple() {
        args.push("-target".into());
        args.push(triple.into());
    }
    if entry.effective_link_libc(host) {
        args.push("--library".into());
        args.push("c".into());
    }
    if entry.single_threaded {
        args.push("--single-threaded".into());
    }
    compiler_request(config).args(args)
}

/// `<compiler> translate-c <root> [-target <triple>]`
#[must_use]
pub fn translate_request(
    config: &HarnessConfig,
    root: &Path,
    entry: &MatrixEntry,
) -> CaptureRequest {
    let mut request = compiler_request(config)
        .arg("translate-c")
        .arg(root.as_os_str());
    if let Some(triple) = entry.target.triple() {
        request = request.arg("-target").arg(triple);
    }
    request
}

/// Path of the artifact a successful executable build leaves in `out_dir`.
#[must_use]
pub fn artifact_path(out_dir: &Path, entry: &MatrixEntry, host: &Host) -> std::path::PathBuf {
    let suffix = entry.target.os(host).exe_suffix();
    out_dir.join(format!("{ARTIFACT_NAME}{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::OptimizeMode;
    use crate::target::{Abi, Arch, Os, Target};

    const HOST: Host = Host::new(Os::Linux, Arch::X86_64);

    fn argv(request: &CaptureRequest) -> Vec<String> {
        request
            .argv()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn native_debug_build_has_no_mode_or_target_flags() {
        let config = HarnessConfig::default();
        let entry = MatrixEntry::new(Target::Native, OptimizeMode::Debug);
        let req = compile_request(
            &config,
            BuildKind::Exe,
            Path::new("/w/source.zig"),
            Path::new("/w/out"),
            &entry,
            &HOST,
        );
        assert_eq!(
            argv(&req),
            ["zig", "build-exe", "/w/source.zig", "--name", "test", "--output-dir", "/w/out"]
        );
    }

    #[test]
    fn cross_entry_adds_flags_in_order() {
        let mut config = HarnessConfig::default();
        config.compiler_prefix_args = vec!["wrap.sh".into()];
        let entry = MatrixEntry::new(
            Target::cross(Arch::Aarch64, Os::Linux, Abi::Musl),
            OptimizeMode::ReleaseSafe,
        )
        .with_libc()
        .single_threaded();
        let req = compile_request(
            &config,
            BuildKind::Obj,
            Path::new("tmp.zig"),
            Path::new("out"),
            &entry,
            &HOST,
        );
        assert_eq!(
            argv(&req),
            [
                "zig",
                "wrap.sh",
                "build-obj",
                "tmp.zig",
                "--name",
                "test",
                "--output-dir",
                "out",
                "--release-safe",
                "-target",
                "aarch64-linux-musl",
                "--library",
                "c",
                "--single-threaded"
            ]
        );
    }

    #[test]
    fn translate_and_artifact_paths() {
        let config = HarnessConfig::default();
        let entry = MatrixEntry::new(
            Target::cross(Arch::X86_64, Os::Windows, Abi::Gnu),
            OptimizeMode::Debug,
        );
        let req = translate_request(&config, Path::new("source.h"), &entry);
        assert_eq!(
            argv(&req),
            ["zig", "translate-c", "source.h", "-target", "x86_64-windows-gnu"]
        );
        assert_eq!(
            artifact_path(Path::new("out"), &entry, &HOST),
            Path::new("out/test.exe")
        );
    }
}
