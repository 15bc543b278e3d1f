//! Work directories and source materialization.
//!
//! Layout: `<cache_root>/<case-slug>-<digest>/<entry-slug>/` with the compiler
//! output in `out/`. The digest covers category and case name, so two cases
//! whose slugs collide still get disjoint directories.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::cases::{SourceFile, TestCase};
use crate::error::UnitError;
use crate::matrix::MatrixEntry;
use crate::target::Host;

/// Compiler output directory inside an entry directory.
pub const OUT_DIR: &str = "out";

pub(crate) fn hex_encode(buf: &[u8]) -> String {
    let mut out = String::with_capacity(buf.len() * 2);
    for byte in buf {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}

/// Lowercase ASCII alphanumerics; every other run of characters becomes one `-`.
#[must_use]
pub fn slug(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// First 16 hex digits of SHA-256 over `category \0 name`.
#[must_use]
pub fn case_digest(case: &TestCase) -> String {
    let mut hasher = Sha256::new();
    hasher.update(case.category().as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(case.name.as_bytes());
    let digest = hex_encode(&hasher.finalize());
    digest[..16].to_string()
}

/// Directory owned by one case.
#[must_use]
pub fn case_dir(cache_root: &Path, case: &TestCase) -> PathBuf {
    cache_root.join(format!("{}-{}", slug(&case.name), case_digest(case)))
}

/// Paths used by one (case, entry) chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkDir {
    pub dir: PathBuf,
    pub out_dir: PathBuf,
}

impl WorkDir {
    #[must_use]
    pub fn new(cache_root: &Path, case: &TestCase, entry: &MatrixEntry, host: &Host) -> Self {
        let dir = case_dir(cache_root, case).join(slug(&entry.describe(host)));
        let out_dir = dir.join(OUT_DIR);
        Self { dir, out_dir }
    }

    /// Location of a case file inside this work directory.
    #[must_use]
    pub fn source_path(&self, file: &SourceFile) -> PathBuf {
        self.dir.join(&file.filename)
    }
}

/// Write every source file and create the output directory. Returns the path
/// of the root file.
pub fn materialize(work: &WorkDir, sources: &[SourceFile]) -> Result<PathBuf, UnitError> {
    std::fs::create_dir_all(&work.out_dir).map_err(|e| UnitError::io(&work.out_dir, e))?;
    for file in sources {
        let path = work.source_path(file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| UnitError::io(parent, e))?;
        }
        std::fs::write(&path, &file.contents).map_err(|e| UnitError::io(&path, e))?;
    }
    sources
        .first()
        .map(|root| work.source_path(root))
        .ok_or_else(|| {
            UnitError::io(
                &work.dir,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "case has no sources"),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cases::ExpectedOutcome;
    use crate::matrix::OptimizeMode;
    use crate::target::{Arch, Os, Target};

    const HOST: Host = Host::new(Os::Linux, Arch::X86_64);

    fn temp_root(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "stagecheck-materialize-{tag}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn slugs_are_path_safe() {
        assert_eq!(slug("Hello, World!"), "hello-world");
        assert_eq!(slug("native-Debug-c-multi"), "native-debug-c-multi");
        assert_eq!(slug("../x"), "x");
    }

    #[test]
    fn same_name_other_category_gets_other_dir() {
        let a = TestCase::new("dup", "", ExpectedOutcome::RuntimeSafety);
        let b = TestCase::new("dup", "", ExpectedOutcome::ExactOutput { stdout: String::new() });
        assert_ne!(case_dir(Path::new("c"), &a), case_dir(Path::new("c"), &b));
        assert_eq!(case_digest(&a).len(), 16);
    }

    #[test]
    fn materialize_writes_nested_sources() {
        let root = temp_root("nested");
        let mut case = TestCase::new("multi file", "root", ExpectedOutcome::RuntimeSafety);
        case.with_source("lib/helper.zig", "helper");
        let entry = MatrixEntry::new(Target::Native, OptimizeMode::Debug);
        let work = WorkDir::new(&root, &case, &entry, &HOST);

        let root_path = materialize(&work, &case.sources).expect("materialize");
        assert_eq!(root_path, work.dir.join("source.zig"));
        assert_eq!(std::fs::read_to_string(&root_path).unwrap(), "root");
        assert_eq!(
            std::fs::read_to_string(work.dir.join("lib/helper.zig")).unwrap(),
            "helper"
        );
        assert!(work.out_dir.is_dir());
        let _ = std::fs::remove_dir_all(&root);
    }
}
