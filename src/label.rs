//! security labels applied to trees before they are committed

use std::path::Path;

use nix::libc;
use regex::Regex;

use crate::error::{Error, IoResultExt, Result};
use crate::types::Xattr;

/// xattr that carries the selinux context of a file
pub const SELINUX_XATTR: &str = "security.selinux";

/// labeling policy consulted for every path of a committed tree
pub trait Labeler {
    /// label for `path` (relative to the tree root) of a file with st_mode `mode`
    ///
    /// `Ok(None)` leaves the path unlabeled.
    fn label(&self, path: &Path, mode: u32) -> Result<Option<Xattr>>;
}

/// no labeling
#[derive(Clone, Copy, Debug, Default)]
pub struct NoLabels;

impl Labeler for NoLabels {
    fn label(&self, _path: &Path, _mode: u32) -> Result<Option<Xattr>> {
        Ok(None)
    }
}

/// file type column of a file_contexts rule
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FileClass {
    Any,
    Regular,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
}

impl FileClass {
    fn parse(column: &str) -> Option<Self> {
        Some(match column {
            "--" => FileClass::Regular,
            "-d" => FileClass::Directory,
            "-l" => FileClass::Symlink,
            "-c" => FileClass::CharDevice,
            "-b" => FileClass::BlockDevice,
            "-p" => FileClass::Fifo,
            "-s" => FileClass::Socket,
            _ => return None,
        })
    }

    fn matches(self, mode: u32) -> bool {
        let fmt = mode & libc::S_IFMT;
        match self {
            FileClass::Any => true,
            FileClass::Regular => fmt == libc::S_IFREG,
            FileClass::Directory => fmt == libc::S_IFDIR,
            FileClass::Symlink => fmt == libc::S_IFLNK,
            FileClass::CharDevice => fmt == libc::S_IFCHR,
            FileClass::BlockDevice => fmt == libc::S_IFBLK,
            FileClass::Fifo => fmt == libc::S_IFIFO,
            FileClass::Socket => fmt == libc::S_IFSOCK,
        }
    }
}

#[derive(Debug)]
struct ContextRule {
    pattern: Regex,
    class: FileClass,
    /// None for `<<none>>`
    context: Option<String>,
}

/// selinux `file_contexts` policy
///
/// each line is `<regex> [<file type>] <context>`; patterns match the whole
/// absolute path and the last matching rule wins.
#[derive(Debug)]
pub struct FileContexts {
    rules: Vec<ContextRule>,
}

impl FileContexts {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut rules = Vec::new();

        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let invalid = |message: String| Error::InvalidContextRule {
                line: idx + 1,
                message,
            };

            let fields: Vec<&str> = line.split_whitespace().collect();
            let (pattern_src, class, context) = match fields.as_slice() {
                [pattern_src, context] => (*pattern_src, FileClass::Any, *context),
                [pattern_src, class, context] => {
                    let class = FileClass::parse(class)
                        .ok_or_else(|| invalid(format!("unknown file type {:?}", class)))?;
                    (*pattern_src, class, *context)
                }
                _ => return Err(invalid(format!("expected 2 or 3 fields, got {}", fields.len()))),
            };

            let pattern = Regex::new(&format!("^(?:{})$", pattern_src))
                .map_err(|e| invalid(format!("bad pattern {:?}: {}", pattern_src, e)))?;

            rules.push(ContextRule {
                pattern,
                class,
                context: (context != "<<none>>").then(|| context.to_string()),
            });
        }

        Ok(Self { rules })
    }

    /// context for an absolute path, None when unlabeled
    pub fn lookup(&self, path: &str, mode: u32) -> Option<&str> {
        self.rules
            .iter()
            .rev()
            .find(|rule| rule.class.matches(mode) && rule.pattern.is_match(path))
            .and_then(|rule| rule.context.as_deref())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Labeler for FileContexts {
    fn label(&self, path: &Path, mode: u32) -> Result<Option<Xattr>> {
        let rel = path.to_str().ok_or_else(|| Error::Labeling {
            path: path.to_path_buf(),
            message: "path is not valid utf-8".to_string(),
        })?;
        let absolute = format!("/{}", rel.trim_start_matches('/'));

        Ok(self.lookup(&absolute, mode).map(|context| {
            // the kernel stores contexts nul-terminated
            let mut value = context.as_bytes().to_vec();
            value.push(0);
            Xattr::new(SELINUX_XATTR, value)
        }))
    }
}
