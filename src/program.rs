//! Abstract representation of the smali program on disk: where classes
//! live, how member references are spelled and how a method body is found.
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Result, RuntimeError};
use crate::source::SourceCursor;

/// Signature of the class initializer.
pub const CLASS_INITIALIZER: &str = "<clinit>()V";

fn method_ref_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^L([^;]+);->(\S+)$").unwrap())
}

fn field_ref_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\S+?)->([^:\s]+):(\S+)$").unwrap())
}

/// Method reference of the form `Lpkg/Class;->name(Args)Ret`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRef<'a> {
    /// Class name without the `L` sigil and trailing `;`.
    pub class_name: &'a str,
    /// Method name plus descriptor, matched against `.method` headers.
    pub signature: &'a str,
}

impl<'a> MethodRef<'a> {
    pub fn parse(name: &'a str) -> Result<Self> {
        let caps = method_ref_pattern()
            .captures(name)
            .ok_or_else(|| RuntimeError::malformed(format!("invalid method reference `{name}`")))?;
        let class_name = caps.get(1).map_or("", |m| m.as_str());
        let signature = caps.get(2).map_or("", |m| m.as_str());
        Ok(Self {
            class_name,
            signature,
        })
    }

    pub fn is_class_initializer(&self) -> bool {
        self.signature == CLASS_INITIALIZER
    }
}

/// Returns the key under which array pseudo-methods (`[I->clone()...`) are
/// registered in the native table, e.g. `[->clone()Ljava/lang/Object;`.
pub fn array_method_key(name: &str) -> Option<String> {
    if !name.starts_with('[') {
        return None;
    }
    name.split_once("->")
        .map(|(_, method)| format!("[->{method}"))
}

/// Field reference of the form `Lpkg/Class;->name:Type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef<'a> {
    pub owner: &'a str,
    pub name: &'a str,
    pub type_descriptor: &'a str,
}

impl<'a> FieldRef<'a> {
    pub fn parse(field: &'a str) -> Result<Self> {
        let caps = field_ref_pattern()
            .captures(field)
            .ok_or_else(|| RuntimeError::malformed(format!("invalid field reference `{field}`")))?;
        Ok(Self {
            owner: caps.get(1).map_or("", |m| m.as_str()),
            name: caps.get(2).map_or("", |m| m.as_str()),
            type_descriptor: caps.get(3).map_or("", |m| m.as_str()),
        })
    }

    /// Whether the field holds a heap reference (object or array type).
    pub fn is_reference(&self) -> bool {
        self.type_descriptor.starts_with(['L', '['])
    }
}

/// An opened method body: a cursor marked at its first instruction and the
/// total number of registers the frame needs.
#[derive(Debug)]
pub struct MethodBody {
    pub cursor: SourceCursor,
    pub register_count: usize,
}

/// Directory tree holding one source file per class.
#[derive(Debug, Clone)]
pub struct ClassPath {
    root: PathBuf,
    extension: String,
}

impl ClassPath {
    pub fn new(root: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            root: root.into(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Location of the source file for `class_name` (`pkg/Outer$Inner`).
    pub fn class_file(&self, class_name: &str) -> PathBuf {
        self.root.join(format!("{class_name}.{}", self.extension))
    }

    /// Maps a listed source path back to its class name, stripping the root
    /// when present and the extension. Returns `None` for other extensions.
    pub fn class_name_for(&self, path: &str) -> Option<String> {
        let stem = path.strip_suffix(&format!(".{}", self.extension))?;
        let relative = Path::new(stem)
            .strip_prefix(&self.root)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| stem.to_string());
        let name = relative.replace('\\', "/");
        Some(name.trim_start_matches("./").to_string())
    }

    /// Finds the declaration of `method` and reads its register count.
    /// `.locals n` adds `n` registers to the argument registers while
    /// `.registers n` is the exact total.
    pub fn open_method(
        &self,
        qualified_name: &str,
        method: &MethodRef<'_>,
        argument_count: usize,
    ) -> Result<MethodBody> {
        let path = self.class_file(method.class_name);
        let mut cursor = SourceCursor::open(&path).map_err(|err| match err.kind() {
            ErrorKind::NotFound => RuntimeError::ClassNotFound {
                method: qualified_name.to_string(),
                path: path.clone(),
            },
            _ => RuntimeError::Io(err),
        })?;

        loop {
            let line = cursor
                .read_line()?
                .ok_or_else(|| RuntimeError::MethodNotFound(qualified_name.to_string()))?;
            let mut tokens = line.split_whitespace();
            if tokens.next() == Some(".method") && tokens.last() == Some(method.signature) {
                break;
            }
        }

        let declaration = loop {
            match cursor.read_line()? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => break line.trim().to_string(),
                None => break String::new(),
            }
        };
        let malformed = || RuntimeError::MalformedDeclaration {
            method: qualified_name.to_string(),
            found: declaration.clone(),
        };
        let (directive, count) = declaration.split_once(char::is_whitespace).ok_or_else(malformed)?;
        let count: usize = count.trim().parse().map_err(|_| malformed())?;
        let register_count = match directive {
            ".locals" => argument_count + count,
            ".registers" => count,
            _ => return Err(malformed()),
        };
        cursor.mark();
        Ok(MethodBody {
            cursor,
            register_count,
        })
    }
}
