//! Command building for external tool invocations.
//!
//! Arguments are collected as a tree of [`Arg`] values and flattened
//! depth-first into string tokens only when the command is built.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use url::Url;
use vcd_models::MediaDatabase;

use crate::error::{ProcessError, ProcessResult};

/// One argument value, possibly nested.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Text(String),
    Float(f64),
    /// Made absolute when flattened.
    Path(PathBuf),
    Url(Url),
    List(Vec<Arg>),
    /// Dropped when flattened.
    Absent,
}

impl Arg {
    fn flatten_into(&self, out: &mut Vec<String>) -> ProcessResult<()> {
        match self {
            Arg::Text(text) => out.push(checked(text.clone())?),
            Arg::Float(value) => {
                if !value.is_finite() {
                    return Err(ProcessError::invalid_argument(format!(
                        "non-finite number {}",
                        value
                    )));
                }
                // Keeps a decimal point on whole numbers (`5.0`, not `5`).
                out.push(format!("{:?}", value));
            }
            Arg::Path(path) => out.push(path_token(path)?),
            Arg::Url(url) => out.push(url.as_str().to_string()),
            Arg::List(items) => {
                for item in items {
                    item.flatten_into(out)?;
                }
            }
            Arg::Absent => {}
        }
        Ok(())
    }
}

fn checked(token: String) -> ProcessResult<String> {
    if token.contains('\0') {
        return Err(ProcessError::invalid_argument(format!(
            "token contains a NUL byte: {:?}",
            token
        )));
    }
    Ok(token)
}

fn path_token(path: &Path) -> ProcessResult<String> {
    if path.as_os_str().is_empty() {
        return Err(ProcessError::invalid_argument("empty path"));
    }
    let absolute = std::path::absolute(path).map_err(|e| {
        ProcessError::invalid_argument(format!("cannot resolve {}: {}", path.display(), e))
    })?;
    match absolute.to_str() {
        Some(text) => checked(text.to_string()),
        None => Err(ProcessError::invalid_argument(format!(
            "path is not valid UTF-8: {}",
            absolute.display()
        ))),
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Text(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Text(value)
    }
}

impl From<&String> for Arg {
    fn from(value: &String) -> Self {
        Arg::Text(value.clone())
    }
}

macro_rules! impl_from_integer {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Arg {
                fn from(value: $ty) -> Self {
                    Arg::Text(value.to_string())
                }
            }
        )*
    };
}

impl_from_integer!(i32, i64, u32, u64, usize);

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Arg::Float(value)
    }
}

impl From<&Path> for Arg {
    fn from(value: &Path) -> Self {
        Arg::Path(value.to_path_buf())
    }
}

impl From<PathBuf> for Arg {
    fn from(value: PathBuf) -> Self {
        Arg::Path(value)
    }
}

impl From<&PathBuf> for Arg {
    fn from(value: &PathBuf) -> Self {
        Arg::Path(value.clone())
    }
}

impl From<Url> for Arg {
    fn from(value: Url) -> Self {
        Arg::Url(value)
    }
}

impl From<&Url> for Arg {
    fn from(value: &Url) -> Self {
        Arg::Url(value.clone())
    }
}

/// A database stands for its root directory.
impl From<&MediaDatabase> for Arg {
    fn from(value: &MediaDatabase) -> Self {
        Arg::Path(value.root_dir().to_path_buf())
    }
}

impl From<&Arc<MediaDatabase>> for Arg {
    fn from(value: &Arc<MediaDatabase>) -> Self {
        Arg::from(value.as_ref())
    }
}

impl<T: Into<Arg>> From<Option<T>> for Arg {
    fn from(value: Option<T>) -> Self {
        value.map_or(Arg::Absent, Into::into)
    }
}

impl<T: Into<Arg>> From<Vec<T>> for Arg {
    fn from(value: Vec<T>) -> Self {
        Arg::List(value.into_iter().map(Into::into).collect())
    }
}

impl<T: Clone + Into<Arg>> From<&[T]> for Arg {
    fn from(value: &[T]) -> Self {
        Arg::List(value.iter().cloned().map(Into::into).collect())
    }
}

impl<T: Into<Arg>, const N: usize> From<[T; N]> for Arg {
    fn from(value: [T; N]) -> Self {
        Arg::List(value.into_iter().map(Into::into).collect())
    }
}

/// Build a heterogeneous [`Arg::List`].
///
/// ```
/// use vcd_process::args;
/// let list = args!["-knn", 3u32, Some("-searchByLocalVectors"), None::<&str>];
/// ```
#[macro_export]
macro_rules! args {
    ($($value:expr),* $(,)?) => {
        $crate::command::Arg::List(vec![$($crate::command::Arg::from($value)),*])
    };
}

/// Ordered argument list for one invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandLine {
    items: Vec<Arg>,
}

impl CommandLine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an argument.
    pub fn arg(mut self, value: impl Into<Arg>) -> Self {
        self.push(value);
        self
    }

    pub fn push(&mut self, value: impl Into<Arg>) {
        self.items.push(value.into());
    }

    /// Insert an argument before all others.
    pub fn prepend(&mut self, value: impl Into<Arg>) {
        self.items.insert(0, value.into());
    }

    pub fn extend<I, T>(&mut self, values: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<Arg>,
    {
        self.items.extend(values.into_iter().map(Into::into));
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Flatten into string tokens, depth-first and left to right.
    pub fn tokens(&self) -> ProcessResult<Vec<String>> {
        let mut out = Vec::new();
        for item in &self.items {
            item.flatten_into(&mut out)?;
        }
        Ok(out)
    }

    /// Flatten and bind to a working directory.
    pub fn into_command(self, working_dir: impl Into<PathBuf>) -> ProcessResult<ToolCommand> {
        ToolCommand::new(self.tokens()?, working_dir)
    }
}

impl<T: Into<Arg>> FromIterator<T> for CommandLine {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// An immutable, fully flattened invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    tokens: Vec<String>,
    working_dir: PathBuf,
}

impl ToolCommand {
    /// The first token is the program.
    pub fn new(tokens: Vec<String>, working_dir: impl Into<PathBuf>) -> ProcessResult<Self> {
        if tokens.first().map_or(true, |t| t.is_empty()) {
            return Err(ProcessError::invalid_argument("command has no program"));
        }
        Ok(Self {
            tokens,
            working_dir: working_dir.into(),
        })
    }

    pub fn program(&self) -> &str {
        &self.tokens[0]
    }

    pub fn args(&self) -> &[String] {
        &self.tokens[1..]
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Program file name without directories or `.exe`.
    pub fn short_name(&self) -> &str {
        let program = self.program();
        let name = program
            .rsplit(|c| c == '/' || c == '\\')
            .next()
            .unwrap_or(program);
        name.strip_suffix(".exe").unwrap_or(name)
    }
}

/// Loggable form only; never hand it to a shell.
impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.tokens.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            if token.chars().any(char::is_whitespace) {
                write!(f, "\"{}\"", token)?;
            } else {
                f.write_str(token)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_lists_flatten_in_order() {
        let line = CommandLine::new()
            .arg("-a")
            .arg(args!["b", args!["c", vec!["d", "e"]], "f"])
            .arg(["g", "h"])
            .arg(42u32);
        assert_eq!(
            line.tokens().unwrap(),
            vec!["-a", "b", "c", "d", "e", "f", "g", "h", "42"]
        );
    }

    #[test]
    fn test_absent_values_dropped() {
        let line = CommandLine::new()
            .arg("-ss")
            .arg(None::<&str>)
            .arg(Some("-searchByLocalVectors"))
            .arg(args![None::<u32>, "-knn", 3u32]);
        assert_eq!(
            line.tokens().unwrap(),
            vec!["-ss", "-searchByLocalVectors", "-knn", "3"]
        );
    }

    #[test]
    fn test_prepend_program() {
        let mut line = CommandLine::new().arg("-version");
        line.prepend("pvcd_db");
        let cmd = line.into_command("/tmp").unwrap();
        assert_eq!(cmd.program(), "pvcd_db");
        assert_eq!(cmd.args(), ["-version".to_string()]);
    }

    #[test]
    fn test_paths_become_absolute() {
        let tokens = CommandLine::new().arg(Path::new("rel/dir")).tokens().unwrap();
        assert!(Path::new(&tokens[0]).is_absolute());
        assert!(tokens[0].ends_with("rel/dir"));
    }

    #[test]
    fn test_database_resolves_to_root() {
        let db = MediaDatabase::from_objects(PathBuf::from("/data/DBs/News"), Vec::new()).unwrap();
        let tokens = CommandLine::new().arg("-db").arg(&db).tokens().unwrap();
        assert_eq!(tokens, vec!["-db", "/data/DBs/News"]);
    }

    #[test]
    fn test_numbers_and_urls() {
        let url = Url::parse("http://example.com/v.mp4").unwrap();
        let tokens = args![-0.1, 0.99, 5.0, 5i32, &url];
        let tokens = CommandLine::new().arg(tokens).tokens().unwrap();
        assert_eq!(tokens, vec!["-0.1", "0.99", "5.0", "5", "http://example.com/v.mp4"]);
    }

    #[test]
    fn test_malformed_input() {
        assert!(matches!(
            CommandLine::new().arg(f64::NAN).tokens(),
            Err(ProcessError::InvalidArgument(_))
        ));
        assert!(matches!(
            CommandLine::new().arg(PathBuf::new()).tokens(),
            Err(ProcessError::InvalidArgument(_))
        ));
        assert!(matches!(
            CommandLine::new().arg("a\0b").tokens(),
            Err(ProcessError::InvalidArgument(_))
        ));
        assert!(ToolCommand::new(Vec::new(), "/tmp").is_err());
    }

    #[test]
    fn test_display_quotes_whitespace() {
        let cmd = ToolCommand::new(
            vec!["/opt/pvcd/pvcd_db.exe".into(), "-db".into(), "/my videos/db".into()],
            "/tmp",
        )
        .unwrap();
        assert_eq!(cmd.to_string(), "/opt/pvcd/pvcd_db.exe -db \"/my videos/db\"");
        assert_eq!(cmd.short_name(), "pvcd_db");
    }
}
