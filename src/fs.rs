//! Filesystem backends for OCI layouts.
//!
//! The storage engine never touches the filesystem directly: everything goes
//! through a [`LayoutFs`], whose paths are slash separated and relative to the
//! backend's root.  Two backends are provided:
//!
//! - [`DirFs`]: a real directory, accessed through a [`cap_std::fs::Dir`]
//!   handle so that no operation can escape the root.
//! - [`MemFs`]: an in-memory tree, used by tests and by embedders that want a
//!   scratch layout.
//!
//! The only ordering guarantee the engine relies on is that
//! [`LayoutFs::rename`] atomically replaces its target within one directory.

use std::{
    collections::BTreeMap,
    fmt,
    io::{self, Cursor, ErrorKind, Read, Write},
    path::Path,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use cap_std::{
    ambient_authority,
    fs::{Dir, File, OpenOptions},
};

use crate::util::{clean_path, generate_tmpname, join_path, IoKindFilter};

/// A writable file handle.
///
/// Dropping the handle releases it; [`LayoutFile::close`] does the same but
/// reports any error from flushing the data out.
pub trait LayoutFile: Write + Send {
    fn close(self: Box<Self>) -> io::Result<()>;
}

/// The subset of file metadata the engine looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub len: u64,
    pub is_dir: bool,
}

/// A freshly created, uniquely named file.
pub struct TempFile {
    /// Path of the file, relative to the backend root.
    pub path: String,
    pub file: Box<dyn LayoutFile>,
}

impl fmt::Debug for TempFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TempFile")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Read/write filesystem capability rooted at some directory.
pub trait LayoutFs: Send + Sync + fmt::Debug {
    /// Opens an existing file for reading.
    fn open(&self, path: &str) -> io::Result<Box<dyn Read + Send>>;

    /// Creates or truncates a file for writing.
    fn create(&self, path: &str) -> io::Result<Box<dyn LayoutFile>>;

    fn stat(&self, path: &str) -> io::Result<FileStat>;

    /// Creates a directory and all of its parents.
    fn mkdir_all(&self, path: &str) -> io::Result<()>;

    /// Exclusively creates a new file in `dir`, named after `pattern` with the
    /// last `*` replaced by a random string.
    fn create_temp(&self, dir: &str, pattern: &str) -> io::Result<TempFile> {
        for _ in 0..16 {
            let path = join_path(dir, &generate_tmpname(pattern));
            if let Some(file) = self.create_new(&path).filter_kind(ErrorKind::AlreadyExists)? {
                return Ok(TempFile { path, file });
            }
        }
        Err(io::Error::new(
            ErrorKind::AlreadyExists,
            format!("no unused temporary name for {pattern} in {dir}"),
        ))
    }

    /// Creates a file that must not exist yet.
    fn create_new(&self, path: &str) -> io::Result<Box<dyn LayoutFile>>;

    /// Moves `from` onto `to`, replacing `to` atomically.
    fn rename(&self, from: &str, to: &str) -> io::Result<()>;
}

impl LayoutFile for File {
    fn close(self: Box<Self>) -> io::Result<()> {
        self.sync_all()
    }
}

/// A [`LayoutFs`] backed by a real directory.
#[derive(Debug)]
pub struct DirFs {
    root: Dir,
}

impl DirFs {
    pub fn new(root: Dir) -> Self {
        Self { root }
    }

    /// Opens the directory at `path` as the root.
    pub fn open_ambient(path: impl AsRef<Path>) -> io::Result<Self> {
        Dir::open_ambient_dir(path, ambient_authority()).map(Self::new)
    }

    /// Like [`DirFs::open_ambient`], creating the directory first if needed.
    pub fn create_ambient(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        Dir::create_ambient_dir_all(path, ambient_authority())?;
        Self::open_ambient(path)
    }
}

impl LayoutFs for DirFs {
    fn open(&self, path: &str) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(self.root.open(path)?))
    }

    fn create(&self, path: &str) -> io::Result<Box<dyn LayoutFile>> {
        Ok(Box::new(self.root.create(path)?))
    }

    fn stat(&self, path: &str) -> io::Result<FileStat> {
        let meta = self.root.metadata(path)?;
        Ok(FileStat {
            len: meta.len(),
            is_dir: meta.is_dir(),
        })
    }

    fn mkdir_all(&self, path: &str) -> io::Result<()> {
        self.root.create_dir_all(path)
    }

    fn create_new(&self, path: &str) -> io::Result<Box<dyn LayoutFile>> {
        let file = self
            .root
            .open_with(path, OpenOptions::new().write(true).create_new(true))?;
        Ok(Box::new(file))
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        self.root.rename(from, &self.root, to)
    }
}

type Contents = Arc<Mutex<Vec<u8>>>;

#[derive(Debug)]
enum Node {
    Dir,
    File(Contents),
}

/// An in-memory [`LayoutFs`].
///
/// Writes land in the file as they are made, so a reader opening a file that
/// is being written sees whatever has been written so far.  Cloning a `MemFs`
/// yields another handle onto the same tree.
#[derive(Debug, Clone, Default)]
pub struct MemFs {
    nodes: Arc<Mutex<BTreeMap<String, Node>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn mem_path(path: &str) -> io::Result<String> {
    let path = clean_path(path);
    if path.starts_with('/') || path == ".." || path.starts_with("../") {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("{path} escapes the filesystem root"),
        ));
    }
    Ok(path)
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(pos) => &path[..pos],
        None => ".",
    }
}

fn not_found(path: &str) -> io::Error {
    io::Error::new(ErrorKind::NotFound, format!("{path}: no such file"))
}

fn not_a_directory(path: &str) -> io::Error {
    io::Error::other(format!("{path}: not a directory"))
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths of all regular files, sorted.
    pub fn files(&self) -> Vec<String> {
        lock(&self.nodes)
            .iter()
            .filter(|(_, node)| matches!(node, Node::File(_)))
            .map(|(path, _)| path.clone())
            .collect()
    }

    fn is_dir(nodes: &BTreeMap<String, Node>, path: &str) -> bool {
        path == "." || matches!(nodes.get(path), Some(Node::Dir))
    }

    fn check_parent(nodes: &BTreeMap<String, Node>, path: &str) -> io::Result<()> {
        let parent = parent_of(path);
        match nodes.get(parent) {
            Some(Node::File(_)) => Err(not_a_directory(parent)),
            _ if Self::is_dir(nodes, parent) => Ok(()),
            _ => Err(not_found(parent)),
        }
    }

    fn writer(contents: Contents) -> Box<dyn LayoutFile> {
        Box::new(MemFile { contents })
    }
}

struct MemFile {
    contents: Contents,
}

impl Write for MemFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock(&self.contents).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LayoutFile for MemFile {
    fn close(self: Box<Self>) -> io::Result<()> {
        Ok(())
    }
}

impl LayoutFs for MemFs {
    fn open(&self, path: &str) -> io::Result<Box<dyn Read + Send>> {
        let path = mem_path(path)?;
        match lock(&self.nodes).get(&path) {
            Some(Node::File(contents)) => Ok(Box::new(Cursor::new(lock(contents).clone()))),
            Some(Node::Dir) => Err(io::Error::other(format!("{path}: is a directory"))),
            None => Err(not_found(&path)),
        }
    }

    fn create(&self, path: &str) -> io::Result<Box<dyn LayoutFile>> {
        let path = mem_path(path)?;
        let mut nodes = lock(&self.nodes);
        Self::check_parent(&nodes, &path)?;
        if let Some(Node::File(contents)) = nodes.get(&path) {
            lock(contents).clear();
            return Ok(Self::writer(contents.clone()));
        }
        if Self::is_dir(&nodes, &path) {
            return Err(io::Error::other(format!("{path}: is a directory")));
        }
        let contents = Contents::default();
        nodes.insert(path, Node::File(contents.clone()));
        Ok(Self::writer(contents))
    }

    fn stat(&self, path: &str) -> io::Result<FileStat> {
        let path = mem_path(path)?;
        let nodes = lock(&self.nodes);
        match nodes.get(&path) {
            Some(Node::File(contents)) => Ok(FileStat {
                len: lock(contents).len() as u64,
                is_dir: false,
            }),
            _ if Self::is_dir(&nodes, &path) => Ok(FileStat {
                len: 0,
                is_dir: true,
            }),
            _ => Err(not_found(&path)),
        }
    }

    fn mkdir_all(&self, path: &str) -> io::Result<()> {
        let path = mem_path(path)?;
        if path == "." {
            return Ok(());
        }
        let mut nodes = lock(&self.nodes);
        let mut current = String::new();
        for part in path.split('/') {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(part);
            match nodes.get(&current) {
                Some(Node::Dir) => {}
                Some(Node::File(_)) => return Err(not_a_directory(&current)),
                None => {
                    nodes.insert(current.clone(), Node::Dir);
                }
            }
        }
        Ok(())
    }

    fn create_new(&self, path: &str) -> io::Result<Box<dyn LayoutFile>> {
        let path = mem_path(path)?;
        let mut nodes = lock(&self.nodes);
        Self::check_parent(&nodes, &path)?;
        if nodes.contains_key(&path) || path == "." {
            return Err(io::Error::new(
                ErrorKind::AlreadyExists,
                format!("{path}: file exists"),
            ));
        }
        let contents = Contents::default();
        nodes.insert(path, Node::File(contents.clone()));
        Ok(Self::writer(contents))
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        let from = mem_path(from)?;
        let to = mem_path(to)?;
        let mut nodes = lock(&self.nodes);
        Self::check_parent(&nodes, &to)?;
        if Self::is_dir(&nodes, &to) {
            return Err(io::Error::other(format!("{to}: is a directory")));
        }
        match nodes.remove(&from) {
            Some(Node::File(contents)) => {
                nodes.insert(to, Node::File(contents));
                Ok(())
            }
            Some(Node::Dir) => {
                nodes.insert(from.clone(), Node::Dir);
                Err(io::Error::new(
                    ErrorKind::Unsupported,
                    format!("{from}: renaming directories is not supported"),
                ))
            }
            None => Err(not_found(&from)),
        }
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn read_all(fs: &dyn LayoutFs, path: &str) -> Vec<u8> {
        let mut buf = vec![];
        fs.open(path).unwrap().read_to_end(&mut buf).unwrap();
        buf
    }

    fn exercise(fs: &dyn LayoutFs) {
        fs.mkdir_all("a/b").unwrap();
        fs.mkdir_all("a/b").unwrap();
        assert!(fs.stat("a/b").unwrap().is_dir);

        let mut file = fs.create("a/b/file").unwrap();
        file.write_all(b"hello").unwrap();
        file.close().unwrap();
        assert_eq!(read_all(fs, "a/b/file"), b"hello");
        assert_eq!(
            fs.stat("a/b/file").unwrap(),
            FileStat {
                len: 5,
                is_dir: false
            }
        );

        // create truncates
        let mut file = fs.create("a/b/file").unwrap();
        file.write_all(b"hi").unwrap();
        file.close().unwrap();
        assert_eq!(read_all(fs, "a/b/file"), b"hi");

        assert_eq!(
            fs.create_new("a/b/file").err().unwrap().kind(),
            ErrorKind::AlreadyExists
        );

        let TempFile { path, mut file } = fs.create_temp("a/b", "index.json.*.tmp").unwrap();
        assert!(path.starts_with("a/b/index.json."));
        assert!(path.ends_with(".tmp"));
        file.write_all(b"replaced").unwrap();
        file.close().unwrap();

        fs.rename(&path, "a/b/file").unwrap();
        assert_eq!(read_all(fs, "a/b/file"), b"replaced");
        assert_eq!(fs.stat(&path).unwrap_err().kind(), ErrorKind::NotFound);

        assert_eq!(fs.open("missing").err().unwrap().kind(), ErrorKind::NotFound);
        assert_eq!(
            fs.create("missing/file").err().unwrap().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_memfs() {
        exercise(&MemFs::new());
    }

    #[test]
    fn test_dirfs() {
        let td = tempfile::tempdir().unwrap();
        let fs = DirFs::open_ambient(td.path()).unwrap();
        exercise(&fs);
        assert_eq!(
            std::fs::read(td.path().join("a/b/file")).unwrap(),
            b"replaced"
        );
    }

    #[test]
    fn test_dirfs_is_sandboxed() {
        let td = tempfile::tempdir().unwrap();
        let fs = DirFs::create_ambient(td.path().join("root")).unwrap();
        assert!(fs.create("../outside").is_err());
        assert!(fs.open("/etc/passwd").is_err());
    }

    #[test]
    fn test_memfs_rejects_escape() {
        let fs = MemFs::new();
        assert_eq!(
            fs.create("../outside").err().unwrap().kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            fs.mkdir_all("/abs").unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn test_memfs_writes_are_visible_immediately() {
        let fs = MemFs::new();
        let mut file = fs.create("doc").unwrap();
        file.write_all(b"{\"par").unwrap();
        assert_eq!(read_all(&fs, "doc"), b"{\"par");
        file.write_all(b"tial\":1}").unwrap();
        file.close().unwrap();
        assert_eq!(read_all(&fs, "doc"), b"{\"partial\":1}");
    }

    #[test]
    fn test_memfs_shared_between_clones() {
        let fs = MemFs::new();
        let other = fs.clone();
        let mut file = fs.create("x").unwrap();
        file.write_all(b"1").unwrap();
        file.close().unwrap();
        fs.mkdir_all("d").unwrap();
        assert_eq!(read_all(&other, "x"), b"1");
        assert_eq!(other.files(), ["x"]);
    }
}
