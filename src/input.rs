//! Input source management: the ordered list of inputs, opening and
//! advancing between them, and total-size computation.
//!
//! Inputs are opened one at a time; unreadable entries are skipped with
//! a warning and an exit-status bit, and an input that is the same file
//! as the output is refused (copying a file onto itself truncates it).

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;

use tracing::debug;

use crate::error::exit;

/// One input slot as named on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Spec {
    Stdin,
    Path(PathBuf),
}

/// An opened input.
pub struct Input {
    pub file: File,
    pub name: String,
    pub seekable: bool,
    pub is_pipe: bool,
    /// Preferred I/O block size reported by the filesystem.
    pub blksize: usize,
}

impl Input {
    pub(crate) fn from_file(file: File, name: String) -> Input {
        let (seekable, is_pipe, blksize) = match file.metadata() {
            Ok(md) => {
                let ft = md.file_type();
                let pipe = ft.is_fifo() || ft.is_socket();
                let seekable = ft.is_file() || ft.is_block_device();
                (seekable, pipe, md.blksize().max(512) as usize)
            }
            Err(_) => (false, false, 512),
        };
        Input {
            file,
            name,
            seekable,
            is_pipe,
            blksize,
        }
    }

    /// Advises the kernel we will read sequentially. Only meaningful
    /// for regular files; errors are ignored.
    pub fn advise_sequential(&self) {
        if self.seekable {
            unsafe {
                libc::posix_fadvise(
                    self.file.as_raw_fd(),
                    0,
                    0,
                    libc::POSIX_FADV_SEQUENTIAL,
                );
            }
        }
    }
}

/// Duplicates stdin into a `File` so the transfer core can treat every
/// input uniformly.
pub fn stdin_input() -> io::Result<Input> {
    let fd = io::stdin().as_fd().try_clone_to_owned()?;
    Ok(Input::from_file(File::from(fd), "-".to_string()))
}

/// (device, inode) identity used for the same-file-as-output check.
pub fn file_id(file: &File) -> Option<(u64, u64)> {
    file.metadata().ok().map(|md| (md.dev(), md.ino()))
}

/// Size of an opened file: regular files report their metadata size,
/// block devices their seek-end offset, everything else is unknown.
pub fn file_size(file: &File) -> Option<u64> {
    let md = file.metadata().ok()?;
    let ft = md.file_type();
    if ft.is_file() {
        Some(md.size())
    } else if ft.is_block_device() {
        let mut f = file;
        f.seek(SeekFrom::End(0)).ok().inspect(|_| {
            let _ = f.seek(SeekFrom::Start(0));
        })
    } else {
        None
    }
}

/// Counts delimiter bytes in a file by reading it once from the start.
/// Used to compute the total in line mode; restores the read offset.
fn count_delimiters(file: &File, delimiter: u8) -> io::Result<u64> {
    let mut f = file;
    f.seek(SeekFrom::Start(0))?;
    let mut buf = [0u8; 65_536];
    let mut count = 0u64;
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        count += buf[..n].iter().filter(|&&b| b == delimiter).count() as u64;
    }
    f.seek(SeekFrom::Start(0))?;
    Ok(count)
}

// ---------------------------------------------------------------------------
// Input list
// ---------------------------------------------------------------------------

/// Ordered inputs plus the bookkeeping the engine needs: which exit
/// bits input handling has earned, and the computed total size.
pub struct InputList {
    specs: Vec<Spec>,
    next: usize,
    /// (dev, inode) of the output, for the same-file check.
    output_id: Option<(u64, u64)>,
    pub status_bits: i32,
}

impl InputList {
    /// Builds the list from command-line names; `"-"` means stdin, and
    /// an empty list reads stdin alone.
    pub fn new(names: &[String], output_id: Option<(u64, u64)>) -> Self {
        let specs = if names.is_empty() {
            vec![Spec::Stdin]
        } else {
            names
                .iter()
                .map(|n| {
                    if n == "-" {
                        Spec::Stdin
                    } else {
                        Spec::Path(PathBuf::from(n))
                    }
                })
                .collect()
        };
        InputList {
            specs,
            next: 0,
            output_id,
            status_bits: 0,
        }
    }

    /// Total expected count across all inputs: bytes, or delimiters in
    /// line mode. `None` as soon as any input's size is unknowable.
    pub fn compute_total(&mut self, line_mode: bool, delimiter: u8) -> Option<u64> {
        let mut total = 0u64;
        for spec in &self.specs {
            let path = match spec {
                Spec::Stdin => return None,
                Spec::Path(p) => p,
            };
            let file = File::open(path).ok()?;
            if line_mode {
                let md = file.metadata().ok()?;
                if !md.file_type().is_file() {
                    return None;
                }
                total += count_delimiters(&file, delimiter).ok()?;
            } else {
                total += file_size(&file)?;
            }
        }
        Some(total)
    }

    /// True while unopened inputs remain.
    pub fn remaining(&self) -> bool {
        self.next < self.specs.len()
    }

    /// Opens the next readable input, skipping entries that cannot be
    /// accessed (exit bit 2) or that are the same file as the output
    /// (exit bit 4). Returns `None` when the list is exhausted.
    pub fn open_next(&mut self) -> Option<Input> {
        while self.next < self.specs.len() {
            let spec = self.specs[self.next].clone();
            self.next += 1;
            let (file, name) = match spec {
                Spec::Stdin => match stdin_input() {
                    Ok(input) => (input.file, input.name),
                    Err(e) => {
                        eprintln!("flowcat: -: {}", e);
                        self.status_bits |= exit::ACCESS;
                        continue;
                    }
                },
                Spec::Path(path) => match File::open(&path) {
                    Ok(f) => (f, path.display().to_string()),
                    Err(e) => {
                        eprintln!("flowcat: {}: {}", path.display(), e);
                        self.status_bits |= exit::ACCESS;
                        continue;
                    }
                },
            };
            if let (Some(out), Some(id)) = (self.output_id, file_id(&file))
                && out == id
            {
                eprintln!("flowcat: {}: input file is output file", name);
                self.status_bits |= exit::SAME_FILE;
                continue;
            }
            debug!(input = %name, "opened input");
            let input = Input::from_file(file, name);
            input.advise_sequential();
            return Some(input);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmpfile(content: &[u8]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.dat");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn opens_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::write(&a, b"aaa").unwrap();
        std::fs::write(&b, b"bbb").unwrap();
        let mut list = InputList::new(
            &[a.display().to_string(), b.display().to_string()],
            None,
        );
        assert_eq!(list.open_next().unwrap().name, a.display().to_string());
        assert!(list.remaining());
        assert_eq!(list.open_next().unwrap().name, b.display().to_string());
        assert!(list.open_next().is_none());
        assert_eq!(list.status_bits, 0);
    }

    #[test]
    fn missing_file_sets_access_bit() {
        let (_dir, path) = tmpfile(b"data");
        let mut list = InputList::new(
            &["/no/such/flowcat-file".to_string(), path.display().to_string()],
            None,
        );
        let opened = list.open_next().unwrap();
        assert_eq!(opened.name, path.display().to_string());
        assert_eq!(list.status_bits & exit::ACCESS, exit::ACCESS);
    }

    #[test]
    fn same_file_as_output_is_skipped() {
        let (_dir, path) = tmpfile(b"data");
        let out = File::open(&path).unwrap();
        let mut list =
            InputList::new(&[path.display().to_string()], file_id(&out));
        assert!(list.open_next().is_none());
        assert_eq!(list.status_bits & exit::SAME_FILE, exit::SAME_FILE);
    }

    #[test]
    fn total_size_sums_regular_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::write(&a, vec![0u8; 100]).unwrap();
        std::fs::write(&b, vec![0u8; 23]).unwrap();
        let mut list = InputList::new(
            &[a.display().to_string(), b.display().to_string()],
            None,
        );
        assert_eq!(list.compute_total(false, b'\n'), Some(123));
    }

    #[test]
    fn total_lines_counts_delimiters() {
        let (_dir, path) = tmpfile(b"a\nb\nc\n");
        let mut list = InputList::new(&[path.display().to_string()], None);
        assert_eq!(list.compute_total(true, b'\n'), Some(3));
    }

    #[test]
    fn stdin_makes_total_unknown() {
        let (_dir, path) = tmpfile(b"data");
        let mut list =
            InputList::new(&["-".to_string(), path.display().to_string()], None);
        assert_eq!(list.compute_total(false, b'\n'), None);
    }

    #[test]
    fn regular_file_is_seekable_not_pipe() {
        let (_dir, path) = tmpfile(b"data");
        let mut list = InputList::new(&[path.display().to_string()], None);
        let input = list.open_next().unwrap();
        assert!(input.seekable);
        assert!(!input.is_pipe);
        assert!(input.blksize >= 512);
    }
}
