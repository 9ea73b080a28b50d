use std::cmp;
use std::env;
use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::Path;

use chrono::{DateTime, Local};
use thiserror::Error;
use users::{get_group_by_gid, get_user_by_uid};

#[derive(Debug)]
struct Config {
    mode: DisplayMode,
    recursive: bool,
    paths: Vec<String>,
    use_color: bool,
}

#[derive(Debug, Clone, Copy)]
enum DisplayMode {
    Grid,
    Long,
    Horizontal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum EntryKind {
    Regular,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ColorClass {
    Directory,
    Symlink,
    Executable,
    Archive,
    Plain,
}

#[derive(Error, Debug)]
enum ListError {
    #[error("Cannot open directory: {path}")]
    DirectoryUnreadable {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Cannot stat {path}: {source}")]
    StatUnavailable {
        path: String,
        #[source]
        source: io::Error,
    },
}

struct EntryMetadata {
    kind: EntryKind,
    mode: u32,
    nlink: u64,
    owner: String,
    group: String,
    size: i64,
    modified: DateTime<Local>,
}

fn main() -> io::Result<()> {
    let args: Vec<String> = env::args().collect();
    let config = parse_args(&args);

    let stdout = io::stdout();
    let mut out = stdout.lock();

    if config.paths.is_empty() {
        list_directory(&mut out, Path::new("."), &config, false)?;
    } else {
        for path in &config.paths {
            writeln!(out, "{}:", path)?;
            list_directory(&mut out, Path::new(path), &config, false)?;
            writeln!(out)?;
        }
    }

    Ok(())
}

fn parse_args(args: &[String]) -> Config {
    let mut config = Config {
        mode: DisplayMode::Grid,
        recursive: false,
        paths: Vec::new(),
        use_color: atty::is(atty::Stream::Stdout),
    };

    for arg in &args[1..] {
        match arg.strip_prefix('-') {
            Some(flags) if !flags.is_empty() => {
                for flag in flags.chars() {
                    match flag {
                        'l' => config.mode = DisplayMode::Long,
                        'x' => config.mode = DisplayMode::Horizontal,
                        'R' => config.recursive = true,
                        _ => eprintln!("Unknown option: -{}", flag),
                    }
                }
            }
            _ => config.paths.push(arg.clone()),
        }
    }

    config
}

fn list_directory<W: Write>(
    out: &mut W,
    path: &Path,
    config: &Config,
    announce: bool,
) -> io::Result<()> {
    if announce {
        writeln!(out, "{}:", path.display())?;
    }

    let (names, max_len) = match collect_entries(path) {
        Ok(collected) => collected,
        Err(err) => {
            eprintln!("{}", err);
            return Ok(());
        }
    };

    let term_width = terminal_width();
    match config.mode {
        DisplayMode::Long => print_long(out, path, &names, config.use_color)?,
        DisplayMode::Grid => print_grid(out, path, &names, max_len, term_width, config.use_color)?,
        DisplayMode::Horizontal => {
            print_across(out, path, &names, max_len, term_width, config.use_color)?
        }
    }

    if config.recursive {
        for name in &names {
            // Dot entries never survive collection; never descend into them.
            if name.as_str() == "." || name.as_str() == ".." {
                continue;
            }
            let child = path.join(name);
            let is_dir = fs::symlink_metadata(&child)
                .map(|meta| meta.file_type().is_dir())
                .unwrap_or(false);
            if is_dir {
                writeln!(out)?;
                list_directory(out, &child, config, true)?;
            }
        }
    }

    Ok(())
}

fn collect_entries(dir: &Path) -> Result<(Vec<String>, usize), ListError> {
    let entries = fs::read_dir(dir).map_err(|source| ListError::DirectoryUnreadable {
        path: dir.display().to_string(),
        source,
    })?;

    let mut names = Vec::new();
    let mut max_len = 0;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        max_len = cmp::max(max_len, name.len());
        names.push(name);
    }

    // Byte-wise ascending, so uppercase sorts before lowercase ASCII.
    names.sort();

    Ok((names, max_len))
}

fn read_metadata(dir: &Path, name: &str) -> Result<EntryMetadata, ListError> {
    let path = dir.join(name);
    let metadata = fs::symlink_metadata(&path).map_err(|source| ListError::StatUnavailable {
        path: path.display().to_string(),
        source,
    })?;
    let modified = metadata
        .modified()
        .map_err(|source| ListError::StatUnavailable {
            path: path.display().to_string(),
            source,
        })?
        .into();

    Ok(EntryMetadata {
        kind: entry_kind(metadata.file_type()),
        mode: metadata.mode(),
        nlink: metadata.nlink(),
        owner: get_user_by_uid(metadata.uid())
            .map(|user| user.name().to_string_lossy().into_owned())
            .unwrap_or_else(|| String::from("???")),
        group: get_group_by_gid(metadata.gid())
            .map(|group| group.name().to_string_lossy().into_owned())
            .unwrap_or_else(|| String::from("???")),
        size: metadata.size() as i64,
        modified,
    })
}

fn entry_kind(file_type: fs::FileType) -> EntryKind {
    if file_type.is_dir() {
        EntryKind::Directory
    } else if file_type.is_symlink() {
        EntryKind::Symlink
    } else if file_type.is_char_device() {
        EntryKind::CharDevice
    } else if file_type.is_block_device() {
        EntryKind::BlockDevice
    } else if file_type.is_fifo() {
        EntryKind::Fifo
    } else if file_type.is_file() {
        EntryKind::Regular
    } else {
        EntryKind::Other
    }
}

fn format_mode(kind: EntryKind, mode: u32) -> String {
    let mut out = String::with_capacity(10);
    out.push(match kind {
        EntryKind::Directory => 'd',
        EntryKind::Symlink => 'l',
        EntryKind::CharDevice => 'c',
        EntryKind::BlockDevice => 'b',
        EntryKind::Fifo => 'p',
        EntryKind::Regular | EntryKind::Other => '-',
    });
    // Nine rwx positions; setuid/setgid/sticky bits render nothing.
    for (bit, glyph) in [
        (0o400, 'r'),
        (0o200, 'w'),
        (0o100, 'x'),
        (0o040, 'r'),
        (0o020, 'w'),
        (0o010, 'x'),
        (0o004, 'r'),
        (0o002, 'w'),
        (0o001, 'x'),
    ] {
        out.push(if mode & bit != 0 { glyph } else { '-' });
    }
    out
}

fn classify(kind: EntryKind, mode: u32, name: &str) -> ColorClass {
    match kind {
        EntryKind::Directory => ColorClass::Directory,
        EntryKind::Symlink => ColorClass::Symlink,
        _ => {
            if mode & 0o100 != 0 {
                ColorClass::Executable
            } else if name.contains(".tar") || name.contains(".zip") {
                ColorClass::Archive
            } else {
                ColorClass::Plain
            }
        }
    }
}

fn paint(class: ColorClass, name: &str) -> String {
    let start = match class {
        ColorClass::Directory => "\x1B[1;34m",
        ColorClass::Symlink => "\x1B[1;36m",
        ColorClass::Executable => "\x1B[1;32m",
        ColorClass::Archive => "\x1B[1;31m",
        ColorClass::Plain => return name.to_string(),
    };
    format!("{}{}\x1B[0m", start, name)
}

fn display_name(dir: &Path, name: &str, use_color: bool) -> String {
    if !use_color {
        return name.to_string();
    }
    let class = match fs::symlink_metadata(dir.join(name)) {
        Ok(meta) => classify(entry_kind(meta.file_type()), meta.mode(), name),
        Err(_) => ColorClass::Plain,
    };
    paint(class, name)
}

fn terminal_width() -> usize {
    term_size::dimensions().map(|(w, _)| w).unwrap_or(80)
}

fn grid_dimensions(count: usize, max_len: usize, term_width: usize) -> (usize, usize, usize) {
    let col_width = max_len + 2;
    let cols = cmp::max(1, term_width / col_width);
    let rows = (count + cols - 1) / cols;
    (col_width, cols, rows)
}

fn print_grid<W: Write>(
    out: &mut W,
    dir: &Path,
    names: &[String],
    max_len: usize,
    term_width: usize,
    use_color: bool,
) -> io::Result<()> {
    if names.is_empty() {
        return Ok(());
    }

    let (col_width, cols, rows) = grid_dimensions(names.len(), max_len, term_width);
    for row in 0..rows {
        for col in 0..cols {
            let idx = col * rows + row;
            if idx >= names.len() {
                continue;
            }
            let name = &names[idx];
            // Pad from the plain length so escape bytes never count.
            let padding = col_width - name.len();
            write!(out, "{}{}", display_name(dir, name, use_color), " ".repeat(padding))?;
        }
        writeln!(out)?;
    }

    Ok(())
}

fn print_across<W: Write>(
    out: &mut W,
    dir: &Path,
    names: &[String],
    max_len: usize,
    term_width: usize,
    use_color: bool,
) -> io::Result<()> {
    if names.is_empty() {
        return Ok(());
    }

    let col_width = max_len + 2;
    let mut position = 0;
    for name in names {
        if position + col_width > term_width {
            writeln!(out)?;
            position = 0;
        }
        let padding = col_width - name.len();
        write!(out, "{}{}", display_name(dir, name, use_color), " ".repeat(padding))?;
        position += col_width;
    }
    writeln!(out)
}

fn print_long<W: Write>(
    out: &mut W,
    dir: &Path,
    names: &[String],
    use_color: bool,
) -> io::Result<()> {
    for name in names {
        let meta = match read_metadata(dir, name) {
            Ok(meta) => meta,
            Err(err) => {
                eprintln!("{}", err);
                continue;
            }
        };
        let shown = if use_color {
            paint(classify(meta.kind, meta.mode, name), name)
        } else {
            name.clone()
        };
        writeln!(out, "{}", long_format_line(&meta, &shown))?;
    }
    Ok(())
}

fn long_format_line(meta: &EntryMetadata, name: &str) -> String {
    format!(
        "{} {:>2} {} {} {:>6} {} {}",
        format_mode(meta.kind, meta.mode),
        meta.nlink,
        meta.owner,
        meta.group,
        meta.size,
        meta.modified.format("%b %e %H:%M"),
        name
    )
}
