//! Interactive shell driving the filesystem engine.

use ext2fs::commands::{DirEntryInfo, StatusReport, UserInfo};
use ext2fs::inode::{
    FileType, INODE_PERMISSION_IRGRP, INODE_PERMISSION_IROTH, INODE_PERMISSION_IRUSR,
    INODE_PERMISSION_IWGRP, INODE_PERMISSION_IWOTH, INODE_PERMISSION_IWUSR,
    INODE_PERMISSION_IXGRP, INODE_PERMISSION_IXOTH, INODE_PERMISSION_IXUSR,
};
use ext2fs::{prompt, Ext2Fs, FsError};
use std::path::Path;

/// Renders the `ls -l`-style type and permission string of a mode word.
fn permissions_string(file_type: Option<FileType>, mode: u16) -> String {
    let type_char = match file_type {
        Some(FileType::Directory) => 'd',
        Some(FileType::Regular) => '-',
        None => '?',
    };
    let bits = [
        (INODE_PERMISSION_IRUSR, 'r'),
        (INODE_PERMISSION_IWUSR, 'w'),
        (INODE_PERMISSION_IXUSR, 'x'),
        (INODE_PERMISSION_IRGRP, 'r'),
        (INODE_PERMISSION_IWGRP, 'w'),
        (INODE_PERMISSION_IXGRP, 'x'),
        (INODE_PERMISSION_IROTH, 'r'),
        (INODE_PERMISSION_IWOTH, 'w'),
        (INODE_PERMISSION_IXOTH, 'x'),
    ];
    let mut out = String::with_capacity(10);
    out.push(type_char);
    for (bit, c) in bits {
        out.push(if mode & bit != 0 { c } else { '-' });
    }
    out
}

fn print_listing(path: &str, rows: &[DirEntryInfo]) {
    println!("Directory listing for: {path}");
    println!(
        "{:<20} {:<10} {:<10} {:<10} {:<10}",
        "Name", "Inode", "Type", "Size", "Permissions"
    );
    println!("------------------------------------------------------------");
    for row in rows {
        let perms = permissions_string(row.file_type, row.mode);
        let type_char = perms.chars().next().unwrap_or('?');
        println!(
            "{:<20} {:<10} {:<10} {:<10} {:<10}",
            row.name, row.inode_no, type_char, row.size, perms
        );
    }
}

fn print_status(report: &StatusReport) {
    println!("File System Status:");
    match &report.image_path {
        Some(path) => println!("Disk image: {}", path.display()),
        None => println!("Disk image: (none)"),
    }
    println!("Total blocks: {}", report.total_blocks);
    println!("Free blocks: {}", report.free_blocks);
    println!("Total inodes: {}", report.total_inodes);
    println!("Free inodes: {}", report.free_inodes);
    println!("Current user: {}", report.current_user);
    println!("Open files: {}", report.open_files);
}

fn print_users(rows: &[UserInfo]) {
    println!("User List:");
    println!(
        "{:<15} {:<10} {:<10} {:<10}",
        "Username", "UID", "GID", "Status"
    );
    println!("----------------------------------------");
    for row in rows {
        let status = if row.logged_in { "Logged in" } else { "Active" };
        println!(
            "{:<15} {:<10} {:<10} {:<10}",
            row.username, row.uid, row.gid, status
        );
    }
}

fn print_help() {
    println!("Available commands:");
    println!("  format <disk_image>     - Format a new disk image");
    println!("  mount <disk_image>      - Mount a disk image");
    println!("  umount                  - Unmount current disk image");
    println!("  status                  - Show file system status");
    println!("  login <user> [pass]     - Login as user");
    println!("  logout                  - Logout current user");
    println!("  users                   - List all users");
    println!("  mkdir <path>            - Create directory");
    println!("  rmdir <path>            - Remove directory");
    println!("  dir [path]              - List directory contents");
    println!("  cd [path]               - Change directory");
    println!("  create <path>           - Create file");
    println!("  delete <path>           - Delete file");
    println!("  open <path> <flags>     - Open file (0=read, 1=write, 2=readwrite)");
    println!("  close <fd>              - Close file");
    println!("  read <fd> <size>        - Read from file");
    println!("  write <fd> <data>       - Write to file");
    println!("  chmod <path> <octal-mode>    - Change file permissions (root only)");
    println!("  chown <path> <uid> <gid>     - Change file owner (root only)");
    println!("  useradd <user> <pass> <uid> <gid> - Add new user (root only)");
    println!("  help                    - Show this help");
    println!("  quit                    - Exit program");
}

/// Splits the first whitespace-separated token off `s`.
fn next_token(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.split_once(char::is_whitespace) {
        Some((token, rest)) => (token, rest.trim_start()),
        None => (s, ""),
    }
}

fn report(err: FsError) {
    eprintln!("ext2fs: error: {err}");
}

/// Executes one command line. Returns `true` when the shell should exit.
fn run_command(fs: &mut Ext2Fs, line: &str) -> bool {
    let (verb, rest) = next_token(line);
    match verb {
        "" => {}
        "format" => {
            let (image, _) = next_token(rest);
            if image.is_empty() {
                println!("Error: Missing disk image name");
                return false;
            }
            match Ext2Fs::format(Path::new(image)) {
                Ok(()) => println!("Disk image formatted successfully"),
                Err(e) => report(e),
            }
        }
        "mount" => {
            let (image, _) = next_token(rest);
            if image.is_empty() {
                println!("Error: Missing disk image name");
                return false;
            }
            match fs.mount(Path::new(image)) {
                Ok(()) => println!("Disk image mounted: {image}"),
                Err(e) => report(e),
            }
        }
        "umount" => match fs.unmount() {
            Ok(()) => println!("Disk image unmounted"),
            Err(e) => report(e),
        },
        "status" => print_status(&fs.status()),
        "login" => {
            let (user, rest) = next_token(rest);
            if user.is_empty() {
                println!("Error: Missing username");
                return false;
            }
            let (pass, _) = next_token(rest);
            let pass = if pass.is_empty() {
                prompt::read_password("Password: ").unwrap_or_default()
            } else {
                pass.to_string()
            };
            match fs.login(user, &pass) {
                Ok(()) => println!("Login successful. Welcome, {user}!"),
                Err(_) => println!("Error: Login failed"),
            }
        }
        "logout" => {
            if fs.is_logged_in() {
                println!("Logout successful. Goodbye, {}!", fs.current_username());
            }
            if let Err(e) = fs.logout() {
                report(e);
            }
        }
        "users" => match fs.list_users() {
            Ok(rows) => print_users(&rows),
            Err(e) => report(e),
        },
        "mkdir" => {
            let (path, _) = next_token(rest);
            if path.is_empty() {
                println!("Error: Missing directory path");
                return false;
            }
            match fs.mkdir(path) {
                Ok(()) => println!("Directory created: {path}"),
                Err(e) => report(e),
            }
        }
        "rmdir" => {
            let (path, _) = next_token(rest);
            if path.is_empty() {
                println!("Error: Missing directory path");
                return false;
            }
            match fs.rmdir(path) {
                Ok(()) => println!("Directory removed: {path}"),
                Err(e) => report(e),
            }
        }
        "dir" => {
            let (path, _) = next_token(rest);
            let path = if path.is_empty() {
                fs.cwd_path()
            } else {
                path.to_string()
            };
            match fs.dir(&path) {
                Ok(rows) => print_listing(&path, &rows),
                Err(e) => report(e),
            }
        }
        "cd" => {
            let (path, _) = next_token(rest);
            let path = if path.is_empty() { "/" } else { path };
            match fs.cd(path) {
                Ok(()) => println!("Changed directory to: {path}"),
                Err(e) => report(e),
            }
        }
        "create" => {
            let (path, _) = next_token(rest);
            if path.is_empty() {
                println!("Error: Missing file path");
                return false;
            }
            match fs.file_create(path) {
                Ok(()) => println!("File created: {path}"),
                Err(e) => report(e),
            }
        }
        "delete" => {
            let (path, _) = next_token(rest);
            if path.is_empty() {
                println!("Error: Missing file path");
                return false;
            }
            match fs.file_delete(path) {
                Ok(()) => println!("File deleted: {path}"),
                Err(e) => report(e),
            }
        }
        "open" => {
            let (path, rest) = next_token(rest);
            let (flags, _) = next_token(rest);
            let Ok(flags) = flags.parse::<i32>() else {
                println!("Error: Missing file path or flags");
                return false;
            };
            if path.is_empty() {
                println!("Error: Missing file path or flags");
                return false;
            }
            match fs.file_open(path, flags) {
                Ok(fd) => println!("File opened: {path} (fd={fd})"),
                Err(e) => report(e),
            }
        }
        "close" => {
            let (fd, _) = next_token(rest);
            let Ok(fd) = fd.parse::<i32>() else {
                println!("Error: Missing file descriptor");
                return false;
            };
            match fs.file_close(fd) {
                Ok(()) => println!("File closed: fd={fd}"),
                Err(e) => report(e),
            }
        }
        "read" => {
            let (fd, rest) = next_token(rest);
            let (size, _) = next_token(rest);
            let (Ok(fd), Ok(size)) = (fd.parse::<i32>(), size.parse::<usize>()) else {
                println!("Error: Missing file descriptor or size");
                return false;
            };
            match fs.file_read(fd, size) {
                Ok(data) if data.is_empty() => println!("End of file reached"),
                Ok(data) => {
                    println!("Read {} bytes:", data.len());
                    println!("{}", String::from_utf8_lossy(&data));
                }
                Err(e) => report(e),
            }
        }
        "write" => {
            let (fd, data) = next_token(rest);
            let Ok(fd) = fd.parse::<i32>() else {
                println!("Error: Missing file descriptor or data");
                return false;
            };
            if data.is_empty() {
                println!("Error: Missing file descriptor or data");
                return false;
            }
            match fs.file_write(fd, data.as_bytes()) {
                Ok(written) => println!("Wrote {written} bytes"),
                Err(e) => report(e),
            }
        }
        "chmod" => {
            let (path, rest) = next_token(rest);
            let (mode, _) = next_token(rest);
            let Ok(mode) = u16::from_str_radix(mode, 8) else {
                println!("Error: Missing path or mode");
                return false;
            };
            match fs.chmod(path, mode) {
                Ok(()) => println!("Permissions changed: {path}"),
                Err(e) => report(e),
            }
        }
        "chown" => {
            let (path, rest) = next_token(rest);
            let (uid, rest) = next_token(rest);
            let (gid, _) = next_token(rest);
            let (Ok(uid), Ok(gid)) = (uid.parse::<u16>(), gid.parse::<u16>()) else {
                println!("Error: Missing path, uid, or gid");
                return false;
            };
            match fs.chown(path, uid, gid) {
                Ok(()) => println!("Owner changed: {path}"),
                Err(e) => report(e),
            }
        }
        "useradd" => {
            let (user, rest) = next_token(rest);
            let (pass, rest) = next_token(rest);
            let (uid, rest) = next_token(rest);
            let (gid, _) = next_token(rest);
            let (Ok(uid), Ok(gid)) = (uid.parse::<u16>(), gid.parse::<u16>()) else {
                println!("Error: Missing username, password, uid, or gid");
                return false;
            };
            match fs.useradd(user, pass, uid, gid) {
                Ok(()) => println!("User added: {user} (uid={uid}, gid={gid})"),
                Err(e) => report(e),
            }
        }
        "help" => print_help(),
        "quit" | "exit" => return true,
        unknown => {
            println!("Unknown command: {unknown}");
            println!("Type 'help' for available commands");
        }
    }
    false
}

fn main() {
    let mut fs = Ext2Fs::new();
    println!("EXT2 File System Simulator");
    println!("Type 'help' for available commands");
    loop {
        let user = fs.current_username();
        let cwd = if fs.is_mounted() {
            fs.cwd_path()
        } else {
            "/".to_string()
        };
        let Some(line) = prompt::read_line(format_args!("{user}:{cwd}> ")) else {
            break;
        };
        if run_command(&mut fs, &line) {
            break;
        }
    }
    if let Err(e) = fs.unmount() {
        report(e);
    }
    println!("Goodbye!");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_string_renders_mode() {
        assert_eq!(
            permissions_string(Some(FileType::Directory), 0o755),
            "drwxr-xr-x"
        );
        assert_eq!(
            permissions_string(Some(FileType::Regular), 0o644),
            "-rw-r--r--"
        );
        assert_eq!(permissions_string(None, 0), "?---------");
    }

    #[test]
    fn token_splitting() {
        assert_eq!(
            next_token("write 3 hello world"),
            ("write", "3 hello world")
        );
        assert_eq!(next_token("  dir  "), ("dir", ""));
        assert_eq!(next_token(""), ("", ""));
    }
}
