//! Line input for the interactive shell.

use libc::{tcgetattr, tcsetattr, termios, ECHO, ECHOE, ICANON, STDIN_FILENO, TCSANOW, VMIN};
use std::io::{BufRead, Write};
use std::mem::MaybeUninit;
use std::{fmt, io};

/// Prints `prompt` and reads one line from stdin.
///
/// Returns `None` when the input stream is closed.
pub fn read_line<P: fmt::Display>(prompt: P) -> Option<String> {
    print!("{prompt}");
    let _ = io::stdout().flush();
    io::stdin().lock().lines().next()?.ok()
}

/// Prints `prompt` and reads one line with terminal echo disabled.
pub fn read_password<P: fmt::Display>(prompt: P) -> Option<String> {
    // Save the termios state, switch echo off, restore afterwards.
    let saved = unsafe {
        let mut t: termios = MaybeUninit::zeroed().assume_init();
        tcgetattr(STDIN_FILENO, &mut t);
        t
    };
    let mut hidden = saved;
    hidden.c_lflag &= !(ICANON | ECHO | ECHOE);
    hidden.c_cc[VMIN] = 1;
    unsafe {
        tcsetattr(STDIN_FILENO, TCSANOW, &hidden);
    }
    let input = read_line(prompt);
    println!();
    unsafe {
        tcsetattr(STDIN_FILENO, TCSANOW, &saved);
    }
    input
}
