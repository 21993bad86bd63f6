//! planforge CLI binary.
//!
//! All logic is in the library; main.rs only invokes cli::run() and maps
//! the returned code to a process exit.

fn main() {
    if let Err(code) = planforge::cli::run() {
        std::process::exit(code.as_i32());
    }
}
