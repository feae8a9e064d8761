extern crate chd_verify;

use std::ffi::OsString;
use std::fs::File;
use std::io;
use std::io::Write;
use std::process;

use chd_verify::{Chd, Error};

fn check(path: &OsString, out: &mut impl Write) -> Result<(), Error> {
    let file = File::open(path)?;
    let mut chd = Chd::open(file)?;
    chd.write_summary(out)?;
    chd.dump_metadata(out)?;
    chd.verify()
}

fn main() -> io::Result<()> {
    let paths: Vec<OsString> = std::env::args_os().skip(1).collect();
    if paths.is_empty() {
        eprintln!("Usage: rchdtool <chd-file>...");
        process::exit(2);
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut failed = 0;
    for path in &paths {
        writeln!(out, "Input file: {:?}", path)?;
        match check(path, &mut out) {
            Ok(()) => writeln!(out, "Verify: OK")?,
            Err(e) => {
                failed += 1;
                match e.hunk() {
                    Some(hunk) => writeln!(out, "Verify: FAILED ({}) at hunk {}", e.kind(), hunk)?,
                    None => writeln!(out, "Verify: FAILED ({})", e.kind())?,
                }
                writeln!(out, "  {}", e)?;
            }
        }
        writeln!(out)?;
    }
    if failed > 0 {
        out.flush()?;
        process::exit(1);
    }
    Ok(())
}
