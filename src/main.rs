use std::env;
use std::fs::File;
use std::io::BufReader;
use std::process::ExitCode;

use memtrace::{ReadError, TraceEntry, TraceReader};

/// Walks a persisted trace file and prints one line per entry.
fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let Some(path) = env::args().nth(1) else {
        eprintln!("usage: trace-dump <file.trc>");
        return ExitCode::FAILURE;
    };

    match dump(&path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("trace-dump: {path}: {e}");
            ExitCode::FAILURE
        }
    }
}

fn dump(path: &str) -> Result<(), ReadError> {
    let file = File::open(path)?;
    let reader = TraceReader::open(BufReader::new(file))?;
    println!("format: {:?}", reader.version());

    for entry in reader {
        match entry? {
            TraceEntry::NewKernel { name, width } => {
                println!("kernel {name:?} width={width}");
            }
            TraceEntry::Record(r) => {
                print!(
                    "  {:?} size={} smid={} warp={} instr={} cta=({},{},{}) clock={}",
                    r.kind, r.size, r.smid, r.warp, r.instr_id, r.cta.x, r.cta.y, r.cta.z, r.clock
                );
                for g in r.groups.iter() {
                    print!(" [{:#x} stride={} count={}]", g.addr, g.stride, g.count);
                }
                println!();
            }
        }
    }
    Ok(())
}
